use std::any::Any;
use std::collections::{BTreeMap, VecDeque};
use std::marker::PhantomData;

use log::trace;

use super::downstream_manager::{BufferedDownstreamManager, DownstreamManager};
use super::outbound_path::OutboundPath;
use super::stream_message::{ElementType, Payload};
use super::stream_slot::StreamSlot;

/// Decides whether a path with filter `F` receives element `T`. Must be a pure function of both.
pub trait Select<F, T>: Send {
    fn select(&self, filter: &F, x: &T) -> bool;
}

/// Sends every element to every path.
#[derive(Debug, Default, Clone, Copy)]
pub struct SelectAll;

impl<F, T> Select<F, T> for SelectAll {
    fn select(&self, _filter: &F, _x: &T) -> bool {
        true
    }
}

/// Selects with a user predicate.
pub struct SelectWith<P>(pub P);

impl<F, T, P> Select<F, T> for SelectWith<P>
where
    P: Fn(&F, &T) -> bool + Send,
{
    fn select(&self, filter: &F, x: &T) -> bool {
        (self.0)(filter, x)
    }
}

/// Per-path filter and cache of elements already selected for the path.
#[derive(Debug)]
struct PathCache<F, T> {
    filter: F,
    buf: VecDeque<T>,
}

/// Sends a copy of each element to every path whose filter selects it.
///
/// Elements stay in the central buffer until every path that is not closing has room for them,
/// then move into per-path caches from which batches go out as credit permits.
pub struct BroadcastDownstreamManager<T, F = (), S = SelectAll> {
    buf: VecDeque<T>,
    paths: BTreeMap<StreamSlot, OutboundPath>,
    caches: BTreeMap<StreamSlot, PathCache<F, T>>,
    select: S,
    _filter: PhantomData<fn() -> F>,
}

impl<T: Clone + Send + 'static> BroadcastDownstreamManager<T, (), SelectAll> {
    pub fn new() -> Self {
        Self::with_selector(SelectAll)
    }
}

impl<T: Clone + Send + 'static> Default for BroadcastDownstreamManager<T, (), SelectAll> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, F, S> BroadcastDownstreamManager<T, F, S>
where
    T: Clone + Send + 'static,
    F: Default + Send + 'static,
    S: Select<F, T> + 'static,
{
    pub fn with_selector(select: S) -> Self {
        Self {
            buf: VecDeque::new(),
            paths: BTreeMap::new(),
            caches: BTreeMap::new(),
            select,
            _filter: PhantomData,
        }
    }

    /// Sets the filter of `slot`. Returns false for unknown slots.
    pub fn set_filter(&mut self, slot: StreamSlot, filter: F) -> bool {
        match self.caches.get_mut(&slot) {
            Some(cache) => {
                cache.filter = filter;
                true
            }
            None => false,
        }
    }

    pub fn filter(&self, slot: StreamSlot) -> Option<&F> {
        self.caches.get(&slot).map(|c| &c.filter)
    }

    pub fn all_filters(&self, pred: impl Fn(&F) -> bool) -> bool {
        self.caches.values().all(|c| pred(&c.filter))
    }

    pub fn any_filter(&self, pred: impl Fn(&F) -> bool) -> bool {
        self.caches.values().any(|c| pred(&c.filter))
    }

    pub fn no_filter(&self, pred: impl Fn(&F) -> bool) -> bool {
        !self.any_filter(pred)
    }

    pub fn selector(&self) -> &S {
        &self.select
    }

    /// Largest chunk every open path can take, or `None` if all paths are closing.
    fn chunk_size(&self) -> Option<usize> {
        self.paths
            .values()
            .filter(|p| !p.closing())
            .map(|p| {
                let cached = self.caches.get(&p.slot()).map_or(0, |c| c.buf.len());
                p.open_credit.saturating_sub(cached)
            })
            .min()
    }

    fn fan_out(&mut self, chunk: &[T]) {
        for (slot, path) in &self.paths {
            if path.closing() {
                continue;
            }
            if let Some(cache) = self.caches.get_mut(slot) {
                for x in chunk {
                    if self.select.select(&cache.filter, x) {
                        cache.buf.push_back(x.clone());
                    }
                }
            }
        }
    }

    fn emit_cached(&mut self, force_underfull: bool) {
        for (slot, path) in self.paths.iter_mut() {
            if let Some(cache) = self.caches.get_mut(slot) {
                let force = force_underfull || path.closing();
                path.emit_batches(&mut cache.buf, force);
            }
        }
    }
}

impl<T, F, S> DownstreamManager for BroadcastDownstreamManager<T, F, S>
where
    T: Clone + Send + 'static,
    F: Default + Send + 'static,
    S: Select<F, T> + 'static,
{
    fn element_type(&self) -> Option<ElementType> {
        Some(ElementType::of::<T>())
    }

    fn num_paths(&self) -> usize {
        self.paths.len()
    }

    fn path_slots(&self) -> Vec<StreamSlot> {
        self.paths.keys().copied().collect()
    }

    fn path(&self, slot: StreamSlot) -> Option<&OutboundPath> {
        self.paths.get(&slot)
    }

    fn path_mut(&mut self, slot: StreamSlot) -> Option<&mut OutboundPath> {
        self.paths.get_mut(&slot)
    }

    fn for_each_path(&self, f: &mut dyn FnMut(&OutboundPath)) {
        self.paths.values().for_each(f);
    }

    fn for_each_path_mut(&mut self, f: &mut dyn FnMut(&mut OutboundPath)) {
        self.paths.values_mut().for_each(f);
    }

    fn insert_path(&mut self, path: OutboundPath) -> bool {
        let slot = path.slot();
        if self.paths.contains_key(&slot) {
            return false;
        }
        self.paths.insert(slot, path);
        self.caches.insert(
            slot,
            PathCache {
                filter: F::default(),
                buf: VecDeque::new(),
            },
        );
        true
    }

    fn take_path(&mut self, slot: StreamSlot) -> Option<OutboundPath> {
        self.caches.remove(&slot);
        self.paths.remove(&slot)
    }

    fn emit_batches_impl(&mut self, force_underfull: bool) {
        if self.paths.is_empty() {
            return;
        }
        if let Some(chunk_size) = self.chunk_size() {
            let n = chunk_size.min(self.buf.len());
            if n > 0 {
                let chunk: Vec<T> = self.buf.drain(..n).collect();
                trace!(paths = self.paths.len(), size = n; "Broadcasting chunk");
                self.fan_out(&chunk);
            }
        }
        self.emit_cached(force_underfull);
    }

    fn buffered(&self) -> usize {
        let max_cached = self.caches.values().map(|c| c.buf.len()).max().unwrap_or(0);
        self.buf.len() + max_cached
    }

    fn buffered_slot(&self, slot: StreamSlot) -> usize {
        self.buf.len() + self.caches.get(&slot).map_or(0, |c| c.buf.len())
    }

    /// Limited by the slowest path that told us its capacity.
    fn capacity(&self) -> usize {
        let limit = self
            .paths
            .values()
            .filter(|p| !p.closing() && p.max_capacity > 0)
            .map(|p| p.max_capacity)
            .min();
        match limit {
            Some(limit) => limit.saturating_sub(self.buffered()),
            None => 0,
        }
    }

    fn push_erased(&mut self, xs: Payload) -> Result<usize, Payload> {
        let xs = xs.downcast::<Vec<T>>()?;
        let n = xs.len();
        self.buf.extend(xs);
        Ok(n)
    }

    fn fan_out_flush(&mut self) {
        let chunk: Vec<T> = self.buf.drain(..).collect();
        self.fan_out(&chunk);
    }

    fn clear_buffers(&mut self) {
        self.buf.clear();
        for cache in self.caches.values_mut() {
            cache.buf.clear();
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl<T, F, S> BufferedDownstreamManager<T> for BroadcastDownstreamManager<T, F, S>
where
    T: Clone + Send + 'static,
    F: Default + Send + 'static,
    S: Select<F, T> + 'static,
{
    fn buf(&mut self) -> &mut VecDeque<T> {
        &mut self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::actor_ref::{ActorId, ActorRef};
    use crate::actors::messages::{Envelope, Message};
    use crate::streaming::stream_message::{
        AckBatch, AckOpen, DownstreamContent, DownstreamMsg, StreamMessage,
    };
    use crate::streaming::stream_slot::StreamId;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn add_path<M: DownstreamManager>(
        out: &mut M,
        slot: StreamSlot,
        credit: usize,
    ) -> UnboundedReceiver<Envelope> {
        let (owner_tx, _owner_rx) = unbounded_channel();
        let (tx, rx) = unbounded_channel();
        let owner = ActorRef::new(ActorId(1), "source", owner_tx);
        let target = ActorRef::new(ActorId(10 + slot as u64), "sink", tx);
        let mut path = OutboundPath::new(slot, StreamId::new(ActorId(1), slot as u64), target.clone(), owner);
        path.handle_ack_open(
            &AckOpen {
                rebind_from: target.id(),
                initial_credit: credit,
                max_capacity: 20,
                desired_batch_size: 5,
                redeployable: false,
            },
            &target,
            1,
        );
        assert!(out.insert_path(path));
        rx
    }

    fn received(rx: &mut UnboundedReceiver<Envelope>) -> Vec<i32> {
        let mut xs = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            if let Message::Stream(StreamMessage::Downstream(DownstreamMsg {
                content: DownstreamContent::Batch(batch),
                ..
            })) = envelope.message
            {
                xs.extend(batch.xs.downcast::<Vec<i32>>().unwrap());
            }
        }
        xs
    }

    #[test]
    fn test_every_path_gets_every_element() {
        let mut out = BroadcastDownstreamManager::<i32>::new();
        let mut rx1 = add_path(&mut out, 1, 10);
        let mut rx2 = add_path(&mut out, 2, 10);
        out.downstream().append(1..=10);
        out.emit_batches();
        assert_eq!(received(&mut rx1), (1..=10).collect::<Vec<_>>());
        assert_eq!(received(&mut rx2), (1..=10).collect::<Vec<_>>());
        assert_eq!(out.buffered(), 0);
        assert!(out.stalled());
    }

    #[test]
    fn test_slowest_path_limits_chunk() {
        let mut out = BroadcastDownstreamManager::<i32>::new();
        let mut fast = add_path(&mut out, 1, 10);
        let mut slow = add_path(&mut out, 2, 5);
        out.downstream().append(1..=10);
        out.emit_batches();
        assert_eq!(received(&mut fast), vec![1, 2, 3, 4, 5]);
        assert_eq!(received(&mut slow), vec![1, 2, 3, 4, 5]);
        assert_eq!(out.buffered(), 5);
        assert_eq!(out.capacity(), 15);

        let ack = AckBatch {
            new_capacity: 5,
            max_capacity: 20,
            desired_batch_size: 5,
            acknowledged_id: 1,
        };
        if let Some(path) = out.path_mut(2) {
            path.handle_ack_batch(&ack);
        }
        out.emit_batches();
        assert_eq!(received(&mut fast), vec![6, 7, 8, 9, 10]);
        assert_eq!(received(&mut slow), vec![6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_filter_selects_per_path() {
        let select = SelectWith(|filter: &Option<bool>, x: &i32| match filter {
            Some(even) => (x % 2 == 0) == *even,
            None => true,
        });
        let mut out = BroadcastDownstreamManager::<i32, Option<bool>, _>::with_selector(select);
        let mut evens = add_path(&mut out, 1, 10);
        let mut odds = add_path(&mut out, 2, 10);
        assert!(out.set_filter(1, Some(true)));
        assert!(out.set_filter(2, Some(false)));
        assert!(!out.set_filter(3, None));
        assert!(out.all_filters(|f| f.is_some()));
        out.downstream().append(1..=6);
        out.force_emit_batches();
        assert_eq!(received(&mut evens), vec![2, 4, 6]);
        assert_eq!(received(&mut odds), vec![1, 3, 5]);
    }

    #[test]
    fn test_close_drains_before_removing() {
        let mut out = BroadcastDownstreamManager::<i32>::new();
        let mut rx = add_path(&mut out, 1, 10);
        out.downstream().append(1..=3);
        out.close();
        assert_eq!(out.num_paths(), 1);
        assert!(out.path(1).is_some_and(|p| p.closing()));
        out.emit_batches();
        assert_eq!(received(&mut rx), vec![1, 2, 3]);
        if let Some(path) = out.path_mut(1) {
            path.handle_ack_batch(&AckBatch {
                new_capacity: 3,
                max_capacity: 20,
                desired_batch_size: 5,
                acknowledged_id: 1,
            });
        }
        out.close_finished_paths();
        assert_eq!(out.num_paths(), 0);
    }

    #[test]
    fn test_capacity_without_paths_is_zero() {
        let out = BroadcastDownstreamManager::<i32>::new();
        assert_eq!(out.capacity(), 0);
        assert!(!out.stalled());
        assert!(out.clean());
    }
}
