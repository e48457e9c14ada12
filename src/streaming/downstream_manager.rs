use std::any::Any;
use std::collections::VecDeque;

use log::debug;

use super::error::StreamError;
use super::outbound_path::OutboundPath;
use super::stream_message::{ElementType, Payload};
use super::stream_slot::StreamSlot;

/// Owns the outbound paths of one stream manager and decides what each of them receives.
///
/// Implementations keep elements in a central buffer until the paths have credit for them.
pub trait DownstreamManager: Any + Send {
    /// Element type of the outbound paths, if there is exactly one.
    fn element_type(&self) -> Option<ElementType>;

    fn num_paths(&self) -> usize;

    fn path_slots(&self) -> Vec<StreamSlot>;

    fn path(&self, slot: StreamSlot) -> Option<&OutboundPath>;

    fn path_mut(&mut self, slot: StreamSlot) -> Option<&mut OutboundPath>;

    fn for_each_path(&self, f: &mut dyn FnMut(&OutboundPath));

    fn for_each_path_mut(&mut self, f: &mut dyn FnMut(&mut OutboundPath));

    /// Adds a path. Fails if the slot is taken.
    fn insert_path(&mut self, path: OutboundPath) -> bool;

    /// Removes a path together with any per-path state, without notifying the peer.
    fn take_path(&mut self, slot: StreamSlot) -> Option<OutboundPath>;

    fn emit_batches_impl(&mut self, force_underfull: bool);

    /// Elements waiting to be shipped, counting the worst case over all paths.
    fn buffered(&self) -> usize;

    fn buffered_slot(&self, slot: StreamSlot) -> usize;

    /// How many more elements the manager is willing to buffer.
    fn capacity(&self) -> usize;

    /// Appends a type-erased `Vec` of elements. Hands the payload back on a type mismatch.
    fn push_erased(&mut self, xs: Payload) -> Result<usize, Payload>;

    /// Moves centrally buffered elements into the per-path caches.
    fn fan_out_flush(&mut self) {}

    /// Drops every buffered element.
    fn clear_buffers(&mut self);

    /// Called after a new path was added for streams of `element_type`.
    fn route_path(&mut self, _slot: StreamSlot, _element_type: &ElementType) {}

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// True for managers that never have outbound paths.
    fn terminal(&self) -> bool {
        false
    }

    fn all_paths(&self, pred: &dyn Fn(&OutboundPath) -> bool) -> bool {
        let mut result = true;
        self.for_each_path(&mut |p| result = result && pred(p));
        result
    }

    fn any_path(&self, pred: &dyn Fn(&OutboundPath) -> bool) -> bool {
        let mut result = false;
        self.for_each_path(&mut |p| result = result || pred(p));
        result
    }

    fn no_path(&self, pred: &dyn Fn(&OutboundPath) -> bool) -> bool {
        !self.any_path(pred)
    }

    /// Removes a path. Unless `silent`, the peer receives `close` or, given a reason,
    /// `forced_close`.
    fn remove_path(&mut self, slot: StreamSlot, reason: Option<&StreamError>, silent: bool) -> bool {
        match self.take_path(slot) {
            Some(mut path) => {
                if !silent {
                    match reason {
                        Some(reason) => path.emit_irregular_shutdown(reason),
                        None => path.emit_regular_shutdown(),
                    }
                }
                true
            }
            None => false,
        }
    }

    /// No buffered data and every batch acknowledged.
    fn clean(&self) -> bool {
        self.buffered() == 0 && self.all_paths(&|p| p.clean())
    }

    fn clean_slot(&self, slot: StreamSlot) -> bool {
        self.buffered_slot(slot) == 0 && self.path(slot).is_some_and(|p| p.clean())
    }

    /// No path has open credit. Always false without paths.
    fn stalled(&self) -> bool {
        self.num_paths() > 0 && self.all_paths(&|p| p.open_credit == 0)
    }

    /// Starts a graceful close of every path. Paths that still have data become closing.
    fn close(&mut self) {
        self.fan_out_flush();
        for slot in self.path_slots() {
            self.close_slot(slot);
        }
    }

    fn close_slot(&mut self, slot: StreamSlot) {
        if self.clean_slot(slot) {
            self.remove_path(slot, None, false);
        } else if let Some(path) = self.path_mut(slot) {
            path.mark_closing();
        }
    }

    /// Removes closing paths that drained completely, sending `close` to their peers.
    fn close_finished_paths(&mut self) {
        for slot in self.path_slots() {
            let finished = self.path(slot).is_some_and(|p| p.closing()) && self.clean_slot(slot);
            if finished {
                self.remove_path(slot, None, false);
            }
        }
    }

    /// Sends `forced_close` on every path and drops all buffered data.
    fn abort(&mut self, reason: &StreamError) {
        debug!(paths = self.num_paths(); "Aborting downstream: {}", reason);
        for slot in self.path_slots() {
            self.remove_path(slot, Some(reason), false);
        }
        self.clear_buffers();
    }

    fn emit_batches(&mut self) {
        self.emit_batches_impl(false);
    }

    fn force_emit_batches(&mut self) {
        self.emit_batches_impl(true);
    }

    fn min_credit(&self) -> usize {
        let mut result: Option<usize> = None;
        self.for_each_path(&mut |p| {
            result = Some(result.map_or(p.open_credit, |r| r.min(p.open_credit)))
        });
        result.unwrap_or(0)
    }

    fn max_credit(&self) -> usize {
        let mut result = 0;
        self.for_each_path(&mut |p| result = result.max(p.open_credit));
        result
    }

    fn total_credit(&self) -> usize {
        let mut result = 0;
        self.for_each_path(&mut |p| result += p.open_credit);
        result
    }
}

/// Handle user code pushes produced elements through.
pub struct Downstream<'a, T> {
    buf: &'a mut VecDeque<T>,
}

impl<'a, T> Downstream<'a, T> {
    pub fn new(buf: &'a mut VecDeque<T>) -> Self {
        Self { buf }
    }

    pub fn push(&mut self, x: T) {
        self.buf.push_back(x);
    }

    pub fn append(&mut self, xs: impl IntoIterator<Item = T>) {
        self.buf.extend(xs);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// A downstream manager with a central buffer of `T`.
pub trait BufferedDownstreamManager<T>: DownstreamManager {
    fn buf(&mut self) -> &mut VecDeque<T>;

    fn push(&mut self, x: T) {
        self.buf().push_back(x);
    }

    fn downstream(&mut self) -> Downstream<'_, T> {
        Downstream::new(self.buf())
    }
}

/// Downstream of a sink: no paths and unbounded capacity.
#[derive(Debug, Default)]
pub struct TerminalDownstream;

impl DownstreamManager for TerminalDownstream {
    fn element_type(&self) -> Option<ElementType> {
        None
    }

    fn num_paths(&self) -> usize {
        0
    }

    fn path_slots(&self) -> Vec<StreamSlot> {
        Vec::new()
    }

    fn path(&self, _slot: StreamSlot) -> Option<&OutboundPath> {
        None
    }

    fn path_mut(&mut self, _slot: StreamSlot) -> Option<&mut OutboundPath> {
        None
    }

    fn for_each_path(&self, _f: &mut dyn FnMut(&OutboundPath)) {}

    fn for_each_path_mut(&mut self, _f: &mut dyn FnMut(&mut OutboundPath)) {}

    fn insert_path(&mut self, _path: OutboundPath) -> bool {
        false
    }

    fn take_path(&mut self, _slot: StreamSlot) -> Option<OutboundPath> {
        None
    }

    fn emit_batches_impl(&mut self, _force_underfull: bool) {}

    fn buffered(&self) -> usize {
        0
    }

    fn buffered_slot(&self, _slot: StreamSlot) -> usize {
        0
    }

    fn capacity(&self) -> usize {
        usize::MAX
    }

    fn push_erased(&mut self, xs: Payload) -> Result<usize, Payload> {
        Err(xs)
    }

    fn clear_buffers(&mut self) {}

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn terminal(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_downstream() {
        let mut out = TerminalDownstream;
        assert!(out.terminal());
        assert!(out.clean());
        assert!(!out.stalled());
        assert_eq!(out.capacity(), usize::MAX);
        assert!(out.push_erased(Payload::new(vec![1])).is_err());
        out.close();
        assert_eq!(out.num_paths(), 0);
    }

    #[test]
    fn test_downstream_handle_appends() {
        let mut buf = VecDeque::new();
        let mut out = Downstream::new(&mut buf);
        out.push(1);
        out.append([2, 3]);
        assert_eq!(out.len(), 3);
        assert_eq!(buf, VecDeque::from(vec![1, 2, 3]));
    }
}
