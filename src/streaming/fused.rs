use std::any::Any;
use std::collections::{BTreeMap, HashMap};

use log::{debug, warn};

use super::broadcast::BroadcastDownstreamManager;
use super::downstream_manager::DownstreamManager;
use super::outbound_path::OutboundPath;
use super::stream_message::{ElementType, Payload};
use super::stream_slot::StreamSlot;

/// Multiplexes several independently typed downstream managers over one set of paths.
///
/// Every path belongs to exactly one nested manager. New paths start out unassigned and get
/// routed to the nested manager for their element type, or explicitly via [`assign`].
///
/// [`assign`]: FusedDownstreamManager::assign
#[derive(Default)]
pub struct FusedDownstreamManager {
    nested: Vec<Box<dyn DownstreamManager>>,
    owners: HashMap<StreamSlot, usize>,
    unassigned: BTreeMap<StreamSlot, OutboundPath>,
}

impl FusedDownstreamManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a broadcast manager for elements of type `T`.
    pub fn with<T: Clone + Send + 'static>(self) -> Self {
        self.with_manager(BroadcastDownstreamManager::<T>::new())
    }

    pub fn with_manager<M: DownstreamManager>(mut self, manager: M) -> Self {
        self.nested.push(Box::new(manager));
        self
    }

    pub fn num_managers(&self) -> usize {
        self.nested.len()
    }

    pub fn get<M: DownstreamManager>(&self) -> Option<&M> {
        self.nested
            .iter()
            .find_map(|m| m.as_any().downcast_ref::<M>())
    }

    pub fn get_mut<M: DownstreamManager>(&mut self) -> Option<&mut M> {
        self.nested
            .iter_mut()
            .find_map(|m| m.as_any_mut().downcast_mut::<M>())
    }

    /// Moves an unassigned path into the nested manager of type `M`.
    pub fn assign<M: DownstreamManager>(&mut self, slot: StreamSlot) -> bool {
        let index = self.nested.iter().position(|m| m.as_any().is::<M>());
        match index {
            Some(index) => self.assign_to(slot, index),
            None => false,
        }
    }

    /// Element types of the nested managers.
    pub fn element_types(&self) -> Vec<ElementType> {
        self.nested.iter().filter_map(|m| m.element_type()).collect()
    }

    pub fn unassigned_slots(&self) -> Vec<StreamSlot> {
        self.unassigned.keys().copied().collect()
    }

    fn assign_to(&mut self, slot: StreamSlot, index: usize) -> bool {
        let Some(path) = self.unassigned.remove(&slot) else {
            return false;
        };
        let Some(manager) = self.nested.get_mut(index) else {
            self.unassigned.insert(slot, path);
            return false;
        };
        if manager.path(slot).is_some() {
            warn!(slot = slot; "Nested manager refused path");
            self.unassigned.insert(slot, path);
            return false;
        }
        if !manager.insert_path(path) {
            warn!(slot = slot; "Nested manager refused path");
            return false;
        }
        self.owners.insert(slot, index);
        true
    }

    fn owner(&self, slot: StreamSlot) -> Option<&dyn DownstreamManager> {
        self.owners
            .get(&slot)
            .and_then(|i| self.nested.get(*i))
            .map(|m| m.as_ref())
    }
}

impl DownstreamManager for FusedDownstreamManager {
    fn element_type(&self) -> Option<ElementType> {
        None
    }

    fn num_paths(&self) -> usize {
        self.unassigned.len() + self.nested.iter().map(|m| m.num_paths()).sum::<usize>()
    }

    fn path_slots(&self) -> Vec<StreamSlot> {
        let mut slots: Vec<StreamSlot> = self.unassigned.keys().copied().collect();
        for manager in &self.nested {
            slots.extend(manager.path_slots());
        }
        slots.sort_unstable();
        slots
    }

    fn path(&self, slot: StreamSlot) -> Option<&OutboundPath> {
        match self.owner(slot) {
            Some(manager) => manager.path(slot),
            None => self.unassigned.get(&slot),
        }
    }

    fn path_mut(&mut self, slot: StreamSlot) -> Option<&mut OutboundPath> {
        match self.owners.get(&slot) {
            Some(&index) => self.nested.get_mut(index).and_then(|m| m.path_mut(slot)),
            None => self.unassigned.get_mut(&slot),
        }
    }

    fn for_each_path(&self, f: &mut dyn FnMut(&OutboundPath)) {
        self.unassigned.values().for_each(&mut *f);
        for manager in &self.nested {
            manager.for_each_path(f);
        }
    }

    fn for_each_path_mut(&mut self, f: &mut dyn FnMut(&mut OutboundPath)) {
        self.unassigned.values_mut().for_each(&mut *f);
        for manager in &mut self.nested {
            manager.for_each_path_mut(f);
        }
    }

    fn insert_path(&mut self, path: OutboundPath) -> bool {
        let slot = path.slot();
        if self.owners.contains_key(&slot) || self.unassigned.contains_key(&slot) {
            return false;
        }
        self.unassigned.insert(slot, path);
        true
    }

    fn take_path(&mut self, slot: StreamSlot) -> Option<OutboundPath> {
        match self.owners.remove(&slot) {
            Some(index) => self.nested.get_mut(index).and_then(|m| m.take_path(slot)),
            None => self.unassigned.remove(&slot),
        }
    }

    fn emit_batches_impl(&mut self, force_underfull: bool) {
        for manager in &mut self.nested {
            manager.emit_batches_impl(force_underfull);
        }
    }

    fn buffered(&self) -> usize {
        self.nested.iter().map(|m| m.buffered()).sum()
    }

    fn buffered_slot(&self, slot: StreamSlot) -> usize {
        self.owner(slot).map_or(0, |m| m.buffered_slot(slot))
    }

    /// The smallest capacity of all nested managers that have paths.
    fn capacity(&self) -> usize {
        self.nested
            .iter()
            .filter(|m| m.num_paths() > 0)
            .map(|m| m.capacity())
            .min()
            .unwrap_or(0)
    }

    /// Dispatches the batch to the nested manager for its runtime element type.
    fn push_erased(&mut self, xs: Payload) -> Result<usize, Payload> {
        let index = self
            .nested
            .iter()
            .position(|m| m.element_type().is_some_and(|t| t.matches(&xs)));
        match index {
            Some(index) => self.nested[index].push_erased(xs),
            None => Err(xs),
        }
    }

    fn fan_out_flush(&mut self) {
        for manager in &mut self.nested {
            manager.fan_out_flush();
        }
    }

    fn clear_buffers(&mut self) {
        for manager in &mut self.nested {
            manager.clear_buffers();
        }
    }

    fn route_path(&mut self, slot: StreamSlot, element_type: &ElementType) {
        let index = self
            .nested
            .iter()
            .position(|m| m.element_type().as_ref() == Some(element_type));
        match index {
            Some(index) => {
                self.assign_to(slot, index);
            }
            None => debug!(slot = slot; "No nested manager for {}", element_type.name()),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::actor_ref::{ActorId, ActorRef};
    use crate::actors::messages::{Envelope, Message};
    use crate::streaming::downstream_manager::BufferedDownstreamManager;
    use crate::streaming::stream_message::{AckOpen, DownstreamContent, DownstreamMsg, StreamMessage};
    use crate::streaming::stream_slot::StreamId;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn path(slot: StreamSlot) -> (OutboundPath, UnboundedReceiver<Envelope>) {
        let (owner_tx, _owner_rx) = unbounded_channel();
        let (tx, rx) = unbounded_channel();
        let owner = ActorRef::new(ActorId(1), "mux", owner_tx);
        let target = ActorRef::new(ActorId(100 + slot as u64), "sink", tx);
        let mut path = OutboundPath::new(slot, StreamId::new(ActorId(1), slot as u64), target.clone(), owner);
        path.handle_ack_open(
            &AckOpen {
                rebind_from: target.id(),
                initial_credit: 10,
                max_capacity: 10,
                desired_batch_size: 10,
                redeployable: false,
            },
            &target,
            1,
        );
        (path, rx)
    }

    fn batch_types(rx: &mut UnboundedReceiver<Envelope>) -> Vec<&'static str> {
        let mut names = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            if let Message::Stream(StreamMessage::Downstream(DownstreamMsg {
                content: DownstreamContent::Batch(batch),
                ..
            })) = envelope.message
            {
                names.push(batch.xs.type_name());
            }
        }
        names
    }

    #[test]
    fn test_routes_paths_by_element_type() {
        let mut out = FusedDownstreamManager::new().with::<i32>().with::<String>();
        let (int_path, mut int_rx) = path(1);
        let (str_path, mut str_rx) = path(2);
        assert!(out.insert_path(int_path));
        assert!(out.insert_path(str_path));
        assert_eq!(out.unassigned_slots(), vec![1, 2]);
        out.route_path(1, &ElementType::of::<i32>());
        assert!(out.assign::<BroadcastDownstreamManager<String>>(2));
        assert!(out.unassigned_slots().is_empty());
        assert_eq!(out.num_paths(), 2);

        assert_eq!(out.push_erased(Payload::new(vec![1i32, 2, 3])).ok(), Some(3));
        assert_eq!(out.push_erased(Payload::new(vec!["a".to_string()])).ok(), Some(1));
        assert!(out.push_erased(Payload::new(vec![1.5f64])).is_err());
        out.force_emit_batches();
        assert_eq!(batch_types(&mut int_rx), vec![std::any::type_name::<Vec<i32>>()]);
        assert_eq!(batch_types(&mut str_rx), vec![std::any::type_name::<Vec<String>>()]);
    }

    #[test]
    fn test_nested_access_and_removal() {
        let mut out = FusedDownstreamManager::new().with::<i32>();
        let (p, _rx) = path(4);
        assert!(out.insert_path(p));
        assert!(out.assign::<BroadcastDownstreamManager<i32>>(4));
        if let Some(ints) = out.get_mut::<BroadcastDownstreamManager<i32>>() {
            ints.push(7);
        }
        assert_eq!(out.buffered(), 1);
        assert_eq!(out.capacity(), 9);
        assert!(out.path(4).is_some());
        assert!(out.take_path(4).is_some());
        assert_eq!(out.num_paths(), 0);
        assert_eq!(out.capacity(), 0);
        assert!(out.get::<BroadcastDownstreamManager<String>>().is_none());
    }

    #[test]
    fn test_refused_assignment_keeps_path_unassigned() {
        let mut out = FusedDownstreamManager::new().with::<i32>();
        let (taken, _taken_rx) = path(5);
        if let Some(ints) = out.get_mut::<BroadcastDownstreamManager<i32>>() {
            assert!(ints.insert_path(taken));
        }
        let (p, _rx) = path(5);
        assert!(out.insert_path(p));
        assert!(!out.assign::<BroadcastDownstreamManager<i32>>(5));
        assert_eq!(out.unassigned_slots(), vec![5]);
        assert!(out.path(5).is_some());
    }
}
