use std::any::Any;

use log::{debug, info, trace, warn};

use crate::actors::actor_ref::{ActorId, ActorRef};
use crate::actors::messages::{ExitReason, Message};
use crate::config::StreamConfig;

use super::error::{StreamError, StreamResult};
use super::inbound_path::{InboundPath, InboundSpec};
use super::manager::StreamManager;
use super::slot_table::{ManagerHandle, ManagerTable};
use super::stream_message::{
    DownstreamContent, DownstreamMsg, ElementType, Handshake, OpenStreamMsg, Stream,
    StreamMessage, UpstreamContent, UpstreamMsg,
};
use super::stream_slot::{StreamId, StreamSlot, StreamSlots, INVALID_STREAM_SLOT};

/// Where an `open` came from. Kept around to answer it after the message was handed on.
#[derive(Debug, Clone)]
pub struct OpenOrigin {
    pub prev_stage: ActorRef,
    pub slot: StreamSlot,
    pub stream_id: StreamId,
    pub requester: Option<ActorRef>,
}

impl From<&OpenStreamMsg> for OpenOrigin {
    fn from(open: &OpenStreamMsg) -> Self {
        Self {
            prev_stage: open.prev_stage.clone(),
            slot: open.slot,
            stream_id: open.stream_id,
            requester: open.requester.clone(),
        }
    }
}

/// Stream state of one actor: its managers and the slots routing messages to them.
pub struct StreamHost {
    self_ref: ActorRef,
    config: StreamConfig,
    table: ManagerTable,
    next_stream_seq: u64,
    open_handled: bool,
}

impl StreamHost {
    pub fn new(self_ref: ActorRef, config: StreamConfig) -> Self {
        Self {
            self_ref,
            config,
            table: ManagerTable::new(),
            next_stream_seq: 0,
            open_handled: false,
        }
    }

    pub fn self_ref(&self) -> &ActorRef {
        &self.self_ref
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn insert_manager(&mut self, manager: Box<dyn StreamManager>) -> ManagerHandle {
        self.table.insert(manager)
    }

    pub fn manager(&self, handle: ManagerHandle) -> Option<&dyn StreamManager> {
        self.table.get(handle)
    }

    pub fn manager_mut(
        &mut self,
        handle: ManagerHandle,
    ) -> Option<&mut (dyn StreamManager + 'static)> {
        self.table.get_mut(handle).map(|m| &mut **m)
    }

    /// Concrete manager behind `handle`.
    pub fn manager_as<M: Any>(&mut self, handle: ManagerHandle) -> Option<&mut M> {
        self.manager_mut(handle)?.as_any_mut().downcast_mut::<M>()
    }

    /// Concrete downstream manager of the manager behind `handle`.
    pub fn downstream<M: Any>(&mut self, handle: ManagerHandle) -> Option<&mut M> {
        self.manager_mut(handle)?
            .out_mut()
            .as_any_mut()
            .downcast_mut::<M>()
    }

    pub fn lookup(&self, slot: StreamSlot) -> Option<ManagerHandle> {
        self.table.lookup(slot)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    fn next_stream_id(&mut self) -> StreamId {
        let id = StreamId::new(self.self_ref.id(), self.next_stream_seq);
        self.next_stream_seq += 1;
        id
    }

    /// Opens a new outbound path from the manager behind `handle` to `dest`.
    pub fn add_outbound_path(
        &mut self,
        handle: ManagerHandle,
        dest: &ActorRef,
        element_type: ElementType,
        handshake: Handshake,
    ) -> StreamResult<StreamSlot> {
        let slot = self.table.alloc_slot()?;
        let stream_id = self.next_stream_id();
        let manager = self.manager_mut(handle).ok_or(StreamError::UnknownStream)?;
        manager.add_outbound_path(slot, stream_id, dest, element_type, handshake)?;
        self.table.bind(slot, handle);
        Ok(slot)
    }

    /// Accepts `stream` as a new inbound path of the manager behind `handle`.
    pub fn add_inbound_path<T: Any + Send>(
        &mut self,
        handle: ManagerHandle,
        stream: &Stream<T>,
    ) -> StreamResult<StreamSlot> {
        let slot = self.table.alloc_slot()?;
        let spec = InboundSpec {
            slots: StreamSlots::new(stream.slot, slot),
            stream_id: stream.stream_id,
            hdl: stream.prev_stage.clone(),
            element_type: ElementType::of::<T>(),
            rebind_from: stream.rebind_from,
            priority: stream.priority,
            redeployable: stream.redeployable,
            requester: stream.requester.clone(),
        };
        let manager = self.manager_mut(handle).ok_or(StreamError::UnknownStream)?;
        manager.add_inbound_path(spec)?;
        self.table.bind(slot, handle);
        self.open_handled = true;
        Ok(slot)
    }

    /// Marks the start of `open` processing.
    pub fn begin_handshake(&mut self) {
        self.open_handled = false;
    }

    /// True if the current `open` got accepted or forwarded.
    pub fn handshake_accepted(&self) -> bool {
        self.open_handled
    }

    /// Passes an `open` on to another actor, which answers in our place.
    pub fn forward_open(&mut self, open: OpenStreamMsg, to: &ActorRef) -> bool {
        debug!(actor = self.self_ref.name(), slot = open.slot; "Forwarding stream {} to {}", open.stream_id, to.id());
        self.open_handled = true;
        let from = open.prev_stage.clone();
        to.send(Some(&from), Message::Stream(StreamMessage::Open(open)))
    }

    /// Refuses an `open`: the producer gets `forced_drop` and the requester the error.
    pub fn reject_open(&self, origin: &OpenOrigin, reason: StreamError) {
        info!(actor = self.self_ref.name(), slot = origin.slot; "Rejecting stream {}: {}", origin.stream_id, reason);
        InboundPath::emit_irregular_shutdown_to(
            &self.self_ref,
            &origin.prev_stage,
            StreamSlots::new(origin.slot, INVALID_STREAM_SLOT),
            origin.stream_id,
            reason.clone(),
        );
        if let Some(requester) = &origin.requester {
            requester.send(
                Some(&self.self_ref),
                Message::StreamResult {
                    stream_id: origin.stream_id,
                    result: Err(reason),
                },
            );
        }
    }

    pub fn handle_upstream(&mut self, msg: UpstreamMsg) {
        let slot = msg.slots.receiver;
        if let Some(manager) = self.table.lookup(slot).and_then(|h| self.manager_mut(h)) {
            manager.handle_upstream(msg);
            return;
        }
        debug!(actor = self.self_ref.name(), slot = slot; "{} for unknown slot", msg.content.name());
        if let UpstreamContent::AckOpen(_) = msg.content {
            let reply = DownstreamMsg {
                slots: msg.slots.invert(),
                stream_id: msg.stream_id,
                sender: self.self_ref.clone(),
                content: DownstreamContent::ForcedClose {
                    reason: StreamError::UnknownStream,
                },
            };
            msg.sender.send(
                Some(&self.self_ref),
                Message::Stream(StreamMessage::Downstream(reply)),
            );
        }
    }

    pub fn handle_downstream(&mut self, msg: DownstreamMsg) {
        let slot = msg.slots.receiver;
        if let Some(manager) = self.table.lookup(slot).and_then(|h| self.manager_mut(h)) {
            manager.handle_downstream(msg);
            return;
        }
        debug!(actor = self.self_ref.name(), slot = slot; "{} for unknown slot", msg.content.name());
        if let DownstreamContent::Batch(_) = msg.content {
            InboundPath::emit_irregular_shutdown_to(
                &self.self_ref,
                &msg.sender,
                msg.slots,
                msg.stream_id,
                StreamError::UnknownStream,
            );
        }
    }

    /// Forwards the termination of `actor` to every manager.
    pub fn handle_down(&mut self, actor: ActorId, reason: &ExitReason) {
        for handle in self.table.handles() {
            if let Some(manager) = self.manager_mut(handle) {
                manager.handle_peer_down(actor, reason);
            }
        }
    }

    pub fn tick(&mut self) {
        for handle in self.table.handles() {
            if let Some(manager) = self.manager_mut(handle) {
                manager.tick();
            }
        }
    }

    /// Stops managers that are done, drops every terminated manager and releases the slots of
    /// paths that are gone.
    pub fn cleanup(&mut self) {
        for handle in self.table.handles() {
            let terminated = match self.manager_mut(handle) {
                Some(manager) => {
                    if manager.done() {
                        manager.stop();
                    }
                    manager.terminated()
                }
                None => continue,
            };
            if terminated {
                if let Some(manager) = self.table.remove(handle) {
                    debug!(actor = self.self_ref.name(); "Removing {:?} stream manager", manager.status());
                }
            } else {
                self.release_slots(handle);
            }
        }
    }

    fn release_slots(&mut self, handle: ManagerHandle) {
        let Some(manager) = self.table.get(handle) else {
            return;
        };
        let stale: Vec<StreamSlot> = self
            .table
            .bound_slots(handle)
            .into_iter()
            .filter(|slot| !manager.owns_slot(*slot))
            .collect();
        for slot in stale {
            trace!(actor = self.self_ref.name(), slot = slot; "Releasing slot");
            self.table.unbind(slot);
        }
    }

    pub fn shutdown_all(&mut self) {
        for handle in self.table.handles() {
            if let Some(manager) = self.manager_mut(handle) {
                manager.shutdown();
            }
        }
    }

    pub fn abort_all(&mut self, reason: StreamError) {
        if !self.table.is_empty() {
            warn!(actor = self.self_ref.name(), managers = self.table.len(); "Aborting all streams: {}", reason);
        }
        for handle in self.table.handles() {
            if let Some(manager) = self.manager_mut(handle) {
                manager.abort(reason.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::messages::Envelope;
    use crate::streaming::broadcast::BroadcastDownstreamManager;
    use crate::streaming::driver::{sink_fn, source_fn, stage_fn};
    use crate::streaming::downstream_manager::Downstream;
    use crate::streaming::priority::StreamPriority;
    use crate::streaming::sink::SinkManager;
    use crate::streaming::source::SourceManager;
    use crate::streaming::stage::StageManager;
    use crate::streaming::stream_message::{AckOpen, Batch, Payload};
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn actor(id: u64, name: &str) -> (ActorRef, UnboundedReceiver<Envelope>) {
        let (tx, rx) = unbounded_channel();
        (ActorRef::new(ActorId(id), name, tx), rx)
    }

    fn next_message(rx: &mut UnboundedReceiver<Envelope>) -> Message {
        match rx.try_recv() {
            Ok(envelope) => envelope.message,
            Err(err) => panic!("no message: {:?}", err),
        }
    }

    fn host_with_source(me: &ActorRef) -> (StreamHost, ManagerHandle) {
        let driver = source_fn(
            |_: &mut i32| Ok(()),
            |n: &mut i32, out: &mut Downstream<'_, i32>, _hint: usize| {
                out.push(*n);
                *n += 1;
                Ok(())
            },
            |n: &i32| *n >= 3,
        )
        .unwrap();
        let mut host = StreamHost::new(me.clone(), StreamConfig::default());
        let manager = SourceManager::new(me.clone(), StreamConfig::default(), driver, BroadcastDownstreamManager::<i32>::new());
        let handle = host.insert_manager(Box::new(manager));
        (host, handle)
    }

    #[test]
    fn test_open_and_handshake_through_host() {
        let (me, _me_rx) = actor(1, "source");
        let (sink, mut sink_rx) = actor(2, "sink");
        let (mut host, handle) = host_with_source(&me);
        let slot = host
            .add_outbound_path(handle, &sink, ElementType::of::<i32>(), Handshake::new())
            .unwrap();
        assert_eq!(host.lookup(slot), Some(handle));
        let open = match next_message(&mut sink_rx) {
            Message::Stream(StreamMessage::Open(open)) => open,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(open.slot, slot);
        assert_eq!(open.stream_id, StreamId::new(ActorId(1), 0));
        assert!(open.stream::<String>().is_err());

        let (sink_self, _) = actor(2, "sink");
        let mut sink_host = StreamHost::new(sink_self.clone(), StreamConfig::default());
        let driver = sink_fn(|_: &mut i32| Ok(()), |sum: &mut i32, x: i32| *sum += x).unwrap();
        let sink_handle = sink_host.insert_manager(Box::new(SinkManager::new(sink_self, StreamConfig::default(), driver)));
        sink_host.begin_handshake();
        assert!(!sink_host.handshake_accepted());
        let in_slot = sink_host.add_inbound_path(sink_handle, &open.stream::<i32>().unwrap()).unwrap();
        assert!(sink_host.handshake_accepted());
        assert_eq!(sink_host.lookup(in_slot), Some(sink_handle));
    }

    #[test]
    fn test_reject_open_notifies_source_and_requester() {
        let (me, mut me_rx) = actor(1, "source");
        let (sink, mut sink_rx) = actor(2, "sink");
        let (requester, mut requester_rx) = actor(3, "requester");
        let (mut host, handle) = host_with_source(&me);
        let slot = host
            .add_outbound_path(handle, &sink, ElementType::of::<i32>(), Handshake::new().with_requester(requester))
            .unwrap();
        let open = match next_message(&mut sink_rx) {
            Message::Stream(StreamMessage::Open(open)) => open,
            other => panic!("unexpected {:?}", other),
        };
        let sink_host = StreamHost::new(sink.clone(), StreamConfig::default());
        sink_host.reject_open(&OpenOrigin::from(&open), StreamError::StreamInitFailed);

        match next_message(&mut requester_rx) {
            Message::StreamResult { result, .. } => assert_eq!(result, Err(StreamError::StreamInitFailed)),
            other => panic!("unexpected {:?}", other),
        }
        let msg = match next_message(&mut me_rx) {
            Message::Stream(StreamMessage::Upstream(msg)) => msg,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(msg.slots.receiver, slot);
        host.handle_upstream(msg);
        host.cleanup();
        assert!(host.is_empty());
        assert!(host.manager(handle).is_none());
    }

    #[test]
    fn test_unknown_slots_get_forced_replies() {
        let (me, _me_rx) = actor(1, "node");
        let (peer, mut peer_rx) = actor(2, "peer");
        let mut host = StreamHost::new(me, StreamConfig::default());
        host.handle_downstream(DownstreamMsg {
            slots: StreamSlots::new(4, 9),
            stream_id: StreamId::new(ActorId(2), 0),
            sender: peer.clone(),
            content: DownstreamContent::Batch(Batch {
                xs_size: 1,
                xs: Payload::new(vec![1]),
                id: 0,
            }),
        });
        match next_message(&mut peer_rx) {
            Message::Stream(StreamMessage::Upstream(UpstreamMsg {
                slots,
                content: UpstreamContent::ForcedDrop { reason },
                ..
            })) => {
                assert_eq!(slots, StreamSlots::new(9, 4));
                assert_eq!(reason, StreamError::UnknownStream);
            }
            other => panic!("unexpected {:?}", other),
        }

        host.handle_upstream(UpstreamMsg {
            slots: StreamSlots::new(5, 8),
            stream_id: StreamId::new(ActorId(1), 0),
            sender: peer,
            content: UpstreamContent::AckOpen(AckOpen {
                rebind_from: ActorId(2),
                initial_credit: 1,
                max_capacity: 1,
                desired_batch_size: 1,
                redeployable: false,
            }),
        });
        assert!(matches!(
            next_message(&mut peer_rx),
            Message::Stream(StreamMessage::Downstream(DownstreamMsg {
                content: DownstreamContent::ForcedClose { .. },
                ..
            }))
        ));
    }

    fn open_from(source: &ActorRef, dest: ActorId, slot: StreamSlot, seq: u64) -> OpenStreamMsg {
        OpenStreamMsg {
            slot,
            stream_id: StreamId::new(source.id(), seq),
            element_type: ElementType::of::<i32>(),
            handshake: None,
            prev_stage: source.clone(),
            original_stage: source.clone(),
            dest,
            priority: StreamPriority::Normal,
            redeployable: false,
            requester: None,
        }
    }

    #[test]
    fn test_closed_paths_release_their_slots() {
        let (me, _me_rx) = actor(1, "stage");
        let (source, mut source_rx) = actor(2, "source");
        let driver = stage_fn(|_: &mut ()| Ok(()), |_: &mut (), out: &mut Downstream<'_, i32>, x: i32| out.push(x)).unwrap();
        let mut manager = StageManager::new(me.clone(), StreamConfig::default(), driver, BroadcastDownstreamManager::<i32>::new());
        manager.set_continuous(true);
        let mut host = StreamHost::new(me, StreamConfig::default());
        let handle = host.insert_manager(Box::new(manager));

        // More cycles than there are slots: a leaked slot would exhaust the table.
        for seq in 0..70_000u64 {
            let open = open_from(&source, ActorId(1), 9, seq);
            let slot = host.add_inbound_path(handle, &open.stream::<i32>().unwrap()).unwrap();
            assert_eq!(host.lookup(slot), Some(handle));
            host.handle_downstream(DownstreamMsg {
                slots: StreamSlots::new(9, slot),
                stream_id: open.stream_id,
                sender: source.clone(),
                content: DownstreamContent::Close,
            });
            host.cleanup();
            assert!(host.lookup(slot).is_none());
            while source_rx.try_recv().is_ok() {}
        }
        let manager = host.manager(handle).unwrap();
        assert!(manager.inbound_paths().is_empty());
        assert!(!manager.done());
    }
}
