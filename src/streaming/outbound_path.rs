use std::any::Any;
use std::collections::VecDeque;

use log::{debug, trace};

use crate::actors::actor_ref::ActorRef;
use crate::actors::messages::Message;

use super::error::StreamError;
use super::path_state::PathState;
use super::priority::StreamPriority;
use super::stream_message::{
    AckBatch, AckOpen, Batch, DownstreamContent, DownstreamMsg, ElementType, Handshake,
    OpenStreamMsg, Payload, StreamMessage,
};
use super::stream_slot::{StreamId, StreamSlot, StreamSlots, INVALID_STREAM_SLOT};

/// Producer side of a path.
///
/// `open_credit` is the number of elements the consumer still allows us to send. Batches are
/// numbered from zero and the path is clean once the consumer acknowledged every batch sent.
#[derive(Debug)]
pub struct OutboundPath {
    /// `sender` is our slot, `receiver` the consumer's slot (unknown until `ack_open`).
    pub slots: StreamSlots,
    pub stream_id: StreamId,
    pub target: ActorRef,
    owner: ActorRef,
    pub priority: StreamPriority,
    pub redeployable: bool,
    pub open_credit: usize,
    pub desired_batch_size: usize,
    pub max_capacity: usize,
    pub next_batch_id: u64,
    pub next_ack_id: u64,
    acked: bool,
    closing: bool,
    terminal: Option<PathState>,
}

impl OutboundPath {
    pub fn new(slot: StreamSlot, stream_id: StreamId, target: ActorRef, owner: ActorRef) -> Self {
        Self {
            slots: StreamSlots::new(slot, INVALID_STREAM_SLOT),
            stream_id,
            target,
            owner,
            priority: StreamPriority::default(),
            redeployable: false,
            open_credit: 0,
            desired_batch_size: 1,
            max_capacity: 0,
            next_batch_id: 0,
            next_ack_id: 0,
            acked: false,
            closing: false,
            terminal: None,
        }
    }

    pub fn slot(&self) -> StreamSlot {
        self.slots.sender
    }

    pub fn state(&self) -> PathState {
        match self.terminal {
            Some(state) => state,
            None if self.closing => PathState::Closing,
            None if !self.acked => PathState::Pending,
            None => PathState::Open,
        }
    }

    pub fn pending(&self) -> bool {
        !self.acked
    }

    pub fn closing(&self) -> bool {
        self.closing
    }

    pub fn mark_closing(&mut self) {
        self.closing = true;
    }

    /// True once the handshake completed and every batch was acknowledged.
    pub fn clean(&self) -> bool {
        self.acked && self.next_batch_id == self.next_ack_id
    }

    /// Sends the `open` handshake to the target.
    pub fn emit_open(&mut self, element_type: ElementType, handshake: Handshake) -> bool {
        self.priority = handshake.priority;
        self.redeployable = handshake.redeployable;
        debug!(
            actor = self.owner.name(),
            slot = self.slot(),
            peer = self.target.name();
            "Opening stream {}", self.stream_id
        );
        let open = OpenStreamMsg {
            slot: self.slot(),
            stream_id: self.stream_id,
            element_type,
            handshake: handshake.payload,
            prev_stage: self.owner.clone(),
            original_stage: self.owner.clone(),
            dest: self.target.id(),
            priority: handshake.priority,
            redeployable: handshake.redeployable,
            requester: handshake.requester,
        };
        self.target
            .send(Some(&self.owner), Message::Stream(StreamMessage::Open(open)))
    }

    /// Settles the handshake. The consumer that acknowledged becomes the new target.
    pub fn handle_ack_open(&mut self, ack: &AckOpen, sender: &ActorRef, receiver_slot: StreamSlot) {
        if ack.rebind_from != self.target.id() {
            debug!(
                actor = self.owner.name(),
                slot = self.slot();
                "Path rebinds from {} to {}", ack.rebind_from, sender.id()
            );
        }
        self.target = sender.clone();
        self.slots.receiver = receiver_slot;
        self.open_credit = ack.initial_credit;
        self.max_capacity = ack.max_capacity;
        self.desired_batch_size = ack.desired_batch_size.max(1);
        self.redeployable = ack.redeployable;
        self.acked = true;
    }

    pub fn handle_ack_batch(&mut self, ack: &AckBatch) {
        self.open_credit += ack.new_capacity;
        self.max_capacity = ack.max_capacity;
        self.desired_batch_size = ack.desired_batch_size.max(1);
        if ack.acknowledged_id > self.next_ack_id {
            self.next_ack_id = ack.acknowledged_id.min(self.next_batch_id);
        }
    }

    /// Ships `xs` as one batch. The caller makes sure `xs` fits into the open credit.
    pub fn emit_batch<T: Any + Send>(&mut self, xs: Vec<T>) {
        let xs_size = xs.len();
        debug_assert!(xs_size <= self.open_credit);
        self.open_credit -= xs_size.min(self.open_credit);
        let id = self.next_batch_id;
        self.next_batch_id += 1;
        trace!(
            actor = self.owner.name(),
            slot = self.slot(),
            size = xs_size;
            "Emitting batch {}", id
        );
        let batch = Batch {
            xs_size,
            xs: Payload::new(xs),
            id,
        };
        self.send_downstream(DownstreamContent::Batch(batch));
    }

    /// Ships as many batches from `cache` as the open credit allows.
    ///
    /// Only full batches go out unless `force_underfull` is set. Returns the number of elements
    /// sent.
    pub fn emit_batches<T: Any + Send>(
        &mut self,
        cache: &mut VecDeque<T>,
        force_underfull: bool,
    ) -> usize {
        if self.pending() || self.terminal.is_some() {
            return 0;
        }
        let batch_size = self.desired_batch_size.max(1);
        let mut sent = 0;
        while self.open_credit >= batch_size && cache.len() >= batch_size {
            let xs: Vec<T> = cache.drain(..batch_size).collect();
            sent += xs.len();
            self.emit_batch(xs);
        }
        if force_underfull {
            while self.open_credit > 0 && !cache.is_empty() {
                let n = self.open_credit.min(cache.len()).min(batch_size);
                let xs: Vec<T> = cache.drain(..n).collect();
                sent += n;
                self.emit_batch(xs);
            }
        }
        sent
    }

    /// Sends `close` to the consumer.
    pub fn emit_regular_shutdown(&mut self) {
        debug!(actor = self.owner.name(), slot = self.slot(); "Closing path");
        self.terminal = Some(PathState::Closed);
        self.send_downstream(DownstreamContent::Close);
    }

    /// Sends `forced_close` to the consumer.
    pub fn emit_irregular_shutdown(&mut self, reason: &StreamError) {
        debug!(actor = self.owner.name(), slot = self.slot(); "Aborting path: {}", reason);
        self.terminal = Some(PathState::Aborted);
        self.send_downstream(DownstreamContent::ForcedClose {
            reason: reason.clone(),
        });
    }

    fn send_downstream(&self, content: DownstreamContent) {
        let msg = DownstreamMsg {
            slots: self.slots,
            stream_id: self.stream_id,
            sender: self.owner.clone(),
            content,
        };
        self.target
            .send(Some(&self.owner), Message::Stream(StreamMessage::Downstream(msg)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::actor_ref::ActorId;
    use crate::actors::messages::Envelope;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn actor(id: u64, name: &str) -> (ActorRef, UnboundedReceiver<Envelope>) {
        let (tx, rx) = unbounded_channel();
        (ActorRef::new(ActorId(id), name, tx), rx)
    }

    fn open_path(credit: usize, batch_size: usize) -> (OutboundPath, UnboundedReceiver<Envelope>) {
        let (owner, _owner_rx) = actor(1, "source");
        let (target, target_rx) = actor(2, "sink");
        let mut path = OutboundPath::new(1, StreamId::new(ActorId(1), 0), target.clone(), owner);
        path.handle_ack_open(
            &AckOpen {
                rebind_from: target.id(),
                initial_credit: credit,
                max_capacity: 50,
                desired_batch_size: batch_size,
                redeployable: false,
            },
            &target,
            7,
        );
        (path, target_rx)
    }

    fn batch_sizes(rx: &mut UnboundedReceiver<Envelope>) -> Vec<usize> {
        let mut sizes = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            if let Message::Stream(StreamMessage::Downstream(DownstreamMsg {
                content: DownstreamContent::Batch(batch),
                ..
            })) = envelope.message
            {
                sizes.push(batch.xs_size);
            }
        }
        sizes
    }

    #[test]
    fn test_new_path_is_pending_and_not_clean() {
        let (owner, _rx1) = actor(1, "source");
        let (target, _rx2) = actor(2, "sink");
        let path = OutboundPath::new(3, StreamId::new(ActorId(1), 0), target, owner);
        assert_eq!(path.state(), PathState::Pending);
        assert!(!path.clean());
    }

    #[test]
    fn test_ack_open_sets_receiver_slot_and_credit() {
        let (path, _rx) = open_path(10, 5);
        assert_eq!(path.state(), PathState::Open);
        assert_eq!(path.slots, StreamSlots::new(1, 7));
        assert_eq!(path.open_credit, 10);
        assert!(path.clean());
    }

    #[test]
    fn test_emit_batches_respects_credit() {
        let (mut path, mut rx) = open_path(12, 5);
        let mut cache: VecDeque<i32> = (0..20).collect();
        let sent = path.emit_batches(&mut cache, false);
        assert_eq!(sent, 10);
        assert_eq!(path.open_credit, 2);
        assert_eq!(cache.len(), 10);
        assert_eq!(batch_sizes(&mut rx), vec![5, 5]);

        let sent = path.emit_batches(&mut cache, true);
        assert_eq!(sent, 2);
        assert_eq!(path.open_credit, 0);
        assert_eq!(batch_sizes(&mut rx), vec![2]);
        assert!(!path.clean());
    }

    #[test]
    fn test_underfull_batch_waits_without_force() {
        let (mut path, mut rx) = open_path(10, 5);
        let mut cache: VecDeque<i32> = (0..3).collect();
        assert_eq!(path.emit_batches(&mut cache, false), 0);
        assert!(batch_sizes(&mut rx).is_empty());
        assert_eq!(path.emit_batches(&mut cache, true), 3);
    }

    #[test]
    fn test_ack_batch_restores_credit_and_cleanliness() {
        let (mut path, _rx) = open_path(5, 5);
        let mut cache: VecDeque<i32> = (0..5).collect();
        path.emit_batches(&mut cache, false);
        assert_eq!(path.next_batch_id, 1);
        assert!(!path.clean());
        path.handle_ack_batch(&AckBatch {
            new_capacity: 5,
            max_capacity: 50,
            desired_batch_size: 5,
            acknowledged_id: 1,
        });
        assert!(path.clean());
        assert_eq!(path.open_credit, 5);
    }

    #[test]
    fn test_close_and_abort_are_terminal() {
        let (mut path, _rx) = open_path(5, 5);
        path.mark_closing();
        assert_eq!(path.state(), PathState::Closing);
        path.emit_regular_shutdown();
        assert_eq!(path.state(), PathState::Closed);

        let (mut path, _rx) = open_path(5, 5);
        path.emit_irregular_shutdown(&StreamError::StreamInitFailed);
        assert_eq!(path.state(), PathState::Aborted);
        let mut cache: VecDeque<i32> = (0..5).collect();
        assert_eq!(path.emit_batches(&mut cache, true), 0);
    }
}
