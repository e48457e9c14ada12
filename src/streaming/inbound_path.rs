use log::{debug, trace, warn};

use crate::actors::actor_ref::{ActorId, ActorRef};
use crate::actors::messages::Message;

use super::error::{StreamError, StreamResult};
use super::path_state::PathState;
use super::priority::StreamPriority;
use super::stream_message::{
    AckBatch, AckOpen, Batch, ElementType, StreamMessage, UpstreamContent, UpstreamMsg,
};
use super::stream_slot::{StreamId, StreamSlot, StreamSlots};

/// Consumer side of a path.
///
/// `assigned_credit` is what the producer may still send us. It never exceeds `max_credit`.
#[derive(Debug)]
pub struct InboundPath {
    /// `sender` is the producer's slot, `receiver` ours.
    pub slots: StreamSlots,
    pub stream_id: StreamId,
    pub hdl: ActorRef,
    owner: ActorRef,
    pub element_type: ElementType,
    pub priority: StreamPriority,
    pub redeployable: bool,
    pub assigned_credit: usize,
    pub max_credit: usize,
    pub desired_batch_size: usize,
    /// Id the next batch is expected to carry.
    pub next_batch_id: u64,
    /// Batches below this id were acknowledged to the producer.
    pub acked_batch_id: u64,
    state: PathState,
}

/// Everything needed to create an inbound path from an accepted `open`.
#[derive(Debug, Clone)]
pub struct InboundSpec {
    pub slots: StreamSlots,
    pub stream_id: StreamId,
    pub hdl: ActorRef,
    pub element_type: ElementType,
    pub rebind_from: ActorId,
    pub priority: StreamPriority,
    pub redeployable: bool,
    pub requester: Option<ActorRef>,
}

impl InboundPath {
    pub fn new(
        spec: &InboundSpec,
        owner: ActorRef,
        max_credit: usize,
        desired_batch_size: usize,
    ) -> Self {
        Self {
            slots: spec.slots,
            stream_id: spec.stream_id,
            hdl: spec.hdl.clone(),
            owner,
            element_type: spec.element_type,
            priority: spec.priority,
            redeployable: spec.redeployable,
            assigned_credit: 0,
            max_credit: spec.priority.scale(max_credit),
            desired_batch_size: desired_batch_size.max(1),
            next_batch_id: 0,
            acked_batch_id: 0,
            state: PathState::Pending,
        }
    }

    pub fn slot(&self) -> StreamSlot {
        self.slots.receiver
    }

    pub fn state(&self) -> PathState {
        self.state
    }

    /// True when every received batch was acknowledged.
    pub fn up_to_date(&self) -> bool {
        self.acked_batch_id == self.next_batch_id
    }

    /// Books an incoming batch against the assigned credit.
    ///
    /// A batch exceeding the credit or naming a different stream is rejected. Its id is recorded
    /// either way so acknowledgements stay in sync with the producer.
    pub fn handle_batch(&mut self, stream_id: StreamId, batch: &Batch) -> StreamResult<()> {
        if batch.id != self.next_batch_id {
            warn!(
                actor = self.owner.name(),
                slot = self.slot();
                "Expected batch {} but received batch {}", self.next_batch_id, batch.id
            );
        }
        self.next_batch_id = self.next_batch_id.max(batch.id + 1);
        if stream_id != self.stream_id {
            return Err(StreamError::InvalidStreamState {
                reason: format!("batch for stream {} on path of stream {}", stream_id, self.stream_id),
            });
        }
        if batch.xs_size > self.assigned_credit {
            let reason = format!(
                "batch of {} elements exceeds assigned credit {}",
                batch.xs_size, self.assigned_credit
            );
            self.assigned_credit = 0;
            return Err(StreamError::InvalidStreamState { reason });
        }
        self.assigned_credit -= batch.xs_size;
        trace!(
            actor = self.owner.name(),
            slot = self.slot(),
            size = batch.xs_size;
            "Received batch {}", batch.id
        );
        Ok(())
    }

    /// Completes the handshake, granting `initial_credit` to the producer.
    pub fn emit_ack_open(&mut self, rebind_from: ActorId, initial_credit: usize) {
        debug!(
            actor = self.owner.name(),
            slot = self.slot(),
            credit = initial_credit;
            "Acknowledging stream {}", self.stream_id
        );
        self.assigned_credit = initial_credit;
        self.state = PathState::Open;
        let ack = AckOpen {
            rebind_from,
            initial_credit,
            max_capacity: self.max_credit,
            desired_batch_size: self.desired_batch_size,
            redeployable: self.redeployable,
        };
        self.send_upstream(UpstreamContent::AckOpen(ack));
    }

    /// Grants `new_credit` additional credit and acknowledges every batch received so far.
    pub fn emit_ack_batch(&mut self, new_credit: usize) {
        self.assigned_credit += new_credit;
        self.acked_batch_id = self.next_batch_id;
        trace!(
            actor = self.owner.name(),
            slot = self.slot(),
            credit = new_credit;
            "Acknowledging batches up to {}", self.acked_batch_id
        );
        let ack = AckBatch {
            new_capacity: new_credit,
            max_capacity: self.max_credit,
            desired_batch_size: self.desired_batch_size,
            acknowledged_id: self.acked_batch_id,
        };
        self.send_upstream(UpstreamContent::AckBatch(ack));
    }

    pub fn mark_closed(&mut self) {
        self.state = PathState::Closed;
    }

    pub fn mark_aborted(&mut self) {
        self.state = PathState::Aborted;
    }

    /// Sends `drop` to the producer.
    pub fn emit_regular_shutdown(&mut self) {
        debug!(actor = self.owner.name(), slot = self.slot(); "Dropping path");
        self.state = PathState::Closed;
        self.send_upstream(UpstreamContent::Drop);
    }

    /// Sends `forced_drop` to the producer.
    pub fn emit_irregular_shutdown(&mut self, reason: &StreamError) {
        debug!(actor = self.owner.name(), slot = self.slot(); "Aborting path: {}", reason);
        self.state = PathState::Aborted;
        self.send_upstream(UpstreamContent::ForcedDrop {
            reason: reason.clone(),
        });
    }

    /// Sends `forced_drop` for a path that never got created on this actor.
    ///
    /// `slots` are given from the producer's point of view, as found in the rejected message.
    pub fn emit_irregular_shutdown_to(
        owner: &ActorRef,
        producer: &ActorRef,
        slots: StreamSlots,
        stream_id: StreamId,
        reason: StreamError,
    ) {
        let msg = UpstreamMsg {
            slots: slots.invert(),
            stream_id,
            sender: owner.clone(),
            content: UpstreamContent::ForcedDrop { reason },
        };
        producer.send(Some(owner), Message::Stream(StreamMessage::Upstream(msg)));
    }

    fn send_upstream(&self, content: UpstreamContent) {
        let msg = UpstreamMsg {
            slots: self.slots.invert(),
            stream_id: self.stream_id,
            sender: self.owner.clone(),
            content,
        };
        self.hdl
            .send(Some(&self.owner), Message::Stream(StreamMessage::Upstream(msg)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::messages::Envelope;
    use crate::streaming::stream_message::Payload;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn make_path(priority: StreamPriority) -> (InboundPath, UnboundedReceiver<Envelope>) {
        let (owner_tx, _owner_rx) = unbounded_channel();
        let (peer_tx, peer_rx) = unbounded_channel();
        let owner = ActorRef::new(ActorId(2), "sink", owner_tx);
        let peer = ActorRef::new(ActorId(1), "source", peer_tx);
        let spec = InboundSpec {
            slots: StreamSlots::new(4, 9),
            stream_id: StreamId::new(ActorId(1), 0),
            hdl: peer,
            element_type: ElementType::of::<i32>(),
            rebind_from: ActorId(2),
            priority,
            redeployable: false,
            requester: None,
        };
        (InboundPath::new(&spec, owner, 20, 5), peer_rx)
    }

    fn batch(id: u64, n: usize) -> Batch {
        Batch {
            xs_size: n,
            xs: Payload::new(vec![0i32; n]),
            id,
        }
    }

    #[test]
    fn test_max_credit_scales_with_priority() {
        assert_eq!(make_path(StreamPriority::Normal).0.max_credit, 20);
        assert_eq!(make_path(StreamPriority::High).0.max_credit, 40);
        assert_eq!(make_path(StreamPriority::Low).0.max_credit, 10);
    }

    #[test]
    fn test_ack_open_replies_with_inverted_slots() {
        let (mut path, mut peer_rx) = make_path(StreamPriority::Normal);
        path.emit_ack_open(ActorId(2), 5);
        assert_eq!(path.state(), PathState::Open);
        let envelope = peer_rx.try_recv().expect("ack_open sent");
        match envelope.message {
            Message::Stream(StreamMessage::Upstream(msg)) => {
                assert_eq!(msg.slots, StreamSlots::new(9, 4));
                assert!(matches!(
                    msg.content,
                    UpstreamContent::AckOpen(AckOpen { initial_credit: 5, .. })
                ));
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_batch_consumes_credit() {
        let (mut path, _rx) = make_path(StreamPriority::Normal);
        path.emit_ack_open(ActorId(2), 10);
        let sid = path.stream_id;
        assert!(path.handle_batch(sid, &batch(0, 4)).is_ok());
        assert_eq!(path.assigned_credit, 6);
        assert!(!path.up_to_date());
        path.emit_ack_batch(4);
        assert!(path.up_to_date());
        assert_eq!(path.assigned_credit, 10);
    }

    #[test]
    fn test_batch_over_credit_is_rejected_but_counted() {
        let (mut path, _rx) = make_path(StreamPriority::Normal);
        path.emit_ack_open(ActorId(2), 3);
        let sid = path.stream_id;
        assert!(path.handle_batch(sid, &batch(0, 4)).is_err());
        assert_eq!(path.next_batch_id, 1);
        assert_eq!(path.assigned_credit, 0);
    }

    #[test]
    fn test_batch_for_other_stream_is_rejected() {
        let (mut path, _rx) = make_path(StreamPriority::Normal);
        path.emit_ack_open(ActorId(2), 10);
        let other = StreamId::new(ActorId(8), 3);
        assert!(matches!(
            path.handle_batch(other, &batch(0, 1)),
            Err(StreamError::InvalidStreamState { .. })
        ));
        assert_eq!(path.assigned_credit, 10);
    }
}
