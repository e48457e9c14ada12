use std::any::Any;

use log::{debug, trace};

use crate::actors::actor_ref::ActorRef;
use crate::config::StreamConfig;

use super::downstream_manager::{BufferedDownstreamManager, DownstreamManager};
use super::driver::SourceDriver;
use super::error::{StreamError, StreamResult};
use super::manager::{ManagerCore, ManagerStatus, StreamManager};
use super::stream_message::{ElementType, Payload};
use super::stream_slot::StreamSlot;

/// Stream manager producing elements from a [`SourceDriver`].
pub struct SourceManager<D, M> {
    core: ManagerCore,
    driver: D,
    out: M,
}

impl<D, M> SourceManager<D, M>
where
    D: SourceDriver,
    M: BufferedDownstreamManager<D::Output>,
{
    pub fn new(self_ref: ActorRef, config: StreamConfig, driver: D, out: M) -> Self {
        Self {
            core: ManagerCore::new(self_ref, config),
            driver,
            out,
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn downstream(&self) -> &M {
        &self.out
    }

    pub fn downstream_mut(&mut self) -> &mut M {
        &mut self.out
    }
}

impl<D, M> StreamManager for SourceManager<D, M>
where
    D: SourceDriver,
    M: BufferedDownstreamManager<D::Output>,
{
    fn core(&self) -> &ManagerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ManagerCore {
        &mut self.core
    }

    fn out(&self) -> &dyn DownstreamManager {
        &self.out
    }

    fn out_mut(&mut self) -> &mut dyn DownstreamManager {
        &mut self.out
    }

    fn done(&self) -> bool {
        let core = &self.core;
        !core.continuous
            && core.pending_handshakes == 0
            && self.out.clean()
            && (self.driver.done()
                || core.status() == ManagerStatus::ShuttingDown
                || self.out.num_paths() == 0)
    }

    fn idle(&self) -> bool {
        self.out.stalled() || (self.out.buffered() == 0 && self.out.all_paths(&|p| p.open_credit > 0))
    }

    fn input_type(&self) -> Option<ElementType> {
        None
    }

    fn handle_batch(&mut self, _slot: StreamSlot, xs: Payload) -> StreamResult<()> {
        Err(StreamError::UnexpectedBatchType {
            expected: "nothing".to_string(),
            actual: xs.type_name().to_string(),
        })
    }

    fn on_finalize(&mut self, reason: Option<StreamError>) {
        debug!(actor = self.core.self_ref.name(); "Finalizing source");
        self.driver.finalize(reason);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn generate_messages(&mut self) -> StreamResult<bool> {
        if !self.running() || self.driver.done() {
            return Ok(false);
        }
        let hint = self.out.capacity();
        if hint == 0 {
            return Ok(false);
        }
        self.driver.pull(&mut self.out.downstream(), hint)?;
        let capacity = self.out.capacity();
        trace!(actor = self.core.self_ref.name(), hint = hint; "Pulled {} elements", hint - capacity.min(hint));
        Ok(capacity != hint)
    }

    fn after_push(&mut self) {
        if self.driver.done() && self.core.active() {
            self.out.close();
            self.out.emit_batches();
        }
    }

    fn input_closed(&mut self, _reason: Option<&StreamError>) {
        self.out.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::actor_ref::ActorId;
    use crate::actors::messages::{Envelope, Message};
    use crate::streaming::broadcast::BroadcastDownstreamManager;
    use crate::streaming::downstream_manager::Downstream;
    use crate::streaming::driver::source_fn;
    use crate::streaming::stream_message::{
        AckBatch, AckOpen, DownstreamContent, Handshake, StreamMessage, UpstreamContent,
        UpstreamMsg,
    };
    use crate::streaming::stream_slot::{StreamId, StreamSlots};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn actor(id: u64, name: &str) -> (ActorRef, UnboundedReceiver<Envelope>) {
        let (tx, rx) = unbounded_channel();
        (ActorRef::new(ActorId(id), name, tx), rx)
    }

    fn counting_source(
        limit: i32,
        finalized: Arc<AtomicUsize>,
    ) -> SourceManager<impl SourceDriver<Output = i32>, BroadcastDownstreamManager<i32>> {
        let driver = source_fn(
            |_: &mut i32| Ok(()),
            move |next: &mut i32, out: &mut Downstream<'_, i32>, hint: usize| {
                let mut n = 0;
                while n < hint && *next < limit {
                    *next += 1;
                    out.push(*next);
                    n += 1;
                }
                Ok(())
            },
            move |next: &i32| *next >= limit,
        )
        .unwrap()
        .on_finalize(move |_: &mut i32, _: Option<StreamError>| {
            finalized.fetch_add(1, Ordering::SeqCst);
        });
        let (me, _rx) = actor(1, "source");
        SourceManager::new(me, StreamConfig::default(), driver, BroadcastDownstreamManager::new())
    }

    fn upstream(sink: &ActorRef, content: UpstreamContent) -> UpstreamMsg {
        UpstreamMsg {
            slots: StreamSlots::new(7, 1),
            stream_id: StreamId::new(ActorId(1), 0),
            sender: sink.clone(),
            content,
        }
    }

    fn drain(rx: &mut UnboundedReceiver<Envelope>) -> Vec<DownstreamContent> {
        let mut result = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            if let Message::Stream(StreamMessage::Downstream(msg)) = envelope.message {
                result.push(msg.content);
            }
        }
        result
    }

    #[test]
    fn test_source_emits_until_done_then_closes() {
        let finalized = Arc::new(AtomicUsize::new(0));
        let mut mgr = counting_source(12, finalized.clone());
        let (sink, mut sink_rx) = actor(2, "sink");
        mgr.add_outbound_path(1, StreamId::new(ActorId(1), 0), &sink, ElementType::of::<i32>(), Handshake::new())
            .unwrap();
        assert_eq!(mgr.pending_handshakes(), 1);
        assert!(!mgr.done());
        assert!(matches!(
            sink_rx.try_recv().map(|e| e.message),
            Ok(Message::Stream(StreamMessage::Open(_)))
        ));

        let ack = AckOpen {
            rebind_from: sink.id(),
            initial_credit: 10,
            max_capacity: 50,
            desired_batch_size: 10,
            redeployable: false,
        };
        mgr.handle_upstream(upstream(&sink, UpstreamContent::AckOpen(ack)));
        assert_eq!(mgr.pending_handshakes(), 0);
        let sent = drain(&mut sink_rx);
        assert_eq!(sent.len(), 1);
        assert!(matches!(&sent[0], DownstreamContent::Batch(b) if b.xs_size == 10));
        assert!(!mgr.done());

        let ack = AckBatch {
            new_capacity: 10,
            max_capacity: 50,
            desired_batch_size: 10,
            acknowledged_id: 1,
        };
        mgr.handle_upstream(upstream(&sink, UpstreamContent::AckBatch(ack)));
        let sent = drain(&mut sink_rx);
        assert!(matches!(&sent[0], DownstreamContent::Batch(b) if b.xs_size == 2));
        assert!(mgr.downstream().path(1).is_some_and(|p| p.closing()));

        let ack = AckBatch {
            new_capacity: 2,
            max_capacity: 50,
            desired_batch_size: 10,
            acknowledged_id: 2,
        };
        mgr.handle_upstream(upstream(&sink, UpstreamContent::AckBatch(ack)));
        assert!(matches!(drain(&mut sink_rx).as_slice(), [DownstreamContent::Close]));
        assert!(mgr.done());
        mgr.stop();
        mgr.stop();
        assert_eq!(finalized.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_forced_drop_aborts_source() {
        let finalized = Arc::new(AtomicUsize::new(0));
        let mut mgr = counting_source(100, finalized.clone());
        let (sink, _sink_rx) = actor(2, "sink");
        mgr.add_outbound_path(1, StreamId::new(ActorId(1), 0), &sink, ElementType::of::<i32>(), Handshake::new())
            .unwrap();
        mgr.handle_upstream(upstream(
            &sink,
            UpstreamContent::ForcedDrop {
                reason: StreamError::StreamInitFailed,
            },
        ));
        assert_eq!(mgr.status(), ManagerStatus::Aborted);
        assert_eq!(mgr.pending_handshakes(), 0);
        assert_eq!(finalized.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_idle_is_stable() {
        let mut mgr = counting_source(100, Arc::new(AtomicUsize::new(0)));
        let (sink, _sink_rx) = actor(2, "sink");
        mgr.add_outbound_path(1, StreamId::new(ActorId(1), 0), &sink, ElementType::of::<i32>(), Handshake::new())
            .unwrap();
        let first = mgr.idle();
        assert_eq!(first, mgr.idle());
        assert_eq!(mgr.downstream().buffered(), 0);
    }
}
