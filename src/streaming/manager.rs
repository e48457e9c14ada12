use std::any::Any;
use std::mem;

use log::{debug, info, warn};

use crate::actors::actor_ref::{ActorId, ActorRef};
use crate::actors::messages::{ExitReason, Message};
use crate::config::StreamConfig;

use super::credit;
use super::downstream_manager::DownstreamManager;
use super::error::{StreamError, StreamResult};
use super::inbound_path::{InboundPath, InboundSpec};
use super::outbound_path::OutboundPath;
use super::stream_message::{
    AckBatch, AckOpen, Batch, DownstreamContent, DownstreamMsg, ElementType, Handshake, Payload,
    UpstreamContent, UpstreamMsg,
};
use super::stream_slot::{StreamId, StreamSlot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerStatus {
    Running,
    /// No new input is accepted. Buffered output still drains.
    ShuttingDown,
    Stopped,
    Aborted,
}

/// State every stream manager shares, whatever its role.
pub struct ManagerCore {
    pub self_ref: ActorRef,
    pub config: StreamConfig,
    pub inbound: Vec<InboundPath>,
    /// Outbound `open` messages not yet answered by `ack_open`.
    pub pending_handshakes: usize,
    pub continuous: bool,
    status: ManagerStatus,
    finalized: bool,
    requesters: Vec<(StreamId, ActorRef)>,
    credit_round: usize,
}

impl ManagerCore {
    pub fn new(self_ref: ActorRef, config: StreamConfig) -> Self {
        Self {
            self_ref,
            config,
            inbound: Vec::new(),
            pending_handshakes: 0,
            continuous: false,
            status: ManagerStatus::Running,
            finalized: false,
            requesters: Vec::new(),
            credit_round: 0,
        }
    }

    pub fn status(&self) -> ManagerStatus {
        self.status
    }

    /// Running or shutting down.
    pub fn active(&self) -> bool {
        matches!(self.status, ManagerStatus::Running | ManagerStatus::ShuttingDown)
    }

    pub fn inbound_path(&self, slot: StreamSlot) -> Option<&InboundPath> {
        self.inbound.iter().find(|p| p.slot() == slot)
    }

    /// Every inbound path is acknowledged and holds credit, so nothing can be done until data
    /// arrives.
    pub fn inbound_paths_idle(&self) -> bool {
        self.inbound
            .iter()
            .all(|p| p.up_to_date() && p.assigned_credit > 0)
    }

    fn inbound_index(&self, slot: StreamSlot) -> Option<usize> {
        self.inbound.iter().position(|p| p.slot() == slot)
    }

    fn take_inbound(&mut self, slot: StreamSlot) -> Option<InboundPath> {
        self.inbound_index(slot).map(|i| self.inbound.remove(i))
    }
}

/// State machine for one stream segment on an actor.
///
/// Implementors provide the role specific hooks. The protocol handling lives in the provided
/// methods and is the same for sources, sinks and stages.
pub trait StreamManager: Send + 'static {
    fn core(&self) -> &ManagerCore;

    fn core_mut(&mut self) -> &mut ManagerCore;

    fn out(&self) -> &dyn DownstreamManager;

    fn out_mut(&mut self) -> &mut dyn DownstreamManager;

    /// True once the manager can be stopped gracefully.
    fn done(&self) -> bool;

    /// True when the manager can make no progress until a message arrives.
    fn idle(&self) -> bool;

    /// Element type accepted on inbound paths, if any.
    fn input_type(&self) -> Option<ElementType>;

    /// Feeds a batch received on `slot` to the driver.
    fn handle_batch(&mut self, slot: StreamSlot, xs: Payload) -> StreamResult<()>;

    /// Forwards termination to the driver.
    fn on_finalize(&mut self, reason: Option<StreamError>);

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn accepts(&self, element_type: &ElementType) -> bool {
        self.input_type().as_ref() == Some(element_type)
    }

    /// Pulls new output into the downstream buffer. Returns whether anything changed.
    fn generate_messages(&mut self) -> StreamResult<bool> {
        Ok(false)
    }

    fn congested(&self) -> bool {
        false
    }

    fn acquire_credit(&mut self, _slot: StreamSlot, desired: usize) -> usize {
        desired
    }

    fn downstream_capacity(&self) -> usize {
        self.out().capacity()
    }

    /// Called after an inbound path closed, gracefully or not.
    fn input_closed(&mut self, _reason: Option<&StreamError>) {}

    /// Called at the end of every push.
    fn after_push(&mut self) {}

    fn continuous(&self) -> bool {
        self.core().continuous
    }

    fn set_continuous(&mut self, continuous: bool) {
        self.core_mut().continuous = continuous;
    }

    fn pending_handshakes(&self) -> usize {
        self.core().pending_handshakes
    }

    fn status(&self) -> ManagerStatus {
        self.core().status
    }

    fn running(&self) -> bool {
        self.core().status == ManagerStatus::Running
    }

    fn terminated(&self) -> bool {
        matches!(
            self.core().status,
            ManagerStatus::Stopped | ManagerStatus::Aborted
        )
    }

    fn inbound_paths(&self) -> &[InboundPath] {
        &self.core().inbound
    }

    /// Whether an inbound or outbound path of this manager still uses `slot`.
    fn owns_slot(&self, slot: StreamSlot) -> bool {
        self.core().inbound_path(slot).is_some() || self.out().path(slot).is_some()
    }

    fn add_outbound_path(
        &mut self,
        slot: StreamSlot,
        stream_id: StreamId,
        dest: &ActorRef,
        element_type: ElementType,
        handshake: Handshake,
    ) -> StreamResult<()> {
        if !self.core().active() {
            return Err(StreamError::InvalidStreamState {
                reason: "manager no longer accepts paths".to_string(),
            });
        }
        if self.out().terminal() {
            return Err(StreamError::NoDownstream);
        }
        if self.out().path(slot).is_some() {
            return Err(StreamError::DuplicatePath);
        }
        let mut path = OutboundPath::new(slot, stream_id, dest.clone(), self.core().self_ref.clone());
        if !path.emit_open(element_type, handshake) {
            warn!(actor = self.core().self_ref.name(), slot = slot; "Stream target {} is unreachable", dest.id());
        }
        if !self.out_mut().insert_path(path) {
            return Err(StreamError::DuplicatePath);
        }
        self.out_mut().route_path(slot, &element_type);
        self.core_mut().pending_handshakes += 1;
        Ok(())
    }

    /// Accepts an inbound path and answers with `ack_open`.
    fn add_inbound_path(&mut self, spec: InboundSpec) -> StreamResult<()> {
        if !self.running() {
            return Err(StreamError::InvalidStreamState {
                reason: "manager no longer accepts input".to_string(),
            });
        }
        if !self.accepts(&spec.element_type) {
            return Err(StreamError::UnexpectedBatchType {
                expected: self
                    .input_type()
                    .map_or("nothing", |t| t.name())
                    .to_string(),
                actual: spec.element_type.name().to_string(),
            });
        }
        let duplicate = self
            .core()
            .inbound
            .iter()
            .any(|p| p.stream_id == spec.stream_id && p.hdl == spec.hdl);
        if duplicate {
            return Err(StreamError::DuplicatePath);
        }
        let core = self.core();
        let path = InboundPath::new(
            &spec,
            core.self_ref.clone(),
            core.config.max_credit,
            core.config.desired_batch_size,
        );
        let slot = path.slot();
        let initial = credit::initial_credit(self.downstream_capacity(), &path);
        self.core_mut().inbound.push(path);
        let granted = if initial > 0 {
            self.acquire_credit(slot, initial).min(initial)
        } else {
            0
        };
        let core = self.core_mut();
        if let Some(path) = core.inbound.last_mut() {
            path.emit_ack_open(spec.rebind_from, granted);
        }
        if let Some(requester) = spec.requester {
            core.requesters.push((spec.stream_id, requester));
        }
        Ok(())
    }

    fn handle_upstream(&mut self, msg: UpstreamMsg) {
        let slot = msg.slots.receiver;
        match msg.content {
            UpstreamContent::AckOpen(ack) => {
                self.handle_ack_open(slot, &ack, &msg.sender, msg.slots.sender)
            }
            UpstreamContent::AckBatch(ack) => self.handle_ack_batch(slot, &ack),
            UpstreamContent::Drop => self.handle_drop(slot),
            UpstreamContent::ForcedDrop { reason } => self.handle_forced_drop(slot, reason),
        }
    }

    fn handle_downstream(&mut self, msg: DownstreamMsg) {
        let slot = msg.slots.receiver;
        match msg.content {
            DownstreamContent::Batch(batch) => self.handle_batch_msg(slot, msg.stream_id, batch),
            DownstreamContent::Close => self.handle_close(slot),
            DownstreamContent::ForcedClose { reason } => self.handle_forced_close(slot, reason),
        }
    }

    fn handle_ack_open(
        &mut self,
        slot: StreamSlot,
        ack: &AckOpen,
        sender: &ActorRef,
        receiver_slot: StreamSlot,
    ) {
        if self.terminated() {
            return;
        }
        let name = self.core().self_ref.name().to_string();
        let Some(path) = self.out_mut().path_mut(slot) else {
            warn!(actor = name.as_str(), slot = slot; "ack_open for unknown path");
            return;
        };
        if !path.pending() {
            warn!(actor = name.as_str(), slot = slot; "Duplicate ack_open");
            return;
        }
        path.handle_ack_open(ack, sender, receiver_slot);
        let core = self.core_mut();
        core.pending_handshakes = core.pending_handshakes.saturating_sub(1);
        self.push();
        self.assign_credit();
    }

    fn handle_ack_batch(&mut self, slot: StreamSlot, ack: &AckBatch) {
        if self.terminated() {
            return;
        }
        match self.out_mut().path_mut(slot) {
            Some(path) => path.handle_ack_batch(ack),
            None => {
                debug!(actor = self.core().self_ref.name(), slot = slot; "ack_batch for unknown path");
                return;
            }
        }
        self.push();
        self.assign_credit();
    }

    fn handle_drop(&mut self, slot: StreamSlot) {
        if self.remove_outbound_path(slot) {
            self.push();
        }
    }

    fn handle_forced_drop(&mut self, slot: StreamSlot, reason: StreamError) {
        if !self.remove_outbound_path(slot) {
            return;
        }
        if self.continuous() {
            self.push();
        } else {
            self.abort(reason);
        }
    }

    /// Removes an outbound path without notifying the peer.
    fn remove_outbound_path(&mut self, slot: StreamSlot) -> bool {
        let pending = match self.out().path(slot) {
            Some(path) => path.pending(),
            None => return false,
        };
        self.out_mut().remove_path(slot, None, true);
        if pending {
            let core = self.core_mut();
            core.pending_handshakes = core.pending_handshakes.saturating_sub(1);
        }
        true
    }

    /// Detaches the input of `stream_id` coming from `peer`.
    ///
    /// Unless `silent`, the producer gets `drop`, or `forced_drop` when a reason is given.
    fn remove_inbound_path(
        &mut self,
        stream_id: StreamId,
        peer: ActorId,
        reason: Option<StreamError>,
        silent: bool,
    ) -> bool {
        let slot = match self
            .core()
            .inbound
            .iter()
            .find(|p| p.stream_id == stream_id && p.hdl.id() == peer)
        {
            Some(path) => path.slot(),
            None => return false,
        };
        let Some(mut path) = self.core_mut().take_inbound(slot) else {
            return false;
        };
        match (&reason, silent) {
            (_, true) => path.mark_closed(),
            (Some(reason), false) => path.emit_irregular_shutdown(reason),
            (None, false) => path.emit_regular_shutdown(),
        }
        self.input_closed(reason.as_ref());
        self.push();
        true
    }

    fn handle_batch_msg(&mut self, slot: StreamSlot, stream_id: StreamId, batch: Batch) {
        if self.terminated() {
            return;
        }
        let Some(index) = self.core().inbound_index(slot) else {
            debug!(actor = self.core().self_ref.name(), slot = slot; "Batch for unknown path");
            return;
        };
        if let Err(err) = self.core_mut().inbound[index].handle_batch(stream_id, &batch) {
            warn!(actor = self.core().self_ref.name(), slot = slot; "Dropping batch: {}", err);
            self.assign_credit();
            return;
        }
        if let Err(err) = self.handle_batch(slot, batch.xs) {
            warn!(actor = self.core().self_ref.name(), slot = slot; "Dropping batch: {}", err);
        }
        self.push();
        self.assign_credit();
    }

    fn handle_close(&mut self, slot: StreamSlot) {
        let Some(mut path) = self.core_mut().take_inbound(slot) else {
            return;
        };
        path.mark_closed();
        debug!(actor = self.core().self_ref.name(), slot = slot; "Inbound path closed");
        self.input_closed(None);
        self.push();
    }

    fn handle_forced_close(&mut self, slot: StreamSlot, reason: StreamError) {
        let Some(mut path) = self.core_mut().take_inbound(slot) else {
            return;
        };
        path.mark_aborted();
        if self.continuous() {
            self.input_closed(Some(&reason));
            self.push();
        } else {
            self.abort(reason);
        }
    }

    /// Reacts to the termination of a peer. Continuous managers only lose the affected paths.
    fn handle_peer_down(&mut self, actor: ActorId, reason: &ExitReason) {
        if self.terminated() {
            return;
        }
        let inbound: Vec<StreamSlot> = self
            .core()
            .inbound
            .iter()
            .filter(|p| p.hdl.id() == actor)
            .map(|p| p.slot())
            .collect();
        let outbound: Vec<StreamSlot> = self
            .out()
            .path_slots()
            .into_iter()
            .filter(|s| self.out().path(*s).is_some_and(|p| p.target.id() == actor))
            .collect();
        if inbound.is_empty() && outbound.is_empty() {
            return;
        }
        let err = StreamError::PeerDown {
            actor,
            reason: reason.clone(),
        };
        if !self.continuous() {
            self.abort(err);
            return;
        }
        for slot in &inbound {
            if let Some(mut path) = self.core_mut().take_inbound(*slot) {
                path.mark_aborted();
            }
        }
        if !inbound.is_empty() {
            self.input_closed(Some(&err));
        }
        for slot in outbound {
            self.remove_outbound_path(slot);
        }
        self.push();
    }

    /// Ships what credit allows and pulls more output until nothing changes.
    fn push(&mut self) {
        if !self.core().active() {
            return;
        }
        loop {
            self.out_mut().emit_batches();
            match self.generate_messages() {
                Ok(true) => continue,
                Ok(false) => break,
                Err(err) => {
                    self.abort(err);
                    return;
                }
            }
        }
        self.after_push();
        self.out_mut().close_finished_paths();
    }

    /// Runs a credit round over all inbound paths.
    fn assign_credit(&mut self) {
        if !self.core().active() || self.core().inbound.is_empty() {
            return;
        }
        let grants = if self.congested() {
            vec![0; self.core().inbound.len()]
        } else {
            let capacity = self.downstream_capacity();
            let core = self.core();
            credit::assign_credit(&core.inbound, capacity, core.credit_round)
        };
        let core = self.core_mut();
        core.credit_round = core.credit_round.wrapping_add(1);
        for (i, grant) in grants.into_iter().enumerate() {
            let slot = self.core().inbound[i].slot();
            let granted = if grant > 0 {
                self.acquire_credit(slot, grant).min(grant)
            } else {
                0
            };
            let path = &mut self.core_mut().inbound[i];
            if credit::should_ack(path, granted) {
                path.emit_ack_batch(granted);
            }
        }
    }

    /// Periodic credit round. Also flushes under-full batches so sparse streams keep moving.
    fn tick(&mut self) {
        if !self.core().active() {
            return;
        }
        self.push();
        self.out_mut().force_emit_batches();
        self.out_mut().close_finished_paths();
        self.assign_credit();
    }

    /// Stops accepting input and closes all outbound paths once they drained.
    fn shutdown(&mut self) {
        if !self.running() {
            return;
        }
        info!(actor = self.core().self_ref.name(); "Shutting down stream manager");
        let core = self.core_mut();
        core.status = ManagerStatus::ShuttingDown;
        core.continuous = false;
        let mut inbound = mem::take(&mut core.inbound);
        for path in &mut inbound {
            path.emit_regular_shutdown();
        }
        if !inbound.is_empty() {
            self.input_closed(None);
        }
        self.out_mut().close();
        self.push();
    }

    /// Graceful end of the manager. Called once `done()` holds.
    fn stop(&mut self) {
        if self.terminated() {
            return;
        }
        debug!(actor = self.core().self_ref.name(); "Stopping stream manager");
        let mut inbound = mem::take(&mut self.core_mut().inbound);
        for path in &mut inbound {
            path.emit_regular_shutdown();
        }
        self.out_mut().close();
        self.core_mut().status = ManagerStatus::Stopped;
        self.finalize(None);
    }

    /// Tears the manager down, notifying every peer with a forced message.
    fn abort(&mut self, reason: StreamError) {
        if self.terminated() {
            return;
        }
        warn!(actor = self.core().self_ref.name(); "Aborting stream manager: {}", reason);
        let mut inbound = mem::take(&mut self.core_mut().inbound);
        for path in &mut inbound {
            path.emit_irregular_shutdown(&reason);
        }
        self.out_mut().abort(&reason);
        let core = self.core_mut();
        core.pending_handshakes = 0;
        core.status = ManagerStatus::Aborted;
        self.finalize(Some(reason));
    }

    /// Runs the driver's finalizer and reports the outcome to requesters. Only the first call
    /// has an effect.
    fn finalize(&mut self, reason: Option<StreamError>) {
        let core = self.core_mut();
        if core.finalized {
            return;
        }
        core.finalized = true;
        let requesters = mem::take(&mut core.requesters);
        let self_ref = core.self_ref.clone();
        self.on_finalize(reason.clone());
        for (stream_id, requester) in requesters {
            let result = reason.clone().map_or(Ok(()), Err);
            requester.send(Some(&self_ref), Message::StreamResult { stream_id, result });
        }
    }
}
