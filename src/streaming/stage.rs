use std::any::{type_name, Any};

use log::debug;

use crate::actors::actor_ref::ActorRef;
use crate::config::StreamConfig;

use super::downstream_manager::{BufferedDownstreamManager, DownstreamManager};
use super::driver::StageDriver;
use super::error::{StreamError, StreamResult};
use super::fused::FusedDownstreamManager;
use super::manager::{ManagerCore, StreamManager};
use super::stream_message::{ElementType, Payload};
use super::stream_slot::StreamSlot;

/// Stream manager transforming inbound batches through a [`StageDriver`].
pub struct StageManager<D, M> {
    core: ManagerCore,
    driver: D,
    out: M,
}

impl<D, M> StageManager<D, M>
where
    D: StageDriver,
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

impl<D, M> StreamManager for StageManager<D, M>
where
    D: StageDriver,
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
        !self.core.continuous
            && self.core.inbound.is_empty()
            && self.core.pending_handshakes == 0
            && self.out.clean()
    }

    fn idle(&self) -> bool {
        self.out.stalled() || (self.out.clean() && self.core.inbound_paths_idle())
    }

    fn input_type(&self) -> Option<ElementType> {
        Some(ElementType::of::<D::Input>())
    }

    fn handle_batch(&mut self, _slot: StreamSlot, xs: Payload) -> StreamResult<()> {
        let xs = xs
            .downcast::<Vec<D::Input>>()
            .map_err(|xs| StreamError::UnexpectedBatchType {
                expected: type_name::<Vec<D::Input>>().to_string(),
                actual: xs.type_name().to_string(),
            })?;
        self.driver.process(&mut self.out.downstream(), xs);
        Ok(())
    }

    fn on_finalize(&mut self, reason: Option<StreamError>) {
        debug!(actor = self.core.self_ref.name(); "Finalizing stage");
        self.driver.finalize(reason);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn input_closed(&mut self, _reason: Option<&StreamError>) {
        if self.core.inbound.is_empty() && !self.core.continuous {
            self.out.close();
        }
    }
}

/// Continuous stage forwarding batches of several element types to a fused downstream.
///
/// Inbound batches are routed by their runtime type to the nested manager of that type. The stage
/// outlives any particular producer or consumer.
pub struct MultiplexerStage {
    core: ManagerCore,
    out: FusedDownstreamManager,
}

impl MultiplexerStage {
    pub fn new(self_ref: ActorRef, config: StreamConfig, out: FusedDownstreamManager) -> Self {
        let mut core = ManagerCore::new(self_ref, config);
        core.continuous = true;
        Self { core, out }
    }

    pub fn downstream(&self) -> &FusedDownstreamManager {
        &self.out
    }

    pub fn downstream_mut(&mut self) -> &mut FusedDownstreamManager {
        &mut self.out
    }
}

impl StreamManager for MultiplexerStage {
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
        !self.core.continuous
            && self.core.inbound.is_empty()
            && self.core.pending_handshakes == 0
            && self.out.clean()
    }

    fn idle(&self) -> bool {
        self.out.stalled() || (self.out.clean() && self.core.inbound_paths_idle())
    }

    fn input_type(&self) -> Option<ElementType> {
        None
    }

    fn accepts(&self, element_type: &ElementType) -> bool {
        self.out.element_types().contains(element_type)
    }

    fn handle_batch(&mut self, _slot: StreamSlot, xs: Payload) -> StreamResult<()> {
        match self.out.push_erased(xs) {
            Ok(_) => Ok(()),
            Err(xs) => Err(StreamError::UnexpectedBatchType {
                expected: "a multiplexed element type".to_string(),
                actual: xs.type_name().to_string(),
            }),
        }
    }

    fn on_finalize(&mut self, reason: Option<StreamError>) {
        debug!(actor = self.core.self_ref.name(); "Finalizing multiplexer: {:?}", reason);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn input_closed(&mut self, _reason: Option<&StreamError>) {
        if self.core.inbound.is_empty() && !self.core.continuous {
            self.out.close();
        }
    }
}
