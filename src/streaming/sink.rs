use std::any::{type_name, Any};

use log::debug;

use crate::actors::actor_ref::ActorRef;
use crate::config::StreamConfig;

use super::downstream_manager::{DownstreamManager, TerminalDownstream};
use super::driver::SinkDriver;
use super::error::{StreamError, StreamResult};
use super::manager::{ManagerCore, StreamManager};
use super::stream_message::{ElementType, Payload};
use super::stream_slot::StreamSlot;

/// Stream manager feeding every received batch to a [`SinkDriver`].
pub struct SinkManager<D> {
    core: ManagerCore,
    driver: D,
    out: TerminalDownstream,
}

impl<D: SinkDriver> SinkManager<D> {
    pub fn new(self_ref: ActorRef, config: StreamConfig, driver: D) -> Self {
        Self {
            core: ManagerCore::new(self_ref, config),
            driver,
            out: TerminalDownstream,
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }
}

impl<D: SinkDriver> StreamManager for SinkManager<D> {
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
        !self.core.continuous && self.core.pending_handshakes == 0 && self.core.inbound.is_empty()
    }

    fn idle(&self) -> bool {
        self.core.inbound_paths_idle()
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
        self.driver.process(xs);
        Ok(())
    }

    fn on_finalize(&mut self, reason: Option<StreamError>) {
        debug!(actor = self.core.self_ref.name(); "Finalizing sink");
        self.driver.finalize(reason);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn congested(&self) -> bool {
        self.driver.congested()
    }

    fn acquire_credit(&mut self, _slot: StreamSlot, desired: usize) -> usize {
        self.driver.acquire_credit(desired)
    }
}
