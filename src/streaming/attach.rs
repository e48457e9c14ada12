//! Helpers that create stream managers on the calling actor and wire up their first paths.
//!
//! Every helper monitors the peers it connects to, so a terminated peer tears the stream down.

use std::any::Any;

use log::debug;

use crate::actors::actor_ref::ActorRef;
use crate::actors::context::ActorContext;

use super::broadcast::BroadcastDownstreamManager;
use super::downstream_manager::BufferedDownstreamManager;
use super::driver::{SinkDriver, SourceDriver, StageDriver};
use super::error::StreamResult;
use super::fused::FusedDownstreamManager;
use super::manager::StreamManager;
use super::sink::SinkManager;
use super::slot_table::ManagerHandle;
use super::source::SourceManager;
use super::stage::{MultiplexerStage, StageManager};
use super::stream_message::{ElementType, Handshake, Stream};
use super::stream_slot::StreamSlot;

fn insert(ctx: &mut ActorContext, manager: impl StreamManager) -> ManagerHandle {
    ctx.streams_mut().insert_manager(Box::new(manager))
}

/// Aborts a manager whose first path could not be created. Cleanup removes it afterwards.
fn discard(ctx: &mut ActorContext, handle: ManagerHandle, err: &super::error::StreamError) {
    debug!(actor = ctx.name(); "Discarding stream manager: {}", err);
    if let Some(manager) = ctx.streams_mut().manager_mut(handle) {
        manager.abort(err.clone());
    }
}

/// Starts a source streaming to `dest`, broadcasting to every path.
pub fn attach_stream_source<D: SourceDriver>(
    ctx: &mut ActorContext,
    dest: &ActorRef,
    handshake: Handshake,
    driver: D,
) -> StreamResult<(StreamSlot, ManagerHandle)> {
    attach_stream_source_with(ctx, dest, handshake, driver, BroadcastDownstreamManager::new())
}

/// Starts a source streaming to `dest` through a custom downstream manager.
pub fn attach_stream_source_with<D, M>(
    ctx: &mut ActorContext,
    dest: &ActorRef,
    handshake: Handshake,
    driver: D,
    out: M,
) -> StreamResult<(StreamSlot, ManagerHandle)>
where
    D: SourceDriver,
    M: BufferedDownstreamManager<D::Output>,
{
    let host = ctx.streams();
    let manager = SourceManager::new(host.self_ref().clone(), host.config().clone(), driver, out);
    let handle = insert(ctx, manager);
    let element_type = ElementType::of::<D::Output>();
    match ctx
        .streams_mut()
        .add_outbound_path(handle, dest, element_type, handshake)
    {
        Ok(slot) => {
            ctx.monitor(dest);
            Ok((slot, handle))
        }
        Err(err) => {
            discard(ctx, handle, &err);
            Err(err)
        }
    }
}

/// Accepts `stream` into a new sink.
pub fn attach_stream_sink<D: SinkDriver>(
    ctx: &mut ActorContext,
    stream: &Stream<D::Input>,
    driver: D,
) -> StreamResult<(StreamSlot, ManagerHandle)> {
    let host = ctx.streams();
    let manager = SinkManager::new(host.self_ref().clone(), host.config().clone(), driver);
    let handle = insert(ctx, manager);
    match ctx.streams_mut().add_inbound_path(handle, stream) {
        Ok(slot) => {
            ctx.monitor(&stream.prev_stage);
            Ok((slot, handle))
        }
        Err(err) => {
            discard(ctx, handle, &err);
            Err(err)
        }
    }
}

/// Accepts `stream` into a new stage that forwards its output to `dest`.
///
/// Returns the inbound slot, the outbound slot and the manager.
pub fn attach_stream_stage<D: StageDriver>(
    ctx: &mut ActorContext,
    stream: &Stream<D::Input>,
    dest: &ActorRef,
    handshake: Handshake,
    driver: D,
) -> StreamResult<(StreamSlot, StreamSlot, ManagerHandle)> {
    attach_stream_stage_with(ctx, stream, dest, handshake, driver, BroadcastDownstreamManager::new())
}

pub fn attach_stream_stage_with<D, M>(
    ctx: &mut ActorContext,
    stream: &Stream<D::Input>,
    dest: &ActorRef,
    handshake: Handshake,
    driver: D,
    out: M,
) -> StreamResult<(StreamSlot, StreamSlot, ManagerHandle)>
where
    D: StageDriver,
    M: BufferedDownstreamManager<D::Output>,
{
    let host = ctx.streams();
    let manager = StageManager::new(host.self_ref().clone(), host.config().clone(), driver, out);
    let handle = insert(ctx, manager);
    let result = ctx
        .streams_mut()
        .add_inbound_path(handle, stream)
        .and_then(|in_slot| {
            ctx.streams_mut()
                .add_outbound_path(handle, dest, ElementType::of::<D::Output>(), handshake)
                .map(|out_slot| (in_slot, out_slot))
        });
    match result {
        Ok((in_slot, out_slot)) => {
            ctx.monitor(&stream.prev_stage);
            ctx.monitor(dest);
            Ok((in_slot, out_slot, handle))
        }
        Err(err) => {
            discard(ctx, handle, &err);
            Err(err)
        }
    }
}

/// Creates a continuous stage without paths. Connect it with [`add_inbound_path`] and
/// [`add_outbound_path`].
pub fn attach_continuous_stream_stage<D, M>(ctx: &mut ActorContext, driver: D, out: M) -> ManagerHandle
where
    D: StageDriver,
    M: BufferedDownstreamManager<D::Output>,
{
    let host = ctx.streams();
    let mut manager = StageManager::new(host.self_ref().clone(), host.config().clone(), driver, out);
    manager.set_continuous(true);
    insert(ctx, manager)
}

/// Creates a continuous multiplexer routing every element type of `out`.
pub fn attach_multiplexer(ctx: &mut ActorContext, out: FusedDownstreamManager) -> ManagerHandle {
    let host = ctx.streams();
    let manager = MultiplexerStage::new(host.self_ref().clone(), host.config().clone(), out);
    insert(ctx, manager)
}

/// Adds `stream` as another input of an existing manager.
pub fn add_inbound_path<T: Any + Send>(
    ctx: &mut ActorContext,
    handle: ManagerHandle,
    stream: &Stream<T>,
) -> StreamResult<StreamSlot> {
    let slot = ctx.streams_mut().add_inbound_path(handle, stream)?;
    ctx.monitor(&stream.prev_stage);
    Ok(slot)
}

/// Opens another output of type `T` from an existing manager to `dest`.
pub fn add_outbound_path<T: Any + Send>(
    ctx: &mut ActorContext,
    handle: ManagerHandle,
    dest: &ActorRef,
    handshake: Handshake,
) -> StreamResult<StreamSlot> {
    let slot = ctx
        .streams_mut()
        .add_outbound_path(handle, dest, ElementType::of::<T>(), handshake)?;
    ctx.monitor(dest);
    Ok(slot)
}
