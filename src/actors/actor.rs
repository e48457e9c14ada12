use super::actor_ref::{ActorId, ActorRef};
use super::context::ActorContext;
use super::messages::ExitReason;
use crate::streaming::error::{StreamError, StreamResult};
use crate::streaming::stream_message::{OpenStreamMsg, Payload};
use crate::streaming::stream_slot::StreamId;

/// Behaviour of an actor.
///
/// Only `receive` is required. Stream traffic is handled by the actor's stream host; the hooks
/// below let the actor take part in it. Implement [`Actor`], the `Send` variant, to spawn actors
/// on the actor system.
#[trait_variant::make(Actor: Send)]
pub trait LocalActor {
    /// Handles an application message.
    async fn receive(&mut self, ctx: &mut ActorContext, from: Option<ActorRef>, message: Payload);

    fn on_start(&mut self, _ctx: &mut ActorContext) {}

    /// Called for every incoming `open`.
    ///
    /// Accept the stream by attaching a sink or stage to it, or hand it on with
    /// `forward_open`. Returning without doing either refuses the stream, and so does an error
    /// returned before that. An error after the stream was accepted is only logged.
    fn on_stream_open(&mut self, _ctx: &mut ActorContext, _open: OpenStreamMsg) -> StreamResult<()> {
        Err(StreamError::StreamInitFailed)
    }

    /// Final outcome of a stream this actor requested.
    fn on_stream_result(
        &mut self,
        _ctx: &mut ActorContext,
        _stream_id: StreamId,
        _result: StreamResult<()>,
    ) {
    }

    /// A monitored actor terminated.
    fn on_down(&mut self, _ctx: &mut ActorContext, _actor: ActorId, _reason: &ExitReason) {}

    fn on_exit(&mut self, _ctx: &mut ActorContext, _reason: &ExitReason) {}
}
