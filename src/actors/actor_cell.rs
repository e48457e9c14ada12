use std::time::Duration;

use log::{debug, info, trace, warn};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::MissedTickBehavior;

use super::actor::Actor;
use super::context::ActorContext;
use super::messages::{Envelope, ExitReason, Message};
use crate::streaming::error::StreamError;
use crate::streaming::host::OpenOrigin;
use crate::streaming::stream_message::{OpenStreamMsg, StreamMessage};

/// Drives one actor until it exits.
///
/// Every turn handles one mailbox message or one credit round. Stream managers that finished are
/// cleaned up after each turn.
pub(super) async fn run<A: Actor>(
    mut actor: A,
    mut ctx: ActorContext,
    mut mailbox: UnboundedReceiver<Envelope>,
    credit_round: Duration,
) {
    info!(actor = ctx.name(); "Actor {} started", ctx.self_ref().id());
    actor.on_start(&mut ctx);
    ctx.set_running();
    ctx.streams_mut().cleanup();

    let mut ticker = tokio::time::interval(credit_round);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while !ctx.finished() {
        tokio::select! {
            envelope = mailbox.recv() => match envelope {
                Some(envelope) => handle_envelope(&mut actor, &mut ctx, envelope).await,
                None => break,
            },
            _ = ticker.tick() => ctx.streams_mut().tick(),
        }
        ctx.streams_mut().cleanup();
    }

    let reason = ctx.exit_reason().cloned().unwrap_or(ExitReason::Normal);
    actor.on_exit(&mut ctx, &reason);
    mailbox.close();
    while let Ok(envelope) = mailbox.try_recv() {
        bounce(&ctx, envelope, &reason);
    }
    for watcher in ctx.take_watchers() {
        watcher.send(
            Some(ctx.self_ref()),
            Message::Down {
                actor: ctx.self_ref().id(),
                reason: reason.clone(),
            },
        );
    }
    info!(actor = ctx.name(); "Actor stopped: {}", reason);
}

async fn handle_envelope<A: Actor>(actor: &mut A, ctx: &mut ActorContext, envelope: Envelope) {
    match envelope.message {
        Message::User(payload) => {
            trace!(actor = ctx.name(); "Received {:?}", payload);
            actor.receive(ctx, envelope.from, payload).await;
        }
        Message::Stream(StreamMessage::Open(open)) => handle_open(actor, ctx, open),
        Message::Stream(StreamMessage::Upstream(msg)) => ctx.streams_mut().handle_upstream(msg),
        Message::Stream(StreamMessage::Downstream(msg)) => {
            ctx.streams_mut().handle_downstream(msg)
        }
        Message::StreamResult { stream_id, result } => {
            debug!(actor = ctx.name(); "Stream {} finished: {:?}", stream_id, result);
            actor.on_stream_result(ctx, stream_id, result);
        }
        Message::Monitor { watcher } => ctx.add_watcher(watcher),
        Message::Down { actor: peer, reason } => {
            debug!(actor = ctx.name(); "Actor {} is down: {}", peer, reason);
            ctx.streams_mut().handle_down(peer, &reason);
            actor.on_down(ctx, peer, &reason);
        }
        Message::Exit { reason } => ctx.quit(reason),
    }
}

/// Offers an `open` to the actor and refuses it unless the actor attached to it.
fn handle_open<A: Actor>(actor: &mut A, ctx: &mut ActorContext, open: OpenStreamMsg) {
    let origin = OpenOrigin::from(&open);
    if ctx.exit_reason().is_some() {
        ctx.streams().reject_open(&origin, StreamError::StreamInitFailed);
        return;
    }
    ctx.streams_mut().begin_handshake();
    match actor.on_stream_open(ctx, open) {
        Ok(()) if ctx.streams().handshake_accepted() => {}
        Ok(()) => {
            warn!(actor = ctx.name(); "Stream {} was not attached", origin.stream_id);
            ctx.streams().reject_open(&origin, StreamError::StreamInitFailed);
        }
        // The path already answered the producer with ack_open; it stays as it is.
        Err(err) if ctx.streams().handshake_accepted() => {
            warn!(actor = ctx.name(); "Stream {} attached but its open handler failed: {}", origin.stream_id, err);
        }
        Err(err) => {
            warn!(actor = ctx.name(); "Failed to open stream {}: {}", origin.stream_id, err);
            ctx.streams().reject_open(&origin, StreamError::StreamInitFailed);
        }
    }
}

/// Answers a message that arrived after the actor stopped.
fn bounce(ctx: &ActorContext, envelope: Envelope, reason: &ExitReason) {
    match envelope.message {
        Message::Monitor { watcher } => {
            watcher.send(
                Some(ctx.self_ref()),
                Message::Down {
                    actor: ctx.self_ref().id(),
                    reason: reason.clone(),
                },
            );
        }
        Message::Stream(StreamMessage::Open(open)) => {
            ctx.streams()
                .reject_open(&OpenOrigin::from(&open), StreamError::StreamInitFailed);
        }
        _ => {}
    }
}
