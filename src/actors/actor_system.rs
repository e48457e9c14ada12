use std::time::Duration;

use log::{info, warn};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::task::JoinHandle;

use super::actor::Actor;
use super::actor_cell;
use super::actor_ref::{ActorId, ActorRef};
use super::context::ActorContext;
use super::error::{ActorError, ActorResult};
use super::messages::{Envelope, ExitReason, Message};
use crate::config::SluiceConfig;

/// The ActorSystem is the main entry point. It spawns actors and shuts them down again.
///
/// Every actor runs as its own tokio task, so the system must be used from within a tokio
/// runtime.
///
/// # Example
/// ```rust
/// use sluice::actors::actor::Actor;
/// use sluice::actors::actor_ref::ActorRef;
/// use sluice::actors::actor_system::ActorSystem;
/// use sluice::actors::context::ActorContext;
/// use sluice::streaming::stream_message::Payload;
///
/// struct Greeter;
///
/// impl Actor for Greeter {
///     async fn receive(&mut self, ctx: &mut ActorContext, _from: Option<ActorRef>, message: Payload) {
///         if let Some(name) = message.downcast_ref::<String>() {
///             log::info!(actor = ctx.name(); "Hello, {}", name);
///         }
///     }
/// }
///
/// pub async fn run_system() {
///     let mut actor_system = ActorSystem::new();
///     let greeter = actor_system.spawn("greeter", Greeter);
///     greeter.tell("world".to_string());
///     actor_system.stop_system().await.ok();
/// }
/// ```
pub struct ActorSystem {
    config: SluiceConfig,
    next_id: u64,
    actors: Vec<(ActorRef, JoinHandle<()>)>,
}

impl Default for ActorSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl ActorSystem {
    pub fn new() -> Self {
        Self::with_config(SluiceConfig::default())
    }

    pub fn with_config(config: SluiceConfig) -> Self {
        ActorSystem {
            config,
            next_id: 0,
            actors: Vec::new(),
        }
    }

    pub fn config(&self) -> &SluiceConfig {
        &self.config
    }

    fn next_actor_id(&mut self) -> ActorId {
        self.next_id += 1;
        ActorId(self.next_id)
    }

    /// Starts `actor` on its own task and returns its handle.
    pub fn spawn<A: Actor + 'static>(&mut self, name: &str, actor: A) -> ActorRef {
        let (tx, rx) = unbounded_channel();
        let actor_ref = ActorRef::new(self.next_actor_id(), name, tx);
        info!(actor = name; "Spawning actor {}", actor_ref.id());
        let ctx = ActorContext::new(actor_ref.clone(), self.config.stream.clone());
        let credit_round = Duration::from_millis(self.config.stream.credit_round_interval_ms);
        let handle = tokio::spawn(actor_cell::run(actor, ctx, rx, credit_round));
        self.actors.retain(|(_, h)| !h.is_finished());
        self.actors.push((actor_ref.clone(), handle));
        actor_ref
    }

    /// A bare mailbox with an actor identity, for driving actors from outside.
    pub fn probe(&mut self, name: &str) -> (ActorRef, UnboundedReceiver<Envelope>) {
        let (tx, rx) = unbounded_channel();
        (ActorRef::new(self.next_actor_id(), name, tx), rx)
    }

    /// Terminates `actor` without waiting for its streams.
    pub fn kill(&self, actor: &ActorRef) -> ActorResult<()> {
        self.exit(actor, ExitReason::Kill)
    }

    /// Asks `actor` to finish its streams and exit.
    pub fn stop(&self, actor: &ActorRef) -> ActorResult<()> {
        self.exit(actor, ExitReason::UserShutdown)
    }

    fn exit(&self, actor: &ActorRef, reason: ExitReason) -> ActorResult<()> {
        if actor.send(None, Message::Exit { reason }) {
            Ok(())
        } else {
            Err(ActorError::ActorNotFound { id: actor.id() })
        }
    }

    pub fn count_actors(&self) -> usize {
        self.actors.iter().filter(|(a, _)| a.is_alive()).count()
    }

    /// Stops every actor gracefully and waits for them.
    ///
    /// Fails with [`ActorError::ShutdownTimeout`] if `shutdown_timeout_ms` is set and exceeded.
    /// Actors still running at that point are aborted.
    pub async fn stop_system(&mut self) -> ActorResult<()> {
        info!(actor = "system"; "Stopping {} actors", self.actors.len());
        for (actor, _) in &self.actors {
            let _ = self.stop(actor);
        }
        let handles: Vec<JoinHandle<()>> = self.actors.drain(..).map(|(_, h)| h).collect();
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        let join_all = async move {
            for handle in handles {
                let _ = handle.await;
            }
        };
        match self.config.actor_system.shutdown_timeout_ms {
            Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), join_all).await {
                Ok(()) => Ok(()),
                Err(_) => {
                    warn!(actor = "system"; "Shutdown timed out after {} ms", ms);
                    aborts.iter().for_each(|h| h.abort());
                    Err(ActorError::ShutdownTimeout)
                }
            },
            None => {
                join_all.await;
                Ok(())
            }
        }
    }
}

// grcov-excl-stop
