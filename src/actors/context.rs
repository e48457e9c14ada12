use std::any::Any;

use log::{debug, info};

use super::actor_ref::ActorRef;
use super::messages::{ExitReason, Message};
use crate::config::StreamConfig;
use crate::streaming::error::StreamError;
use crate::streaming::host::StreamHost;
use crate::streaming::stream_message::Payload;

#[derive(PartialEq, Debug, Copy, Clone)]
pub enum ActorState {
    Started,
    Running,
    /// Waiting for streams to drain before exiting.
    Stopping,
    Stopped,
}

/// Everything an actor can reach from inside its handlers.
pub struct ActorContext {
    self_ref: ActorRef,
    streams: StreamHost,
    state: ActorState,
    exit_reason: Option<ExitReason>,
    watchers: Vec<ActorRef>,
}

impl ActorContext {
    pub(super) fn new(self_ref: ActorRef, config: StreamConfig) -> Self {
        Self {
            streams: StreamHost::new(self_ref.clone(), config),
            self_ref,
            state: ActorState::Started,
            exit_reason: None,
            watchers: Vec::new(),
        }
    }

    pub fn self_ref(&self) -> &ActorRef {
        &self.self_ref
    }

    pub fn name(&self) -> &str {
        self.self_ref.name()
    }

    pub fn state(&self) -> ActorState {
        self.state
    }

    pub fn streams(&self) -> &StreamHost {
        &self.streams
    }

    pub fn streams_mut(&mut self) -> &mut StreamHost {
        &mut self.streams
    }

    /// Sends a user message to `to`, with this actor as sender.
    pub fn send<T: Any + Send>(&self, to: &ActorRef, value: T) -> bool {
        to.send(Some(&self.self_ref), Message::User(Payload::new(value)))
    }

    /// Asks `peer` to report its termination with `Down`.
    pub fn monitor(&self, peer: &ActorRef) {
        if peer.id() == self.self_ref.id() {
            return;
        }
        let monitor = Message::Monitor {
            watcher: self.self_ref.clone(),
        };
        if !peer.send(Some(&self.self_ref), monitor) {
            debug!(actor = self.name(); "Monitored actor {} is already gone", peer.id());
            self.self_ref.send(
                None,
                Message::Down {
                    actor: peer.id(),
                    reason: ExitReason::Error("unreachable".to_string()),
                },
            );
        }
    }

    /// Terminates the actor.
    ///
    /// A graceful reason shuts every stream down and keeps the actor alive until they drained.
    /// Any other reason aborts the streams and exits right away.
    pub fn quit(&mut self, reason: ExitReason) {
        if self.exit_reason.is_some() && reason.is_graceful() {
            return;
        }
        info!(actor = self.name(); "Quitting: {}", reason);
        if reason.is_graceful() {
            self.streams.shutdown_all();
        } else {
            self.streams.abort_all(StreamError::ActorExited {
                reason: reason.clone(),
            });
        }
        self.exit_reason = Some(reason);
        self.state = ActorState::Stopping;
    }

    pub fn exit_reason(&self) -> Option<&ExitReason> {
        self.exit_reason.as_ref()
    }

    pub(super) fn set_running(&mut self) {
        if self.state == ActorState::Started {
            self.state = ActorState::Running;
        }
    }

    /// True once the run loop may exit.
    pub(super) fn finished(&mut self) -> bool {
        if self.state == ActorState::Stopped {
            return true;
        }
        let ready = match &self.exit_reason {
            Some(reason) => !reason.is_graceful() || self.streams.is_empty(),
            None => false,
        };
        if ready {
            self.state = ActorState::Stopped;
        }
        ready
    }

    pub(super) fn add_watcher(&mut self, watcher: ActorRef) {
        if !self.watchers.contains(&watcher) {
            self.watchers.push(watcher);
        }
    }

    pub(super) fn take_watchers(&mut self) -> Vec<ActorRef> {
        std::mem::take(&mut self.watchers)
    }
}
