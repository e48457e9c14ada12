use std::fmt;

use super::actor_ref::{ActorId, ActorRef};
use crate::streaming::error::StreamResult;
use crate::streaming::stream_message::{Payload, StreamMessage};
use crate::streaming::stream_slot::StreamId;

/// A message together with the actor that sent it, if any.
#[derive(Debug)]
pub struct Envelope {
    pub from: Option<ActorRef>,
    pub message: Message,
}

#[derive(Debug)]
pub enum Message {
    /// Application payload, handed to `Actor::receive`.
    User(Payload),
    /// Credit protocol traffic, handled by the actor's stream host.
    Stream(StreamMessage),
    /// Final outcome of a stream, sent to the requester named in the handshake.
    StreamResult {
        stream_id: StreamId,
        result: StreamResult<()>,
    },
    /// Asks the receiver to send `Down` to `watcher` once it terminates.
    Monitor { watcher: ActorRef },
    Down { actor: ActorId, reason: ExitReason },
    Exit { reason: ExitReason },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    Normal,
    UserShutdown,
    Kill,
    Error(String),
}

impl ExitReason {
    /// Graceful exits let running streams drain first.
    pub fn is_graceful(&self) -> bool {
        matches!(self, ExitReason::Normal | ExitReason::UserShutdown)
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Normal => write!(f, "normal"),
            ExitReason::UserShutdown => write!(f, "user shutdown"),
            ExitReason::Kill => write!(f, "killed"),
            ExitReason::Error(reason) => write!(f, "error: {}", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_reasons() {
        assert!(ExitReason::Normal.is_graceful());
        assert!(ExitReason::UserShutdown.is_graceful());
        assert!(!ExitReason::Kill.is_graceful());
        assert_eq!(ExitReason::Error("disk full".into()).to_string(), "error: disk full");
    }
}
