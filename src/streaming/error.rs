use std::fmt;

use crate::actors::{actor_ref::ActorId, messages::ExitReason};

/// Errors produced by the streaming engine.
///
/// Errors travel between actors inside control messages, which is why the type is `Clone`.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamError {
    /// The receiving actor refused or failed to set up the stream
    StreamInitFailed,
    /// An operation was attempted in a state that does not allow it
    InvalidStreamState { reason: String },
    /// A batch carried elements of a type the receiver does not handle
    UnexpectedBatchType { expected: String, actual: String },
    /// A message named a slot or stream the receiver does not know
    UnknownStream,
    /// A path for the same stream and peer already exists
    DuplicatePath,
    /// The manager has no downstream to send to
    NoDownstream,
    /// User code reported a failure
    RuntimeError { reason: String },
    /// A peer of the stream terminated
    PeerDown { actor: ActorId, reason: ExitReason },
    /// The hosting actor terminated
    ActorExited { reason: ExitReason },
}

impl StreamError {
    pub fn runtime(reason: impl Into<String>) -> Self {
        StreamError::RuntimeError {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::StreamInitFailed => write!(f, "Stream initialization failed"),
            StreamError::InvalidStreamState { reason } => {
                write!(f, "Invalid stream state: {}", reason)
            }
            StreamError::UnexpectedBatchType { expected, actual } => {
                write!(f, "Unexpected batch type: expected {}, got {}", expected, actual)
            }
            StreamError::UnknownStream => write!(f, "Unknown stream"),
            StreamError::DuplicatePath => write!(f, "Path already exists"),
            StreamError::NoDownstream => write!(f, "No downstream available"),
            StreamError::RuntimeError { reason } => write!(f, "Stream runtime error: {}", reason),
            StreamError::PeerDown { actor, reason } => {
                write!(f, "Stream peer {} terminated: {}", actor, reason)
            }
            StreamError::ActorExited { reason } => {
                write!(f, "Hosting actor exited: {}", reason)
            }
        }
    }
}

impl std::error::Error for StreamError {}

pub type StreamResult<T> = Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = StreamError::UnexpectedBatchType {
            expected: "i32".to_string(),
            actual: "String".to_string(),
        };
        assert_eq!(err.to_string(), "Unexpected batch type: expected i32, got String");
        assert_eq!(
            StreamError::runtime("boom").to_string(),
            "Stream runtime error: boom"
        );
    }

    #[test]
    fn test_peer_down_mentions_actor() {
        let err = StreamError::PeerDown {
            actor: ActorId(9),
            reason: ExitReason::Kill,
        };
        assert!(err.to_string().contains("#9"));
    }
}
