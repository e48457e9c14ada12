use std::fmt;

use super::actor_ref::ActorId;

/// Errors that can occur in the actor system
#[derive(Debug, Clone, PartialEq)]
pub enum ActorError {
    /// Actor with the specified ID was not found
    ActorNotFound { id: ActorId },
    /// Failed to send a message to an actor
    SendFailed { reason: String },
    /// Actor system shutdown timeout
    ShutdownTimeout,
}

impl fmt::Display for ActorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActorError::ActorNotFound { id } => {
                write!(f, "Actor with ID {} not found", id)
            }
            ActorError::SendFailed { reason } => {
                write!(f, "Failed to send message: {}", reason)
            }
            ActorError::ShutdownTimeout => {
                write!(f, "Actor system shutdown timed out")
            }
        }
    }
}

impl std::error::Error for ActorError {}

/// Result type for actor operations
pub type ActorResult<T> = Result<T, ActorError>;
