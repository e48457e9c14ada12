use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use log::trace;
use tokio::sync::mpsc::UnboundedSender;

use super::messages::{Envelope, Message};
use crate::streaming::stream_message::Payload;

/// Identifier of an actor, unique within its actor system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(pub u64);

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Cloneable handle to an actor's mailbox.
///
/// Sending never blocks. A send to a terminated actor is silently lost and reported as `false`.
#[derive(Clone)]
pub struct ActorRef {
    id: ActorId,
    name: Arc<str>,
    sender: UnboundedSender<Envelope>,
}

impl ActorRef {
    pub(crate) fn new(id: ActorId, name: &str, sender: UnboundedSender<Envelope>) -> Self {
        Self {
            id,
            name: Arc::from(name),
            sender,
        }
    }

    pub fn id(&self) -> ActorId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn send(&self, from: Option<&ActorRef>, message: Message) -> bool {
        let envelope = Envelope {
            from: from.cloned(),
            message,
        };
        match self.sender.send(envelope) {
            Ok(()) => true,
            Err(_) => {
                trace!(actor = self.name(); "Mailbox of {} is closed", self.id);
                false
            }
        }
    }

    /// Sends a user message without sender.
    pub fn tell<T: std::any::Any + Send>(&self, value: T) -> bool {
        self.send(None, Message::User(Payload::new(value)))
    }

    pub fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }
}

impl fmt::Debug for ActorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActorRef({}, {})", self.id, self.name)
    }
}

impl PartialEq for ActorRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ActorRef {}

impl Hash for ActorRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

// grcov-excl-stop
