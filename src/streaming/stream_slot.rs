use std::fmt;

use crate::actors::actor_ref::ActorId;

/// Identifies one inbound or outbound path endpoint on a single actor.
pub type StreamSlot = u16;

/// Slot value that never names a path. Used as the receiver slot of an `open` message.
pub const INVALID_STREAM_SLOT: StreamSlot = 0;

/// The pair of slots naming both ends of a path.
///
/// `sender` is the slot on the actor that sent the message and `receiver` the slot on the actor
/// receiving it, so the pair flips when a message travels in the opposite direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StreamSlots {
    pub sender: StreamSlot,
    pub receiver: StreamSlot,
}

impl StreamSlots {
    pub const fn new(sender: StreamSlot, receiver: StreamSlot) -> Self {
        Self { sender, receiver }
    }

    pub const fn invert(self) -> Self {
        Self {
            sender: self.receiver,
            receiver: self.sender,
        }
    }
}

impl fmt::Display for StreamSlots {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.sender, self.receiver)
    }
}

/// Names one logical stream across its whole pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId {
    pub origin: ActorId,
    pub seq: u64,
}

impl StreamId {
    pub const fn new(origin: ActorId, seq: u64) -> Self {
        Self { origin, seq }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.origin, self.seq)
    }
}
