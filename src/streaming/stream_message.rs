use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::marker::PhantomData;

use crate::actors::actor_ref::{ActorId, ActorRef};

use super::error::{StreamError, StreamResult};
use super::priority::StreamPriority;
use super::stream_slot::{StreamId, StreamSlot, StreamSlots};

/// A type-erased value. Batches, handshake data and user messages travel as payloads.
pub struct Payload {
    value: Box<dyn Any + Send>,
    type_id: TypeId,
    type_name: &'static str,
}

impl Payload {
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self {
            value: Box::new(value),
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<T: Any>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Recovers the concrete value, handing the payload back untouched on a type mismatch.
    pub fn downcast<T: Any>(self) -> Result<T, Payload> {
        if !self.is::<T>() {
            return Err(self);
        }
        let Payload {
            value,
            type_id,
            type_name,
        } = self;
        match value.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(value) => Err(Payload {
                value,
                type_id,
                type_name,
            }),
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload<{}>", self.type_name)
    }
}

/// Runtime tag for the element type of a stream. Batches of a stream with element type `T`
/// carry a `Vec<T>`.
#[derive(Debug, Clone, Copy)]
pub struct ElementType {
    batch_id: TypeId,
    name: &'static str,
}

impl ElementType {
    pub fn of<T: Any>() -> Self {
        Self {
            batch_id: TypeId::of::<Vec<T>>(),
            name: type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether `batch` holds a `Vec` of this element type.
    pub fn matches(&self, batch: &Payload) -> bool {
        self.batch_id == batch.type_id
    }
}

impl PartialEq for ElementType {
    fn eq(&self, other: &Self) -> bool {
        self.batch_id == other.batch_id
    }
}

impl Eq for ElementType {}

/// Arguments for opening an outbound path.
#[derive(Debug, Default)]
pub struct Handshake {
    pub payload: Option<Payload>,
    pub priority: StreamPriority,
    pub redeployable: bool,
    /// Actor that receives the final result of the stream.
    pub requester: Option<ActorRef>,
}

impl Handshake {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payload<T: Any + Send>(mut self, payload: T) -> Self {
        self.payload = Some(Payload::new(payload));
        self
    }

    pub fn with_priority(mut self, priority: StreamPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn redeployable(mut self, redeployable: bool) -> Self {
        self.redeployable = redeployable;
        self
    }

    pub fn with_requester(mut self, requester: ActorRef) -> Self {
        self.requester = Some(requester);
        self
    }
}

/// First message of a stream, sent from the producer to the next stage.
#[derive(Debug)]
pub struct OpenStreamMsg {
    /// Outbound slot on `prev_stage`.
    pub slot: StreamSlot,
    pub stream_id: StreamId,
    pub element_type: ElementType,
    pub handshake: Option<Payload>,
    pub prev_stage: ActorRef,
    pub original_stage: ActorRef,
    /// Actor the `open` was addressed to. Another actor may answer in its place.
    pub dest: ActorId,
    pub priority: StreamPriority,
    pub redeployable: bool,
    pub requester: Option<ActorRef>,
}

impl OpenStreamMsg {
    pub fn carries<T: Any>(&self) -> bool {
        self.element_type == ElementType::of::<T>()
    }

    pub fn handshake_ref<H: Any>(&self) -> Option<&H> {
        self.handshake.as_ref().and_then(|p| p.downcast_ref::<H>())
    }

    /// Typed handle for accepting this stream as a sink or stage of `T`.
    pub fn stream<T: Any + Send>(&self) -> StreamResult<Stream<T>> {
        if !self.carries::<T>() {
            return Err(StreamError::UnexpectedBatchType {
                expected: type_name::<T>().to_string(),
                actual: self.element_type.name().to_string(),
            });
        }
        Ok(Stream {
            slot: self.slot,
            stream_id: self.stream_id,
            prev_stage: self.prev_stage.clone(),
            original_stage: self.original_stage.clone(),
            rebind_from: self.dest,
            priority: self.priority,
            redeployable: self.redeployable,
            requester: self.requester.clone(),
            _element: PhantomData,
        })
    }
}

/// Typed view of an incoming stream, consumed by the attach helpers.
#[derive(Debug)]
pub struct Stream<T> {
    pub slot: StreamSlot,
    pub stream_id: StreamId,
    pub prev_stage: ActorRef,
    pub original_stage: ActorRef,
    pub rebind_from: ActorId,
    pub priority: StreamPriority,
    pub redeployable: bool,
    pub requester: Option<ActorRef>,
    _element: PhantomData<fn() -> T>,
}

#[derive(Debug)]
pub enum StreamMessage {
    Open(OpenStreamMsg),
    Upstream(UpstreamMsg),
    Downstream(DownstreamMsg),
}

/// Control message travelling against the data flow.
#[derive(Debug)]
pub struct UpstreamMsg {
    pub slots: StreamSlots,
    pub stream_id: StreamId,
    pub sender: ActorRef,
    pub content: UpstreamContent,
}

#[derive(Debug)]
pub enum UpstreamContent {
    AckOpen(AckOpen),
    AckBatch(AckBatch),
    /// Graceful detach requested by the consumer.
    Drop,
    ForcedDrop { reason: StreamError },
}

#[derive(Debug, Clone)]
pub struct AckOpen {
    pub rebind_from: ActorId,
    pub initial_credit: usize,
    pub max_capacity: usize,
    pub desired_batch_size: usize,
    pub redeployable: bool,
}

#[derive(Debug, Clone)]
pub struct AckBatch {
    /// Credit added on top of what the producer still holds.
    pub new_capacity: usize,
    pub max_capacity: usize,
    pub desired_batch_size: usize,
    /// Every batch with an id below this value was consumed.
    pub acknowledged_id: u64,
}

/// Message travelling with the data flow.
#[derive(Debug)]
pub struct DownstreamMsg {
    pub slots: StreamSlots,
    pub stream_id: StreamId,
    pub sender: ActorRef,
    pub content: DownstreamContent,
}

#[derive(Debug)]
pub enum DownstreamContent {
    Batch(Batch),
    Close,
    ForcedClose { reason: StreamError },
}

#[derive(Debug)]
pub struct Batch {
    pub xs_size: usize,
    pub xs: Payload,
    pub id: u64,
}

impl UpstreamContent {
    pub fn name(&self) -> &'static str {
        match self {
            UpstreamContent::AckOpen(_) => "ack_open",
            UpstreamContent::AckBatch(_) => "ack_batch",
            UpstreamContent::Drop => "drop",
            UpstreamContent::ForcedDrop { .. } => "forced_drop",
        }
    }
}

impl DownstreamContent {
    pub fn name(&self) -> &'static str {
        match self {
            DownstreamContent::Batch(_) => "batch",
            DownstreamContent::Close => "close",
            DownstreamContent::ForcedClose { .. } => "forced_close",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_downcast() {
        let payload = Payload::new(vec![1, 2, 3]);
        assert!(payload.is::<Vec<i32>>());
        assert_eq!(payload.downcast_ref::<Vec<i32>>().map(|v| v.len()), Some(3));
        let payload = payload.downcast::<String>().unwrap_err();
        assert_eq!(payload.downcast::<Vec<i32>>().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_element_type_matches_batches() {
        let ints = ElementType::of::<i32>();
        assert!(ints.matches(&Payload::new(vec![1i32])));
        assert!(!ints.matches(&Payload::new(vec!["x".to_string()])));
        assert!(!ints.matches(&Payload::new(1i32)));
        assert_eq!(ints, ElementType::of::<i32>());
        assert_ne!(ints, ElementType::of::<u32>());
    }
}
