//! Credit-based streaming between actors.
//!
//! A stream runs from a source through any number of stages into sinks. Every hop is a path
//! between two actors; consumers hand out credit and producers never send more elements than
//! they were granted.

pub mod attach;
pub mod broadcast;
pub mod credit;
pub mod downstream_manager;
pub mod driver;
pub mod error;
pub mod fused;
pub mod host;
pub mod inbound_path;
pub mod manager;
pub mod outbound_path;
pub mod path_state;
pub mod priority;
pub mod sink;
pub mod slot_table;
pub mod source;
pub mod stage;
pub mod stream_message;
pub mod stream_slot;

pub use attach::{
    add_inbound_path, add_outbound_path, attach_continuous_stream_stage, attach_multiplexer,
    attach_stream_sink, attach_stream_source, attach_stream_source_with, attach_stream_stage,
    attach_stream_stage_with,
};
pub use broadcast::{BroadcastDownstreamManager, Select, SelectAll, SelectWith};
pub use downstream_manager::{BufferedDownstreamManager, Downstream, DownstreamManager};
pub use driver::{batch_sink_fn, sink_fn, source_fn, stage_fn, SinkDriver, SourceDriver, StageDriver};
pub use error::{StreamError, StreamResult};
pub use fused::FusedDownstreamManager;
pub use manager::{ManagerStatus, StreamManager};
pub use priority::StreamPriority;
pub use slot_table::ManagerHandle;
pub use stream_message::{Handshake, OpenStreamMsg, Payload, Stream};
pub use stream_slot::{StreamId, StreamSlot, StreamSlots};
