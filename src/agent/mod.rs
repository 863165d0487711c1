//! Agent Module
//!
//! Everything that talks to the inference backend: the backend client, the
//! NDJSON decoder, generation options and the forwarder that relays a stream
//! to a client sink.

mod forwarder;
pub mod ndjson;
pub mod options;
mod provider;
pub mod sink;

pub use forwarder::{CancelReason, ForwardOutcome, ForwarderConfig, StreamForwarder};
pub use ndjson::{ChunkStream, GenerateChunk};
pub use options::GenerationOptions;
pub use provider::{GenerationBackend, ModelAvailability, OllamaBackend};
pub use sink::{ChannelSink, EventSink, RelayEvent, SinkClosed, DONE_MARKER};
