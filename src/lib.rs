//! Thought Stream
//!
//! An SSE relay that asks a local Ollama model for short "thoughts" and
//! streams them to browsers one character at a time, with:
//! - Per-client admission control
//! - Short per-client memory of recent thoughts
//! - Repetition-loop detection and truncation
//! - Canned fallbacks when the backend fails

pub mod agent;
pub mod config;
pub mod error;
pub mod memory;
pub mod orchestrator;
pub mod safety;
pub mod server;
pub mod utils;

// Re-exports for convenience
pub use agent::{GenerationBackend, OllamaBackend, StreamForwarder};
pub use config::RelayConfig;
pub use error::{RelayError, RelayResult};
pub use memory::ClientStateStore;
pub use orchestrator::{SessionOrchestrator, SessionOutcome};
pub use server::{router, run_server, AppState};
