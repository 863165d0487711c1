//! Safety Module
//!
//! Guardrails around generation: per-client admission control and detection
//! of degenerate, looping output.

mod admission;
pub mod repetition;

pub use admission::{Admission, AdmissionController, MIN_REQUEST_INTERVAL};
pub use repetition::is_repetitive;
