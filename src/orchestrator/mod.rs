//! Orchestrator Module
//!
//! Per-request coordination: prompt composition from the persona and the
//! client's recent thoughts, and the session state machine that ties
//! admission, forwarding and history together.

pub mod persona;
pub mod session;

pub use persona::{Persona, FALLBACK_THOUGHTS, LEAD_INS, PERSONA_PROMPT};
pub use session::{SessionOrchestrator, SessionOutcome};
