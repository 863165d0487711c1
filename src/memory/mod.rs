//! Memory System Module
//!
//! Short-lived, per-client state: admission timestamps and the last few
//! generated thoughts used to seed the next prompt. Nothing here outlives the
//! process.

pub mod client_store;
pub mod sweeper;

pub use client_store::{ClientStateStore, RetentionPolicy, StoreStats, SweepReport, HISTORY_CAPACITY};
pub use sweeper::{spawn_sweeper, SWEEP_INTERVAL};
