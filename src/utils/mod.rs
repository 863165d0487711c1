//! Utils Module
pub mod telemetry;
pub mod truncate;

pub use truncate::{first_words, preview};
