//! Service configuration, read once at startup from the environment.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::agent::ForwarderConfig;
use crate::memory::{RetentionPolicy, SWEEP_INTERVAL};
use crate::safety::MIN_REQUEST_INTERVAL;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "qwen3:8b";
pub const DEFAULT_PUBLIC_DIR: &str = "public";

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub port: u16,
    pub ollama_host: String,
    pub model: String,
    /// Static assets served for any unmatched path.
    pub public_dir: PathBuf,
    pub min_interval: Duration,
    pub retention: RetentionPolicy,
    pub sweep_interval: Duration,
    pub forwarder: ForwarderConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            ollama_host: DEFAULT_OLLAMA_HOST.to_string(),
            model: DEFAULT_MODEL.to_string(),
            public_dir: PathBuf::from(DEFAULT_PUBLIC_DIR),
            min_interval: MIN_REQUEST_INTERVAL,
            retention: RetentionPolicy::for_interval(MIN_REQUEST_INTERVAL),
            sweep_interval: SWEEP_INTERVAL,
            forwarder: ForwarderConfig::default(),
        }
    }
}

impl RelayConfig {
    /// `PORT`, `OLLAMA_HOST`, `OLLAMA_MODEL` and `PUBLIC_DIR`, with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            port: parse_or("PORT", lookup("PORT"), defaults.port),
            ollama_host: lookup("OLLAMA_HOST")
                .filter(|v| !v.trim().is_empty())
                .map(|v| v.trim().trim_end_matches('/').to_string())
                .unwrap_or(defaults.ollama_host),
            model: lookup("OLLAMA_MODEL")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.model),
            public_dir: lookup("PUBLIC_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.public_dir),
            ..defaults
        }
    }
}

fn parse_or<T: FromStr + Copy + std::fmt::Display>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid {}='{}', using {}", key, raw, default);
            default
        }),
    }
}
