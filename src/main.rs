//! Thought Stream server entry point.

use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use thought_stream::agent::OllamaBackend;
use thought_stream::memory::{spawn_sweeper, ClientStateStore};
use thought_stream::utils::telemetry::init_tracing;
use thought_stream::{run_server, AppState, RelayConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = RelayConfig::from_env();
    info!("Model: {} via {}", config.model, config.ollama_host);

    let backend = Arc::new(OllamaBackend::new(config.ollama_host.clone(), config.model.clone()));

    // Startup probe is advisory; the server runs either way.
    {
        let backend = backend.clone();
        tokio::spawn(async move {
            match backend.probe().await {
                Ok(found) if found.model_installed => {
                    info!("✅ Ollama reachable, model '{}' installed", backend.model())
                }
                Ok(found) => warn!(
                    "⚠️ Model '{}' not installed (available: {}). Run: ollama pull {}",
                    backend.model(),
                    found.models.join(", "),
                    backend.model()
                ),
                Err(e) => warn!("⚠️ Ollama not reachable at {}: {}", backend.base_url(), e),
            }
        });
    }

    let store = Arc::new(ClientStateStore::new(config.retention));
    let shutdown = CancellationToken::new();
    let sweeper = spawn_sweeper(store.clone(), config.sweep_interval, shutdown.clone());

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested");
            }
            shutdown.cancel();
        });
    }

    let state = AppState::new(&config, backend, store);
    let served = run_server(&config, state, shutdown.clone()).await;

    shutdown.cancel();
    let _ = sweeper.await;
    served
}
