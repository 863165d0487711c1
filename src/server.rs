use axum::{
    extract::{ConnectInfo, Json, State},
    http::{header, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Router,
};
use anyhow::Result;
use futures::StreamExt;
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::{info, info_span, Instrument};

use crate::agent::{ChannelSink, GenerationBackend, RelayEvent, StreamForwarder};
use crate::config::RelayConfig;
use crate::memory::ClientStateStore;
use crate::orchestrator::{Persona, SessionOrchestrator, SessionOutcome};
use crate::safety::{Admission, AdmissionController};

/// Events buffered between the relay task and the SSE body.
const EVENT_BUFFER: usize = 256;

pub enum ServerError {
    RateLimited { retry_after_secs: u64 },
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        match self {
            ServerError::RateLimited { retry_after_secs } => {
                let body = Json(serde_json::json!({
                    "error": "Rate limit exceeded",
                    "message": format!(
                        "Please wait {} seconds before requesting another thought.",
                        retry_after_secs
                    ),
                }));
                let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
                if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
                response
            }
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SessionOrchestrator>,
    pub ollama_host: String,
    pub model: String,
}

impl AppState {
    /// Wires store, admission, forwarder and persona around `backend`.
    pub fn new(config: &RelayConfig, backend: Arc<dyn GenerationBackend>, store: Arc<ClientStateStore>) -> Self {
        let orchestrator = SessionOrchestrator::new(
            store.clone(),
            AdmissionController::with_interval(store, config.min_interval),
            StreamForwarder::with_config(backend, config.forwarder),
            Persona::default(),
        );
        Self {
            orchestrator: Arc::new(orchestrator),
            ollama_host: config.ollama_host.clone(),
            model: config.model.clone(),
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
    ollama: String,
    model: String,
}

pub fn router(state: AppState, public_dir: &Path) -> Router {
    Router::new()
        .route("/thought", post(thought_handler))
        .route("/health", get(health_handler))
        .fallback_service(ServeDir::new(public_dir))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Serves until `shutdown` fires.
pub async fn run_server(config: &RelayConfig, state: AppState, shutdown: CancellationToken) -> Result<()> {
    let app = router(state, &config.public_dir);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("🚀 Thought stream server running on http://{}", addr);
    info!("Rate limit: {}ms per client", config.min_interval.as_millis());

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: chrono::Utc::now().to_rfc3339(),
        ollama: state.ollama_host.clone(),
        model: state.model.clone(),
    })
}

async fn thought_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Result<Response, ServerError> {
    let client = addr.ip().to_string();

    if let Admission::Denied { retry_after_secs } = state.orchestrator.admit(&client, Instant::now()).await {
        info!("Rate limited {} for {}s", client, retry_after_secs);
        return Err(ServerError::RateLimited { retry_after_secs });
    }

    let (tx, rx) = mpsc::channel::<RelayEvent>(EVENT_BUFFER);
    let span = info_span!("thought", client = %client, session = %uuid::Uuid::new_v4());
    let orchestrator = state.orchestrator.clone();

    tokio::spawn(
        async move {
            let cancel = CancellationToken::new();

            // The SSE body drops its receiver when the client goes away.
            let disconnect = {
                let tx = tx.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = tx.closed() => cancel.cancel(),
                        _ = cancel.cancelled() => {}
                    }
                })
            };

            let mut sink = ChannelSink::new(tx);
            let outcome = orchestrator.run(&client, &mut sink, cancel).await;
            disconnect.abort();

            match outcome {
                SessionOutcome::Completed { .. } => {}
                SessionOutcome::Truncated { prefix } => {
                    info!("Loop truncated; history reset (kept {} chars)", prefix.chars().count())
                }
                SessionOutcome::Cancelled { reason } => info!("Stream cancelled: {:?}", reason),
                SessionOutcome::Failed { fallback, .. } => info!("Fallback sent: \"{}\"", fallback),
            }
        }
        .instrument(span),
    );

    let events = ReceiverStream::new(rx)
        .map(|event| Ok::<_, Infallible>(Event::default().data(event.to_sse_data())));

    Ok(Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response())
}
