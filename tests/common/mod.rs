//! Shared harness: a real router on an ephemeral port, backed by a mock Ollama.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use thought_stream::agent::{GenerationBackend, OllamaBackend};
use thought_stream::memory::ClientStateStore;
use thought_stream::{router, AppState, RelayConfig};

pub const LOCAL_CLIENT: &str = "127.0.0.1";

pub struct TestApp {
    pub addr: SocketAddr,
    pub state: AppState,
    pub http: reqwest::Client,
}

impl TestApp {
    pub fn url(&self, route: &str) -> String {
        format!("http://{}{}", self.addr, route)
    }

    pub async fn request_thought(&self) -> reqwest::Response {
        self.http
            .post(self.url("/thought"))
            .send()
            .await
            .expect("thought request failed")
    }

    pub async fn history(&self) -> Vec<String> {
        self.state.orchestrator.store().history(LOCAL_CLIENT).await
    }
}

fn test_config(ollama_url: &str, min_interval: Duration) -> RelayConfig {
    RelayConfig {
        port: 0,
        ollama_host: ollama_url.to_string(),
        model: "test-model".to_string(),
        public_dir: PathBuf::from("public"),
        min_interval,
        ..RelayConfig::default()
    }
}

pub async fn spawn_app(ollama_url: &str, min_interval: Duration) -> TestApp {
    let config = test_config(ollama_url, min_interval);
    let backend = Arc::new(OllamaBackend::new(config.ollama_host.clone(), config.model.clone()));
    serve(config, backend).await
}

/// Same router, but generation comes from `backend` instead of HTTP.
pub async fn spawn_app_with_backend(backend: Arc<dyn GenerationBackend>, min_interval: Duration) -> TestApp {
    serve(test_config("http://127.0.0.1:9", min_interval), backend).await
}

async fn serve(config: RelayConfig, backend: Arc<dyn GenerationBackend>) -> TestApp {
    let store = Arc::new(ClientStateStore::new(config.retention));
    let state = AppState::new(&config, backend, store);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    let app = router(state.clone(), &config.public_dir);
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .expect("test server crashed");
    });

    TestApp {
        addr,
        state,
        http: reqwest::Client::new(),
    }
}

/// NDJSON body as `/api/generate` streams it.
pub fn ndjson(records: &[Value]) -> String {
    records.iter().map(|r| format!("{}\n", r)).collect()
}

pub fn generate_response(records: &[Value]) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(ndjson(records), "application/x-ndjson")
}

/// Mounts one `/api/generate` answer, served at most `times` times.
pub async fn mount_generate(server: &MockServer, response: ResponseTemplate, times: u64) {
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(response)
        .up_to_n_times(times)
        .mount(server)
        .await;
}

/// `data:` payloads of an SSE body, in order.
pub fn sse_data(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| data.trim_start().to_string())
        .collect()
}

/// Concatenates the `char` events.
pub fn relayed_text(data: &[String]) -> String {
    data.iter()
        .filter_map(|d| serde_json::from_str::<Value>(d).ok())
        .filter_map(|v| v.get("char").and_then(Value::as_str).map(str::to_string))
        .collect()
}
