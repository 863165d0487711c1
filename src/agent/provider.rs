use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Url};
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::ndjson::{decode_records, ChunkStream};
use super::options::GenerationOptions;
use crate::error::{RelayError, RelayResult};

/// A streaming text-generation service.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Opens a generation stream. The returned stream ends early once `cancel` fires.
    async fn generate_stream(
        &self,
        prompt: &str,
        options: &GenerationOptions,
        cancel: CancellationToken,
    ) -> RelayResult<ChunkStream>;
}

/// Whether the configured model is installed on the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelAvailability {
    pub model_installed: bool,
    pub models: Vec<String>,
}

/// Ollama `/api/generate` over HTTP.
pub struct OllamaBackend {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaBackend {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, prompt: &str, options: &GenerationOptions) -> serde_json::Value {
        json!({
            "model": self.model,
            "prompt": prompt,
            "stream": true,
            // Top-level switch; keeps thinking models from spending the budget on reasoning.
            "think": false,
            "options": options,
        })
    }

    /// Lists installed models and checks for the configured one.
    pub async fn probe(&self) -> RelayResult<ModelAvailability> {
        let url = Url::parse(&self.base_url)
            .map_err(|_| RelayError::InvalidBaseUrl(self.base_url.clone()))?;
        let host = url
            .host_str()
            .ok_or_else(|| RelayError::InvalidBaseUrl(self.base_url.clone()))?;
        let port = url.port_or_known_default().unwrap_or(11434);
        let ollama = ollama_rs::Ollama::new(format!("{}://{}", url.scheme(), host), port);

        let models: Vec<String> = ollama
            .list_local_models()
            .await
            .map_err(|e| RelayError::Upstream(e.to_string()))?
            .into_iter()
            .map(|m| m.name)
            .collect();

        Ok(ModelAvailability {
            model_installed: models.iter().any(|name| name == &self.model),
            models,
        })
    }
}

#[async_trait]
impl GenerationBackend for OllamaBackend {
    async fn generate_stream(
        &self,
        prompt: &str,
        options: &GenerationOptions,
        cancel: CancellationToken,
    ) -> RelayResult<ChunkStream> {
        let url = format!("{}/api/generate", self.base_url);
        debug!(
            "Calling {} with model {} ({} prompt chars, budget {})",
            url,
            self.model,
            prompt.chars().count(),
            options.num_predict
        );

        let resp = self
            .client
            .post(url)
            .json(&self.request_body(prompt, options))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(RelayError::UpstreamStatus(status));
        }

        let records = decode_records(resp.bytes_stream())
            .take_until(cancel.cancelled_owned())
            .boxed();
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ndjson(lines: &[serde_json::Value]) -> String {
        lines.iter().map(|l| format!("{l}\n")).collect()
    }

    #[tokio::test]
    async fn test_generate_stream_happy_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({
                "model": "qwen3:8b",
                "stream": true,
                "think": false,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                ndjson(&[
                    json!({"response": "Hi", "done": false}),
                    json!({"thinking": "secret", "response": "", "done": false}),
                    json!({"response": "!", "done": true}),
                ]),
                "application/x-ndjson",
            ))
            .mount(&server)
            .await;

        let backend = OllamaBackend::new(server.uri(), "qwen3:8b");
        let records: Vec<_> = backend
            .generate_stream("prompt", &GenerationOptions::default(), CancellationToken::new())
            .await
            .unwrap()
            .collect()
            .await;

        let text: String = records
            .iter()
            .filter_map(|r| r.as_ref().unwrap().text())
            .collect();
        assert_eq!(text, "Hi!");
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let backend = OllamaBackend::new(server.uri(), "qwen3:8b");
        let err = backend
            .generate_stream("prompt", &GenerationOptions::default(), CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RelayError::UpstreamStatus(s) if s.as_u16() == 503));
    }

    #[tokio::test]
    async fn test_unreachable_backend() {
        // Nothing listens on port 9 locally.
        let backend = OllamaBackend::new("http://127.0.0.1:9", "qwen3:8b");
        let err = backend
            .generate_stream("prompt", &GenerationOptions::default(), CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RelayError::UpstreamUnavailable(_)));
    }

    #[tokio::test]
    async fn test_cancelled_stream_ends() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                ndjson(&[json!({"response": "a"}), json!({"response": "b"})]),
                "application/x-ndjson",
            ))
            .mount(&server)
            .await;

        let backend = OllamaBackend::new(server.uri(), "qwen3:8b");
        let cancel = CancellationToken::new();
        let stream = backend
            .generate_stream("prompt", &GenerationOptions::default(), cancel.clone())
            .await
            .unwrap();
        cancel.cancel();
        let records: Vec<_> = stream.collect().await;
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_probe_finds_model() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                json!({
                    "models": [
                        {"name": "qwen3:8b", "modified_at": "2024-05-01T10:00:00Z", "size": 5_000_000_000u64},
                        {"name": "mistral:latest", "modified_at": "2024-05-01T10:00:00Z", "size": 4_000_000_000u64}
                    ]
                })
                .to_string(),
                "application/json",
            ))
            .mount(&server)
            .await;

        let backend = OllamaBackend::new(server.uri(), "qwen3:8b");
        let availability = backend.probe().await.unwrap();
        assert!(availability.model_installed);
        assert_eq!(availability.models.len(), 2);
    }
}
