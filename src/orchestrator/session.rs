//! Session Orchestrator
//!
//! Drives one `/thought` request from admission to the terminal marker:
//! compose the prompt, relay the stream, then update (or reset) the client's
//! history depending on how the stream ended.

use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::persona::Persona;
use crate::agent::{
    CancelReason, EventSink, ForwardOutcome, GenerationOptions, RelayEvent, StreamForwarder,
};
use crate::memory::ClientStateStore;
use crate::safety::{Admission, AdmissionController};

/// Terminal state of one streaming session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Stream finished; the trimmed thought was stored.
    Completed { thought: String },
    /// A repetition loop cut the stream short; the client's history was reset.
    Truncated { prefix: String },
    /// Client went away or the backend stalled past the deadline.
    Cancelled { reason: CancelReason },
    /// Backend failure; `fallback` was streamed instead.
    Failed { error: String, fallback: String },
}

pub struct SessionOrchestrator {
    store: Arc<ClientStateStore>,
    admission: AdmissionController,
    forwarder: StreamForwarder,
    persona: Persona,
}

impl SessionOrchestrator {
    pub fn new(
        store: Arc<ClientStateStore>,
        admission: AdmissionController,
        forwarder: StreamForwarder,
        persona: Persona,
    ) -> Self {
        Self {
            store,
            admission,
            forwarder,
            persona,
        }
    }

    pub fn store(&self) -> &Arc<ClientStateStore> {
        &self.store
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    /// Admission gate; must pass before `run` is called.
    pub async fn admit(&self, client: &str, now: Instant) -> Admission {
        self.admission.check_and_record(client, now).await
    }

    /// Streams one thought for `client` into `sink`.
    ///
    /// Every path except client disconnect ends with a `Done` event.
    pub async fn run<S>(&self, client: &str, sink: &mut S, cancel: CancellationToken) -> SessionOutcome
    where
        S: EventSink + ?Sized,
    {
        let history = self.store.history(client).await;
        let (prompt, options) = {
            let mut rng = rand::thread_rng();
            let lead_in = self.persona.pick_lead_in(&mut rng);
            (
                self.persona.compose_prompt(&history, lead_in),
                GenerationOptions::randomized(&mut rng),
            )
        };
        debug!(
            "Prompt ready: {} chars, {} prior thoughts, budget {}",
            prompt.chars().count(),
            history.len(),
            options.num_predict
        );

        match self.forwarder.forward(&prompt, &options, sink, &cancel).await {
            Ok(ForwardOutcome::Completed { text }) => {
                let thought = text.trim().to_string();
                let now = Instant::now();
                if thought.is_empty() {
                    self.store.touch(client, now).await;
                } else {
                    self.store.append_history(client, thought.clone(), now).await;
                }
                self.finish(sink, &cancel).await;
                info!("Thought complete ({} chars)", thought.chars().count());
                SessionOutcome::Completed { thought }
            }
            Ok(ForwardOutcome::Truncated { text }) => {
                // Keep the loop from seeding the next prompt.
                self.store.clear_history(client).await;
                self.finish(sink, &cancel).await;
                SessionOutcome::Truncated { prefix: text }
            }
            Ok(ForwardOutcome::Cancelled { reason, .. }) => {
                if reason == CancelReason::TimedOut {
                    // The client is still connected; close its stream cleanly.
                    self.finish(sink, &cancel).await;
                }
                SessionOutcome::Cancelled { reason }
            }
            Err(e) => {
                error!("Generation failed: {}", e);
                let fallback = {
                    let mut rng = rand::thread_rng();
                    self.persona.pick_fallback(&mut rng).to_string()
                };
                self.stream_fallback(sink, &cancel, &e.to_string(), &fallback).await;
                SessionOutcome::Failed {
                    error: e.to_string(),
                    fallback,
                }
            }
        }
    }

    /// Error notice, fallback text in the normal per-character shape, then `Done`.
    async fn stream_fallback<S>(&self, sink: &mut S, cancel: &CancellationToken, message: &str, fallback: &str)
    where
        S: EventSink + ?Sized,
    {
        let events = std::iter::once(RelayEvent::Error {
            message: message.to_string(),
        })
        .chain(fallback.chars().map(RelayEvent::Char))
        .chain(std::iter::once(RelayEvent::Done));

        for event in events {
            if cancel.is_cancelled() || sink.send(event).await.is_err() {
                debug!("Client left while the fallback was streaming");
                return;
            }
        }
    }

    async fn finish<S>(&self, sink: &mut S, cancel: &CancellationToken)
    where
        S: EventSink + ?Sized,
    {
        if cancel.is_cancelled() {
            return;
        }
        if sink.send(RelayEvent::Done).await.is_err() {
            debug!("Client left before the terminal marker");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{ChunkStream, GenerateChunk, GenerationBackend, SinkClosed};
    use crate::error::{RelayError, RelayResult};
    use async_trait::async_trait;
    use futures::{stream, StreamExt};

    enum Script {
        Text(&'static str),
        /// Sends the text, then never finishes.
        Stall(&'static str),
        Fail,
    }

    struct FixedBackend(Script);

    #[async_trait]
    impl GenerationBackend for FixedBackend {
        async fn generate_stream(
            &self,
            _prompt: &str,
            _options: &GenerationOptions,
            _cancel: CancellationToken,
        ) -> RelayResult<ChunkStream> {
            match &self.0 {
                Script::Text(text) => {
                    let records = vec![
                        Ok(GenerateChunk { response: Some(text.to_string()), ..Default::default() }),
                        Ok(GenerateChunk { done: true, ..Default::default() }),
                    ];
                    Ok(stream::iter(records).boxed())
                }
                Script::Stall(text) => {
                    let first = Ok(GenerateChunk { response: Some(text.to_string()), ..Default::default() });
                    Ok(stream::iter(vec![first]).chain(stream::pending()).boxed())
                }
                Script::Fail => Err(RelayError::UpstreamStatus(reqwest::StatusCode::BAD_GATEWAY)),
            }
        }
    }

    #[derive(Default)]
    struct VecSink(Vec<RelayEvent>);

    #[async_trait]
    impl EventSink for VecSink {
        async fn send(&mut self, event: RelayEvent) -> Result<(), SinkClosed> {
            self.0.push(event);
            Ok(())
        }
    }

    /// Fires `cancel` once `limit` events have been accepted, like a browser
    /// closing the tab mid-thought.
    struct LeavingSink {
        events: Vec<RelayEvent>,
        limit: usize,
        cancel: CancellationToken,
    }

    #[async_trait]
    impl EventSink for LeavingSink {
        async fn send(&mut self, event: RelayEvent) -> Result<(), SinkClosed> {
            if self.events.len() >= self.limit {
                return Err(SinkClosed);
            }
            self.events.push(event);
            if self.events.len() == self.limit {
                self.cancel.cancel();
            }
            Ok(())
        }
    }

    fn orchestrator(script: Script) -> SessionOrchestrator {
        let store = Arc::new(ClientStateStore::default());
        SessionOrchestrator::new(
            store.clone(),
            AdmissionController::new(store),
            StreamForwarder::new(Arc::new(FixedBackend(script))),
            Persona::default(),
        )
    }

    #[tokio::test]
    async fn test_completion_stores_trimmed_thought_and_sends_done() {
        let orch = orchestrator(Script::Text("  a quiet spark  "));
        let mut sink = VecSink::default();

        let outcome = orch.run("c1", &mut sink, CancellationToken::new()).await;

        assert_eq!(outcome, SessionOutcome::Completed { thought: "a quiet spark".into() });
        assert_eq!(orch.store().history("c1").await, vec!["a quiet spark"]);
        assert_eq!(sink.0.last(), Some(&RelayEvent::Done));
    }

    #[tokio::test]
    async fn test_repetition_clears_history() {
        let orch = orchestrator(Script::Text(
            "echo of the same old song again and again echo of the same old song again and again \
             echo of the same old song again and again echo of the same old song again and again",
        ));
        orch.store().append_history("c1", "earlier thought", Instant::now()).await;
        let mut sink = VecSink::default();

        let outcome = orch.run("c1", &mut sink, CancellationToken::new()).await;

        assert!(matches!(outcome, SessionOutcome::Truncated { .. }));
        assert!(orch.store().history("c1").await.is_empty());
        assert_eq!(sink.0.last(), Some(&RelayEvent::Done));
    }

    #[tokio::test]
    async fn test_failure_streams_fallback() {
        let orch = orchestrator(Script::Fail);
        let mut sink = VecSink::default();

        let outcome = orch.run("c1", &mut sink, CancellationToken::new()).await;

        let SessionOutcome::Failed { fallback, .. } = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(orch.persona().fallbacks().contains(&fallback));
        assert!(matches!(sink.0.first(), Some(RelayEvent::Error { .. })));
        assert_eq!(sink.0.last(), Some(&RelayEvent::Done));
        let streamed: String = sink
            .0
            .iter()
            .filter_map(|e| match e {
                RelayEvent::Char(c) => Some(*c),
                _ => None,
            })
            .collect();
        assert_eq!(streamed, fallback);
        assert!(orch.store().history("c1").await.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_writes_nothing() {
        let orch = orchestrator(Script::Text("never relayed"));
        let mut sink = VecSink::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = orch.run("c1", &mut sink, cancel).await;

        assert_eq!(outcome, SessionOutcome::Cancelled { reason: CancelReason::Disconnected });
        assert!(sink.0.is_empty());
        assert!(orch.store().history("c1").await.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_mid_stream_leaves_history_untouched() {
        let orch = orchestrator(Script::Text("a slow thought that the reader never finishes"));
        orch.store().append_history("c1", "earlier thought", Instant::now()).await;
        let cancel = CancellationToken::new();
        let mut sink = LeavingSink {
            events: Vec::new(),
            limit: 5,
            cancel: cancel.clone(),
        };

        let outcome = orch.run("c1", &mut sink, cancel).await;

        assert_eq!(outcome, SessionOutcome::Cancelled { reason: CancelReason::Disconnected });
        assert_eq!(sink.events.len(), 5);
        assert!(sink.events.iter().all(|e| matches!(e, RelayEvent::Char(_))));
        assert_eq!(orch.store().history("c1").await, vec!["earlier thought"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_sends_done_and_keeps_history() {
        let orch = orchestrator(Script::Stall("half a"));
        orch.store().append_history("c1", "earlier thought", Instant::now()).await;
        let mut sink = VecSink::default();

        let outcome = orch.run("c1", &mut sink, CancellationToken::new()).await;

        assert_eq!(outcome, SessionOutcome::Cancelled { reason: CancelReason::TimedOut });
        let relayed: String = sink
            .0
            .iter()
            .filter_map(|e| match e {
                RelayEvent::Char(c) => Some(*c),
                _ => None,
            })
            .collect();
        assert_eq!(relayed, "half a");
        assert_eq!(sink.0.last(), Some(&RelayEvent::Done));
        assert_eq!(orch.store().history("c1").await, vec!["earlier thought"]);
    }

    #[tokio::test]
    async fn test_leaving_during_fallback_stops_quietly() {
        let orch = orchestrator(Script::Fail);
        let cancel = CancellationToken::new();
        let mut sink = LeavingSink {
            events: Vec::new(),
            limit: 3,
            cancel: cancel.clone(),
        };

        let outcome = orch.run("c1", &mut sink, cancel).await;

        assert!(matches!(outcome, SessionOutcome::Failed { .. }));
        assert_eq!(sink.events.len(), 3);
        assert!(!sink.events.contains(&RelayEvent::Done));
        assert!(orch.store().history("c1").await.is_empty());
    }
}
