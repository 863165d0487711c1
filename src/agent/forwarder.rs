//! Upstream Stream Forwarder
//!
//! Relays one backend generation to a client sink character by character.
//! A single cancellation token covers both client disconnect and the
//! wall-clock timeout; whichever fires first aborts the upstream request and
//! stops all further sink writes.

use futures::StreamExt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::options::GenerationOptions;
use super::provider::GenerationBackend;
use super::sink::{EventSink, RelayEvent};
use crate::error::{RelayError, RelayResult};
use crate::safety::is_repetitive;
use crate::utils::truncate::{first_words, preview};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwarderConfig {
    /// Upper bound on the whole forward call.
    pub timeout: Duration,
    /// Run the repetition detector after this many emitted characters.
    pub check_every: usize,
    /// Words kept when a loop is detected.
    pub truncate_words: usize,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            check_every: 50,
            truncate_words: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Disconnected,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// The backend finished normally.
    Completed { text: String },
    /// A repetition loop was found; `text` is the short pre-loop prefix.
    Truncated { text: String },
    /// Disconnect or timeout preempted completion. `text` is what was relayed.
    Cancelled { reason: CancelReason, text: String },
}

/// Per-request relay state.
#[derive(Debug, Default)]
struct StreamSession {
    transcript: String,
    chars_emitted: usize,
    loop_detected: bool,
}

impl StreamSession {
    fn transcript(&self) -> &str {
        &self.transcript
    }

    fn push(&mut self, c: char) {
        self.transcript.push(c);
        self.chars_emitted += 1;
    }

    fn mark_loop(&mut self, keep_words: usize) {
        self.loop_detected = true;
        self.transcript = first_words(&self.transcript, keep_words);
    }
}

pub struct StreamForwarder {
    backend: Arc<dyn GenerationBackend>,
    config: ForwarderConfig,
}

impl StreamForwarder {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self::with_config(backend, ForwarderConfig::default())
    }

    pub fn with_config(backend: Arc<dyn GenerationBackend>, config: ForwarderConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> ForwarderConfig {
        self.config
    }

    /// Streams one generation into `sink`.
    ///
    /// Returns `Err` only when the backend could not be reached, rejected the
    /// request, or broke mid-stream. Cancellation is an `Ok` outcome.
    pub async fn forward<S>(
        &self,
        prompt: &str,
        options: &GenerationOptions,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> RelayResult<ForwardOutcome>
    where
        S: EventSink + ?Sized,
    {
        // Fires on any exit, aborting the backend stream with it.
        let upstream = cancel.child_token();
        let _abort_upstream = upstream.clone().drop_guard();

        let deadline = tokio::time::sleep(self.config.timeout);
        tokio::pin!(deadline);

        let mut session = StreamSession::default();

        let opened = guarded(
            self.backend.generate_stream(prompt, options, upstream.clone()),
            cancel,
            deadline.as_mut(),
        )
        .await;
        let mut records = match opened {
            Ok(opened) => opened?,
            Err(reason) => return Ok(self.interrupted(session, reason, &upstream)),
        };

        let mut record_count = 0usize;
        'records: loop {
            let next = match guarded(records.next(), cancel, deadline.as_mut()).await {
                Ok(next) => next,
                Err(reason) => return Ok(self.interrupted(session, reason, &upstream)),
            };
            let Some(record) = next else { break };
            let record = record?;
            record_count += 1;

            if let Some(message) = &record.error {
                return Err(RelayError::Upstream(message.clone()));
            }

            if let Some(text) = record.text() {
                for c in text.chars() {
                    match guarded(sink.send(RelayEvent::Char(c)), cancel, deadline.as_mut()).await {
                        Ok(Ok(())) => {}
                        Ok(Err(_closed)) => {
                            cancel.cancel();
                            return Ok(self.interrupted(session, CancelReason::Disconnected, &upstream));
                        }
                        Err(reason) => return Ok(self.interrupted(session, reason, &upstream)),
                    }
                    session.push(c);

                    if session.chars_emitted % self.config.check_every.max(1) == 0
                        && is_repetitive(session.transcript())
                    {
                        upstream.cancel();
                        session.mark_loop(self.config.truncate_words);
                        break 'records;
                    }
                }
            }

            if record.done {
                debug!("Backend signalled completion");
                break;
            }
        }

        info!(
            "Relayed {} characters from {} records",
            session.chars_emitted, record_count
        );
        if session.chars_emitted == 0 {
            warn!("Backend finished without any relayable text");
        }

        // A loop in the tail may have started after the last periodic check.
        if !session.loop_detected && is_repetitive(session.transcript()) {
            session.mark_loop(self.config.truncate_words);
        }

        if session.loop_detected {
            warn!(
                "Repetition loop detected after {} characters; truncated to \"{}\"",
                session.chars_emitted,
                preview(session.transcript(), 80)
            );
            return Ok(ForwardOutcome::Truncated {
                text: session.transcript,
            });
        }

        debug!("Thought preview: \"{}\"", preview(session.transcript(), 80));
        Ok(ForwardOutcome::Completed {
            text: session.transcript,
        })
    }

    fn interrupted(
        &self,
        session: StreamSession,
        reason: CancelReason,
        upstream: &CancellationToken,
    ) -> ForwardOutcome {
        upstream.cancel();
        match reason {
            CancelReason::Disconnected => {
                info!("Client disconnected after {} characters", session.chars_emitted)
            }
            CancelReason::TimedOut => info!(
                "Stream timed out after {:?} ({} characters relayed)",
                self.config.timeout, session.chars_emitted
            ),
        }
        ForwardOutcome::Cancelled {
            reason,
            text: session.transcript,
        }
    }
}

/// Races `fut` against cancellation and the deadline. Cancellation wins ties,
/// so nothing is written once the token has fired.
async fn guarded<F: Future>(
    fut: F,
    cancel: &CancellationToken,
    deadline: Pin<&mut Sleep>,
) -> Result<F::Output, CancelReason> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CancelReason::Disconnected),
        _ = deadline => Err(CancelReason::TimedOut),
        out = fut => Ok(out),
    }
}
