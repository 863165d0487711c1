//! Line-delimited JSON decoding for the backend's streaming body.

use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, Stream, StreamExt};
use serde::Deserialize;
use tracing::debug;

use crate::error::{RelayError, RelayResult};

/// One record of a streaming `/api/generate` response.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct GenerateChunk {
    /// Final-answer text increment; the only field relayed to clients.
    #[serde(default)]
    pub response: Option<String>,
    /// Internal reasoning of thinking models. Never forwarded.
    #[serde(default)]
    pub thinking: Option<String>,
    #[serde(default)]
    pub done: bool,
    /// Error reported by the backend after the stream started.
    #[serde(default)]
    pub error: Option<String>,
}

impl GenerateChunk {
    /// The relayable text increment, if it is non-empty.
    pub fn text(&self) -> Option<&str> {
        self.response.as_deref().filter(|t| !t.is_empty())
    }
}

pub type ChunkStream = BoxStream<'static, RelayResult<GenerateChunk>>;

/// Splits a byte stream into lines and parses each as a `GenerateChunk`.
///
/// Lines may straddle network chunks. Lines that are not valid records are
/// logged and skipped; a transport error yields one `Err` and ends the stream.
pub fn decode_records<S, E>(body: S) -> ChunkStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let s = async_stream::stream! {
        let mut body = Box::pin(body);
        let mut buf = BytesMut::new();

        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    buf.extend_from_slice(&bytes);
                    while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                        let line = buf.split_to(pos + 1);
                        if let Some(record) = parse_line(&line) {
                            yield Ok(record);
                        }
                    }
                }
                Err(e) => {
                    yield Err(RelayError::Upstream(e.to_string()));
                    return;
                }
            }
        }

        // Trailing record without a newline.
        if let Some(record) = parse_line(&buf) {
            yield Ok(record);
        }
    };

    Box::pin(s)
}

fn parse_line(line: &[u8]) -> Option<GenerateChunk> {
    let text = match std::str::from_utf8(line) {
        Ok(text) => text.trim(),
        Err(e) => {
            debug!("Skipping non-UTF-8 record: {}", e);
            return None;
        }
    };
    if text.is_empty() {
        return None;
    }
    match serde_json::from_str::<GenerateChunk>(text) {
        Ok(record) => Some(record),
        Err(e) => {
            debug!(
                "Skipping malformed record '{}': {}",
                crate::utils::truncate::preview(text, 100),
                e
            );
            None
        }
    }
}
