//! Server-Sent Events: decoding upstream byte streams and encoding outbound frames.
//!
//! Decoding knows nothing about chat protocols. It turns bytes into a sequence of
//! [`SsePayload`]s: one JSON value per event, or the `[DONE]` terminal marker.

use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::translate::anthropic_types::StreamEvent;
use crate::translate::responses_types::ResponsesStreamEvent;

/// The OpenAI-style end-of-stream sentinel frame.
pub const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq)]
pub enum SsePayload {
    Json(Value),
    Done,
}

/// Incremental SSE decoder.
///
/// Lines are split on raw bytes, so a multi-byte UTF-8 sequence split across
/// two chunks is reassembled before decoding.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    /// `buffer[..scanned]` holds no `\n`.
    scanned: usize,
    data_lines: Vec<String>,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the terminal marker has been seen. Nothing is decoded after it.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed a chunk of bytes, returning every payload completed by it.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SsePayload> {
        let mut out = Vec::new();
        if self.done {
            return out;
        }
        self.buffer.extend_from_slice(bytes);

        // Consumed lines are dropped once per call, not once per line.
        let mut start = 0;
        while let Some(rel) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + rel;
            let line = self.buffer[start..end].to_vec();
            start = end + 1;
            self.scanned = start;
            if let Some(payload) = self.process_line(&line) {
                out.push(payload);
                if self.done {
                    self.buffer.clear();
                    self.scanned = 0;
                    return out;
                }
            }
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();
        out
    }

    /// Flush at end of input: a trailing unterminated line and any pending
    /// `data:` lines become one final payload.
    pub fn finish(&mut self) -> Option<SsePayload> {
        if self.done {
            return None;
        }
        let tail = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        let payload = if tail.is_empty() {
            None
        } else {
            self.process_line(&tail)
        };
        let payload = payload.or_else(|| self.dispatch());
        self.done = true;
        payload
    }

    fn process_line(&mut self, raw: &[u8]) -> Option<SsePayload> {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        if raw.is_empty() {
            return self.dispatch();
        }
        let line = String::from_utf8_lossy(raw);
        if line.starts_with(':') {
            return None;
        }
        if let Some(data) = line.strip_prefix("data:") {
            self.data_lines.push(data.trim().to_string());
        }
        // event:, id:, retry: carry nothing we use
        None
    }

    fn dispatch(&mut self) -> Option<SsePayload> {
        if self.data_lines.is_empty() {
            return None;
        }
        let joined = self.data_lines.join("\n");
        self.data_lines.clear();

        let payload = joined.trim();
        if payload == DONE_MARKER {
            self.done = true;
            return Some(SsePayload::Done);
        }
        match serde_json::from_str(payload) {
            Ok(value) => Some(SsePayload::Json(value)),
            Err(e) => {
                debug!(error = %e, "dropping malformed SSE payload");
                None
            }
        }
    }
}

/// Decode an upstream byte stream into SSE payloads.
///
/// The stream ends right after [`SsePayload::Done`] without reading further. A
/// transport error ends it as if the upstream had closed, flushing buffered data.
pub fn sse_payloads<S, E>(byte_stream: S) -> impl Stream<Item = SsePayload> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send,
    E: std::fmt::Display + Send,
{
    async_stream::stream! {
        let mut decoder = SseDecoder::new();
        tokio::pin!(byte_stream);

        while let Some(chunk) = byte_stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, "upstream stream failed, closing");
                    break;
                }
            };

            for payload in decoder.push(&chunk) {
                yield payload;
            }
            if decoder.is_done() {
                break;
            }
        }

        if let Some(payload) = decoder.finish() {
            yield payload;
        }
    }
}

/// An outbound event that knows its SSE `event:` name.
pub trait NamedEvent: Serialize {
    fn name(&self) -> &'static str;
}

impl NamedEvent for StreamEvent {
    fn name(&self) -> &'static str {
        self.event_name()
    }
}

impl NamedEvent for ResponsesStreamEvent {
    fn name(&self) -> &'static str {
        self.event_name()
    }
}

/// `event: <name>\ndata: <json>\n\n`
pub fn encode_frame(name: &str, data: &impl Serialize) -> Option<Bytes> {
    match serde_json::to_string(data) {
        Ok(json) => Some(Bytes::from(format!("event: {name}\ndata: {json}\n\n"))),
        Err(e) => {
            warn!(event = name, error = %e, "failed to serialize SSE event");
            None
        }
    }
}

pub fn encode_event(event: &impl NamedEvent) -> Option<Bytes> {
    encode_frame(event.name(), event)
}
