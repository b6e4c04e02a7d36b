//! Line-buffered decoding of the gateway's `data:` event stream.
//!
//! [`SseDecoder`] buffers raw bytes across read boundaries, reassembles
//! complete lines and turns `data:` lines into [`SseEvent`]s. Output is
//! identical no matter how the transport split the bytes.

use crate::gateway::relay::ERROR_EVENT;
use crate::gateway::types::ChunkFrame;

/// End-of-stream marker sent by the provider.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Longest partial line kept while waiting for a newline.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// A decoded stream event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// Incremental text, never empty.
    Delta(String),
    /// The `[DONE]` sentinel.
    Done,
    /// An error event from the provider or the gateway's truncation notice.
    Error(String),
}

impl SseEvent {
    /// Whether nothing may follow this event.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SseEvent::Done | SseEvent::Error(_))
    }
}

/// Incremental decoder state for one response body.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    finished: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once a terminal event has been produced.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed one read worth of bytes and return the events it completes.
    ///
    /// Only complete lines are processed; a trailing partial line waits for
    /// the next call. After a terminal event the rest of the input, and any
    /// later input, is discarded.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }

        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.extend_from_slice(bytes);

        let mut start = 0;
        while let Some(pos) = buffer[start..].iter().position(|&b| b == b'\n') {
            let line = &buffer[start..start + pos];
            start += pos + 1;

            if let Some(event) = self.process_line(line) {
                let terminal = event.is_terminal();
                events.push(event);
                if terminal {
                    self.finished = true;
                    return events;
                }
            }
        }

        buffer.drain(..start);
        if buffer.len() > MAX_LINE_BYTES {
            tracing::warn!(
                buffered = buffer.len(),
                "Discarding oversized partial line"
            );
            buffer.clear();
        }
        self.buffer = buffer;

        events
    }

    /// Process a final line that arrived without a trailing newline.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        if self.finished || self.buffer.is_empty() {
            return Vec::new();
        }

        let line = std::mem::take(&mut self.buffer);
        let event = self.process_line(&line);
        if event.as_ref().is_some_and(SseEvent::is_terminal) {
            self.finished = true;
        }
        event.into_iter().collect()
    }

    /// Process a single complete line (without its `\n`).
    fn process_line(&mut self, raw: &[u8]) -> Option<SseEvent> {
        let text = String::from_utf8_lossy(raw);
        let line = text.strip_suffix('\r').unwrap_or(&*text);

        if line.is_empty() {
            self.event = None;
            return None;
        }

        if let Some(name) = line.strip_prefix("event:") {
            self.event = Some(name.trim().to_string());
            return None;
        }

        // Comments, `id:`, `retry:` and keep-alives are ignored
        let data = line.strip_prefix("data:")?.trim();
        self.process_data(data)
    }

    /// Process the payload of a `data:` line.
    fn process_data(&self, data: &str) -> Option<SseEvent> {
        if data == DONE_SENTINEL {
            return Some(SseEvent::Done);
        }

        if self.event.as_deref() == Some(ERROR_EVENT) {
            let message = serde_json::from_str::<serde_json::Value>(data)
                .ok()
                .and_then(|v| v.get("error").map(describe_error))
                .unwrap_or_else(|| data.to_string());
            return Some(SseEvent::Error(message));
        }

        // Strict frame first, then any JSON, then the raw text itself
        if let Ok(frame) = serde_json::from_str::<ChunkFrame>(data) {
            if let Some(error) = frame.error.as_ref().filter(|e| !e.is_null()) {
                return Some(SseEvent::Error(describe_error(error)));
            }
            return frame
                .delta_text()
                .filter(|t| !t.is_empty())
                .map(|t| SseEvent::Delta(t.to_string()));
        }

        match serde_json::from_str::<serde_json::Value>(data) {
            Ok(value) => {
                if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
                    return Some(SseEvent::Error(describe_error(error)));
                }
                value
                    .pointer("/choices/0/delta/content")
                    .and_then(|v| v.as_str())
                    .filter(|t| !t.is_empty())
                    .map(|t| SseEvent::Delta(t.to_string()))
            }
            Err(_) => (!data.is_empty()).then(|| SseEvent::Delta(data.to_string())),
        }
    }
}

/// Human-readable text of an `error` field (string or `{message}` object).
fn describe_error(error: &serde_json::Value) -> String {
    match error {
        serde_json::Value::String(s) => s.clone(),
        other => other
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| other.to_string()),
    }
}
