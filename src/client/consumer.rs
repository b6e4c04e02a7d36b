//! Reading a gateway response body into text deltas.
//!
//! [`read_stream`] pulls one chunk at a time, decodes complete lines and
//! hands each delta to `on_chunk` in arrival order. `on_done` runs exactly
//! once however the stream ends, so a caller's loading state always
//! resolves. The next chunk is only requested after the previous one has
//! been delivered.

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use super::sse::{SseDecoder, SseEvent};

/// How a consumed stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The `[DONE]` sentinel arrived.
    Completed,
    /// The body ended without a sentinel.
    Ended,
    /// A read failed or an error event arrived; content may be truncated.
    Interrupted(String),
    /// The caller cancelled; later deltas were not delivered.
    Cancelled,
}

impl StreamOutcome {
    /// Whether the text received so far is everything the provider sent.
    pub fn is_complete(&self) -> bool {
        matches!(self, StreamOutcome::Completed | StreamOutcome::Ended)
    }
}

/// Consume `stream`, calling `on_chunk` per delta and `on_done` once at the end.
pub async fn read_stream<S, B, E, C, D>(stream: S, on_chunk: C, on_done: D) -> StreamOutcome
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
    C: FnMut(&str),
    D: FnOnce(),
{
    read_stream_with_cancel(stream, &CancellationToken::new(), on_chunk, on_done).await
}

/// Like [`read_stream`], but stops delivering once `cancel` fires.
///
/// The token is checked before each read and before each delivery. A
/// cancelled stream is dropped without notifying the server.
pub async fn read_stream_with_cancel<S, B, E, C, D>(
    stream: S,
    cancel: &CancellationToken,
    mut on_chunk: C,
    on_done: D,
) -> StreamOutcome
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
    C: FnMut(&str),
    D: FnOnce(),
{
    let outcome = consume(stream, cancel, &mut on_chunk).await;

    match &outcome {
        StreamOutcome::Completed => tracing::debug!("Stream completed"),
        StreamOutcome::Ended => tracing::debug!("Stream ended without sentinel"),
        StreamOutcome::Interrupted(reason) => {
            tracing::error!(reason = %reason, "Stream read error")
        }
        StreamOutcome::Cancelled => tracing::debug!("Stream cancelled by caller"),
    }

    on_done();
    outcome
}

async fn consume<S, B, E, C>(stream: S, cancel: &CancellationToken, on_chunk: &mut C) -> StreamOutcome
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
    C: FnMut(&str),
{
    let mut stream = std::pin::pin!(stream);
    let mut decoder = SseDecoder::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return StreamOutcome::Cancelled,
            next = stream.next() => next,
        };

        let events = match next {
            Some(Ok(bytes)) => decoder.feed(bytes.as_ref()),
            Some(Err(e)) => return StreamOutcome::Interrupted(e.to_string()),
            None => {
                let events = decoder.finish();
                return deliver(events, cancel, on_chunk).unwrap_or(StreamOutcome::Ended);
            }
        };

        if let Some(outcome) = deliver(events, cancel, on_chunk) {
            return outcome;
        }
    }
}

/// Hand decoded events to the caller. Returns the outcome once a terminal
/// event or cancellation is seen.
fn deliver<C>(events: Vec<SseEvent>, cancel: &CancellationToken, on_chunk: &mut C) -> Option<StreamOutcome>
where
    C: FnMut(&str),
{
    for event in events {
        match event {
            SseEvent::Delta(text) => {
                if cancel.is_cancelled() {
                    return Some(StreamOutcome::Cancelled);
                }
                on_chunk(&text);
            }
            SseEvent::Done => return Some(StreamOutcome::Completed),
            SseEvent::Error(message) => return Some(StreamOutcome::Interrupted(message)),
        }
    }
    None
}
