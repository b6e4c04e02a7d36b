//! Verbatim pass-through of an upstream byte stream.
//!
//! Bytes are forwarded in arrival order with no buffering or rewriting.
//! Once response headers are out the status can no longer change, so a
//! transport error mid-copy only ends the body. With truncation signalling
//! enabled, one terminal `event: error` notice is appended first.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use std::convert::Infallible;

/// Message carried by the truncation notice.
pub const TRUNCATION_MESSAGE: &str = "upstream stream interrupted";

/// SSE event name used for the truncation notice.
pub const ERROR_EVENT: &str = "error";

/// The terminal notice appended when the upstream breaks mid-stream.
///
/// Leading blank lines close any partial line the upstream left behind so
/// the notice always parses as its own event.
pub fn truncation_notice() -> Bytes {
    let payload = serde_json::json!({ "error": TRUNCATION_MESSAGE });
    Bytes::from(format!("\n\nevent: {}\ndata: {}\n\n", ERROR_EVENT, payload))
}

/// Wrap an upstream body so it can be handed to `axum::body::Body::from_stream`.
///
/// The returned stream never yields an error: upstream failures are logged
/// and end the stream, optionally after [`truncation_notice`].
pub fn relay_stream<S, E>(
    upstream: S,
    signal_truncation: bool,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    stream::unfold(
        Some((upstream.boxed(), 0usize)),
        move |state| async move {
            let (mut upstream, relayed) = state?;
            match upstream.next().await {
                Some(Ok(bytes)) => {
                    let relayed = relayed + bytes.len();
                    Some((Ok(bytes), Some((upstream, relayed))))
                }
                Some(Err(e)) => {
                    tracing::error!(
                        error = %e,
                        relayed_bytes = relayed,
                        "Upstream stream failed mid-relay"
                    );
                    signal_truncation.then(|| (Ok(truncation_notice()), None))
                }
                None => {
                    tracing::debug!(relayed_bytes = relayed, "Upstream stream finished");
                    None
                }
            }
        },
    )
}
