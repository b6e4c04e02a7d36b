//! Per-feature request state on the client side.
//!
//! [`AiSession`] owns the accumulated response for one request at a time
//! and walks `Idle -> Streaming -> Done | ErroredDone`, or `Failed` when the
//! gateway refuses the request before streaming starts. Nothing is retried.

use tokio_util::sync::CancellationToken;

use super::api::GatewayClient;
use super::consumer::{read_stream_with_cancel, StreamOutcome};
use crate::error::Error;
use crate::gateway::types::{ChatRequest, Feature};

/// Lifecycle of the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Streaming,
    /// Stream finished or was aborted by the caller.
    Done,
    /// Stream broke off; the response may be truncated.
    ErroredDone,
    /// The gateway rejected the request; see [`AiSession::error`].
    Failed,
}

/// Streaming request state for one UI feature.
#[derive(Debug)]
pub struct AiSession {
    client: GatewayClient,
    response: String,
    phase: SessionPhase,
    error: Option<String>,
    cancel: CancellationToken,
    ai_calls: u64,
}

impl AiSession {
    pub fn new(client: GatewayClient) -> Self {
        Self {
            client,
            response: String::new(),
            phase: SessionPhase::Idle,
            error: None,
            cancel: CancellationToken::new(),
            ai_calls: 0,
        }
    }

    /// Text accumulated for the current or last request.
    pub fn response(&self) -> &str {
        &self.response
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.phase == SessionPhase::Streaming
    }

    /// Number of streams that ran to their done signal.
    pub fn ai_calls(&self) -> u64 {
        self.ai_calls
    }

    /// Token that aborts the current request when cancelled.
    ///
    /// Obtain it before starting a request to abort from another task. A
    /// cancelled token is replaced when the next request starts.
    pub fn abort_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop delivering deltas for the current request.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    /// Back to `Idle` with an empty response.
    pub fn reset(&mut self) {
        self.response.clear();
        self.error = None;
        self.phase = SessionPhase::Idle;
        self.cancel = CancellationToken::new();
    }

    /// Stream a feature request into [`AiSession::response`].
    pub async fn stream_response(
        &mut self,
        feature: Feature,
        request: &ChatRequest,
    ) -> Result<StreamOutcome, Error> {
        self.stream_response_with(feature, request, |_| {}).await
    }

    /// Like [`AiSession::stream_response`], also passing each delta to `on_delta`.
    ///
    /// Gateway rejections move the session to `Failed` and are returned as
    /// errors. Everything after the stream opens resolves to an outcome.
    pub async fn stream_response_with<F>(
        &mut self,
        feature: Feature,
        request: &ChatRequest,
        mut on_delta: F,
    ) -> Result<StreamOutcome, Error>
    where
        F: FnMut(&str),
    {
        self.response.clear();
        self.error = None;
        self.phase = SessionPhase::Streaming;
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }

        let stream = match self.client.stream_ai(feature, request).await {
            Ok(stream) => stream,
            Err(e) => {
                self.error = Some(match &e {
                    Error::Gateway { message, .. } => message.clone(),
                    other => other.to_string(),
                });
                self.phase = SessionPhase::Failed;
                return Err(e);
            }
        };

        let cancel = self.cancel.clone();
        let outcome = read_stream_with_cancel(
            stream,
            &cancel,
            |text| {
                self.response.push_str(text);
                on_delta(text);
            },
            || {
                self.phase = SessionPhase::Done;
                self.ai_calls += 1;
            },
        )
        .await;

        if let StreamOutcome::Interrupted(_) = outcome {
            self.phase = SessionPhase::ErroredDone;
        }

        tracing::debug!(
            feature = %feature,
            outcome = ?outcome,
            chars = self.response.len(),
            "AI request settled"
        );
        Ok(outcome)
    }
}
