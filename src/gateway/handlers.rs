//! HTTP request handlers.

use axum::{
    body::{Body, Bytes},
    extract::{Extension, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use super::quiz::quiz_reply;
use super::relay::relay_stream;
use super::server::{AppState, RequestId};
use super::types::{ChatRequest, CompletionResponse, Feature, UpstreamRequest};
use super::upstream;
use crate::error::Error;

/// Handle POST /api/ai/chat
pub async fn chat(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    body: Bytes,
) -> Response {
    handle_feature(&state, request_id, Feature::Chat, &body).await
}

/// Handle POST /api/ai/plan
pub async fn plan(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    body: Bytes,
) -> Response {
    handle_feature(&state, request_id, Feature::Plan, &body).await
}

/// Handle POST /api/ai/quiz
pub async fn quiz(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    body: Bytes,
) -> Response {
    handle_feature(&state, request_id, Feature::Quiz, &body).await
}

/// Any non-POST method on a feature endpoint.
pub async fn method_not_allowed() -> Error {
    Error::MethodNotAllowed
}

/// Handle GET /health
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "airelay",
        "credential": state.config.upstream.api_key.is_some(),
    }))
}

/// Shared flow of every feature endpoint, logging the outcome.
async fn handle_feature(
    state: &AppState,
    request_id: RequestId,
    feature: Feature,
    body: &[u8],
) -> Response {
    let start = std::time::Instant::now();
    let result = execute_request(state, request_id, feature, body).await;
    let latency_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(response) => {
            tracing::info!(
                request_id = %request_id.0,
                feature = %feature,
                latency_ms,
                streaming = feature.streams(),
                "Request relayed"
            );
            response
        }
        Err(e) => {
            tracing::warn!(
                request_id = %request_id.0,
                feature = %feature,
                latency_ms,
                status = e.status().as_u16(),
                error = %e,
                "Request rejected"
            );
            e.into_response()
        }
    }
}

/// Validate the request, forward it upstream and shape the reply.
///
/// Every rejection here happens before any upstream call or before
/// response headers are sent, so it can still carry a status and `{error}`.
async fn execute_request(
    state: &AppState,
    request_id: RequestId,
    feature: Feature,
    body: &[u8],
) -> Result<Response, Error> {
    let request: ChatRequest = serde_json::from_slice(body)
        .map_err(|e| Error::BadRequest(format!("Invalid JSON body: {}", e)))?;

    let settings = state.config.settings(feature);
    let messages = request.synthesize_messages(feature, &settings.system_prompt)?;

    let api_key = state
        .config
        .upstream
        .api_key
        .as_ref()
        .ok_or(Error::MissingCredential)?;

    let upstream_body = UpstreamRequest::new(&settings, messages);

    tracing::info!(
        request_id = %request_id.0,
        feature = %feature,
        model = %upstream_body.model,
        messages = upstream_body.messages.len(),
        stream = upstream_body.stream,
        "Forwarding to LLM provider"
    );

    let upstream_response =
        upstream::send(&state.http_client, &state.config, api_key, &upstream_body).await?;

    if feature.streams() {
        Ok(streaming_response(
            upstream_response,
            state.config.relay.signal_truncation,
        ))
    } else {
        buffered_quiz_response(upstream_response).await
    }
}

/// Relay the upstream body to the client as it arrives.
fn streaming_response(upstream_response: reqwest::Response, signal_truncation: bool) -> Response {
    let body = Body::from_stream(relay_stream(
        upstream_response.bytes_stream(),
        signal_truncation,
    ));

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

/// Buffer the upstream reply and answer `{quiz}` or `{content}`.
async fn buffered_quiz_response(upstream_response: reqwest::Response) -> Result<Response, Error> {
    let bytes = upstream_response.bytes().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to read provider response");
        Error::Provider(format!("Failed to read response: {}", e))
    })?;

    let value: serde_json::Value = serde_json::from_slice(&bytes).map_err(|e| {
        tracing::error!(error = %e, "Failed to parse provider response");
        Error::Provider(format!("Failed to parse response: {}", e))
    })?;

    let content = CompletionResponse::first_content(&value);
    Ok(Json(quiz_reply(content)).into_response())
}
