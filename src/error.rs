//! Error types for airelay.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Main error type for airelay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("{0}")]
    BadRequest(String),

    #[error("LLM API key not configured")]
    MissingCredential,

    #[error("LLM API error: {}", .0.as_u16())]
    UpstreamStatus(StatusCode),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("Gateway returned {status}: {message}")]
    Gateway { status: StatusCode, message: String },
}

impl Error {
    /// HTTP status this error maps to when returned by the gateway.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::MissingCredential => StatusCode::INTERNAL_SERVER_ERROR,
            Error::UpstreamStatus(status) => *status,
            Error::Provider(_) => StatusCode::BAD_GATEWAY,
            Error::Upstream(_) => StatusCode::BAD_GATEWAY,
            Error::Gateway { status, .. } => *status,
        }
    }

    /// Message safe to show callers. Provider internals stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Error::MethodNotAllowed
            | Error::BadRequest(_)
            | Error::MissingCredential
            | Error::UpstreamStatus(_) => self.to_string(),
            Error::Provider(_) | Error::Upstream(_) => "Failed to reach LLM provider".to_string(),
            Error::Gateway { message, .. } => message.clone(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = serde_json::json!({ "error": self.public_message() });
        (status, axum::Json(body)).into_response()
    }
}
