//! HTTP client for the gateway's feature endpoints.

use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::Error;
use crate::gateway::types::{ChatRequest, Feature, QuizReply};

/// Error body returned by the gateway.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// Client for `POST /api/ai/{feature}`.
#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<SecretString>,
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl GatewayClient {
    /// Client for the gateway at `base_url` (e.g. `http://127.0.0.1:8080`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            token: None,
        }
    }

    /// Use a preconfigured HTTP client.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(SecretString::from(token.into()));
        self
    }

    /// Full URL of a feature endpoint.
    pub fn endpoint_url(&self, feature: Feature) -> String {
        format!(
            "{}/api/ai/{}",
            self.base_url.trim_end_matches('/'),
            feature
        )
    }

    async fn post(&self, feature: Feature, request: &ChatRequest) -> Result<reqwest::Response, Error> {
        let mut builder = self.http.post(self.endpoint_url(feature)).json(request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token.expose_secret());
        }

        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body
                .error
                .unwrap_or_else(|| format!("API error: {}", status.as_u16())),
            Err(_) => "Request failed".to_string(),
        };
        tracing::warn!(status = %status, feature = %feature, message = %message, "Gateway rejected request");
        Err(Error::Gateway { status, message })
    }

    /// Open a streaming feature request and return its body stream.
    pub async fn stream_ai(
        &self,
        feature: Feature,
        request: &ChatRequest,
    ) -> Result<BoxStream<'static, reqwest::Result<Bytes>>, Error> {
        let response = self.post(feature, request).await?;
        Ok(response.bytes_stream().boxed())
    }

    /// Send a request and return the whole JSON reply.
    pub async fn call_ai(
        &self,
        feature: Feature,
        request: &ChatRequest,
    ) -> Result<serde_json::Value, Error> {
        let response = self.post(feature, request).await?;
        Ok(response.json().await?)
    }

    /// Request a quiz.
    pub async fn call_quiz(&self, request: &ChatRequest) -> Result<QuizReply, Error> {
        let response = self.post(Feature::Quiz, request).await?;
        Ok(response.json().await?)
    }
}
