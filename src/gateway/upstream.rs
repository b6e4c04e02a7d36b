//! One-shot forwarding of a chat-completion request to the provider.

use axum::http::header;

use super::types::UpstreamRequest;
use crate::config::{ApiKey, Config};
use crate::error::Error;

/// Send `body` to the provider and return the response once headers arrive.
///
/// No retry, caching or backoff. Non-success statuses become
/// [`Error::UpstreamStatus`]; the provider's body is logged, never returned.
pub async fn send(
    client: &reqwest::Client,
    config: &Config,
    api_key: &ApiKey,
    body: &UpstreamRequest,
) -> Result<reqwest::Response, Error> {
    let url = config.completions_url();

    let response = client
        .post(&url)
        .header(header::CONTENT_TYPE, "application/json")
        .bearer_auth(api_key.expose_secret())
        .json(body)
        .send()
        .await
        .map_err(|e| {
            tracing::error!(error = %e, url = %url, "Failed to reach LLM provider");
            Error::Provider(format!("Failed to reach '{}': {}", url, e))
        })?;

    let status = response.status();
    if !status.is_success() {
        let error_body = response.text().await.unwrap_or_default();
        tracing::error!(
            status = %status,
            model = %body.model,
            body = %error_body,
            "LLM API returned error"
        );
        return Err(Error::UpstreamStatus(status));
    }

    Ok(response)
}
