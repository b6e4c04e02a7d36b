//! HTTP server setup and configuration.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderName, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use futures::StreamExt;
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::handlers;
use crate::config::Config;

/// Response header carrying the per-request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared application state.
///
/// Immutable after startup: handlers share no mutable state apart from the
/// concurrency permits.
#[derive(Clone)]
pub struct AppState {
    pub http_client: Client,
    pub config: Arc<Config>,
    /// One permit per feature request in flight, streamed body included.
    pub limiter: Arc<Semaphore>,
}

impl AppState {
    /// Build state with an HTTP client configured from `config`.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let http_client = build_http_client(&config)?;
        let limiter = Arc::new(Semaphore::new(config.server.max_concurrency));
        Ok(Self {
            http_client,
            config: Arc::new(config),
            limiter,
        })
    }
}

/// Correlation id assigned to each incoming request.
#[derive(Debug, Clone, Copy)]
pub struct RequestId(pub Uuid);

/// Create the upstream HTTP client.
///
/// The overall timeout covers the whole exchange including the streamed
/// body, acting as the execution-time ceiling for one invocation.
pub fn build_http_client(config: &Config) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(config.upstream.timeout)
        .connect_timeout(config.upstream.connect_timeout)
        .build()
}

/// Tag every request with a fresh [`RequestId`] and echo it as a header.
async fn assign_request_id(mut request: Request, next: Next) -> Response {
    let id = RequestId(Uuid::new_v4());
    request.extensions_mut().insert(id);

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id.0.to_string()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

/// Wait for a permit and keep it until the response body is finished.
///
/// The permit moves into the body stream, so a streamed chat or plan reply
/// counts against `server.max_concurrency` until its last byte is sent or
/// the client goes away.
async fn limit_concurrency(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let permit = match state.limiter.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return StatusCode::SERVICE_UNAVAILABLE.into_response(),
    };

    let (parts, body) = next.run(request).await.into_parts();
    let body = body.into_data_stream().map(move |chunk| {
        let _held = &permit;
        chunk
    });
    Response::from_parts(parts, Body::from_stream(body))
}

/// Create the axum router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    let features = Router::new()
        .route(
            "/api/ai/chat",
            post(handlers::chat).fallback(handlers::method_not_allowed),
        )
        .route(
            "/api/ai/plan",
            post(handlers::plan).fallback(handlers::method_not_allowed),
        )
        .route(
            "/api/ai/quiz",
            post(handlers::quiz).fallback(handlers::method_not_allowed),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            limit_concurrency,
        ));

    Router::new()
        .merge(features)
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(middleware::from_fn(assign_request_id))
        .layer(TraceLayer::new_for_http())
}

/// Run the HTTP server until Ctrl-C.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let listen_addr = config.server.listen.clone();
    let state = AppState::new(config)?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "Starting airelay gateway");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutting down");
        })
        .await?;

    Ok(())
}
