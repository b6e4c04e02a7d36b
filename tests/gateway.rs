//! Integration tests for the gateway feature endpoints.
//!
//! Verifies that:
//! - Invalid requests are rejected before any upstream call
//! - The upstream body carries a leading system message and feature settings
//! - Upstream failures propagate their status with a generic message
//! - Streaming endpoints relay the upstream bytes unchanged
//!
//! Uses `wiremock` as the LLM provider and `tower::ServiceExt::oneshot`
//! for the airelay router.

use axum::body::Body;
use http::Request;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use airelay::config::Config;
use airelay::gateway::{create_router, AppState, REQUEST_ID_HEADER};

const HELLO_SSE: &str = "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\" there\"}}]}\n\ndata: [DONE]\n\n";

/// Build an airelay router pointed at `upstream`, optionally with a credential.
fn setup_app(upstream: &MockServer, api_key: Option<&str>) -> axum::Router {
    let key_line = api_key
        .map(|k| format!("api_key = \"{}\"", k))
        .unwrap_or_default();
    let toml = format!(
        r#"
[upstream]
base_url = "{}/v1"
{}
"#,
        upstream.uri(),
        key_line
    );

    let (config, _) = Config::parse_str_with(&toml, |_| None).expect("valid test config");
    create_router(AppState::new(config).expect("http client"))
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn read_body(response: axum::response::Response) -> (http::StatusCode, Vec<u8>) {
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1_048_576)
        .await
        .expect("read body");
    (status, bytes.to_vec())
}

async fn read_json(response: axum::response::Response) -> (http::StatusCode, Value) {
    let (status, bytes) = read_body(response).await;
    (status, serde_json::from_slice(&bytes).unwrap_or_default())
}

/// Body of the single request the mock upstream received.
async fn upstream_body(upstream: &MockServer) -> Value {
    let requests = upstream.received_requests().await.expect("recording enabled");
    assert_eq!(requests.len(), 1, "exactly one upstream call");
    serde_json::from_slice(&requests[0].body).expect("upstream body is JSON")
}

async fn mount_sse(upstream: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(HELLO_SSE, "text/event-stream"))
        .expect(expected_calls)
        .mount(upstream)
        .await;
}

// ============================================================================
// Rejections before the upstream call
// ============================================================================

#[tokio::test]
async fn missing_messages_and_user_message_is_400_without_upstream_call() {
    let upstream = MockServer::start().await;
    mount_sse(&upstream, 0).await;
    let app = setup_app(&upstream, Some("test-key"));

    for uri in ["/api/ai/chat", "/api/ai/plan"] {
        let response = app
            .clone()
            .oneshot(post_json(uri, json!({"systemPrompt": "only a prompt"})))
            .await
            .unwrap();
        let (status, body) = read_json(response).await;

        assert_eq!(status, http::StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(body, json!({"error": "messages or userMessage is required"}));
    }
}

#[tokio::test]
async fn empty_history_and_empty_user_message_is_400() {
    let upstream = MockServer::start().await;
    mount_sse(&upstream, 0).await;
    let app = setup_app(&upstream, Some("test-key"));

    let response = app
        .oneshot(post_json(
            "/api/ai/chat",
            json!({"messages": [], "userMessage": ""}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn quiz_without_user_message_is_400() {
    let upstream = MockServer::start().await;
    mount_sse(&upstream, 0).await;
    let app = setup_app(&upstream, Some("test-key"));

    let response = app
        .oneshot(post_json(
            "/api/ai/quiz",
            json!({"messages": [{"role": "user", "content": "quiz me"}]}),
        ))
        .await
        .unwrap();
    let (status, body) = read_json(response).await;

    assert_eq!(status, http::StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "userMessage is required"}));
}

#[tokio::test]
async fn malformed_json_is_400() {
    let upstream = MockServer::start().await;
    mount_sse(&upstream, 0).await;
    let app = setup_app(&upstream, Some("test-key"));

    let request = Request::post("/api/ai/chat")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = read_json(app.oneshot(request).await.unwrap()).await;

    assert_eq!(status, http::StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().starts_with("Invalid JSON body"));
}

#[tokio::test]
async fn non_post_method_is_405() {
    let upstream = MockServer::start().await;
    mount_sse(&upstream, 0).await;
    let app = setup_app(&upstream, Some("test-key"));

    for uri in ["/api/ai/chat", "/api/ai/plan", "/api/ai/quiz"] {
        let request = Request::get(uri).body(Body::empty()).unwrap();
        let (status, body) = read_json(app.clone().oneshot(request).await.unwrap()).await;

        assert_eq!(status, http::StatusCode::METHOD_NOT_ALLOWED, "{}", uri);
        assert_eq!(body, json!({"error": "Method not allowed"}));
    }
}

#[tokio::test]
async fn missing_credential_is_500_without_upstream_call() {
    let upstream = MockServer::start().await;
    mount_sse(&upstream, 0).await;
    let app = setup_app(&upstream, None);

    let response = app
        .oneshot(post_json("/api/ai/chat", json!({"userMessage": "hello"})))
        .await
        .unwrap();
    let (status, body) = read_json(response).await;

    assert_eq!(status, http::StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"error": "LLM API key not configured"}));
}

// ============================================================================
// Upstream request shape
// ============================================================================

#[tokio::test]
async fn chat_prepends_default_system_message() {
    let upstream = MockServer::start().await;
    mount_sse(&upstream, 1).await;
    let app = setup_app(&upstream, Some("test-key"));

    let response = app
        .oneshot(post_json("/api/ai/chat", json!({"userMessage": "hello"})))
        .await
        .unwrap();
    let (status, _) = read_body(response).await;
    assert_eq!(status, http::StatusCode::OK);

    let body = upstream_body(&upstream).await;
    assert_eq!(
        body["messages"],
        json!([
            {"role": "system", "content": "You are a helpful marketing consultant."},
            {"role": "user", "content": "hello"}
        ])
    );
    assert_eq!(body["model"], "moonshotai/kimi-k2");
    assert_eq!(body["stream"], true);
    assert_eq!(body["max_tokens"], 4096);
}

#[tokio::test]
async fn chat_forwards_history_after_caller_system_prompt() {
    let upstream = MockServer::start().await;
    mount_sse(&upstream, 1).await;
    let app = setup_app(&upstream, Some("test-key"));

    let history = json!([
        {"role": "user", "content": "What is CPC?"},
        {"role": "assistant", "content": "Cost per click."},
        {"role": "user", "content": "And CPM?"}
    ]);
    let response = app
        .oneshot(post_json(
            "/api/ai/chat",
            json!({"systemPrompt": "You are terse.", "messages": history}),
        ))
        .await
        .unwrap();
    read_body(response).await;

    let body = upstream_body(&upstream).await;
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0], json!({"role": "system", "content": "You are terse."}));
    assert_eq!(&messages[1..], history.as_array().unwrap().as_slice());
}

#[tokio::test]
async fn plan_uses_strategist_default() {
    let upstream = MockServer::start().await;
    mount_sse(&upstream, 1).await;
    let app = setup_app(&upstream, Some("test-key"));

    let response = app
        .oneshot(post_json("/api/ai/plan", json!({"userMessage": "Diwali sale"})))
        .await
        .unwrap();
    read_body(response).await;

    let body = upstream_body(&upstream).await;
    assert_eq!(
        body["messages"][0]["content"],
        "You are a helpful marketing strategist."
    );
    assert_eq!(body["stream"], true);
}

#[tokio::test]
async fn credential_is_sent_as_bearer_token() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer nvapi-test"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(HELLO_SSE, "text/event-stream"))
        .expect(1)
        .mount(&upstream)
        .await;
    let app = setup_app(&upstream, Some("nvapi-test"));

    let response = app
        .oneshot(post_json("/api/ai/chat", json!({"userMessage": "hello"})))
        .await
        .unwrap();
    assert_eq!(response.status(), http::StatusCode::OK);
}

// ============================================================================
// Upstream failures
// ============================================================================

#[tokio::test]
async fn upstream_status_is_propagated_with_generic_message() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .set_body_json(json!({"error": {"message": "quota exceeded for org-secret"}})),
        )
        .expect(1)
        .mount(&upstream)
        .await;
    let app = setup_app(&upstream, Some("test-key"));

    let response = app
        .oneshot(post_json("/api/ai/chat", json!({"userMessage": "hello"})))
        .await
        .unwrap();
    let (status, body) = read_json(response).await;

    assert_eq!(status, http::StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body, json!({"error": "LLM API error: 429"}));
}

#[tokio::test]
async fn upstream_server_error_is_not_retried() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&upstream)
        .await;
    let app = setup_app(&upstream, Some("test-key"));

    let response = app
        .oneshot(post_json("/api/ai/quiz", json!({"userMessage": "SEO"})))
        .await
        .unwrap();
    assert_eq!(response.status(), http::StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn unreachable_upstream_is_502() {
    let (config, _) = Config::parse_str_with(
        r#"
[upstream]
base_url = "http://127.0.0.1:1/v1"
api_key = "test-key"
"#,
        |_| None,
    )
    .unwrap();
    let app = create_router(AppState::new(config).unwrap());

    let response = app
        .oneshot(post_json("/api/ai/chat", json!({"userMessage": "hello"})))
        .await
        .unwrap();
    let (status, body) = read_json(response).await;

    assert_eq!(status, http::StatusCode::BAD_GATEWAY);
    assert_eq!(body, json!({"error": "Failed to reach LLM provider"}));
}

// ============================================================================
// Streaming pass-through
// ============================================================================

#[tokio::test]
async fn streaming_body_is_relayed_verbatim() {
    let upstream = MockServer::start().await;
    mount_sse(&upstream, 1).await;
    let app = setup_app(&upstream, Some("test-key"));

    let response = app
        .oneshot(post_json("/api/ai/chat", json!({"userMessage": "hello"})))
        .await
        .unwrap();

    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );
    assert!(response.headers().get(REQUEST_ID_HEADER).is_some());

    let (status, body) = read_body(response).await;
    assert_eq!(status, http::StatusCode::OK);
    assert_eq!(body, HELLO_SSE.as_bytes());
}

#[tokio::test]
async fn same_request_twice_gives_independent_identical_streams() {
    let upstream = MockServer::start().await;
    mount_sse(&upstream, 2).await;
    let app = setup_app(&upstream, Some("test-key"));

    let request = json!({"userMessage": "hello"});
    let first = app
        .clone()
        .oneshot(post_json("/api/ai/chat", request.clone()))
        .await
        .unwrap();
    let second = app
        .oneshot(post_json("/api/ai/chat", request))
        .await
        .unwrap();

    let first_id = first.headers().get(REQUEST_ID_HEADER).cloned();
    let second_id = second.headers().get(REQUEST_ID_HEADER).cloned();
    assert_ne!(first_id, second_id);

    let (_, first_body) = read_body(first).await;
    let (_, second_body) = read_body(second).await;
    assert_eq!(first_body, HELLO_SSE.as_bytes());
    assert_eq!(second_body, HELLO_SSE.as_bytes());
}

#[tokio::test]
async fn health_reports_credential_presence() {
    let upstream = MockServer::start().await;
    let app = setup_app(&upstream, None);

    let request = Request::get("/health").body(Body::empty()).unwrap();
    let (status, body) = read_json(app.oneshot(request).await.unwrap()).await;

    assert_eq!(status, http::StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["credential"], false);
}

// ============================================================================
// Quiz (buffered)
// ============================================================================

async fn mount_completion(upstream: &MockServer, content: &str) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cmpl-1",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop"
            }]
        })))
        .expect(1)
        .mount(upstream)
        .await;
}

#[tokio::test]
async fn quiz_sends_buffered_request_with_quiz_settings() {
    let upstream = MockServer::start().await;
    mount_completion(&upstream, "{\"questions\":[]}").await;
    let app = setup_app(&upstream, Some("test-key"));

    let response = app
        .oneshot(post_json("/api/ai/quiz", json!({"userMessage": "Email marketing"})))
        .await
        .unwrap();
    read_body(response).await;

    let body = upstream_body(&upstream).await;
    assert_eq!(body["stream"], false);
    assert_eq!(body["model"], "meta/llama-3.3-70b-instruct");
    assert_eq!(body["max_tokens"], 2048);
    assert_eq!(
        body["messages"][0],
        json!({"role": "system", "content": "You are a quiz generator for digital marketing topics."})
    );
    assert_eq!(
        body["messages"][1],
        json!({"role": "user", "content": "Email marketing"})
    );
}

#[tokio::test]
async fn quiz_extracts_fenced_json() {
    let upstream = MockServer::start().await;
    let quiz = json!({
        "questions": [{
            "question": "What does CTR stand for?",
            "options": {"A": "Click-through rate", "B": "Cost to reach", "C": "Conversion trend ratio", "D": "Customer traffic rank"},
            "correct": "A",
            "explanation": "Clicks divided by impressions."
        }]
    });
    let content = format!("Here is your quiz:\n```json\n{}\n```\nGood luck!", quiz);
    mount_completion(&upstream, &content).await;
    let app = setup_app(&upstream, Some("test-key"));

    let response = app
        .oneshot(post_json("/api/ai/quiz", json!({"userMessage": "PPC"})))
        .await
        .unwrap();
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/json"
    );
    let (status, body) = read_json(response).await;

    assert_eq!(status, http::StatusCode::OK);
    assert_eq!(body, json!({"quiz": quiz}));
}

#[tokio::test]
async fn quiz_returns_freeform_text_as_content() {
    let upstream = MockServer::start().await;
    mount_completion(&upstream, "I cannot produce a quiz on that topic.").await;
    let app = setup_app(&upstream, Some("test-key"));

    let response = app
        .oneshot(post_json("/api/ai/quiz", json!({"userMessage": "PPC"})))
        .await
        .unwrap();
    let (status, body) = read_json(response).await;

    assert_eq!(status, http::StatusCode::OK);
    assert_eq!(
        body,
        json!({"content": "I cannot produce a quiz on that topic."})
    );
}

#[tokio::test]
async fn quiz_with_no_choices_returns_empty_content() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .expect(1)
        .mount(&upstream)
        .await;
    let app = setup_app(&upstream, Some("test-key"));

    let response = app
        .oneshot(post_json("/api/ai/quiz", json!({"userMessage": "PPC"})))
        .await
        .unwrap();
    let (status, body) = read_json(response).await;

    assert_eq!(status, http::StatusCode::OK);
    assert_eq!(body, json!({"content": ""}));
}
