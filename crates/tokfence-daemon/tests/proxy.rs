//! End-to-end pipeline tests against a mock upstream.
//!
//! A throwaway axum server stands in for the provider API; the daemon
//! router runs on an ephemeral loopback port; requests go through a real
//! HTTP client, so header policy, metering, and risk behavior are
//! exercised exactly as an agent would see them.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::post;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use tokfence_config::Config;
use tokfence_daemon::{DaemonContext, control, pipeline};
use tokfence_store::{LogStore, Period, RequestFilter};
use tokfence_vault::MemoryKeyStore;

/// What the mock upstream observed and how it should answer.
#[derive(Default)]
struct UpstreamState {
    requests: Vec<(String, Vec<(String, String)>)>,
    response_body: Option<Value>,
}

type SharedUpstream = Arc<Mutex<UpstreamState>>;

async fn upstream_handler(
    State(state): State<SharedUpstream>,
    headers: HeaderMap,
    body: String,
) -> axum::response::Response {
    let wants_stream = body.contains("\"stream\":true");
    let mut guard = state.lock().unwrap();
    let seen = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_owned(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    guard.requests.push((body, seen));

    if wants_stream {
        let frames = concat!(
            "data: {\"model\":\"gpt-4o-mini\",\"choices\":[{\"delta\":{\"content\":\"OK\"}}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":8,\"completion_tokens\":2}}\n\n",
            "data: [DONE]\n\n",
        );
        return (
            [("content-type", "text/event-stream")],
            frames.to_owned(),
        )
            .into_response();
    }

    let response = guard.response_body.clone().unwrap_or_else(|| {
        json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o-mini",
            "choices": [{"message": {"role": "assistant", "content": "hi there"}}],
            "usage": {"prompt_tokens": 9, "completion_tokens": 12, "total_tokens": 21}
        })
    });
    Json(response).into_response()
}

struct Harness {
    base_url: String,
    ctx: Arc<DaemonContext>,
    upstream: SharedUpstream,
    client: reqwest::Client,
}

async fn start_harness() -> Harness {
    // Mock upstream on an ephemeral port.
    let upstream: SharedUpstream = Arc::default();
    let upstream_router = axum::Router::new()
        .route("/v1/chat/completions", post(upstream_handler))
        .with_state(Arc::clone(&upstream));
    let upstream_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr: SocketAddr = upstream_listener.local_addr().unwrap();
    tokio::spawn(axum::serve(upstream_listener, upstream_router).into_future());

    // Daemon router on another ephemeral port.
    let mut config = Config::default();
    config.set_provider("openai", &format!("http://{upstream_addr}"));
    let store = Arc::new(LogStore::open_in_memory().unwrap());
    let vault = Arc::new(MemoryKeyStore::with_credentials([("openai", "K")]));
    let ctx = Arc::new(DaemonContext::new(config, store, vault, None).unwrap());

    let app = control::router()
        .fallback(pipeline::proxy_handler)
        .with_state(Arc::clone(&ctx));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(axum::serve(listener, app).into_future());

    Harness {
        base_url: format!("http://{addr}"),
        ctx,
        upstream,
        client: reqwest::Client::new(),
    }
}

fn chat_body() -> Value {
    json!({"model": "gpt-4o-mini", "messages": [{"role": "user", "content": "hi"}]})
}

async fn wait_for_record(store: &LogStore) -> tokfence_core::RequestRecord {
    for _ in 0..40 {
        let records = store.list_requests(&RequestFilter::default()).unwrap();
        if let Some(record) = records.into_iter().next() {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("no request record appeared");
}

#[tokio::test]
async fn test_happy_path_forwards_and_meters() {
    let h = start_harness().await;

    let response = h
        .client
        .post(format!("{}/openai/v1/chat/completions", h.base_url))
        .header("x-api-key", "agent-local-key")
        .json(&chat_body())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let request_id = response
        .headers()
        .get("x-tokfence-request-id")
        .expect("request id header")
        .to_str()
        .unwrap()
        .to_owned();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["choices"][0]["message"]["content"], "hi there");

    // The upstream saw the vault credential, not the agent's header.
    let (_, headers) = h.upstream.lock().unwrap().requests[0].clone();
    let auth = headers
        .iter()
        .find(|(name, _)| name == "authorization")
        .map(|(_, value)| value.clone());
    assert_eq!(auth.as_deref(), Some("Bearer K"));
    assert!(!headers.iter().any(|(name, _)| name == "x-api-key"));

    // Exactly one record, addressable by the response header id.
    let record = wait_for_record(&h.ctx.store).await;
    assert_eq!(record.id.to_string(), request_id);
    assert_eq!(record.provider, "openai");
    assert_eq!(record.model, "gpt-4o-mini");
    assert_eq!(record.status_code, 200);
    assert_eq!(record.input_tokens, 9);
    assert_eq!(record.output_tokens, 12);
    assert!(record.cost_cents > 0);
    assert!(!record.is_streaming);
    assert_eq!(record.error_type, "");

    // The spend was committed to no budget rows (none configured) but
    // the record cost matches the pricing table.
    let expected = h.ctx.pricing.estimate("openai", "gpt-4o-mini", 9, 12);
    assert_eq!(record.cost_cents, expected);
}

#[tokio::test]
async fn test_unknown_provider_is_404() {
    let h = start_harness().await;
    let response = h
        .client
        .post(format!("{}/nobody/v1/chat/completions", h.base_url))
        .json(&chat_body())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "UnknownProvider");
    assert!(h.upstream.lock().unwrap().requests.is_empty());
}

#[tokio::test]
async fn test_revoked_provider_is_403() {
    let h = start_harness().await;
    h.ctx.store.set_provider_revoked("openai", true).unwrap();

    let response = h
        .client
        .post(format!("{}/openai/v1/chat/completions", h.base_url))
        .json(&chat_body())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "ProviderRevoked");
    assert!(h.upstream.lock().unwrap().requests.is_empty());
}

#[tokio::test]
async fn test_budget_refusal_never_reaches_upstream() {
    let h = start_harness().await;
    h.ctx.budget.set_budget("openai", 0.10, Period::Daily).unwrap();
    let handle = h.ctx.budget.check_and_charge("openai", 0).unwrap();
    h.ctx.budget.commit(handle, 1000).unwrap();

    let response = h
        .client
        .post(format!("{}/openai/v1/chat/completions", h.base_url))
        .json(&chat_body())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 429);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "BudgetExceeded");
    assert_eq!(body["limit_cents"], 1000);
    assert_eq!(body["current_spend_cents"], 1000);

    // No upstream call, no record.
    assert!(h.upstream.lock().unwrap().requests.is_empty());
    let records = h.ctx.store.list_requests(&RequestFilter::default()).unwrap();
    assert!(records.is_empty());
}

#[tokio::test]
async fn test_rate_limit_is_429() {
    let h = start_harness().await;
    h.ctx.store.set_rate_limit("openai", 1).unwrap();

    let first = h
        .client
        .post(format!("{}/openai/v1/chat/completions", h.base_url))
        .json(&chat_body())
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 200);

    let second = h
        .client
        .post(format!("{}/openai/v1/chat/completions", h.base_url))
        .json(&chat_body())
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 429);
    let body: Value = second.json().await.unwrap();
    assert_eq!(body["error"], "RateLimited");
}

#[tokio::test]
async fn test_canary_in_response_reds_session() {
    let h = start_harness().await;
    let marker = h.ctx.immune.canary().value().to_owned();
    h.upstream.lock().unwrap().response_body = Some(json!({
        "model": "gpt-4o-mini",
        "choices": [{"message": {"role": "assistant",
                                  "content": BASE64.encode(&marker)}}],
        "usage": {"prompt_tokens": 1, "completion_tokens": 1}
    }));

    // First request succeeds; the canary is only detected, not blocked.
    let first = h
        .client
        .post(format!("{}/openai/v1/chat/completions", h.base_url))
        .json(&chat_body())
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 200);

    // Same body means the same synthesized session: now RED.
    let second = h
        .client
        .post(format!("{}/openai/v1/chat/completions", h.base_url))
        .json(&chat_body())
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 451);
    let body: Value = second.json().await.unwrap();
    assert_eq!(body["error"], "RiskDenied");
}

#[tokio::test]
async fn test_sensor_hit_yellows_then_safe_routes_only() {
    let h = start_harness().await;

    // A request body carrying a credential-shaped token: the sensor
    // fires, the session turns YELLOW, and the POST itself is refused.
    let body = json!({
        "model": "gpt-4o-mini",
        "messages": [{"role": "user", "content": "my key is sk-abcdefghijklmnop123"}]
    });
    let response = h
        .client
        .post(format!("{}/openai/v1/chat/completions", h.base_url))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 451);
    assert!(h.upstream.lock().unwrap().requests.is_empty());
}

#[tokio::test]
async fn test_streaming_forwards_chunks_and_meters() {
    let h = start_harness().await;

    let response = h
        .client
        .post(format!("{}/openai/v1/chat/completions", h.base_url))
        .json(&json!({
            "model": "gpt-4o-mini",
            "stream": true,
            "messages": [{"role": "user", "content": "say OK"}]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key("x-tokfence-request-id"));
    let body = response.text().await.unwrap();
    assert!(body.contains("data: {\"model\":\"gpt-4o-mini\""));
    assert!(body.ends_with("data: [DONE]\n\n"));

    // Metering completes after the stream drains.
    let record = wait_for_record(&h.ctx.store).await;
    assert!(record.is_streaming);
    assert!(record.ttft_ms > 0);
    assert_eq!(record.input_tokens, 8);
    assert_eq!(record.output_tokens, 2);
    assert_eq!(record.model, "gpt-4o-mini");
}

#[tokio::test]
async fn test_health_endpoint() {
    let h = start_harness().await;
    let response = h
        .client
        .get(format!("{}/__tokfence/health", h.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}
