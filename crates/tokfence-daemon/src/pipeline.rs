//! The proxy request pipeline.
//!
//! Every proxied call targets `/<provider>/<upstream-path>`. The handler
//! walks a fixed sequence (parse, capability, admission, revocation,
//! rate limit, sensors, budget, credential, forward) and any step may
//! short-circuit with an error response. Only requests that reach the
//! upstream produce a request record.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue, Method};
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use tokfence_core::{ErrorKind, RequestRecord, RiskState};
use tokfence_immune::{Capability, CapabilityScope};
use tokfence_vault::KeyStore;
use tracing::{debug, error, warn};

use crate::caller::{CALLER_HEADER, CallerIdentity};
use crate::context::DaemonContext;
use crate::error::ProxyError;
use crate::headers;
use crate::host::UdsConnectInfo;
use crate::streaming;
use crate::usage_extract::{RequestInfo, UsageTotals};

/// Response header carrying the request-record id.
pub const REQUEST_ID_HEADER: &str = "x-tokfence-request-id";

/// Maximum buffered request body.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Everything resolved before the upstream call.
struct Admitted {
    provider: String,
    upstream_path: String,
    query: Option<String>,
    method: Method,
    body: bytes::Bytes,
    body_text: String,
    request_info: RequestInfo,
    capability: Capability,
    caller: CallerIdentity,
    request_hash: String,
}

/// The axum fallback handler for proxied requests.
pub async fn proxy_handler(
    State(ctx): State<Arc<DaemonContext>>,
    request: Request,
) -> Response {
    let started = Instant::now();
    match run_pipeline(&ctx, request, started).await {
        Ok(response) => response,
        Err(err) => {
            debug!(kind = %err.kind, message = %err.message, "request rejected");
            err.into_response()
        },
    }
}

async fn run_pipeline(
    ctx: &Arc<DaemonContext>,
    request: Request,
    started: Instant,
) -> Result<Response, ProxyError> {
    // 1. Parse the URL: first segment selects the provider.
    let (parts, body) = request.into_parts();
    let path = parts.uri.path().to_owned();
    let query = parts.uri.query().map(ToOwned::to_owned);
    let trimmed = path.trim_start_matches('/');
    let (provider, rest) = match trimmed.split_once('/') {
        Some((provider, rest)) => (provider.to_owned(), format!("/{rest}")),
        None if !trimmed.is_empty() => (trimmed.to_owned(), "/".to_owned()),
        None => {
            return Err(ProxyError::new(
                ErrorKind::UnknownProvider,
                "request path must be /<provider>/<upstream-path>",
            ));
        },
    };
    let Some(provider_config) = ctx.config.provider(&provider).cloned() else {
        return Err(ProxyError::new(
            ErrorKind::UnknownProvider,
            format!("provider {provider:?} is not configured"),
        ));
    };

    // Read the bounded body up front; the sensors, the planned-cost
    // estimate, and the forward all need it.
    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ProxyError::new(ErrorKind::InvalidArgument, format!("body read: {e}")))?;
    let body_text = String::from_utf8_lossy(&body).into_owned();
    let request_info = RequestInfo::from_body(&body);
    let request_hash = hash_body(&body);

    let caller = identify_caller(&parts.headers, parts.extensions.get::<ConnectInfo<UdsConnectInfo>>());

    // 2. Capability: validate if presented, synthesize otherwise.
    let capability = match parts
        .headers
        .get(tokfence_immune::CAPABILITY_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        Some(token) => ctx.immune.validate(token).map_err(|e| {
            ProxyError::new(ErrorKind::InvalidCapability, e.to_string())
        })?,
        None => synthesize_capability(&caller, &request_hash),
    };

    let admitted = Admitted {
        provider,
        upstream_path: rest,
        query,
        method: parts.method.clone(),
        body,
        body_text,
        request_info,
        capability,
        caller,
        request_hash,
    };

    // 3. Admission under the session's current risk state.
    check_admission(ctx, &admitted)?;

    // 4. Revocation.
    if ctx.store.is_provider_revoked(&admitted.provider)? {
        return Err(ProxyError::new(
            ErrorKind::ProviderRevoked,
            format!("provider {:?} is revoked", admitted.provider),
        ));
    }

    // 5. Rate limit.
    let rpm = ctx.store.get_rate_limit(&admitted.provider)?;
    if !ctx.limiter.try_consume(&admitted.provider, rpm) {
        return Err(ProxyError::with_extra(
            ErrorKind::RateLimited,
            format!("rate limit reached for {:?}", admitted.provider),
            serde_json::json!({"rpm": rpm}),
        ));
    }

    // 6. Sensors over the decoded body, then re-check admission. With
    // the immune layer disabled the sensors stay quiet and sessions
    // never leave GREEN, so admission is a no-op.
    let immune_enabled = ctx.config.daemon.immune_enabled;
    let session = admitted.capability.session_id.clone();
    if immune_enabled {
        for event in ctx.immune.sensors.scan_body(&admitted.body_text) {
            ctx.immune.risk.escalate(&session, event);
        }
        if ctx.immune.sensors.is_disallowed_path(&admitted.upstream_path) {
            ctx.immune
                .risk
                .escalate(&session, tokfence_core::RiskEvent::DisallowedEndpoint);
        }
        check_admission(ctx, &admitted)?;
    }

    // 7. Budget gate with a best-effort planned cost.
    let planned_cents = if admitted.request_info.stream {
        0
    } else {
        ctx.pricing.estimate(
            &admitted.provider,
            &admitted.request_info.model,
            RequestInfo::estimated_input_tokens(admitted.body.len()),
            0,
        )
    };
    let handle = ctx
        .budget
        .check_and_charge(&admitted.provider, planned_cents)?;

    // 8. Credential, read at dispatch time only.
    let credential = {
        let vault = Arc::clone(&ctx.vault);
        let provider = admitted.provider.clone();
        tokio::task::spawn_blocking(move || vault.get(&provider))
            .await
            .map_err(|e| ProxyError::new(ErrorKind::VaultLocked, e.to_string()))??
    };

    // Build the upstream request.
    let mut upstream_headers = headers::sanitize_for_upstream(&parts.headers);
    headers::inject_auth(&mut upstream_headers, &admitted.provider, &credential);
    headers::apply_extra_headers(&mut upstream_headers, &provider_config.extra_headers);
    drop(credential);

    let mut url = format!("{}{}", provider_config.upstream, admitted.upstream_path);
    if let Some(query) = &admitted.query {
        url.push('?');
        url.push_str(query);
    }

    // 9. Dispatch.
    let mut record = base_record(&admitted);
    let response = ctx
        .http
        .request(admitted.method.clone(), url)
        .headers(upstream_headers)
        .body(admitted.body.clone())
        .send()
        .await;

    let upstream = match response {
        Ok(r) => r,
        Err(e) => {
            // 13. Network failure before the first upstream byte.
            record.status_code = 0;
            record.error_type = "transport_error".to_owned();
            record.error_message = sanitize_transport_error(e);
            record.latency_ms = elapsed_ms(started);
            insert_record(ctx, &record);
            drop(handle);
            return Err(ProxyError::with_extra(
                ErrorKind::UpstreamUnreachable,
                format!("upstream unreachable for {:?}", admitted.provider),
                serde_json::json!({"request_id": record.id.to_string()}),
            ));
        },
    };

    let status = upstream.status();
    record.status_code = status.as_u16();
    record.error_type = normalize_status(status.as_u16());
    let response_headers = headers::sanitize_for_client(upstream.headers());

    // 10. Streaming vs buffered.
    let streaming = is_streaming(&parts.headers, upstream.headers(), &admitted.request_info);
    if streaming {
        record.is_streaming = true;
        return Ok(streaming::forward_streaming(
            Arc::clone(ctx),
            upstream,
            status,
            response_headers,
            record,
            handle,
            session,
            started,
        ));
    }

    // Buffered path: read the whole body, scan, meter, reply.
    let body_bytes = match upstream.bytes().await {
        Ok(b) => b,
        Err(e) => {
            record.error_type = "transport_error".to_owned();
            record.error_message = sanitize_transport_error(e);
            record.latency_ms = elapsed_ms(started);
            insert_record(ctx, &record);
            drop(handle);
            return Err(ProxyError::new(
                ErrorKind::UpstreamUnreachable,
                "upstream body read failed",
            ));
        },
    };

    if immune_enabled {
        let body_text = String::from_utf8_lossy(&body_bytes);
        if ctx.immune.canary().scan(&body_text) {
            warn!(session = %session, "canary observed in response body");
            ctx.immune
                .risk
                .escalate(&session, tokfence_core::RiskEvent::CanaryLeak);
        }
    }

    let mut totals = UsageTotals::default();
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&body_bytes) {
        totals.absorb(&value);
    }
    finalize_record(&mut record, &totals, &admitted.request_info, started, 0);
    record.cost_cents = ctx.pricing.estimate(
        &record.provider,
        &record.model,
        record.input_tokens,
        record.output_tokens,
    );

    // 11. Log, then commit the measured spend.
    insert_record(ctx, &record);
    if let Err(e) = ctx.budget.commit(handle, record.cost_cents) {
        error!(error = %e, "budget commit failed");
    }

    let mut builder = Response::builder().status(status);
    if let Some(headers_mut) = builder.headers_mut() {
        *headers_mut = response_headers;
        append_request_id(headers_mut, &record);
    }
    builder
        .body(Body::from(body_bytes))
        .map_err(|e| ProxyError::new(ErrorKind::LocalStoreError, e.to_string()))
}

/// Admission check against the session's current risk state.
fn check_admission(ctx: &DaemonContext, admitted: &Admitted) -> Result<(), ProxyError> {
    let state = ctx.immune.risk.state_for(&admitted.capability.session_id);
    if tokfence_immune::admit(
        state,
        admitted.capability.scope,
        admitted.method.as_str(),
        &admitted.upstream_path,
    ) {
        Ok(())
    } else {
        Err(ProxyError::with_extra(
            ErrorKind::RiskDenied,
            format!("session risk state {state} denies this request"),
            serde_json::json!({"risk_state": state.as_str()}),
        ))
    }
}

fn identify_caller(
    headers: &HeaderMap,
    uds: Option<&ConnectInfo<UdsConnectInfo>>,
) -> CallerIdentity {
    if let Some(value) = headers.get(CALLER_HEADER).and_then(|v| v.to_str().ok()) {
        if !value.trim().is_empty() {
            return CallerIdentity::from_header(value);
        }
    }
    if let Some(ConnectInfo(info)) = uds {
        if let Some(pid) = info.peer_pid {
            if let Ok(pid) = u32::try_from(pid) {
                return CallerIdentity::from_peer_pid(pid);
            }
        }
    }
    CallerIdentity::default()
}

/// Capability used when the client presented none.
fn synthesize_capability(caller: &CallerIdentity, request_hash: &str) -> Capability {
    let session_id = if request_hash.is_empty() {
        "anonymous".to_owned()
    } else {
        request_hash.to_owned()
    };
    let now = chrono::Utc::now().timestamp();
    Capability {
        client_id: caller.client_id(),
        session_id,
        scope: CapabilityScope::Proxy,
        risk_state: RiskState::Green,
        expiry: now.saturating_add(tokfence_immune::DEFAULT_TTL_SECS),
        nonce: String::new(),
        issued_at: now,
    }
}

fn hash_body(body: &[u8]) -> String {
    if body.is_empty() {
        return String::new();
    }
    let digest = Sha256::digest(body);
    hex::encode(&digest[..8])
}

fn base_record(admitted: &Admitted) -> RequestRecord {
    let mut record = RequestRecord::new(
        &admitted.provider,
        admitted.method.as_str(),
        &format!("{} {}", admitted.method, admitted.upstream_path),
    );
    record.model = admitted.request_info.model.clone();
    record.caller_name = admitted.caller.name.clone();
    record.caller_pid = admitted.caller.pid;
    record.request_hash = admitted.request_hash.clone();
    record
}

/// Fold measured usage into the record.
pub(crate) fn finalize_record(
    record: &mut RequestRecord,
    totals: &UsageTotals,
    request_info: &RequestInfo,
    started: Instant,
    ttft_ms: u64,
) {
    record.input_tokens = totals.input_tokens;
    record.output_tokens = totals.output_tokens;
    if let Some(model) = &totals.model {
        record.model = model.clone();
    } else if record.model.is_empty() {
        record.model = request_info.model.clone();
    }
    record.latency_ms = elapsed_ms(started);
    record.ttft_ms = ttft_ms;
}

pub(crate) fn insert_record(ctx: &DaemonContext, record: &RequestRecord) {
    // A store failure after the response is committed must not fail the
    // exchange; it is logged and the response proceeds.
    if let Err(e) = ctx.store.insert_request(record) {
        error!(error = %e, id = %record.id, "failed to insert request record");
    }
}

pub(crate) fn append_request_id(headers: &mut HeaderMap, record: &RequestRecord) {
    if let Ok(value) = HeaderValue::from_str(&record.id.to_string()) {
        headers.insert(REQUEST_ID_HEADER, value);
    }
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Map an upstream status to the normalized error-type table.
fn normalize_status(status: u16) -> String {
    match status {
        400..=499 => "status_4xx".to_owned(),
        500..=599 => "status_5xx".to_owned(),
        _ => String::new(),
    }
}

/// Keep transport errors free of URLs (which can carry query strings).
fn sanitize_transport_error(e: reqwest::Error) -> String {
    e.without_url().to_string()
}

/// Streaming is signaled by the request `Accept`, the response
/// `Content-Type`, or the body's `stream` flag.
fn is_streaming(
    request_headers: &HeaderMap,
    upstream_headers: &reqwest::header::HeaderMap,
    request_info: &RequestInfo,
) -> bool {
    let accept_sse = request_headers
        .get("accept")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("text/event-stream"));
    let content_sse = upstream_headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("text/event-stream"));
    accept_sse || content_sse || request_info.stream
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_status() {
        assert_eq!(normalize_status(200), "");
        assert_eq!(normalize_status(404), "status_4xx");
        assert_eq!(normalize_status(500), "status_5xx");
    }

    #[test]
    fn test_hash_body() {
        assert_eq!(hash_body(b""), "");
        let h = hash_body(b"{\"model\":\"gpt-4o-mini\"}");
        assert_eq!(h.len(), 16);
        assert_eq!(h, hash_body(b"{\"model\":\"gpt-4o-mini\"}"));
        assert_ne!(h, hash_body(b"other"));
    }

    #[test]
    fn test_synthesized_capability_defaults() {
        let caller = CallerIdentity::default();
        let cap = synthesize_capability(&caller, "abc123");
        assert_eq!(cap.client_id, "anonymous");
        assert_eq!(cap.session_id, "abc123");
        assert_eq!(cap.scope, CapabilityScope::Proxy);
        assert_eq!(cap.risk_state, RiskState::Green);

        let cap = synthesize_capability(&caller, "");
        assert_eq!(cap.session_id, "anonymous");
    }

    #[test]
    fn test_streaming_detection() {
        let mut request_headers = HeaderMap::new();
        let upstream_headers = reqwest::header::HeaderMap::new();
        let plain = RequestInfo::default();
        assert!(!is_streaming(&request_headers, &upstream_headers, &plain));

        // Body flag.
        let stream_body = RequestInfo {
            stream: true,
            ..Default::default()
        };
        assert!(is_streaming(&request_headers, &upstream_headers, &stream_body));

        // Accept header.
        request_headers.insert("accept", HeaderValue::from_static("text/event-stream"));
        assert!(is_streaming(&request_headers, &upstream_headers, &plain));

        // Upstream content type.
        let request_headers = HeaderMap::new();
        let mut upstream_headers = reqwest::header::HeaderMap::new();
        upstream_headers.insert(
            "content-type",
            "text/event-stream; charset=utf-8".parse().unwrap(),
        );
        assert!(is_streaming(&request_headers, &upstream_headers, &plain));
    }
}
