//! Control endpoints.
//!
//! Served on the same mux as the proxy, under `/__tokfence/`. The CLI
//! and the daemon mutate the same store tables through the same code
//! paths, so either surface observes the other's changes immediately.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::json;
use tokfence_core::ErrorKind;
use tokfence_store::Period;

use crate::context::DaemonContext;
use crate::error::ProxyError;
use crate::snapshot;

/// Path prefix for every control endpoint.
pub const CONTROL_PREFIX: &str = "/__tokfence";

/// Build the control router.
pub fn router() -> axum::Router<Arc<DaemonContext>> {
    axum::Router::new()
        .route("/__tokfence/health", get(health))
        .route("/__tokfence/status", get(status))
        .route("/__tokfence/snapshot", get(snapshot_view))
        .route("/__tokfence/revoke", post(revoke))
        .route("/__tokfence/restore", post(restore))
        .route("/__tokfence/kill", post(kill_all))
        .route("/__tokfence/unkill", post(unkill_all))
        .route("/__tokfence/budgets", get(budgets).post(set_budget))
        .route("/__tokfence/budgets/clear", post(clear_budget))
        .route("/__tokfence/ratelimits", get(rate_limits).post(set_rate_limit))
        .route("/__tokfence/ratelimits/clear", post(clear_rate_limit))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn status(State(ctx): State<Arc<DaemonContext>>) -> Response {
    let (requests, input_tokens, output_tokens, cost_cents) =
        ctx.store.today_totals().unwrap_or_default();
    Json(json!({
        "pid": std::process::id(),
        "started_at": ctx.started_at,
        "listen_addr": ctx.config.listen_addr(),
        "providers": ctx.config.providers.keys().collect::<Vec<_>>(),
        "immune_enabled": ctx.config.daemon.immune_enabled,
        "today": {
            "requests": requests,
            "input_tokens": input_tokens,
            "output_tokens": output_tokens,
            "cost_cents": cost_cents,
        },
    }))
    .into_response()
}

async fn snapshot_view(State(ctx): State<Arc<DaemonContext>>) -> Json<snapshot::Snapshot> {
    Json(snapshot::render(&ctx))
}

#[derive(Deserialize)]
struct ProviderBody {
    provider: String,
}

async fn revoke(
    State(ctx): State<Arc<DaemonContext>>,
    Json(body): Json<ProviderBody>,
) -> Result<Json<serde_json::Value>, ProxyError> {
    ctx.store.set_provider_revoked(&body.provider, true)?;
    Ok(Json(json!({"provider": body.provider, "revoked": true})))
}

async fn restore(
    State(ctx): State<Arc<DaemonContext>>,
    Json(body): Json<ProviderBody>,
) -> Result<Json<serde_json::Value>, ProxyError> {
    ctx.store.set_provider_revoked(&body.provider, false)?;
    Ok(Json(json!({"provider": body.provider, "revoked": false})))
}

async fn kill_all(
    State(ctx): State<Arc<DaemonContext>>,
) -> Result<Json<serde_json::Value>, ProxyError> {
    let providers: Vec<String> = ctx.config.providers.keys().cloned().collect();
    ctx.store.set_all_providers_revoked(&providers, true)?;
    Ok(Json(json!({"revoked": providers})))
}

async fn unkill_all(
    State(ctx): State<Arc<DaemonContext>>,
) -> Result<Json<serde_json::Value>, ProxyError> {
    let providers: Vec<String> = ctx.config.providers.keys().cloned().collect();
    ctx.store.set_all_providers_revoked(&providers, false)?;
    Ok(Json(json!({"restored": providers})))
}

async fn budgets(
    State(ctx): State<Arc<DaemonContext>>,
) -> Result<Json<serde_json::Value>, ProxyError> {
    let rows = ctx.budget.status()?;
    Ok(Json(json!({"budgets": rows})))
}

#[derive(Deserialize)]
struct BudgetBody {
    scope: String,
    amount_usd: f64,
    period: String,
}

async fn set_budget(
    State(ctx): State<Arc<DaemonContext>>,
    Json(body): Json<BudgetBody>,
) -> Result<Json<serde_json::Value>, ProxyError> {
    let period: Period = body
        .period
        .parse()
        .map_err(|e: String| ProxyError::new(ErrorKind::InvalidArgument, e))?;
    ctx.budget.set_budget(&body.scope, body.amount_usd, period)?;
    Ok(Json(json!({
        "scope": body.scope,
        "period": period.as_str(),
        "amount_usd": body.amount_usd,
    })))
}

#[derive(Deserialize)]
struct ScopeBody {
    scope: String,
}

async fn clear_budget(
    State(ctx): State<Arc<DaemonContext>>,
    Json(body): Json<ScopeBody>,
) -> Result<Json<serde_json::Value>, ProxyError> {
    ctx.budget.clear_budget(&body.scope)?;
    Ok(Json(json!({"scope": body.scope, "cleared": true})))
}

async fn rate_limits(
    State(ctx): State<Arc<DaemonContext>>,
) -> Result<Json<serde_json::Value>, ProxyError> {
    let limits: Vec<serde_json::Value> = ctx
        .store
        .list_rate_limits()?
        .into_iter()
        .map(|(provider, rpm)| json!({"provider": provider, "rpm": rpm}))
        .collect();
    Ok(Json(json!({"rate_limits": limits})))
}

#[derive(Deserialize)]
struct RateLimitBody {
    provider: String,
    rpm: u32,
}

async fn set_rate_limit(
    State(ctx): State<Arc<DaemonContext>>,
    Json(body): Json<RateLimitBody>,
) -> Result<Json<serde_json::Value>, ProxyError> {
    if body.rpm == 0 {
        return Err(ProxyError::new(
            ErrorKind::InvalidArgument,
            "rpm must be positive",
        ));
    }
    ctx.store.set_rate_limit(&body.provider, body.rpm)?;
    Ok(Json(json!({"provider": body.provider, "rpm": body.rpm})))
}

async fn clear_rate_limit(
    State(ctx): State<Arc<DaemonContext>>,
    Json(body): Json<ProviderBody>,
) -> Result<Json<serde_json::Value>, ProxyError> {
    ctx.store.clear_rate_limit(&body.provider)?;
    Ok(Json(json!({"provider": body.provider, "cleared": true})))
}
