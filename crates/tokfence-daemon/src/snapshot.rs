//! UI snapshot.
//!
//! A periodic JSON summary written atomically for desktop consumers. The
//! snapshot is a pull-based view: the UI reads the file, never the
//! daemon's memory. It must never contain credentials.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokfence_core::money::format_usd;
use tokfence_store::BudgetRow;
use tokfence_vault::KeyStore;
use tracing::{debug, warn};

use crate::context::DaemonContext;

/// Snapshot file name inside the data directory.
pub const SNAPSHOT_FILE: &str = "desktop_snapshot.json";

/// Budget utilization (percent) above which a warning is emitted.
const BUDGET_WARN_PERCENT: i64 = 80;

/// Today's aggregates.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TodayTotals {
    /// Requests proxied since UTC midnight.
    pub requests: u64,
    /// Input tokens.
    pub input_tokens: u64,
    /// Output tokens.
    pub output_tokens: u64,
    /// Estimated cost, hundredths of a cent.
    pub cost_cents: i64,
}

/// One rate-limit row.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitEntry {
    /// Provider name.
    pub provider: String,
    /// Requests per minute.
    pub rpm: u32,
}

/// The on-disk snapshot document.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    /// Always true when written by a live daemon.
    pub daemon_running: bool,
    /// Daemon pid.
    pub pid: u32,
    /// When this snapshot was rendered.
    pub generated_at: DateTime<Utc>,
    /// Daemon start time.
    pub started_at: DateTime<Utc>,
    /// Today's aggregates.
    pub today: TodayTotals,
    /// Provider with the highest cost today.
    pub top_provider: Option<String>,
    /// Budget rows (post-rollover).
    pub budgets: Vec<BudgetRow>,
    /// Providers currently revoked.
    pub revoked_providers: Vec<String>,
    /// Providers with a stored credential (names only).
    pub vault_providers: Vec<String>,
    /// Configured rate limits.
    pub rate_limits: Vec<RateLimitEntry>,
    /// Newest request timestamp.
    pub last_request_at: Option<DateTime<Utc>>,
    /// Human-readable warnings for the UI.
    pub warnings: Vec<String>,
}

/// Render the current snapshot.
///
/// Store failures degrade to empty sections rather than failing the
/// render; the snapshot is advisory.
#[must_use]
pub fn render(ctx: &DaemonContext) -> Snapshot {
    let (requests, input_tokens, output_tokens, cost_cents) =
        ctx.store.today_totals().unwrap_or_default();
    let today = TodayTotals {
        requests,
        input_tokens,
        output_tokens,
        cost_cents,
    };

    let budgets = ctx.budget.status().unwrap_or_default();
    let revoked_providers = ctx.store.list_revoked().unwrap_or_default();

    // Keyring backends may only see the configured candidates; intersect
    // with configuration for display.
    let vault_providers = ctx
        .vault
        .list()
        .map(|mut names| {
            names.retain(|name| ctx.config.providers.contains_key(name));
            names
        })
        .unwrap_or_default();

    let rate_limits = ctx
        .store
        .list_rate_limits()
        .unwrap_or_default()
        .into_iter()
        .map(|(provider, rpm)| RateLimitEntry { provider, rpm })
        .collect();

    let warnings = build_warnings(&budgets, &revoked_providers);

    Snapshot {
        daemon_running: true,
        pid: std::process::id(),
        generated_at: Utc::now(),
        started_at: ctx.started_at,
        today,
        top_provider: ctx
            .store
            .top_provider_today()
            .ok()
            .flatten()
            .map(|(provider, _)| provider),
        budgets,
        revoked_providers,
        vault_providers,
        rate_limits,
        last_request_at: ctx.store.last_request_at(None).ok().flatten(),
        warnings,
    }
}

fn build_warnings(budgets: &[BudgetRow], revoked: &[String]) -> Vec<String> {
    let mut warnings = Vec::new();
    for row in budgets {
        if row.limit_cents <= 0 {
            continue;
        }
        let percent = row.current_spend_cents.saturating_mul(100) / row.limit_cents;
        if percent >= BUDGET_WARN_PERCENT {
            warnings.push(format!(
                "{} {} budget at {percent}% ({} of {})",
                row.scope,
                row.period,
                format_usd(row.current_spend_cents),
                format_usd(row.limit_cents),
            ));
        }
    }
    for provider in revoked {
        warnings.push(format!("provider {provider} is revoked"));
    }
    warnings
}

/// Write a snapshot atomically.
///
/// # Errors
///
/// Returns the underlying I/O error.
pub fn write(path: &Path, snapshot: &Snapshot) -> std::io::Result<()> {
    let rendered = serde_json::to_vec_pretty(snapshot)
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    tokfence_config::atomic_write(path, &rendered)
}

/// Periodic snapshot task; exits when `shutdown` fires.
pub async fn run_writer(
    ctx: Arc<DaemonContext>,
    path: std::path::PathBuf,
    interval: std::time::Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = render(&ctx);
                if let Err(e) = write(&path, &snapshot) {
                    warn!(error = %e, "snapshot write failed");
                } else {
                    debug!(path = %path.display(), "snapshot written");
                }
            },
            _ = shutdown.changed() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokfence_config::Config;
    use tokfence_store::{LogStore, Period};
    use tokfence_vault::{KeyStore, MemoryKeyStore};

    fn context() -> DaemonContext {
        let mut config = Config::default();
        config.set_provider("openai", "https://api.openai.com");
        let store = Arc::new(LogStore::open_in_memory().unwrap());
        let vault = Arc::new(MemoryKeyStore::new());
        DaemonContext::new(config, store, vault, None).unwrap()
    }

    #[test]
    fn test_snapshot_never_contains_credentials() {
        let ctx = context();
        ctx.vault.set("openai", "sk-super-secret-credential").unwrap();

        let snapshot = render(&ctx);
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(!json.contains("sk-super-secret-credential"));
        assert_eq!(snapshot.vault_providers, vec!["openai"]);
    }

    #[test]
    fn test_vault_list_intersected_with_config() {
        let ctx = context();
        ctx.vault.set("openai", "sk-1").unwrap();
        ctx.vault.set("unconfigured", "sk-2").unwrap();

        let snapshot = render(&ctx);
        assert_eq!(snapshot.vault_providers, vec!["openai"]);
    }

    #[test]
    fn test_budget_warning_at_80_percent() {
        let ctx = context();
        ctx.budget.set_budget("openai", 0.10, Period::Daily).unwrap();
        let handle = ctx.budget.check_and_charge("openai", 0).unwrap();
        ctx.budget.commit(handle, 850).unwrap();

        let snapshot = render(&ctx);
        assert_eq!(snapshot.warnings.len(), 1);
        assert!(snapshot.warnings[0].contains("85%"));
    }

    #[test]
    fn test_revoked_warning() {
        let ctx = context();
        ctx.store.set_provider_revoked("openai", true).unwrap();
        let snapshot = render(&ctx);
        assert_eq!(snapshot.revoked_providers, vec!["openai"]);
        assert!(snapshot.warnings.iter().any(|w| w.contains("revoked")));
    }

    #[test]
    fn test_atomic_write() {
        let ctx = context();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SNAPSHOT_FILE);
        write(&path, &render(&ctx)).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["daemon_running"], true);
    }
}
