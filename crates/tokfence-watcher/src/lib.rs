//! Usage reconciliation.
//!
//! The watcher periodically compares what the proxy metered locally with
//! what each provider's billing/usage API reports. A remote total that
//! outruns local accounting beyond configured thresholds, or that grows
//! while the proxy has been idle, suggests the credential is being used
//! outside the fence, and can trigger an automatic revoke.
//!
//! Reconciliation is eventually consistent: provider billing APIs lag,
//! so a single flagged cycle is a signal, not proof.

pub mod error;
pub mod parse;
pub mod usage;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

pub use error::{WatcherError, WatcherResult};
pub use parse::RemoteUsage;
use tokfence_store::{GroupBy, LogStore, Period, RequestFilter};
use tokfence_vault::KeyStore;

/// Minimum polling interval.
pub const MIN_INTERVAL: Duration = Duration::from_secs(10);
/// Minimum idle window.
pub const MIN_IDLE_WINDOW: Duration = Duration::from_secs(60);

/// Watcher configuration.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Providers to reconcile, with their upstream base URLs.
    pub providers: Vec<(String, String)>,
    /// Window the comparison covers.
    pub period: Period,
    /// Time between cycles (continuous mode).
    pub interval: Duration,
    /// Flag when remote cost exceeds local by more than this many USD.
    pub threshold_usd: f64,
    /// Flag when remote tokens exceed local by more than this many.
    pub threshold_tokens: u64,
    /// Flag when remote requests exceed local by more than this many.
    pub threshold_requests: u64,
    /// Local quiet time before remote growth counts as an idle leak.
    pub idle_window: Duration,
    /// Revoke a provider when a leak is suspected.
    pub auto_revoke: bool,
    /// Per-provider usage endpoint overrides.
    pub custom_endpoints: HashMap<String, String>,
}

impl WatcherConfig {
    /// Validate bounds.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::InvalidConfig`] when a bound is violated.
    pub fn validate(&self) -> WatcherResult<()> {
        if self.providers.is_empty() {
            return Err(WatcherError::InvalidConfig(
                "at least one provider is required".to_owned(),
            ));
        }
        if self.interval < MIN_INTERVAL {
            return Err(WatcherError::InvalidConfig(format!(
                "interval must be at least {}s",
                MIN_INTERVAL.as_secs()
            )));
        }
        if self.idle_window < MIN_IDLE_WINDOW {
            return Err(WatcherError::InvalidConfig(format!(
                "idle window must be at least {}s",
                MIN_IDLE_WINDOW.as_secs()
            )));
        }
        if !self.threshold_usd.is_finite() || self.threshold_usd < 0.0 {
            return Err(WatcherError::InvalidConfig(
                "cost threshold must be non-negative".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Locally metered usage for one provider over the window.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LocalUsage {
    /// Requests proxied.
    pub request_count: u64,
    /// Input tokens metered.
    pub input_tokens: u64,
    /// Output tokens metered.
    pub output_tokens: u64,
    /// Estimated cost, hundredths of a cent.
    pub cost_cents: i64,
    /// Newest request timestamp, if any.
    pub last_request_at: Option<DateTime<Utc>>,
}

/// Why a provider was flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeakReason {
    /// Remote cost exceeded local beyond the USD threshold.
    CostDrift,
    /// Remote tokens exceeded local beyond the token threshold.
    TokenDrift,
    /// Remote requests exceeded local beyond the request threshold.
    RequestDrift,
    /// Remote totals grew while the proxy sat idle.
    IdleLeak,
}

/// One provider's reconciliation result.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderReport {
    /// Provider name.
    pub provider: String,
    /// What the proxy metered.
    pub local: LocalUsage,
    /// What the provider reported, when reachable.
    pub remote: Option<RemoteUsage>,
    /// Whether any leak signal fired.
    pub leak_suspected: bool,
    /// Signals that fired.
    pub reasons: Vec<LeakReason>,
    /// Whether this cycle revoked the provider.
    pub auto_revoked: bool,
    /// Fetch failure detail, when remote is `None`.
    pub error: Option<String>,
}

/// One watcher cycle's output.
#[derive(Debug, Clone, Serialize)]
pub struct WatchReport {
    /// When the cycle ran.
    pub generated_at: DateTime<Utc>,
    /// Start of the comparison window.
    pub window_start: DateTime<Utc>,
    /// Per-provider results.
    pub providers: Vec<ProviderReport>,
    /// Total leak flags raised this cycle.
    pub alerts: u32,
}

/// The reconciler.
pub struct Watcher {
    config: WatcherConfig,
    store: Arc<LogStore>,
    vault: Arc<dyn KeyStore>,
    client: reqwest::Client,
    /// Previous cycle's remote snapshot, per provider.
    previous_remote: Mutex<HashMap<String, RemoteUsage>>,
}

impl Watcher {
    /// Create a watcher.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::InvalidConfig`] if the config fails
    /// validation.
    pub fn new(
        config: WatcherConfig,
        store: Arc<LogStore>,
        vault: Arc<dyn KeyStore>,
    ) -> WatcherResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            vault,
            client: reqwest::Client::new(),
            previous_remote: Mutex::new(HashMap::new()),
        })
    }

    /// The configured cycle interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    /// Run one reconciliation cycle over every configured provider.
    ///
    /// Fetch failures are per-provider and never abort the cycle.
    ///
    /// # Errors
    ///
    /// Returns a store error if local accounting cannot be read.
    pub async fn cycle(&self) -> WatcherResult<WatchReport> {
        let now = Utc::now();
        let window_start = self.config.period.truncate(now);
        let mut providers = Vec::new();
        let mut alerts = 0u32;

        for (provider, upstream) in &self.config.providers {
            let report = self
                .reconcile_provider(provider, upstream, window_start, now)
                .await?;
            if report.leak_suspected {
                alerts = alerts.saturating_add(1);
            }
            providers.push(report);
        }

        Ok(WatchReport {
            generated_at: now,
            window_start,
            providers,
            alerts,
        })
    }

    async fn reconcile_provider(
        &self,
        provider: &str,
        upstream: &str,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> WatcherResult<ProviderReport> {
        let local = self.local_usage(provider, window_start)?;

        let endpoints = match self.config.custom_endpoints.get(provider) {
            Some(custom) => vec![custom.clone()],
            None => usage::candidate_endpoints(provider, upstream, window_start, now),
        };

        let remote = match self.vault.get(provider) {
            Ok(credential) => {
                usage::fetch_usage(&self.client, provider, &credential, &endpoints).await
            },
            Err(e) => Err(WatcherError::FetchFailure {
                provider: provider.to_owned(),
                detail: format!("credential unavailable: {e}"),
            }),
        };

        let (remote, error) = match remote {
            Ok(usage) => (Some(usage), None),
            Err(e) => {
                warn!(provider, error = %e, "usage fetch failed");
                (None, Some(e.to_string()))
            },
        };

        let mut reasons = Vec::new();
        if let Some(remote_usage) = remote {
            self.evaluate_drift(&local, &remote_usage, &mut reasons);
            self.evaluate_idle(provider, &local, &remote_usage, now, &mut reasons);
            if let Ok(mut previous) = self.previous_remote.lock() {
                previous.insert(provider.to_owned(), remote_usage);
            }
        }

        let leak_suspected = !reasons.is_empty();
        let mut auto_revoked = false;
        if leak_suspected {
            info!(provider, ?reasons, "leak suspected");
            if self.config.auto_revoke {
                self.store.set_provider_revoked(provider, true)?;
                auto_revoked = true;
                warn!(provider, "auto-revoked after leak signal");
            }
        }

        Ok(ProviderReport {
            provider: provider.to_owned(),
            local,
            remote,
            leak_suspected,
            reasons,
            auto_revoked,
            error,
        })
    }

    fn local_usage(&self, provider: &str, since: DateTime<Utc>) -> WatcherResult<LocalUsage> {
        let filter = RequestFilter {
            provider: Some(provider.to_owned()),
            since: Some(since),
            ..Default::default()
        };
        let rows = self.store.stats(&filter, GroupBy::Provider)?;
        let mut local = LocalUsage {
            last_request_at: self.store.last_request_at(Some(provider))?,
            ..Default::default()
        };
        if let Some(row) = rows.first() {
            local.request_count = row.request_count;
            local.input_tokens = row.input_tokens;
            local.output_tokens = row.output_tokens;
            local.cost_cents = row.cost_cents;
        }
        Ok(local)
    }

    fn evaluate_drift(
        &self,
        local: &LocalUsage,
        remote: &RemoteUsage,
        reasons: &mut Vec<LeakReason>,
    ) {
        if let Some(remote_cost) = remote.cost_cents {
            let delta = remote_cost.saturating_sub(local.cost_cents);
            if delta > tokfence_core::usd_to_cents(self.config.threshold_usd) {
                reasons.push(LeakReason::CostDrift);
            }
        }
        if let Some(remote_tokens) = remote.total_tokens() {
            let local_tokens = local.input_tokens.saturating_add(local.output_tokens);
            if remote_tokens.saturating_sub(local_tokens) > self.config.threshold_tokens {
                reasons.push(LeakReason::TokenDrift);
            }
        }
        if let Some(remote_requests) = remote.requests {
            if remote_requests.saturating_sub(local.request_count)
                > self.config.threshold_requests
            {
                reasons.push(LeakReason::RequestDrift);
            }
        }
    }

    fn evaluate_idle(
        &self,
        provider: &str,
        local: &LocalUsage,
        remote: &RemoteUsage,
        now: DateTime<Utc>,
        reasons: &mut Vec<LeakReason>,
    ) {
        let idle = match local.last_request_at {
            Some(last) => {
                let quiet = now.signed_duration_since(last);
                quiet.num_seconds() >= i64::try_from(self.config.idle_window.as_secs()).unwrap_or(i64::MAX)
            },
            // Never proxied anything: any remote growth is suspicious.
            None => true,
        };
        if !idle {
            return;
        }
        let Ok(previous) = self.previous_remote.lock() else {
            return;
        };
        if let Some(prev) = previous.get(provider) {
            if remote.grew_since(prev) {
                reasons.push(LeakReason::IdleLeak);
            }
        }
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("providers", &self.config.providers.len())
            .finish_non_exhaustive()
    }
}
