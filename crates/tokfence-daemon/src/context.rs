//! Shared daemon state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokfence_config::Config;
use tokfence_engine::{BudgetEngine, PricingTable, RateLimiter};
use tokfence_immune::ImmuneCore;
use tokfence_store::LogStore;
use tokfence_vault::KeyStore;

/// Everything a request handler needs, shared behind one `Arc`.
pub struct DaemonContext {
    /// Loaded configuration.
    pub config: Config,
    /// The embedded store.
    pub store: Arc<LogStore>,
    /// The credential vault.
    pub vault: Arc<dyn KeyStore>,
    /// Budget gate.
    pub budget: BudgetEngine,
    /// Token buckets.
    pub limiter: RateLimiter,
    /// Capability/risk/sensor/canary layer.
    pub immune: ImmuneCore,
    /// Embedded pricing.
    pub pricing: PricingTable,
    /// Upstream HTTP client (connection-pooled, no global timeout so
    /// long streams survive; per-call deadlines come from the caller).
    pub http: reqwest::Client,
    /// Process start time.
    pub started_at: DateTime<Utc>,
    /// Identity nonce recorded in the PID file.
    pub nonce: String,
}

impl DaemonContext {
    /// Assemble the context.
    ///
    /// `nonce` is the identity nonce this process was started with (or a
    /// fresh one for foreground runs).
    ///
    /// # Errors
    ///
    /// Returns an error if the security core fails to initialize.
    pub fn new(
        config: Config,
        store: Arc<LogStore>,
        vault: Arc<dyn KeyStore>,
        nonce: Option<String>,
    ) -> Result<Self, tokfence_immune::ImmuneError> {
        let immune = ImmuneCore::new()?;
        Ok(Self {
            config,
            budget: BudgetEngine::new(Arc::clone(&store)),
            store,
            vault,
            limiter: RateLimiter::new(),
            immune,
            pricing: PricingTable,
            http: reqwest::Client::new(),
            started_at: Utc::now(),
            nonce: nonce.unwrap_or_else(generate_nonce),
        })
    }
}

impl std::fmt::Debug for DaemonContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonContext")
            .field("providers", &self.config.providers.len())
            .finish_non_exhaustive()
    }
}

/// 16 random hex characters, enough to make PID-file identity
/// unguessable by an unrelated process.
#[must_use]
pub fn generate_nonce() -> String {
    let bytes: [u8; 8] = rand::thread_rng().r#gen();
    hex::encode(bytes)
}
