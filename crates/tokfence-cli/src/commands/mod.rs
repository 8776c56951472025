//! Command implementations.

pub mod budget;
pub mod daemon;
pub mod env;
pub mod log;
pub mod providers;
pub mod ratelimit;
pub mod stats;
pub mod vault;
pub mod watch;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokfence_config::Config;
use tokfence_store::LogStore;
use tokfence_vault::KeyStore;

/// Load configuration, honoring `--config`.
pub(crate) fn load_config(path: Option<&Path>) -> Result<Config> {
    tokfence_config::load(path).context("failed to load configuration")
}

/// Open the shared store at the configured path.
pub(crate) fn open_store(config: &Config) -> Result<Arc<LogStore>> {
    let path = config.db_path().context("failed to resolve db path")?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Ok(Arc::new(
        LogStore::open(&path).context("failed to open the log store")?,
    ))
}

/// Open the default vault backend for this environment.
pub(crate) fn open_vault(config: &Config) -> Result<Arc<dyn KeyStore>> {
    let candidates = config.providers.keys().cloned().collect();
    tokfence_vault::open_default(candidates).context("failed to open the vault")
}
