//! `watch`: run the usage reconciler.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Args;
use tokfence_store::Period;
use tokfence_watcher::{Watcher, WatcherConfig};

use crate::output::{OutputMode, emit};

/// Arguments for `tokfence watch`.
#[derive(Args)]
pub struct WatchArgs {
    /// Providers to reconcile (default: every configured provider)
    #[arg(long = "provider")]
    pub providers: Vec<String>,

    /// Comparison window: daily or monthly
    #[arg(long, default_value = "daily")]
    pub period: String,

    /// Seconds between cycles (minimum 10)
    #[arg(long, default_value_t = 300)]
    pub interval: u64,

    /// Flag when remote cost leads local by more than this many USD
    #[arg(long = "threshold-usd", default_value_t = 1.0)]
    pub threshold_usd: f64,

    /// Flag when remote tokens lead local by more than this many
    #[arg(long = "threshold-tokens", default_value_t = 50_000)]
    pub threshold_tokens: u64,

    /// Flag when remote requests lead local by more than this many
    #[arg(long = "threshold-requests", default_value_t = 50)]
    pub threshold_requests: u64,

    /// Seconds of local quiet before remote growth counts as a leak
    #[arg(long = "idle-window", default_value_t = 1800)]
    pub idle_window: u64,

    /// Revoke a provider when a leak is suspected
    #[arg(long = "auto-revoke")]
    pub auto_revoke: bool,

    /// Usage endpoint override, `provider=url` (repeatable)
    #[arg(long = "usage-endpoint")]
    pub usage_endpoints: Vec<String>,

    /// Run one cycle and exit
    #[arg(long)]
    pub once: bool,
}

/// Run `tokfence watch`.
pub async fn run(config_path: Option<&Path>, args: WatchArgs, mode: OutputMode) -> Result<()> {
    let config = super::load_config(config_path)?;
    let store = super::open_store(&config)?;
    let vault = super::open_vault(&config)?;

    let provider_names: Vec<String> = if args.providers.is_empty() {
        config.providers.keys().cloned().collect()
    } else {
        args.providers.clone()
    };
    let mut providers = Vec::new();
    for name in &provider_names {
        let Some(section) = config.provider(name) else {
            bail!("provider {name:?} is not configured");
        };
        providers.push((name.clone(), section.upstream.clone()));
    }

    let mut custom_endpoints = HashMap::new();
    for raw in &args.usage_endpoints {
        let Some((provider, url)) = raw.split_once('=') else {
            bail!("--usage-endpoint expects provider=url, got {raw:?}");
        };
        custom_endpoints.insert(provider.to_owned(), url.to_owned());
    }

    let period: Period = args.period.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    let watcher_config = WatcherConfig {
        providers,
        period,
        interval: Duration::from_secs(args.interval),
        threshold_usd: args.threshold_usd,
        threshold_tokens: args.threshold_tokens,
        threshold_requests: args.threshold_requests,
        idle_window: Duration::from_secs(args.idle_window),
        auto_revoke: args.auto_revoke,
        custom_endpoints,
    };
    let watcher = Watcher::new(watcher_config, store, vault)?;

    loop {
        let report = watcher.cycle().await?;
        emit(mode, &report, |report| {
            for entry in &report.providers {
                let verdict = if entry.leak_suspected {
                    format!("LEAK SUSPECTED {:?}", entry.reasons)
                } else if entry.error.is_some() {
                    "unreachable".to_owned()
                } else {
                    "ok".to_owned()
                };
                let revoked = if entry.auto_revoked { " (revoked)" } else { "" };
                println!("{}: {verdict}{revoked}", entry.provider);
                if let Some(error) = &entry.error {
                    println!("  {error}");
                }
            }
        });
        if args.once {
            return Ok(());
        }
        tokio::time::sleep(watcher.interval()).await;
    }
}
