//! `ratelimit set|status|clear`.

use std::path::Path;

use anyhow::{Result, bail};
use clap::Subcommand;
use serde_json::json;

use crate::output::{OutputMode, emit};

/// Rate-limit subcommands.
#[derive(Subcommand)]
pub enum RatelimitCommands {
    /// Cap a provider's requests per minute
    Set {
        /// Provider name
        provider: String,
        /// Requests per minute
        rpm: u32,
    },
    /// Show configured limits
    Status,
    /// Remove a provider's limit
    Clear {
        /// Provider name
        provider: String,
    },
}

/// Run a rate-limit subcommand.
pub fn run(config_path: Option<&Path>, command: RatelimitCommands, mode: OutputMode) -> Result<()> {
    let config = super::load_config(config_path)?;
    let store = super::open_store(&config)?;

    match command {
        RatelimitCommands::Set { provider, rpm } => {
            if rpm == 0 {
                bail!("rpm must be positive");
            }
            store.set_rate_limit(&provider, rpm)?;
            emit(mode, &json!({"provider": &provider, "rpm": rpm}), |_| {
                println!("limited {provider} to {rpm} requests/minute");
            });
        },
        RatelimitCommands::Status => {
            let limits = store.list_rate_limits()?;
            emit(
                mode,
                &json!({
                    "rate_limits": limits
                        .iter()
                        .map(|(provider, rpm)| json!({"provider": provider, "rpm": rpm}))
                        .collect::<Vec<_>>()
                }),
                |_| {
                    if limits.is_empty() {
                        println!("no rate limits configured");
                    }
                    for (provider, rpm) in &limits {
                        println!("{provider}: {rpm} requests/minute");
                    }
                },
            );
        },
        RatelimitCommands::Clear { provider } => {
            store.clear_rate_limit(&provider)?;
            emit(mode, &json!({"provider": &provider, "cleared": true}), |_| {
                println!("cleared rate limit for {provider}");
            });
        },
    }
    Ok(())
}
