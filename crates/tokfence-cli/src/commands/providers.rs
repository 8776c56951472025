//! `revoke`, `restore`, `kill`, `unkill`, and `provider set`.

use std::path::Path;

use anyhow::{Result, bail};
use clap::Subcommand;
use serde_json::json;
use tokfence_core::ProviderName;

use crate::output::{OutputMode, emit};

/// Provider subcommands.
#[derive(Subcommand)]
pub enum ProviderCommands {
    /// Add or update a provider's upstream URL in the config file
    Set {
        /// Provider name
        name: String,
        /// Absolute upstream URL (http or https)
        upstream: String,
    },
    /// List configured providers
    List,
}

/// Toggle one provider's revoked flag.
pub fn set_revoked(
    config_path: Option<&Path>,
    provider: &str,
    revoked: bool,
    mode: OutputMode,
) -> Result<()> {
    let config = super::load_config(config_path)?;
    let store = super::open_store(&config)?;
    store.set_provider_revoked(provider, revoked)?;
    emit(
        mode,
        &json!({"provider": provider, "revoked": revoked}),
        |_| {
            if revoked {
                println!("revoked {provider}; requests will be refused");
            } else {
                println!("restored {provider}");
            }
        },
    );
    Ok(())
}

/// Revoke or restore every configured provider atomically.
pub fn kill_switch(config_path: Option<&Path>, revoked: bool, mode: OutputMode) -> Result<()> {
    let config = super::load_config(config_path)?;
    let providers: Vec<String> = config.providers.keys().cloned().collect();
    if providers.is_empty() {
        bail!("no providers configured");
    }
    let store = super::open_store(&config)?;
    store.set_all_providers_revoked(&providers, revoked)?;
    emit(
        mode,
        &json!({"providers": &providers, "revoked": revoked}),
        |_| {
            let verb = if revoked { "revoked" } else { "restored" };
            println!("{verb} {} providers: {}", providers.len(), providers.join(", "));
        },
    );
    Ok(())
}

/// Run a provider subcommand.
pub fn run(config_path: Option<&Path>, command: ProviderCommands, mode: OutputMode) -> Result<()> {
    match command {
        ProviderCommands::Set { name, upstream } => {
            ProviderName::parse(&name)?;
            let mut config = super::load_config(config_path)?;
            config.set_provider(&name, &upstream);
            // Validation normalizes the URL and rejects bad schemes.
            config.validate()?;

            let path = match config_path {
                Some(p) => p.to_path_buf(),
                None => tokfence_config::config_path()?,
            };
            tokfence_config::save(&config, &path)?;
            let saved = config
                .provider(&name)
                .map(|p| p.upstream.clone())
                .unwrap_or_default();
            emit(mode, &json!({"provider": &name, "upstream": &saved}), |_| {
                println!("provider {name} -> {saved}");
            });
        },
        ProviderCommands::List => {
            let config = super::load_config(config_path)?;
            let store = super::open_store(&config)?;
            let revoked = store.list_revoked().unwrap_or_default();
            let providers: Vec<serde_json::Value> = config
                .providers
                .iter()
                .map(|(name, section)| {
                    json!({
                        "name": name,
                        "upstream": section.upstream,
                        "revoked": revoked.contains(name),
                        "base_url": config.provider_base_url(name),
                    })
                })
                .collect();
            emit(mode, &json!({"providers": providers}), |_| {
                if config.providers.is_empty() {
                    println!("no providers configured");
                }
                for (name, section) in &config.providers {
                    let marker = if revoked.contains(name) { " (revoked)" } else { "" };
                    println!("{name}: {}{marker}", section.upstream);
                }
            });
        },
    }
    Ok(())
}
