//! `vault add|remove|list|rotate|export|import`.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use serde_json::json;
use tokfence_core::ProviderName;
use tokfence_vault::KeyStore;

use crate::output::{OutputMode, emit};

/// Vault subcommands.
#[derive(Subcommand)]
pub enum VaultCommands {
    /// Store a credential (reads it from stdin when not given)
    Add {
        /// Provider name
        provider: String,
        /// Credential value; omit to read from stdin
        #[arg(long)]
        credential: Option<String>,
    },
    /// Delete a credential
    Remove {
        /// Provider name
        provider: String,
    },
    /// List providers with stored credentials
    List,
    /// Replace a credential (reads it from stdin when not given)
    Rotate {
        /// Provider name
        provider: String,
        /// Credential value; omit to read from stdin
        #[arg(long)]
        credential: Option<String>,
    },
    /// Write every credential as JSON to stdout (for migration)
    Export,
    /// Read a credential map as JSON from stdin
    Import,
}

/// Run a vault subcommand.
pub fn run(config_path: Option<&Path>, command: VaultCommands, mode: OutputMode) -> Result<()> {
    let config = super::load_config(config_path)?;
    let vault = super::open_vault(&config)?;

    match command {
        VaultCommands::Add {
            provider,
            credential,
        } => {
            ProviderName::parse(&provider)?;
            let credential = resolve_credential(credential)?;
            vault.set(&provider, &credential)?;
            emit(mode, &json!({"provider": &provider, "stored": true}), |_| {
                println!("stored credential for {provider}");
            });
        },
        VaultCommands::Rotate {
            provider,
            credential,
        } => {
            ProviderName::parse(&provider)?;
            let credential = resolve_credential(credential)?;
            vault.rotate(&provider, &credential)?;
            emit(mode, &json!({"provider": &provider, "rotated": true}), |_| {
                println!("rotated credential for {provider}");
            });
        },
        VaultCommands::Remove { provider } => {
            vault.delete(&provider)?;
            emit(mode, &json!({"provider": &provider, "removed": true}), |_| {
                println!("removed credential for {provider}");
            });
        },
        VaultCommands::List => {
            let providers = vault.list()?;
            emit(mode, &json!({"providers": &providers}), |_| {
                if providers.is_empty() {
                    println!("no credentials stored");
                }
                for provider in &providers {
                    println!("{provider}");
                }
            });
        },
        VaultCommands::Export => {
            // Credentials go to stdout only, never through the logger.
            let map = vault.export_all()?;
            println!(
                "{}",
                serde_json::to_string_pretty(&map).context("export serialization failed")?
            );
        },
        VaultCommands::Import => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("failed to read stdin")?;
            let map: std::collections::BTreeMap<String, String> =
                serde_json::from_str(&raw).context("stdin is not a credential map")?;
            for provider in map.keys() {
                ProviderName::parse(provider)?;
            }
            vault.import_all(&map)?;
            emit(mode, &json!({"imported": map.len()}), |_| {
                println!("imported {} credentials", map.len());
            });
        },
    }
    Ok(())
}

/// Use the flag value, or read a single line from stdin.
fn resolve_credential(flag: Option<String>) -> Result<String> {
    if let Some(credential) = flag {
        return Ok(credential);
    }
    let mut raw = String::new();
    std::io::stdin()
        .read_to_string(&mut raw)
        .context("failed to read credential from stdin")?;
    let credential = raw.trim().to_owned();
    if credential.is_empty() {
        bail!("credential must not be empty");
    }
    Ok(credential)
}
