//! `env`: shell exports pointing agents at the fence.

use std::path::Path;

use anyhow::{Result, bail};
use clap::Args;
use serde_json::json;

use crate::output::{OutputMode, emit};

/// Arguments for `tokfence env`.
#[derive(Args)]
pub struct EnvArgs {
    /// Shell dialect: sh, bash, zsh, or fish
    #[arg(long, default_value = "sh")]
    pub shell: String,

    /// Only this provider
    #[arg(long)]
    pub provider: Option<String>,
}

/// Run `tokfence env`.
pub fn run(config_path: Option<&Path>, args: &EnvArgs, mode: OutputMode) -> Result<()> {
    let config = super::load_config(config_path)?;

    let providers: Vec<String> = match &args.provider {
        Some(name) => {
            if config.provider(name).is_none() {
                bail!("provider {name:?} is not configured");
            }
            vec![name.clone()]
        },
        None => config.providers.keys().cloned().collect(),
    };
    if providers.is_empty() {
        bail!("no providers configured; add one with `tokfence provider set`");
    }

    let fish = args.shell.eq_ignore_ascii_case("fish");
    let exports: Vec<(String, String)> = providers
        .iter()
        .map(|provider| (var_name(provider), config.provider_base_url(provider)))
        .collect();

    emit(
        mode,
        &json!({
            "exports": exports
                .iter()
                .map(|(name, url)| json!({"name": name, "url": url}))
                .collect::<Vec<_>>()
        }),
        |_| {
            for (name, url) in &exports {
                if fish {
                    println!("set -x {name} \"{url}\"");
                } else {
                    println!("export {name}=\"{url}\"");
                }
            }
        },
    );
    Ok(())
}

/// `openai` -> `OPENAI_BASE_URL`.
fn var_name(provider: &str) -> String {
    let upper: String = provider
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{upper}_BASE_URL")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_name() {
        assert_eq!(var_name("openai"), "OPENAI_BASE_URL");
        assert_eq!(var_name("my-proxy"), "MY_PROXY_BASE_URL");
        assert_eq!(var_name("llama_local"), "LLAMA_LOCAL_BASE_URL");
    }
}
