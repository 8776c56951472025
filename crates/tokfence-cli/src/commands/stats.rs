//! `stats`: grouped usage aggregates.

use std::path::Path;

use anyhow::{Result, anyhow};
use chrono::Utc;
use clap::Args;
use serde_json::json;
use tokfence_core::money::format_usd;
use tokfence_store::{GroupBy, Period, RequestFilter};

use crate::output::{OutputMode, emit};

/// Arguments for `tokfence stats`.
#[derive(Args)]
pub struct StatsArgs {
    /// Window: daily or monthly (UTC-aligned)
    #[arg(long, default_value = "daily")]
    pub period: String,

    /// Grouping: provider, model, or hour
    #[arg(long = "by", default_value = "provider")]
    pub group_by: String,

    /// Only this provider
    #[arg(long)]
    pub provider: Option<String>,
}

/// Run `tokfence stats`.
pub fn run(config_path: Option<&Path>, args: &StatsArgs, mode: OutputMode) -> Result<()> {
    let config = super::load_config(config_path)?;
    let store = super::open_store(&config)?;

    let period: Period = args.period.parse().map_err(|e: String| anyhow!(e))?;
    let group_by: GroupBy = args.group_by.parse().map_err(|e: String| anyhow!(e))?;
    let since = period.truncate(Utc::now());

    let filter = RequestFilter {
        provider: args.provider.clone(),
        since: Some(since),
        ..Default::default()
    };
    let rows = store.stats(&filter, group_by)?;

    emit(
        mode,
        &json!({"period": period.as_str(), "since": since, "groups": &rows}),
        |_| {
            if rows.is_empty() {
                println!("no usage since {since}");
                return;
            }
            for row in &rows {
                println!(
                    "{:<28} {:>6} reqs {:>10} in {:>10} out {:>10}",
                    row.key,
                    row.request_count,
                    row.input_tokens,
                    row.output_tokens,
                    format_usd(row.cost_cents),
                );
            }
        },
    );
    Ok(())
}
