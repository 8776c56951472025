//! `budget set|status|clear`.

use std::path::Path;

use anyhow::{Result, anyhow};
use clap::Subcommand;
use serde_json::json;
use tokfence_core::money::format_usd;
use tokfence_engine::BudgetEngine;
use tokfence_store::Period;

use crate::output::{OutputMode, emit};

/// Budget subcommands.
#[derive(Subcommand)]
pub enum BudgetCommands {
    /// Create or replace a budget
    Set {
        /// Provider name, or "global"
        scope: String,
        /// Cap in USD
        amount_usd: f64,
        /// daily or monthly
        #[arg(long, default_value = "daily")]
        period: String,
    },
    /// Show every budget row
    Status,
    /// Remove all budgets for a scope
    Clear {
        /// Provider name, or "global"
        scope: String,
    },
}

/// Run a budget subcommand.
pub fn run(config_path: Option<&Path>, command: BudgetCommands, mode: OutputMode) -> Result<()> {
    let config = super::load_config(config_path)?;
    let store = super::open_store(&config)?;
    let engine = BudgetEngine::new(store);

    match command {
        BudgetCommands::Set {
            scope,
            amount_usd,
            period,
        } => {
            let period: Period = period.parse().map_err(|e: String| anyhow!(e))?;
            engine.set_budget(&scope, amount_usd, period)?;
            emit(
                mode,
                &json!({"scope": &scope, "period": period.as_str(), "amount_usd": amount_usd}),
                |_| println!("set {} {period} budget to ${amount_usd:.2}", scope),
            );
        },
        BudgetCommands::Status => {
            let rows = engine.status()?;
            emit(mode, &json!({"budgets": &rows}), |_| {
                if rows.is_empty() {
                    println!("no budgets configured");
                }
                for row in &rows {
                    println!(
                        "{:<20} {:<8} {} of {} since {}",
                        row.scope,
                        row.period.as_str(),
                        format_usd(row.current_spend_cents),
                        format_usd(row.limit_cents),
                        row.period_start.format("%Y-%m-%d %H:%M"),
                    );
                }
            });
        },
        BudgetCommands::Clear { scope } => {
            engine.clear_budget(&scope)?;
            emit(mode, &json!({"scope": &scope, "cleared": true}), |_| {
                println!("cleared budgets for {scope}");
            });
        },
    }
    Ok(())
}
