//! Tokfence CLI.
//!
//! Point an agent at `http://127.0.0.1:9471/<provider>/...` and the
//! daemon authenticates, meters, and fences the call. This binary is
//! both the daemon launcher (`tokfence start`) and the admin surface;
//! admin commands operate on the same SQLite store the daemon serves,
//! so they work whether or not the daemon is up.

#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{budget, daemon, env, log, providers, ratelimit, stats, vault, watch};
use output::OutputMode;

/// Tokfence - credential fence for AI agents
#[derive(Parser)]
#[command(name = "tokfence")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Emit machine-readable JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Path to an alternate config file
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon
    Start {
        /// Detach and run in the background
        #[arg(short = 'd', long)]
        detach: bool,

        /// Identity nonce (set by the parent on background respawn)
        #[arg(long = "tokfence-daemon-nonce", hide = true)]
        nonce: Option<String>,
    },

    /// Stop the running daemon (identity-verified)
    Stop,

    /// Show daemon liveness and today's totals
    Status,

    /// Manage vault credentials
    Vault {
        #[command(subcommand)]
        command: vault::VaultCommands,
    },

    /// Show the request log
    Log(log::LogArgs),

    /// Aggregate usage statistics
    Stats(stats::StatsArgs),

    /// Manage spending budgets
    Budget {
        #[command(subcommand)]
        command: budget::BudgetCommands,
    },

    /// Manage per-provider rate limits
    Ratelimit {
        #[command(subcommand)]
        command: ratelimit::RatelimitCommands,
    },

    /// Revoke a provider (requests are refused)
    Revoke {
        /// Provider name
        provider: String,
    },

    /// Restore a revoked provider
    Restore {
        /// Provider name
        provider: String,
    },

    /// Revoke every configured provider (kill switch)
    Kill,

    /// Restore every configured provider
    Unkill,

    /// Print shell exports pointing agents at the fence
    Env(env::EnvArgs),

    /// Reconcile local usage against provider billing APIs
    Watch(watch::WatchArgs),

    /// Manage configured providers
    Provider {
        #[command(subcommand)]
        command: providers::ProviderCommands,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Pretty
    };
    let config_path = cli.config.as_deref().map(std::path::Path::new);

    match cli.command {
        Commands::Start { detach, nonce } => daemon::start(config_path, detach, nonce).await,
        Commands::Stop => daemon::stop(mode),
        Commands::Status => daemon::status(config_path, mode).await,
        Commands::Vault { command } => vault::run(config_path, command, mode),
        Commands::Log(args) => log::run(config_path, &args, mode).await,
        Commands::Stats(args) => stats::run(config_path, &args, mode),
        Commands::Budget { command } => budget::run(config_path, command, mode),
        Commands::Ratelimit { command } => ratelimit::run(config_path, command, mode),
        Commands::Revoke { provider } => providers::set_revoked(config_path, &provider, true, mode),
        Commands::Restore { provider } => {
            providers::set_revoked(config_path, &provider, false, mode)
        },
        Commands::Kill => providers::kill_switch(config_path, true, mode),
        Commands::Unkill => providers::kill_switch(config_path, false, mode),
        Commands::Env(args) => env::run(config_path, &args, mode),
        Commands::Watch(args) => watch::run(config_path, args, mode).await,
        Commands::Provider { command } => providers::run(config_path, command, mode),
    }
}
