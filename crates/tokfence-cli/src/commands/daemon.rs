//! `start`, `stop`, and `status`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde_json::json;
use tokfence_daemon::{DaemonContext, NONCE_ENV, NONCE_FLAG, PID_FILE, generate_nonce};
use tracing::info;

use crate::output::{OutputMode, emit};

/// Marker environment variable set on the re-exec'd background child.
pub const BACKGROUND_ENV: &str = "TOKFENCE_BACKGROUND";

/// Daemon log file name inside the data directory.
const LOG_FILE: &str = "tokfence.log";

/// How long `start -d` waits for the child to answer health checks.
const SPAWN_WAIT: Duration = Duration::from_secs(10);

/// Start the daemon, foreground or detached.
pub async fn start(config_path: Option<&Path>, detach: bool, nonce: Option<String>) -> Result<()> {
    if detach {
        return spawn_background(config_path);
    }

    let config = super::load_config(config_path)?;
    let store = super::open_store(&config)?;
    let vault = super::open_vault(&config)?;

    // A nonce arrives via the hidden flag on background respawn, or via
    // the environment, or is freshly minted for a foreground run.
    let nonce = nonce
        .or_else(|| std::env::var(NONCE_ENV).ok().filter(|n| !n.is_empty()))
        .unwrap_or_else(generate_nonce);

    let ctx = Arc::new(
        DaemonContext::new(config, store, vault, Some(nonce))
            .map_err(|e| anyhow!("security core init failed: {e}"))?,
    );
    info!(addr = %ctx.config.listen_addr(), "starting tokfence daemon");
    tokfence_daemon::run(ctx).await.map_err(Into::into)
}

/// Re-exec this binary detached, stdout/stderr to the daemon log.
fn spawn_background(config_path: Option<&Path>) -> Result<()> {
    let data_dir = tokfence_config::ensure_data_dir()?;
    let log_path = data_dir.join(LOG_FILE);
    let log_file = open_log_file(&log_path)?;
    let nonce = generate_nonce();

    let exe = std::env::current_exe().context("cannot resolve own binary path")?;
    let mut command = std::process::Command::new(exe);
    command
        .arg("start")
        .arg(format!("{NONCE_FLAG}={nonce}"))
        .env(BACKGROUND_ENV, "1")
        .env(NONCE_ENV, &nonce)
        .stdin(std::process::Stdio::null())
        .stdout(log_file.try_clone().context("log file clone failed")?)
        .stderr(log_file);
    if let Some(path) = config_path {
        command.arg("--config").arg(path);
    }
    let child = command.spawn().context("failed to spawn the daemon")?;
    println!("started tokfence daemon (pid {})", child.id());

    // Best-effort wait for the PID file so `start -d && env` works.
    let pid_path = data_dir.join(PID_FILE);
    let deadline = std::time::Instant::now() + SPAWN_WAIT;
    while std::time::Instant::now() < deadline {
        if tokfence_daemon::read_pid_file(&pid_path).is_ok() {
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(200));
    }
    bail!("daemon did not come up within {}s; check {}", SPAWN_WAIT.as_secs(), log_path.display());
}

fn open_log_file(path: &Path) -> Result<std::fs::File> {
    let mut options = std::fs::OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))
}

/// Stop the daemon after full identity verification.
pub fn stop(mode: OutputMode) -> Result<()> {
    let data_dir = tokfence_config::data_dir()?;
    let pid_path = data_dir.join(PID_FILE);
    let identity = tokfence_daemon::stop_daemon(&pid_path)
        .map_err(|e| anyhow!("{e}"))?;

    emit(
        mode,
        &json!({"stopped": true, "pid": identity.pid}),
        |_| println!("stopped tokfence daemon (pid {})", identity.pid),
    );
    Ok(())
}

/// Report daemon liveness plus today's totals.
pub async fn status(config_path: Option<&Path>, mode: OutputMode) -> Result<()> {
    let config = super::load_config(config_path)?;
    let data_dir = tokfence_config::data_dir()?;
    let pid_path = data_dir.join(PID_FILE);

    let identity = tokfence_daemon::read_pid_file(&pid_path).ok();
    let verified = identity
        .as_ref()
        .is_some_and(|id| tokfence_daemon::verify_identity(id).is_ok());

    // The health endpoint is the live check; PID identity alone can be
    // stale between crash and cleanup.
    let healthy = if verified {
        let url = format!("http://{}/__tokfence/health", config.listen_addr());
        reqwest::Client::new()
            .get(&url)
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    } else {
        false
    };

    let store = super::open_store(&config)?;
    let (requests, input_tokens, output_tokens, cost_cents) =
        store.today_totals().unwrap_or_default();

    let view = json!({
        "running": healthy,
        "pid": identity.as_ref().map(|id| id.pid),
        "listen_addr": identity.as_ref().map(|id| id.listen_addr.clone()),
        "started_at": identity.as_ref().map(|id| id.started_at),
        "today": {
            "requests": requests,
            "input_tokens": input_tokens,
            "output_tokens": output_tokens,
            "cost_cents": cost_cents,
            "cost_usd": tokfence_core::cents_to_usd(cost_cents),
        },
    });
    emit(mode, &view, |v| {
        if healthy {
            println!(
                "tokfence daemon is running (pid {}, {})",
                v["pid"], v["listen_addr"]
            );
        } else {
            println!("tokfence daemon is not running");
        }
        println!(
            "today: {} requests, {} in / {} out tokens, {}",
            requests,
            input_tokens,
            output_tokens,
            tokfence_core::money::format_usd(cost_cents)
        );
    });
    Ok(())
}
