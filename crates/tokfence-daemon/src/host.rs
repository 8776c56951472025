//! Daemon lifecycle: listeners, PID file, shutdown.
//!
//! The daemon serves one HTTP handler on two listeners: a Unix domain
//! socket (primary local transport) and a TCP loopback socket. Startup
//! is fail-fast: an unusable socket path, an occupied address, or a
//! failed migration exits non-zero before any request is accepted.

use std::future::IntoFuture;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::connect_info::Connected;
use axum::serve::IncomingStream;
use thiserror::Error;
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::context::DaemonContext;
use crate::control;
use crate::pidfile::{self, DaemonIdentity, IdentityError, PID_FILE};
use crate::pipeline;
use crate::snapshot;

/// Maximum UDS path length the platform accepts.
#[cfg(target_os = "macos")]
const MAX_SOCKET_PATH: usize = 103;
#[cfg(not(target_os = "macos"))]
const MAX_SOCKET_PATH: usize = 107;

/// How often the UI snapshot is rewritten.
const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(5);

/// How often retention pruning runs.
const RETENTION_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// How long in-flight streams may drain after a shutdown signal.
const DRAIN_DEADLINE: Duration = Duration::from_secs(10 * 60);

/// Fatal host errors.
#[derive(Debug, Error)]
pub enum HostError {
    /// Configuration is unusable (bad socket path, bad data dir).
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A listener could not be bound.
    #[error("failed to bind {listener}: {source}")]
    Bind {
        /// Which listener failed.
        listener: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A live daemon already owns the PID file.
    #[error("daemon already running (pid {pid})")]
    AlreadyRunning {
        /// The running daemon's pid.
        pid: u32,
    },

    /// PID file handling failed.
    #[error(transparent)]
    Identity(#[from] IdentityError),
}

/// Connection info captured from the Unix socket peer.
#[derive(Debug, Clone, Copy, Default)]
pub struct UdsConnectInfo {
    /// Peer process id, when the platform reports it.
    pub peer_pid: Option<i32>,
    /// Peer uid.
    pub peer_uid: Option<u32>,
}

impl Connected<IncomingStream<'_, UnixListener>> for UdsConnectInfo {
    fn connect_info(stream: IncomingStream<'_, UnixListener>) -> Self {
        match stream.io().peer_cred() {
            Ok(cred) => Self {
                peer_pid: cred.pid(),
                peer_uid: Some(cred.uid()),
            },
            Err(_) => Self::default(),
        }
    }
}

/// Run the daemon until a shutdown signal, then drain and clean up.
///
/// # Errors
///
/// Returns a [`HostError`] for any fatal startup condition.
pub async fn run(ctx: Arc<DaemonContext>) -> Result<(), HostError> {
    let data_dir = tokfence_config::ensure_data_dir()
        .map_err(|e| HostError::ConfigInvalid(e.to_string()))?;
    let socket_path = ctx
        .config
        .socket_path()
        .map_err(|e| HostError::ConfigInvalid(e.to_string()))?;
    validate_socket_path(&socket_path)?;

    // Refuse to start over a live daemon; a stale PID file is replaced.
    let pid_path = data_dir.join(PID_FILE);
    match pidfile::read_pid_file(&pid_path) {
        Ok(existing) if pidfile::verify_identity(&existing).is_ok() => {
            return Err(HostError::AlreadyRunning { pid: existing.pid });
        },
        Ok(stale) => {
            warn!(pid = stale.pid, "replacing stale PID file");
        },
        Err(_) => {},
    }

    let uds = bind_unix(&socket_path)?;
    let tcp = TcpListener::bind(ctx.config.listen_addr())
        .await
        .map_err(|e| HostError::Bind {
            listener: format!("tcp {}", ctx.config.listen_addr()),
            source: e,
        })?;
    info!(
        tcp = %ctx.config.listen_addr(),
        uds = %socket_path.display(),
        "listeners bound"
    );

    let identity = DaemonIdentity::current(ctx.config.listen_addr(), ctx.nonce.clone());
    pidfile::write_pid_file(&pid_path, &identity)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_task(shutdown_tx.clone());
    tokio::spawn(snapshot::run_writer(
        Arc::clone(&ctx),
        data_dir.join(snapshot::SNAPSHOT_FILE),
        SNAPSHOT_INTERVAL,
        shutdown_rx.clone(),
    ));
    tokio::spawn(run_retention(Arc::clone(&ctx), shutdown_rx.clone()));

    let app = control::router()
        .fallback(pipeline::proxy_handler)
        .with_state(Arc::clone(&ctx));

    let tcp_app = app.clone().into_make_service();
    let mut tcp_shutdown = shutdown_rx.clone();
    let tcp_task = tokio::spawn(
        axum::serve(tcp, tcp_app)
            .with_graceful_shutdown(async move {
                let _ = tcp_shutdown.changed().await;
            })
            .into_future(),
    );

    let uds_app = app.into_make_service_with_connect_info::<UdsConnectInfo>();
    let mut uds_shutdown = shutdown_rx.clone();
    let uds_task = tokio::spawn(
        axum::serve(uds, uds_app)
            .with_graceful_shutdown(async move {
                let _ = uds_shutdown.changed().await;
            })
            .into_future(),
    );

    // Wait for the shutdown signal, then give in-flight streams a
    // bounded drain window.
    let mut wait_shutdown = shutdown_rx;
    let _ = wait_shutdown.changed().await;
    info!("shutting down, draining in-flight requests");
    let drain = async {
        let _ = tcp_task.await;
        let _ = uds_task.await;
    };
    if tokio::time::timeout(DRAIN_DEADLINE, drain).await.is_err() {
        warn!("drain deadline reached, closing remaining connections");
    }

    // Final cleanup: socket, PID file, and a parting snapshot marked
    // not-running so the UI does not show a ghost daemon.
    let _ = std::fs::remove_file(&socket_path);
    let _ = pidfile::remove_pid_file(&pid_path);
    let mut parting = snapshot::render(&ctx);
    parting.daemon_running = false;
    let _ = snapshot::write(&data_dir.join(snapshot::SNAPSHOT_FILE), &parting);
    info!("shutdown complete");
    Ok(())
}

/// Validate, clean up, bind, and set permissions on the Unix socket.
fn bind_unix(socket_path: &Path) -> Result<UnixListener, HostError> {
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| HostError::ConfigInvalid(format!("socket dir: {e}")))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700));
        }
    }
    // A previous unclean exit leaves the socket file behind.
    if socket_path.exists() {
        let _ = std::fs::remove_file(socket_path);
    }
    let listener = UnixListener::bind(socket_path).map_err(|e| HostError::Bind {
        listener: format!("unix {}", socket_path.display()),
        source: e,
    })?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o660));
    }
    Ok(listener)
}

/// Reject socket paths longer than `sockaddr_un` allows.
fn validate_socket_path(path: &Path) -> Result<(), HostError> {
    let len = path.as_os_str().len();
    if len > MAX_SOCKET_PATH {
        return Err(HostError::ConfigInvalid(format!(
            "socket path is {len} bytes, exceeding the {MAX_SOCKET_PATH} byte limit: {}",
            path.display()
        )));
    }
    Ok(())
}

fn spawn_signal_task(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        let mut sigint =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt());
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate());
        match (&mut sigint, &mut sigterm) {
            (Ok(sigint), Ok(sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => info!("received SIGINT"),
                    _ = sigterm.recv() => info!("received SIGTERM"),
                }
            },
            _ => {
                error!("failed to install signal handlers");
                // Fall back to ctrl-c only.
                let _ = tokio::signal::ctrl_c().await;
            },
        }
        let _ = shutdown_tx.send(true);
    });
}

/// Daily retention pruning, when configured.
async fn run_retention(ctx: Arc<DaemonContext>, mut shutdown: watch::Receiver<bool>) {
    let days = ctx.config.logging.retention_days;
    if days == 0 {
        return;
    }
    let mut ticker = tokio::time::interval(RETENTION_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match ctx.store.prune_older_than(days) {
                    Ok(removed) if removed > 0 => {
                        info!(removed, days, "pruned old request records");
                    },
                    Ok(_) => {},
                    Err(e) => warn!(error = %e, "retention pruning failed"),
                }
            },
            _ = shutdown.changed() => break,
        }
    }
}
