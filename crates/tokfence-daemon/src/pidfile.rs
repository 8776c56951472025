//! PID file and daemon identity verification.
//!
//! The PID file records who the daemon is: pid, listen address, uid,
//! binary path, and a per-start nonce. A control command must prove the
//! process it is about to signal is really that daemon: pid alive, uid
//! match, binary basename match, and the nonce visible in the target's
//! argv or environment. A stale or tampered file refuses the signal.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// CLI flag whose value carries the identity nonce.
pub const NONCE_FLAG: &str = "--tokfence-daemon-nonce";

/// Environment variable carrying the identity nonce.
pub const NONCE_ENV: &str = "TOKFENCE_DAEMON_NONCE";

/// PID file name inside the data directory.
pub const PID_FILE: &str = "tokfence.pid";

/// Identity record written at daemon start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonIdentity {
    /// Daemon process id.
    pub pid: u32,
    /// `host:port` or `unix:/path`.
    pub listen_addr: String,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// Owning uid.
    pub uid: u32,
    /// Absolute path of the daemon binary.
    pub binary_path: String,
    /// Per-start random nonce.
    pub nonce: String,
}

/// Identity verification failures.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The PID file is absent.
    #[error("no daemon is running (no PID file)")]
    NotRunning,

    /// The PID file exists but cannot be parsed.
    #[error("PID file is unreadable: {0}; clear the stale PID file")]
    Unreadable(String),

    /// The recorded process is gone.
    #[error("recorded pid {pid} is not alive; clear the stale PID file")]
    Dead {
        /// The recorded pid.
        pid: u32,
    },

    /// A field failed to match the live process.
    #[error("daemon identity mismatch ({field}); clear the stale PID file")]
    Mismatch {
        /// Which check failed.
        field: &'static str,
    },

    /// I/O failure while writing or removing.
    #[error("PID file I/O error: {0}")]
    Io(String),
}

impl DaemonIdentity {
    /// Build the identity record for this process.
    #[must_use]
    pub fn current(listen_addr: String, nonce: String) -> Self {
        Self {
            pid: std::process::id(),
            listen_addr,
            started_at: Utc::now(),
            uid: nix::unistd::Uid::current().as_raw(),
            binary_path: std::env::current_exe()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            nonce,
        }
    }
}

/// Write the PID file atomically: 0600, parent 0700, symlinks refused.
///
/// # Errors
///
/// Returns [`IdentityError::Io`] on any filesystem failure, including an
/// existing symlink at the path.
pub fn write_pid_file(path: &Path, identity: &DaemonIdentity) -> Result<(), IdentityError> {
    if let Ok(meta) = std::fs::symlink_metadata(path) {
        if meta.file_type().is_symlink() {
            return Err(IdentityError::Io(
                "refusing to overwrite a symlink PID file".to_owned(),
            ));
        }
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| IdentityError::Io(e.to_string()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))
                .map_err(|e| IdentityError::Io(e.to_string()))?;
        }
    }
    let rendered =
        serde_json::to_vec_pretty(identity).map_err(|e| IdentityError::Io(e.to_string()))?;
    let tmp = path.with_extension("pid.tmp");
    std::fs::write(&tmp, &rendered).map_err(|e| IdentityError::Io(e.to_string()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| IdentityError::Io(e.to_string()))?;
    }
    std::fs::rename(&tmp, path).map_err(|e| IdentityError::Io(e.to_string()))?;
    info!(path = %path.display(), "wrote PID file");
    Ok(())
}

/// Read the PID file.
///
/// # Errors
///
/// Returns [`IdentityError::NotRunning`] when absent or
/// [`IdentityError::Unreadable`] when malformed.
pub fn read_pid_file(path: &Path) -> Result<DaemonIdentity, IdentityError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(IdentityError::NotRunning);
        },
        Err(e) => return Err(IdentityError::Unreadable(e.to_string())),
    };
    serde_json::from_str(&raw).map_err(|e| IdentityError::Unreadable(e.to_string()))
}

/// Remove the PID file (missing file is fine).
///
/// # Errors
///
/// Returns [`IdentityError::Io`] on unexpected filesystem failure.
pub fn remove_pid_file(path: &Path) -> Result<(), IdentityError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(IdentityError::Io(e.to_string())),
    }
}

/// Verify the recorded identity against the live process.
///
/// Checks, in order: process alive, uid match with the current user,
/// binary basename match, and nonce presence in the target's argv or
/// environment. Where argv and environment are both unreadable (hardened
/// or non-procfs systems), the nonce check degrades to the first three.
///
/// # Errors
///
/// Returns an [`IdentityError`] describing the first failed check.
pub fn verify_identity(identity: &DaemonIdentity) -> Result<(), IdentityError> {
    let pid = i32::try_from(identity.pid)
        .map_err(|_| IdentityError::Mismatch { field: "pid" })?;

    // Alive?
    if kill(Pid::from_raw(pid), None).is_err() {
        return Err(IdentityError::Dead { pid: identity.pid });
    }

    // Same user?
    let current_uid = nix::unistd::Uid::current().as_raw();
    if identity.uid != current_uid {
        return Err(IdentityError::Mismatch { field: "uid" });
    }
    if let Some(process_uid) = process_uid(identity.pid) {
        if process_uid != current_uid {
            return Err(IdentityError::Mismatch { field: "uid" });
        }
    }

    // Same binary?
    let recorded = basename(&identity.binary_path);
    if let Some(live) = process_binary(identity.pid) {
        if !recorded.is_empty() && basename(&live) != recorded {
            return Err(IdentityError::Mismatch { field: "binary" });
        }
    }

    // Nonce visible in argv or environment?
    match nonce_visible(identity.pid, &identity.nonce) {
        Some(true) => Ok(()),
        Some(false) => Err(IdentityError::Mismatch { field: "nonce" }),
        None => {
            // Both argv and environment unreadable: degrade to the
            // uid + binary checks above.
            warn!(pid = identity.pid, "argv unreadable, skipping nonce check");
            Ok(())
        },
    }
}

/// Verify and signal the daemon with SIGTERM.
///
/// # Errors
///
/// Returns an [`IdentityError`] if verification fails or the signal
/// cannot be delivered.
pub fn stop_daemon(pid_path: &Path) -> Result<DaemonIdentity, IdentityError> {
    let identity = read_pid_file(pid_path)?;
    verify_identity(&identity)?;
    let pid = i32::try_from(identity.pid)
        .map_err(|_| IdentityError::Mismatch { field: "pid" })?;
    kill(Pid::from_raw(pid), Signal::SIGTERM)
        .map_err(|e| IdentityError::Io(format!("signal failed: {e}")))?;
    debug!(pid = identity.pid, "sent SIGTERM");
    Ok(identity)
}

fn basename(path: &str) -> String {
    PathBuf::from(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// The target's uid, from procfs where available.
fn process_uid(pid: u32) -> Option<u32> {
    #[cfg(target_os = "linux")]
    {
        use std::os::unix::fs::MetadataExt;
        return std::fs::metadata(format!("/proc/{pid}")).ok().map(|m| m.uid());
    }
    #[allow(unreachable_code)]
    {
        let _ = pid;
        None
    }
}

/// The target's binary path, from procfs or `ps`.
fn process_binary(pid: u32) -> Option<String> {
    #[cfg(target_os = "linux")]
    if let Ok(exe) = std::fs::read_link(format!("/proc/{pid}/exe")) {
        return Some(exe.display().to_string());
    }
    crate::caller::process_name(pid)
}

/// Whether the nonce appears in the target's argv or environment.
///
/// `Some(true)` / `Some(false)` when at least one source was readable;
/// `None` when neither was.
fn nonce_visible(pid: u32, nonce: &str) -> Option<bool> {
    let mut any_readable = false;

    if let Some(args) = process_argv(pid) {
        any_readable = true;
        let spaced = args
            .iter()
            .zip(args.iter().skip(1))
            .any(|(flag, value)| flag == NONCE_FLAG && value == nonce);
        let joined = args
            .iter()
            .any(|arg| arg == &format!("{NONCE_FLAG}={nonce}"));
        if spaced || joined {
            return Some(true);
        }
    }

    if let Some(environ) = process_environ(pid) {
        any_readable = true;
        if environ
            .iter()
            .any(|entry| entry == &format!("{NONCE_ENV}={nonce}"))
        {
            return Some(true);
        }
    }

    if any_readable { Some(false) } else { None }
}

fn process_argv(pid: u32) -> Option<Vec<String>> {
    #[cfg(target_os = "linux")]
    {
        let raw = std::fs::read(format!("/proc/{pid}/cmdline")).ok()?;
        return Some(
            raw.split(|b| *b == 0)
                .filter(|part| !part.is_empty())
                .map(|part| String::from_utf8_lossy(part).into_owned())
                .collect(),
        );
    }
    #[allow(unreachable_code)]
    {
        let _ = pid;
        None
    }
}

fn process_environ(pid: u32) -> Option<Vec<String>> {
    #[cfg(target_os = "linux")]
    {
        let raw = std::fs::read(format!("/proc/{pid}/environ")).ok()?;
        return Some(
            raw.split(|b| *b == 0)
                .filter(|part| !part.is_empty())
                .map(|part| String::from_utf8_lossy(part).into_owned())
                .collect(),
        );
    }
    #[allow(unreachable_code)]
    {
        let _ = pid;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_for_self(nonce: &str) -> DaemonIdentity {
        DaemonIdentity {
            pid: std::process::id(),
            listen_addr: "127.0.0.1:9471".to_owned(),
            started_at: Utc::now(),
            uid: nix::unistd::Uid::current().as_raw(),
            binary_path: std::env::current_exe()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            nonce: nonce.to_owned(),
        }
    }

    #[test]
    fn test_pid_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokfence.pid");
        let identity = identity_for_self("cafe0123deadbeef");

        write_pid_file(&path, &identity).unwrap();
        let read = read_pid_file(&path).unwrap();
        assert_eq!(read.pid, identity.pid);
        assert_eq!(read.nonce, identity.nonce);

        remove_pid_file(&path).unwrap();
        assert!(matches!(
            read_pid_file(&path),
            Err(IdentityError::NotRunning)
        ));
        // Idempotent removal.
        remove_pid_file(&path).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_pid_file_mode() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokfence.pid");
        write_pid_file(&path, &identity_for_self("n")).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn test_refuses_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        std::fs::write(&target, "x").unwrap();
        let link = dir.path().join("tokfence.pid");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let result = write_pid_file(&link, &identity_for_self("n"));
        assert!(matches!(result, Err(IdentityError::Io(_))));
    }

    #[test]
    fn test_unreadable_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokfence.pid");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            read_pid_file(&path),
            Err(IdentityError::Unreadable(_))
        ));
    }

    #[test]
    fn test_dead_pid_detected() {
        let mut identity = identity_for_self("n");
        // A pid from the far end of the range that is almost certainly
        // unused; kill(pid, None) then fails with ESRCH.
        identity.pid = 4_000_000;
        assert!(matches!(
            verify_identity(&identity),
            Err(IdentityError::Dead { .. })
        ));
    }

    #[test]
    fn test_uid_mismatch_detected() {
        let mut identity = identity_for_self("n");
        identity.uid = identity.uid.wrapping_add(1);
        assert!(matches!(
            verify_identity(&identity),
            Err(IdentityError::Mismatch { field: "uid" })
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_nonce_mismatch_detected() {
        // Our own argv/environ are readable and do not contain this nonce.
        let identity = identity_for_self("0000000000000000");
        assert!(matches!(
            verify_identity(&identity),
            Err(IdentityError::Mismatch { field: "nonce" })
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_binary_mismatch_detected() {
        let mut identity = identity_for_self("n");
        identity.binary_path = "/usr/bin/definitely-not-this-test".to_owned();
        assert!(matches!(
            verify_identity(&identity),
            Err(IdentityError::Mismatch { field: "binary" })
        ));
    }
}
