//! Best-effort caller identification.
//!
//! Order of preference: the `X-Tokfence-Caller` header (`name[:pid]`),
//! then Unix-socket peer credentials resolved to a process name. Failures
//! are never fatal; the record just carries empty fields.

use std::process::Command;

/// Header an agent can set to identify itself.
pub const CALLER_HEADER: &str = "x-tokfence-caller";

/// Environment variable tests use to stub the `ps` lookup.
pub const PS_OUTPUT_ENV: &str = "TOKFENCE_PS_OUTPUT";

/// Who called the proxy, as far as we can tell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerIdentity {
    /// Process or agent name, empty if unknown.
    pub name: String,
    /// Process id, 0 if unknown.
    pub pid: u32,
}

impl CallerIdentity {
    /// Parse the `X-Tokfence-Caller` header value.
    #[must_use]
    pub fn from_header(value: &str) -> Self {
        match value.split_once(':') {
            Some((name, pid)) => Self {
                name: name.trim().to_owned(),
                pid: pid.trim().parse().unwrap_or(0),
            },
            None => Self {
                name: value.trim().to_owned(),
                pid: 0,
            },
        }
    }

    /// Resolve a socket peer pid to an identity.
    #[must_use]
    pub fn from_peer_pid(pid: u32) -> Self {
        Self {
            name: process_name(pid).unwrap_or_default(),
            pid,
        }
    }

    /// A non-empty display name for capability minting.
    #[must_use]
    pub fn client_id(&self) -> String {
        if self.name.is_empty() {
            if self.pid == 0 {
                "anonymous".to_owned()
            } else {
                format!("pid-{}", self.pid)
            }
        } else {
            self.name.clone()
        }
    }
}

/// Resolve a pid to a process name.
///
/// Tries `/proc/<pid>/comm`, then `ps -p <pid> -o comm=`. Tests stub the
/// `ps` output through [`PS_OUTPUT_ENV`].
#[must_use]
pub fn process_name(pid: u32) -> Option<String> {
    if pid == 0 {
        return None;
    }
    if let Ok(stub) = std::env::var(PS_OUTPUT_ENV) {
        let name = stub.lines().next().unwrap_or("").trim();
        return (!name.is_empty()).then(|| name.to_owned());
    }
    if let Ok(comm) = std::fs::read_to_string(format!("/proc/{pid}/comm")) {
        let name = comm.trim();
        if !name.is_empty() {
            return Some(name.to_owned());
        }
    }
    let output = Command::new("ps")
        .args(["-p", &pid.to_string(), "-o", "comm="])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let name = String::from_utf8_lossy(&output.stdout);
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    // ps may print a full path.
    Some(
        name.rsplit('/')
            .next()
            .unwrap_or(name)
            .to_owned(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_with_pid() {
        let caller = CallerIdentity::from_header("claude-code:1234");
        assert_eq!(caller.name, "claude-code");
        assert_eq!(caller.pid, 1234);
    }

    #[test]
    fn test_header_without_pid() {
        let caller = CallerIdentity::from_header("my-agent");
        assert_eq!(caller.name, "my-agent");
        assert_eq!(caller.pid, 0);
    }

    #[test]
    fn test_header_with_bad_pid() {
        let caller = CallerIdentity::from_header("agent:not-a-pid");
        assert_eq!(caller.name, "agent");
        assert_eq!(caller.pid, 0);
    }

    #[test]
    fn test_client_id_fallbacks() {
        assert_eq!(CallerIdentity::default().client_id(), "anonymous");
        assert_eq!(
            CallerIdentity {
                name: String::new(),
                pid: 42
            }
            .client_id(),
            "pid-42"
        );
        assert_eq!(
            CallerIdentity {
                name: "agent".to_owned(),
                pid: 42
            }
            .client_id(),
            "agent"
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_own_process_name_resolves() {
        let pid = std::process::id();
        assert!(process_name(pid).is_some());
    }
}
