//! The Tokfence daemon: proxy pipeline, control endpoints, dual-listener
//! host, PID identity, and the UI snapshot writer.
//!
//! The binary in `tokfence-cli` assembles a [`DaemonContext`] and calls
//! [`host::run`]; everything else in this crate hangs off that context.

pub mod caller;
pub mod context;
pub mod control;
pub mod error;
pub mod headers;
pub mod host;
pub mod pidfile;
pub mod pipeline;
pub mod snapshot;
pub mod streaming;
pub mod usage_extract;

pub use caller::CallerIdentity;
pub use context::{DaemonContext, generate_nonce};
pub use error::ProxyError;
pub use host::{HostError, UdsConnectInfo, run};
pub use pidfile::{
    DaemonIdentity, IdentityError, NONCE_ENV, NONCE_FLAG, PID_FILE, read_pid_file, stop_daemon,
    verify_identity,
};
pub use pipeline::REQUEST_ID_HEADER;
pub use snapshot::SNAPSHOT_FILE;
