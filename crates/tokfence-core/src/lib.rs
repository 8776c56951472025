//! Shared primitives for Tokfence.
//!
//! Everything that more than one crate needs lives here: provider names,
//! monetary amounts, request records, risk states, and the wire-level
//! error-kind table. This crate has no I/O and no async.

pub mod error;
pub mod money;
pub mod provider;
pub mod record;
pub mod risk;

pub use error::ErrorKind;
pub use money::{cents_to_usd, usd_to_cents};
pub use provider::ProviderName;
pub use record::{RequestId, RequestRecord};
pub use risk::{RiskEvent, RiskState};
