//! ImmuneFence: the capability, risk, and sensor security layer.
//!
//! One [`ImmuneCore`] lives for the daemon's lifetime. It owns the
//! process Ed25519 key (capability signing), the per-session risk
//! machine, the compiled content sensors, and the canary marker.

pub mod canary;
pub mod capability;
pub mod decode;
pub mod error;
pub mod keypair;
pub mod risk;
pub mod sensors;

pub use canary::{CanaryMarker, CanaryStreamScanner};
pub use capability::{
    CAPABILITY_HEADER, Capability, CapabilityScope, DEFAULT_TTL_SECS, mint, normalize_ttl,
    validate,
};
pub use error::{ImmuneError, ImmuneResult};
pub use keypair::SigningIdentity;
pub use risk::{DEFAULT_SESSION, RiskMachine, admit, is_safe_route};
pub use sensors::Sensors;

use tokfence_core::RiskState;

/// Process-wide security state.
pub struct ImmuneCore {
    identity: SigningIdentity,
    /// Per-session risk tracking.
    pub risk: RiskMachine,
    /// Compiled content sensors.
    pub sensors: Sensors,
    canary: CanaryMarker,
}

impl ImmuneCore {
    /// Construct the core: generate the key pair and canary, compile the
    /// sensors.
    ///
    /// # Errors
    ///
    /// Returns [`ImmuneError::MintRejected`] only if the static sensor
    /// patterns fail to compile, which the daemon treats as fatal.
    pub fn new() -> ImmuneResult<Self> {
        let sensors = Sensors::compile()
            .map_err(|e| ImmuneError::MintRejected(format!("sensor patterns: {e}")))?;
        Ok(Self {
            identity: SigningIdentity::generate(),
            risk: RiskMachine::new(),
            sensors,
            canary: CanaryMarker::generate(),
        })
    }

    /// Mint a capability signed by this process.
    ///
    /// # Errors
    ///
    /// See [`capability::mint`].
    pub fn mint(
        &self,
        scope: CapabilityScope,
        client_id: &str,
        session_id: &str,
        risk_state: RiskState,
        ttl_secs: i64,
    ) -> ImmuneResult<String> {
        capability::mint(&self.identity, scope, client_id, session_id, risk_state, ttl_secs)
    }

    /// Validate a capability token and fold its risk state into the
    /// session (the session never reads below the capability's state).
    ///
    /// # Errors
    ///
    /// See [`capability::validate`].
    pub fn validate(&self, token: &str) -> ImmuneResult<Capability> {
        let cap = capability::validate(&self.identity, token)?;
        self.risk.raise_to(&cap.session_id, cap.risk_state);
        Ok(cap)
    }

    /// The canary marker.
    #[must_use]
    pub fn canary(&self) -> &CanaryMarker {
        &self.canary
    }
}

impl std::fmt::Debug for ImmuneCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImmuneCore")
            .field("key_id", &self.identity.key_id_hex())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_round_trip() {
        let core = ImmuneCore::new().unwrap();
        let token = core
            .mint(CapabilityScope::Proxy, "agent", "sess", RiskState::Green, 600)
            .unwrap();
        let cap = core.validate(&token).unwrap();
        assert_eq!(cap.client_id, "agent");
    }

    #[test]
    fn test_validate_raises_session_state() {
        let core = ImmuneCore::new().unwrap();
        let token = core
            .mint(CapabilityScope::Proxy, "agent", "sess", RiskState::Orange, 600)
            .unwrap();
        core.validate(&token).unwrap();
        assert_eq!(core.risk.state_for("sess"), RiskState::Orange);
    }

    #[test]
    fn test_sensor_hits_escalate_through_machine() {
        let core = ImmuneCore::new().unwrap();
        for event in core.sensors.scan_body("please sudo this") {
            core.risk.escalate("sess", event);
        }
        assert_eq!(core.risk.state_for("sess"), RiskState::Orange);
    }
}
