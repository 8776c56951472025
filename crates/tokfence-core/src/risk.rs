//! Risk states and escalation events.

use serde::{Deserialize, Serialize};

/// Session risk state.
///
/// States are totally ordered `Green < Yellow < Orange < Red`; a session
/// only ever moves up. The derive order of the variants carries the
/// ordering, so keep them sorted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskState {
    /// Normal operation, all requests admitted.
    #[default]
    Green,
    /// A credential-shaped token was seen; only safe routes admitted.
    Yellow,
    /// Override intent or a high-risk endpoint was seen; only safe routes.
    Orange,
    /// Canary exfiltration observed; nothing admitted.
    Red,
}

impl RiskState {
    /// Parse a state name, case-insensitive. Unknown names map to Green,
    /// matching the capability-validation contract.
    #[must_use]
    pub fn parse_lenient(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "YELLOW" => Self::Yellow,
            "ORANGE" => Self::Orange,
            "RED" => Self::Red,
            _ => Self::Green,
        }
    }

    /// Canonical uppercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Green => "GREEN",
            Self::Yellow => "YELLOW",
            Self::Orange => "ORANGE",
            Self::Red => "RED",
        }
    }
}

impl std::fmt::Display for RiskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event that may escalate a session's risk state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskEvent {
    /// A sensor matched a credential-shaped token in the request body.
    SecretLeak,
    /// A sensor matched an override/shell intent in the request body.
    SystemOverride,
    /// The request path matched a high-risk admin/files/billing pattern.
    DisallowedEndpoint,
    /// The response contained the process canary marker.
    CanaryLeak,
}

impl RiskEvent {
    /// Snake-case wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SecretLeak => "secret_leak",
            Self::SystemOverride => "system_override",
            Self::DisallowedEndpoint => "disallowed_endpoint",
            Self::CanaryLeak => "canary_leak",
        }
    }
}

impl std::fmt::Display for RiskEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        assert!(RiskState::Green < RiskState::Yellow);
        assert!(RiskState::Yellow < RiskState::Orange);
        assert!(RiskState::Orange < RiskState::Red);
    }

    #[test]
    fn test_parse_lenient() {
        assert_eq!(RiskState::parse_lenient("yellow"), RiskState::Yellow);
        assert_eq!(RiskState::parse_lenient("RED"), RiskState::Red);
        // Unknown states are treated as Green.
        assert_eq!(RiskState::parse_lenient("purple"), RiskState::Green);
        assert_eq!(RiskState::parse_lenient(""), RiskState::Green);
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(
            serde_json::to_string(&RiskState::Orange).unwrap(),
            "\"ORANGE\""
        );
        assert_eq!(
            serde_json::to_string(&RiskEvent::CanaryLeak).unwrap(),
            "\"canary_leak\""
        );
    }
}
