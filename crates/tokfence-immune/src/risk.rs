//! Per-session risk state machine and admission policy.

use std::collections::HashMap;
use std::sync::Mutex;

use tokfence_core::{RiskEvent, RiskState};
use tracing::warn;

use crate::capability::CapabilityScope;

/// Session id used when no capability accompanies a request.
pub const DEFAULT_SESSION: &str = "default";

#[derive(Debug, Default, Clone)]
struct SessionRisk {
    state: RiskState,
    events: Vec<RiskEvent>,
}

/// Monotonic risk tracking, keyed by session id.
///
/// Transitions only escalate; dropping back to GREEN requires the session
/// to end (in practice, a daemon restart).
#[derive(Debug, Default)]
pub struct RiskMachine {
    sessions: Mutex<HashMap<String, SessionRisk>>,
}

impl RiskMachine {
    /// An empty machine; every unseen session is GREEN.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state for a session.
    #[must_use]
    pub fn state_for(&self, session_id: &str) -> RiskState {
        self.sessions
            .lock()
            .map(|sessions| sessions.get(session_id).map_or(RiskState::Green, |s| s.state))
            .unwrap_or(RiskState::Green)
    }

    /// Apply an event to a session, returning the resulting state.
    ///
    /// Transition table:
    /// - `secret_leak`: GREEN → YELLOW
    /// - `system_override`, `disallowed_endpoint`: GREEN|YELLOW → ORANGE
    /// - `canary_leak`: any → RED
    pub fn escalate(&self, session_id: &str, event: RiskEvent) -> RiskState {
        let Ok(mut sessions) = self.sessions.lock() else {
            return RiskState::Green;
        };
        let session = sessions.entry(session_id.to_owned()).or_default();
        let from = session.state;
        let to = match event {
            RiskEvent::SecretLeak => match from {
                RiskState::Green => RiskState::Yellow,
                other => other,
            },
            RiskEvent::SystemOverride | RiskEvent::DisallowedEndpoint => match from {
                RiskState::Green | RiskState::Yellow => RiskState::Orange,
                other => other,
            },
            RiskEvent::CanaryLeak => RiskState::Red,
        };
        session.events.push(event);
        if to > from {
            warn!(
                session = session_id,
                event = %event,
                from = %from,
                to = %to,
                "risk state escalated"
            );
            session.state = to;
        }
        session.state
    }

    /// Raise a session to at least `floor` (used to keep the session
    /// state consistent with a presented capability's risk state).
    pub fn raise_to(&self, session_id: &str, floor: RiskState) {
        if floor == RiskState::Green {
            return;
        }
        if let Ok(mut sessions) = self.sessions.lock() {
            let session = sessions.entry(session_id.to_owned()).or_default();
            if floor > session.state {
                session.state = floor;
            }
        }
    }

    /// Events seen by a session, in order.
    #[must_use]
    pub fn events_for(&self, session_id: &str) -> Vec<RiskEvent> {
        self.sessions
            .lock()
            .map(|sessions| {
                sessions
                    .get(session_id)
                    .map(|s| s.events.clone())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Snapshot of every tracked session's state.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, RiskState)> {
        self.sessions
            .lock()
            .map(|sessions| {
                sessions
                    .iter()
                    .map(|(id, s)| (id.clone(), s.state))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Whether a request is admitted under a risk state.
///
/// GREEN admits everything; YELLOW and ORANGE admit only safe routes
/// regardless of capability scope; RED admits nothing.
#[must_use]
pub fn admit(state: RiskState, scope: CapabilityScope, method: &str, path: &str) -> bool {
    let _ = scope;
    match state {
        RiskState::Green => true,
        RiskState::Yellow | RiskState::Orange => is_safe_route(method, path),
        RiskState::Red => false,
    }
}

/// Safe routes: read-only model listing.
///
/// Case-insensitive on method and path; trailing slash accepted.
#[must_use]
pub fn is_safe_route(method: &str, path: &str) -> bool {
    let safe_method = matches!(
        method.to_ascii_uppercase().as_str(),
        "GET" | "HEAD" | "OPTIONS"
    );
    if !safe_method {
        return false;
    }
    let path = path.to_ascii_lowercase();
    for prefix in ["/v1/models", "/models"] {
        if path == prefix
            || path == format!("{prefix}/")
            || path.starts_with(&format!("{prefix}/"))
        {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_green() {
        let machine = RiskMachine::new();
        assert_eq!(machine.state_for("anything"), RiskState::Green);
    }

    #[test]
    fn test_secret_leak_yellows_green_only() {
        let machine = RiskMachine::new();
        assert_eq!(machine.escalate("s", RiskEvent::SecretLeak), RiskState::Yellow);
        // Yellow stays yellow on another secret leak.
        assert_eq!(machine.escalate("s", RiskEvent::SecretLeak), RiskState::Yellow);
    }

    #[test]
    fn test_override_oranges_green_and_yellow() {
        let machine = RiskMachine::new();
        assert_eq!(
            machine.escalate("a", RiskEvent::SystemOverride),
            RiskState::Orange
        );

        machine.escalate("b", RiskEvent::SecretLeak);
        assert_eq!(
            machine.escalate("b", RiskEvent::DisallowedEndpoint),
            RiskState::Orange
        );
    }

    #[test]
    fn test_canary_reds_anything() {
        let machine = RiskMachine::new();
        assert_eq!(machine.escalate("s", RiskEvent::CanaryLeak), RiskState::Red);
        // No downgrade afterwards.
        assert_eq!(machine.escalate("s", RiskEvent::SecretLeak), RiskState::Red);
        assert_eq!(machine.state_for("s"), RiskState::Red);
    }

    #[test]
    fn test_orange_not_lowered_by_secret() {
        let machine = RiskMachine::new();
        machine.escalate("s", RiskEvent::SystemOverride);
        assert_eq!(machine.escalate("s", RiskEvent::SecretLeak), RiskState::Orange);
    }

    #[test]
    fn test_sessions_independent() {
        let machine = RiskMachine::new();
        machine.escalate("bad", RiskEvent::CanaryLeak);
        assert_eq!(machine.state_for("good"), RiskState::Green);
    }

    #[test]
    fn test_raise_to() {
        let machine = RiskMachine::new();
        machine.raise_to("s", RiskState::Orange);
        assert_eq!(machine.state_for("s"), RiskState::Orange);
        // Never lowers.
        machine.raise_to("s", RiskState::Yellow);
        assert_eq!(machine.state_for("s"), RiskState::Orange);
    }

    #[test]
    fn test_events_recorded() {
        let machine = RiskMachine::new();
        machine.escalate("s", RiskEvent::SecretLeak);
        machine.escalate("s", RiskEvent::SystemOverride);
        assert_eq!(
            machine.events_for("s"),
            vec![RiskEvent::SecretLeak, RiskEvent::SystemOverride]
        );
    }

    #[test]
    fn test_safe_routes() {
        assert!(is_safe_route("GET", "/v1/models"));
        assert!(is_safe_route("get", "/v1/models/"));
        assert!(is_safe_route("HEAD", "/v1/models/gpt-4o"));
        assert!(is_safe_route("OPTIONS", "/models"));
        assert!(is_safe_route("GET", "/V1/MODELS"));

        assert!(!is_safe_route("POST", "/v1/models"));
        assert!(!is_safe_route("GET", "/v1/chat/completions"));
        assert!(!is_safe_route("GET", "/v1/modelsextra"));
    }

    #[test]
    fn test_admission_policy() {
        let scope = CapabilityScope::Proxy;
        // GREEN admits everything.
        assert!(admit(RiskState::Green, scope, "POST", "/v1/messages"));
        // YELLOW and ORANGE admit only safe routes.
        for state in [RiskState::Yellow, RiskState::Orange] {
            assert!(admit(state, scope, "GET", "/v1/models"));
            assert!(!admit(state, scope, "POST", "/v1/messages"));
            assert!(!admit(state, CapabilityScope::Safe, "POST", "/v1/messages"));
        }
        // RED admits nothing.
        assert!(!admit(RiskState::Red, scope, "GET", "/v1/models"));
    }
}
