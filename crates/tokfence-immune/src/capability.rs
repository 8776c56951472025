//! Capability tokens.
//!
//! A capability identifies the client, session, scope, and risk state of
//! a request. Wire form: `base64url(payload) "." base64url(signature)`
//! where the signature is Ed25519 over the raw payload bytes with the
//! daemon's process key.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokfence_core::RiskState;

use crate::error::{ImmuneError, ImmuneResult};
use crate::keypair::SigningIdentity;

/// Default capability lifetime: 12 minutes.
pub const DEFAULT_TTL_SECS: i64 = 12 * 60;

/// HTTP header carrying a capability token.
pub const CAPABILITY_HEADER: &str = "capability";

/// What a capability authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityScope {
    /// Full proxy access (subject to risk-state admission).
    #[default]
    Proxy,
    /// Safe routes only.
    Safe,
}

impl CapabilityScope {
    /// Parse a scope; empty or unknown strings mean `proxy`.
    #[must_use]
    pub fn parse_lenient(s: &str) -> Self {
        if s.eq_ignore_ascii_case("safe") {
            Self::Safe
        } else {
            Self::Proxy
        }
    }

    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Proxy => "proxy",
            Self::Safe => "safe",
        }
    }
}

/// A validated capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    /// Client identity (caller name or configured id). Never empty.
    pub client_id: String,
    /// Session key for risk tracking. Never empty; defaults to "default".
    pub session_id: String,
    /// Authorized scope. Empty or unknown names deserialize as `proxy`.
    #[serde(default, deserialize_with = "lenient_scope")]
    pub scope: CapabilityScope,
    /// Risk state at mint time. Unknown names deserialize as GREEN.
    #[serde(default, deserialize_with = "lenient_risk_state")]
    pub risk_state: RiskState,
    /// Expiry, unix seconds.
    pub expiry: i64,
    /// Random per-token nonce.
    pub nonce: String,
    /// Mint time, unix seconds.
    pub issued_at: i64,
}

fn lenient_scope<'de, D>(deserializer: D) -> Result<CapabilityScope, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(CapabilityScope::parse_lenient(&raw))
}

fn lenient_risk_state<'de, D>(deserializer: D) -> Result<RiskState, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(RiskState::parse_lenient(&raw))
}

/// Normalize a requested TTL.
///
/// Negative means "use the default"; anything under a second is clamped
/// to one second; YELLOW risk halves the lifetime (floor one second).
#[must_use]
pub fn normalize_ttl(ttl_secs: i64, risk_state: RiskState) -> i64 {
    let mut ttl = if ttl_secs < 0 { DEFAULT_TTL_SECS } else { ttl_secs };
    if ttl < 1 {
        ttl = 1;
    }
    if risk_state == RiskState::Yellow {
        ttl = (ttl / 2).max(1);
    }
    ttl
}

/// Mint a signed capability token.
///
/// # Errors
///
/// Returns [`ImmuneError::MintRejected`] for an empty `client_id`.
pub fn mint(
    identity: &SigningIdentity,
    scope: CapabilityScope,
    client_id: &str,
    session_id: &str,
    risk_state: RiskState,
    ttl_secs: i64,
) -> ImmuneResult<String> {
    if client_id.is_empty() {
        return Err(ImmuneError::MintRejected("client id must not be empty".to_owned()));
    }
    let session_id = if session_id.is_empty() {
        "default"
    } else {
        session_id
    };
    let ttl = normalize_ttl(ttl_secs, risk_state);
    let now = Utc::now().timestamp();

    let nonce: String = {
        let mut rng = rand::thread_rng();
        (0..12)
            .map(|_| {
                let v: u8 = rng.gen_range(0..16);
                char::from_digit(u32::from(v), 16).unwrap_or('0')
            })
            .collect()
    };

    let capability = Capability {
        client_id: client_id.to_owned(),
        session_id: session_id.to_owned(),
        scope,
        risk_state,
        expiry: now.saturating_add(ttl),
        nonce,
        issued_at: now,
    };

    let payload = serde_json::to_vec(&capability)
        .map_err(|e| ImmuneError::MintRejected(e.to_string()))?;
    let signature = identity.sign(&payload);
    Ok(format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(&payload),
        URL_SAFE_NO_PAD.encode(signature)
    ))
}

/// Validate a token string against the daemon's process key.
///
/// # Errors
///
/// Returns [`ImmuneError::InvalidCapability`] on any structural,
/// signature, field, or expiry failure.
pub fn validate(identity: &SigningIdentity, token: &str) -> ImmuneResult<Capability> {
    let (payload_b64, signature_b64) = token
        .split_once('.')
        .ok_or_else(|| ImmuneError::InvalidCapability("missing separator".to_owned()))?;

    let payload = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| ImmuneError::InvalidCapability("payload is not base64url".to_owned()))?;
    let signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| ImmuneError::InvalidCapability("signature is not base64url".to_owned()))?;

    if !identity.verify(&payload, &signature) {
        return Err(ImmuneError::InvalidCapability("signature mismatch".to_owned()));
    }

    let capability: Capability = serde_json::from_slice(&payload)
        .map_err(|e| ImmuneError::InvalidCapability(format!("bad payload: {e}")))?;

    if capability.client_id.is_empty() {
        return Err(ImmuneError::InvalidCapability("empty client id".to_owned()));
    }
    if capability.session_id.is_empty() {
        return Err(ImmuneError::InvalidCapability("empty session id".to_owned()));
    }
    if capability.nonce.is_empty() {
        return Err(ImmuneError::InvalidCapability("empty nonce".to_owned()));
    }
    if capability.expiry <= Utc::now().timestamp() {
        return Err(ImmuneError::InvalidCapability("expired".to_owned()));
    }

    Ok(capability)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> SigningIdentity {
        SigningIdentity::generate()
    }

    #[test]
    fn test_mint_validate_round_trip() {
        let id = identity();
        let token = mint(
            &id,
            CapabilityScope::Proxy,
            "agent-1",
            "session-a",
            RiskState::Green,
            600,
        )
        .unwrap();

        let capability = validate(&id, &token).unwrap();
        assert_eq!(capability.client_id, "agent-1");
        assert_eq!(capability.session_id, "session-a");
        assert_eq!(capability.scope, CapabilityScope::Proxy);
        assert_eq!(capability.risk_state, RiskState::Green);
        assert_eq!(capability.nonce.len(), 12);
        assert!(capability.expiry > capability.issued_at);
    }

    #[test]
    fn test_empty_client_rejected() {
        let id = identity();
        assert!(matches!(
            mint(&id, CapabilityScope::Proxy, "", "s", RiskState::Green, 600),
            Err(ImmuneError::MintRejected(_))
        ));
    }

    #[test]
    fn test_empty_session_defaults() {
        let id = identity();
        let token = mint(&id, CapabilityScope::Proxy, "c", "", RiskState::Green, 600).unwrap();
        assert_eq!(validate(&id, &token).unwrap().session_id, "default");
    }

    #[test]
    fn test_ttl_normalization() {
        assert_eq!(normalize_ttl(-1, RiskState::Green), DEFAULT_TTL_SECS);
        assert_eq!(normalize_ttl(0, RiskState::Green), 1);
        assert_eq!(normalize_ttl(600, RiskState::Green), 600);
        // Yellow halves.
        assert_eq!(normalize_ttl(600, RiskState::Yellow), 300);
        assert_eq!(normalize_ttl(1, RiskState::Yellow), 1);
        assert_eq!(normalize_ttl(-1, RiskState::Yellow), DEFAULT_TTL_SECS / 2);
    }

    #[test]
    fn test_wrong_key_rejected() {
        let a = identity();
        let b = identity();
        let token = mint(&a, CapabilityScope::Proxy, "c", "s", RiskState::Green, 600).unwrap();
        assert!(validate(&b, &token).is_err());
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let id = identity();
        let token = mint(&id, CapabilityScope::Proxy, "c", "s", RiskState::Green, 600).unwrap();
        let (payload, signature) = token.split_once('.').unwrap();

        // Re-encode a modified payload with the original signature.
        let mut bytes = URL_SAFE_NO_PAD.decode(payload).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        let forged = text.replace("\"proxy\"", "\"safe\"");
        bytes = forged.into_bytes();
        let forged_token = format!("{}.{signature}", URL_SAFE_NO_PAD.encode(&bytes));
        assert!(validate(&id, &forged_token).is_err());
    }

    #[test]
    fn test_malformed_tokens_rejected() {
        let id = identity();
        for token in ["", "nodot", "a.b", "!!!.???"] {
            assert!(validate(&id, token).is_err(), "{token:?} should fail");
        }
    }

    #[test]
    fn test_expired_rejected() {
        let id = identity();
        // TTL is clamped to 1s; wait it out.
        let token = mint(&id, CapabilityScope::Proxy, "c", "s", RiskState::Green, 1).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert!(validate(&id, &token).is_err());
    }

    #[test]
    fn test_scope_parse_lenient() {
        assert_eq!(CapabilityScope::parse_lenient("safe"), CapabilityScope::Safe);
        assert_eq!(CapabilityScope::parse_lenient("SAFE"), CapabilityScope::Safe);
        assert_eq!(CapabilityScope::parse_lenient(""), CapabilityScope::Proxy);
        assert_eq!(CapabilityScope::parse_lenient("anything"), CapabilityScope::Proxy);
    }
}
