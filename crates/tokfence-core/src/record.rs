//! Per-request log records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sortable unique identifier for a proxied request.
///
/// UUIDv7 encodes the creation time in the high bits, so lexicographic
/// order matches arrival order and range scans over the log stay cheap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    /// Mint a new time-ordered id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parse from the canonical hyphenated form.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One proxied request, as recorded in the log store.
///
/// Inserted exactly once at request completion and immutable afterwards.
/// `error_type` and `error_message` are empty on success. Credentials
/// never appear in any field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    /// Sortable unique id; also returned to the client as
    /// `X-Tokfence-Request-Id`.
    pub id: RequestId,
    /// Arrival time (UTC).
    pub timestamp: DateTime<Utc>,
    /// Target provider name.
    pub provider: String,
    /// Model extracted from the request body, empty if none.
    pub model: String,
    /// `METHOD /path` of the upstream call.
    pub endpoint: String,
    /// HTTP method of the inbound request.
    pub http_method: String,
    /// Upstream status code; 0 when the upstream was never reached.
    pub status_code: u16,
    /// Input (prompt) tokens reported by the upstream.
    pub input_tokens: u64,
    /// Output (completion) tokens reported by the upstream.
    pub output_tokens: u64,
    /// Estimated cost in hundredths of a cent; 0 for unknown models.
    pub cost_cents: i64,
    /// Wall-clock latency of the whole exchange.
    pub latency_ms: u64,
    /// Time to first response chunk; 0 for non-streaming requests.
    pub ttft_ms: u64,
    /// Best-effort caller process name, empty if unknown.
    pub caller_name: String,
    /// Best-effort caller pid, 0 if unknown.
    pub caller_pid: u32,
    /// Whether the response was streamed.
    pub is_streaming: bool,
    /// Normalized error kind (`status_4xx`, `transport_error`, ...).
    pub error_type: String,
    /// Human-readable error detail.
    pub error_message: String,
    /// Hash of the request body, used as a fallback session key.
    pub request_hash: String,
}

impl RequestRecord {
    /// A blank record for the given provider and endpoint, stamped now.
    #[must_use]
    pub fn new(provider: &str, http_method: &str, endpoint: &str) -> Self {
        Self {
            id: RequestId::new(),
            timestamp: Utc::now(),
            provider: provider.to_owned(),
            model: String::new(),
            endpoint: endpoint.to_owned(),
            http_method: http_method.to_owned(),
            status_code: 0,
            input_tokens: 0,
            output_tokens: 0,
            cost_cents: 0,
            latency_ms: 0,
            ttft_ms: 0,
            caller_name: String::new(),
            caller_pid: 0,
            is_streaming: false,
            error_type: String::new(),
            error_message: String::new(),
            request_hash: String::new(),
        }
    }
}
