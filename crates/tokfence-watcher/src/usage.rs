//! Usage-endpoint adapters.
//!
//! Each provider family exposes usage under different paths with
//! different auth headers. Endpoints are tried in order; the first
//! response that parses into any known usage axis wins.

use chrono::{DateTime, Utc};
use reqwest::Client;
use tracing::debug;

use crate::error::{WatcherError, WatcherResult};
use crate::parse::{RemoteUsage, parse_usage};

/// Per-endpoint timeout.
pub const ENDPOINT_TIMEOUT_SECS: u64 = 15;

/// Provider authentication families, mirroring the proxy's upstream
/// header injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFamily {
    /// `Authorization: Bearer <credential>` (openai, mistral, groq, ...).
    Bearer,
    /// `x-api-key` + `anthropic-version`.
    Anthropic,
    /// `x-goog-api-key`.
    Google,
}

impl AuthFamily {
    /// Family for a provider name.
    #[must_use]
    pub fn for_provider(provider: &str) -> Self {
        match provider {
            "anthropic" => Self::Anthropic,
            "google" => Self::Google,
            _ => Self::Bearer,
        }
    }
}

/// Candidate usage URLs for a provider over a window, most specific
/// first. Providers outside the two known families return an empty list
/// and need a custom endpoint override.
#[must_use]
pub fn candidate_endpoints(
    provider: &str,
    upstream: &str,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Vec<String> {
    let start_unix = window_start.timestamp();
    let end_unix = window_end.timestamp();
    let start_date = window_start.format("%Y-%m-%d");
    let end_date = window_end.format("%Y-%m-%d");

    match AuthFamily::for_provider(provider) {
        AuthFamily::Anthropic => vec![
            format!(
                "{upstream}/v1/organizations/cost_report?starting_at={}&ending_at={}",
                window_start.to_rfc3339(),
                window_end.to_rfc3339()
            ),
            format!(
                "{upstream}/v1/organizations/usage_report/messages?starting_at={}&ending_at={}&limit=100",
                window_start.to_rfc3339(),
                window_end.to_rfc3339()
            ),
            format!("{upstream}/v1/usage?start_date={start_date}&end_date={end_date}"),
        ],
        AuthFamily::Google => Vec::new(),
        AuthFamily::Bearer => vec![
            format!(
                "{upstream}/v1/organization/costs?start_time={start_unix}&end_time={end_unix}"
            ),
            format!(
                "{upstream}/v1/dashboard/billing/usage?start_date={start_date}&end_date={end_date}"
            ),
            format!(
                "{upstream}/v1/organization/usage/completions?start_time={start_unix}&end_time={end_unix}"
            ),
        ],
    }
}

/// Fetch and parse remote usage, trying `endpoints` in order.
///
/// # Errors
///
/// Returns [`WatcherError::FetchFailure`] carrying the last failure when
/// no endpoint yields a parseable response.
pub async fn fetch_usage(
    client: &Client,
    provider: &str,
    credential: &str,
    endpoints: &[String],
) -> WatcherResult<RemoteUsage> {
    let mut last_error = "no usage endpoints configured".to_owned();

    for endpoint in endpoints {
        let mut request = client
            .get(endpoint)
            .timeout(std::time::Duration::from_secs(ENDPOINT_TIMEOUT_SECS));
        request = match AuthFamily::for_provider(provider) {
            AuthFamily::Bearer => request.bearer_auth(credential),
            AuthFamily::Anthropic => request
                .header("x-api-key", credential)
                .header("anthropic-version", "2023-06-01"),
            AuthFamily::Google => request.header("x-goog-api-key", credential),
        };

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                last_error = format!("{endpoint}: {e}");
                continue;
            },
        };
        let status = response.status();
        if !status.is_success() {
            last_error = format!("{endpoint}: HTTP {status}");
            continue;
        }
        let body: serde_json::Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                last_error = format!("{endpoint}: bad JSON: {e}");
                continue;
            },
        };

        let usage = parse_usage(&body);
        if usage.any_known() {
            debug!(provider, endpoint, "usage endpoint answered");
            return Ok(usage);
        }
        last_error = format!("{endpoint}: no usage fields recognized");
    }

    Err(WatcherError::FetchFailure {
        provider: provider.to_owned(),
        detail: last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_mapping() {
        assert_eq!(AuthFamily::for_provider("anthropic"), AuthFamily::Anthropic);
        assert_eq!(AuthFamily::for_provider("google"), AuthFamily::Google);
        assert_eq!(AuthFamily::for_provider("openai"), AuthFamily::Bearer);
        assert_eq!(AuthFamily::for_provider("groq"), AuthFamily::Bearer);
    }

    #[test]
    fn test_openai_endpoints_in_order() {
        let start = Utc::now() - chrono::Duration::days(1);
        let end = Utc::now();
        let endpoints = candidate_endpoints("openai", "https://api.openai.com", start, end);
        assert_eq!(endpoints.len(), 3);
        assert!(endpoints[0].contains("/v1/organization/costs?start_time="));
        assert!(endpoints[1].contains("/v1/dashboard/billing/usage?start_date="));
        assert!(endpoints[2].contains("/v1/organization/usage/completions?"));
    }

    #[test]
    fn test_anthropic_endpoints_in_order() {
        let start = Utc::now() - chrono::Duration::days(1);
        let end = Utc::now();
        let endpoints = candidate_endpoints("anthropic", "https://api.anthropic.com", start, end);
        assert_eq!(endpoints.len(), 3);
        assert!(endpoints[0].contains("/v1/organizations/cost_report?starting_at="));
        assert!(endpoints[1].contains("/v1/organizations/usage_report/messages?"));
        assert!(endpoints[2].contains("/v1/usage?start_date="));
    }

    #[test]
    fn test_unknown_family_has_no_defaults() {
        let start = Utc::now();
        let endpoints = candidate_endpoints("google", "https://api.example.com", start, start);
        assert!(endpoints.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_with_no_endpoints_fails() {
        let client = Client::new();
        let err = fetch_usage(&client, "custom", "key", &[]).await.unwrap_err();
        assert!(matches!(err, WatcherError::FetchFailure { .. }));
    }
}
