//! Header policy.
//!
//! The proxy strips anything credential-shaped from the inbound request
//! before injecting the vault credential for the upstream, and strips
//! hop-by-hop headers in both directions. Sanitization is idempotent.

use axum::http::HeaderMap;
use axum::http::header::{HeaderName, HeaderValue};

/// Inbound headers that may carry a client-side credential.
const AUTH_HEADERS: &[&str] = &[
    "authorization",
    "proxy-authorization",
    "x-api-key",
    "x-goog-api-key",
    "cookie",
];

/// Hop-by-hop headers, never forwarded in either direction.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
    "proxy-connection",
];

/// Headers the proxy or HTTP client manages itself.
const MANAGED: &[&str] = &["host", "content-length", "capability", "x-tokfence-caller"];

fn is_listed(name: &HeaderName, list: &[&str]) -> bool {
    list.iter().any(|l| name.as_str().eq_ignore_ascii_case(l))
}

/// Copy inbound headers for the upstream request, dropping auth-like,
/// hop-by-hop, and proxy-managed names.
#[must_use]
pub fn sanitize_for_upstream(inbound: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(inbound.len());
    for (name, value) in inbound {
        if is_listed(name, AUTH_HEADERS) || is_listed(name, HOP_BY_HOP) || is_listed(name, MANAGED)
        {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Inject upstream authentication for a provider family.
///
/// `anthropic` uses `x-api-key` plus a pinned `anthropic-version`;
/// `google` uses `x-goog-api-key`; everything else gets a bearer token.
pub fn inject_auth(headers: &mut HeaderMap, provider: &str, credential: &str) {
    let set = |headers: &mut HeaderMap, name: &'static str, value: String| {
        if let Ok(mut value) = HeaderValue::from_str(&value) {
            value.set_sensitive(true);
            headers.insert(HeaderName::from_static(name), value);
        }
    };
    match provider {
        "anthropic" => {
            set(headers, "x-api-key", credential.to_owned());
            if let Ok(version) = HeaderValue::from_str("2023-06-01") {
                headers.insert(HeaderName::from_static("anthropic-version"), version);
            }
        },
        "google" => set(headers, "x-goog-api-key", credential.to_owned()),
        _ => set(headers, "authorization", format!("Bearer {credential}")),
    }
}

/// Overlay configured extra headers verbatim.
pub fn apply_extra_headers(
    headers: &mut HeaderMap,
    extra: &std::collections::BTreeMap<String, String>,
) {
    for (name, value) in extra {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }
}

/// Copy upstream response headers back to the client, dropping
/// hop-by-hop names and lengths the server recomputes.
#[must_use]
pub fn sanitize_for_client(upstream: &reqwest::header::HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        let Ok(name) = HeaderName::try_from(name.as_str()) else {
            continue;
        };
        if is_listed(&name, HOP_BY_HOP) || name.as_str().eq_ignore_ascii_case("content-length") {
            continue;
        }
        if let Ok(value) = HeaderValue::from_bytes(value.as_bytes()) {
            out.append(name, value);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer agent-key"));
        headers.insert("x-api-key", HeaderValue::from_static("agent-key"));
        headers.insert("cookie", HeaderValue::from_static("session=1"));
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.insert("accept", HeaderValue::from_static("text/event-stream"));
        headers
    }

    #[test]
    fn test_strips_auth_and_hop_by_hop() {
        let out = sanitize_for_upstream(&inbound());
        assert!(out.get("authorization").is_none());
        assert!(out.get("x-api-key").is_none());
        assert!(out.get("cookie").is_none());
        assert!(out.get("connection").is_none());
        assert_eq!(out.get("content-type").unwrap(), "application/json");
        assert_eq!(out.get("accept").unwrap(), "text/event-stream");
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let once = sanitize_for_upstream(&inbound());
        let twice = sanitize_for_upstream(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_bearer_injection() {
        let mut headers = HeaderMap::new();
        inject_auth(&mut headers, "openai", "K");
        assert_eq!(headers.get("authorization").unwrap(), "Bearer K");
    }

    #[test]
    fn test_anthropic_injection() {
        let mut headers = HeaderMap::new();
        inject_auth(&mut headers, "anthropic", "K");
        assert_eq!(headers.get("x-api-key").unwrap(), "K");
        assert_eq!(headers.get("anthropic-version").unwrap(), "2023-06-01");
        assert!(headers.get("authorization").is_none());
    }

    #[test]
    fn test_google_injection() {
        let mut headers = HeaderMap::new();
        inject_auth(&mut headers, "google", "K");
        assert_eq!(headers.get("x-goog-api-key").unwrap(), "K");
    }

    #[test]
    fn test_injection_replaces_stale_value() {
        let mut headers = HeaderMap::new();
        inject_auth(&mut headers, "openai", "old");
        inject_auth(&mut headers, "openai", "new");
        assert_eq!(headers.get("authorization").unwrap(), "Bearer new");
    }

    #[test]
    fn test_extra_headers_overlay() {
        let mut headers = HeaderMap::new();
        let extra = std::collections::BTreeMap::from([
            ("x-trace".to_owned(), "1".to_owned()),
        ]);
        apply_extra_headers(&mut headers, &extra);
        assert_eq!(headers.get("x-trace").unwrap(), "1");
    }

    #[test]
    fn test_response_sanitization() {
        let mut upstream = reqwest::header::HeaderMap::new();
        upstream.insert("content-type", "application/json".parse().unwrap());
        upstream.insert("transfer-encoding", "chunked".parse().unwrap());
        upstream.insert("content-length", "42".parse().unwrap());
        let out = sanitize_for_client(&upstream);
        assert!(out.get("transfer-encoding").is_none());
        assert!(out.get("content-length").is_none());
        assert_eq!(out.get("content-type").unwrap(), "application/json");
    }
}
