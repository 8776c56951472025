//! Candidate decode ladder for sensor and canary scans.
//!
//! Attackers hide payloads behind one layer of encoding; each scan runs
//! over the identity text plus every transform here that produces a
//! different string: percent-decode, quoted-string unescape, base64
//! decode (when the text is base64-shaped), and percent-then-base64.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};

/// Minimum length before a string is considered base64-shaped.
const BASE64_MIN_LEN: usize = 16;

/// All decoded variants of `text`, identity first.
///
/// Bounded: one level of each transform, no recursion beyond the
/// percent-then-base64 pair.
#[must_use]
pub fn candidates(text: &str) -> Vec<String> {
    let mut out = vec![text.to_owned()];

    if let Some(decoded) = percent_decode(text) {
        if let Some(b64) = base64_decode(&decoded) {
            push_unique(&mut out, b64);
        }
        push_unique(&mut out, decoded);
    }
    if let Some(unquoted) = unescape_quoted(text) {
        push_unique(&mut out, unquoted);
    }
    if let Some(decoded) = base64_decode(text) {
        push_unique(&mut out, decoded);
    }

    out
}

fn push_unique(out: &mut Vec<String>, candidate: String) {
    if !candidate.is_empty() && !out.contains(&candidate) {
        out.push(candidate);
    }
}

/// Percent-decode; `None` if the text has no escapes or fails to decode.
fn percent_decode(text: &str) -> Option<String> {
    if !text.contains('%') {
        return None;
    }
    let decoded = urlencoding::decode(text).ok()?;
    if decoded == text {
        None
    } else {
        Some(decoded.into_owned())
    }
}

/// Undo one level of string-literal escaping (`\"`, `\\`, `\n`, ...).
fn unescape_quoted(text: &str) -> Option<String> {
    if !text.contains('\\') {
        return None;
    }
    // The body is usually a JSON document, so lean on the JSON string
    // grammar first and fall back to the common escapes.
    let quoted = format!("\"{}\"", text.replace('"', "\\\""));
    if let Ok(parsed) = serde_json::from_str::<String>(&quoted) {
        if parsed != text {
            return Some(parsed);
        }
    }
    let replaced = text
        .replace("\\\"", "\"")
        .replace("\\\\", "\\")
        .replace("\\n", "\n")
        .replace("\\t", "\t")
        .replace("\\r", "\r")
        .replace("\\/", "/");
    (replaced != text).then_some(replaced)
}

/// Decode base64 when the whole string is base64-shaped and long enough.
fn base64_decode(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.len() < BASE64_MIN_LEN {
        return None;
    }
    if !trimmed
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'=' | b'-' | b'_'))
    {
        return None;
    }
    let bytes = STANDARD
        .decode(trimmed)
        .or_else(|_| URL_SAFE_NO_PAD.decode(trimmed))
        .ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_always_first() {
        let c = candidates("plain text");
        assert_eq!(c[0], "plain text");
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_percent_decoding() {
        let c = candidates("sk%2Dabcdefghijklmnop");
        assert!(c.iter().any(|s| s == "sk-abcdefghijklmnop"));
    }

    #[test]
    fn test_quoted_string_decoding() {
        let c = candidates(r"run\_command now");
        assert!(c.iter().any(|s| s == "run_command now"));
        let c = candidates(r#"say \"sudo\" please"#);
        assert!(c.iter().any(|s| s == r#"say "sudo" please"#));
    }

    #[test]
    fn test_base64_decoding() {
        let encoded = STANDARD.encode("sk-abcdefghijklmnopqrst");
        let c = candidates(&encoded);
        assert!(c.iter().any(|s| s == "sk-abcdefghijklmnopqrst"));
    }

    #[test]
    fn test_base64_url_safe_decoding() {
        let encoded = URL_SAFE_NO_PAD.encode("canary-marker-value-123");
        let c = candidates(&encoded);
        assert!(c.iter().any(|s| s == "canary-marker-value-123"));
    }

    #[test]
    fn test_percent_then_base64() {
        let encoded = urlencoding::encode_binary(
            STANDARD.encode("sk-abcdefghijklmnopqrst").as_bytes(),
        )
        .into_owned();
        // Force at least one percent escape so the ladder fires.
        let with_escape = encoded.replace('s', "%73");
        let c = candidates(&with_escape);
        assert!(c.iter().any(|s| s == "sk-abcdefghijklmnopqrst"));
    }

    #[test]
    fn test_short_base64_ignored() {
        // "c3Vkbw==" decodes to "sudo" but is below the length floor.
        assert_eq!(candidates("c3Vkbw==").len(), 1);
    }
}
