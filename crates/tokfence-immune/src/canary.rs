//! Process canary.
//!
//! A random marker minted at daemon start and held only in memory. The
//! marker is never sent anywhere by the daemon itself, so its appearance
//! in a response body proves the upstream (or something between) read the
//! daemon's memory or was fed the marker, and is treated as exfiltration.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use rand::Rng;
use rand::distributions::Alphanumeric;

use crate::decode;

/// Marker length in characters.
const MARKER_LEN: usize = 32;

/// Bytes of trailing context kept between streaming chunks so encoded
/// markers split across chunk boundaries are still caught.
const STREAM_TAIL: usize = 256;

/// The in-memory canary marker and its precomputed encoded forms.
pub struct CanaryMarker {
    marker: String,
    needles: Vec<String>,
}

impl CanaryMarker {
    /// Mint a fresh random marker.
    #[must_use]
    pub fn generate() -> Self {
        let marker: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(MARKER_LEN)
            .map(char::from)
            .collect();
        Self::from_marker(marker)
    }

    #[cfg(test)]
    pub(crate) fn with_marker(marker: &str) -> Self {
        Self::from_marker(marker.to_owned())
    }

    fn from_marker(marker: String) -> Self {
        // Single-transform encodings of the marker searched directly in
        // response text; the decode ladder covers the rest.
        let needles = vec![
            marker.clone(),
            STANDARD.encode(&marker),
            URL_SAFE_NO_PAD.encode(&marker),
        ];
        Self { marker, needles }
    }

    /// The marker value. Callers must never log or persist it.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.marker
    }

    /// Scan a complete body for the marker, including one decode level.
    #[must_use]
    pub fn scan(&self, text: &str) -> bool {
        if self.needles.iter().any(|n| text.contains(n)) {
            return true;
        }
        decode::candidates(text)
            .iter()
            .skip(1)
            .any(|candidate| candidate.contains(&self.marker))
    }

    /// A stateful scanner for streamed responses.
    #[must_use]
    pub fn stream_scanner(&self) -> CanaryStreamScanner<'_> {
        CanaryStreamScanner {
            marker: self,
            tail: String::new(),
            hit: false,
        }
    }
}

impl std::fmt::Debug for CanaryMarker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The marker itself must never reach logs.
        f.debug_struct("CanaryMarker").finish_non_exhaustive()
    }
}

/// Chunk-by-chunk canary scanner.
///
/// Keeps a bounded tail of previous text so markers straddling chunk
/// boundaries are still detected.
pub struct CanaryStreamScanner<'a> {
    marker: &'a CanaryMarker,
    tail: String,
    hit: bool,
}

impl CanaryStreamScanner<'_> {
    /// Feed one chunk; returns true if the canary has been seen so far.
    pub fn feed(&mut self, chunk: &str) -> bool {
        if self.hit {
            return true;
        }
        let window = format!("{}{}", self.tail, chunk);
        if self.marker.scan(&window) {
            self.hit = true;
            return true;
        }
        // Keep the last STREAM_TAIL characters as context, on a char
        // boundary.
        let keep_from = window
            .char_indices()
            .rev()
            .take(STREAM_TAIL)
            .last()
            .map_or(0, |(i, _)| i);
        self.tail = window[keep_from..].to_owned();
        false
    }

    /// Whether the canary was observed in any chunk.
    #[must_use]
    pub fn seen(&self) -> bool {
        self.hit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markers_are_unique_and_sized() {
        let a = CanaryMarker::generate();
        let b = CanaryMarker::generate();
        assert_eq!(a.value().len(), MARKER_LEN);
        assert_ne!(a.value(), b.value());
    }

    #[test]
    fn test_plain_hit() {
        let canary = CanaryMarker::with_marker("CANARYmarkerVALUE0123456789abcd0");
        assert!(canary.scan("prefix CANARYmarkerVALUE0123456789abcd0 suffix"));
        assert!(!canary.scan("nothing to see"));
    }

    #[test]
    fn test_base64_hit() {
        let canary = CanaryMarker::with_marker("CANARYmarkerVALUE0123456789abcd0");
        let encoded = STANDARD.encode("CANARYmarkerVALUE0123456789abcd0");
        assert!(canary.scan(&format!("data: {encoded}")));
    }

    #[test]
    fn test_percent_encoded_hit() {
        let canary = CanaryMarker::with_marker("CANARYmarkerVALUE0123456789abcd0");
        // Percent-encode a couple of characters so only the decode ladder
        // can recover the marker.
        let body = "CANARY%6darkerVALUE0123456789abcd0";
        assert!(canary.scan(body));
    }

    #[test]
    fn test_stream_scanner_across_chunks() {
        let canary = CanaryMarker::with_marker("CANARYmarkerVALUE0123456789abcd0");
        let mut scanner = canary.stream_scanner();
        assert!(!scanner.feed("data: CANARYmarker"));
        assert!(scanner.feed("VALUE0123456789abcd0\n\n"));
        assert!(scanner.seen());
        // Latched.
        assert!(scanner.feed("more data"));
    }

    #[test]
    fn test_stream_scanner_clean() {
        let canary = CanaryMarker::with_marker("CANARYmarkerVALUE0123456789abcd0");
        let mut scanner = canary.stream_scanner();
        for chunk in ["data: hello\n\n", "data: world\n\n", "data: [DONE]\n\n"] {
            assert!(!scanner.feed(chunk));
        }
        assert!(!scanner.seen());
    }

    #[test]
    fn test_debug_hides_marker() {
        let canary = CanaryMarker::with_marker("CANARYmarkerVALUE0123456789abcd0");
        let debug = format!("{canary:?}");
        assert!(!debug.contains("CANARYmarker"));
    }
}
