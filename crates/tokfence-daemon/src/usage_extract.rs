//! Token-usage extraction from upstream responses.
//!
//! Non-streaming responses carry a `usage` object; streaming responses
//! interleave usage fields across SSE `data:` frames (OpenAI puts them on
//! the final chunk, Anthropic splits input/output between `message_start`
//! and `message_delta`). The accumulator takes the maximum seen per axis,
//! which is correct for both cumulative and final-total reporting.

use serde_json::Value;

/// Accumulated usage for one response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageTotals {
    /// Input/prompt tokens.
    pub input_tokens: u64,
    /// Output/completion tokens.
    pub output_tokens: u64,
    /// Model name reported by the upstream, if any.
    pub model: Option<String>,
}

impl UsageTotals {
    /// Fold a JSON document (whole body or one SSE frame) into the
    /// totals.
    pub fn absorb(&mut self, value: &Value) {
        self.walk(value);
    }

    fn walk(&mut self, value: &Value) {
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    if let Some(n) = child.as_u64() {
                        match key.as_str() {
                            "input_tokens" | "prompt_tokens" => {
                                self.input_tokens = self.input_tokens.max(n);
                            },
                            "output_tokens" | "completion_tokens" => {
                                self.output_tokens = self.output_tokens.max(n);
                            },
                            _ => {},
                        }
                    }
                    if key == "model" && self.model.is_none() {
                        if let Some(model) = child.as_str() {
                            if !model.is_empty() {
                                self.model = Some(model.to_owned());
                            }
                        }
                    }
                    self.walk(child);
                }
            },
            Value::Array(items) => {
                for item in items {
                    self.walk(item);
                }
            },
            _ => {},
        }
    }
}

/// What the pipeline learns from the inbound request body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestInfo {
    /// Requested model, empty if absent.
    pub model: String,
    /// Whether the body asks for a streamed response.
    pub stream: bool,
}

impl RequestInfo {
    /// Parse the request body (tolerates non-JSON bodies).
    #[must_use]
    pub fn from_body(body: &[u8]) -> Self {
        let Ok(value) = serde_json::from_slice::<Value>(body) else {
            return Self::default();
        };
        Self {
            model: value
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            stream: value.get("stream").and_then(Value::as_bool).unwrap_or(false),
        }
    }

    /// Crude input-token estimate from body length (four bytes per
    /// token), used only for the pre-dispatch budget check.
    #[must_use]
    pub fn estimated_input_tokens(body_len: usize) -> u64 {
        (body_len / 4) as u64
    }
}

/// Incremental SSE parser for streamed responses.
///
/// Buffers partial lines across chunk boundaries, feeds every complete
/// `data: {...}` frame to the accumulator, and notices `data: [DONE]`.
#[derive(Debug, Default)]
pub struct SseUsageParser {
    buffer: String,
    /// Totals accumulated so far.
    pub totals: UsageTotals,
    /// Whether the terminal `[DONE]` frame was seen.
    pub done: bool,
}

impl SseUsageParser {
    /// A fresh parser.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of the streamed body.
    pub fn feed(&mut self, chunk: &str) {
        self.buffer.push_str(chunk);
        while let Some(newline) = self.buffer.find('\n') {
            let line = self.buffer[..newline].trim_end_matches('\r').to_owned();
            self.buffer.drain(..=newline);
            self.handle_line(&line);
        }
    }

    fn handle_line(&mut self, line: &str) {
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.trim();
        if data == "[DONE]" {
            self.done = true;
            return;
        }
        if let Ok(value) = serde_json::from_str::<Value>(data) {
            self.totals.absorb(&value);
        }
    }
}
