//! Tolerant usage-response parsing.
//!
//! Provider usage APIs disagree wildly on shape, so the parser walks the
//! whole JSON tree and classifies keys. `total_*` keys are authoritative
//! totals (the maximum reported value wins); per-item keys are parts and
//! sum. The final figure for each axis is the larger of the two, which
//! tolerates responses that report both a rollup and its line items.

use serde_json::Value;
use tokfence_core::money::usd_to_cents;

/// Remote usage extracted from a provider response.
///
/// Each field is `None` when the response carried no recognizable key
/// for that axis; a known-zero is `Some(0)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RemoteUsage {
    /// Cost in hundredths of a cent.
    pub cost_cents: Option<i64>,
    /// Input/prompt tokens.
    pub input_tokens: Option<u64>,
    /// Output/completion tokens.
    pub output_tokens: Option<u64>,
    /// Request count.
    pub requests: Option<u64>,
}

impl RemoteUsage {
    /// Whether any axis was recognized.
    #[must_use]
    pub fn any_known(&self) -> bool {
        self.cost_cents.is_some()
            || self.input_tokens.is_some()
            || self.output_tokens.is_some()
            || self.requests.is_some()
    }

    /// Total tokens across both axes, when any token count is known.
    #[must_use]
    pub fn total_tokens(&self) -> Option<u64> {
        match (self.input_tokens, self.output_tokens) {
            (None, None) => None,
            (a, b) => Some(a.unwrap_or(0).saturating_add(b.unwrap_or(0))),
        }
    }

    /// True if any axis of `self` strictly exceeds the same axis of
    /// `previous` (used for idle-leak detection).
    #[must_use]
    pub fn grew_since(&self, previous: &Self) -> bool {
        fn grew<T: PartialOrd>(now: Option<T>, before: Option<T>) -> bool {
            matches!((now, before), (Some(n), Some(b)) if n > b)
        }
        grew(self.cost_cents, previous.cost_cents)
            || grew(self.input_tokens, previous.input_tokens)
            || grew(self.output_tokens, previous.output_tokens)
            || grew(self.requests, previous.requests)
    }
}

#[derive(Default)]
struct Accumulator {
    total: Option<i64>,
    part_sum: i64,
    part_seen: bool,
}

impl Accumulator {
    fn absorb_total(&mut self, value: i64) {
        self.total = Some(self.total.map_or(value, |t| t.max(value)));
    }

    fn absorb_part(&mut self, value: i64) {
        self.part_sum = self.part_sum.saturating_add(value);
        self.part_seen = true;
    }

    fn resolve(&self) -> Option<i64> {
        match (self.total, self.part_seen) {
            (Some(t), true) => Some(t.max(self.part_sum)),
            (Some(t), false) => Some(t),
            (None, true) => Some(self.part_sum),
            (None, false) => None,
        }
    }
}

#[derive(Default)]
struct Walk {
    cost: Accumulator,
    input: Accumulator,
    output: Accumulator,
    requests: Accumulator,
}

/// Parse a usage response body.
#[must_use]
pub fn parse_usage(value: &Value) -> RemoteUsage {
    let mut walk = Walk::default();
    visit(value, &mut walk);
    RemoteUsage {
        cost_cents: walk.cost.resolve(),
        input_tokens: walk.input.resolve().map(|v| v.max(0).unsigned_abs()),
        output_tokens: walk.output.resolve().map(|v| v.max(0).unsigned_abs()),
        requests: walk.requests.resolve().map(|v| v.max(0).unsigned_abs()),
    }
}

fn visit(value: &Value, walk: &mut Walk) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                classify(key, child, walk);
                visit(child, walk);
            }
        },
        Value::Array(items) => {
            for item in items {
                visit(item, walk);
            }
        },
        _ => {},
    }
}

#[allow(clippy::cast_possible_truncation)]
fn classify(key: &str, value: &Value, walk: &mut Walk) {
    let Some(number) = numeric(value) else {
        return;
    };
    let key = key.to_ascii_lowercase();
    match key.as_str() {
        // Cost rollups reported in cents.
        "total_usage" | "total_usage_cents" | "total_cost_cents" => {
            walk.cost.absorb_total(cents_to_unit(number));
        },
        // Cost rollups reported in dollars.
        "total_cost" => walk.cost.absorb_total(usd_to_cents(number)),
        // Per-item cost.
        "cost_cents" => walk.cost.absorb_part(cents_to_unit(number)),
        "cost" | "cost_usd" | "amount" => walk.cost.absorb_part(usd_to_cents(number)),

        // Token rollups.
        "total_input_tokens" | "total_prompt_tokens" => {
            walk.input.absorb_total(number as i64);
        },
        "total_output_tokens" | "total_completion_tokens" => {
            walk.output.absorb_total(number as i64);
        },
        // Per-item tokens; cache reads count as input.
        "input_tokens" | "prompt_tokens" | "cache_read_input_tokens"
        | "cache_creation_input_tokens" => walk.input.absorb_part(number as i64),
        "output_tokens" | "completion_tokens" => walk.output.absorb_part(number as i64),

        // Request counts.
        "total_requests" => walk.requests.absorb_total(number as i64),
        "requests" | "num_requests" | "request_count" => {
            walk.requests.absorb_part(number as i64);
        },
        _ => {},
    }
}

#[allow(clippy::cast_possible_truncation)]
fn cents_to_unit(cents: f64) -> i64 {
    (cents * 100.0).round() as i64
}

/// Numbers arrive as JSON numbers or numeric strings.
fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_openai_billing_shape() {
        // Legacy dashboard shape: total_usage in cents plus daily parts.
        let body = json!({
            "object": "list",
            "total_usage": 123.45,
            "daily_costs": [
                {"line_items": [{"name": "gpt-4o", "cost": 0.50}]},
                {"line_items": [{"name": "gpt-4o-mini", "cost": 0.25}]}
            ]
        });
        let usage = parse_usage(&body);
        // total (123.45 cents = 12345 units) beats the parts sum (7500).
        assert_eq!(usage.cost_cents, Some(12_345));
        assert!(usage.input_tokens.is_none());
    }

    #[test]
    fn test_anthropic_usage_report_shape() {
        let body = json!({
            "data": [
                {"results": [{"input_tokens": 1000, "output_tokens": 200,
                              "cache_read_input_tokens": 50}]},
                {"results": [{"input_tokens": 500, "output_tokens": 100}]}
            ]
        });
        let usage = parse_usage(&body);
        assert_eq!(usage.input_tokens, Some(1550));
        assert_eq!(usage.output_tokens, Some(300));
        assert!(usage.cost_cents.is_none());
    }

    #[test]
    fn test_cost_report_with_string_amounts() {
        let body = json!({
            "data": [
                {"amount": "1.25", "currency": "USD"},
                {"amount": "0.75", "currency": "USD"}
            ]
        });
        let usage = parse_usage(&body);
        assert_eq!(usage.cost_cents, Some(20_000));
    }

    #[test]
    fn test_request_counts() {
        let body = json!({
            "total_requests": 40,
            "buckets": [{"requests": 25}, {"requests": 10}]
        });
        let usage = parse_usage(&body);
        // Max of total (40) and parts sum (35).
        assert_eq!(usage.requests, Some(40));
    }

    #[test]
    fn test_unknown_shape_is_all_none() {
        let usage = parse_usage(&json!({"hello": "world", "n": 5}));
        assert!(!usage.any_known());
    }

    #[test]
    fn test_total_tokens() {
        let usage = RemoteUsage {
            input_tokens: Some(100),
            output_tokens: None,
            ..Default::default()
        };
        assert_eq!(usage.total_tokens(), Some(100));
        assert_eq!(RemoteUsage::default().total_tokens(), None);
    }

    #[test]
    fn test_grew_since() {
        let before = RemoteUsage {
            cost_cents: Some(10_000),
            ..Default::default()
        };
        let grown = RemoteUsage {
            cost_cents: Some(12_000),
            ..Default::default()
        };
        let flat = before;
        assert!(grown.grew_since(&before));
        assert!(!flat.grew_since(&before));
        // Unknown axes never count as growth.
        assert!(!RemoteUsage::default().grew_since(&before));
    }
}
