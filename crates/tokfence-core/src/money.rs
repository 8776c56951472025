//! Monetary amounts.
//!
//! Every monetary value in Tokfence is an integer count of hundredths of a
//! cent (1/10000 of a dollar). Integer arithmetic keeps budget math free of
//! floating-point drift; conversion to and from USD happens only at the
//! edges (CLI input, human-readable output).

/// Hundredths of a cent per US dollar.
pub const CENTS_PER_USD: i64 = 10_000;

/// Convert a USD amount to hundredths of a cent, rounded to nearest.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn usd_to_cents(usd: f64) -> i64 {
    #[allow(clippy::cast_precision_loss)]
    let scaled = usd * CENTS_PER_USD as f64;
    scaled.round() as i64
}

/// Convert hundredths of a cent back to USD.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn cents_to_usd(cents: i64) -> f64 {
    cents as f64 / CENTS_PER_USD as f64
}

/// Format an amount as a dollar string, e.g. `$1.2345`.
#[must_use]
pub fn format_usd(cents: i64) -> String {
    format!("${:.4}", cents_to_usd(cents))
}

/// Estimated cost of a request given per-million-token prices.
///
/// `input_price` and `output_price` are in hundredths of a cent per one
/// million tokens. The result is rounded to the nearest hundredth of a
/// cent. Unknown models carry zero prices and therefore cost zero.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn estimate_cost(
    input_tokens: u64,
    output_tokens: u64,
    input_price: i64,
    output_price: i64,
) -> i64 {
    let input = input_tokens as f64 * input_price as f64 / 1_000_000.0;
    let output = output_tokens as f64 * output_price as f64 / 1_000_000.0;
    (input + output).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usd_round_trip() {
        assert_eq!(usd_to_cents(0.10), 1000);
        assert_eq!(usd_to_cents(5.0), 50_000);
        assert_eq!(usd_to_cents(0.0), 0);
        assert!((cents_to_usd(1000) - 0.10).abs() < f64::EPSILON);
    }

    #[test]
    fn test_usd_rounding() {
        // 0.00004999 dollars is below half a unit.
        assert_eq!(usd_to_cents(0.000_049), 0);
        assert_eq!(usd_to_cents(0.000_051), 1);
    }

    #[test]
    fn test_estimate_cost() {
        // 1M input tokens at 1500 units per million.
        assert_eq!(estimate_cost(1_000_000, 0, 1500, 6000), 1500);
        // Half a million of each.
        assert_eq!(estimate_cost(500_000, 500_000, 1500, 6000), 3750);
        // Tiny request rounds to nearest.
        assert_eq!(estimate_cost(100, 0, 1500, 6000), 0);
        assert_eq!(estimate_cost(1000, 0, 1500, 6000), 2);
    }

    #[test]
    fn test_unknown_model_is_free() {
        assert_eq!(estimate_cost(10_000, 10_000, 0, 0), 0);
    }

    #[test]
    fn test_format() {
        assert_eq!(format_usd(1000), "$0.1000");
        assert_eq!(format_usd(0), "$0.0000");
    }
}
