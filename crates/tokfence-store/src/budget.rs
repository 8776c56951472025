//! Budget rows and period arithmetic.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Budget evaluation period, aligned to UTC boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    /// Resets at UTC midnight.
    Daily,
    /// Resets on the first of the calendar month, UTC.
    Monthly,
}

impl Period {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Monthly => "monthly",
        }
    }

    /// Start of the period containing `now`.
    #[must_use]
    pub fn truncate(self, now: DateTime<Utc>) -> DateTime<Utc> {
        let date = now.date_naive();
        let start = match self {
            Self::Daily => date,
            Self::Monthly => date.with_day(1).unwrap_or(date),
        };
        Utc.from_utc_datetime(&start.and_hms_opt(0, 0, 0).unwrap_or_default())
    }
}

impl std::str::FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" | "day" => Ok(Self::Daily),
            "monthly" | "month" => Ok(Self::Monthly),
            other => Err(format!("unknown period {other:?} (daily or monthly)")),
        }
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scope name used for the all-providers budget.
pub const GLOBAL_SCOPE: &str = "global";

/// One budget row, keyed by `(scope, period)`.
///
/// `current_spend_cents` only grows within a period and resets to 0 when
/// `period_start` rolls over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetRow {
    /// Provider name, or [`GLOBAL_SCOPE`].
    pub scope: String,
    /// Evaluation period.
    pub period: Period,
    /// Cap in hundredths of a cent.
    pub limit_cents: i64,
    /// Spend recorded so far this period, hundredths of a cent.
    pub current_spend_cents: i64,
    /// Start of the current period (UTC).
    pub period_start: DateTime<Utc>,
}

impl BudgetRow {
    /// Whether the row's period has ended as of `now`.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.period.truncate(now) > self.period_start
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.from_utc_datetime(
            &NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(h, 0, 0)
                .unwrap(),
        )
    }

    #[test]
    fn test_daily_truncate() {
        assert_eq!(Period::Daily.truncate(at(2026, 8, 1, 17)), at(2026, 8, 1, 0));
    }

    #[test]
    fn test_monthly_truncate() {
        assert_eq!(
            Period::Monthly.truncate(at(2026, 8, 15, 3)),
            at(2026, 8, 1, 0)
        );
    }

    #[test]
    fn test_staleness() {
        let row = BudgetRow {
            scope: "openai".to_owned(),
            period: Period::Daily,
            limit_cents: 1000,
            current_spend_cents: 0,
            period_start: at(2026, 7, 31, 0),
        };
        assert!(!row.is_stale(at(2026, 7, 31, 23)));
        assert!(row.is_stale(at(2026, 8, 1, 0)));
    }

    #[test]
    fn test_period_parse() {
        assert_eq!("daily".parse::<Period>().unwrap(), Period::Daily);
        assert_eq!("MONTHLY".parse::<Period>().unwrap(), Period::Monthly);
        assert!("weekly".parse::<Period>().is_err());
    }
}
