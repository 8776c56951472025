//! Grouped usage statistics.

use rusqlite::params_from_iter;
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::{LogStore, RequestFilter, fmt_ts};

/// Grouping axis for [`LogStore::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    /// One row per provider.
    Provider,
    /// One row per model.
    Model,
    /// One row per UTC hour, keyed `YYYY-MM-DD HH:00`.
    Hour,
}

impl std::str::FromStr for GroupBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "provider" => Ok(Self::Provider),
            "model" => Ok(Self::Model),
            "hour" => Ok(Self::Hour),
            other => Err(format!("unknown grouping {other:?} (provider, model, hour)")),
        }
    }
}

/// One aggregate row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsRow {
    /// Group key (provider name, model name, or hour bucket).
    pub key: String,
    /// Number of requests in the group.
    pub request_count: u64,
    /// Total input tokens.
    pub input_tokens: u64,
    /// Total output tokens.
    pub output_tokens: u64,
    /// Total estimated cost, hundredths of a cent.
    pub cost_cents: i64,
}

impl LogStore {
    /// Aggregate the request log.
    ///
    /// Groups are ordered by cost descending for provider/model, and by
    /// key ascending for hourly buckets.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::StoreError`] on query failure.
    pub fn stats(&self, filter: &RequestFilter, group_by: GroupBy) -> StoreResult<Vec<StatsRow>> {
        let key_expr = match group_by {
            GroupBy::Provider => "provider",
            GroupBy::Model => "model",
            GroupBy::Hour => "strftime('%Y-%m-%d %H:00', timestamp)",
        };
        let order = match group_by {
            GroupBy::Hour => "key ASC",
            GroupBy::Provider | GroupBy::Model => "cost_cents DESC, key ASC",
        };

        let mut sql = format!(
            "SELECT {key_expr} AS key,
                    COUNT(*) AS request_count,
                    COALESCE(SUM(input_tokens), 0) AS input_tokens,
                    COALESCE(SUM(output_tokens), 0) AS output_tokens,
                    COALESCE(SUM(cost_cents), 0) AS cost_cents
             FROM requests WHERE 1=1"
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(provider) = &filter.provider {
            sql.push_str(" AND provider = ?");
            args.push(Box::new(provider.clone()));
        }
        if let Some(model) = &filter.model {
            sql.push_str(" AND model = ?");
            args.push(Box::new(model.clone()));
        }
        if let Some(since) = filter.since {
            sql.push_str(" AND timestamp >= ?");
            args.push(Box::new(fmt_ts(since)));
        }
        sql.push_str(&format!(" GROUP BY key ORDER BY {order}"));

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter().map(AsRef::as_ref)), |row| {
            Ok(StatsRow {
                key: row.get(0)?,
                request_count: row.get::<_, i64>(1)?.max(0).unsigned_abs(),
                input_tokens: row.get::<_, i64>(2)?.max(0).unsigned_abs(),
                output_tokens: row.get::<_, i64>(3)?.max(0).unsigned_abs(),
                cost_cents: row.get(4)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tokfence_core::RequestRecord;

    fn sample(provider: &str, model: &str, cost: i64) -> RequestRecord {
        let mut record = RequestRecord::new(provider, "POST", "POST /v1/chat/completions");
        record.model = model.to_owned();
        record.input_tokens = 10;
        record.output_tokens = 5;
        record.cost_cents = cost;
        record
    }

    #[test]
    fn test_group_by_provider() {
        let store = LogStore::open_in_memory().unwrap();
        store.insert_request(&sample("openai", "gpt-4o-mini", 5)).unwrap();
        store.insert_request(&sample("openai", "gpt-4o", 10)).unwrap();
        store.insert_request(&sample("anthropic", "claude-sonnet-4-20250514", 30)).unwrap();

        let rows = store
            .stats(&RequestFilter::default(), GroupBy::Provider)
            .unwrap();
        assert_eq!(rows.len(), 2);
        // Ordered by cost, anthropic first.
        assert_eq!(rows[0].key, "anthropic");
        assert_eq!(rows[0].cost_cents, 30);
        assert_eq!(rows[1].key, "openai");
        assert_eq!(rows[1].request_count, 2);
        assert_eq!(rows[1].input_tokens, 20);
    }

    #[test]
    fn test_group_by_model_with_filter() {
        let store = LogStore::open_in_memory().unwrap();
        store.insert_request(&sample("openai", "gpt-4o-mini", 5)).unwrap();
        store.insert_request(&sample("anthropic", "claude-sonnet-4-20250514", 30)).unwrap();

        let rows = store
            .stats(
                &RequestFilter {
                    provider: Some("openai".to_owned()),
                    ..Default::default()
                },
                GroupBy::Model,
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key, "gpt-4o-mini");
    }

    #[test]
    fn test_group_by_hour_key_format() {
        let store = LogStore::open_in_memory().unwrap();
        let mut record = sample("openai", "gpt-4o-mini", 1);
        record.timestamp = Utc::now();
        store.insert_request(&record).unwrap();

        let rows = store.stats(&RequestFilter::default(), GroupBy::Hour).unwrap();
        assert_eq!(rows.len(), 1);
        let expected = record.timestamp.format("%Y-%m-%d %H:00").to_string();
        assert_eq!(rows[0].key, expected);
    }

    #[test]
    fn test_parse_group_by() {
        assert_eq!("provider".parse::<GroupBy>().unwrap(), GroupBy::Provider);
        assert_eq!("HOUR".parse::<GroupBy>().unwrap(), GroupBy::Hour);
        assert!("week".parse::<GroupBy>().is_err());
    }
}
