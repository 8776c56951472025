//! Embedded request-log and state store.
//!
//! One SQLite database holds the request log, per-provider revocation
//! flags, configured rate limits, and budget rows. The daemon and the CLI
//! open the same file; WAL mode keeps cross-process readers cheap while
//! writes serialize on a single connection behind a lock.

pub mod budget;
pub mod error;
pub mod schema;
pub mod stats;

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

pub use budget::{BudgetRow, GLOBAL_SCOPE, Period};
pub use error::{StoreError, StoreResult};
pub use stats::{GroupBy, StatsRow};
use tokfence_core::{RequestId, RequestRecord};

/// Render a timestamp in the stored form (RFC 3339 UTC, millisecond
/// precision). A single format keeps lexicographic and chronological
/// order identical, which the timestamp indexes rely on.
#[must_use]
pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {raw:?}: {e}")))
}

/// Filter for request-log queries.
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    /// Only this provider.
    pub provider: Option<String>,
    /// Only this model.
    pub model: Option<String>,
    /// Only records at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Maximum rows returned (newest first). `None` means 100.
    pub limit: Option<u32>,
}

/// The embedded store.
pub struct LogStore {
    conn: Mutex<Connection>,
}

impl LogStore {
    /// Open (creating if needed) the store at `path` and run migrations.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the database cannot be opened or
    /// migrated; the daemon treats this as fatal at startup.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        schema::migrate(&conn)?;
        debug!(path = %path.display(), "opened log store");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// An in-memory store for tests.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if migration fails.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    // ---- Request log ----

    /// Insert a completed request record. Records are immutable once
    /// inserted.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on write failure.
    pub fn insert_request(&self, record: &RequestRecord) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO requests (
                id, timestamp, provider, model, endpoint, http_method, status,
                input_tokens, output_tokens, cost_cents, latency_ms, ttft_ms,
                caller_name, caller_pid, is_streaming, error_type, error_message,
                request_hash
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            params![
                record.id.to_string(),
                fmt_ts(record.timestamp),
                record.provider,
                record.model,
                record.endpoint,
                record.http_method,
                record.status_code,
                record.input_tokens,
                record.output_tokens,
                record.cost_cents,
                record.latency_ms,
                record.ttft_ms,
                record.caller_name,
                record.caller_pid,
                record.is_streaming,
                record.error_type,
                record.error_message,
                record.request_hash,
            ],
        )?;
        Ok(())
    }

    /// Point lookup by id.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on query failure or a corrupt row.
    pub fn get_request(&self, id: &str) -> StoreResult<Option<RequestRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, provider, model, endpoint, http_method, status,
                    input_tokens, output_tokens, cost_cents, latency_ms, ttft_ms,
                    caller_name, caller_pid, is_streaming, error_type, error_message,
                    request_hash
             FROM requests WHERE id = ?1",
        )?;
        let row = stmt
            .query_row(params![id], row_to_raw_record)
            .optional()?;
        row.map(raw_to_record).transpose()
    }

    /// Query the log, newest first.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on query failure or a corrupt row.
    pub fn list_requests(&self, filter: &RequestFilter) -> StoreResult<Vec<RequestRecord>> {
        let conn = self.lock()?;
        let mut sql = String::from(
            "SELECT id, timestamp, provider, model, endpoint, http_method, status,
                    input_tokens, output_tokens, cost_cents, latency_ms, ttft_ms,
                    caller_name, caller_pid, is_streaming, error_type, error_message,
                    request_hash
             FROM requests WHERE 1=1",
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
        sql.push_str(" ORDER BY timestamp DESC LIMIT ?");
        args.push(Box::new(i64::from(filter.limit.unwrap_or(100))));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(args.iter().map(AsRef::as_ref)),
            row_to_raw_record,
        )?;
        let mut out = Vec::new();
        for raw in rows {
            out.push(raw_to_record(raw?)?);
        }
        Ok(out)
    }

    /// Delete records older than `days` days. Returns the rows removed.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on write failure.
    pub fn prune_older_than(&self, days: u32) -> StoreResult<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM requests WHERE timestamp < ?1",
            params![fmt_ts(cutoff)],
        )?;
        Ok(removed)
    }

    // ---- Provider state ----

    /// Set or clear a provider's revoked flag.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on write failure.
    pub fn set_provider_revoked(&self, provider: &str, revoked: bool) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO provider_state (provider, revoked) VALUES (?1, ?2)
             ON CONFLICT(provider) DO UPDATE SET revoked = excluded.revoked",
            params![provider, revoked],
        )?;
        Ok(())
    }

    /// Whether a provider is revoked. Unknown providers are not revoked.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on query failure.
    pub fn is_provider_revoked(&self, provider: &str) -> StoreResult<bool> {
        let conn = self.lock()?;
        let revoked: Option<bool> = conn
            .query_row(
                "SELECT revoked FROM provider_state WHERE provider = ?1",
                params![provider],
                |row| row.get(0),
            )
            .optional()?;
        Ok(revoked.unwrap_or(false))
    }

    /// Set the revoked flag for a list of providers in one transaction
    /// (the kill/unkill switch).
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on write failure; no partial updates.
    pub fn set_all_providers_revoked(
        &self,
        providers: &[String],
        revoked: bool,
    ) -> StoreResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for provider in providers {
            tx.execute(
                "INSERT INTO provider_state (provider, revoked) VALUES (?1, ?2)
                 ON CONFLICT(provider) DO UPDATE SET revoked = excluded.revoked",
                params![provider, revoked],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Providers currently revoked.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on query failure.
    pub fn list_revoked(&self) -> StoreResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT provider FROM provider_state WHERE revoked = 1 ORDER BY provider")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ---- Rate limits ----

    /// Set a provider's requests-per-minute cap.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on write failure.
    pub fn set_rate_limit(&self, provider: &str, rpm: u32) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO rate_limits (provider, rpm) VALUES (?1, ?2)
             ON CONFLICT(provider) DO UPDATE SET rpm = excluded.rpm",
            params![provider, rpm],
        )?;
        Ok(())
    }

    /// Remove a provider's rate limit.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on write failure.
    pub fn clear_rate_limit(&self, provider: &str) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM rate_limits WHERE provider = ?1",
            params![provider],
        )?;
        Ok(())
    }

    /// A provider's configured rpm, if any.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on query failure.
    pub fn get_rate_limit(&self, provider: &str) -> StoreResult<Option<u32>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT rpm FROM rate_limits WHERE provider = ?1",
            params![provider],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    /// All configured rate limits.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on query failure.
    pub fn list_rate_limits(&self) -> StoreResult<Vec<(String, u32)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT provider, rpm FROM rate_limits ORDER BY provider")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ---- Budgets ----

    /// Create or overwrite a budget row, resetting its spend.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on write failure.
    pub fn upsert_budget(
        &self,
        scope: &str,
        period: Period,
        limit_cents: i64,
        period_start: DateTime<Utc>,
    ) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO budgets (scope, period, limit_cents, current_spend_cents, period_start)
             VALUES (?1, ?2, ?3, 0, ?4)
             ON CONFLICT(scope, period) DO UPDATE SET
                limit_cents = excluded.limit_cents,
                current_spend_cents = 0,
                period_start = excluded.period_start",
            params![scope, period.as_str(), limit_cents, fmt_ts(period_start)],
        )?;
        Ok(())
    }

    /// Remove every budget row for a scope.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on write failure.
    pub fn clear_budget(&self, scope: &str) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM budgets WHERE scope = ?1", params![scope])?;
        Ok(())
    }

    /// Every budget row.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on query failure or a corrupt row.
    pub fn list_budgets(&self) -> StoreResult<Vec<BudgetRow>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT scope, period, limit_cents, current_spend_cents, period_start
             FROM budgets ORDER BY scope, period",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;
        let mut out = Vec::new();
        for raw in rows {
            let (scope, period, limit_cents, current_spend_cents, period_start) = raw?;
            out.push(BudgetRow {
                scope,
                period: period
                    .parse()
                    .map_err(|e: String| StoreError::Corrupt(e))?,
                limit_cents,
                current_spend_cents,
                period_start: parse_ts(&period_start)?,
            });
        }
        Ok(out)
    }

    /// Reset a row's period: spend to 0, `period_start` to `new_start`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on write failure.
    pub fn reset_budget_period(
        &self,
        scope: &str,
        period: Period,
        new_start: DateTime<Utc>,
    ) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE budgets SET current_spend_cents = 0, period_start = ?3
             WHERE scope = ?1 AND period = ?2",
            params![scope, period.as_str(), fmt_ts(new_start)],
        )?;
        Ok(())
    }

    /// Add spend to a row.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on write failure.
    pub fn add_budget_spend(&self, scope: &str, period: Period, delta: i64) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE budgets SET current_spend_cents = current_spend_cents + ?3
             WHERE scope = ?1 AND period = ?2",
            params![scope, period.as_str(), delta],
        )?;
        Ok(())
    }

    // ---- Aggregates for the snapshot and status views ----

    /// Totals since UTC midnight: (requests, input tokens, output tokens,
    /// cost in hundredths of a cent).
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on query failure.
    pub fn today_totals(&self) -> StoreResult<(u64, u64, u64, i64)> {
        let midnight = Period::Daily.truncate(Utc::now());
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(input_tokens), 0),
                    COALESCE(SUM(output_tokens), 0),
                    COALESCE(SUM(cost_cents), 0)
             FROM requests WHERE timestamp >= ?1",
            params![fmt_ts(midnight)],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?.max(0).unsigned_abs(),
                    row.get::<_, i64>(1)?.max(0).unsigned_abs(),
                    row.get::<_, i64>(2)?.max(0).unsigned_abs(),
                    row.get::<_, i64>(3)?,
                ))
            },
        )
        .map_err(Into::into)
    }

    /// Provider with the highest cost since UTC midnight.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on query failure.
    pub fn top_provider_today(&self) -> StoreResult<Option<(String, i64)>> {
        let midnight = Period::Daily.truncate(Utc::now());
        let conn = self.lock()?;
        conn.query_row(
            "SELECT provider, COALESCE(SUM(cost_cents), 0) AS c
             FROM requests WHERE timestamp >= ?1
             GROUP BY provider ORDER BY c DESC LIMIT 1",
            params![fmt_ts(midnight)],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(Into::into)
    }

    /// Timestamp of the newest record, optionally for one provider.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on query failure or a corrupt timestamp.
    pub fn last_request_at(&self, provider: Option<&str>) -> StoreResult<Option<DateTime<Utc>>> {
        let conn = self.lock()?;
        let raw: Option<String> = match provider {
            Some(p) => conn
                .query_row(
                    "SELECT MAX(timestamp) FROM requests WHERE provider = ?1",
                    params![p],
                    |row| row.get(0),
                )
                .optional()?
                .flatten(),
            None => conn
                .query_row("SELECT MAX(timestamp) FROM requests", [], |row| row.get(0))
                .optional()?
                .flatten(),
        };
        raw.map(|s| parse_ts(&s)).transpose()
    }
}

impl std::fmt::Debug for LogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStore").finish_non_exhaustive()
    }
}

type RawRecord = (
    String,
    String,
    String,
    String,
    String,
    String,
    u16,
    u64,
    u64,
    i64,
    u64,
    u64,
    String,
    u32,
    bool,
    String,
    String,
    String,
);

#[allow(clippy::needless_pass_by_value)]
fn row_to_raw_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
        row.get(12)?,
        row.get(13)?,
        row.get(14)?,
        row.get(15)?,
        row.get(16)?,
        row.get(17)?,
    ))
}

fn raw_to_record(raw: RawRecord) -> StoreResult<RequestRecord> {
    let (
        id,
        timestamp,
        provider,
        model,
        endpoint,
        http_method,
        status_code,
        input_tokens,
        output_tokens,
        cost_cents,
        latency_ms,
        ttft_ms,
        caller_name,
        caller_pid,
        is_streaming,
        error_type,
        error_message,
        request_hash,
    ) = raw;
    Ok(RequestRecord {
        id: RequestId::parse(&id).map_err(|e| StoreError::Corrupt(format!("bad id {id:?}: {e}")))?,
        timestamp: parse_ts(&timestamp)?,
        provider,
        model,
        endpoint,
        http_method,
        status_code,
        input_tokens,
        output_tokens,
        cost_cents,
        latency_ms,
        ttft_ms,
        caller_name,
        caller_pid,
        is_streaming,
        error_type,
        error_message,
        request_hash,
    })
}
