//! Schema and migrations.
//!
//! Migrations run at open, guarded by `user_version`. Each step is
//! idempotent (`IF NOT EXISTS`) so an interrupted migration recovers on
//! the next open.

use rusqlite::Connection;

use crate::error::StoreResult;

/// Current schema version.
const SCHEMA_VERSION: i64 = 1;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS requests (
    id            TEXT PRIMARY KEY,
    timestamp     TEXT NOT NULL,
    provider      TEXT NOT NULL,
    model         TEXT NOT NULL DEFAULT '',
    endpoint      TEXT NOT NULL DEFAULT '',
    http_method   TEXT NOT NULL DEFAULT '',
    status        INTEGER NOT NULL DEFAULT 0,
    input_tokens  INTEGER NOT NULL DEFAULT 0,
    output_tokens INTEGER NOT NULL DEFAULT 0,
    cost_cents    INTEGER NOT NULL DEFAULT 0,
    latency_ms    INTEGER NOT NULL DEFAULT 0,
    ttft_ms       INTEGER NOT NULL DEFAULT 0,
    caller_name   TEXT NOT NULL DEFAULT '',
    caller_pid    INTEGER NOT NULL DEFAULT 0,
    is_streaming  INTEGER NOT NULL DEFAULT 0,
    error_type    TEXT NOT NULL DEFAULT '',
    error_message TEXT NOT NULL DEFAULT '',
    request_hash  TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_requests_timestamp
    ON requests(timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_requests_provider_timestamp
    ON requests(provider, timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_requests_model_timestamp
    ON requests(model, timestamp DESC);

CREATE TABLE IF NOT EXISTS provider_state (
    provider TEXT PRIMARY KEY,
    revoked  INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS rate_limits (
    provider TEXT PRIMARY KEY,
    rpm      INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS budgets (
    scope               TEXT NOT NULL,
    period              TEXT NOT NULL,
    limit_cents         INTEGER NOT NULL,
    current_spend_cents INTEGER NOT NULL DEFAULT 0,
    period_start        TEXT NOT NULL,
    PRIMARY KEY (scope, period)
);
";

/// Apply pending migrations.
///
/// # Errors
///
/// Returns the underlying SQLite error; the daemon treats a migration
/// failure at startup as fatal.
pub fn migrate(conn: &Connection) -> StoreResult<()> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version < 1 {
        conn.execute_batch(SCHEMA_V1)?;
    }
    if version < SCHEMA_VERSION {
        conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION}"))?;
    }
    Ok(())
}
