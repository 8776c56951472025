//! `log`: request-log viewing and following.

use std::path::Path;
use std::time::Duration;

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use clap::Args;
use serde_json::json;
use tokfence_core::RequestRecord;
use tokfence_core::money::format_usd;
use tokfence_store::RequestFilter;

use crate::output::{OutputMode, emit};

/// Arguments for `tokfence log`.
#[derive(Args)]
pub struct LogArgs {
    /// Show one request by id
    pub request_id: Option<String>,

    /// Only this provider
    #[arg(long)]
    pub provider: Option<String>,

    /// Only this model
    #[arg(long)]
    pub model: Option<String>,

    /// Only records at or after this RFC 3339 instant
    #[arg(long)]
    pub since: Option<String>,

    /// Maximum rows (newest first)
    #[arg(long, default_value_t = 50)]
    pub limit: u32,

    /// Keep polling for new records
    #[arg(long)]
    pub follow: bool,
}

/// Run `tokfence log`.
pub async fn run(config_path: Option<&Path>, args: &LogArgs, mode: OutputMode) -> Result<()> {
    let config = super::load_config(config_path)?;
    let store = super::open_store(&config)?;

    if let Some(id) = &args.request_id {
        let Some(record) = store.get_request(id)? else {
            bail!("no request record with id {id}");
        };
        emit(mode, &record, print_record);
        return Ok(());
    }

    let since = args
        .since
        .as_deref()
        .map(parse_since)
        .transpose()?;
    let filter = RequestFilter {
        provider: args.provider.clone(),
        model: args.model.clone(),
        since,
        limit: Some(args.limit),
    };

    let records = store.list_requests(&filter)?;
    emit(mode, &json!({"requests": &records}), |_| {
        for record in &records {
            print_record(record);
        }
        if records.is_empty() {
            println!("no matching requests");
        }
    });

    if !args.follow {
        return Ok(());
    }

    // Poll-based tail: newest-seen timestamp advances the filter.
    let mut newest = records.first().map(|r| r.timestamp);
    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let filter = RequestFilter {
            provider: args.provider.clone(),
            model: args.model.clone(),
            since: newest.map(|t| t + chrono::Duration::milliseconds(1)),
            limit: Some(args.limit),
        };
        let fresh = store.list_requests(&filter)?;
        for record in fresh.iter().rev() {
            match mode {
                OutputMode::Json => {
                    if let Ok(line) = serde_json::to_string(record) {
                        println!("{line}");
                    }
                },
                OutputMode::Pretty => print_record(record),
            }
        }
        if let Some(first) = fresh.first() {
            newest = Some(first.timestamp);
        }
    }
}

fn parse_since(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    // Also accept simple relative forms like "2h" or "30m".
    if let Some(hours) = raw.strip_suffix('h').and_then(|n| n.parse::<i64>().ok()) {
        return Ok(Utc::now() - chrono::Duration::hours(hours));
    }
    if let Some(minutes) = raw.strip_suffix('m').and_then(|n| n.parse::<i64>().ok()) {
        return Ok(Utc::now() - chrono::Duration::minutes(minutes));
    }
    if let Some(days) = raw.strip_suffix('d').and_then(|n| n.parse::<i64>().ok()) {
        return Ok(Utc::now() - chrono::Duration::days(days));
    }
    bail!("cannot parse --since {raw:?}; use RFC 3339 or 30m/2h/1d")
}

fn print_record(record: &RequestRecord) {
    let status = if record.status_code == 0 {
        "---".to_owned()
    } else {
        record.status_code.to_string()
    };
    let stream_marker = if record.is_streaming { " stream" } else { "" };
    let error_suffix = if record.error_type.is_empty() {
        String::new()
    } else {
        format!(" [{}]", record.error_type)
    };
    println!(
        "{} {} {} {} {} {}in/{}out {} {}ms{}{}",
        record.timestamp.format("%Y-%m-%d %H:%M:%S"),
        record.id,
        record.provider,
        record.endpoint,
        status,
        record.input_tokens,
        record.output_tokens,
        format_usd(record.cost_cents),
        record.latency_ms,
        stream_marker,
        error_suffix,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_since_forms() {
        assert!(parse_since("2026-08-01T00:00:00Z").is_ok());
        assert!(parse_since("30m").is_ok());
        assert!(parse_since("2h").is_ok());
        assert!(parse_since("1d").is_ok());
        assert!(parse_since("soon").is_err());
    }
}
