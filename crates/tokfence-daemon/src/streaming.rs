//! Streaming response forwarding.
//!
//! Chunks are forwarded as they arrive, never buffered whole, while a
//! side task scans for the canary, parses SSE frames for usage fields,
//! and records time-to-first-chunk. When the stream ends (cleanly or
//! not) the request record is inserted and the budget commit lands with
//! the measured cost.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use futures::StreamExt;
use tokfence_core::{RequestRecord, RiskEvent};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, warn};

use crate::context::DaemonContext;
use crate::pipeline::{elapsed_ms, finalize_record, insert_record};
use crate::usage_extract::{RequestInfo, SseUsageParser};

/// Channel depth between the upstream reader and the client writer. One
/// chunk in flight keeps the flush-per-event behavior of the upstream.
const CHANNEL_DEPTH: usize = 16;

/// Forward a streaming upstream response.
///
/// Returns immediately with a chunked response body; metering completes
/// in a background task when the stream drains.
#[allow(clippy::too_many_arguments)]
pub fn forward_streaming(
    ctx: Arc<DaemonContext>,
    upstream: reqwest::Response,
    status: StatusCode,
    response_headers: HeaderMap,
    mut record: RequestRecord,
    handle: tokfence_engine::ChargeHandle,
    session: String,
    started: Instant,
) -> Response {
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<bytes::Bytes, std::io::Error>>(
        CHANNEL_DEPTH,
    );

    let request_id = record.id;

    tokio::spawn(async move {
        let mut stream = upstream.bytes_stream();
        let mut parser = SseUsageParser::new();
        let mut canary = ctx.immune.canary().stream_scanner();
        let mut ttft_ms: u64 = 0;
        let mut client_gone = false;

        while let Some(next) = stream.next().await {
            match next {
                Ok(chunk) => {
                    if ttft_ms == 0 && !chunk.is_empty() {
                        ttft_ms = elapsed_ms(started).max(1);
                    }
                    let text = String::from_utf8_lossy(&chunk);
                    parser.feed(&text);
                    if canary.feed(&text) {
                        // The client still gets the bytes (the exchange
                        // already succeeded); the session turns RED so
                        // nothing further is admitted.
                        warn!(session = %session, "canary observed in streamed response");
                    }
                    if !client_gone && tx.send(Ok(chunk)).await.is_err() {
                        client_gone = true;
                        record.error_type = "client_cancelled".to_owned();
                        record.error_message = "client disconnected mid-stream".to_owned();
                        // Keep draining briefly to collect trailing usage
                        // frames, but stop forwarding.
                    }
                },
                Err(e) => {
                    let message = e.without_url().to_string();
                    if record.error_type.is_empty() {
                        record.error_type = "transport_error".to_owned();
                        record.error_message = message.clone();
                    }
                    let _ = tx.send(Err(std::io::Error::other(message))).await;
                    break;
                },
            }
        }
        drop(tx);

        if canary.seen() {
            ctx.immune.risk.escalate(&session, RiskEvent::CanaryLeak);
        }

        let request_info = RequestInfo {
            model: record.model.clone(),
            stream: true,
        };
        finalize_record(&mut record, &parser.totals, &request_info, started, ttft_ms);
        record.cost_cents = ctx.pricing.estimate(
            &record.provider,
            &record.model,
            record.input_tokens,
            record.output_tokens,
        );
        debug!(
            id = %record.id,
            done = parser.done,
            input = record.input_tokens,
            output = record.output_tokens,
            "stream finished"
        );

        insert_record(&ctx, &record);
        if let Err(e) = ctx.budget.commit(handle, record.cost_cents) {
            error!(error = %e, "budget commit failed after stream");
        }
    });

    let body = Body::from_stream(ReceiverStream::new(rx));
    let mut builder = Response::builder().status(status);
    if let Some(headers_mut) = builder.headers_mut() {
        *headers_mut = response_headers;
        if let Ok(value) = axum::http::HeaderValue::from_str(&request_id.to_string()) {
            headers_mut.insert(crate::pipeline::REQUEST_ID_HEADER, value);
        }
    }
    builder
        .body(body)
        .unwrap_or_else(|_| Response::new(Body::empty()))
}
