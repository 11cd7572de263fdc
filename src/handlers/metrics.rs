//! Metrics endpoint handler for Prometheus scraping.
//!
//! Every request drives one full scrape cycle: lock the pool manager, update
//! all pools, publish them into the registry, encode, unlock.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use herakles_phpfpm_exporter::phpfpm::ManagerError;
use prometheus::{Encoder, TextEncoder};
use std::time::Instant;
use tracing::{debug, error, instrument, warn};

use crate::state::SharedState;

/// Buffer capacity for metrics encoding.
const BUFFER_CAP: usize = 64 * 1024;

/// Error type for metrics endpoint failures.
#[derive(Debug)]
pub enum MetricsError {
    EncodingFailed,
    CycleAborted,
}

impl IntoResponse for MetricsError {
    fn into_response(self) -> axum::response::Response {
        let message = match self {
            MetricsError::EncodingFailed => "Failed to encode metrics",
            MetricsError::CycleAborted => "Scrape cycle aborted",
        };
        (StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
    }
}

/// Handler for the telemetry endpoint.
#[instrument(skip(state))]
pub async fn metrics_handler(State(state): State<SharedState>) -> Result<String, MetricsError> {
    let start = Instant::now();
    debug!("Processing metrics request");
    state.health_stats.record_http_request();

    // The cycle runs detached so a client hanging up does not discard the
    // outcomes of workers that already finished.
    let cycle_state = state.clone();
    let buffer = tokio::spawn(async move { scrape_cycle(&cycle_state, start).await })
        .await
        .map_err(|e| {
            error!("Scrape cycle task failed: {}", e);
            MetricsError::CycleAborted
        })??;

    let request_duration_ms = start.elapsed().as_secs_f64() * 1000.0;
    state.health_stats.record_metrics_endpoint_call();
    state
        .health_stats
        .record_request_duration(request_duration_ms);
    state
        .health_stats
        .record_metrics_response_size_kb(buffer.len() as f64 / 1024.0);

    debug!(
        "Metrics request completed: {} bytes, {:.3}ms",
        buffer.len(),
        request_duration_ms
    );

    String::from_utf8(buffer).map_err(|_| MetricsError::EncodingFailed)
}

async fn scrape_cycle(state: &SharedState, start: Instant) -> Result<Vec<u8>, MetricsError> {
    let mut manager = state.manager.lock().await;
    state
        .health_stats
        .record_lock_wait_duration_ms(start.elapsed().as_secs_f64() * 1000.0);

    let cycle_start = Instant::now();
    match manager.update().await {
        Ok(()) => {}
        Err(e @ ManagerError::WorkerPanicked { count }) => {
            warn!("Scrape cycle degraded: {}", e);
            state.health_stats.record_worker_panics(count as u64);
        }
    }
    let cycle_seconds = cycle_start.elapsed().as_secs_f64();

    let summary = state
        .metrics
        .publish(manager.pools(), state.count_mode, state.logger.as_ref());
    state
        .health_stats
        .record_cycle(cycle_seconds, summary.pools_up, manager.len() as u64);
    state.health_stats.record_inconsistent_counts(summary.inconsistent);
    state.scrape_duration.set(start.elapsed().as_secs_f64());

    let families = state.registry.gather();
    let mut buffer = Vec::with_capacity(BUFFER_CAP);
    if TextEncoder::new().encode(&families, &mut buffer).is_err() {
        error!("Failed to encode Prometheus metrics");
        return Err(MetricsError::EncodingFailed);
    }
    Ok(buffer)
}
