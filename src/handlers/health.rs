//! Health check endpoint handler.
//!
//! `/health` answers 200 while at least one pool was up in the last cycle
//! (or no cycle ran yet) and 503 once every pool is failing.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use std::fmt::Write as FmtWrite;
use tracing::{debug, instrument};

use crate::state::SharedState;

/// Footer text for human-readable HTTP endpoints.
pub const FOOTER_TEXT: &str =
    "More info: https://www.herakles.now — Support: exporter@herakles.now";

/// Formats an uptime in seconds as `1h 2m 3s`.
pub fn format_uptime(secs: u64) -> String {
    format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Handler for the /health endpoint.
#[instrument(skip(state))]
pub async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /health request");
    state.health_stats.record_http_request();

    let mut pools = String::new();
    writeln!(pools, "POOLS").ok();
    writeln!(pools, "=====").ok();
    writeln!(pools).ok();
    writeln!(
        pools,
        "{:40} | {:20} | {:>4} | {:>8} | last error",
        "scrape_uri", "pool", "up", "failures"
    )
    .ok();
    writeln!(pools, "{}", "-".repeat(96)).ok();

    let (up, total) = {
        let manager = state.manager.lock().await;
        for pool in manager.pools() {
            writeln!(
                pools,
                "{:40} | {:20} | {:>4} | {:>8} | {}",
                pool.address(),
                pool.name(),
                if pool.is_up() { "yes" } else { "no" },
                pool.failure_count(),
                pool.last_error()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "-".to_string())
            )
            .ok();
        }
        (
            manager.pools().iter().filter(|p| p.is_up()).count(),
            manager.len(),
        )
    };

    let never_scraped = state
        .health_stats
        .total_cycles
        .load(std::sync::atomic::Ordering::Relaxed)
        == 0;
    let (status, message) = if never_scraped {
        (StatusCode::OK, "OK - no scrape cycle yet".to_string())
    } else if up > 0 {
        (StatusCode::OK, format!("OK - {up}/{total} pools up"))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("All {total} pools down"),
        )
    };

    let uptime = format_uptime(state.start_time.elapsed().as_secs());
    let table = state.health_stats.render_table();

    debug!("Health check: {} - {}", status, message);
    (
        status,
        [("Content-Type", "text/plain; charset=utf-8")],
        format!("{message}\n\nUptime: {uptime}\n\n{table}\n{pools}\n{FOOTER_TEXT}"),
    )
}

#[cfg(test)]
mod tests {
    use super::format_uptime;

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(0), "0h 0m 0s");
        assert_eq!(format_uptime(3723), "1h 2m 3s");
    }
}
