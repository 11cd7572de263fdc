//! Get command implementation.
//!
//! Scrapes every configured pool once and prints the result, without
//! starting the HTTP server.

use herakles_phpfpm_exporter::logging::TracingLogger;
use herakles_phpfpm_exporter::phpfpm::{reconcile, CountMode, Pool, PoolManager, PoolStatus};
use herakles_phpfpm_exporter::NullLogger;
use serde::Serialize;
use std::fmt::Write as FmtWrite;
use tracing::warn;

use crate::cli::OutputFormat;
use crate::config::Config;

/// JSON view of one pool.
#[derive(Serialize)]
struct PoolView<'a> {
    address: &'a str,
    up: bool,
    failures: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(flatten)]
    status: &'a PoolStatus,
}

impl<'a> From<&'a Pool> for PoolView<'a> {
    fn from(pool: &'a Pool) -> Self {
        Self {
            address: pool.address(),
            up: pool.is_up(),
            failures: pool.failure_count(),
            error: pool.last_error().map(|e| e.to_string()),
            status: pool.status(),
        }
    }
}

/// Scrapes the configured pools once and prints them.
pub async fn command_get(config: &Config, out: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let mut manager = PoolManager::new(config.scrape_settings(), TracingLogger::shared());
    for uri in config.scrape_uris() {
        manager.add(uri.clone());
    }

    if let Err(e) = manager.update().await {
        warn!("Scrape cycle degraded: {}", e);
    }

    let rendered = match out {
        OutputFormat::Json => {
            let views: Vec<PoolView<'_>> = manager.pools().iter().map(PoolView::from).collect();
            serde_json::to_string_pretty(&views)?
        }
        OutputFormat::Text => render_text(manager.pools(), config.count_mode()),
    };
    println!("{}", rendered);
    Ok(())
}

fn render_text(pools: &[Pool], mode: CountMode) -> String {
    let mut out = String::new();

    for pool in pools {
        writeln!(out, "{}", pool.address()).ok();
        writeln!(out, "{}", "=".repeat(pool.address().len())).ok();

        if let Some(err) = pool.last_error() {
            writeln!(out, "{:24} {}", "error:", err).ok();
            writeln!(out, "{:24} {}", "failures:", pool.failure_count()).ok();
            writeln!(out).ok();
            continue;
        }

        let status = pool.status();
        // Anomalies were already logged during the scrape.
        let counts = reconcile(status, mode, &NullLogger);

        let rows: [(&str, String); 13] = [
            ("pool:", status.name.clone()),
            ("process manager:", status.process_manager.clone()),
            ("start time:", status.start_time.to_rfc3339()),
            ("start since:", status.start_since.to_string()),
            ("accepted conn:", status.accepted_connections.to_string()),
            ("listen queue:", status.listen_queue.to_string()),
            ("max listen queue:", status.max_listen_queue.to_string()),
            ("listen queue len:", status.listen_queue_length.to_string()),
            ("idle processes:", counts.published.idle.to_string()),
            ("active processes:", counts.published.active.to_string()),
            ("total processes:", counts.published.total.to_string()),
            ("max children reached:", status.max_children_reached.to_string()),
            ("slow requests:", status.slow_requests.to_string()),
        ];
        for (label, value) in rows {
            writeln!(out, "{:24} {}", label, value).ok();
        }
        if !counts.consistent {
            writeln!(
                out,
                "{:24} reported active={} idle={}, computed active={} idle={}",
                "inconsistent counts:",
                counts.reported.active,
                counts.reported.idle,
                counts.computed.active,
                counts.computed.idle
            )
            .ok();
        }

        if !status.processes.is_empty() {
            writeln!(out).ok();
            writeln!(
                out,
                "{:>8} | {:28} | {:>8} | {:>12} | {:6} | request uri",
                "pid", "state", "requests", "duration us", "method"
            )
            .ok();
            for process in &status.processes {
                writeln!(
                    out,
                    "{:>8} | {:28} | {:>8} | {:>12} | {:6} | {}",
                    process.pid,
                    process.state.as_str(),
                    process.requests,
                    process.request_duration,
                    process.request_method,
                    process.request_uri
                )
                .ok();
            }
        }
        writeln!(out).ok();
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use herakles_phpfpm_exporter::phpfpm::ScrapeSettings;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_text_output_shows_errors_per_pool() {
        let mut manager = PoolManager::new(ScrapeSettings::default(), Arc::new(NullLogger));
        manager.add("ftp://example/status");
        manager.update().await.unwrap();

        let text = render_text(manager.pools(), CountMode::TrustUpstream);
        assert!(text.starts_with("ftp://example/status\n"));
        assert!(text.contains("unsupported scheme 'ftp'"));
        assert!(text.contains("failures:"));
    }

    #[tokio::test]
    async fn test_json_view_carries_address_and_error() {
        let mut manager = PoolManager::new(ScrapeSettings::default(), Arc::new(NullLogger));
        manager.add("ftp://example/status");
        manager.update().await.unwrap();

        let view = PoolView::from(&manager.pools()[0]);
        let value = serde_json::to_value(&view).unwrap();
        assert_eq!(value["address"], "ftp://example/status");
        assert_eq!(value["up"], false);
        assert_eq!(value["failures"], 1);
        assert_eq!(value["accepted conn"], 0);
    }
}
