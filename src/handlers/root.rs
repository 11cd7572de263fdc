//! Landing page handler.

use axum::{
    extract::State,
    response::{Html, IntoResponse},
};
use std::fmt::Write as FmtWrite;
use tracing::{debug, instrument};

use crate::handlers::health::{format_uptime, FOOTER_TEXT};
use crate::state::SharedState;

/// Handler for the root `/` endpoint.
#[instrument(skip(state))]
pub async fn root_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing / request");
    state.health_stats.record_http_request();

    let telemetry_path = state.config.telemetry_path();

    let mut endpoints = String::new();
    let mut endpoint = |href: &str, desc: &str| {
        writeln!(
            endpoints,
            "        <li><a href=\"{href}\">{href}</a><div class=\"endpoint-desc\">{desc}</div></li>"
        )
        .ok();
    };
    endpoint(telemetry_path, "Prometheus metrics, scraped live from every configured pool");
    if state.config.enable_health.unwrap_or(true) {
        endpoint("/health", "Exporter internal scrape statistics (text)");
    }
    endpoint("/config", "Active runtime configuration (read-only)");

    let mut pools = String::new();
    for uri in state.config.scrape_uris() {
        writeln!(pools, "        <li><code>{}</code></li>", html_escape(uri)).ok();
    }

    let html = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>Herakles PHP-FPM Exporter</title>
    <style>
        body {{ font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; margin: 0; padding: 20px; background: #f5f5f5; }}
        .container {{ max-width: 900px; margin: 0 auto; background: white; padding: 40px; border-radius: 8px; }}
        h1 {{ color: #333; border-bottom: 3px solid #007bff; padding-bottom: 15px; }}
        .endpoint-list li {{ margin: 12px 0; }}
        .endpoint-desc {{ color: #666; }}
        .footer {{ margin-top: 40px; color: #666; font-size: 0.9em; text-align: center; }}
    </style>
</head>
<body>
<div class="container">
    <h1>Herakles PHP-FPM Exporter</h1>
    <p>Version {version} &middot; Uptime {uptime}</p>

    <h2>Endpoints</h2>
    <ul class="endpoint-list">
{endpoints}    </ul>

    <h2>Scraped pools</h2>
    <ul>
{pools}    </ul>

    <div class="footer"><p>{footer}</p></div>
</div>
</body>
</html>"#,
        version = env!("CARGO_PKG_VERSION"),
        uptime = format_uptime(state.start_time.elapsed().as_secs()),
        endpoints = endpoints,
        pools = pools,
        footer = FOOTER_TEXT
    );

    Html(html)
}

fn html_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
