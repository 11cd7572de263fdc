//! Config command implementation.
//!
//! Writes a default configuration file in the requested format.

use std::fs;
use std::path::PathBuf;

use crate::cli::ConfigFormat;
use crate::config::{render_config, Config};

const COMMENT_HEADER: &str = r#"# Herakles PHP-FPM Exporter Configuration
# ========================================
#
# Every key is optional. Precedence: CLI flag > PHP_FPM_* environment > this file > default.
#
# Server
# ------
# bind: "0.0.0.0"                  # Bind IP (0.0.0.0 = all interfaces)
# port: 9253                       # HTTP port
# telemetry_path: "/metrics"       # Path of the Prometheus endpoint
#
# php-fpm scraping
# ----------------
# scrape_uris:                     # One entry per pool
#   - "tcp://127.0.0.1:9000/status"
#   - "unix:///run/php/php-fpm.sock;/status"
# fix_process_count: false         # Publish active/idle counts recomputed from the process list
# scrape_timeout_secs: 3           # Connect + request deadline per pool
#
# Feature Flags
# -------------
# enable_health: true              # Enable /health endpoint
#
# Logging
# -------
# log_level: "info"                # off, error, warn, info, debug, trace
#
# TLS/SSL Configuration
# ---------------------
# enable_tls: false                # Enable HTTPS
# tls_cert_path: null              # Path to TLS certificate (PEM format)
# tls_key_path: null               # Path to TLS private key (PEM format)
"#;

/// Generates configuration files.
pub fn command_config(
    output: Option<PathBuf>,
    format: ConfigFormat,
    commented: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let output = output.unwrap_or_else(|| PathBuf::from("herakles-phpfpm-exporter.yaml"));

    let mut content = render_config(&Config::default(), &format)?;
    // Only YAML and TOML share the `#` comment syntax.
    if commented && !matches!(format, ConfigFormat::Json) {
        content = format!("{COMMENT_HEADER}\n{content}");
    }

    if output.to_string_lossy() == "-" {
        print!("{}", content);
    } else {
        fs::write(&output, content)?;
        println!("✅ Configuration written to: {}", output.display());
    }

    Ok(())
}
