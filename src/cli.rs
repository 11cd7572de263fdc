//! CLI arguments and subcommands for herakles-phpfpm-exporter.
//!
//! Flag names mirror the php-fpm exporter conventions (`--phpfpm.scrape-uri`,
//! `--web.listen-address`, ...) and each of them can also be set through a
//! `PHP_FPM_*` environment variable.

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

/// Log level options for CLI parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Configuration format options for output
#[derive(Debug, Clone, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Output format of the `get` subcommand
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "herakles-phpfpm-exporter",
    about = "Prometheus exporter for php-fpm pool status",
    long_about = "Prometheus exporter for php-fpm pool status.\n\n\
                  Scrapes the php-fpm status page of one or more pools over FastCGI \
                  (tcp or unix socket), repairs malformed payloads, reconciles worker \
                  counts and publishes everything as Prometheus metrics.",
    author = "Michael Moll <exporter@herakles.now> - Herakles",
    version,
    propagate_version = true,
    after_help = "More info: https://www.herakles.now — Support: exporter@herakles.now"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// HTTP listen port
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Bind to specific interface/IP
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Address to listen on for web interface and telemetry, e.g. ":9253"
    #[arg(long = "web.listen-address", env = "PHP_FPM_WEB_LISTEN_ADDRESS")]
    pub web_listen_address: Option<String>,

    /// Path under which to expose metrics
    #[arg(long = "web.telemetry-path", env = "PHP_FPM_WEB_TELEMETRY_PATH")]
    pub web_telemetry_path: Option<String>,

    /// FastCGI address(es) of php-fpm status pages, comma separated
    /// (tcp://host:port/status or unix:///path/to/sock;/status)
    #[arg(
        long = "phpfpm.scrape-uri",
        env = "PHP_FPM_SCRAPE_URI",
        value_delimiter = ',',
        global = true
    )]
    pub scrape_uris: Vec<String>,

    /// Publish active/idle/total counts recomputed from the process list
    #[arg(long = "phpfpm.fix-process-count", env = "PHP_FPM_FIX_PROCESS_COUNT", global = true)]
    pub fix_process_count: bool,

    /// Per-pool scrape timeout in seconds
    #[arg(long = "phpfpm.timeout", global = true)]
    pub scrape_timeout_secs: Option<u64>,

    /// Log level
    #[arg(
        long = "log-level",
        alias = "log.level",
        value_enum,
        env = "PHP_FPM_LOG_LEVEL"
    )]
    pub log_level: Option<LogLevel>,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Disable all config file loading
    #[arg(long, global = true)]
    pub no_config: bool,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,

    /// Disable /health endpoint
    #[arg(long)]
    pub disable_health: bool,

    /// Enable TLS/SSL for HTTPS
    #[arg(long)]
    pub enable_tls: bool,

    /// Path to TLS certificate file (PEM format)
    #[arg(long)]
    pub tls_cert: Option<PathBuf>,

    /// Path to TLS private key file (PEM format)
    #[arg(long)]
    pub tls_key: Option<PathBuf>,
}

/// Subcommands for additional functionality
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scrape the configured pools once and print the result
    Get {
        /// Output format
        #[arg(long = "output", value_enum, default_value = "text")]
        out: OutputFormat,
    },

    /// Generate configuration files
    Config {
        /// Output file path
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "yaml")]
        format: ConfigFormat,

        /// Include comments and examples
        #[arg(long)]
        commented: bool,
    },
}
