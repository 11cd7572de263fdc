//! Configuration management for herakles-phpfpm-exporter.
//!
//! This module handles loading, merging, and validating configuration from files,
//! environment variables and CLI arguments. It supports YAML, JSON, and TOML formats.

use crate::cli::{Args, ConfigFormat, LogLevel};
use herakles_phpfpm_exporter::phpfpm::{CountMode, ScrapeAddress, ScrapeSettings};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

// Default configuration constants
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9253;
pub const DEFAULT_TELEMETRY_PATH: &str = "/metrics";
pub const DEFAULT_SCRAPE_URI: &str = "tcp://127.0.0.1:9000/status";
pub const DEFAULT_SCRAPE_TIMEOUT_SECS: u64 = 3;

/// Routes served next to the telemetry endpoint.
const RESERVED_PATHS: [&str; 2] = ["/health", "/config"];

/// Exporter configuration. Every field is optional so that a partial file
/// only overrides what it names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub port: Option<u16>,
    pub bind: Option<String>,
    #[serde(alias = "telemetry-path")]
    pub telemetry_path: Option<String>,

    // php-fpm scraping
    #[serde(alias = "scrape-uris", alias = "scrape_uri")]
    pub scrape_uris: Option<Vec<String>>,
    #[serde(alias = "fix-process-count")]
    pub fix_process_count: Option<bool>,
    #[serde(alias = "scrape-timeout-secs")]
    pub scrape_timeout_secs: Option<u64>,

    // Feature flags
    #[serde(alias = "enable-health")]
    pub enable_health: Option<bool>,

    // Logging
    #[serde(alias = "log-level")]
    pub log_level: Option<LogLevel>,

    // TLS/SSL Configuration
    #[serde(alias = "enable-tls")]
    pub enable_tls: Option<bool>,
    #[serde(alias = "tls-cert-path")]
    pub tls_cert_path: Option<String>,
    #[serde(alias = "tls-key-path")]
    pub tls_key_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: Some(DEFAULT_BIND_ADDR.to_string()),
            port: Some(DEFAULT_PORT),
            telemetry_path: Some(DEFAULT_TELEMETRY_PATH.to_string()),
            scrape_uris: Some(vec![DEFAULT_SCRAPE_URI.to_string()]),
            fix_process_count: Some(false),
            scrape_timeout_secs: Some(DEFAULT_SCRAPE_TIMEOUT_SECS),
            enable_health: Some(true),
            log_level: Some(LogLevel::Info),
            enable_tls: Some(false),
            tls_cert_path: None,
            tls_key_path: None,
        }
    }
}

impl Config {
    /// Fills every unset field from [`Config::default`].
    fn fill_defaults(mut self) -> Self {
        let d = Config::default();
        self.port = self.port.or(d.port);
        self.bind = self.bind.or(d.bind);
        self.telemetry_path = self.telemetry_path.or(d.telemetry_path);
        self.scrape_uris = self.scrape_uris.or(d.scrape_uris);
        self.fix_process_count = self.fix_process_count.or(d.fix_process_count);
        self.scrape_timeout_secs = self.scrape_timeout_secs.or(d.scrape_timeout_secs);
        self.enable_health = self.enable_health.or(d.enable_health);
        self.log_level = self.log_level.or(d.log_level);
        self.enable_tls = self.enable_tls.or(d.enable_tls);
        self
    }

    pub fn scrape_uris(&self) -> &[String] {
        self.scrape_uris.as_deref().unwrap_or_default()
    }

    pub fn telemetry_path(&self) -> &str {
        self.telemetry_path
            .as_deref()
            .unwrap_or(DEFAULT_TELEMETRY_PATH)
    }

    pub fn scrape_settings(&self) -> ScrapeSettings {
        ScrapeSettings {
            timeout: Duration::from_secs(
                self.scrape_timeout_secs
                    .unwrap_or(DEFAULT_SCRAPE_TIMEOUT_SECS),
            ),
        }
    }

    pub fn count_mode(&self) -> CountMode {
        CountMode::from_fix_flag(self.fix_process_count.unwrap_or(false))
    }
}

/// Validate effective config (used by --check-config and at startup)
pub fn validate_effective_config(cfg: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let uris = cfg.scrape_uris();
    if uris.is_empty() {
        return Err("At least one php-fpm scrape URI must be configured".into());
    }
    for uri in uris {
        ScrapeAddress::parse(uri)?;
    }

    if cfg.scrape_timeout_secs == Some(0) {
        return Err("scrape_timeout_secs must be greater than 0".into());
    }

    let path = cfg.telemetry_path();
    if !path.starts_with('/') || path.len() < 2 {
        return Err(format!(
            "Invalid telemetry_path '{}', expected an absolute path such as /metrics",
            path
        )
        .into());
    }
    if RESERVED_PATHS.contains(&path) {
        return Err(format!(
            "telemetry_path '{}' collides with a built-in endpoint",
            path
        )
        .into());
    }

    if let Some(bind) = cfg.bind.as_deref() {
        bind.parse::<std::net::IpAddr>()
            .map_err(|e| format!("Invalid bind address '{}': {}", bind, e))?;
    }

    // TLS validation
    if cfg.enable_tls.unwrap_or(false) {
        match (cfg.tls_cert_path.as_deref(), cfg.tls_key_path.as_deref()) {
            (None, None) => {
                return Err(
                    "TLS is enabled but neither tls_cert_path nor tls_key_path are set".into(),
                );
            }
            (Some(_), None) => {
                return Err("TLS is enabled but tls_key_path is not set".into());
            }
            (None, Some(_)) => {
                return Err("TLS is enabled but tls_cert_path is not set".into());
            }
            (Some(cert), Some(key)) => {
                check_pem_file(cert, "certificate")?;
                check_pem_file(key, "private key")?;
            }
        }
    }

    Ok(())
}

fn check_pem_file(path: &str, what: &str) -> Result<(), Box<dyn std::error::Error>> {
    match fs::metadata(path) {
        Ok(meta) if meta.len() == 0 => Err(format!("TLS {} file is empty: {}", what, path).into()),
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(format!("TLS {} file not found: {}", what, path).into())
        }
        Err(e) => Err(format!("TLS {} file is not readable: {} ({})", what, path, e).into()),
    }
}

/// Splits a `--web.listen-address` value such as `:9253` or `127.0.0.1:9253`.
pub fn split_listen_address(address: &str) -> Result<(Option<String>, u16), String> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| format!("Invalid listen address '{}', expected [host]:port", address))?;
    let port = port
        .parse::<u16>()
        .map_err(|e| format!("Invalid port in listen address '{}': {}", address, e))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let host = (!host.is_empty()).then(|| host.to_string());
    Ok((host, port))
}

/// Resolves configuration from CLI args, environment, config file, and defaults.
/// This enforces precedence: CLI > environment > config file > default.
///
/// Environment variables are read by clap into the same fields as their flags,
/// so anything set on `args` already reflects both.
pub fn resolve_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        load_config(args.config.as_deref())?.fill_defaults()
    };

    if let Some(listen) = &args.web_listen_address {
        let (host, port) = split_listen_address(listen)?;
        config.bind = Some(host.unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()));
        config.port = Some(port);
    }

    // Explicit --bind/--port win over --web.listen-address.
    if let Some(bind_ip) = args.bind {
        config.bind = Some(bind_ip.to_string());
    }
    if let Some(cli_port) = args.port {
        config.port = Some(cli_port);
    }

    if let Some(path) = &args.web_telemetry_path {
        config.telemetry_path = Some(path.clone());
    }

    let uris: Vec<String> = args
        .scrape_uris
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if !uris.is_empty() {
        config.scrape_uris = Some(uris);
    }

    if args.fix_process_count {
        config.fix_process_count = Some(true);
    }
    if let Some(timeout) = args.scrape_timeout_secs {
        config.scrape_timeout_secs = Some(timeout);
    }
    if let Some(level) = args.log_level {
        config.log_level = Some(level);
    }

    if args.disable_health {
        config.enable_health = Some(false);
    }

    // TLS configuration: CLI wins if provided
    if args.enable_tls {
        config.enable_tls = Some(true);
    }
    if let Some(cert_path) = &args.tls_cert {
        config.tls_cert_path = Some(cert_path.to_string_lossy().to_string());
    }
    if let Some(key_path) = &args.tls_key {
        config.tls_key_path = Some(key_path.to_string_lossy().to_string());
    }

    Ok(config)
}

/// Loads a config file, or the first one found in the default locations.
/// Returns an all-unset config when no file exists.
pub fn load_config(path: Option<&Path>) -> Result<Config, Box<dyn std::error::Error>> {
    let path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(format!("Config file not found: {}", p.display()).into());
            }
            p.to_path_buf()
        }
        None => {
            let defaults = [
                "/etc/herakles/phpfpm-exporter.yaml",
                "/etc/herakles/phpfpm-exporter.yml",
                "/etc/herakles/phpfpm-exporter.json",
                "./herakles-phpfpm-exporter.yaml",
                "./herakles-phpfpm-exporter.yml",
                "./herakles-phpfpm-exporter.json",
            ];
            match defaults.iter().map(PathBuf::from).find(|p| p.exists()) {
                Some(p) => p,
                None => return Ok(empty_config()),
            }
        }
    };

    let content = fs::read_to_string(&path)?;

    match path.extension().and_then(|s| s.to_str()) {
        Some("json") => {
            let config: Config = serde_json::from_str(&content)?;
            info!("Loaded JSON configuration from: {}", path.display());
            Ok(config)
        }
        Some("toml") => {
            let config: Config = toml::from_str(&content)?;
            info!("Loaded TOML configuration from: {}", path.display());
            Ok(config)
        }
        _ => {
            // Default to YAML
            let config: Config = serde_yaml::from_str(&content)?;
            info!("Loaded YAML configuration from: {}", path.display());
            Ok(config)
        }
    }
}

fn empty_config() -> Config {
    Config {
        port: None,
        bind: None,
        telemetry_path: None,
        scrape_uris: None,
        fix_process_count: None,
        scrape_timeout_secs: None,
        enable_health: None,
        log_level: None,
        enable_tls: None,
        tls_cert_path: None,
        tls_key_path: None,
    }
}

/// Renders configuration in the requested format.
pub fn render_config(
    config: &Config,
    format: &ConfigFormat,
) -> Result<String, Box<dyn std::error::Error>> {
    Ok(match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
    })
}

/// Shows configuration in requested format
pub fn show_config(config: &Config, format: ConfigFormat) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", render_config(config, &format)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn parse(argv: &[&str]) -> Args {
        let mut full = vec!["herakles-phpfpm-exporter"];
        full.extend_from_slice(argv);
        Args::try_parse_from(full).unwrap()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert_eq!(config.port, Some(9253));
        assert_eq!(config.scrape_uris(), [DEFAULT_SCRAPE_URI]);
        assert!(validate_effective_config(&config).is_ok());
    }

    #[test]
    fn test_split_listen_address() {
        assert_eq!(split_listen_address(":9253").unwrap(), (None, 9253));
        assert_eq!(
            split_listen_address("127.0.0.1:8080").unwrap(),
            (Some("127.0.0.1".into()), 8080)
        );
        assert_eq!(
            split_listen_address("[::1]:9253").unwrap(),
            (Some("::1".into()), 9253)
        );
        assert!(split_listen_address("9253").is_err());
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        writeln!(
            file,
            "port: 9999\nscrape_uris:\n  - tcp://10.0.0.1:9000/status\nfix_process_count: false"
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let args = parse(&[
            "--config",
            &path,
            "--phpfpm.scrape-uri",
            "tcp://a:9000/status,unix:///tmp/b.sock;/status",
            "--phpfpm.fix-process-count",
        ]);
        let config = resolve_config(&args).unwrap();

        assert_eq!(config.port, Some(9999));
        assert_eq!(
            config.scrape_uris(),
            ["tcp://a:9000/status", "unix:///tmp/b.sock;/status"]
        );
        assert_eq!(config.count_mode(), CountMode::Recompute);
        assert_eq!(config.telemetry_path(), DEFAULT_TELEMETRY_PATH);
    }

    #[test]
    fn test_listen_address_sets_bind_and_port() {
        let args = parse(&["--no-config", "--web.listen-address", ":9300"]);
        let config = resolve_config(&args).unwrap();
        assert_eq!(config.port, Some(9300));
        assert_eq!(config.bind.as_deref(), Some(DEFAULT_BIND_ADDR));
    }

    #[test]
    fn test_invalid_scrape_uri_fails_validation() {
        let config = Config {
            scrape_uris: Some(vec!["http://127.0.0.1/status".into()]),
            ..Config::default()
        };
        let err = validate_effective_config(&config).unwrap_err();
        assert!(err.to_string().contains("unsupported scheme"));
    }

    #[test]
    fn test_zero_timeout_fails_validation() {
        let config = Config {
            scrape_timeout_secs: Some(0),
            ..Config::default()
        };
        assert!(validate_effective_config(&config).is_err());
    }

    #[test]
    fn test_relative_telemetry_path_fails_validation() {
        let config = Config {
            telemetry_path: Some("metrics".into()),
            ..Config::default()
        };
        assert!(validate_effective_config(&config).is_err());
    }

    #[test]
    fn test_toml_file_is_loaded_by_extension() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(file, "scrape_timeout_secs = 7\nlog_level = \"debug\"").unwrap();
        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.scrape_timeout_secs, Some(7));
        assert_eq!(config.log_level, Some(LogLevel::Debug));
        assert_eq!(config.port, None);
    }
}
