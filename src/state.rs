//! Application state management for the exporter.
//!
//! This module defines the shared application state that is passed
//! to HTTP handlers.

use herakles_phpfpm_exporter::logging::SharedLogger;
use herakles_phpfpm_exporter::phpfpm::{CountMode, PoolManager};
use herakles_phpfpm_exporter::HealthStats;
use prometheus::{Gauge, Registry};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::metrics::PhpfpmMetrics;

/// Type alias for shared application state.
pub type SharedState = Arc<AppState>;

/// Global application state shared across requests.
pub struct AppState {
    pub registry: Registry,
    pub metrics: PhpfpmMetrics,
    pub scrape_duration: Gauge,
    /// Held for a whole update-then-publish cycle so concurrent `/metrics`
    /// requests never observe a pool mid-update.
    pub manager: Mutex<PoolManager>,
    pub config: Arc<Config>,
    pub count_mode: CountMode,
    pub health_stats: Arc<HealthStats>,
    pub logger: SharedLogger,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Builds the state for `config`, registering every metric family.
    pub fn new(config: Config, logger: SharedLogger) -> Result<Self, Box<dyn std::error::Error>> {
        let registry = Registry::new();
        let metrics = PhpfpmMetrics::new(&registry)?;
        let scrape_duration = Gauge::new(
            "herakles_exporter_scrape_duration_seconds",
            "Time spent serving the last /metrics request, including the php-fpm scrape",
        )?;
        registry.register(Box::new(scrape_duration.clone()))?;

        let mut manager = PoolManager::new(config.scrape_settings(), logger.clone());
        for uri in config.scrape_uris() {
            manager.add(uri.clone());
        }

        Ok(Self {
            registry,
            metrics,
            scrape_duration,
            manager: Mutex::new(manager),
            count_mode: config.count_mode(),
            config: Arc::new(config),
            health_stats: Arc::new(HealthStats::new()),
            logger,
            start_time: Instant::now(),
        })
    }
}
