//! Herakles PHP-FPM Exporter Library
//!
//! Scrapes the status page of one or more php-fpm pools over FastCGI,
//! repairs and decodes the JSON payload, and reconciles php-fpm's reported
//! worker counts against its per-process list.
//!
//! # Usage
//!
//! ```rust,no_run
//! use herakles_phpfpm_exporter::logging::TracingLogger;
//! use herakles_phpfpm_exporter::phpfpm::{reconcile, CountMode, PoolManager, ScrapeSettings};
//!
//! # async fn run() {
//! let logger = TracingLogger::shared();
//! let mut manager = PoolManager::new(ScrapeSettings::default(), logger.clone());
//! manager.add("tcp://127.0.0.1:9000/status");
//! manager.add("unix:///run/php/php-fpm.sock;/status");
//!
//! if let Err(e) = manager.update().await {
//!     eprintln!("scrape cycle degraded: {e}");
//! }
//!
//! for pool in manager.pools() {
//!     if pool.is_up() {
//!         let counts = reconcile(pool.status(), CountMode::TrustUpstream, logger.as_ref());
//!         println!("{}: {} active", pool.name(), counts.published.active);
//!     }
//! }
//! # }
//! ```

pub mod health_stats;
pub mod logging;
pub mod phpfpm;

pub use health_stats::HealthStats;
pub use logging::{Logger, NullLogger, SharedLogger, TracingLogger};
pub use phpfpm::{Pool, PoolManager, PoolStatus, ProcessState, ScrapeSettings};
