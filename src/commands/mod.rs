//! CLI command implementations for herakles-phpfpm-exporter.
//!
//! - `get`: one-shot scrape of the configured pools
//! - `config`: configuration file generation

pub mod config;
pub mod get;

// Re-export command functions
pub use config::command_config;
pub use get::command_get;
