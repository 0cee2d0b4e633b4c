//! Configuration loading
//!
//! Handles loading configuration from embedded defaults, files, and environment.

use std::path::Path;

use super::config::AppConfig;
use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};

/// Embedded default configuration (compiled into binary)
pub const DEFAULT_CONFIG: &str = include_str!("../../config/default.toml");

/// Load configuration from files and environment
pub fn load_config(extra: Option<&Path>) -> Result<AppConfig> {
    let mut builder = Config::builder()
        // 1. Embedded defaults (always available)
        .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
        // 2. External overrides (optional)
        .add_source(
            File::with_name(&format!(
                "config/{}",
                std::env::var("CADENCE_ENV").unwrap_or_else(|_| "development".to_string())
            ))
            .required(false),
        )
        .add_source(File::with_name("config/local").required(false));

    // 3. Explicit file from the command line (must exist)
    if let Some(path) = extra {
        builder = builder.add_source(File::from(path).required(true));
    }

    // 4. Environment variables (highest priority), e.g. CADENCE_SCHEDULER__MAX_CONCURRENT
    let config = builder
        .add_source(
            Environment::with_prefix("CADENCE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| match extra {
            Some(path) => format!("Failed to build configuration (with {})", path.display()),
            None => "Failed to build configuration".to_string(),
        })?;

    config
        .try_deserialize()
        .context("Failed to deserialize configuration")
}
