// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Layered configuration for Hearth tooling.
//!
//! This crate provides:
//! - Layered configuration from multiple sources (defaults, TOML file, environment)
//! - Type-safe configuration with validation
//! - Consistent environment variable naming (`HEARTH_*`)
//!
//! # Usage
//!
//! ```ignore
//! use hearth_config::load_config;
//!
//! let config = load_config()?;
//! println!("Using {} at {}", config.database.backend, config.database.url);
//! ```

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::HearthConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use tracing::{debug, info};

/// Fully resolved configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HearthConfig {
	pub database: DatabaseConfig,
	pub logging: LoggingConfig,
	pub maintenance: MaintenanceConfig,
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`HEARTH_*`)
/// 2. Config file (`/etc/hearth/hearth.toml`)
/// 3. Built-in defaults
pub fn load_config() -> Result<HearthConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}

/// Load configuration from environment only.
pub fn load_config_from_env() -> Result<HearthConfig, ConfigError> {
	load_from_sources(vec![Box::new(DefaultsSource), Box::new(EnvSource)])
}

/// Load configuration with a custom config file path in place of the system
/// file.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<HearthConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

/// Merge `sources` lowest precedence first and resolve the result.
pub fn load_from_sources(
	mut sources: Vec<Box<dyn ConfigSource>>,
) -> Result<HearthConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = HearthConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		merged.merge(source.load()?);
	}

	finalize(merged)
}

/// Finalize configuration layer into resolved config.
fn finalize(layer: HearthConfigLayer) -> Result<HearthConfig, ConfigError> {
	let database = layer.database.unwrap_or_default().finalize();
	let logging = layer.logging.unwrap_or_default().finalize();
	let maintenance = layer.maintenance.unwrap_or_default().finalize();

	validate_config(&database)?;

	info!(
		backend = %database.backend,
		database = %database.url,
		log_level = %logging.level,
		dry_run = maintenance.dry_run,
		"configuration loaded"
	);

	Ok(HearthConfig {
		database,
		logging,
		maintenance,
	})
}

/// Validate cross-field configuration rules.
fn validate_config(database: &DatabaseConfig) -> Result<(), ConfigError> {
	if database.backend == DatabaseBackend::Sqlite && !database.url.starts_with("sqlite:") {
		return Err(ConfigError::Validation(format!(
			"database.url '{}' is not a sqlite: URL but the sqlite backend is selected",
			database.url
		)));
	}
	Ok(())
}
