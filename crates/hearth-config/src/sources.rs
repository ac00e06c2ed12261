// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: built-in defaults, a TOML file and environment
//! variables.

use std::path::PathBuf;

use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::HearthConfigLayer;
use crate::sections::{DatabaseConfigLayer, LoggingConfigLayer, MaintenanceConfigLayer};

pub const SYSTEM_CONFIG_PATH: &str = "/etc/hearth/hearth.toml";

pub const ENV_DATABASE_BACKEND: &str = "HEARTH_DATABASE_BACKEND";
pub const ENV_DATABASE_URL: &str = "HEARTH_DATABASE_URL";
pub const ENV_LOG_LEVEL: &str = "HEARTH_LOG_LEVEL";
pub const ENV_MAINTENANCE_DRY_RUN: &str = "HEARTH_MAINTENANCE_DRY_RUN";

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<HearthConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<HearthConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(HearthConfigLayer::default())
	}
}

/// TOML file configuration source. A missing file is an empty layer.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new(SYSTEM_CONFIG_PATH)
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<HearthConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(HearthConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: HearthConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: HEARTH_<SECTION>_<FIELD>
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<HearthConfigLayer, ConfigError> {
		debug!("loading environment variables");
		load_from_lookup(|name| std::env::var(name).ok())
	}
}

/// Build a layer from an environment lookup. Empty values count as unset.
pub(crate) fn load_from_lookup<F>(lookup: F) -> Result<HearthConfigLayer, ConfigError>
where
	F: Fn(&str) -> Option<String>,
{
	let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

	let backend = var(ENV_DATABASE_BACKEND).map(|v| v.parse()).transpose()?;
	let dry_run = var(ENV_MAINTENANCE_DRY_RUN)
		.map(|v| parse_bool(ENV_MAINTENANCE_DRY_RUN, &v))
		.transpose()?;

	Ok(HearthConfigLayer {
		database: Some(DatabaseConfigLayer {
			backend,
			url: var(ENV_DATABASE_URL),
		}),
		logging: Some(LoggingConfigLayer {
			level: var(ENV_LOG_LEVEL),
		}),
		maintenance: Some(MaintenanceConfigLayer { dry_run }),
	})
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
	match value.trim().to_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Ok(true),
		"0" | "false" | "no" | "off" => Ok(false),
		_ => Err(ConfigError::invalid_value(
			key,
			format!("invalid boolean value '{value}'"),
		)),
	}
}
