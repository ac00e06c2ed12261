// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Database configuration.

use serde::Deserialize;

use crate::error::ConfigError;

const DEFAULT_URL: &str = "sqlite:./hearth.db";

/// Document store backing the repositories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
	/// Process-local store; contents are lost on exit.
	Memory,
	#[default]
	Sqlite,
}

impl std::fmt::Display for DatabaseBackend {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			DatabaseBackend::Memory => write!(f, "memory"),
			DatabaseBackend::Sqlite => write!(f, "sqlite"),
		}
	}
}

impl std::str::FromStr for DatabaseBackend {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_lowercase().as_str() {
			"memory" => Ok(DatabaseBackend::Memory),
			"sqlite" => Ok(DatabaseBackend::Sqlite),
			_ => Err(ConfigError::invalid_value(
				"database.backend",
				format!("unknown backend '{s}', expected memory or sqlite"),
			)),
		}
	}
}

/// Database configuration (runtime, fully resolved).
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
	pub backend: DatabaseBackend,
	pub url: String,
}

impl Default for DatabaseConfig {
	fn default() -> Self {
		DatabaseConfigLayer::default().finalize()
	}
}

/// Database configuration layer (partial, for merging).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfigLayer {
	#[serde(default)]
	pub backend: Option<DatabaseBackend>,
	#[serde(default)]
	pub url: Option<String>,
}

impl DatabaseConfigLayer {
	pub fn merge(&mut self, other: DatabaseConfigLayer) {
		if other.backend.is_some() {
			self.backend = other.backend;
		}
		if other.url.is_some() {
			self.url = other.url;
		}
	}

	pub fn finalize(self) -> DatabaseConfig {
		DatabaseConfig {
			backend: self.backend.unwrap_or_default(),
			url: self.url.unwrap_or_else(|| DEFAULT_URL.to_string()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let config = DatabaseConfigLayer::default().finalize();
		assert_eq!(config.backend, DatabaseBackend::Sqlite);
		assert_eq!(config.url, "sqlite:./hearth.db");
	}

	#[test]
	fn test_backend_parsing() {
		assert_eq!("MEMORY".parse::<DatabaseBackend>().unwrap(), DatabaseBackend::Memory);
		assert_eq!("sqlite".parse::<DatabaseBackend>().unwrap(), DatabaseBackend::Sqlite);
		let err = "mongo".parse::<DatabaseBackend>().unwrap_err();
		assert!(err.to_string().contains("unknown backend 'mongo'"));
	}

	#[test]
	fn test_backend_display_round_trips_through_parse() {
		for backend in [DatabaseBackend::Memory, DatabaseBackend::Sqlite] {
			assert_eq!(backend.to_string().parse::<DatabaseBackend>().unwrap(), backend);
		}
	}
}
