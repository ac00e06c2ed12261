// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Partial configuration as read from a single source.

use serde::Deserialize;

use crate::sections::{DatabaseConfigLayer, LoggingConfigLayer, MaintenanceConfigLayer};

/// One source's view of the configuration. Absent sections and fields leave
/// lower-precedence values in place.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HearthConfigLayer {
	#[serde(default)]
	pub database: Option<DatabaseConfigLayer>,
	#[serde(default)]
	pub logging: Option<LoggingConfigLayer>,
	#[serde(default)]
	pub maintenance: Option<MaintenanceConfigLayer>,
}

impl HearthConfigLayer {
	pub fn merge(&mut self, other: HearthConfigLayer) {
		merge_section(&mut self.database, other.database, DatabaseConfigLayer::merge);
		merge_section(&mut self.logging, other.logging, LoggingConfigLayer::merge);
		merge_section(&mut self.maintenance, other.maintenance, MaintenanceConfigLayer::merge);
	}
}

fn merge_section<T>(current: &mut Option<T>, other: Option<T>, merge: fn(&mut T, T)) {
	match (current.as_mut(), other) {
		(Some(existing), Some(incoming)) => merge(existing, incoming),
		(None, Some(incoming)) => *current = Some(incoming),
		(_, None) => {}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::sections::DatabaseBackend;

	#[test]
	fn test_merge_keeps_lower_values_for_absent_fields() {
		let mut base = HearthConfigLayer {
			database: Some(DatabaseConfigLayer {
				backend: Some(DatabaseBackend::Sqlite),
				url: Some("sqlite:./base.db".to_string()),
			}),
			..Default::default()
		};
		base.merge(HearthConfigLayer {
			database: Some(DatabaseConfigLayer {
				backend: None,
				url: Some("sqlite:./override.db".to_string()),
			}),
			logging: Some(LoggingConfigLayer {
				level: Some("debug".to_string()),
			}),
			maintenance: None,
		});

		let database = base.database.unwrap();
		assert_eq!(database.backend, Some(DatabaseBackend::Sqlite));
		assert_eq!(database.url.as_deref(), Some("sqlite:./override.db"));
		assert_eq!(base.logging.unwrap().level.as_deref(), Some("debug"));
		assert!(base.maintenance.is_none());
	}

	#[test]
	fn test_parses_partial_toml() {
		let layer: HearthConfigLayer = toml::from_str(
			r#"
			[maintenance]
			dry_run = false
			"#,
		)
		.unwrap();
		assert!(layer.database.is_none());
		assert_eq!(layer.maintenance.unwrap().dry_run, Some(false));
	}

	#[test]
	fn test_rejects_unknown_sections() {
		assert!(toml::from_str::<HearthConfigLayer>("[http]\nport = 1").is_err());
	}
}
