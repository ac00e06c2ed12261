// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Maintenance scan configuration.

use serde::Deserialize;

/// Maintenance configuration (runtime, fully resolved).
#[derive(Debug, Clone, PartialEq)]
pub struct MaintenanceConfig {
	/// Report findings without deleting or repairing anything.
	pub dry_run: bool,
}

impl Default for MaintenanceConfig {
	fn default() -> Self {
		Self { dry_run: true }
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MaintenanceConfigLayer {
	#[serde(default)]
	pub dry_run: Option<bool>,
}

impl MaintenanceConfigLayer {
	pub fn merge(&mut self, other: MaintenanceConfigLayer) {
		if other.dry_run.is_some() {
			self.dry_run = other.dry_run;
		}
	}

	pub fn finalize(self) -> MaintenanceConfig {
		MaintenanceConfig {
			dry_run: self.dry_run.unwrap_or(true),
		}
	}
}
