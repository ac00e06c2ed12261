// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
	#[error("Database error: {0}")]
	Sqlx(#[from] sqlx::Error),

	#[error(transparent)]
	Validation(#[from] ValidationError),

	#[error("Not found: {0}")]
	NotFound(String),

	#[error("Conflict: {0}")]
	Conflict(String),

	#[error("Internal: {0}")]
	Internal(String),

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

/// Rejection of a write before it reaches the store.
///
/// Carries every violation found, not only the first, plus the rejected object
/// for diagnostics.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Validation failed: {}", .violations.join("; "))]
pub struct ValidationError {
	pub violations: Vec<String>,
	pub object: serde_json::Value,
}

impl ValidationError {
	pub fn new(violations: Vec<String>, object: &impl Serialize) -> Self {
		Self {
			violations,
			object: serde_json::to_value(object).unwrap_or(serde_json::Value::Null),
		}
	}
}

pub type Result<T> = std::result::Result<T, DbError>;
