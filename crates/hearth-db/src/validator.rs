// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Business-rule validation and maintenance scans.
//!
//! A [`Validator`] collects every problem it finds into [`Violations`]; the
//! repository turns a non-empty list into a single
//! [`ValidationError`](crate::error::ValidationError) carrying the rejected
//! object. Validators also drive the offline scan that finds orphans and
//! dangling references already in the store.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

use crate::document::{DocId, Document, Patch};
use crate::error::{Result, ValidationError};
use crate::repository::BaseRepository;

/// Accumulates human-readable rule violations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Violations(Vec<String>);

impl Violations {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push(&mut self, message: impl Into<String>) {
		self.0.push(message.into());
	}

	/// Record `message` unless `ok` holds.
	pub fn check(&mut self, ok: bool, message: impl Into<String>) {
		if !ok {
			self.push(message);
		}
	}

	pub fn extend(&mut self, other: Violations) {
		self.0.extend(other.0);
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn messages(&self) -> &[String] {
		&self.0
	}

	/// Read a typed field from a patch.
	///
	/// Returns `None` when the field is absent. A present field of the wrong
	/// shape is recorded as a violation and also yields `None`.
	pub fn field<V: DeserializeOwned>(&mut self, patch: &Patch, name: &str) -> Option<V> {
		let value = patch.get(name)?;
		match serde_json::from_value(value.clone()) {
			Ok(parsed) => Some(parsed),
			Err(e) => {
				self.push(format!("{name} has an invalid value: {e}"));
				None
			}
		}
	}

	/// `Ok` when empty, otherwise a validation error naming `object`.
	pub fn into_result(self, object: &impl Serialize) -> Result<()> {
		if self.0.is_empty() {
			Ok(())
		} else {
			Err(ValidationError::new(self.0, object).into())
		}
	}
}

/// Business rules for one document type.
///
/// Both checks receive the owning repository so rules can query it, for
/// example for uniqueness. References into other repositories are held by the
/// validator itself.
#[async_trait]
pub trait Validator<T: Document>: Send + Sync {
	/// Check a complete document before it is inserted.
	async fn validate_new_object(&self, repo: &BaseRepository<T>, doc: &T) -> Result<Violations>;

	/// Check a partial update before it is applied.
	///
	/// Only fields present in the patch are checked.
	async fn validate_update_object(
		&self,
		repo: &BaseRepository<T>,
		patch: &Patch,
	) -> Result<Violations>;

	/// Inspect stored documents for integrity problems.
	async fn scan(&self, _repo: &BaseRepository<T>, _docs: &[T]) -> Result<Vec<ScanFinding>> {
		Ok(Vec::new())
	}
}

/// A problem found by a maintenance scan and the fix for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScanFinding {
	Delete {
		id: DocId,
		reason: String,
	},
	Repair {
		id: DocId,
		patch: Patch,
		reason: String,
	},
}

impl ScanFinding {
	pub fn id(&self) -> DocId {
		match self {
			ScanFinding::Delete { id, .. } | ScanFinding::Repair { id, .. } => *id,
		}
	}

	pub fn reason(&self) -> &str {
		match self {
			ScanFinding::Delete { reason, .. } | ScanFinding::Repair { reason, .. } => reason,
		}
	}
}

impl fmt::Display for ScanFinding {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ScanFinding::Delete { id, reason } => write!(f, "delete {id}: {reason}"),
			ScanFinding::Repair { id, reason, .. } => write!(f, "repair {id}: {reason}"),
		}
	}
}

/// Outcome of `validate_repository_in_db`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanReport {
	pub repository: String,
	pub dry_run: bool,
	pub scanned: usize,
	pub findings: Vec<ScanFinding>,
	pub deleted: u64,
	pub repaired: u64,
}

impl ScanReport {
	pub fn is_clean(&self) -> bool {
		self.findings.is_empty()
	}
}

impl fmt::Display for ScanReport {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mode = if self.dry_run { "dry run" } else { "live" };
		write!(
			f,
			"{} ({mode}): scanned {}, findings {}, deleted {}, repaired {}",
			self.repository,
			self.scanned,
			self.findings.len(),
			self.deleted,
			self.repaired
		)
	}
}

/// Identifiers from `wanted` absent from `existing`, in first-seen order.
pub fn missing_ids<'a>(
	wanted: impl IntoIterator<Item = &'a DocId>,
	existing: &HashSet<DocId>,
) -> Vec<DocId> {
	let mut seen = HashSet::new();
	wanted
		.into_iter()
		.filter(|id| !existing.contains(*id) && seen.insert(**id))
		.copied()
		.collect()
}

/// Findings deleting every document whose parent is no longer present.
pub fn orphan_findings<T>(
	docs: &[T],
	existing_parents: &HashSet<DocId>,
	id_of: impl Fn(&T) -> DocId,
	parent_of: impl Fn(&T) -> DocId,
	parent_kind: &str,
) -> Vec<ScanFinding> {
	docs
		.iter()
		.filter(|doc| !existing_parents.contains(&parent_of(doc)))
		.map(|doc| ScanFinding::Delete {
			id: id_of(doc),
			reason: format!("{parent_kind} {} no longer exists", parent_of(doc)),
		})
		.collect()
}
