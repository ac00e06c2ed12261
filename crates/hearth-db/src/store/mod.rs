// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Abstract document store boundary.
//!
//! Repositories only talk to a [`DocumentStore`]. Two backends exist:
//! [`MemoryStore`] for tests and embedded use, [`SqliteStore`] for a persistent
//! single-file database through sqlx.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde_json::Value;

use crate::document::{Partition, RawDocument};
use crate::error::{DbError, Result};
use crate::filter::Filter;

/// Field-level update operators.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
	/// `$set`: merge top-level fields.
	Set(RawDocument),
	/// `$addToSet`: append values missing from an array field.
	AddToSet { field: String, values: Vec<Value> },
	/// `$pull`: remove values from an array field.
	Pull { field: String, values: Vec<Value> },
}

impl UpdateOp {
	/// Apply the operator in place. Returns true if the document changed.
	pub fn apply(&self, doc: &mut RawDocument) -> Result<bool> {
		match self {
			UpdateOp::Set(fields) => {
				let mut modified = false;
				for (key, value) in fields {
					if doc.get(key) != Some(value) {
						doc.insert(key.clone(), value.clone());
						modified = true;
					}
				}
				Ok(modified)
			}
			UpdateOp::AddToSet { field, values } => {
				let items = array_field(doc, field)?;
				let before = items.len();
				for value in values {
					if !items.contains(value) {
						items.push(value.clone());
					}
				}
				Ok(items.len() != before)
			}
			UpdateOp::Pull { field, values } => {
				let items = array_field(doc, field)?;
				let before = items.len();
				items.retain(|item| !values.contains(item));
				Ok(items.len() != before)
			}
		}
	}
}

fn array_field<'a>(doc: &'a mut RawDocument, field: &str) -> Result<&'a mut Vec<Value>> {
	let slot = doc
		.entry(field.to_string())
		.or_insert_with(|| Value::Array(Vec::new()));
	if slot.is_null() {
		*slot = Value::Array(Vec::new());
	}
	slot.as_array_mut()
		.ok_or_else(|| DbError::Conflict(format!("field '{field}' is not an array")))
}

/// One operation of a bulk write.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteModel {
	pub filter: Filter,
	pub update: UpdateOp,
	pub many: bool,
}

impl WriteModel {
	pub fn update_one(filter: Filter, update: UpdateOp) -> Self {
		Self {
			filter,
			update,
			many: false,
		}
	}

	pub fn update_many(filter: Filter, update: UpdateOp) -> Self {
		Self {
			filter,
			update,
			many: true,
		}
	}
}

/// Unique constraint on one field, optionally limited to a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueIndex {
	pub field: String,
	pub partition: Option<Partition>,
}

impl UniqueIndex {
	pub fn name(&self, collection: &str) -> String {
		let mut name = format!("ux_{collection}_{}", self.field);
		if let Some(partition) = &self.partition {
			name.push('_');
			name.push_str(&partition.value);
		}
		name
			.chars()
			.map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
			.collect()
	}

	/// Returns true if both documents fall under the index and collide on it.
	pub fn collides(&self, a: &RawDocument, b: &RawDocument) -> bool {
		let in_scope = |doc: &RawDocument| self.partition.as_ref().map_or(true, |p| p.contains(doc));
		if !in_scope(a) || !in_scope(b) {
			return false;
		}
		match (a.get(&self.field), b.get(&self.field)) {
			(Some(x), Some(y)) => !x.is_null() && x == y,
			_ => false,
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertAck {
	pub acknowledged: bool,
	pub inserted_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteAck {
	pub acknowledged: bool,
	pub matched: u64,
	pub modified: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteAck {
	pub acknowledged: bool,
	pub deleted: u64,
}

/// A MongoDB-like document store.
///
/// Documents are schemaless; identifiers are the `_id` string of each
/// document. Writes report whether the store acknowledged them.
#[async_trait]
pub trait DocumentStore: Send + Sync {
	/// Prepare a physical collection and its unique indexes. Idempotent.
	async fn open_collection(&self, collection: &str, indexes: &[UniqueIndex]) -> Result<()>;
	async fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<RawDocument>>;
	async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<RawDocument>>;
	async fn insert_one(&self, collection: &str, doc: RawDocument) -> Result<InsertAck>;
	async fn insert_many(&self, collection: &str, docs: Vec<RawDocument>) -> Result<InsertAck>;
	async fn update_one(
		&self,
		collection: &str,
		filter: &Filter,
		update: &UpdateOp,
	) -> Result<WriteAck>;
	async fn bulk_write(&self, collection: &str, ops: Vec<WriteModel>) -> Result<WriteAck>;
	async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<DeleteAck>;
	async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<DeleteAck>;
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn doc(value: Value) -> RawDocument {
		match value {
			Value::Object(map) => map,
			_ => panic!("test document must be an object"),
		}
	}

	#[test]
	fn set_merges_fields_and_reports_changes() {
		let mut d = doc(json!({ "_id": "1", "title": "a", "completed": false }));
		let op = UpdateOp::Set(doc(json!({ "completed": true })));
		assert!(op.apply(&mut d).unwrap());
		assert_eq!(d.get("title"), Some(&json!("a")));
		assert_eq!(d.get("completed"), Some(&json!(true)));
		assert!(!op.apply(&mut d).unwrap());
	}

	#[test]
	fn add_to_set_skips_existing_values() {
		let mut d = doc(json!({ "collaborators": ["a"] }));
		let op = UpdateOp::AddToSet {
			field: "collaborators".to_string(),
			values: vec![json!("a"), json!("b")],
		};
		assert!(op.apply(&mut d).unwrap());
		assert_eq!(d.get("collaborators"), Some(&json!(["a", "b"])));
	}

	#[test]
	fn add_to_set_creates_missing_array() {
		let mut d = doc(json!({}));
		let op = UpdateOp::AddToSet {
			field: "sharedWith".to_string(),
			values: vec![json!("a")],
		};
		assert!(op.apply(&mut d).unwrap());
		assert_eq!(d.get("sharedWith"), Some(&json!(["a"])));
	}

	#[test]
	fn pull_removes_values() {
		let mut d = doc(json!({ "sharedWith": ["a", "b", "a"] }));
		let op = UpdateOp::Pull {
			field: "sharedWith".to_string(),
			values: vec![json!("a")],
		};
		assert!(op.apply(&mut d).unwrap());
		assert_eq!(d.get("sharedWith"), Some(&json!(["b"])));
	}

	#[test]
	fn array_operator_on_scalar_conflicts() {
		let mut d = doc(json!({ "title": "x" }));
		let op = UpdateOp::Pull {
			field: "title".to_string(),
			values: vec![json!("x")],
		};
		assert!(matches!(op.apply(&mut d), Err(DbError::Conflict(_))));
	}

	#[test]
	fn unique_index_respects_partition() {
		let index = UniqueIndex {
			field: "userId".to_string(),
			partition: Some(Partition::doc_type("userConfig")),
		};
		let config = doc(json!({ "docType": "userConfig", "userId": "u" }));
		let other_config = doc(json!({ "docType": "userConfig", "userId": "u" }));
		let task = doc(json!({ "docType": "task", "userId": "u" }));
		assert!(index.collides(&config, &other_config));
		assert!(!index.collides(&config, &task));
		assert_eq!(index.name("dashboard"), "ux_dashboard_userId_userConfig");
	}

	#[test]
	fn unique_index_ignores_missing_values() {
		let index = UniqueIndex {
			field: "username".to_string(),
			partition: None,
		};
		assert!(!index.collides(&doc(json!({})), &doc(json!({}))));
		assert!(!index.collides(
			&doc(json!({ "username": null })),
			&doc(json!({ "username": null }))
		));
	}
}
