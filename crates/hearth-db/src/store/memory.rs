// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-process document store.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use super::{DeleteAck, DocumentStore, InsertAck, UniqueIndex, UpdateOp, WriteAck, WriteModel};
use crate::document::{raw_id, RawDocument};
use crate::error::{DbError, Result};
use crate::filter::Filter;

#[derive(Debug, Clone, Default)]
struct MemoryCollection {
	docs: BTreeMap<String, RawDocument>,
	indexes: Vec<UniqueIndex>,
}

impl MemoryCollection {
	fn check_unique(&self, collection: &str, doc: &RawDocument) -> Result<()> {
		let id = raw_id(doc)?;
		for index in &self.indexes {
			let clash = self
				.docs
				.iter()
				.any(|(other_id, other)| other_id != id && index.collides(doc, other));
			if clash {
				return Err(DbError::Conflict(format!(
					"duplicate key for unique index {}",
					index.name(collection)
				)));
			}
		}
		Ok(())
	}

	fn insert(&mut self, collection: &str, doc: RawDocument) -> Result<String> {
		let id = raw_id(&doc)?.to_string();
		if self.docs.contains_key(&id) {
			return Err(DbError::Conflict(format!(
				"duplicate _id {id} in collection {collection}"
			)));
		}
		self.check_unique(collection, &doc)?;
		self.docs.insert(id.clone(), doc);
		Ok(id)
	}

	fn apply(&mut self, collection: &str, op: &WriteModel) -> Result<WriteAck> {
		let targets: Vec<String> = self
			.docs
			.iter()
			.filter(|(_, doc)| op.filter.matches(doc))
			.map(|(id, _)| id.clone())
			.take(if op.many { usize::MAX } else { 1 })
			.collect();

		let mut ack = WriteAck {
			acknowledged: true,
			..WriteAck::default()
		};
		for id in targets {
			let Some(mut doc) = self.docs.get(&id).cloned() else {
				continue;
			};
			ack.matched += 1;
			if op.update.apply(&mut doc)? {
				self.check_unique(collection, &doc)?;
				self.docs.insert(id, doc);
				ack.modified += 1;
			}
		}
		Ok(ack)
	}
}

/// Document store held entirely in memory.
///
/// Unique indexes are enforced on every write. Batch writes are all-or-nothing.
#[derive(Debug)]
pub struct MemoryStore {
	collections: RwLock<HashMap<String, MemoryCollection>>,
	acknowledge: AtomicBool,
}

impl Default for MemoryStore {
	fn default() -> Self {
		Self::new()
	}
}

impl MemoryStore {
	pub fn new() -> Self {
		Self {
			collections: RwLock::new(HashMap::new()),
			acknowledge: AtomicBool::new(true),
		}
	}

	/// Simulate a store that drops writes without acknowledging them.
	///
	/// While disabled, writes are discarded and reported as unacknowledged.
	pub fn set_acknowledge_writes(&self, acknowledge: bool) {
		self.acknowledge.store(acknowledge, Ordering::SeqCst);
	}

	/// Number of documents in a physical collection, ignoring partitions.
	pub async fn count(&self, collection: &str) -> usize {
		self
			.collections
			.read()
			.await
			.get(collection)
			.map_or(0, |c| c.docs.len())
	}

	fn acknowledges(&self) -> bool {
		self.acknowledge.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl DocumentStore for MemoryStore {
	#[tracing::instrument(skip(self, indexes), fields(collection = %collection))]
	async fn open_collection(&self, collection: &str, indexes: &[UniqueIndex]) -> Result<()> {
		let mut collections = self.collections.write().await;
		let entry = collections.entry(collection.to_string()).or_default();
		for index in indexes {
			if entry.indexes.contains(index) {
				continue;
			}
			let docs: Vec<&RawDocument> = entry.docs.values().collect();
			for (i, a) in docs.iter().enumerate() {
				if docs[i + 1..].iter().any(|b| index.collides(a, b)) {
					return Err(DbError::Conflict(format!(
						"existing documents violate unique index {}",
						index.name(collection)
					)));
				}
			}
			entry.indexes.push(index.clone());
		}
		Ok(())
	}

	async fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<RawDocument>> {
		let collections = self.collections.read().await;
		Ok(collections
			.get(collection)
			.and_then(|c| c.docs.values().find(|doc| filter.matches(doc)).cloned()))
	}

	async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<RawDocument>> {
		let collections = self.collections.read().await;
		Ok(collections
			.get(collection)
			.map(|c| {
				c.docs
					.values()
					.filter(|doc| filter.matches(doc))
					.cloned()
					.collect()
			})
			.unwrap_or_default())
	}

	async fn insert_one(&self, collection: &str, doc: RawDocument) -> Result<InsertAck> {
		if !self.acknowledges() {
			return Ok(InsertAck::default());
		}
		let mut collections = self.collections.write().await;
		let entry = collections.entry(collection.to_string()).or_default();
		let id = entry.insert(collection, doc)?;
		Ok(InsertAck {
			acknowledged: true,
			inserted_ids: vec![id],
		})
	}

	async fn insert_many(&self, collection: &str, docs: Vec<RawDocument>) -> Result<InsertAck> {
		if !self.acknowledges() {
			return Ok(InsertAck::default());
		}
		let mut collections = self.collections.write().await;
		let entry = collections.entry(collection.to_string()).or_default();
		let mut staged = entry.clone();
		let mut inserted_ids = Vec::with_capacity(docs.len());
		for doc in docs {
			inserted_ids.push(staged.insert(collection, doc)?);
		}
		*entry = staged;
		Ok(InsertAck {
			acknowledged: true,
			inserted_ids,
		})
	}

	async fn update_one(
		&self,
		collection: &str,
		filter: &Filter,
		update: &UpdateOp,
	) -> Result<WriteAck> {
		self
			.bulk_write(
				collection,
				vec![WriteModel::update_one(filter.clone(), update.clone())],
			)
			.await
	}

	async fn bulk_write(&self, collection: &str, ops: Vec<WriteModel>) -> Result<WriteAck> {
		if !self.acknowledges() {
			return Ok(WriteAck::default());
		}
		let mut collections = self.collections.write().await;
		let entry = collections.entry(collection.to_string()).or_default();
		let mut staged = entry.clone();
		let mut total = WriteAck {
			acknowledged: true,
			..WriteAck::default()
		};
		for op in &ops {
			let ack = staged.apply(collection, op)?;
			total.matched += ack.matched;
			total.modified += ack.modified;
		}
		*entry = staged;
		Ok(total)
	}

	async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<DeleteAck> {
		if !self.acknowledges() {
			return Ok(DeleteAck::default());
		}
		let mut collections = self.collections.write().await;
		let Some(entry) = collections.get_mut(collection) else {
			return Ok(DeleteAck {
				acknowledged: true,
				deleted: 0,
			});
		};
		let target = entry
			.docs
			.iter()
			.find(|(_, doc)| filter.matches(doc))
			.map(|(id, _)| id.clone());
		let deleted = match target {
			Some(id) => u64::from(entry.docs.remove(&id).is_some()),
			None => 0,
		};
		Ok(DeleteAck {
			acknowledged: true,
			deleted,
		})
	}

	async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<DeleteAck> {
		if !self.acknowledges() {
			return Ok(DeleteAck::default());
		}
		let mut collections = self.collections.write().await;
		let Some(entry) = collections.get_mut(collection) else {
			return Ok(DeleteAck {
				acknowledged: true,
				deleted: 0,
			});
		};
		let before = entry.docs.len();
		entry.docs.retain(|_, doc| !filter.matches(doc));
		Ok(DeleteAck {
			acknowledged: true,
			deleted: (before - entry.docs.len()) as u64,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::{json, Value};

	fn doc(value: Value) -> RawDocument {
		match value {
			Value::Object(map) => map,
			_ => panic!("test document must be an object"),
		}
	}

	fn username_index() -> UniqueIndex {
		UniqueIndex {
			field: "username".to_string(),
			partition: None,
		}
	}

	#[tokio::test]
	async fn unique_index_rejects_duplicate_insert() {
		let store = MemoryStore::new();
		store
			.open_collection("users", &[username_index()])
			.await
			.unwrap();
		store
			.insert_one("users", doc(json!({ "_id": "1", "username": "ada" })))
			.await
			.unwrap();

		let result = store
			.insert_one("users", doc(json!({ "_id": "2", "username": "ada" })))
			.await;
		assert!(matches!(result, Err(DbError::Conflict(_))));
		assert_eq!(store.count("users").await, 1);
	}

	#[tokio::test]
	async fn insert_many_is_all_or_nothing() {
		let store = MemoryStore::new();
		store
			.open_collection("users", &[username_index()])
			.await
			.unwrap();

		let result = store
			.insert_many(
				"users",
				vec![
					doc(json!({ "_id": "1", "username": "ada" })),
					doc(json!({ "_id": "2", "username": "ada" })),
				],
			)
			.await;
		assert!(result.is_err());
		assert_eq!(store.count("users").await, 0);
	}

	#[tokio::test]
	async fn update_into_unique_clash_is_rejected() {
		let store = MemoryStore::new();
		store
			.open_collection("users", &[username_index()])
			.await
			.unwrap();
		store
			.insert_many(
				"users",
				vec![
					doc(json!({ "_id": "1", "username": "ada" })),
					doc(json!({ "_id": "2", "username": "bob" })),
				],
			)
			.await
			.unwrap();

		let result = store
			.update_one(
				"users",
				&Filter::eq("_id", "2"),
				&UpdateOp::Set(doc(json!({ "username": "ada" }))),
			)
			.await;
		assert!(matches!(result, Err(DbError::Conflict(_))));
		let bob = store
			.find_one("users", &Filter::eq("_id", "2"))
			.await
			.unwrap()
			.unwrap();
		assert_eq!(bob.get("username"), Some(&json!("bob")));
	}

	#[tokio::test]
	async fn unacknowledged_writes_are_dropped() {
		let store = MemoryStore::new();
		store.set_acknowledge_writes(false);
		let ack = store
			.insert_one("users", doc(json!({ "_id": "1" })))
			.await
			.unwrap();
		assert!(!ack.acknowledged);
		assert_eq!(store.count("users").await, 0);
	}

	#[tokio::test]
	async fn delete_many_reports_count() {
		let store = MemoryStore::new();
		store
			.insert_many(
				"tasks",
				vec![
					doc(json!({ "_id": "1", "userId": "a" })),
					doc(json!({ "_id": "2", "userId": "a" })),
					doc(json!({ "_id": "3", "userId": "b" })),
				],
			)
			.await
			.unwrap();
		let ack = store
			.delete_many("tasks", &Filter::eq("userId", "a"))
			.await
			.unwrap();
		assert_eq!(ack.deleted, 2);
		assert_eq!(store.count("tasks").await, 1);
	}
}
