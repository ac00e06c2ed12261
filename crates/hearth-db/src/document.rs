// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Document model shared by every repository.
//!
//! - [`DocId`]: client-generated identifier, stored under `_id`
//! - [`Document`] / [`TypedDocument`]: the contract a persisted type fulfils
//! - [`Partition`]: the `docType` tag that splits a shared collection
//! - [`Patch`]: a partial document used by updates

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

use crate::error::{DbError, Result};

pub const ID_FIELD: &str = "_id";
pub const DOC_TYPE_FIELD: &str = "docType";
pub const OWNER_FIELD: &str = "userId";

/// Schemaless document as the store sees it.
pub type RawDocument = Map<String, Value>;

/// Unique identifier for a document within its physical collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(Uuid);

impl DocId {
	/// Create a new ID from a UUID.
	pub fn new(id: Uuid) -> Self {
		Self(id)
	}

	/// Generate a new random ID.
	pub fn generate() -> Self {
		Self(Uuid::new_v4())
	}

	/// Parse an ID from its string form.
	pub fn parse(s: &str) -> Option<Self> {
		Uuid::parse_str(s).ok().map(Self)
	}

	/// Get the inner UUID value.
	pub fn into_inner(self) -> Uuid {
		self.0
	}
}

impl fmt::Display for DocId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<Uuid> for DocId {
	fn from(id: Uuid) -> Self {
		Self(id)
	}
}

impl From<DocId> for Value {
	fn from(id: DocId) -> Self {
		Value::String(id.to_string())
	}
}

/// A persisted entity.
///
/// The identifier is assigned at construction time and never changes.
pub trait Document: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
	fn id(&self) -> DocId;
}

/// A document that lives in a shared collection next to other document kinds.
pub trait TypedDocument: Document {
	const DOC_TYPE: &'static str;
}

/// Field/value pair that scopes a repository to one logical sub-collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
	pub field: String,
	pub value: String,
}

impl Partition {
	pub fn doc_type(value: impl Into<String>) -> Self {
		Self {
			field: DOC_TYPE_FIELD.to_string(),
			value: value.into(),
		}
	}

	/// Returns true if the raw document carries this partition's tag.
	pub fn contains(&self, doc: &RawDocument) -> bool {
		doc.get(&self.field).and_then(Value::as_str) == Some(self.value.as_str())
	}
}

impl fmt::Display for Partition {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}={}", self.field, self.value)
	}
}

/// Partial document applied as a field merge by `update`.
///
/// The target is named by the `_id` entry; every other entry is merged into the
/// stored document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patch(RawDocument);

impl Patch {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn for_id(id: DocId) -> Self {
		Self::new().set(ID_FIELD, id)
	}

	/// Build a patch from any serializable partial struct or JSON object.
	pub fn from_partial<P: Serialize>(partial: &P) -> Result<Self> {
		match serde_json::to_value(partial)? {
			Value::Object(map) => Ok(Self(map)),
			other => Err(DbError::Internal(format!(
				"patch must serialize to an object, got {other}"
			))),
		}
	}

	pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
		self.0.insert(field.into(), value.into());
		self
	}

	/// The target identifier, if present and well formed.
	pub fn id(&self) -> Option<DocId> {
		self.0.get(ID_FIELD).and_then(Value::as_str).and_then(DocId::parse)
	}

	pub fn get(&self, field: &str) -> Option<&Value> {
		self.0.get(field)
	}

	pub fn contains(&self, field: &str) -> bool {
		self.0.contains_key(field)
	}

	pub fn remove(&mut self, field: &str) -> Option<Value> {
		self.0.remove(field)
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn fields(&self) -> impl Iterator<Item = &str> {
		self.0.keys().map(String::as_str)
	}

	pub fn into_inner(self) -> RawDocument {
		self.0
	}
}

pub(crate) fn to_raw<T: Serialize>(doc: &T) -> Result<RawDocument> {
	match serde_json::to_value(doc)? {
		Value::Object(map) => Ok(map),
		other => Err(DbError::Internal(format!(
			"document must serialize to an object, got {other}"
		))),
	}
}

pub(crate) fn from_raw<T: DeserializeOwned>(raw: RawDocument) -> Result<T> {
	Ok(serde_json::from_value(Value::Object(raw))?)
}

pub(crate) fn raw_id(raw: &RawDocument) -> Result<&str> {
	raw.get(ID_FIELD)
		.and_then(Value::as_str)
		.ok_or_else(|| DbError::Internal(format!("document is missing a string {ID_FIELD}")))
}
