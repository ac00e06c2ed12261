// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Structured predicates over raw documents.
//!
//! Supports equality, set membership (`$in`) and compound `$and`/`$or`. Field
//! names may be dotted paths into nested objects. Equality against an array
//! field matches when the array contains the value, the same way a Mongo query
//! `{ sharedWith: id }` does.

use serde_json::Value;

use crate::document::{DocId, RawDocument, ID_FIELD};

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
	Eq(String, Value),
	In(String, Vec<Value>),
	And(Vec<Filter>),
	Or(Vec<Filter>),
}

impl Filter {
	/// Matches every document.
	pub fn all() -> Self {
		Filter::And(Vec::new())
	}

	pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
		Filter::Eq(field.into(), value.into())
	}

	pub fn is_in<I, V>(field: impl Into<String>, values: I) -> Self
	where
		I: IntoIterator<Item = V>,
		V: Into<Value>,
	{
		Filter::In(field.into(), values.into_iter().map(Into::into).collect())
	}

	pub fn id(id: DocId) -> Self {
		Filter::eq(ID_FIELD, id)
	}

	pub fn ids(ids: &[DocId]) -> Self {
		Filter::is_in(ID_FIELD, ids.iter().copied())
	}

	pub fn is_all(&self) -> bool {
		matches!(self, Filter::And(clauses) if clauses.is_empty())
	}

	/// Conjunction, flattening nested `And`s.
	pub fn and(self, other: Filter) -> Filter {
		let mut clauses = Vec::new();
		for filter in [self, other] {
			match filter {
				Filter::And(inner) => clauses.extend(inner),
				filter => clauses.push(filter),
			}
		}
		match clauses.len() {
			1 => clauses.remove(0),
			_ => Filter::And(clauses),
		}
	}

	/// Disjunction, flattening nested `Or`s.
	pub fn or(self, other: Filter) -> Filter {
		let mut clauses = Vec::new();
		for filter in [self, other] {
			match filter {
				Filter::Or(inner) => clauses.extend(inner),
				filter => clauses.push(filter),
			}
		}
		Filter::Or(clauses)
	}

	pub fn matches(&self, doc: &RawDocument) -> bool {
		match self {
			Filter::Eq(field, expected) => value_matches(lookup(doc, field), expected),
			Filter::In(field, candidates) => {
				let actual = lookup(doc, field);
				candidates.iter().any(|c| value_matches(actual, c))
			}
			Filter::And(clauses) => clauses.iter().all(|c| c.matches(doc)),
			Filter::Or(clauses) => clauses.iter().any(|c| c.matches(doc)),
		}
	}

	/// Fields constrained by top-level equality or membership clauses.
	pub fn pinned_fields(&self) -> Vec<&str> {
		match self {
			Filter::Eq(field, _) | Filter::In(field, _) => vec![field.as_str()],
			Filter::And(clauses) => clauses.iter().flat_map(Filter::pinned_fields).collect(),
			Filter::Or(_) => Vec::new(),
		}
	}

	/// Merge a repository default filter into this one.
	///
	/// Top-level clauses on fields the default pins are dropped first, so the
	/// default always wins and a read cannot leave its partition.
	pub fn scoped(self, default: &Filter) -> Filter {
		let pinned = default.pinned_fields();
		self.without_fields(&pinned).and(default.clone())
	}

	fn without_fields(self, fields: &[&str]) -> Filter {
		match self {
			Filter::Eq(ref field, _) | Filter::In(ref field, _) if fields.contains(&field.as_str()) => {
				Filter::all()
			}
			Filter::And(clauses) => Filter::And(
				clauses
					.into_iter()
					.map(|c| c.without_fields(fields))
					.filter(|c| !c.is_all())
					.collect(),
			),
			other => other,
		}
	}
}

fn lookup<'a>(doc: &'a RawDocument, path: &str) -> Option<&'a Value> {
	let mut parts = path.split('.');
	let mut current = doc.get(parts.next()?)?;
	for part in parts {
		current = current.as_object()?.get(part)?;
	}
	Some(current)
}

fn value_matches(actual: Option<&Value>, expected: &Value) -> bool {
	match actual {
		None => expected.is_null(),
		Some(Value::Array(items)) if !expected.is_array() => items.contains(expected),
		Some(value) => value == expected,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;
	use serde_json::json;

	fn doc(value: Value) -> RawDocument {
		match value {
			Value::Object(map) => map,
			_ => panic!("test document must be an object"),
		}
	}

	#[test]
	fn eq_matches_scalars_and_array_members() {
		let task = doc(json!({ "userId": "a", "sharedWith": ["b", "c"] }));
		assert!(Filter::eq("userId", "a").matches(&task));
		assert!(Filter::eq("sharedWith", "b").matches(&task));
		assert!(!Filter::eq("sharedWith", "d").matches(&task));
	}

	#[test]
	fn missing_field_equals_null() {
		let d = doc(json!({ "title": "x" }));
		assert!(Filter::eq("deletedAt", Value::Null).matches(&d));
		assert!(!Filter::eq("deletedAt", "2024").matches(&d));
	}

	#[test]
	fn dotted_paths_reach_nested_fields() {
		let user = doc(json!({ "features": { "dashboard": true } }));
		assert!(Filter::eq("features.dashboard", true).matches(&user));
		assert!(!Filter::eq("features.game", true).matches(&user));
	}

	#[test]
	fn in_and_or_compose() {
		let d = doc(json!({ "userId": "a", "docType": "task" }));
		let owned_or_shared = Filter::eq("userId", "z").or(Filter::eq("sharedWith", "a"));
		assert!(!owned_or_shared.matches(&d));
		assert!(Filter::is_in("userId", ["x", "a"]).matches(&d));
		assert!(Filter::all().matches(&d));
	}

	#[test]
	fn scoped_default_wins_on_conflict() {
		let default = Filter::eq("docType", "task");
		let scoped = Filter::eq("docType", "userConfig")
			.and(Filter::eq("userId", "a"))
			.scoped(&default);
		assert_eq!(
			scoped,
			Filter::And(vec![
				Filter::eq("userId", "a"),
				Filter::eq("docType", "task"),
			])
		);
	}

	#[test]
	fn scoped_keeps_or_branches_untouched() {
		let default = Filter::eq("docType", "task");
		let query = Filter::eq("docType", "userConfig").or(Filter::eq("userId", "a"));
		let scoped = query.clone().scoped(&default);
		assert_eq!(scoped, Filter::And(vec![query, default]));
	}

	proptest! {
		#[test]
		fn scoped_filter_never_escapes_partition(
			requested in "[a-z]{1,8}",
			partition in "[a-z]{1,8}",
			stored in "[a-z]{1,8}",
		) {
			let default = Filter::eq("docType", partition.clone());
			let query = Filter::eq("docType", requested).scoped(&default);
			let d = doc(json!({ "docType": stored.clone() }));
			prop_assert_eq!(query.matches(&d), stored == partition);
		}
	}
}
