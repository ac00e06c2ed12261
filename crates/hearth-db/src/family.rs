// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared physical collections split by `docType`.

use std::sync::Arc;

use crate::document::{Partition, TypedDocument};
use crate::repository::BaseRepository;
use crate::store::DocumentStore;
use crate::validator::Validator;

/// A physical collection shared by several document kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionFamily {
	collection: &'static str,
}

/// Per-user dashboard state: configs and tasks.
pub const DASHBOARD: CollectionFamily = CollectionFamily::new("dashboard");

/// Game state: characters and their items.
pub const GAME: CollectionFamily = CollectionFamily::new("game");

impl CollectionFamily {
	pub const fn new(collection: &'static str) -> Self {
		Self { collection }
	}

	pub fn collection(&self) -> &'static str {
		self.collection
	}

	/// Repository for one document kind of this family, scoped to
	/// `docType = T::DOC_TYPE`.
	pub fn repository<T: TypedDocument>(
		&self,
		store: Arc<dyn DocumentStore>,
		validator: Arc<dyn Validator<T>>,
	) -> BaseRepository<T> {
		BaseRepository::new(store, self.collection, validator)
			.with_partition(Partition::doc_type(T::DOC_TYPE))
	}
}
