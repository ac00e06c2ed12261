// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! User accounts, the root of every ownership chain.
//!
//! Usernames are unique. The validator pre-checks this for a readable error;
//! the store's unique index on `username` is what actually guarantees it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::document::{DocId, Document, Patch};
use crate::error::Result;
use crate::filter::Filter;
use crate::repository::BaseRepository;
use crate::store::DocumentStore;
use crate::validator::{Validator, Violations};

pub const USERS_COLLECTION: &str = "users";

/// Optional product areas a user has turned on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeatureAccess {
	pub dashboard: bool,
	pub api_access: bool,
	pub game: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
	#[serde(rename = "_id")]
	pub id: DocId,
	pub username: String,
	pub display_name: String,
	#[serde(default)]
	pub features: FeatureAccess,
	pub created_date: DateTime<Utc>,
}

impl User {
	pub fn new(username: impl Into<String>, display_name: impl Into<String>, features: FeatureAccess) -> Self {
		Self {
			id: DocId::generate(),
			username: username.into(),
			display_name: display_name.into(),
			features,
			created_date: Utc::now(),
		}
	}
}

impl Document for User {
	fn id(&self) -> DocId {
		self.id
	}
}

/// Validates a username.
/// Rules:
/// - 3-32 characters
/// - ASCII letters, digits, `_` and `-` only
pub fn validate_username(username: &str) -> std::result::Result<(), &'static str> {
	if username.len() < 3 {
		return Err("Username must be at least 3 characters");
	}
	if username.len() > 32 {
		return Err("Username must be at most 32 characters");
	}
	if !username
		.chars()
		.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
	{
		return Err("Username can only contain letters, numbers, underscores and hyphens");
	}
	Ok(())
}

pub struct UserValidator;

impl UserValidator {
	async fn check_username(
		repo: &UserRepository,
		username: &str,
		own_id: Option<DocId>,
		violations: &mut Violations,
	) -> Result<()> {
		if let Err(reason) = validate_username(username) {
			violations.push(reason);
			return Ok(());
		}
		if let Some(existing) = repo.get_by_username(username).await? {
			violations.check(
				Some(existing.id) == own_id,
				format!("Username '{username}' is already taken"),
			);
		}
		Ok(())
	}
}

#[async_trait]
impl Validator<User> for UserValidator {
	async fn validate_new_object(&self, repo: &UserRepository, doc: &User) -> Result<Violations> {
		let mut violations = Violations::new();
		Self::check_username(repo, &doc.username, None, &mut violations).await?;
		violations.check(
			!doc.display_name.trim().is_empty(),
			"Display name is required",
		);
		Ok(violations)
	}

	async fn validate_update_object(&self, repo: &UserRepository, patch: &Patch) -> Result<Violations> {
		let mut violations = Violations::new();
		if let Some(username) = violations.field::<String>(patch, "username") {
			Self::check_username(repo, &username, patch.id(), &mut violations).await?;
		}
		if let Some(display_name) = violations.field::<String>(patch, "displayName") {
			violations.check(
				!display_name.trim().is_empty(),
				"Display name is required",
			);
		}
		violations.field::<FeatureAccess>(patch, "features");
		Ok(violations)
	}
}

pub type UserRepository = BaseRepository<User>;

impl UserRepository {
	/// Repository over the `users` collection with a unique `username` index.
	pub fn create(store: Arc<dyn DocumentStore>) -> Self {
		Self::new(store, USERS_COLLECTION, Arc::new(UserValidator))
			.with_unique_index("username")
			.with_cleaner(|patch| {
				patch.remove("createdDate");
			})
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
		self.get(Filter::eq("username", username)).await
	}
}
