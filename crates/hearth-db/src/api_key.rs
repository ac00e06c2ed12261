// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! API keys for programmatic access.
//!
//! Each user holds at most one key. Keys are created automatically when a user
//! with API access is inserted and removed with their owner.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::document::{DocId, Document, Patch, OWNER_FIELD};
use crate::error::Result;
use crate::filter::Filter;
use crate::repository::BaseRepository;
use crate::store::DocumentStore;
use crate::subscription::{downstream_listener, RepoListeners};
use crate::user::{User, UserRepository};
use crate::validator::{orphan_findings, ScanFinding, Validator, Violations};

pub const API_KEYS_COLLECTION: &str = "api_keys";

/// Length of the hex-encoded key material.
pub const API_KEY_LENGTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
	#[serde(rename = "_id")]
	pub id: DocId,
	pub user_id: DocId,
	pub key: String,
	pub created_date: DateTime<Utc>,
}

impl ApiKey {
	/// Fresh key for `user_id`.
	pub fn for_user(user_id: DocId) -> Self {
		Self {
			id: DocId::generate(),
			user_id,
			key: generate_key(),
			created_date: Utc::now(),
		}
	}
}

impl Document for ApiKey {
	fn id(&self) -> DocId {
		self.id
	}
}

/// 32 random bytes, hex encoded.
pub fn generate_key() -> String {
	let mut bytes = [0u8; API_KEY_LENGTH / 2];
	rand::thread_rng().fill_bytes(&mut bytes);
	hex::encode(bytes)
}

fn is_well_formed_key(key: &str) -> bool {
	key.len() == API_KEY_LENGTH && key.chars().all(|c| c.is_ascii_hexdigit())
}

pub struct ApiKeyValidator {
	users: Arc<UserRepository>,
}

#[async_trait]
impl Validator<ApiKey> for ApiKeyValidator {
	async fn validate_new_object(&self, repo: &ApiKeyRepository, doc: &ApiKey) -> Result<Violations> {
		let mut violations = Violations::new();
		violations.check(
			self.users.exists(doc.user_id).await?,
			format!("User {} does not exist", doc.user_id),
		);
		violations.check(
			repo.get_for_user(doc.user_id).await?.is_none(),
			format!("User {} already has an API key", doc.user_id),
		);
		violations.check(
			is_well_formed_key(&doc.key),
			format!("Key must be {API_KEY_LENGTH} hex characters"),
		);
		Ok(violations)
	}

	async fn validate_update_object(&self, _repo: &ApiKeyRepository, _patch: &Patch) -> Result<Violations> {
		// Every stored field is immutable; the cleaner strips them.
		Ok(Violations::new())
	}

	async fn scan(&self, _repo: &ApiKeyRepository, docs: &[ApiKey]) -> Result<Vec<ScanFinding>> {
		let users = self.users.get_all_ids_as_hash().await?;
		Ok(orphan_findings(docs, &users, |k| k.id, |k| k.user_id, "user"))
	}
}

pub type ApiKeyRepository = BaseRepository<ApiKey>;

impl ApiKeyRepository {
	/// Repository over `api_keys`, one key per user.
	pub fn create(store: Arc<dyn DocumentStore>, users: Arc<UserRepository>) -> Self {
		Self::new(store, API_KEYS_COLLECTION, Arc::new(ApiKeyValidator { users }))
			.with_unique_index(OWNER_FIELD)
			.with_cleaner(|patch| {
				patch.remove(OWNER_FIELD);
				patch.remove("key");
				patch.remove("createdDate");
			})
	}

	#[tracing::instrument(skip(self), fields(user_id = %user_id))]
	pub async fn get_for_user(&self, user_id: DocId) -> Result<Option<ApiKey>> {
		self.get(Filter::eq(OWNER_FIELD, user_id)).await
	}

	/// Listeners for the user repository: create a key for users inserted with
	/// API access, delete keys of deleted users.
	pub fn listeners_for_user_repo(self: &Arc<Self>) -> RepoListeners<User> {
		let cascade = self.cascade_delete_on::<User>(OWNER_FIELD);
		RepoListeners {
			insert_one: Some(downstream_listener(self, |repo, user: User| async move {
				if user.features.api_access {
					repo.insert_new(ApiKey::for_user(user.id)).await?;
				}
				Ok(())
			})),
			insert_many: Some(downstream_listener(self, |repo, users: Vec<User>| async move {
				let keys: Vec<ApiKey> = users
					.iter()
					.filter(|u| u.features.api_access)
					.map(|u| ApiKey::for_user(u.id))
					.collect();
				repo.insert_many(keys).await?;
				Ok(())
			})),
			..cascade
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{memory_store, plain_user};
	use proptest::prelude::*;

	async fn make_repos() -> (Arc<UserRepository>, Arc<ApiKeyRepository>) {
		let store = memory_store();
		let users = Arc::new(UserRepository::create(store.clone()));
		let keys = Arc::new(ApiKeyRepository::create(store, users.clone()));
		(users, keys)
	}

	#[tokio::test]
	async fn test_key_requires_existing_user() {
		let (_users, keys) = make_repos().await;
		let err = keys
			.insert_new(ApiKey::for_user(DocId::generate()))
			.await
			.unwrap_err();
		assert!(err.to_string().contains("does not exist"));
	}

	#[tokio::test]
	async fn test_one_key_per_user() {
		let (users, keys) = make_repos().await;
		let ada = plain_user("ada");
		users.insert_new(ada.clone()).await.unwrap();
		keys.insert_new(ApiKey::for_user(ada.id)).await.unwrap();

		let err = keys.insert_new(ApiKey::for_user(ada.id)).await.unwrap_err();
		assert!(err.to_string().contains("already has an API key"));
		assert!(keys.get_for_user(ada.id).await.unwrap().is_some());
	}

	#[tokio::test]
	async fn test_key_material_cannot_be_updated() {
		let (users, keys) = make_repos().await;
		let ada = plain_user("ada");
		users.insert_new(ada.clone()).await.unwrap();
		let key = keys
			.insert_new(ApiKey::for_user(ada.id))
			.await
			.unwrap()
			.unwrap();

		let updated = keys
			.update(Patch::for_id(key.id).set("key", "0".repeat(64)))
			.await
			.unwrap()
			.unwrap();
		assert_eq!(updated.key, key.key);
	}

	#[tokio::test]
	async fn test_scan_finds_orphaned_keys() {
		let (users, keys) = make_repos().await;
		let ada = plain_user("ada");
		users.insert_new(ada.clone()).await.unwrap();
		keys.insert_new(ApiKey::for_user(ada.id)).await.unwrap();

		// No listeners are wired here, so deleting the user leaves the key behind.
		users.delete(ada.id).await.unwrap();

		let report = keys.validate_repository_in_db(true).await.unwrap();
		assert_eq!(report.findings.len(), 1);
		let report = keys.validate_repository_in_db(false).await.unwrap();
		assert_eq!(report.deleted, 1);
		assert!(keys.get_all().await.unwrap().is_empty());
	}

	proptest! {
		#[test]
		fn generated_keys_are_well_formed(_seed in 0..64u32) {
			let key = generate_key();
			prop_assert!(is_well_formed_key(&key));
		}
	}
}
