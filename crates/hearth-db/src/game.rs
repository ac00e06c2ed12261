// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Game state: characters owned by users, items owned by characters.
//!
//! Items are grandchildren of a user. Deleting a user deletes their characters
//! through `delete_list`, which in turn deletes the characters' items.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::document::{DocId, Document, Patch, TypedDocument, OWNER_FIELD};
use crate::error::Result;
use crate::family::GAME;
use crate::filter::Filter;
use crate::repository::BaseRepository;
use crate::store::DocumentStore;
use crate::subscription::RepoListeners;
use crate::user::{User, UserRepository};
use crate::validator::{orphan_findings, ScanFinding, Validator, Violations};

const CHARACTER_FIELD: &str = "characterId";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameCharacter {
	#[serde(rename = "_id")]
	pub id: DocId,
	pub doc_type: String,
	pub user_id: DocId,
	pub name: String,
	pub level: u32,
}

impl GameCharacter {
	pub fn new(user_id: DocId, name: impl Into<String>) -> Self {
		Self {
			id: DocId::generate(),
			doc_type: Self::DOC_TYPE.to_string(),
			user_id,
			name: name.into(),
			level: 1,
		}
	}
}

impl Document for GameCharacter {
	fn id(&self) -> DocId {
		self.id
	}
}

impl TypedDocument for GameCharacter {
	const DOC_TYPE: &'static str = "character";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameItem {
	#[serde(rename = "_id")]
	pub id: DocId,
	pub doc_type: String,
	pub character_id: DocId,
	pub name: String,
	pub quantity: i64,
}

impl GameItem {
	pub fn new(character_id: DocId, name: impl Into<String>, quantity: i64) -> Self {
		Self {
			id: DocId::generate(),
			doc_type: Self::DOC_TYPE.to_string(),
			character_id,
			name: name.into(),
			quantity,
		}
	}
}

impl Document for GameItem {
	fn id(&self) -> DocId {
		self.id
	}
}

impl TypedDocument for GameItem {
	const DOC_TYPE: &'static str = "item";
}

fn check_name(name: &str, violations: &mut Violations) {
	violations.check(!name.trim().is_empty(), "Name is required");
}

fn check_level(level: u32, violations: &mut Violations) {
	violations.check(level >= 1, "Level must be at least 1");
}

fn check_quantity(quantity: i64, violations: &mut Violations) {
	violations.check(quantity >= 0, "Quantity cannot be negative");
}

pub struct GameCharacterValidator {
	users: Arc<UserRepository>,
}

#[async_trait]
impl Validator<GameCharacter> for GameCharacterValidator {
	async fn validate_new_object(
		&self,
		_repo: &GameCharacterRepository,
		doc: &GameCharacter,
	) -> Result<Violations> {
		let mut violations = Violations::new();
		violations.check(
			self.users.exists(doc.user_id).await?,
			format!("User {} does not exist", doc.user_id),
		);
		check_name(&doc.name, &mut violations);
		check_level(doc.level, &mut violations);
		Ok(violations)
	}

	async fn validate_update_object(
		&self,
		_repo: &GameCharacterRepository,
		patch: &Patch,
	) -> Result<Violations> {
		let mut violations = Violations::new();
		if let Some(name) = violations.field::<String>(patch, "name") {
			check_name(&name, &mut violations);
		}
		if let Some(level) = violations.field::<u32>(patch, "level") {
			check_level(level, &mut violations);
		}
		Ok(violations)
	}

	async fn scan(&self, _repo: &GameCharacterRepository, docs: &[GameCharacter]) -> Result<Vec<ScanFinding>> {
		let users = self.users.get_all_ids_as_hash().await?;
		Ok(orphan_findings(docs, &users, |c| c.id, |c| c.user_id, "user"))
	}
}

pub type GameCharacterRepository = BaseRepository<GameCharacter>;

impl GameCharacterRepository {
	/// Repository over `game` documents tagged `character`.
	pub fn create(store: Arc<dyn DocumentStore>, users: Arc<UserRepository>) -> Self {
		GAME
			.repository::<GameCharacter>(store, Arc::new(GameCharacterValidator { users }))
			.with_cleaner(|patch| {
				patch.remove(OWNER_FIELD);
			})
	}

	#[tracing::instrument(skip(self), fields(user_id = %user_id))]
	pub async fn get_all_for_user(&self, user_id: DocId) -> Result<Vec<GameCharacter>> {
		self.find(Filter::eq(OWNER_FIELD, user_id)).await
	}

	/// Listeners for the user repository: deleting users deletes their
	/// characters.
	pub fn listeners_for_user_repo(self: &Arc<Self>) -> RepoListeners<User> {
		self.cascade_delete_on(OWNER_FIELD)
	}
}

pub struct GameItemValidator {
	characters: Arc<GameCharacterRepository>,
}

#[async_trait]
impl Validator<GameItem> for GameItemValidator {
	async fn validate_new_object(&self, _repo: &GameItemRepository, doc: &GameItem) -> Result<Violations> {
		let mut violations = Violations::new();
		violations.check(
			self.characters.exists(doc.character_id).await?,
			format!("Character {} does not exist", doc.character_id),
		);
		check_name(&doc.name, &mut violations);
		check_quantity(doc.quantity, &mut violations);
		Ok(violations)
	}

	async fn validate_update_object(&self, _repo: &GameItemRepository, patch: &Patch) -> Result<Violations> {
		let mut violations = Violations::new();
		if let Some(name) = violations.field::<String>(patch, "name") {
			check_name(&name, &mut violations);
		}
		if let Some(quantity) = violations.field::<i64>(patch, "quantity") {
			check_quantity(quantity, &mut violations);
		}
		Ok(violations)
	}

	async fn scan(&self, _repo: &GameItemRepository, docs: &[GameItem]) -> Result<Vec<ScanFinding>> {
		let characters = self.characters.get_all_ids_as_hash().await?;
		Ok(orphan_findings(docs, &characters, |i| i.id, |i| i.character_id, "character"))
	}
}

pub type GameItemRepository = BaseRepository<GameItem>;

impl GameItemRepository {
	/// Repository over `game` documents tagged `item`.
	pub fn create(store: Arc<dyn DocumentStore>, characters: Arc<GameCharacterRepository>) -> Self {
		GAME
			.repository::<GameItem>(store, Arc::new(GameItemValidator { characters }))
			.with_cleaner(|patch| {
				patch.remove(CHARACTER_FIELD);
			})
	}

	#[tracing::instrument(skip(self), fields(character_id = %character_id))]
	pub async fn get_for_character(&self, character_id: DocId) -> Result<Vec<GameItem>> {
		self.find(Filter::eq(CHARACTER_FIELD, character_id)).await
	}

	/// Listeners for the character repository: deleting characters deletes
	/// their items.
	pub fn listeners_for_character_repo(self: &Arc<Self>) -> RepoListeners<GameCharacter> {
		self.cascade_delete_on(CHARACTER_FIELD)
	}
}
