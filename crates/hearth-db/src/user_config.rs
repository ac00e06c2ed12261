// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-user dashboard configuration.
//!
//! Collaboration is symmetric: if A lists B as a collaborator, B's config lists
//! A. The repository keeps this true by subscribing to its own changes and
//! patching the other side with `$addToSet` / `$pull`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use crate::document::{DocId, Document, Patch, TypedDocument, OWNER_FIELD};
use crate::error::Result;
use crate::family::DASHBOARD;
use crate::filter::Filter;
use crate::repository::BaseRepository;
use crate::store::{DocumentStore, UpdateOp, WriteModel};
use crate::subscription::{downstream_listener, RepoListeners, UpdateChange};
use crate::user::{User, UserRepository};
use crate::validator::{missing_ids, orphan_findings, ScanFinding, Validator, Violations};

const COLLABORATORS_FIELD: &str = "collaborators";

/// Widgets shown on a freshly created dashboard.
pub const DEFAULT_WIDGETS: &[&str] = &["tasks"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserConfig {
	#[serde(rename = "_id")]
	pub id: DocId,
	pub doc_type: String,
	pub user_id: DocId,
	#[serde(default)]
	pub collaborators: Vec<DocId>,
	#[serde(default)]
	pub enabled_widgets: Vec<String>,
	pub created_date: DateTime<Utc>,
}

impl UserConfig {
	pub fn new(user_id: DocId, collaborators: Vec<DocId>, enabled_widgets: Vec<String>) -> Self {
		Self {
			id: DocId::generate(),
			doc_type: Self::DOC_TYPE.to_string(),
			user_id,
			collaborators,
			enabled_widgets,
			created_date: Utc::now(),
		}
	}

	/// Config created alongside a new dashboard user.
	pub fn default_for(user_id: DocId) -> Self {
		Self::new(
			user_id,
			Vec::new(),
			DEFAULT_WIDGETS.iter().map(|w| w.to_string()).collect(),
		)
	}
}

impl Document for UserConfig {
	fn id(&self) -> DocId {
		self.id
	}
}

impl TypedDocument for UserConfig {
	const DOC_TYPE: &'static str = "userConfig";
}

pub struct UserConfigValidator {
	users: Arc<UserRepository>,
}

impl UserConfigValidator {
	async fn check_collaborators(
		&self,
		owner: DocId,
		collaborators: &[DocId],
		violations: &mut Violations,
	) -> Result<()> {
		violations.check(
			!collaborators.contains(&owner),
			"A user cannot collaborate with themselves",
		);
		let existing: HashSet<DocId> = self
			.users
			.get_list(collaborators)
			.await?
			.iter()
			.map(Document::id)
			.collect();
		for id in missing_ids(collaborators, &existing) {
			violations.push(format!("Collaborator {id} does not exist"));
		}
		Ok(())
	}
}

fn check_widgets(widgets: &[String], violations: &mut Violations) {
	violations.check(
		widgets.iter().all(|w| !w.trim().is_empty()),
		"Widget names cannot be empty",
	);
}

#[async_trait]
impl Validator<UserConfig> for UserConfigValidator {
	async fn validate_new_object(&self, repo: &UserConfigRepository, doc: &UserConfig) -> Result<Violations> {
		let mut violations = Violations::new();
		violations.check(
			self.users.exists(doc.user_id).await?,
			format!("User {} does not exist", doc.user_id),
		);
		violations.check(
			repo.get_for_user(doc.user_id).await?.is_none(),
			format!("User {} already has a config", doc.user_id),
		);
		self
			.check_collaborators(doc.user_id, &doc.collaborators, &mut violations)
			.await?;
		check_widgets(&doc.enabled_widgets, &mut violations);
		Ok(violations)
	}

	async fn validate_update_object(&self, repo: &UserConfigRepository, patch: &Patch) -> Result<Violations> {
		let mut violations = Violations::new();
		if let Some(collaborators) = violations.field::<Vec<DocId>>(patch, COLLABORATORS_FIELD) {
			let current = match patch.id() {
				Some(id) => repo.get_by_id(id).await?,
				None => None,
			};
			if let Some(current) = current {
				self
					.check_collaborators(current.user_id, &collaborators, &mut violations)
					.await?;
			}
		}
		if let Some(widgets) = violations.field::<Vec<String>>(patch, "enabledWidgets") {
			check_widgets(&widgets, &mut violations);
		}
		Ok(violations)
	}

	async fn scan(&self, _repo: &UserConfigRepository, docs: &[UserConfig]) -> Result<Vec<ScanFinding>> {
		let users = self.users.get_all_ids_as_hash().await?;
		let mut findings = orphan_findings(docs, &users, |c| c.id, |c| c.user_id, "user");
		for config in docs.iter().filter(|c| users.contains(&c.user_id)) {
			let dangling = missing_ids(&config.collaborators, &users);
			if dangling.is_empty() {
				continue;
			}
			let kept: Vec<DocId> = config
				.collaborators
				.iter()
				.filter(|id| users.contains(*id))
				.copied()
				.collect();
			findings.push(ScanFinding::Repair {
				id: config.id,
				patch: Patch::new().set(COLLABORATORS_FIELD, ids_to_values(&kept)),
				reason: format!("{} collaborator(s) no longer exist", dangling.len()),
			});
		}
		Ok(findings)
	}
}

fn ids_to_values(ids: &[DocId]) -> Vec<Value> {
	ids.iter().map(|id| Value::from(*id)).collect()
}

/// Writes that make the other side of each collaborator change agree with
/// `owner`'s new list.
fn sync_ops(owner: DocId, added: &[DocId], removed: &[DocId]) -> Vec<WriteModel> {
	let mut ops = Vec::new();
	if !added.is_empty() {
		ops.push(WriteModel::update_many(
			Filter::is_in(OWNER_FIELD, added.iter().copied()),
			UpdateOp::AddToSet {
				field: COLLABORATORS_FIELD.to_string(),
				values: vec![owner.into()],
			},
		));
	}
	if !removed.is_empty() {
		ops.push(WriteModel::update_many(
			Filter::is_in(OWNER_FIELD, removed.iter().copied()),
			UpdateOp::Pull {
				field: COLLABORATORS_FIELD.to_string(),
				values: vec![owner.into()],
			},
		));
	}
	ops
}

fn change_ops(change: &UpdateChange<UserConfig>) -> Vec<WriteModel> {
	let before: BTreeSet<DocId> = change.before.collaborators.iter().copied().collect();
	let after: BTreeSet<DocId> = change.after.collaborators.iter().copied().collect();
	let added: Vec<DocId> = after.difference(&before).copied().collect();
	let removed: Vec<DocId> = before.difference(&after).copied().collect();
	sync_ops(change.after.user_id, &added, &removed)
}

/// Pull `users` from every config's collaborator list.
fn forget_ops(users: &[DocId]) -> Vec<WriteModel> {
	if users.is_empty() {
		return Vec::new();
	}
	vec![WriteModel::update_many(
		Filter::is_in(COLLABORATORS_FIELD, users.iter().copied()),
		UpdateOp::Pull {
			field: COLLABORATORS_FIELD.to_string(),
			values: ids_to_values(users),
		},
	)]
}

pub type UserConfigRepository = BaseRepository<UserConfig>;

impl UserConfigRepository {
	/// Repository over `dashboard` documents tagged `userConfig`, one per user.
	pub fn create(store: Arc<dyn DocumentStore>, users: Arc<UserRepository>) -> Self {
		DASHBOARD
			.repository::<UserConfig>(store, Arc::new(UserConfigValidator { users }))
			.with_unique_index(OWNER_FIELD)
			.with_cleaner(|patch| {
				patch.remove(OWNER_FIELD);
				patch.remove("createdDate");
			})
	}

	#[tracing::instrument(skip(self), fields(user_id = %user_id))]
	pub async fn get_for_user(&self, user_id: DocId) -> Result<Option<UserConfig>> {
		self.get(Filter::eq(OWNER_FIELD, user_id)).await
	}

	/// Listeners for the user repository.
	///
	/// Dashboard users get a default config on insert. Deleting users deletes
	/// their configs and drops them from everyone's collaborators.
	pub fn listeners_for_user_repo(self: &Arc<Self>) -> RepoListeners<User> {
		RepoListeners {
			insert_one: Some(downstream_listener(self, |repo, user: User| async move {
				if user.features.dashboard {
					repo.insert_new(UserConfig::default_for(user.id)).await?;
				}
				Ok(())
			})),
			insert_many: Some(downstream_listener(self, |repo, users: Vec<User>| async move {
				let configs: Vec<UserConfig> = users
					.iter()
					.filter(|u| u.features.dashboard)
					.map(|u| UserConfig::default_for(u.id))
					.collect();
				repo.insert_many(configs).await?;
				Ok(())
			})),
			delete_one: Some(downstream_listener(self, |repo, user: User| async move {
				repo.forget_users(&[user.id]).await
			})),
			delete_list: Some(downstream_listener(self, |repo, users: Vec<User>| async move {
				let ids: Vec<DocId> = users.iter().map(Document::id).collect();
				repo.forget_users(&ids).await
			})),
			..RepoListeners::empty()
		}
	}

	async fn forget_users(&self, users: &[DocId]) -> Result<()> {
		self
			.delete_matching(Filter::is_in(OWNER_FIELD, users.iter().copied()))
			.await?;
		self.bulk_write_scoped(forget_ops(users)).await?;
		Ok(())
	}

	/// Operations giving newly configured `owners` every user that already
	/// lists them as a collaborator.
	async fn adoption_ops(&self, owners: &[DocId]) -> Result<Vec<WriteModel>> {
		let listing = self
			.find(Filter::is_in(COLLABORATORS_FIELD, owners.iter().copied()))
			.await?;
		let mut ops = Vec::new();
		for owner in owners {
			let listers: Vec<DocId> = listing
				.iter()
				.filter(|c| c.user_id != *owner && c.collaborators.contains(owner))
				.map(|c| c.user_id)
				.collect();
			if listers.is_empty() {
				continue;
			}
			ops.push(WriteModel::update_one(
				Filter::eq(OWNER_FIELD, *owner),
				UpdateOp::AddToSet {
					field: COLLABORATORS_FIELD.to_string(),
					values: ids_to_values(&listers),
				},
			));
		}
		Ok(ops)
	}

	/// Listeners this repository registers on itself to keep collaboration
	/// symmetric.
	pub fn collaborator_sync_listeners(self: &Arc<Self>) -> RepoListeners<UserConfig> {
		RepoListeners {
			insert_one: Some(downstream_listener(self, |repo, config: UserConfig| async move {
				let mut ops = sync_ops(config.user_id, &config.collaborators, &[]);
				ops.extend(repo.adoption_ops(&[config.user_id]).await?);
				repo.bulk_write_scoped(ops).await?;
				Ok(())
			})),
			insert_many: Some(downstream_listener(self, |repo, configs: Vec<UserConfig>| async move {
				let owners: Vec<DocId> = configs.iter().map(|c| c.user_id).collect();
				let mut ops: Vec<WriteModel> = configs
					.iter()
					.flat_map(|c| sync_ops(c.user_id, &c.collaborators, &[]))
					.collect();
				ops.extend(repo.adoption_ops(&owners).await?);
				repo.bulk_write_scoped(ops).await?;
				Ok(())
			})),
			update_one: Some(downstream_listener(self, |repo, change: UpdateChange<UserConfig>| async move {
				repo.bulk_write_scoped(change_ops(&change)).await?;
				Ok(())
			})),
			update_many: Some(downstream_listener(
				self,
				|repo, changes: Vec<UpdateChange<UserConfig>>| async move {
					let ops = changes.iter().flat_map(change_ops).collect();
					repo.bulk_write_scoped(ops).await?;
					Ok(())
				},
			)),
			delete_one: Some(downstream_listener(self, |repo, config: UserConfig| async move {
				repo.bulk_write_scoped(forget_ops(&[config.user_id])).await?;
				Ok(())
			})),
			delete_list: Some(downstream_listener(self, |repo, configs: Vec<UserConfig>| async move {
				let owners: Vec<DocId> = configs.iter().map(|c| c.user_id).collect();
				repo.bulk_write_scoped(forget_ops(&owners)).await?;
				Ok(())
			})),
		}
	}
}
