// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Dashboard tasks, owned by one user and optionally shared with others.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

use crate::document::{DocId, Document, Patch, TypedDocument, OWNER_FIELD};
use crate::error::Result;
use crate::family::DASHBOARD;
use crate::filter::Filter;
use crate::repository::BaseRepository;
use crate::store::{DocumentStore, UpdateOp, WriteModel};
use crate::subscription::{downstream_listener, RepoListeners};
use crate::user::{User, UserRepository};
use crate::validator::{missing_ids, orphan_findings, ScanFinding, Validator, Violations};

const SHARED_WITH_FIELD: &str = "sharedWith";

pub const MAX_TITLE_LENGTH: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
	#[serde(rename = "_id")]
	pub id: DocId,
	pub doc_type: String,
	pub user_id: DocId,
	pub title: String,
	#[serde(default)]
	pub description: String,
	#[serde(default)]
	pub completed: bool,
	#[serde(default)]
	pub shared_with: Vec<DocId>,
	pub created_date: DateTime<Utc>,
}

impl Task {
	pub fn new(user_id: DocId, title: impl Into<String>) -> Self {
		Self {
			id: DocId::generate(),
			doc_type: Self::DOC_TYPE.to_string(),
			user_id,
			title: title.into(),
			description: String::new(),
			completed: false,
			shared_with: Vec::new(),
			created_date: Utc::now(),
		}
	}

	pub fn shared_with(mut self, users: Vec<DocId>) -> Self {
		self.shared_with = users;
		self
	}
}

impl Document for Task {
	fn id(&self) -> DocId {
		self.id
	}
}

impl TypedDocument for Task {
	const DOC_TYPE: &'static str = "task";
}

fn check_title(title: &str, violations: &mut Violations) {
	violations.check(!title.trim().is_empty(), "Title is required");
	violations.check(
		title.chars().count() <= MAX_TITLE_LENGTH,
		format!("Title must be at most {MAX_TITLE_LENGTH} characters"),
	);
}

pub struct TaskValidator {
	users: Arc<UserRepository>,
}

impl TaskValidator {
	async fn check_shares(&self, owner: DocId, shared_with: &[DocId], violations: &mut Violations) -> Result<()> {
		violations.check(
			!shared_with.contains(&owner),
			"A task cannot be shared with its owner",
		);
		let existing: HashSet<DocId> = self
			.users
			.get_list(shared_with)
			.await?
			.iter()
			.map(Document::id)
			.collect();
		for id in missing_ids(shared_with, &existing) {
			violations.push(format!("Shared user {id} does not exist"));
		}
		Ok(())
	}
}

#[async_trait]
impl Validator<Task> for TaskValidator {
	async fn validate_new_object(&self, _repo: &TaskRepository, doc: &Task) -> Result<Violations> {
		let mut violations = Violations::new();
		violations.check(
			self.users.exists(doc.user_id).await?,
			format!("User {} does not exist", doc.user_id),
		);
		check_title(&doc.title, &mut violations);
		self
			.check_shares(doc.user_id, &doc.shared_with, &mut violations)
			.await?;
		Ok(violations)
	}

	async fn validate_update_object(&self, repo: &TaskRepository, patch: &Patch) -> Result<Violations> {
		let mut violations = Violations::new();
		if let Some(title) = violations.field::<String>(patch, "title") {
			check_title(&title, &mut violations);
		}
		violations.field::<String>(patch, "description");
		violations.field::<bool>(patch, "completed");
		if let Some(shared_with) = violations.field::<Vec<DocId>>(patch, SHARED_WITH_FIELD) {
			let current = match patch.id() {
				Some(id) => repo.get_by_id(id).await?,
				None => None,
			};
			if let Some(current) = current {
				self
					.check_shares(current.user_id, &shared_with, &mut violations)
					.await?;
			}
		}
		Ok(violations)
	}

	async fn scan(&self, _repo: &TaskRepository, docs: &[Task]) -> Result<Vec<ScanFinding>> {
		let users = self.users.get_all_ids_as_hash().await?;
		let mut findings = orphan_findings(docs, &users, |t| t.id, |t| t.user_id, "user");
		for task in docs.iter().filter(|t| users.contains(&t.user_id)) {
			let dangling = missing_ids(&task.shared_with, &users);
			if dangling.is_empty() {
				continue;
			}
			let kept: Vec<Value> = task
				.shared_with
				.iter()
				.filter(|id| users.contains(*id))
				.map(|id| Value::from(*id))
				.collect();
			findings.push(ScanFinding::Repair {
				id: task.id,
				patch: Patch::new().set(SHARED_WITH_FIELD, kept),
				reason: format!("shared with {} user(s) that no longer exist", dangling.len()),
			});
		}
		Ok(findings)
	}
}

pub type TaskRepository = BaseRepository<Task>;

impl TaskRepository {
	/// Repository over `dashboard` documents tagged `task`.
	pub fn create(store: Arc<dyn DocumentStore>, users: Arc<UserRepository>) -> Self {
		DASHBOARD
			.repository::<Task>(store, Arc::new(TaskValidator { users }))
			.with_cleaner(|patch| {
				patch.remove(OWNER_FIELD);
				patch.remove("createdDate");
			})
	}

	/// Tasks the user owns or that are shared with them.
	#[tracing::instrument(skip(self), fields(user_id = %user_id))]
	pub async fn get_all_for_user(&self, user_id: DocId) -> Result<Vec<Task>> {
		self
			.find(Filter::eq(OWNER_FIELD, user_id).or(Filter::eq(SHARED_WITH_FIELD, user_id)))
			.await
	}

	/// Listeners for the user repository: deleting users deletes the tasks they
	/// own and removes them from every task shared with them.
	pub fn listeners_for_user_repo(self: &Arc<Self>) -> RepoListeners<User> {
		RepoListeners {
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
		self
			.bulk_write_scoped(vec![WriteModel::update_many(
				Filter::is_in(SHARED_WITH_FIELD, users.iter().copied()),
				UpdateOp::Pull {
					field: SHARED_WITH_FIELD.to_string(),
					values: users.iter().map(|id| Value::from(*id)).collect(),
				},
			)])
			.await?;
		Ok(())
	}
}
