// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Startup wiring of every repository and the cascade graph between them.
//!
//! [`Repositories::connect`] builds each repository once, registers every
//! downstream listener set on its upstream and records the edge in a
//! [`CascadeGraph`]. The result is passed around by reference; a process-wide
//! instance is available through [`Repositories::init_global`].

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::api_key::ApiKeyRepository;
use crate::document::Document;
use crate::error::{DbError, Result};
use crate::game::{GameCharacterRepository, GameItemRepository};
use crate::repository::BaseRepository;
use crate::store::DocumentStore;
use crate::subscription::{ListenerEvent, RepoListeners};
use crate::task::TaskRepository;
use crate::user::UserRepository;
use crate::user_config::UserConfigRepository;
use crate::validator::ScanReport;

static GLOBAL: OnceCell<Repositories> = OnceCell::const_new();

/// One registered listener set: `downstream` reacts to `events` on `upstream`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeEdge {
	pub upstream: String,
	pub downstream: String,
	pub events: Vec<ListenerEvent>,
}

/// Every listener registration, as data.
#[derive(Debug, Clone, Default)]
pub struct CascadeGraph {
	edges: Vec<CascadeEdge>,
}

impl CascadeGraph {
	/// Register `listeners` on `upstream` and record the edge.
	pub async fn link<U: Document>(
		&mut self,
		upstream: &BaseRepository<U>,
		downstream: impl Into<String>,
		listeners: RepoListeners<U>,
	) {
		let edge = CascadeEdge {
			upstream: upstream.label(),
			downstream: downstream.into(),
			events: listeners.events(),
		};
		tracing::debug!(upstream = %edge.upstream, downstream = %edge.downstream, "cascade linked");
		upstream.subscribe_to_changes(listeners).await;
		self.edges.push(edge);
	}

	pub fn edges(&self) -> &[CascadeEdge] {
		&self.edges
	}

	/// Repositories listening directly to `upstream`.
	pub fn dependents_of(&self, upstream: &str) -> Vec<&str> {
		self
			.edges
			.iter()
			.filter(|e| e.upstream == upstream)
			.map(|e| e.downstream.as_str())
			.collect()
	}

	/// Every repository a mutation on `root` can reach, in breadth-first order,
	/// excluding `root` itself.
	pub fn reachable_from(&self, root: &str) -> Vec<String> {
		let mut seen = BTreeSet::from([root.to_string()]);
		let mut queue = VecDeque::from([root.to_string()]);
		let mut order = Vec::new();
		while let Some(current) = queue.pop_front() {
			for next in self.dependents_of(&current) {
				if seen.insert(next.to_string()) {
					order.push(next.to_string());
					queue.push_back(next.to_string());
				}
			}
		}
		order
	}
}

/// Every repository, wired.
#[derive(Clone)]
pub struct Repositories {
	pub users: Arc<UserRepository>,
	pub api_keys: Arc<ApiKeyRepository>,
	pub user_configs: Arc<UserConfigRepository>,
	pub tasks: Arc<TaskRepository>,
	pub characters: Arc<GameCharacterRepository>,
	pub items: Arc<GameItemRepository>,
	graph: CascadeGraph,
}

impl Repositories {
	/// Build every repository over `store` and wire the cascade graph.
	#[tracing::instrument(skip(store))]
	pub async fn connect(store: Arc<dyn DocumentStore>) -> Result<Self> {
		let users = Arc::new(UserRepository::create(store.clone()));
		let api_keys = Arc::new(ApiKeyRepository::create(store.clone(), users.clone()));
		let user_configs = Arc::new(UserConfigRepository::create(store.clone(), users.clone()));
		let tasks = Arc::new(TaskRepository::create(store.clone(), users.clone()));
		let characters = Arc::new(GameCharacterRepository::create(store.clone(), users.clone()));
		let items = Arc::new(GameItemRepository::create(store, characters.clone()));

		let mut graph = CascadeGraph::default();
		graph
			.link(users.as_ref(), api_keys.label(), api_keys.listeners_for_user_repo())
			.await;
		graph
			.link(users.as_ref(), user_configs.label(), user_configs.listeners_for_user_repo())
			.await;
		graph
			.link(users.as_ref(), tasks.label(), tasks.listeners_for_user_repo())
			.await;
		graph
			.link(users.as_ref(), characters.label(), characters.listeners_for_user_repo())
			.await;
		graph
			.link(characters.as_ref(), items.label(), items.listeners_for_character_repo())
			.await;
		graph
			.link(
				user_configs.as_ref(),
				user_configs.label(),
				user_configs.collaborator_sync_listeners(),
			)
			.await;

		tracing::info!(edges = graph.edges().len(), "repositories wired");
		Ok(Self {
			users,
			api_keys,
			user_configs,
			tasks,
			characters,
			items,
			graph,
		})
	}

	/// Connect the process-wide registry. Later calls return the first
	/// instance and ignore `store`.
	pub async fn init_global(store: Arc<dyn DocumentStore>) -> Result<&'static Repositories> {
		GLOBAL.get_or_try_init(|| Self::connect(store)).await
	}

	/// The process-wide registry, if `init_global` has completed.
	pub fn global() -> Option<&'static Repositories> {
		GLOBAL.get()
	}

	pub fn cascade_graph(&self) -> &CascadeGraph {
		&self.graph
	}

	/// Repository labels, parents before children.
	pub fn repository_names(&self) -> Vec<String> {
		vec![
			self.users.label(),
			self.api_keys.label(),
			self.user_configs.label(),
			self.tasks.label(),
			self.characters.label(),
			self.items.label(),
		]
	}

	/// Scan every repository, parents first so a live run cascades before the
	/// children are inspected.
	pub async fn validate_all(&self, dry_run: bool) -> Result<Vec<ScanReport>> {
		let mut reports = Vec::new();
		for name in self.repository_names() {
			reports.push(self.validate_named(&name, dry_run).await?);
		}
		Ok(reports)
	}

	/// Scan one repository by label, e.g. `users` or `dashboard/task`.
	pub async fn validate_named(&self, name: &str, dry_run: bool) -> Result<ScanReport> {
		if name == self.users.label() {
			self.users.validate_repository_in_db(dry_run).await
		} else if name == self.api_keys.label() {
			self.api_keys.validate_repository_in_db(dry_run).await
		} else if name == self.user_configs.label() {
			self.user_configs.validate_repository_in_db(dry_run).await
		} else if name == self.tasks.label() {
			self.tasks.validate_repository_in_db(dry_run).await
		} else if name == self.characters.label() {
			self.characters.validate_repository_in_db(dry_run).await
		} else if name == self.items.label() {
			self.items.validate_repository_in_db(dry_run).await
		} else {
			Err(DbError::NotFound(format!("repository '{name}'")))
		}
	}
}
