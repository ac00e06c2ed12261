// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Registry-level tests against both store backends.
//!
//! Each scenario is written once over `Arc<dyn DocumentStore>` and run against
//! the in-memory store and a file-backed SQLite store.

use hearth_db::{
	create_pool, ApiKey, DbError, DocId, DocumentStore, FeatureAccess, Filter, GameCharacter, GameItem,
	downstream_listener, MemoryStore, Patch, RepoListeners, Repositories, SqliteStore, Task, User,
	UserConfig,
};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

async fn sqlite_backend() -> (TempDir, Arc<dyn DocumentStore>) {
	let dir = tempfile::tempdir().unwrap();
	let url = format!("sqlite:{}", dir.path().join("hearth.db").display());
	let store = SqliteStore::new(create_pool(&url).await.unwrap());
	store.migrate().await.unwrap();
	(dir, Arc::new(store))
}

fn memory_backend() -> Arc<dyn DocumentStore> {
	Arc::new(MemoryStore::new())
}

fn features(dashboard: bool, api_access: bool, game: bool) -> FeatureAccess {
	FeatureAccess {
		dashboard,
		api_access,
		game,
	}
}

fn user(name: &str, features: FeatureAccess) -> User {
	User::new(name, format!("{name} display"), features)
}

macro_rules! both_backends {
	($name:ident, $scenario:ident) => {
		mod $name {
			use super::*;

			#[tokio::test]
			async fn memory() {
				$scenario(memory_backend()).await;
			}

			#[tokio::test]
			async fn sqlite() {
				let (_dir, store) = sqlite_backend().await;
				$scenario(store).await;
			}
		}
	};
}

async fn happy_path_with_api_key(store: Arc<dyn DocumentStore>) {
	let repos = Repositories::connect(store).await.unwrap();
	let ada = user("ada", features(false, true, false));

	let inserted = repos.users.insert_new(ada.clone()).await.unwrap();
	assert_eq!(inserted, Some(ada.clone()));
	assert_eq!(repos.users.get_by_id(ada.id).await.unwrap(), Some(ada.clone()));

	let key = repos.api_keys.get_for_user(ada.id).await.unwrap().unwrap();
	assert_eq!(key.key.len(), 64);
	assert!(repos.user_configs.get_for_user(ada.id).await.unwrap().is_none());

	assert!(repos.users.delete(ada.id).await.unwrap());
	assert!(repos.users.get_by_id(ada.id).await.unwrap().is_none());
	assert!(repos.api_keys.get_by_id(key.id).await.unwrap().is_none());
}
both_backends!(happy_path, happy_path_with_api_key);

async fn username_uniqueness(store: Arc<dyn DocumentStore>) {
	let repos = Repositories::connect(store).await.unwrap();
	repos
		.users
		.insert_new(user("ada", FeatureAccess::default()))
		.await
		.unwrap();

	let err = repos
		.users
		.insert_new(user("ada", FeatureAccess::default()))
		.await
		.unwrap_err();
	assert!(matches!(err, DbError::Validation(_)));
	assert!(repos.users.get_by_username("ada").await.unwrap().is_some());
	assert_eq!(repos.users.get_all().await.unwrap().len(), 1);

	// Both pass validation on their own; the store's unique index stops the batch.
	let err = repos
		.users
		.insert_many(vec![
			user("bob", FeatureAccess::default()),
			user("bob", FeatureAccess::default()),
		])
		.await
		.unwrap_err();
	assert!(matches!(err, DbError::Conflict(_)));
	assert!(repos.users.get_by_username("bob").await.unwrap().is_none());
}
both_backends!(uniqueness, username_uniqueness);

async fn one_config_per_user(store: Arc<dyn DocumentStore>) {
	let repos = Repositories::connect(store.clone()).await.unwrap();
	let ada = user("ada", features(true, false, false));
	repos.users.insert_new(ada.clone()).await.unwrap();
	assert!(repos.user_configs.get_for_user(ada.id).await.unwrap().is_some());

	let err = repos
		.user_configs
		.insert_new(UserConfig::default_for(ada.id))
		.await
		.unwrap_err();
	assert!(matches!(err, DbError::Validation(_)));

	// A task for the same user shares the collection but not the index partition.
	repos
		.tasks
		.insert_new(Task::new(ada.id, "unaffected"))
		.await
		.unwrap();
}
both_backends!(config_uniqueness, one_config_per_user);

async fn cascade_reaches_every_level(store: Arc<dyn DocumentStore>) {
	let repos = Repositories::connect(store).await.unwrap();
	let ada = user("ada", features(true, true, true));
	let bob = user("bob", features(true, false, false));
	repos
		.users
		.insert_many(vec![ada.clone(), bob.clone()])
		.await
		.unwrap();

	let hero = GameCharacter::new(ada.id, "hero");
	repos.characters.insert_new(hero.clone()).await.unwrap();
	repos
		.items
		.insert_many(vec![
			GameItem::new(hero.id, "sword", 1),
			GameItem::new(hero.id, "potion", 5),
		])
		.await
		.unwrap();
	let owned = Task::new(ada.id, "ada's task").shared_with(vec![bob.id]);
	let shared = Task::new(bob.id, "bob's task").shared_with(vec![ada.id]);
	repos
		.tasks
		.insert_many(vec![owned.clone(), shared.clone()])
		.await
		.unwrap();
	let ada_config = repos.user_configs.get_for_user(ada.id).await.unwrap().unwrap();
	repos
		.user_configs
		.update(Patch::for_id(ada_config.id).set("collaborators", json!([bob.id])))
		.await
		.unwrap();

	assert_eq!(repos.users.delete_list(&[ada.id]).await.unwrap(), 1);

	assert!(repos.api_keys.get_for_user(ada.id).await.unwrap().is_none());
	assert!(repos.user_configs.get_for_user(ada.id).await.unwrap().is_none());
	assert!(repos.characters.get_all_for_user(ada.id).await.unwrap().is_empty());
	assert!(repos.items.get_all().await.unwrap().is_empty());
	assert!(repos.tasks.get_by_id(owned.id).await.unwrap().is_none());

	let survivor = repos.tasks.get_by_id(shared.id).await.unwrap().unwrap();
	assert!(survivor.shared_with.is_empty());
	let bob_config = repos.user_configs.get_for_user(bob.id).await.unwrap().unwrap();
	assert!(bob_config.collaborators.is_empty());
}
both_backends!(cascade_completeness, cascade_reaches_every_level);

async fn partitions_are_isolated(store: Arc<dyn DocumentStore>) {
	let repos = Repositories::connect(store).await.unwrap();
	let ada = user("ada", features(true, false, false));
	repos.users.insert_new(ada.clone()).await.unwrap();
	let task = repos
		.tasks
		.insert_new(Task::new(ada.id, "isolated"))
		.await
		.unwrap()
		.unwrap();
	let config = repos.user_configs.get_for_user(ada.id).await.unwrap().unwrap();

	assert!(repos.user_configs.get_by_id(task.id).await.unwrap().is_none());
	assert!(repos.tasks.get_by_id(config.id).await.unwrap().is_none());
	assert_eq!(repos.tasks.get_all().await.unwrap().len(), 1);
	assert_eq!(repos.user_configs.get_all().await.unwrap().len(), 1);
	assert!(repos.tasks.get_all_ids_as_hash().await.unwrap().contains(&task.id));
	assert!(!repos.tasks.get_all_ids_as_hash().await.unwrap().contains(&config.id));

	assert!(!repos.tasks.delete(config.id).await.unwrap());
	assert!(repos.user_configs.get_by_id(config.id).await.unwrap().is_some());

	let mut wrong_tag = Task::new(ada.id, "mislabelled");
	wrong_tag.doc_type = "userConfig".to_string();
	assert!(matches!(
		repos.tasks.insert_new(wrong_tag).await,
		Err(DbError::Validation(_))
	));
}
both_backends!(partition_isolation, partitions_are_isolated);

async fn updates_strip_protected_fields(store: Arc<dyn DocumentStore>) {
	let repos = Repositories::connect(store).await.unwrap();
	let ada = user("ada", FeatureAccess::default());
	let bob = user("bob", FeatureAccess::default());
	repos
		.users
		.insert_many(vec![ada.clone(), bob.clone()])
		.await
		.unwrap();
	let task = repos
		.tasks
		.insert_new(Task::new(ada.id, "original"))
		.await
		.unwrap()
		.unwrap();

	let patch = Patch::for_id(task.id)
		.set("title", "renamed")
		.set("docType", "userConfig")
		.set("userId", bob.id)
		.set("createdDate", "2000-01-01T00:00:00Z");
	let updated = repos.tasks.update(patch).await.unwrap().unwrap();

	assert_eq!(updated.id, task.id);
	assert_eq!(updated.title, "renamed");
	assert_eq!(updated.doc_type, "task");
	assert_eq!(updated.user_id, ada.id);
	assert_eq!(updated.created_date, task.created_date);
}
both_backends!(update_stripping, updates_strip_protected_fields);

async fn collaboration_stays_symmetric(store: Arc<dyn DocumentStore>) {
	let repos = Repositories::connect(store).await.unwrap();
	let dashboard = features(true, false, false);
	let ada = user("ada", dashboard);
	let bob = user("bob", dashboard);
	let eve = user("eve", dashboard);
	repos
		.users
		.insert_many(vec![ada.clone(), bob.clone(), eve.clone()])
		.await
		.unwrap();

	let ada_config = repos.user_configs.get_for_user(ada.id).await.unwrap().unwrap();
	let eve_config = repos.user_configs.get_for_user(eve.id).await.unwrap().unwrap();
	repos
		.user_configs
		.update_many(vec![
			Patch::for_id(ada_config.id).set("collaborators", json!([bob.id])),
			Patch::for_id(eve_config.id).set("collaborators", json!([bob.id])),
		])
		.await
		.unwrap();

	let mut bob_collaborators = repos
		.user_configs
		.get_for_user(bob.id)
		.await
		.unwrap()
		.unwrap()
		.collaborators;
	bob_collaborators.sort();
	let mut expected = vec![ada.id, eve.id];
	expected.sort();
	assert_eq!(bob_collaborators, expected);

	repos.users.delete(eve.id).await.unwrap();
	let bob_config = repos.user_configs.get_for_user(bob.id).await.unwrap().unwrap();
	assert_eq!(bob_config.collaborators, vec![ada.id]);
}
both_backends!(collaborator_symmetry, collaboration_stays_symmetric);

async fn late_config_inherits_collaborators(store: Arc<dyn DocumentStore>) {
	let repos = Repositories::connect(store).await.unwrap();
	let ada = user("ada", features(true, false, false));
	let bob = user("bob", FeatureAccess::default());
	repos
		.users
		.insert_many(vec![ada.clone(), bob.clone()])
		.await
		.unwrap();
	assert!(repos.user_configs.get_for_user(bob.id).await.unwrap().is_none());

	let ada_config = repos.user_configs.get_for_user(ada.id).await.unwrap().unwrap();
	repos
		.user_configs
		.update(Patch::for_id(ada_config.id).set("collaborators", json!([bob.id])))
		.await
		.unwrap();

	repos
		.user_configs
		.insert_new(UserConfig::default_for(bob.id))
		.await
		.unwrap();
	let bob_config = repos.user_configs.get_for_user(bob.id).await.unwrap().unwrap();
	assert_eq!(bob_config.collaborators, vec![ada.id]);
}
both_backends!(late_collaborator_config, late_config_inherits_collaborators);

async fn validation_collects_all_violations(store: Arc<dyn DocumentStore>) {
	let repos = Repositories::connect(store).await.unwrap();
	let patch = Patch::new().set("username", "x");
	match repos.users.update(patch).await.unwrap_err() {
		DbError::Validation(v) => {
			assert_eq!(v.violations.len(), 2);
			assert_eq!(v.violations[0], "_id is required");
			assert_eq!(v.object, json!({ "username": "x" }));
		}
		other => panic!("unexpected error: {other}"),
	}

	let ghost = DocId::generate();
	let mut task = Task::new(ghost, "");
	task.shared_with = vec![ghost];
	match repos.tasks.insert_new(task).await.unwrap_err() {
		DbError::Validation(v) => assert_eq!(v.violations.len(), 4),
		other => panic!("unexpected error: {other}"),
	}
}
both_backends!(validation_aggregation, validation_collects_all_violations);

async fn dry_run_scan_makes_no_writes(store: Arc<dyn DocumentStore>) {
	let repos = Repositories::connect(store.clone()).await.unwrap();
	let ada = user("ada", FeatureAccess::default());
	repos.users.insert_new(ada.clone()).await.unwrap();
	repos
		.api_keys
		.insert_new(ApiKey::for_user(ada.id))
		.await
		.unwrap();
	repos
		.tasks
		.insert_new(Task::new(ada.id, "orphan soon"))
		.await
		.unwrap();
	// Removed underneath the repositories, so no cascade runs.
	store
		.delete_one("users", &Filter::id(ada.id))
		.await
		.unwrap();

	let reports = repos.validate_all(true).await.unwrap();
	let findings: usize = reports.iter().map(|r| r.findings.len()).sum();
	assert_eq!(findings, 2);
	assert!(reports.iter().all(|r| r.deleted == 0 && r.repaired == 0));
	assert_eq!(repos.api_keys.get_all().await.unwrap().len(), 1);
	assert_eq!(repos.tasks.get_all().await.unwrap().len(), 1);

	let reports = repos.validate_all(false).await.unwrap();
	let deleted: u64 = reports.iter().map(|r| r.deleted).sum();
	assert_eq!(deleted, 2);
	assert!(repos.api_keys.get_all().await.unwrap().is_empty());
	assert!(repos.tasks.get_all().await.unwrap().is_empty());
}
both_backends!(dry_run_scan, dry_run_scan_makes_no_writes);

async fn scan_removes_undecodable_documents(store: Arc<dyn DocumentStore>) {
	let repos = Repositories::connect(store.clone()).await.unwrap();
	let ada = user("ada", features(true, false, false));
	repos.users.insert_new(ada.clone()).await.unwrap();
	let task = Task::new(ada.id, "keep me");
	repos.tasks.insert_new(task.clone()).await.unwrap();

	let mut raw = serde_json::Map::new();
	raw.insert("_id".to_string(), json!(DocId::generate()));
	raw.insert("docType".to_string(), json!("task"));
	store.insert_one("dashboard", raw).await.unwrap();

	assert_eq!(repos.tasks.get_all().await.unwrap(), vec![task.clone()]);

	let dry = repos.tasks.validate_repository_in_db(true).await.unwrap();
	assert_eq!(dry.findings.len(), 1);
	assert!(dry.findings[0].reason().starts_with("undecodable"));
	assert_eq!(dry.deleted, 0);

	let live = repos.tasks.validate_repository_in_db(false).await.unwrap();
	assert_eq!(live.deleted, 1);
	assert!(repos.tasks.validate_repository_in_db(true).await.unwrap().is_clean());
	assert_eq!(repos.tasks.get_all().await.unwrap(), vec![task]);
	assert!(repos.users.get_by_id(ada.id).await.unwrap().is_some());
}
both_backends!(undecodable_scan, scan_removes_undecodable_documents);

async fn store_index_rejects_bypassing_duplicate(store: Arc<dyn DocumentStore>) {
	let repos = Repositories::connect(store.clone()).await.unwrap();
	let ada = user("ada", FeatureAccess::default());
	repos.users.insert_new(ada.clone()).await.unwrap();

	let mut raw = serde_json::Map::new();
	raw.insert("_id".to_string(), json!(DocId::generate()));
	raw.insert("username".to_string(), json!("ada"));
	let err = store.insert_one("users", raw).await.unwrap_err();
	assert!(matches!(err, DbError::Conflict(_)));
}
both_backends!(store_unique_index, store_index_rejects_bypassing_duplicate);

#[tokio::test]
async fn unacknowledged_insert_returns_none() {
	let store = Arc::new(MemoryStore::new());
	let repos = Repositories::connect(store.clone()).await.unwrap();
	store.set_acknowledge_writes(false);

	let ada = user("ada", features(true, true, false));
	assert!(repos.users.insert_new(ada.clone()).await.unwrap().is_none());
	assert!(repos
		.users
		.insert_many(vec![user("bob", FeatureAccess::default())])
		.await
		.unwrap()
		.is_none());

	store.set_acknowledge_writes(true);
	assert!(repos.users.get_all().await.unwrap().is_empty());
	assert!(repos.api_keys.get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn parent_is_gone_when_delete_listeners_run() {
	let store = Arc::new(MemoryStore::new());
	let repos = Repositories::connect(store.clone()).await.unwrap();
	let ada = user("ada", FeatureAccess::default());
	repos.users.insert_new(ada.clone()).await.unwrap();

	let observed = Arc::new(std::sync::Mutex::new(None));
	let sink = observed.clone();
	let users = repos.users.clone();
	repos
		.users
		.subscribe_to_changes(RepoListeners {
			delete_one: Some(downstream_listener(&users, move |users, deleted: User| {
				let sink = sink.clone();
				async move {
					let present = users.get_by_id(deleted.id).await?.is_some();
					*sink.lock().unwrap() = Some(present);
					Ok(())
				}
			})),
			..RepoListeners::empty()
		})
		.await;

	repos.users.delete(ada.id).await.unwrap();
	assert_eq!(*observed.lock().unwrap(), Some(false));
}
