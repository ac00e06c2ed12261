// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::Arc;

use crate::registry::Repositories;
use crate::store::{DocumentStore, MemoryStore, SqliteStore};
use crate::user::{FeatureAccess, User};

/// Single-connection in-memory pool; every connection to `:memory:` is its own
/// database, so the pool must never open a second one.
pub async fn create_test_pool() -> SqlitePool {
	let options = SqliteConnectOptions::from_str("sqlite::memory:").unwrap();
	SqlitePoolOptions::new()
		.max_connections(1)
		.connect_with(options)
		.await
		.unwrap()
}

pub async fn sqlite_store() -> Arc<SqliteStore> {
	let store = SqliteStore::new(create_test_pool().await);
	store.migrate().await.unwrap();
	Arc::new(store)
}

pub fn memory_store() -> Arc<MemoryStore> {
	Arc::new(MemoryStore::new())
}

pub async fn memory_repositories() -> (Arc<MemoryStore>, Repositories) {
	let store = memory_store();
	let repos = Repositories::connect(store.clone() as Arc<dyn DocumentStore>)
		.await
		.unwrap();
	(store, repos)
}

pub fn make_user(username: &str, features: FeatureAccess) -> User {
	User::new(username, username.to_uppercase(), features)
}

pub fn plain_user(username: &str) -> User {
	make_user(username, FeatureAccess::default())
}

pub fn dashboard_user(username: &str) -> User {
	make_user(
		username,
		FeatureAccess {
			dashboard: true,
			..FeatureAccess::default()
		},
	)
}
