// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! # hearth-db
//!
//! Typed document repositories over a MongoDB-like [`DocumentStore`], with
//! referential integrity kept by validators and cascading listeners.
//!
//! ## Repository Pattern
//!
//! Every document type gets a [`BaseRepository<T>`] configured with:
//! - a physical collection, optionally split by `docType` through a
//!   [`CollectionFamily`]
//! - a [`Validator<T>`] run before every write
//! - a cleaner stripping fields `update` may never touch
//! - unique indexes the store enforces
//!
//! Concrete repositories are type aliases with inherent methods:
//!
//! ```rust,ignore
//! pub type FooRepository = BaseRepository<Foo>;
//!
//! impl FooRepository {
//!     pub fn create(store: Arc<dyn DocumentStore>, users: Arc<UserRepository>) -> Self { ... }
//!     pub fn listeners_for_user_repo(self: &Arc<Self>) -> RepoListeners<User> { ... }
//! }
//! ```
//!
//! ## Cascades
//!
//! A downstream repository exposes a `listeners_for_*_repo` factory;
//! [`Repositories::connect`] registers it on the upstream and records the edge
//! in a [`CascadeGraph`]. Listeners run after the write commits, concurrently,
//! and are awaited before the mutating call returns. Deletes cascade through
//! each level's `delete_list`, so grandchildren are reached.
//!
//! ## Error Handling
//!
//! | Variant | When |
//! |---------|------|
//! | `Validation` | A write broke business rules; lists every violation |
//! | `Conflict` | The store rejected a duplicate on a unique index |
//! | `NotFound` | A named repository does not exist |
//! | `Sqlx` | SQLite backend failure |
//! | `Internal` | Corrupt stored data |
//!
//! Reads return `Option`/empty for absence. Writes the store did not
//! acknowledge return `Ok(None)`.
//!
//! ## Testing
//!
//! Unit tests run against [`MemoryStore`] and an in-memory SQLite
//! [`SqliteStore`]; prefer `proptest` for invariants.

pub mod api_key;
pub mod document;
pub mod error;
pub mod family;
pub mod filter;
pub mod game;
pub mod pool;
pub mod registry;
pub mod repository;
pub mod store;
pub mod subscription;
pub mod task;
pub mod user;
pub mod user_config;
pub mod validator;

#[cfg(test)]
pub mod testing;

pub use api_key::{ApiKey, ApiKeyRepository};
pub use document::{DocId, Document, Partition, Patch, RawDocument, TypedDocument};
pub use error::{DbError, Result, ValidationError};
pub use family::{CollectionFamily, DASHBOARD, GAME};
pub use filter::Filter;
pub use game::{GameCharacter, GameCharacterRepository, GameItem, GameItemRepository};
pub use pool::{create_pool, BUSY_TIMEOUT};
pub use registry::{CascadeEdge, CascadeGraph, Repositories};
pub use repository::BaseRepository;
pub use store::{DocumentStore, MemoryStore, SqliteStore, UpdateOp, WriteModel};
pub use subscription::{downstream_listener, listener, Listener, ListenerEvent, RepoListeners, UpdateChange};
pub use task::{Task, TaskRepository};
pub use user::{FeatureAccess, User, UserRepository};
pub use user_config::{UserConfig, UserConfigRepository};
pub use validator::{ScanFinding, ScanReport, Validator, Violations};
