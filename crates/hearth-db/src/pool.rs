// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::sqlite::{
	SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::str::FromStr;
use std::time::Duration;

use crate::error::DbError;

/// How long a connection waits on a lock held by another process (the live
/// application, when a maintenance scan runs beside it) before failing.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Writes are serialized inside [`crate::SqliteStore`], so extra connections
/// only serve concurrent reads during a cascade.
const MAX_CONNECTIONS: u32 = 4;

/// Open the pool backing a [`crate::SqliteStore`].
///
/// Connections use WAL journaling with `synchronous = NORMAL` and wait up to
/// [`BUSY_TIMEOUT`] on locks. The database file is created if missing.
///
/// # Arguments
/// * `database_url` - SQLite connection string (e.g., "sqlite:./hearth.db")
///
/// # Errors
/// Returns `DbError::Internal` if the URL is invalid, `DbError::Sqlx` if the
/// connection fails.
#[tracing::instrument(skip(database_url))]
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, DbError> {
	let options = SqliteConnectOptions::from_str(database_url)
		.map_err(|e| DbError::Internal(format!("Invalid database URL: {e}")))?
		.journal_mode(SqliteJournalMode::Wal)
		.synchronous(SqliteSynchronous::Normal)
		.busy_timeout(BUSY_TIMEOUT)
		.create_if_missing(true);

	let pool = SqlitePoolOptions::new()
		.max_connections(MAX_CONNECTIONS)
		.connect_with(options)
		.await?;

	tracing::debug!(busy_timeout_ms = BUSY_TIMEOUT.as_millis() as u64, "document database pool ready");
	Ok(pool)
}
