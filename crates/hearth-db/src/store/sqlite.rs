// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SQLite-backed document store.
//!
//! Every collection shares one `documents` table holding JSON bodies. Filters
//! are evaluated in process over the loaded rows; a top-level `_id` clause is
//! pushed down to the primary key so point lookups read only their rows. A
//! bulk write loads the collection once and applies its operations in order
//! against that snapshot. Unique indexes are partial expression indexes over
//! `json_extract`, so SQLite itself rejects duplicates even when two writers
//! race past their validators.
//!
//! Write transactions are serialized per store: a deferred transaction that
//! reads before writing would otherwise fail with `SQLITE_BUSY_SNAPSHOT` when
//! another connection commits in between.

use async_trait::async_trait;
use sqlx::{sqlite::SqlitePool, QueryBuilder, Row, Sqlite, Transaction};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{DeleteAck, DocumentStore, InsertAck, UniqueIndex, UpdateOp, WriteAck, WriteModel};
use crate::document::{raw_id, RawDocument, ID_FIELD};
use crate::error::{DbError, Result};
use crate::filter::Filter;

/// Document store persisting into a SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
	pool: SqlitePool,
	writes: Arc<Mutex<()>>,
}

impl SqliteStore {
	/// Create a store over an existing pool.
	///
	/// # Arguments
	/// * `pool` - SQLite connection pool (see [`crate::create_pool`])
	pub fn new(pool: SqlitePool) -> Self {
		Self {
			pool,
			writes: Arc::new(Mutex::new(())),
		}
	}

	/// Create the `documents` table if it does not exist yet.
	#[tracing::instrument(skip(self))]
	pub async fn migrate(&self) -> Result<()> {
		sqlx::query(
			r#"
			CREATE TABLE IF NOT EXISTS documents (
				collection TEXT NOT NULL,
				id TEXT NOT NULL,
				body TEXT NOT NULL,
				PRIMARY KEY (collection, id)
			)
			"#,
		)
		.execute(&self.pool)
		.await?;

		tracing::debug!("documents table ready");
		Ok(())
	}

	/// Rows of `collection` that may match `filter`, in insertion order.
	async fn load(&self, collection: &str, filter: &Filter) -> Result<Vec<(String, RawDocument)>> {
		let mut query = select_documents(collection, filter);
		let rows = query.build().fetch_all(&self.pool).await?;
		rows.iter().map(parse_document_row).collect()
	}
}

async fn load_in_tx(
	tx: &mut Transaction<'_, Sqlite>,
	collection: &str,
	filter: &Filter,
) -> Result<Vec<(String, RawDocument)>> {
	let mut query = select_documents(collection, filter);
	let rows = query.build().fetch_all(&mut **tx).await?;
	rows.iter().map(parse_document_row).collect()
}

/// String ids a filter pins through a top-level `_id` clause.
fn pinned_ids(filter: &Filter) -> Option<Vec<String>> {
	match filter {
		Filter::Eq(field, value) if field == ID_FIELD => value.as_str().map(|id| vec![id.to_string()]),
		Filter::In(field, values) if field == ID_FIELD => values
			.iter()
			.map(|value| value.as_str().map(str::to_string))
			.collect(),
		Filter::And(clauses) => clauses.iter().find_map(pinned_ids),
		_ => None,
	}
}

fn select_documents(collection: &str, filter: &Filter) -> QueryBuilder<'static, Sqlite> {
	let mut query = QueryBuilder::new("SELECT id, body FROM documents WHERE collection = ");
	query.push_bind(collection.to_string());
	match pinned_ids(filter) {
		Some(ids) if ids.is_empty() => {
			query.push(" AND 0");
		}
		Some(ids) => {
			query.push(" AND id IN (");
			let mut separated = query.separated(", ");
			for id in ids {
				separated.push_bind(id);
			}
			separated.push_unseparated(")");
		}
		None => {}
	}
	query.push(" ORDER BY rowid");
	query
}

async fn insert_in_tx(
	tx: &mut Transaction<'_, Sqlite>,
	collection: &str,
	doc: &RawDocument,
) -> Result<String> {
	let id = raw_id(doc)?.to_string();
	let body = serde_json::to_string(&*doc)?;
	sqlx::query("INSERT INTO documents (collection, id, body) VALUES (?, ?, ?)")
		.bind(collection)
		.bind(&id)
		.bind(body)
		.execute(&mut **tx)
		.await
		.map_err(map_write_error)?;
	Ok(id)
}

/// Apply `op` to the loaded rows and persist the ones it changes. `docs`
/// stays current so later operations of the same bulk write see the result.
async fn apply_in_tx(
	tx: &mut Transaction<'_, Sqlite>,
	collection: &str,
	docs: &mut [(String, RawDocument)],
	op: &WriteModel,
) -> Result<WriteAck> {
	let mut ack = WriteAck {
		acknowledged: true,
		..WriteAck::default()
	};
	for (id, doc) in docs.iter_mut().filter(|entry| op.filter.matches(&entry.1)) {
		ack.matched += 1;
		if op.update.apply(doc)? {
			let body = serde_json::to_string(&*doc)?;
			sqlx::query("UPDATE documents SET body = ? WHERE collection = ? AND id = ?")
				.bind(body)
				.bind(collection)
				.bind(id.as_str())
				.execute(&mut **tx)
				.await
				.map_err(map_write_error)?;
			ack.modified += 1;
		}
		if !op.many {
			break;
		}
	}
	Ok(ack)
}

fn parse_document_row(row: &sqlx::sqlite::SqliteRow) -> Result<(String, RawDocument)> {
	let id: String = row.get("id");
	let body: String = row.get("body");
	let doc: RawDocument = serde_json::from_str(&body)
		.map_err(|e| DbError::Internal(format!("Invalid document body for {id}: {e}")))?;
	Ok((id, doc))
}

fn map_write_error(err: sqlx::Error) -> DbError {
	let conflict = err
		.as_database_error()
		.filter(|e| e.is_unique_violation())
		.map(|e| e.message().to_string());
	match conflict {
		Some(message) => DbError::Conflict(message),
		None => DbError::Sqlx(err),
	}
}

fn sql_identifier(value: &str) -> Result<&str> {
	if !value.is_empty()
		&& value
			.chars()
			.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
	{
		Ok(value)
	} else {
		Err(DbError::Internal(format!("Invalid index field name: {value}")))
	}
}

fn sql_literal(value: &str) -> String {
	format!("'{}'", value.replace('\'', "''"))
}

fn index_statement(collection: &str, index: &UniqueIndex) -> Result<String> {
	let field = sql_identifier(&index.field)?;
	let mut predicate = format!("collection = {}", sql_literal(collection));
	if let Some(partition) = &index.partition {
		let partition_field = sql_identifier(&partition.field)?;
		predicate.push_str(&format!(
			" AND json_extract(body, '$.{partition_field}') = {}",
			sql_literal(&partition.value)
		));
	}
	Ok(format!(
		"CREATE UNIQUE INDEX IF NOT EXISTS {} ON documents (json_extract(body, '$.{field}')) WHERE {predicate}",
		index.name(collection)
	))
}

#[async_trait]
impl DocumentStore for SqliteStore {
	#[tracing::instrument(skip(self, indexes), fields(collection = %collection))]
	async fn open_collection(&self, collection: &str, indexes: &[UniqueIndex]) -> Result<()> {
		self.migrate().await?;
		let _guard = self.writes.lock().await;
		for index in indexes {
			let statement = index_statement(collection, index)?;
			sqlx::query(&statement)
				.execute(&self.pool)
				.await
				.map_err(map_write_error)?;
			tracing::debug!(index = %index.name(collection), "unique index ready");
		}
		Ok(())
	}

	async fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<RawDocument>> {
		Ok(self
			.load(collection, filter)
			.await?
			.into_iter()
			.map(|(_, doc)| doc)
			.find(|doc| filter.matches(doc)))
	}

	async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<RawDocument>> {
		Ok(self
			.load(collection, filter)
			.await?
			.into_iter()
			.map(|(_, doc)| doc)
			.filter(|doc| filter.matches(doc))
			.collect())
	}

	async fn insert_one(&self, collection: &str, doc: RawDocument) -> Result<InsertAck> {
		let _guard = self.writes.lock().await;
		let mut tx = self.pool.begin().await?;
		let id = insert_in_tx(&mut tx, collection, &doc).await?;
		tx.commit().await?;
		Ok(InsertAck {
			acknowledged: true,
			inserted_ids: vec![id],
		})
	}

	async fn insert_many(&self, collection: &str, docs: Vec<RawDocument>) -> Result<InsertAck> {
		let _guard = self.writes.lock().await;
		let mut tx = self.pool.begin().await?;
		let mut inserted_ids = Vec::with_capacity(docs.len());
		for doc in &docs {
			inserted_ids.push(insert_in_tx(&mut tx, collection, doc).await?);
		}
		tx.commit().await?;
		Ok(InsertAck {
			acknowledged: true,
			inserted_ids,
		})
	}

	async fn update_one(
		&self,
		collection: &str,
		filter: &Filter,
		update: &UpdateOp,
	) -> Result<WriteAck> {
		self
			.bulk_write(
				collection,
				vec![WriteModel::update_one(filter.clone(), update.clone())],
			)
			.await
	}

	async fn bulk_write(&self, collection: &str, ops: Vec<WriteModel>) -> Result<WriteAck> {
		let _guard = self.writes.lock().await;
		let mut tx = self.pool.begin().await?;
		let scope = ops
			.iter()
			.map(|op| pinned_ids(&op.filter))
			.collect::<Option<Vec<_>>>()
			.map_or_else(Filter::all, |ids| Filter::is_in(ID_FIELD, ids.into_iter().flatten()));
		let mut docs = load_in_tx(&mut tx, collection, &scope).await?;
		let mut total = WriteAck {
			acknowledged: true,
			..WriteAck::default()
		};
		for op in &ops {
			let ack = apply_in_tx(&mut tx, collection, &mut docs, op).await?;
			total.matched += ack.matched;
			total.modified += ack.modified;
		}
		tx.commit().await?;
		Ok(total)
	}

	async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<DeleteAck> {
		let _guard = self.writes.lock().await;
		let target = self
			.load(collection, filter)
			.await?
			.into_iter()
			.find(|(_, doc)| filter.matches(doc));
		let Some((id, _)) = target else {
			return Ok(DeleteAck {
				acknowledged: true,
				deleted: 0,
			});
		};
		let result = sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
			.bind(collection)
			.bind(&id)
			.execute(&self.pool)
			.await?;
		Ok(DeleteAck {
			acknowledged: true,
			deleted: result.rows_affected(),
		})
	}

	async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<DeleteAck> {
		let _guard = self.writes.lock().await;
		let mut tx = self.pool.begin().await?;
		let targets: Vec<String> = load_in_tx(&mut tx, collection, filter)
			.await?
			.into_iter()
			.filter(|(_, doc)| filter.matches(doc))
			.map(|(id, _)| id)
			.collect();
		let mut deleted = 0;
		for id in &targets {
			let result = sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
				.bind(collection)
				.bind(id)
				.execute(&mut *tx)
				.await?;
			deleted += result.rows_affected();
		}
		tx.commit().await?;
		Ok(DeleteAck {
			acknowledged: true,
			deleted,
		})
	}
}
