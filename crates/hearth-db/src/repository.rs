// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Generic repository over one physical collection.
//!
//! [`BaseRepository`] owns validation, partition scoping, update sanitization
//! and listener dispatch. Every mutation follows the same sequence:
//!
//! 1. validate (all violations aggregated into one error)
//! 2. write to the store
//! 3. run the registered listeners concurrently and wait for all of them
//!
//! Listener failures propagate to the caller; the triggering write is not
//! rolled back.

use futures::future::try_join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};

use crate::document::{from_raw, raw_id, to_raw, DocId, Document, Partition, Patch, RawDocument, ID_FIELD};
use crate::error::{DbError, Result};
use crate::filter::Filter;
use crate::store::{DocumentStore, UniqueIndex, UpdateOp, WriteAck, WriteModel};
use crate::subscription::{downstream_listener, fan_out, RepoListeners, Subscribers, UpdateChange};
use crate::validator::{ScanFinding, ScanReport, Validator, Violations};

/// Strips fields that callers may never set through `update`.
pub type Cleaner = Arc<dyn Fn(&mut Patch) + Send + Sync>;

pub struct BaseRepository<T: Document> {
	store: Arc<dyn DocumentStore>,
	collection: String,
	partition: Option<Partition>,
	default_filter: Filter,
	validator: Arc<dyn Validator<T>>,
	cleaner: Option<Cleaner>,
	unique_indexes: Vec<UniqueIndex>,
	prepared: OnceCell<()>,
	subscribers: RwLock<Subscribers<T>>,
}

impl<T: Document> BaseRepository<T> {
	/// Create a repository over a physical collection.
	///
	/// # Arguments
	/// * `store` - Backing document store
	/// * `collection` - Physical collection name
	/// * `validator` - Business rules run before every write
	pub fn new(
		store: Arc<dyn DocumentStore>,
		collection: impl Into<String>,
		validator: Arc<dyn Validator<T>>,
	) -> Self {
		Self {
			store,
			collection: collection.into(),
			partition: None,
			default_filter: Filter::all(),
			validator,
			cleaner: None,
			unique_indexes: Vec::new(),
			prepared: OnceCell::new(),
			subscribers: RwLock::new(Subscribers::default()),
		}
	}

	/// Scope the repository to one tagged sub-collection.
	///
	/// Reads and writes only see documents carrying the tag; inserts must carry
	/// it and updates can never change it.
	pub fn with_partition(mut self, partition: Partition) -> Self {
		self.default_filter = self
			.default_filter
			.and(Filter::eq(partition.field.clone(), partition.value.clone()));
		self.partition = Some(partition);
		self
	}

	/// Add a filter merged into every query. The default wins on conflict.
	pub fn with_default_filter(mut self, filter: Filter) -> Self {
		self.default_filter = self.default_filter.and(filter);
		self
	}

	pub fn with_cleaner(mut self, cleaner: impl Fn(&mut Patch) + Send + Sync + 'static) -> Self {
		self.cleaner = Some(Arc::new(cleaner));
		self
	}

	/// Declare a field unique within this repository's partition.
	pub fn with_unique_index(mut self, field: impl Into<String>) -> Self {
		self.unique_indexes.push(UniqueIndex {
			field: field.into(),
			partition: self.partition.clone(),
		});
		self
	}

	pub fn collection_name(&self) -> &str {
		&self.collection
	}

	pub fn partition(&self) -> Option<&Partition> {
		self.partition.as_ref()
	}

	pub fn default_filter(&self) -> &Filter {
		&self.default_filter
	}

	/// Human-readable name, `collection` or `collection/docType`.
	pub fn label(&self) -> String {
		match &self.partition {
			Some(partition) => format!("{}/{}", self.collection, partition.value),
			None => self.collection.clone(),
		}
	}

	/// Merge the default filter into a caller filter.
	pub fn scope(&self, filter: Filter) -> Filter {
		filter.scoped(&self.default_filter)
	}

	/// Register listeners for this repository's mutations.
	///
	/// Registration is permanent for the repository's lifetime.
	#[tracing::instrument(skip(self, listeners), fields(repository = %self.label()))]
	pub async fn subscribe_to_changes(&self, listeners: RepoListeners<T>) {
		let events = listeners.events();
		self.subscribers.write().await.push(listeners);
		tracing::debug!(?events, "listeners registered");
	}

	pub async fn subscriber_count(&self) -> usize {
		self.subscribers.read().await.len()
	}

	async fn prepare(&self) -> Result<()> {
		self
			.prepared
			.get_or_try_init(|| async {
				self
					.store
					.open_collection(&self.collection, &self.unique_indexes)
					.await?;
				tracing::debug!(repository = %self.label(), "collection prepared");
				Ok::<(), DbError>(())
			})
			.await?;
		Ok(())
	}

	async fn check_new(&self, doc: &T) -> Result<()> {
		let mut violations = Violations::new();
		if let Some(partition) = &self.partition {
			violations.check(
				partition.contains(&to_raw(doc)?),
				format!("{} must be '{}'", partition.field, partition.value),
			);
		}
		violations.extend(self.validator.validate_new_object(self, doc).await?);
		violations.into_result(doc)
	}

	async fn check_update(&self, patch: &Patch) -> Result<()> {
		let mut violations = Violations::new();
		violations.check(patch.id().is_some(), format!("{ID_FIELD} is required"));
		violations.extend(self.validator.validate_update_object(self, patch).await?);
		violations.into_result(patch)
	}

	fn clean(&self, mut patch: Patch) -> RawDocument {
		patch.remove(ID_FIELD);
		if let Some(partition) = &self.partition {
			patch.remove(&partition.field);
		}
		if let Some(cleaner) = &self.cleaner {
			cleaner(&mut patch);
		}
		patch.into_inner()
	}

	/// Validate and insert one document, then run insert-one listeners.
	///
	/// # Returns
	/// The inserted document, or `None` when the store did not acknowledge the
	/// write.
	///
	/// # Errors
	/// `DbError::Validation` with every violation, `DbError::Conflict` when the
	/// store rejects a duplicate, or the first listener failure.
	#[tracing::instrument(skip(self, doc), fields(repository = %self.label(), id = %doc.id()))]
	pub async fn insert_new(&self, doc: T) -> Result<Option<T>> {
		self.prepare().await?;
		self.check_new(&doc).await?;

		let ack = self
			.store
			.insert_one(&self.collection, to_raw(&doc)?)
			.await?;
		if !ack.acknowledged {
			tracing::warn!("insert not acknowledged");
			return Ok(None);
		}
		tracing::debug!("document inserted");

		let listeners = self.subscribers.read().await.select(|s| s.insert_one.as_ref());
		fan_out(listeners, doc.clone()).await?;
		Ok(Some(doc))
	}

	/// Validate every document concurrently, insert them in one batch, then run
	/// insert-many listeners. Any violation aborts before the write.
	#[tracing::instrument(skip(self, docs), fields(repository = %self.label(), count = docs.len()))]
	pub async fn insert_many(&self, docs: Vec<T>) -> Result<Option<Vec<T>>> {
		if docs.is_empty() {
			return Ok(Some(docs));
		}
		self.prepare().await?;
		try_join_all(docs.iter().map(|doc| self.check_new(doc))).await?;

		let raws = docs.iter().map(to_raw).collect::<Result<Vec<_>>>()?;
		let ack = self.store.insert_many(&self.collection, raws).await?;
		if !ack.acknowledged {
			tracing::warn!("bulk insert not acknowledged");
			return Ok(None);
		}
		tracing::debug!(inserted = ack.inserted_ids.len(), "documents inserted");

		let listeners = self.subscribers.read().await.select(|s| s.insert_many.as_ref());
		fan_out(listeners, docs.clone()).await?;
		Ok(Some(docs))
	}

	/// First document matching `filter` within the partition.
	pub async fn get(&self, filter: Filter) -> Result<Option<T>> {
		self.prepare().await?;
		self
			.store
			.find_one(&self.collection, &self.scope(filter))
			.await?
			.map(from_raw)
			.transpose()
	}

	/// Every document matching `filter` within the partition.
	///
	/// Documents that no longer decode as `T` are skipped with a warning;
	/// [`validate_repository_in_db`](Self::validate_repository_in_db) reports
	/// and removes them.
	pub async fn find(&self, filter: Filter) -> Result<Vec<T>> {
		self.prepare().await?;
		let raws = self
			.store
			.find(&self.collection, &self.scope(filter))
			.await?;
		let mut docs = Vec::with_capacity(raws.len());
		for raw in raws {
			match from_raw::<T>(raw) {
				Ok(doc) => docs.push(doc),
				Err(e) => tracing::warn!(repository = %self.label(), error = %e, "skipping undecodable document"),
			}
		}
		Ok(docs)
	}

	pub async fn get_by_id(&self, id: DocId) -> Result<Option<T>> {
		self.get(Filter::id(id)).await
	}

	pub async fn exists(&self, id: DocId) -> Result<bool> {
		Ok(self.get_by_id(id).await?.is_some())
	}

	pub async fn get_all(&self) -> Result<Vec<T>> {
		self.find(Filter::all()).await
	}

	pub async fn get_list(&self, ids: &[DocId]) -> Result<Vec<T>> {
		if ids.is_empty() {
			return Ok(Vec::new());
		}
		self.find(Filter::ids(ids)).await
	}

	/// Every identifier in the partition.
	pub async fn get_all_ids_as_hash(&self) -> Result<HashSet<DocId>> {
		self.prepare().await?;
		let raws = self
			.store
			.find(&self.collection, &self.default_filter)
			.await?;
		let mut ids = HashSet::with_capacity(raws.len());
		for raw in &raws {
			let id = raw_id(raw)?;
			match DocId::parse(id) {
				Some(id) => {
					ids.insert(id);
				}
				None => tracing::warn!(repository = %self.label(), id, "skipping malformed identifier"),
			}
		}
		Ok(ids)
	}

	/// Delete one document, then run delete-one listeners with its last state.
	///
	/// # Returns
	/// `true` if a document was removed.
	#[tracing::instrument(skip(self), fields(repository = %self.label()))]
	pub async fn delete(&self, id: DocId) -> Result<bool> {
		let Some(doc) = self.get_by_id(id).await? else {
			return Ok(false);
		};
		let ack = self
			.store
			.delete_one(&self.collection, &self.scope(Filter::id(id)))
			.await?;
		if !ack.acknowledged || ack.deleted == 0 {
			return Ok(false);
		}
		tracing::debug!("document deleted");

		let listeners = self.subscribers.read().await.select(|s| s.delete_one.as_ref());
		fan_out(listeners, doc).await?;
		Ok(true)
	}

	/// Delete the listed documents, then run delete-list listeners once.
	///
	/// # Returns
	/// The number of documents removed.
	pub async fn delete_list(&self, ids: &[DocId]) -> Result<u64> {
		if ids.is_empty() {
			return Ok(0);
		}
		self.delete_matching(Filter::ids(ids)).await
	}

	/// Delete every document matching `filter` within the partition.
	///
	/// Dispatches to delete-list listeners, so cascades continue into the
	/// next level.
	#[tracing::instrument(skip(self, filter), fields(repository = %self.label()))]
	pub async fn delete_matching(&self, filter: Filter) -> Result<u64> {
		let docs = self.find(filter).await?;
		if docs.is_empty() {
			return Ok(0);
		}
		let ids: Vec<DocId> = docs.iter().map(Document::id).collect();
		let ack = self
			.store
			.delete_many(&self.collection, &self.scope(Filter::ids(&ids)))
			.await?;
		if !ack.acknowledged {
			tracing::warn!("bulk delete not acknowledged");
			return Ok(0);
		}
		tracing::debug!(deleted = ack.deleted, "documents deleted");

		let listeners = self.subscribers.read().await.select(|s| s.delete_list.as_ref());
		fan_out(listeners, docs).await?;
		Ok(ack.deleted)
	}

	/// Delete listeners for a parent repository: when parents are deleted,
	/// every document of this repository whose `field` names one of them is
	/// deleted too.
	pub fn cascade_delete_on<P: Document>(self: &Arc<Self>, field: &'static str) -> RepoListeners<P> {
		RepoListeners {
			delete_one: Some(downstream_listener(self, move |repo, parent: P| async move {
				repo.delete_matching(Filter::eq(field, parent.id())).await?;
				Ok(())
			})),
			delete_list: Some(downstream_listener(self, move |repo, parents: Vec<P>| async move {
				let ids: Vec<DocId> = parents.iter().map(Document::id).collect();
				repo.delete_matching(Filter::is_in(field, ids)).await?;
				Ok(())
			})),
			..RepoListeners::empty()
		}
	}

	/// Apply a partial update to the document named by the patch's `_id`.
	///
	/// The identifier, the partition tag and every cleaner-excluded field are
	/// stripped before the merge. Update-one listeners receive the state before
	/// and after.
	///
	/// # Returns
	/// The updated document, or `None` if the target is not in the partition or
	/// the write was not acknowledged.
	#[tracing::instrument(skip(self, patch), fields(repository = %self.label(), id = ?patch.id()))]
	pub async fn update(&self, patch: Patch) -> Result<Option<T>> {
		self.prepare().await?;
		self.check_update(&patch).await?;
		let id = patch
			.id()
			.ok_or_else(|| DbError::Internal(format!("{ID_FIELD} vanished after validation")))?;

		let Some(before) = self.get_by_id(id).await? else {
			return Ok(None);
		};
		let fields = self.clean(patch);
		if fields.is_empty() {
			return Ok(Some(before));
		}

		let ack = self
			.store
			.update_one(
				&self.collection,
				&self.scope(Filter::id(id)),
				&UpdateOp::Set(fields),
			)
			.await?;
		if !ack.acknowledged {
			tracing::warn!("update not acknowledged");
			return Ok(None);
		}
		let Some(after) = self.get_by_id(id).await? else {
			return Ok(None);
		};
		tracing::debug!(modified = ack.modified, "document updated");

		let listeners = self.subscribers.read().await.select(|s| s.update_one.as_ref());
		fan_out(
			listeners,
			UpdateChange {
				before,
				after: after.clone(),
			},
		)
		.await?;
		Ok(Some(after))
	}

	/// Validate every patch concurrently, apply them in one bulk write, then
	/// run update-many listeners once.
	#[tracing::instrument(skip(self, patches), fields(repository = %self.label(), count = patches.len()))]
	pub async fn update_many(&self, patches: Vec<Patch>) -> Result<Option<Vec<T>>> {
		if patches.is_empty() {
			return Ok(Some(Vec::new()));
		}
		self.prepare().await?;
		try_join_all(patches.iter().map(|patch| self.check_update(patch))).await?;
		self.apply_patches(patches).await
	}

	async fn apply_patches(&self, patches: Vec<Patch>) -> Result<Option<Vec<T>>> {
		let ids: Vec<DocId> = patches.iter().filter_map(Patch::id).collect();
		let mut before: HashMap<DocId, T> = self
			.get_list(&ids)
			.await?
			.into_iter()
			.map(|doc| (doc.id(), doc))
			.collect();

		let mut ops = Vec::with_capacity(patches.len());
		for patch in patches {
			let Some(id) = patch.id().filter(|id| before.contains_key(id)) else {
				continue;
			};
			let fields = self.clean(patch);
			if !fields.is_empty() {
				ops.push(WriteModel::update_one(
					self.scope(Filter::id(id)),
					UpdateOp::Set(fields),
				));
			}
		}
		if !ops.is_empty() {
			let ack = self.store.bulk_write(&self.collection, ops).await?;
			if !ack.acknowledged {
				tracing::warn!(repository = %self.label(), "bulk update not acknowledged");
				return Ok(None);
			}
			tracing::debug!(repository = %self.label(), modified = ack.modified, "documents updated");
		}

		let after = self.get_list(&ids).await?;
		let changes: Vec<UpdateChange<T>> = after
			.iter()
			.filter_map(|doc| {
				before.remove(&doc.id()).map(|previous| UpdateChange {
					before: previous,
					after: doc.clone(),
				})
			})
			.collect();

		let listeners = self.subscribers.read().await.select(|s| s.update_many.as_ref());
		fan_out(listeners, changes).await?;
		Ok(Some(after))
	}

	/// Raw bulk write with the partition applied to every filter.
	///
	/// Skips validation and listeners; used by cascades that keep references
	/// consistent.
	pub(crate) async fn bulk_write_scoped(&self, ops: Vec<WriteModel>) -> Result<WriteAck> {
		if ops.is_empty() {
			return Ok(WriteAck {
				acknowledged: true,
				..WriteAck::default()
			});
		}
		self.prepare().await?;
		let scoped = ops
			.into_iter()
			.map(|op| WriteModel {
				filter: self.scope(op.filter),
				..op
			})
			.collect();
		self.store.bulk_write(&self.collection, scoped).await
	}

	/// Remove every document in the partition without running listeners.
	#[cfg(any(test, feature = "test-support"))]
	pub async fn delete_all(&self) -> Result<u64> {
		self.prepare().await?;
		let ack = self
			.store
			.delete_many(&self.collection, &self.default_filter)
			.await?;
		Ok(ack.deleted)
	}

	/// Scan every stored document for integrity problems.
	///
	/// A dry run only reports. A live run deletes flagged documents through
	/// [`delete_list`](Self::delete_list), so cascades still run, and applies
	/// the repair patches to the rest.
	#[tracing::instrument(skip(self), fields(repository = %self.label()))]
	pub async fn validate_repository_in_db(&self, dry_run: bool) -> Result<ScanReport> {
		self.prepare().await?;
		let raws = self
			.store
			.find(&self.collection, &self.default_filter)
			.await?;
		let scanned = raws.len();
		let (docs, mut findings) = self.decode_for_scan(raws);
		let undecodable: Vec<DocId> = findings.iter().map(ScanFinding::id).collect();
		findings.extend(self.validator.scan(self, &docs).await?);
		for finding in &findings {
			tracing::warn!(%finding, "integrity problem");
		}

		let mut report = ScanReport {
			repository: self.label(),
			dry_run,
			scanned,
			findings,
			deleted: 0,
			repaired: 0,
		};
		if dry_run || report.is_clean() {
			tracing::info!(scanned = report.scanned, findings = report.findings.len(), dry_run, "scan finished");
			return Ok(report);
		}

		let deletions: Vec<DocId> = report
			.findings
			.iter()
			.filter_map(|f| match f {
				ScanFinding::Delete { id, .. } if !undecodable.contains(id) => Some(*id),
				_ => None,
			})
			.collect();
		let repairs: Vec<Patch> = report
			.findings
			.iter()
			.filter_map(|f| match f {
				ScanFinding::Repair { id, patch, .. } if !deletions.contains(id) => {
					Some(patch.clone().set(ID_FIELD, *id))
				}
				_ => None,
			})
			.collect();

		report.deleted = self.purge_undecodable(&undecodable).await?;
		report.deleted += self.delete_list(&deletions).await?;
		if !repairs.is_empty() {
			if let Some(updated) = self.apply_patches(repairs).await? {
				report.repaired = updated.len() as u64;
			}
		}
		tracing::info!(
			scanned = report.scanned,
			deleted = report.deleted,
			repaired = report.repaired,
			"scan applied"
		);
		Ok(report)
	}

	/// Split raw documents into decoded ones and delete findings for the rest.
	fn decode_for_scan(&self, raws: Vec<RawDocument>) -> (Vec<T>, Vec<ScanFinding>) {
		let mut docs = Vec::with_capacity(raws.len());
		let mut findings = Vec::new();
		for raw in raws {
			let Some(id) = raw_id(&raw).ok().and_then(DocId::parse) else {
				tracing::warn!(repository = %self.label(), "skipping document without a usable identifier");
				continue;
			};
			match from_raw::<T>(raw) {
				Ok(doc) => docs.push(doc),
				Err(e) => findings.push(ScanFinding::Delete {
					id,
					reason: format!("undecodable: {e}"),
				}),
			}
		}
		(docs, findings)
	}

	/// Remove documents that no longer decode. No listeners run since there is
	/// no typed value to hand them.
	async fn purge_undecodable(&self, ids: &[DocId]) -> Result<u64> {
		if ids.is_empty() {
			return Ok(0);
		}
		let ack = self
			.store
			.delete_many(&self.collection, &self.scope(Filter::ids(ids)))
			.await?;
		tracing::warn!(deleted = ack.deleted, "undecodable documents removed");
		Ok(ack.deleted)
	}
}
