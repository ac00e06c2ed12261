// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Cross-repository change listeners.
//!
//! A repository that owns documents referencing another repository's documents
//! builds a [`RepoListeners`] set and registers it on the upstream repository.
//! The upstream never names its dependents; it only runs whatever was
//! registered after each committed mutation.

use futures::future::{self, BoxFuture};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::error::Result;

/// Async side-effecting callback receiving the affected document(s).
pub type Listener<A> = Arc<dyn Fn(A) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Wrap an async closure as a [`Listener`].
pub fn listener<A, F, Fut>(f: F) -> Listener<A>
where
	F: Fn(A) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<()>> + Send + 'static,
{
	Arc::new(move |arg: A| -> BoxFuture<'static, Result<()>> { Box::pin(f(arg)) })
}

/// Wrap an async closure that acts on a downstream repository.
///
/// The listener only holds a weak reference, so an upstream repository never
/// keeps its dependents alive. Once the downstream is dropped the listener is
/// a no-op.
pub fn downstream_listener<R, A, F, Fut>(repo: &Arc<R>, f: F) -> Listener<A>
where
	R: Send + Sync + 'static,
	F: Fn(Arc<R>, A) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<()>> + Send + 'static,
{
	let weak = Arc::downgrade(repo);
	Arc::new(move |arg: A| -> BoxFuture<'static, Result<()>> {
		match weak.upgrade() {
			Some(repo) => Box::pin(f(repo, arg)),
			None => Box::pin(future::ready(Ok(()))),
		}
	})
}

/// Document state around an update.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateChange<T> {
	pub before: T,
	pub after: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerEvent {
	InsertOne,
	InsertMany,
	UpdateOne,
	UpdateMany,
	DeleteOne,
	DeleteList,
}

impl fmt::Display for ListenerEvent {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ListenerEvent::InsertOne => write!(f, "insert_one"),
			ListenerEvent::InsertMany => write!(f, "insert_many"),
			ListenerEvent::UpdateOne => write!(f, "update_one"),
			ListenerEvent::UpdateMany => write!(f, "update_many"),
			ListenerEvent::DeleteOne => write!(f, "delete_one"),
			ListenerEvent::DeleteList => write!(f, "delete_list"),
		}
	}
}

/// One listener per mutation kind, each optional.
///
/// Delete listeners receive the documents as they were before removal.
pub struct RepoListeners<T> {
	pub insert_one: Option<Listener<T>>,
	pub insert_many: Option<Listener<Vec<T>>>,
	pub update_one: Option<Listener<UpdateChange<T>>>,
	pub update_many: Option<Listener<Vec<UpdateChange<T>>>>,
	pub delete_one: Option<Listener<T>>,
	pub delete_list: Option<Listener<Vec<T>>>,
}

impl<T> RepoListeners<T> {
	/// A listener set with every slot empty.
	pub fn empty() -> Self {
		Self {
			insert_one: None,
			insert_many: None,
			update_one: None,
			update_many: None,
			delete_one: None,
			delete_list: None,
		}
	}

	/// Events this set reacts to.
	pub fn events(&self) -> Vec<ListenerEvent> {
		[
			(self.insert_one.is_some(), ListenerEvent::InsertOne),
			(self.insert_many.is_some(), ListenerEvent::InsertMany),
			(self.update_one.is_some(), ListenerEvent::UpdateOne),
			(self.update_many.is_some(), ListenerEvent::UpdateMany),
			(self.delete_one.is_some(), ListenerEvent::DeleteOne),
			(self.delete_list.is_some(), ListenerEvent::DeleteList),
		]
		.into_iter()
		.filter_map(|(present, event)| present.then_some(event))
		.collect()
	}
}

impl<T> Default for RepoListeners<T> {
	fn default() -> Self {
		Self::empty()
	}
}

impl<T> Clone for RepoListeners<T> {
	fn clone(&self) -> Self {
		Self {
			insert_one: self.insert_one.clone(),
			insert_many: self.insert_many.clone(),
			update_one: self.update_one.clone(),
			update_many: self.update_many.clone(),
			delete_one: self.delete_one.clone(),
			delete_list: self.delete_list.clone(),
		}
	}
}

/// Every listener set registered on one repository.
pub(crate) struct Subscribers<T> {
	sets: Vec<RepoListeners<T>>,
}

impl<T> Default for Subscribers<T> {
	fn default() -> Self {
		Self { sets: Vec::new() }
	}
}

impl<T> Subscribers<T> {
	pub(crate) fn push(&mut self, listeners: RepoListeners<T>) {
		self.sets.push(listeners);
	}

	pub(crate) fn len(&self) -> usize {
		self.sets.len()
	}

	/// Snapshot the listeners in one slot so the lock can be released before
	/// they run.
	pub(crate) fn select<A>(
		&self,
		slot: impl Fn(&RepoListeners<T>) -> Option<&Listener<A>>,
	) -> Vec<Listener<A>> {
		self.sets.iter().filter_map(|set| slot(set).cloned()).collect()
	}
}

/// Run every listener concurrently with its own copy of the argument.
///
/// Resolves once all listeners succeeded, or with the first failure.
pub(crate) async fn fan_out<A: Clone>(listeners: Vec<Listener<A>>, arg: A) -> Result<()> {
	if listeners.is_empty() {
		return Ok(());
	}
	future::try_join_all(listeners.iter().map(|l| l(arg.clone()))).await?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::DbError;
	use std::sync::atomic::{AtomicUsize, Ordering};

	#[test]
	fn empty_set_has_no_events() {
		let listeners: RepoListeners<u32> = RepoListeners::empty();
		assert!(listeners.events().is_empty());
	}

	#[test]
	fn events_follow_filled_slots() {
		let listeners = RepoListeners::<u32> {
			insert_one: Some(listener(|_: u32| async { Ok(()) })),
			delete_list: Some(listener(|_: Vec<u32>| async { Ok(()) })),
			..RepoListeners::empty()
		};
		assert_eq!(
			listeners.events(),
			vec![ListenerEvent::InsertOne, ListenerEvent::DeleteList]
		);
	}

	#[tokio::test]
	async fn fan_out_runs_every_listener() {
		let calls = Arc::new(AtomicUsize::new(0));
		let make = |calls: Arc<AtomicUsize>| {
			listener(move |n: usize| {
				let calls = calls.clone();
				async move {
					calls.fetch_add(n, Ordering::SeqCst);
					Ok(())
				}
			})
		};
		fan_out(vec![make(calls.clone()), make(calls.clone())], 3)
			.await
			.unwrap();
		assert_eq!(calls.load(Ordering::SeqCst), 6);
	}

	#[tokio::test]
	async fn fan_out_propagates_failure() {
		let failing = listener(|_: ()| async { Err(DbError::Internal("boom".to_string())) });
		let ok = listener(|_: ()| async { Ok(()) });
		let result = fan_out(vec![ok, failing], ()).await;
		assert!(matches!(result, Err(DbError::Internal(_))));
	}

	#[tokio::test]
	async fn downstream_listener_is_noop_after_drop() {
		let counter = Arc::new(AtomicUsize::new(0));
		let l = downstream_listener(&counter, |counter, _: ()| async move {
			counter.fetch_add(1, Ordering::SeqCst);
			Ok(())
		});
		l(()).await.unwrap();
		assert_eq!(counter.load(Ordering::SeqCst), 1);

		drop(counter);
		l(()).await.unwrap();
	}

	#[test]
	fn subscribers_select_one_slot() {
		let mut subscribers = Subscribers::<u32>::default();
		subscribers.push(RepoListeners {
			delete_one: Some(listener(|_: u32| async { Ok(()) })),
			..RepoListeners::empty()
		});
		subscribers.push(RepoListeners::empty());
		assert_eq!(subscribers.len(), 2);
		assert_eq!(subscribers.select(|s| s.delete_one.as_ref()).len(), 1);
		assert!(subscribers.select(|s| s.insert_one.as_ref()).is_empty());
	}
}
