//! Registry document: the set of workspace ids a user can access.
//!
//! Backed by a CRDT map from workspace id to a present-marker, so
//! concurrent additions from several devices merge without conflicts.
//! Created once per user, persists across sessions, destroyed at logout.

use std::collections::HashSet;
use std::sync::Arc;
use yrs::types::EntryChange;
use yrs::{Map, MapRef, Observable, Subscription};

use epicenter_crdt::doc::{DocHandle, origin_str};
use epicenter_crdt::provider::{ProviderContext, ProviderFactory, ProviderPaths};
use epicenter_types::lifecycle::{Provider, destroy_all, when_synced_all};

use crate::observer::{ObserverGuard, Subscriptions};
use crate::prelude::*;

pub const REGISTRY_DOC_ID: &str = "registry";
const WORKSPACES_MAP: &str = "workspaces";

/// Per-commit change to the workspace set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegistryChange {
	pub added: Vec<String>,
	pub removed: Vec<String>,
}

type RegistryCallback = dyn Fn(&RegistryChange, Option<&str>) + Send + Sync;

/// The top-level registry document.
pub struct RegistryDoc {
	doc: DocHandle,
	map: MapRef,
	providers: parking_lot::Mutex<Vec<Arc<dyn Provider>>>,
	subs: Arc<Subscriptions<RegistryCallback>>,
	_sub: Subscription,
}

impl std::fmt::Debug for RegistryDoc {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RegistryDoc").field("doc", &self.doc.id()).finish()
	}
}

impl RegistryDoc {
	pub fn new() -> Self {
		Self::with_doc(DocHandle::new(REGISTRY_DOC_ID))
	}

	pub fn with_doc(doc: DocHandle) -> Self {
		let map = doc.map(WORKSPACES_MAP);
		let subs: Arc<Subscriptions<RegistryCallback>> = Arc::new(Subscriptions::new());

		let observed_subs = Arc::clone(&subs);
		let sub = map.observe(move |txn, event| {
			let mut change = RegistryChange::default();
			for (key, entry) in event.keys(txn) {
				match entry {
					EntryChange::Inserted(_) => change.added.push(key.to_string()),
					EntryChange::Removed(_) => change.removed.push(key.to_string()),
					EntryChange::Updated(_, _) => {}
				}
			}
			if change.added.is_empty() && change.removed.is_empty() {
				return;
			}
			change.added.sort();
			change.removed.sort();
			let origin = origin_str(txn);
			for callback in observed_subs.snapshot() {
				callback(&change, origin.as_deref());
			}
		});

		Self { doc, map, providers: parking_lot::Mutex::new(Vec::new()), subs, _sub: sub }
	}

	pub fn doc(&self) -> &DocHandle {
		&self.doc
	}

	pub fn add_workspace(&self, id: &str) -> EpiResult<()> {
		if id.is_empty() {
			return Err(Error::SchemaValidation(vec![
				epicenter_types::validate::Issue::new("workspace id must be non-empty"),
			]));
		}
		let mut txn = self.doc.write()?;
		self.map.insert(&mut txn, id, true);
		Ok(())
	}

	pub fn remove_workspace(&self, id: &str) -> EpiResult<bool> {
		let mut txn = self.doc.write()?;
		Ok(self.map.remove(&mut txn, id).is_some())
	}

	pub fn has_workspace(&self, id: &str) -> EpiResult<bool> {
		let txn = self.doc.read()?;
		Ok(self.map.contains_key(&txn, id))
	}

	/// All workspace ids, sorted for deterministic iteration.
	pub fn workspace_ids(&self) -> EpiResult<Vec<String>> {
		let txn = self.doc.read()?;
		let mut ids: Vec<String> = self.map.keys(&txn).map(str::to_string).collect();
		ids.sort();
		Ok(ids)
	}

	pub fn count(&self) -> EpiResult<usize> {
		let txn = self.doc.read()?;
		Ok(self.map.len(&txn) as usize)
	}

	/// Observe workspace set changes. One commit produces at most one
	/// callback; commits that leave the set unchanged produce none.
	pub fn observe<F>(&self, callback: F) -> ObserverGuard<RegistryCallback>
	where
		F: Fn(&RegistryChange, Option<&str>) + Send + Sync + 'static,
	{
		self.subs.insert(Arc::new(callback))
	}

	/// Attach a provider produced by `factory`.
	pub async fn attach(
		&self,
		factory: &dyn ProviderFactory,
		paths: Option<ProviderPaths>,
	) -> EpiResult<()> {
		let mut ctx = ProviderContext::new(self.doc.clone(), REGISTRY_DOC_ID);
		if let Some(paths) = paths {
			ctx = ctx.with_paths(paths);
		}
		let provider = factory.attach(ctx).await?;
		self.providers.lock().push(provider);
		Ok(())
	}

	/// Resolves when every attached provider finished its initial side
	/// effects.
	pub async fn when_synced(&self) -> EpiResult<()> {
		let providers = self.providers.lock().clone();
		when_synced_all(&providers).await
	}

	/// Destroy every provider (settle all), then the document. Safe to call
	/// more than once.
	pub async fn destroy(&self) {
		let providers = std::mem::take(&mut *self.providers.lock());
		destroy_all(&providers).await;
		self.doc.destroy();
	}

	/// Convenience for tests and debugging: the set of ids as a `HashSet`.
	pub fn workspace_set(&self) -> EpiResult<HashSet<String>> {
		Ok(self.workspace_ids()?.into_iter().collect())
	}
}

impl Default for RegistryDoc {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use parking_lot::Mutex;

	#[test]
	fn test_add_remove_roundtrip() {
		let registry = RegistryDoc::new();
		registry.add_workspace("w1").unwrap();
		registry.add_workspace("w2").unwrap();
		assert!(registry.remove_workspace("w1").unwrap());
		assert!(!registry.remove_workspace("w1").unwrap());

		assert_eq!(registry.workspace_ids().unwrap(), vec!["w2".to_string()]);
		assert_eq!(registry.count().unwrap(), 1);
		assert!(registry.has_workspace("w2").unwrap());
		assert!(!registry.has_workspace("w1").unwrap());
	}

	#[test]
	fn test_empty_workspace_id_rejected() {
		let registry = RegistryDoc::new();
		assert!(registry.add_workspace("").is_err());
	}

	#[test]
	fn test_observer_fires_once_per_commit() {
		let registry = RegistryDoc::new();
		let seen: Arc<Mutex<Vec<RegistryChange>>> = Arc::new(Mutex::new(Vec::new()));
		let sink = Arc::clone(&seen);
		let _guard = registry.observe(move |change, _origin| {
			sink.lock().push(change.clone());
		});

		registry.add_workspace("w1").unwrap();
		registry.add_workspace("w2").unwrap();
		registry.remove_workspace("w1").unwrap();

		let seen = seen.lock();
		assert_eq!(seen.len(), 3);
		assert_eq!(seen[0], RegistryChange { added: vec!["w1".into()], removed: vec![] });
		assert_eq!(seen[1], RegistryChange { added: vec!["w2".into()], removed: vec![] });
		assert_eq!(seen[2], RegistryChange { added: vec![], removed: vec!["w1".into()] });
	}

	#[test]
	fn test_observer_skips_no_op_commits() {
		let registry = RegistryDoc::new();
		let hits = Arc::new(Mutex::new(0usize));
		let sink = Arc::clone(&hits);
		let _guard = registry.observe(move |_change, _origin| {
			*sink.lock() += 1;
		});

		registry.add_workspace("w1").unwrap();
		// Re-adding an existing id only updates the marker value; the set
		// itself is unchanged and must not notify.
		registry.add_workspace("w1").unwrap();
		assert_eq!(*hits.lock(), 1);
	}

	#[test]
	fn test_converges_across_replicas() {
		let a = RegistryDoc::with_doc(DocHandle::with_client_id(REGISTRY_DOC_ID, 1));
		let b = RegistryDoc::with_doc(DocHandle::with_client_id(REGISTRY_DOC_ID, 2));
		a.add_workspace("from-a").unwrap();
		b.add_workspace("from-b").unwrap();

		b.doc().apply_update(&a.doc().encode_state().unwrap(), Some("sync".into())).unwrap();
		a.doc().apply_update(&b.doc().encode_state().unwrap(), Some("sync".into())).unwrap();

		assert_eq!(a.workspace_ids().unwrap(), b.workspace_ids().unwrap());
		assert_eq!(a.count().unwrap(), 2);
	}

	#[tokio::test]
	async fn test_destroy_is_idempotent() {
		let registry = RegistryDoc::new();
		registry.add_workspace("w1").unwrap();
		registry.destroy().await;
		registry.destroy().await;
		assert!(registry.workspace_ids().is_err());
	}
}

// vim: ts=4
