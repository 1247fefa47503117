//! Shared test fixtures: an in-memory persistence provider.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use epicenter_crdt::doc::UpdateObserver;
use epicenter_crdt::provider::{ProviderContext, ProviderFactory};
use epicenter_types::error::{EpiResult, Error};
use epicenter_types::lifecycle::{DestroyOnce, Provider, Readiness};

pub const MEMORY_ORIGIN: &str = "memory-persist";

/// Update log shared between provider instances, keyed by storage key.
/// Updates are stored in arrival order; loading replays them all.
pub type UpdateStore = Arc<Mutex<HashMap<String, Vec<Vec<u8>>>>>;

/// Factory producing in-memory persistence providers. All providers share
/// one update store, so a client reopened over the same factory loads what
/// its predecessor saved.
#[derive(Clone, Debug, Default)]
pub struct MemoryPersistFactory {
	store: UpdateStore,
}

impl MemoryPersistFactory {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn storage_keys(&self) -> Vec<String> {
		let mut keys: Vec<String> = self.store.lock().keys().cloned().collect();
		keys.sort();
		keys
	}
}

#[async_trait]
impl ProviderFactory for MemoryPersistFactory {
	async fn attach(&self, ctx: ProviderContext) -> EpiResult<Arc<dyn Provider>> {
		let storage_key = ctx.storage_key.to_string();

		let stored = self.store.lock().get(&storage_key).cloned().unwrap_or_default();
		for update in stored {
			ctx.doc.apply_update(&update, Some(MEMORY_ORIGIN.into()))?;
		}

		// Initial flush: snapshot the state that existed before this
		// provider attached (schema merges, map scaffolding), so a later
		// replay can satisfy the dependencies of the deltas that follow.
		let initial = ctx.doc.encode_state()?;
		if !initial.is_empty() {
			self.store.lock().entry(storage_key.clone()).or_default().push(initial);
		}

		// The observer callback runs inside the committing transaction, so
		// it must not reopen the document; it only records the delta.
		let store = Arc::clone(&self.store);
		let observer_key = storage_key.clone();
		let observer = ctx.doc.observe_update(move |update, origin| {
			if origin.as_deref() == Some(MEMORY_ORIGIN) {
				return;
			}
			store.lock().entry(observer_key.clone()).or_default().push(update.to_vec());
		})?;

		let readiness = Readiness::new();
		readiness.resolve();
		Ok(Arc::new(MemoryPersistProvider {
			storage_key,
			readiness,
			destroyed: DestroyOnce::default(),
			observer: Mutex::new(Some(observer)),
		}))
	}
}

pub struct MemoryPersistProvider {
	storage_key: String,
	readiness: Readiness,
	destroyed: DestroyOnce,
	observer: Mutex<Option<UpdateObserver>>,
}

impl std::fmt::Debug for MemoryPersistProvider {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MemoryPersistProvider").field("storage_key", &self.storage_key).finish()
	}
}

#[async_trait]
impl Provider for MemoryPersistProvider {
	fn name(&self) -> &str {
		MEMORY_ORIGIN
	}

	async fn when_synced(&self) -> EpiResult<()> {
		self.readiness.wait().await
	}

	async fn destroy(&self) -> EpiResult<()> {
		if self.destroyed.begin() {
			self.observer.lock().take();
		}
		Ok(())
	}
}

/// Factory whose providers never become ready: their readiness fails at
/// attach time. Used to exercise `ProviderInit` aggregation.
#[derive(Clone, Debug, Default)]
pub struct FailingFactory;

#[async_trait]
impl ProviderFactory for FailingFactory {
	async fn attach(&self, _ctx: ProviderContext) -> EpiResult<Arc<dyn Provider>> {
		let readiness = Readiness::new();
		readiness.fail("backing store unavailable");
		Ok(Arc::new(FailingProvider { readiness }))
	}
}

#[derive(Debug)]
pub struct FailingProvider {
	readiness: Readiness,
}

#[async_trait]
impl Provider for FailingProvider {
	fn name(&self) -> &str {
		"failing"
	}

	async fn when_synced(&self) -> EpiResult<()> {
		self.readiness.wait().await
	}

	async fn destroy(&self) -> EpiResult<()> {
		Err(Error::Internal("failing provider destroy".into()))
	}
}

// vim: ts=4
