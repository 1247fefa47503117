//! Head document: CRDT-safe epoch management for one workspace.
//!
//! The head holds a map from client key to that client's last proposed
//! epoch. The effective epoch is the MAX over all proposals. MAX (not SUM)
//! gives version semantics without gaps: two clients that both observe
//! epoch k and bump concurrently both propose k+1, and after sync the
//! effective epoch is k+1 — no revision is skipped and no update is lost,
//! which a single shared counter cannot guarantee.

use std::collections::HashMap;
use std::sync::Arc;
use yrs::{Map, MapRef, Observable, Subscription};

use epicenter_crdt::doc::DocHandle;
use epicenter_crdt::provider::{ProviderContext, ProviderFactory, ProviderPaths};
use epicenter_crdt::value::out_to_value;
use epicenter_types::lifecycle::{Provider, destroy_all, when_synced_all};

use crate::observer::{ObserverGuard, Subscriptions};
use crate::prelude::*;

const EPOCHS_MAP: &str = "epochs";

type EpochCallback = dyn Fn(Epoch) + Send + Sync;

/// Per-workspace head document.
pub struct HeadDoc {
	doc: DocHandle,
	map: MapRef,
	workspace_id: Box<str>,
	client_key: Box<str>,
	providers: parking_lot::Mutex<Vec<Arc<dyn Provider>>>,
	subs: Arc<Subscriptions<EpochCallback>>,
	_sub: Subscription,
}

impl std::fmt::Debug for HeadDoc {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("HeadDoc")
			.field("workspace", &self.workspace_id)
			.field("client_key", &self.client_key)
			.finish()
	}
}

impl HeadDoc {
	/// Open the head for `workspace_id`. The client key defaults to the
	/// document's stringified client id.
	pub fn new(workspace_id: &str) -> Self {
		let doc = DocHandle::new(format!("{}-head", workspace_id));
		let client_key = doc.client_id().to_string();
		Self::with_doc(workspace_id, doc, client_key)
	}

	/// Open with an explicit document and client key. Hosts that persist a
	/// stable client identity pass it here so proposals survive restarts.
	pub fn with_doc(workspace_id: &str, doc: DocHandle, client_key: impl Into<Box<str>>) -> Self {
		let map = doc.map(EPOCHS_MAP);
		let subs: Arc<Subscriptions<EpochCallback>> = Arc::new(Subscriptions::new());

		// Suppression state: observers only hear about commits that change
		// the effective MAX, not every inner proposal write. Seeded with
		// the epoch already in the document so a no-op commit right after
		// opening stays silent.
		let initial = doc
			.read()
			.map(|txn| max_epoch(&txn, &map))
			.unwrap_or_default();
		let last_seen = Arc::new(parking_lot::Mutex::new(initial));

		let observed_map = map.clone();
		let observed_subs = Arc::clone(&subs);
		let observed_last = Arc::clone(&last_seen);
		let sub = map.observe(move |txn, _event| {
			let epoch = max_epoch(txn, &observed_map);
			{
				let mut last = observed_last.lock();
				if *last == epoch {
					return;
				}
				*last = epoch;
			}
			for callback in observed_subs.snapshot() {
				callback(epoch);
			}
		});

		Self {
			doc,
			map,
			workspace_id: workspace_id.into(),
			client_key: client_key.into(),
			providers: parking_lot::Mutex::new(Vec::new()),
			subs,
			_sub: sub,
		}
	}

	pub fn doc(&self) -> &DocHandle {
		&self.doc
	}

	pub fn workspace_id(&self) -> &str {
		&self.workspace_id
	}

	pub fn client_key(&self) -> &str {
		&self.client_key
	}

	/// Effective epoch: MAX over all client proposals, 0 when empty.
	pub fn epoch(&self) -> EpiResult<Epoch> {
		let txn = self.doc.read()?;
		Ok(max_epoch(&txn, &self.map))
	}

	/// This client's own proposal, 0 when absent.
	pub fn local_epoch(&self) -> EpiResult<Epoch> {
		let txn = self.doc.read()?;
		Ok(self
			.map
			.get(&txn, &self.client_key)
			.map(|out| read_epoch(&out_to_value(&txn, &out)))
			.unwrap_or_default())
	}

	/// Read the current MAX and propose `max + 1` under this client's key,
	/// all in one transaction. Returns the new effective epoch.
	///
	/// Two clients that both observe max = k and bump while offline both
	/// write k+1; after sync the effective epoch is k+1, not k+2.
	pub fn bump(&self) -> EpiResult<Epoch> {
		let mut txn = self.doc.write()?;
		let next = max_epoch(&txn, &self.map).next();
		self.map.insert(&mut txn, self.client_key.as_ref(), next.0 as i64);
		debug!(workspace = %self.workspace_id, epoch = %next, "epoch bumped");
		Ok(next)
	}

	/// Unconditionally set this client's proposal. Values below the current
	/// effective epoch are allowed (time travel): the effective epoch only
	/// moves backwards once every client's proposal does.
	pub fn go_to(&self, epoch: Epoch) -> EpiResult<()> {
		let mut txn = self.doc.write()?;
		self.map.insert(&mut txn, self.client_key.as_ref(), epoch.0 as i64);
		debug!(workspace = %self.workspace_id, epoch = %epoch, "epoch proposal set");
		Ok(())
	}

	/// Alias for `go_to`, reserved for recovery flows.
	pub fn force_set(&self, epoch: Epoch) -> EpiResult<()> {
		self.go_to(epoch)
	}

	/// Copy of the per-client proposal map, for debugging.
	pub fn proposals(&self) -> EpiResult<HashMap<String, Epoch>> {
		let txn = self.doc.read()?;
		let mut proposals = HashMap::new();
		for (key, out) in self.map.iter(&txn) {
			proposals.insert(key.to_string(), read_epoch(&out_to_value(&txn, &out)));
		}
		Ok(proposals)
	}

	/// Observe effective-epoch changes. Commits that mutate proposals
	/// without changing the MAX are suppressed.
	pub fn observe_epoch<F>(&self, callback: F) -> ObserverGuard<EpochCallback>
	where
		F: Fn(Epoch) + Send + Sync + 'static,
	{
		self.subs.insert(Arc::new(callback))
	}

	pub async fn attach(
		&self,
		factory: &dyn ProviderFactory,
		paths: Option<ProviderPaths>,
	) -> EpiResult<()> {
		let storage_key = format!("workspaces/{}/head", self.workspace_id);
		let mut ctx = ProviderContext::new(self.doc.clone(), storage_key);
		if let Some(paths) = paths {
			ctx = ctx.with_paths(paths);
		}
		let provider = factory.attach(ctx).await?;
		self.providers.lock().push(provider);
		Ok(())
	}

	pub async fn when_synced(&self) -> EpiResult<()> {
		let providers = self.providers.lock().clone();
		when_synced_all(&providers).await
	}

	pub async fn destroy(&self) {
		let providers = std::mem::take(&mut *self.providers.lock());
		destroy_all(&providers).await;
		self.doc.destroy();
	}
}

fn max_epoch<T: yrs::ReadTxn>(txn: &T, map: &MapRef) -> Epoch {
	let mut max = Epoch::default();
	for (_key, out) in map.iter(txn) {
		let epoch = read_epoch(&out_to_value(txn, &out));
		if epoch > max {
			max = epoch;
		}
	}
	max
}

fn read_epoch(value: &serde_json::Value) -> Epoch {
	Epoch(value.as_i64().map(|n| n.max(0) as u64).unwrap_or(0))
}


// vim: ts=4
