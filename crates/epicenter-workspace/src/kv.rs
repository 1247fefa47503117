//! KV helper: schema-bound typed operations over the shared key-value map
//! of a data document.
//!
//! Every key is registered up front with its (versioned) schema; touching
//! an unregistered key is an `UnknownKey` error. Reads share the table
//! helper's result shapes: valid, invalid-with-raw-value, or not found.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use yrs::{Map, MapRef, Observable, Subscription, TransactionMut};

use epicenter_crdt::doc::{DocHandle, map_get_value, map_insert_value, origin_str};
use epicenter_schema::{KvSpec, ReadOutcome};
use epicenter_types::validate::Issue;

use crate::observer::{ObserverGuard, Subscriptions};
use crate::prelude::*;

pub(crate) const KV_MAP: &str = "kv";

/// Result of reading one key.
#[derive(Clone, Debug, PartialEq)]
pub enum KvStatus {
	Valid { value: Value },
	Invalid { key: String, value: Value, errors: Vec<Issue> },
	NotFound { key: String },
}

impl KvStatus {
	pub fn valid(self) -> Option<Value> {
		match self {
			KvStatus::Valid { value } => Some(value),
			_ => None,
		}
	}
}

type KvSetCallback = dyn Fn(&HashSet<String>, Option<&str>) + Send + Sync;
type KvKeyCallback = dyn Fn(&KvStatus, Option<&str>) + Send + Sync;

type KeySubs = Arc<Mutex<HashMap<String, Arc<Subscriptions<KvKeyCallback>>>>>;

/// Typed helper over the shared KV map.
pub struct KvHelper {
	doc: DocHandle,
	map: MapRef,
	specs: Arc<BTreeMap<String, KvSpec>>,
	subs: Arc<Subscriptions<KvSetCallback>>,
	key_subs: KeySubs,
	_sub: Subscription,
}

impl std::fmt::Debug for KvHelper {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("KvHelper")
			.field("doc", &self.doc.id())
			.field("keys", &self.specs.len())
			.finish()
	}
}

impl KvHelper {
	pub(crate) fn new(doc: DocHandle, specs: Arc<BTreeMap<String, KvSpec>>) -> Self {
		let map = doc.map(KV_MAP);
		let subs: Arc<Subscriptions<KvSetCallback>> = Arc::new(Subscriptions::new());
		let key_subs: KeySubs = Arc::new(Mutex::new(HashMap::new()));

		let observed_map = map.clone();
		let observed_specs = Arc::clone(&specs);
		let observed_subs = Arc::clone(&subs);
		let observed_key_subs = Arc::clone(&key_subs);
		let sub = map.observe(move |txn, event| {
			let changed: HashSet<String> =
				event.keys(txn).keys().map(|key| key.to_string()).collect();
			if changed.is_empty() {
				return;
			}
			let origin = origin_str(txn);
			for callback in observed_subs.snapshot() {
				callback(&changed, origin.as_deref());
			}

			let per_key: Vec<(String, Arc<Subscriptions<KvKeyCallback>>)> = {
				let key_subs = observed_key_subs.lock();
				changed
					.iter()
					.filter_map(|key| {
						key_subs.get(key).map(|subs| (key.clone(), Arc::clone(subs)))
					})
					.collect()
			};
			for (key, subs) in per_key {
				let Some(spec) = observed_specs.get(&key) else { continue };
				let status = match map_get_value(txn, &observed_map, &key) {
					None => KvStatus::NotFound { key: key.clone() },
					Some(raw) => match spec.schema.parse_read(&raw) {
						Ok(ReadOutcome::Valid(value)) => KvStatus::Valid { value },
						Ok(ReadOutcome::Invalid(errors)) => {
							KvStatus::Invalid { key: key.clone(), value: raw, errors }
						}
						Err(err) => {
							warn!(key = %key, error = %err, "kv observer read failed");
							continue;
						}
					},
				};
				for callback in subs.snapshot() {
					callback(&status, origin.as_deref());
				}
			}
		});

		Self { doc, map, specs, subs, key_subs, _sub: sub }
	}

	fn spec(&self, key: &str) -> EpiResult<&KvSpec> {
		self.specs.get(key).ok_or_else(|| Error::UnknownKey(key.to_string()))
	}

	/// Keys registered in the schema.
	pub fn registered_keys(&self) -> Vec<String> {
		self.specs.keys().cloned().collect()
	}

	/// Keys currently present in the stored map, sorted.
	pub fn keys(&self) -> EpiResult<Vec<String>> {
		let txn = self.doc.read()?;
		let mut keys: Vec<String> = self.map.keys(&txn).map(str::to_string).collect();
		keys.sort();
		Ok(keys)
	}

	pub fn has(&self, key: &str) -> EpiResult<bool> {
		let txn = self.doc.read()?;
		Ok(self.map.contains_key(&txn, key))
	}

	pub fn get(&self, key: &str) -> EpiResult<KvStatus> {
		let spec = self.spec(key)?;
		let txn = self.doc.read()?;
		let Some(raw) = map_get_value(&txn, &self.map, key) else {
			return Ok(KvStatus::NotFound { key: key.to_string() });
		};
		Ok(match spec.schema.parse_read(&raw)? {
			ReadOutcome::Valid(value) => KvStatus::Valid { value },
			ReadOutcome::Invalid(errors) => {
				KvStatus::Invalid { key: key.to_string(), value: raw, errors }
			}
		})
	}

	/// Read every registered key that has a stored value.
	pub fn get_all(&self) -> EpiResult<BTreeMap<String, KvStatus>> {
		let mut all = BTreeMap::new();
		for key in self.specs.keys() {
			match self.get(key)? {
				KvStatus::NotFound { .. } => {}
				status => {
					all.insert(key.clone(), status);
				}
			}
		}
		Ok(all)
	}

	pub fn set(&self, key: &str, value: &Value) -> EpiResult<()> {
		let spec = self.spec(key)?;
		let validated = spec.schema.validate_write(value)?;
		let mut txn = self.doc.write()?;
		map_insert_value(&mut txn, &self.map, key, &validated);
		Ok(())
	}

	pub fn delete(&self, key: &str) -> EpiResult<bool> {
		self.spec(key)?;
		let mut txn = self.doc.write()?;
		Ok(self.map.remove(&mut txn, key).is_some())
	}

	/// Run several operations in one transaction; observers fire once.
	pub fn batch<R, F>(&self, f: F) -> EpiResult<R>
	where
		F: FnOnce(&mut KvTx<'_, '_>) -> EpiResult<R>,
	{
		let mut txn = self.doc.write()?;
		let mut tx = KvTx { txn: &mut txn, map: &self.map, specs: &self.specs };
		f(&mut tx)
	}

	/// Observe all KV changes: one callback per commit with the changed
	/// key set and the transaction origin.
	pub fn observe<F>(&self, callback: F) -> ObserverGuard<KvSetCallback>
	where
		F: Fn(&HashSet<String>, Option<&str>) + Send + Sync + 'static,
	{
		self.subs.insert(Arc::new(callback))
	}

	/// Observe one registered key. The callback receives the new status
	/// computed inside the committing transaction.
	pub fn observe_key<F>(&self, key: &str, callback: F) -> EpiResult<ObserverGuard<KvKeyCallback>>
	where
		F: Fn(&KvStatus, Option<&str>) + Send + Sync + 'static,
	{
		self.spec(key)?;
		let subs = {
			let mut key_subs = self.key_subs.lock();
			Arc::clone(key_subs.entry(key.to_string()).or_default())
		};
		Ok(subs.insert(Arc::new(callback)))
	}
}

/// Transaction facade passed to `batch` closures.
pub struct KvTx<'a, 'txn> {
	txn: &'a mut TransactionMut<'txn>,
	map: &'a MapRef,
	specs: &'a BTreeMap<String, KvSpec>,
}

impl KvTx<'_, '_> {
	pub fn set(&mut self, key: &str, value: &Value) -> EpiResult<()> {
		let spec = self.specs.get(key).ok_or_else(|| Error::UnknownKey(key.to_string()))?;
		let validated = spec.schema.validate_write(value)?;
		map_insert_value(self.txn, self.map, key, &validated);
		Ok(())
	}

	pub fn delete(&mut self, key: &str) -> EpiResult<bool> {
		if !self.specs.contains_key(key) {
			return Err(Error::UnknownKey(key.to_string()));
		}
		Ok(self.map.remove(self.txn, key).is_some())
	}
}

// vim: ts=4
