//! Last-write-wins keyed store over a CRDT array.
//!
//! Some sync backends treat a document as a primitive list of entries. This
//! store layers a key-value view on top of an append-only CRDT array of
//! `{ key, value, ts }` records:
//!
//! - timestamps come from a monotonic local clock (`max(now, last + 1)`),
//!   so same-millisecond local writes stay ordered;
//! - the winner for a key is the entry with the highest `ts`, tiebroken by
//!   the rightmost array position — deterministic after merge because CRDT
//!   array order is a function of client ids and clocks;
//! - losing entries are deleted in a separate compaction transaction, so
//!   the array stays proportional to the number of distinct live keys;
//! - entries without a `ts` (legacy writes) sort as `ts = 0`.
//!
//! Known limitations: a device with a skewed clock wins unfairly against
//! peers; delete-vs-update races resolve by CRDT merge order of the delete
//! itself; deletes physically remove entries — there are no tombstones, so
//! a concurrent update on another replica can resurrect a key.

use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use yrs::{Array, ArrayRef, Observable, Origin, ReadTxn, Subscription};

use crate::doc::{DocHandle, origin_str};
use crate::prelude::*;
use crate::value::{out_to_value, value_to_any};

use epicenter_types::clock::MonotonicClock;

/// A live entry in the store.
#[derive(Clone, Debug, PartialEq)]
pub struct LwwEntry {
	pub key: String,
	pub value: Value,
	pub ts: Timestamp,
}

/// Per-key change notification, coalesced per commit.
#[derive(Clone, Debug, PartialEq)]
pub enum LwwEvent {
	Added { key: String, value: Value },
	Updated { key: String, old: Value, new: Value },
	Removed { key: String, old: Value },
}

impl LwwEvent {
	pub fn key(&self) -> &str {
		match self {
			LwwEvent::Added { key, .. }
			| LwwEvent::Updated { key, .. }
			| LwwEvent::Removed { key, .. } => key,
		}
	}
}

type LwwCallback = Arc<dyn Fn(&[LwwEvent], Option<&str>) + Send + Sync>;
type CallbackSlots = Mutex<Vec<(u64, LwwCallback)>>;

/// RAII guard for an observer registration; dropping it unsubscribes.
pub struct LwwSubscription {
	id: u64,
	slots: Weak<CallbackSlots>,
}

impl Drop for LwwSubscription {
	fn drop(&mut self) {
		if let Some(slots) = self.slots.upgrade() {
			slots.lock().retain(|(id, _)| *id != self.id);
		}
	}
}

/// Keyed last-write-wins view over a CRDT array.
pub struct LwwStore {
	doc: DocHandle,
	array: ArrayRef,
	clock: Arc<MonotonicClock>,
	index: Arc<Mutex<HashMap<String, LwwEntry>>>,
	slots: Arc<CallbackSlots>,
	next_slot: AtomicU64,
	_sub: Subscription,
}

impl LwwStore {
	/// Open the store over the named root array of `doc`, building the
	/// in-memory index from the current array contents.
	pub fn new(doc: DocHandle, array_name: &str) -> EpiResult<Self> {
		let array = doc.array(array_name);
		let clock = Arc::new(MonotonicClock::new());
		let index = Arc::new(Mutex::new(HashMap::new()));
		let slots: Arc<CallbackSlots> = Arc::new(Mutex::new(Vec::new()));

		{
			let txn = doc.read()?;
			let initial = scan(&txn, &array);
			for entry in initial.values() {
				clock.observe(entry.ts);
			}
			*index.lock() = initial;
		}

		let observed_array = array.clone();
		let observed_index = Arc::clone(&index);
		let observed_clock = Arc::clone(&clock);
		let observed_slots = Arc::clone(&slots);
		let sub = array.observe(move |txn, _event| {
			let fresh = scan(txn, &observed_array);
			for entry in fresh.values() {
				observed_clock.observe(entry.ts);
			}
			let events = {
				let mut index = observed_index.lock();
				let events = diff(&index, &fresh);
				*index = fresh;
				events
			};
			if events.is_empty() {
				return;
			}
			let origin = origin_str(txn);
			let callbacks: Vec<LwwCallback> =
				observed_slots.lock().iter().map(|(_, cb)| Arc::clone(cb)).collect();
			for callback in callbacks {
				callback(&events, origin.as_deref());
			}
		});

		Ok(Self { doc, array, clock, index, slots, next_slot: AtomicU64::new(0), _sub: sub })
	}

	/// Current value for `key`, if the key is live.
	pub fn get(&self, key: &str) -> Option<Value> {
		self.index.lock().get(key).map(|entry| entry.value.clone())
	}

	pub fn contains_key(&self, key: &str) -> bool {
		self.index.lock().contains_key(key)
	}

	/// Number of distinct live keys.
	pub fn len(&self) -> usize {
		self.index.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.index.lock().is_empty()
	}

	/// All live entries, sorted by key for deterministic iteration.
	pub fn entries(&self) -> Vec<LwwEntry> {
		let mut entries: Vec<LwwEntry> = self.index.lock().values().cloned().collect();
		entries.sort_by(|a, b| a.key.cmp(&b.key));
		entries
	}

	pub fn keys(&self) -> Vec<String> {
		self.entries().into_iter().map(|entry| entry.key).collect()
	}

	/// Write `key` with a clock-generated timestamp, then compact.
	pub fn set(&self, key: &str, value: Value) -> EpiResult<()> {
		self.set_with_timestamp(key, value, self.clock.next())
	}

	/// Write `key` with an explicit timestamp. Intended for imports and
	/// recovery flows; normal writes use `set`.
	pub fn set_with_timestamp(&self, key: &str, value: Value, ts: Timestamp) -> EpiResult<()> {
		self.clock.observe(ts);
		{
			let mut txn = self.doc.write()?;
			let record = json!({ "key": key, "value": value, "ts": ts.0 });
			self.array.push_back(&mut txn, value_to_any(&record));
		}
		self.compact()
	}

	/// Remove every entry for `key`. Returns false when the key was not
	/// present locally.
	pub fn delete(&self, key: &str) -> EpiResult<bool> {
		let mut txn = self.doc.write()?;
		let mut positions: Vec<u32> = Vec::new();
		let len = self.array.len(&txn);
		for i in 0..len {
			if let Some(out) = self.array.get(&txn, i) {
				let record = out_to_value(&txn, &out);
				if record.get("key").and_then(Value::as_str) == Some(key) {
					positions.push(i);
				}
			}
		}
		for i in positions.iter().rev() {
			self.array.remove(&mut txn, *i);
		}
		Ok(!positions.is_empty())
	}

	/// Apply a remote update to the backing document, then compact away any
	/// superseded entries it introduced.
	pub fn apply_update(&self, bytes: &[u8], origin: Option<Origin>) -> EpiResult<()> {
		self.doc.apply_update(bytes, origin)?;
		self.compact()
	}

	/// Delete every losing duplicate, leaving one entry per live key.
	/// Runs in its own transaction, separate from the write that created
	/// the duplicates.
	pub fn compact(&self) -> EpiResult<()> {
		let mut txn = self.doc.write()?;
		let mut best: HashMap<String, (i64, u32)> = HashMap::new();
		let mut losers: Vec<u32> = Vec::new();
		let len = self.array.len(&txn);
		for i in 0..len {
			let Some(out) = self.array.get(&txn, i) else { continue };
			let record = out_to_value(&txn, &out);
			let Some(key) = record.get("key").and_then(Value::as_str) else { continue };
			let ts = record.get("ts").and_then(Value::as_i64).unwrap_or(0);
			match best.entry(key.to_string()) {
				Entry::Occupied(mut slot) => {
					let (best_ts, best_pos) = *slot.get();
					if ts >= best_ts {
						losers.push(best_pos);
						slot.insert((ts, i));
					} else {
						losers.push(i);
					}
				}
				Entry::Vacant(slot) => {
					slot.insert((ts, i));
				}
			}
		}
		if losers.is_empty() {
			return Ok(());
		}
		losers.sort_unstable_by(|a, b| b.cmp(a));
		for i in losers {
			self.array.remove(&mut txn, i);
		}
		Ok(())
	}

	/// Backing array length, including not-yet-compacted duplicates.
	pub fn raw_len(&self) -> EpiResult<u32> {
		let txn = self.doc.read()?;
		Ok(self.array.len(&txn))
	}

	/// Register a per-commit change callback. Events are coalesced per key
	/// with old/new values; the second argument is the transaction origin
	/// (`None` for local writes).
	pub fn observe<F>(&self, callback: F) -> LwwSubscription
	where
		F: Fn(&[LwwEvent], Option<&str>) + Send + Sync + 'static,
	{
		let id = self.next_slot.fetch_add(1, Ordering::SeqCst);
		self.slots.lock().push((id, Arc::new(callback)));
		LwwSubscription { id, slots: Arc::downgrade(&self.slots) }
	}

	pub fn doc(&self) -> &DocHandle {
		&self.doc
	}
}

/// Build the winner-per-key index from the current array contents.
/// Left-to-right scan with `>=` on the timestamp makes the rightmost entry
/// win ties.
fn scan<T: ReadTxn>(txn: &T, array: &ArrayRef) -> HashMap<String, LwwEntry> {
	let mut index: HashMap<String, LwwEntry> = HashMap::new();
	for out in array.iter(txn) {
		let record = out_to_value(txn, &out);
		let Some(key) = record.get("key").and_then(Value::as_str) else { continue };
		let ts = Timestamp(record.get("ts").and_then(Value::as_i64).unwrap_or(0));
		let value = record.get("value").cloned().unwrap_or(Value::Null);
		let candidate = LwwEntry { key: key.to_string(), value, ts };
		match index.entry(candidate.key.clone()) {
			Entry::Occupied(mut slot) => {
				if candidate.ts >= slot.get().ts {
					slot.insert(candidate);
				}
			}
			Entry::Vacant(slot) => {
				slot.insert(candidate);
			}
		}
	}
	index
}

fn diff(old: &HashMap<String, LwwEntry>, new: &HashMap<String, LwwEntry>) -> Vec<LwwEvent> {
	let mut events = Vec::new();
	for (key, entry) in new {
		match old.get(key) {
			None => events.push(LwwEvent::Added { key: key.clone(), value: entry.value.clone() }),
			Some(prev) if prev.value != entry.value => events.push(LwwEvent::Updated {
				key: key.clone(),
				old: prev.value.clone(),
				new: entry.value.clone(),
			}),
			Some(_) => {}
		}
	}
	for (key, entry) in old {
		if !new.contains_key(key) {
			events.push(LwwEvent::Removed { key: key.clone(), old: entry.value.clone() });
		}
	}
	events.sort_by(|a, b| a.key().cmp(b.key()));
	events
}


// vim: ts=4
