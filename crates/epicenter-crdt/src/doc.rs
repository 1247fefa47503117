//! Document handle: the one place the runtime touches `yrs::Doc` directly.
//!
//! A `DocHandle` owns a CRDT document with an explicit identity (guid) and
//! client id. All transaction acquisition goes through the fallible `try_`
//! variants so contention surfaces as an error instead of a panic, and all
//! local writes can carry an origin tag that observers receive back.

use serde_json::{Map as JsonMap, Value};
use std::sync::Arc;
use yrs::updates::decoder::Decode;
use yrs::{
	Any, ArrayRef, Doc, Map, MapPrelim, MapRef, Options, Origin, ReadTxn, Subscription, Transact,
	Transaction, TransactionMut, Update,
};

use crate::prelude::*;
use crate::value::out_to_value;

use epicenter_types::lifecycle::DestroyOnce;

/// RAII guard for a document update subscription. Dropping it detaches the
/// callback.
pub struct UpdateObserver {
	_sub: Subscription,
}

#[derive(Debug)]
struct DocInner {
	doc: Doc,
	id: Box<str>,
	destroyed: DestroyOnce,
}

/// Handle to a CRDT document. Cheap to clone; all clones share the same
/// underlying document.
#[derive(Clone, Debug)]
pub struct DocHandle {
	inner: Arc<DocInner>,
}

impl DocHandle {
	/// Create a document with the given identity and a random client id.
	pub fn new(doc_id: impl Into<Box<str>>) -> Self {
		let id = doc_id.into();
		let mut options = Options::default();
		options.guid = id.as_ref().into();
		Self { inner: Arc::new(DocInner { doc: Doc::with_options(options), id, destroyed: DestroyOnce::default() }) }
	}

	/// Create a document with explicit identity and client id. Used by
	/// tests and by hosts that persist a stable client identity.
	pub fn with_client_id(doc_id: impl Into<Box<str>>, client_id: u64) -> Self {
		let id = doc_id.into();
		let mut options = Options::with_client_id(client_id);
		options.guid = id.as_ref().into();
		Self { inner: Arc::new(DocInner { doc: Doc::with_options(options), id, destroyed: DestroyOnce::default() }) }
	}

	pub fn id(&self) -> &str {
		&self.inner.id
	}

	pub fn client_id(&self) -> u64 {
		self.inner.doc.client_id()
	}

	/// Mark the document destroyed. Later transaction acquisition fails
	/// with a `Lifecycle` error. Safe to call repeatedly.
	pub fn destroy(&self) {
		if self.inner.destroyed.begin() {
			debug!(doc = %self.inner.id, "document destroyed");
		}
	}

	pub fn is_destroyed(&self) -> bool {
		self.inner.destroyed.is_destroyed()
	}

	fn ensure_alive(&self) -> EpiResult<()> {
		if self.inner.destroyed.is_destroyed() {
			Err(Error::Lifecycle(format!("document '{}' is destroyed", self.inner.id)))
		} else {
			Ok(())
		}
	}

	/// Acquire a read transaction.
	pub fn read(&self) -> EpiResult<Transaction<'_>> {
		self.ensure_alive()?;
		self.inner
			.doc
			.try_transact()
			.map_err(|err| Error::Internal(format!("read transaction: {}", err)))
	}

	/// Acquire a write transaction with no origin (a local write).
	pub fn write(&self) -> EpiResult<TransactionMut<'_>> {
		self.ensure_alive()?;
		self.inner
			.doc
			.try_transact_mut()
			.map_err(|err| Error::Internal(format!("write transaction: {}", err)))
	}

	/// Acquire a write transaction tagged with an origin. Sync providers
	/// use their own name so observers can filter echoes.
	pub fn write_with(&self, origin: impl Into<Origin>) -> EpiResult<TransactionMut<'_>> {
		self.ensure_alive()?;
		self.inner
			.doc
			.try_transact_mut_with(origin)
			.map_err(|err| Error::Internal(format!("write transaction: {}", err)))
	}

	/// Root map, created on first use.
	pub fn map(&self, name: &str) -> MapRef {
		self.inner.doc.get_or_insert_map(name)
	}

	/// Root array, created on first use.
	pub fn array(&self, name: &str) -> ArrayRef {
		self.inner.doc.get_or_insert_array(name)
	}

	/// Encode the full document state as a v1 update.
	pub fn encode_state(&self) -> EpiResult<Vec<u8>> {
		let txn = self.read()?;
		Ok(txn.encode_state_as_update_v1(&yrs::StateVector::default()))
	}

	/// Encode the changes missing from the given remote state vector.
	pub fn encode_diff(&self, remote: &yrs::StateVector) -> EpiResult<Vec<u8>> {
		let txn = self.read()?;
		Ok(txn.encode_state_as_update_v1(remote))
	}

	pub fn state_vector(&self) -> EpiResult<yrs::StateVector> {
		let txn = self.read()?;
		Ok(txn.state_vector())
	}

	/// Apply a binary update. Remote deliveries must pass the provider's
	/// origin so local observers see a non-null provenance.
	pub fn apply_update(&self, bytes: &[u8], origin: Option<Origin>) -> EpiResult<()> {
		let update = Update::decode_v1(bytes)
			.map_err(|err| Error::Parse(format!("update decode: {}", err)))?;
		let mut txn = match origin {
			Some(origin) => self.write_with(origin)?,
			None => self.write()?,
		};
		txn.apply_update(update)
			.map_err(|err| Error::Internal(format!("update apply: {}", err)))
	}

	/// Subscribe to committed updates (v1 encoding). The callback receives
	/// the encoded delta and the transaction origin tag.
	pub fn observe_update<F>(&self, callback: F) -> EpiResult<UpdateObserver>
	where
		F: Fn(&[u8], Option<String>) + Send + Sync + 'static,
	{
		self.ensure_alive()?;
		let sub = self
			.inner
			.doc
			.observe_update_v1(move |txn, event| {
				callback(&event.update, origin_str(txn));
			})
			.map_err(|err| Error::Internal(format!("update observer: {}", err)))?;
		Ok(UpdateObserver { _sub: sub })
	}

	/// JSON projection of every root structure. Used for human-readable
	/// mirrors and debugging; never read back.
	pub fn to_json(&self) -> EpiResult<Value> {
		let txn = self.read()?;
		let mut obj = JsonMap::new();
		for (name, out) in txn.root_refs() {
			obj.insert(name.to_string(), out_to_value(&txn, &out));
		}
		Ok(Value::Object(obj))
	}
}

/// Extract a transaction's origin as a UTF-8 string tag. Local writes have
/// no origin; providers tag their transactions with their name.
pub fn origin_str(txn: &TransactionMut) -> Option<String> {
	txn.origin().map(|origin| String::from_utf8_lossy(origin.as_ref()).into_owned())
}

/// Fetch a nested map under `key`, creating it when absent. A non-map value
/// under the key is replaced.
pub fn nested_map(txn: &mut TransactionMut, map: &MapRef, key: &str) -> MapRef {
	match map.get(txn, key) {
		Some(yrs::Out::YMap(inner)) => inner,
		_ => map.insert(txn, key, MapPrelim::default()),
	}
}

/// Fetch a nested map under `key` without creating it.
pub fn get_nested_map<T: ReadTxn>(txn: &T, map: &MapRef, key: &str) -> Option<MapRef> {
	match map.get(txn, key) {
		Some(yrs::Out::YMap(inner)) => Some(inner),
		_ => None,
	}
}

/// Read a plain JSON value under `key`.
pub fn map_get_value<T: ReadTxn>(txn: &T, map: &MapRef, key: &str) -> Option<Value> {
	map.get(txn, key).map(|out| out_to_value(txn, &out))
}

/// Write a plain JSON value under `key`.
pub fn map_insert_value(txn: &mut TransactionMut, map: &MapRef, key: &str, value: &Value) {
	let any: Any = crate::value::value_to_any(value);
	map.insert(txn, key, any);
}


// vim: ts=4
