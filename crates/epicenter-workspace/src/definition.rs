//! Definition helper: the schema stored inside a data document.
//!
//! The `definition` subtree holds two maps, `tables` and `kv`, keyed by
//! storage name. Table entries carry display metadata plus a `fields` map
//! whose entries are written individually, so concurrent schema edits merge
//! per field rather than clobbering whole tables.

use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use yrs::types::EntryChange;
use yrs::{DeepObservable, Map, MapRef, Observable, Subscription, TransactionMut};

use epicenter_crdt::doc::{DocHandle, get_nested_map, map_get_value, map_insert_value, nested_map,
	origin_str};
use epicenter_schema::{FieldSchema, KvDef, TableDef};

use crate::observer::{CrdtObserver, ObserverGuard, Subscriptions};
use crate::prelude::*;

const DEFINITION_MAP: &str = "definition";
const TABLES_KEY: &str = "tables";
const KV_KEY: &str = "kv";
const FIELDS_KEY: &str = "fields";

/// Change kind reported by definition observers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DefChange {
	Added,
	Updated,
	Deleted,
}

/// Table display metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableMeta {
	pub name: String,
	pub icon: Option<String>,
	pub description: String,
}

/// Partial metadata update. Absent fields are left untouched; `icon`
/// distinguishes "clear" from "leave alone".
#[derive(Clone, Debug, Default)]
pub struct TableMetaPatch {
	pub name: Option<String>,
	pub icon: Patch<String>,
	pub description: Option<String>,
}

type DeepCallback = dyn Fn() + Send + Sync;
type DefCallback = dyn Fn(&BTreeMap<String, DefChange>, Option<&str>) + Send + Sync;

/// Helper over the `definition` subtree of a data document.
pub struct DefinitionHelper {
	doc: DocHandle,
	tables_map: MapRef,
	kv_map: MapRef,
	deep_subs: Arc<Subscriptions<DeepCallback>>,
	table_subs: Arc<Subscriptions<DefCallback>>,
	kv_subs: Arc<Subscriptions<DefCallback>>,
	_deep_sub: Subscription,
	_tables_sub: Subscription,
	_kv_sub: Subscription,
}

impl std::fmt::Debug for DefinitionHelper {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DefinitionHelper").field("doc", &self.doc.id()).finish()
	}
}

impl DefinitionHelper {
	pub(crate) fn new(doc: DocHandle) -> EpiResult<Self> {
		let root = doc.map(DEFINITION_MAP);
		let (tables_map, kv_map) = {
			let mut txn = doc.write()?;
			let tables = nested_map(&mut txn, &root, TABLES_KEY);
			let kv = nested_map(&mut txn, &root, KV_KEY);
			(tables, kv)
		};

		let deep_subs: Arc<Subscriptions<DeepCallback>> = Arc::new(Subscriptions::new());
		let observed_deep = Arc::clone(&deep_subs);
		let deep_sub = root.observe_deep(move |_txn, _events| {
			for callback in observed_deep.snapshot() {
				callback();
			}
		});

		let table_subs: Arc<Subscriptions<DefCallback>> = Arc::new(Subscriptions::new());
		let observed_tables = Arc::clone(&table_subs);
		let tables_sub = tables_map.observe(move |txn, event| {
			let mut changes = BTreeMap::new();
			for (key, entry) in event.keys(txn) {
				// Whole-table granularity: a replaced entry reads as an add.
				let change = match entry {
					EntryChange::Inserted(_) | EntryChange::Updated(_, _) => DefChange::Added,
					EntryChange::Removed(_) => DefChange::Deleted,
				};
				changes.insert(key.to_string(), change);
			}
			if changes.is_empty() {
				return;
			}
			let origin = origin_str(txn);
			for callback in observed_tables.snapshot() {
				callback(&changes, origin.as_deref());
			}
		});

		let kv_subs: Arc<Subscriptions<DefCallback>> = Arc::new(Subscriptions::new());
		let observed_kv = Arc::clone(&kv_subs);
		let kv_sub = kv_map.observe(move |txn, event| {
			let mut changes = BTreeMap::new();
			for (key, entry) in event.keys(txn) {
				let change = match entry {
					EntryChange::Inserted(_) | EntryChange::Updated(_, _) => DefChange::Added,
					EntryChange::Removed(_) => DefChange::Deleted,
				};
				changes.insert(key.to_string(), change);
			}
			if changes.is_empty() {
				return;
			}
			let origin = origin_str(txn);
			for callback in observed_kv.snapshot() {
				callback(&changes, origin.as_deref());
			}
		});

		Ok(Self {
			doc,
			tables_map,
			kv_map,
			deep_subs,
			table_subs,
			kv_subs,
			_deep_sub: deep_sub,
			_tables_sub: tables_sub,
			_kv_sub: kv_sub,
		})
	}

	/// Sub-helper over the table definitions.
	pub fn tables(&self) -> TableDefs<'_> {
		TableDefs { def: self }
	}

	/// Sub-helper over the KV definitions.
	pub fn kv(&self) -> KvDefs<'_> {
		KvDefs { def: self }
	}

	/// Observe the whole definition subtree: one callback per commit that
	/// touched anything below `definition`, coarse-grained by design —
	/// callers re-read what they need.
	pub fn observe<F>(&self, callback: F) -> ObserverGuard<DeepCallback>
	where
		F: Fn() + Send + Sync + 'static,
	{
		self.deep_subs.insert(Arc::new(callback))
	}

	/// Bulk-apply partial definitions inside a single transaction,
	/// comparing leaf-by-leaf so re-applying an identical input writes
	/// nothing. Returns the number of leaf writes performed.
	pub fn merge(
		&self,
		tables: &BTreeMap<String, TableDef>,
		kv: &BTreeMap<String, KvDef>,
	) -> EpiResult<usize> {
		let mut txn = self.doc.write()?;
		let mut writes = 0;
		for (key, def) in tables {
			let entry = nested_map(&mut txn, &self.tables_map, key);
			writes += merge_leaf(&mut txn, &entry, "name", &json!(def.name));
			writes += merge_leaf(&mut txn, &entry, "icon", &json!(def.icon));
			writes += merge_leaf(&mut txn, &entry, "description", &json!(def.description));
			let fields = nested_map(&mut txn, &entry, FIELDS_KEY);
			for (field_name, field) in &def.fields {
				writes += merge_leaf(&mut txn, &fields, field_name, &serde_json::to_value(field)?);
			}
		}
		for (key, def) in kv {
			let entry = nested_map(&mut txn, &self.kv_map, key);
			writes += merge_leaf(&mut txn, &entry, "name", &json!(def.name));
			writes += merge_leaf(&mut txn, &entry, "icon", &json!(def.icon));
			writes += merge_leaf(&mut txn, &entry, "description", &json!(def.description));
			writes += merge_leaf(&mut txn, &entry, "field", &serde_json::to_value(&def.field)?);
		}
		if writes > 0 {
			debug!(doc = %self.doc.id(), writes, "definition merge applied");
		}
		Ok(writes)
	}
}

/// Write `value` under `key` only when the stored value differs.
fn merge_leaf(txn: &mut TransactionMut, map: &MapRef, key: &str, value: &Value) -> usize {
	if map_get_value(txn, map, key).as_ref() == Some(value) {
		0
	} else {
		map_insert_value(txn, map, key, value);
		1
	}
}

/// Table definitions, keyed by table name.
pub struct TableDefs<'a> {
	def: &'a DefinitionHelper,
}

impl<'a> TableDefs<'a> {
	/// Create or replace a table definition. Field entries are written
	/// individually; fields missing from `def` are removed.
	pub fn set(&self, name: &str, def: &TableDef) -> EpiResult<()> {
		let mut txn = self.def.doc.write()?;
		let entry = nested_map(&mut txn, &self.def.tables_map, name);
		map_insert_value(&mut txn, &entry, "name", &json!(def.name));
		map_insert_value(&mut txn, &entry, "icon", &json!(def.icon));
		map_insert_value(&mut txn, &entry, "description", &json!(def.description));
		let fields = nested_map(&mut txn, &entry, FIELDS_KEY);
		let stale: Vec<String> = fields
			.keys(&txn)
			.map(str::to_string)
			.filter(|existing| !def.fields.contains_key(existing))
			.collect();
		for field_name in stale {
			fields.remove(&mut txn, &field_name);
		}
		for (field_name, field) in &def.fields {
			map_insert_value(&mut txn, &fields, field_name, &serde_json::to_value(field)?);
		}
		Ok(())
	}

	pub fn get(&self, name: &str) -> EpiResult<Option<TableDef>> {
		let txn = self.def.doc.read()?;
		let Some(entry) = get_nested_map(&txn, &self.def.tables_map, name) else {
			return Ok(None);
		};
		Ok(Some(read_table_def(&txn, &entry, name)))
	}

	pub fn get_all(&self) -> EpiResult<BTreeMap<String, TableDef>> {
		let txn = self.def.doc.read()?;
		let mut defs = BTreeMap::new();
		let names: Vec<String> = self.def.tables_map.keys(&txn).map(str::to_string).collect();
		for name in names {
			if let Some(entry) = get_nested_map(&txn, &self.def.tables_map, &name) {
				defs.insert(name.clone(), read_table_def(&txn, &entry, &name));
			}
		}
		Ok(defs)
	}

	pub fn has(&self, name: &str) -> EpiResult<bool> {
		let txn = self.def.doc.read()?;
		Ok(self.def.tables_map.contains_key(&txn, name))
	}

	pub fn delete(&self, name: &str) -> EpiResult<bool> {
		let mut txn = self.def.doc.write()?;
		Ok(self.def.tables_map.remove(&mut txn, name).is_some())
	}

	pub fn keys(&self) -> EpiResult<Vec<String>> {
		let txn = self.def.doc.read()?;
		let mut keys: Vec<String> = self.def.tables_map.keys(&txn).map(str::to_string).collect();
		keys.sort();
		Ok(keys)
	}

	/// Per-table accessor for field and metadata operations.
	pub fn entry(&self, name: &str) -> TableEntry<'a> {
		TableEntry { def: self.def, name: name.to_string() }
	}

	/// Observe whole-table adds and deletes. Field-level edits inside a
	/// table do not fire here; use the per-table `fields().observe`.
	pub fn observe<F>(&self, callback: F) -> ObserverGuard<DefCallback>
	where
		F: Fn(&BTreeMap<String, DefChange>, Option<&str>) + Send + Sync + 'static,
	{
		self.def.table_subs.insert(Arc::new(callback))
	}
}

/// Per-table definition accessor.
pub struct TableEntry<'a> {
	def: &'a DefinitionHelper,
	name: String,
}

impl TableEntry<'_> {
	fn entry_map(&self, txn: &mut TransactionMut) -> MapRef {
		nested_map(txn, &self.def.tables_map, &self.name)
	}

	// -- fields ------------------------------------------------------------

	pub fn field(&self, field_name: &str) -> EpiResult<Option<FieldSchema>> {
		let txn = self.def.doc.read()?;
		let Some(entry) = get_nested_map(&txn, &self.def.tables_map, &self.name) else {
			return Ok(None);
		};
		let Some(fields) = get_nested_map(&txn, &entry, FIELDS_KEY) else {
			return Ok(None);
		};
		Ok(map_get_value(&txn, &fields, field_name).and_then(parse_field))
	}

	pub fn fields(&self) -> EpiResult<BTreeMap<String, FieldSchema>> {
		let txn = self.def.doc.read()?;
		let mut all = BTreeMap::new();
		if let Some(entry) = get_nested_map(&txn, &self.def.tables_map, &self.name)
			&& let Some(fields) = get_nested_map(&txn, &entry, FIELDS_KEY)
		{
			let names: Vec<String> = fields.keys(&txn).map(str::to_string).collect();
			for name in names {
				if let Some(field) = map_get_value(&txn, &fields, &name).and_then(parse_field) {
					all.insert(name, field);
				}
			}
		}
		Ok(all)
	}

	pub fn set_field(&self, field_name: &str, field: &FieldSchema) -> EpiResult<()> {
		let mut txn = self.def.doc.write()?;
		let entry = self.entry_map(&mut txn);
		let fields = nested_map(&mut txn, &entry, FIELDS_KEY);
		map_insert_value(&mut txn, &fields, field_name, &serde_json::to_value(field)?);
		Ok(())
	}

	pub fn delete_field(&self, field_name: &str) -> EpiResult<bool> {
		let mut txn = self.def.doc.write()?;
		let entry = self.entry_map(&mut txn);
		let fields = nested_map(&mut txn, &entry, FIELDS_KEY);
		Ok(fields.remove(&mut txn, field_name).is_some())
	}

	pub fn has_field(&self, field_name: &str) -> EpiResult<bool> {
		Ok(self.field(field_name)?.is_some())
	}

	pub fn field_names(&self) -> EpiResult<Vec<String>> {
		Ok(self.fields()?.into_keys().collect())
	}

	/// Observe this table's field map. Fires per commit with the changed
	/// field names.
	pub fn observe_fields<F>(&self, callback: F) -> EpiResult<CrdtObserver>
	where
		F: Fn(&BTreeMap<String, DefChange>, Option<&str>) + Send + Sync + 'static,
	{
		let fields = {
			let mut txn = self.def.doc.write()?;
			let entry = self.entry_map(&mut txn);
			nested_map(&mut txn, &entry, FIELDS_KEY)
		};
		let sub = fields.observe(move |txn, event| {
			let mut changes = BTreeMap::new();
			for (key, entry) in event.keys(txn) {
				let change = match entry {
					EntryChange::Inserted(_) => DefChange::Added,
					EntryChange::Updated(_, _) => DefChange::Updated,
					EntryChange::Removed(_) => DefChange::Deleted,
				};
				changes.insert(key.to_string(), change);
			}
			if !changes.is_empty() {
				let origin = origin_str(txn);
				callback(&changes, origin.as_deref());
			}
		});
		Ok(CrdtObserver(sub))
	}

	// -- metadata ----------------------------------------------------------

	pub fn metadata(&self) -> EpiResult<Option<TableMeta>> {
		let txn = self.def.doc.read()?;
		let Some(entry) = get_nested_map(&txn, &self.def.tables_map, &self.name) else {
			return Ok(None);
		};
		let name = map_get_value(&txn, &entry, "name")
			.and_then(|v| v.as_str().map(str::to_string))
			.unwrap_or_else(|| self.name.clone());
		let icon = map_get_value(&txn, &entry, "icon")
			.and_then(|v| v.as_str().map(str::to_string));
		let description = map_get_value(&txn, &entry, "description")
			.and_then(|v| v.as_str().map(str::to_string))
			.unwrap_or_default();
		Ok(Some(TableMeta { name, icon, description }))
	}

	/// Partial metadata update; untouched fields keep their stored value.
	pub fn set_metadata(&self, patch: &TableMetaPatch) -> EpiResult<()> {
		let mut txn = self.def.doc.write()?;
		let entry = self.entry_map(&mut txn);
		if let Some(name) = &patch.name {
			map_insert_value(&mut txn, &entry, "name", &json!(name));
		}
		match &patch.icon {
			Patch::Undefined => {}
			Patch::Null => map_insert_value(&mut txn, &entry, "icon", &Value::Null),
			Patch::Value(icon) => map_insert_value(&mut txn, &entry, "icon", &json!(icon)),
		}
		if let Some(description) = &patch.description {
			map_insert_value(&mut txn, &entry, "description", &json!(description));
		}
		Ok(())
	}

	/// Observe metadata changes on this table entry (name, icon,
	/// description).
	pub fn observe_metadata<F>(&self, callback: F) -> EpiResult<CrdtObserver>
	where
		F: Fn(Option<&str>) + Send + Sync + 'static,
	{
		let entry = {
			let mut txn = self.def.doc.write()?;
			self.entry_map(&mut txn)
		};
		let sub = entry.observe(move |txn, event| {
			let meta_changed = event
				.keys(txn)
				.keys()
				.any(|key| matches!(key.as_ref(), "name" | "icon" | "description"));
			if meta_changed {
				callback(origin_str(txn).as_deref());
			}
		});
		Ok(CrdtObserver(sub))
	}
}

/// KV definitions, keyed by setting name.
pub struct KvDefs<'a> {
	def: &'a DefinitionHelper,
}

impl KvDefs<'_> {
	pub fn set(&self, name: &str, def: &KvDef) -> EpiResult<()> {
		let mut txn = self.def.doc.write()?;
		let entry = nested_map(&mut txn, &self.def.kv_map, name);
		map_insert_value(&mut txn, &entry, "name", &json!(def.name));
		map_insert_value(&mut txn, &entry, "icon", &json!(def.icon));
		map_insert_value(&mut txn, &entry, "description", &json!(def.description));
		map_insert_value(&mut txn, &entry, "field", &serde_json::to_value(&def.field)?);
		Ok(())
	}

	pub fn get(&self, name: &str) -> EpiResult<Option<KvDef>> {
		let txn = self.def.doc.read()?;
		let Some(entry) = get_nested_map(&txn, &self.def.kv_map, name) else {
			return Ok(None);
		};
		Ok(read_kv_def(&txn, &entry, name))
	}

	pub fn get_all(&self) -> EpiResult<BTreeMap<String, KvDef>> {
		let txn = self.def.doc.read()?;
		let mut defs = BTreeMap::new();
		let names: Vec<String> = self.def.kv_map.keys(&txn).map(str::to_string).collect();
		for name in names {
			if let Some(entry) = get_nested_map(&txn, &self.def.kv_map, &name)
				&& let Some(def) = read_kv_def(&txn, &entry, &name)
			{
				defs.insert(name, def);
			}
		}
		Ok(defs)
	}

	pub fn has(&self, name: &str) -> EpiResult<bool> {
		let txn = self.def.doc.read()?;
		Ok(self.def.kv_map.contains_key(&txn, name))
	}

	pub fn delete(&self, name: &str) -> EpiResult<bool> {
		let mut txn = self.def.doc.write()?;
		Ok(self.def.kv_map.remove(&mut txn, name).is_some())
	}

	pub fn keys(&self) -> EpiResult<Vec<String>> {
		let txn = self.def.doc.read()?;
		let mut keys: Vec<String> = self.def.kv_map.keys(&txn).map(str::to_string).collect();
		keys.sort();
		Ok(keys)
	}

	pub fn observe<F>(&self, callback: F) -> ObserverGuard<DefCallback>
	where
		F: Fn(&BTreeMap<String, DefChange>, Option<&str>) + Send + Sync + 'static,
	{
		self.def.kv_subs.insert(Arc::new(callback))
	}
}

fn parse_field(value: Value) -> Option<FieldSchema> {
	match serde_json::from_value(value) {
		Ok(field) => Some(field),
		Err(err) => {
			warn!(error = %err, "skipping malformed field definition");
			None
		}
	}
}

fn read_table_def<T: yrs::ReadTxn>(txn: &T, entry: &MapRef, fallback_name: &str) -> TableDef {
	let name = map_get_value(txn, entry, "name")
		.and_then(|v| v.as_str().map(str::to_string))
		.unwrap_or_else(|| fallback_name.to_string());
	let icon = map_get_value(txn, entry, "icon").and_then(|v| v.as_str().map(str::to_string));
	let description = map_get_value(txn, entry, "description")
		.and_then(|v| v.as_str().map(str::to_string))
		.unwrap_or_default();
	let mut fields = BTreeMap::new();
	if let Some(fields_map) = get_nested_map(txn, entry, FIELDS_KEY) {
		let names: Vec<String> = fields_map.keys(txn).map(str::to_string).collect();
		for field_name in names {
			if let Some(field) = map_get_value(txn, &fields_map, &field_name).and_then(parse_field)
			{
				fields.insert(field_name, field);
			}
		}
	}
	TableDef { name, icon, description, fields }
}

fn read_kv_def<T: yrs::ReadTxn>(txn: &T, entry: &MapRef, fallback_name: &str) -> Option<KvDef> {
	let field = map_get_value(txn, entry, "field").and_then(parse_field)?;
	let name = map_get_value(txn, entry, "name")
		.and_then(|v| v.as_str().map(str::to_string))
		.unwrap_or_else(|| fallback_name.to_string());
	let icon = map_get_value(txn, entry, "icon").and_then(|v| v.as_str().map(str::to_string));
	let description = map_get_value(txn, entry, "description")
		.and_then(|v| v.as_str().map(str::to_string))
		.unwrap_or_default();
	Some(KvDef { name, icon, description, field })
}

// vim: ts=4
