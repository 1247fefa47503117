//! Table helper: schema-bound typed operations over a CRDT map of rows.
//!
//! A table is a map from row id to a map of field values. Writes validate
//! against the current schema version and fail loudly; reads validate
//! against the version union and surface mismatches as an invalid status
//! with the raw value preserved. Observers coalesce the raw CRDT events of
//! one commit into a single changed-row-id set plus typed
//! add/update/delete events carrying the transaction origin.

use serde_json::{Map as JsonMap, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use yrs::types::{EntryChange, Event, PathSegment};
use yrs::{DeepObservable, Map, MapRef, Subscription, TransactionMut};

use epicenter_crdt::doc::{DocHandle, get_nested_map, map_insert_value, nested_map, origin_str};
use epicenter_crdt::value::out_to_value;
use epicenter_schema::{ReadOutcome, TableSchema};
use epicenter_types::validate::Issue;

use crate::observer::{ObserverGuard, Subscriptions};
use crate::prelude::*;

pub(crate) const TABLES_MAP: &str = "tables";

/// A row that failed validation on read. The raw value is preserved so
/// nothing is lost.
#[derive(Clone, Debug, PartialEq)]
pub struct InvalidRow {
	pub id: String,
	pub row: Value,
	pub errors: Vec<Issue>,
}

/// Result of reading one row.
#[derive(Clone, Debug, PartialEq)]
pub enum RowStatus {
	Valid { row: Value },
	Invalid(InvalidRow),
	NotFound { id: String },
}

impl RowStatus {
	pub fn valid(self) -> Option<Value> {
		match self {
			RowStatus::Valid { row } => Some(row),
			_ => None,
		}
	}
}

/// Result of deleting one row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteStatus {
	Deleted,
	NotFoundLocally,
}

/// Typed per-row change, emitted once per commit per row.
#[derive(Clone, Debug, PartialEq)]
pub enum TableEvent {
	Added { id: String, row: Value },
	Updated { id: String, row: Value },
	Deleted { id: String },
}

impl TableEvent {
	pub fn id(&self) -> &str {
		match self {
			TableEvent::Added { id, .. }
			| TableEvent::Updated { id, .. }
			| TableEvent::Deleted { id } => id,
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChangeKind {
	Added,
	Updated,
	Deleted,
}

type RowSetCallback = dyn Fn(&HashSet<String>, Option<&str>) + Send + Sync;
type TypedCallback = dyn Fn(&[TableEvent], Option<&str>) + Send + Sync;

/// Typed helper over one table.
pub struct TableHelper {
	doc: DocHandle,
	name: Box<str>,
	rows: MapRef,
	schema: Arc<TableSchema>,
	row_subs: Arc<Subscriptions<RowSetCallback>>,
	typed_subs: Arc<Subscriptions<TypedCallback>>,
	_sub: Subscription,
}

impl std::fmt::Debug for TableHelper {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TableHelper")
			.field("doc", &self.doc.id())
			.field("table", &self.name)
			.finish()
	}
}

impl TableHelper {
	pub(crate) fn new(doc: DocHandle, name: &str, schema: TableSchema) -> EpiResult<Self> {
		let tables_root = doc.map(TABLES_MAP);
		let rows = {
			let mut txn = doc.write()?;
			nested_map(&mut txn, &tables_root, name)
		};

		let row_subs: Arc<Subscriptions<RowSetCallback>> = Arc::new(Subscriptions::new());
		let typed_subs: Arc<Subscriptions<TypedCallback>> = Arc::new(Subscriptions::new());

		let observed_rows = rows.clone();
		let observed_row_subs = Arc::clone(&row_subs);
		let observed_typed_subs = Arc::clone(&typed_subs);
		let sub = rows.observe_deep(move |txn, events| {
			let mut changed: BTreeMap<String, ChangeKind> = BTreeMap::new();
			for event in events.iter() {
				let Event::Map(map_event) = event else { continue };
				let path = map_event.path();
				if path.is_empty() {
					for (key, entry) in map_event.keys(txn) {
						let kind = match entry {
							EntryChange::Inserted(_) => ChangeKind::Added,
							EntryChange::Updated(_, _) => ChangeKind::Updated,
							EntryChange::Removed(_) => ChangeKind::Deleted,
						};
						merge_kind(&mut changed, key.to_string(), kind);
					}
				} else if let Some(PathSegment::Key(row_id)) = path.front() {
					merge_kind(&mut changed, row_id.to_string(), ChangeKind::Updated);
				}
			}
			if changed.is_empty() {
				return;
			}

			let origin = origin_str(txn);
			if !observed_row_subs.is_empty() {
				let ids: HashSet<String> = changed.keys().cloned().collect();
				for callback in observed_row_subs.snapshot() {
					callback(&ids, origin.as_deref());
				}
			}
			if !observed_typed_subs.is_empty() {
				let mut typed = Vec::with_capacity(changed.len());
				for (id, kind) in &changed {
					let event = match kind {
						ChangeKind::Deleted => TableEvent::Deleted { id: id.clone() },
						kind => {
							let row = get_nested_map(txn, &observed_rows, id)
								.map(|row_map| out_to_value(txn, &yrs::Out::YMap(row_map)))
								.unwrap_or(Value::Null);
							if *kind == ChangeKind::Added {
								TableEvent::Added { id: id.clone(), row }
							} else {
								TableEvent::Updated { id: id.clone(), row }
							}
						}
					};
					typed.push(event);
				}
				for callback in observed_typed_subs.snapshot() {
					callback(&typed, origin.as_deref());
				}
			}
		});

		Ok(Self {
			doc,
			name: name.into(),
			rows,
			schema: Arc::new(schema),
			row_subs,
			typed_subs,
			_sub: sub,
		})
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn schema(&self) -> &TableSchema {
		&self.schema
	}

	/// Write a full row in a single transaction. The row must validate
	/// under the current schema version.
	pub fn set(&self, row: &Value) -> EpiResult<()> {
		let normalized = self.schema.validate_write(row)?;
		let mut txn = self.doc.write()?;
		write_row(&mut txn, &self.rows, &normalized)
	}

	/// Read one row.
	pub fn get(&self, id: &str) -> EpiResult<RowStatus> {
		let txn = self.doc.read()?;
		self.get_in_txn(&txn, id)
	}

	fn get_in_txn<T: yrs::ReadTxn>(&self, txn: &T, id: &str) -> EpiResult<RowStatus> {
		let Some(row_map) = get_nested_map(txn, &self.rows, id) else {
			return Ok(RowStatus::NotFound { id: id.to_string() });
		};
		let raw = out_to_value(txn, &yrs::Out::YMap(row_map));
		match self.schema.parse_read(&raw)? {
			ReadOutcome::Valid(row) => Ok(RowStatus::Valid { row }),
			ReadOutcome::Invalid(errors) => {
				Ok(RowStatus::Invalid(InvalidRow { id: id.to_string(), row: raw, errors }))
			}
		}
	}

	/// Read every row, sorted by row id.
	pub fn get_all(&self) -> EpiResult<Vec<RowStatus>> {
		let txn = self.doc.read()?;
		let mut ids: Vec<String> = self.rows.keys(&txn).map(str::to_string).collect();
		ids.sort();
		ids.iter().map(|id| self.get_in_txn(&txn, id)).collect()
	}

	/// Every row that parses under the current schema.
	pub fn get_all_valid(&self) -> EpiResult<Vec<Value>> {
		Ok(self.get_all()?.into_iter().filter_map(RowStatus::valid).collect())
	}

	/// Every row that fails validation, with errors and raw values.
	pub fn get_all_invalid(&self) -> EpiResult<Vec<InvalidRow>> {
		Ok(self
			.get_all()?
			.into_iter()
			.filter_map(|status| match status {
				RowStatus::Invalid(invalid) => Some(invalid),
				_ => None,
			})
			.collect())
	}

	/// Valid rows matching the predicate.
	pub fn filter<P>(&self, predicate: P) -> EpiResult<Vec<Value>>
	where
		P: Fn(&Value) -> bool,
	{
		Ok(self.get_all_valid()?.into_iter().filter(|row| predicate(row)).collect())
	}

	/// First valid row matching the predicate.
	pub fn find<P>(&self, predicate: P) -> EpiResult<Option<Value>>
	where
		P: Fn(&Value) -> bool,
	{
		Ok(self.get_all_valid()?.into_iter().find(|row| predicate(row)))
	}

	/// Merge the fields of `partial` into an existing row, field by field,
	/// in one transaction. A missing row is a no-op returning `false`.
	pub fn update(&self, partial: &Value) -> EpiResult<bool> {
		let mut txn = self.doc.write()?;
		update_row(&mut txn, &self.rows, &self.schema, partial)
	}

	/// Delete one row.
	pub fn delete(&self, id: &str) -> EpiResult<DeleteStatus> {
		let mut txn = self.doc.write()?;
		Ok(delete_row(&mut txn, &self.rows, id))
	}

	/// Run several operations in a single transaction; observers fire once
	/// for the whole batch. Batches on the same document do not nest — the
	/// closure receives the transaction facade instead.
	pub fn batch<R, F>(&self, f: F) -> EpiResult<R>
	where
		F: FnOnce(&mut TableTx<'_, '_>) -> EpiResult<R>,
	{
		let mut txn = self.doc.write()?;
		let mut tx = TableTx { txn: &mut txn, rows: &self.rows, schema: &self.schema };
		f(&mut tx)
	}

	/// Remove every row, batched into one transaction.
	pub fn clear(&self) -> EpiResult<()> {
		let mut txn = self.doc.write()?;
		let ids: Vec<String> = self.rows.keys(&txn).map(str::to_string).collect();
		for id in ids {
			self.rows.remove(&mut txn, &id);
		}
		Ok(())
	}

	pub fn count(&self) -> EpiResult<usize> {
		let txn = self.doc.read()?;
		Ok(self.rows.len(&txn) as usize)
	}

	pub fn has(&self, id: &str) -> EpiResult<bool> {
		let txn = self.doc.read()?;
		Ok(self.rows.contains_key(&txn, id))
	}

	/// Observe row changes: one callback per commit carrying exactly the
	/// row ids that changed, plus the transaction origin.
	pub fn observe<F>(&self, callback: F) -> ObserverGuard<RowSetCallback>
	where
		F: Fn(&HashSet<String>, Option<&str>) + Send + Sync + 'static,
	{
		self.row_subs.insert(Arc::new(callback))
	}

	/// Observe typed add/update/delete events, one slice per commit.
	pub fn on_event<F>(&self, callback: F) -> ObserverGuard<TypedCallback>
	where
		F: Fn(&[TableEvent], Option<&str>) + Send + Sync + 'static,
	{
		self.typed_subs.insert(Arc::new(callback))
	}
}

/// Transaction facade passed to `batch` closures.
pub struct TableTx<'a, 'txn> {
	txn: &'a mut TransactionMut<'txn>,
	rows: &'a MapRef,
	schema: &'a TableSchema,
}

impl TableTx<'_, '_> {
	pub fn set(&mut self, row: &Value) -> EpiResult<()> {
		let normalized = self.schema.validate_write(row)?;
		write_row(self.txn, self.rows, &normalized)
	}

	pub fn update(&mut self, partial: &Value) -> EpiResult<bool> {
		update_row(self.txn, self.rows, self.schema, partial)
	}

	pub fn delete(&mut self, id: &str) -> DeleteStatus {
		delete_row(self.txn, self.rows, id)
	}
}

fn merge_kind(changed: &mut BTreeMap<String, ChangeKind>, id: String, kind: ChangeKind) {
	use std::collections::btree_map::Entry;
	match changed.entry(id) {
		Entry::Vacant(slot) => {
			slot.insert(kind);
		}
		Entry::Occupied(mut slot) => {
			let merged = match (*slot.get(), kind) {
				(_, ChangeKind::Deleted) => ChangeKind::Deleted,
				(ChangeKind::Added, _) => ChangeKind::Added,
				(ChangeKind::Deleted, ChangeKind::Added) => ChangeKind::Updated,
				_ => ChangeKind::Updated,
			};
			slot.insert(merged);
		}
	}
}

fn write_row(txn: &mut TransactionMut, rows: &MapRef, normalized: &Value) -> EpiResult<()> {
	let Some(obj) = normalized.as_object() else {
		return Err(Error::Internal("normalized row is not an object".into()));
	};
	let Some(id) = obj.get("id").and_then(Value::as_str) else {
		return Err(Error::Internal("normalized row lost its id".into()));
	};
	let row_map = nested_map(txn, rows, id);
	let stale: Vec<String> = row_map
		.keys(txn)
		.map(str::to_string)
		.filter(|field| !obj.contains_key(field))
		.collect();
	for field in stale {
		row_map.remove(txn, &field);
	}
	for (field, value) in obj {
		map_insert_value(txn, &row_map, field, value);
	}
	Ok(())
}

fn update_row(
	txn: &mut TransactionMut,
	rows: &MapRef,
	schema: &TableSchema,
	partial: &Value,
) -> EpiResult<bool> {
	let Some(patch) = partial.as_object() else {
		return Err(Error::SchemaValidation(vec![Issue::new("expected a partial row object")]));
	};
	let Some(id) = patch.get("id").and_then(Value::as_str) else {
		return Err(Error::SchemaValidation(vec![Issue::at(
			"id",
			"updates require the row id",
		)]));
	};
	let Some(row_map) = get_nested_map(txn, rows, id) else {
		return Ok(false);
	};

	// Validate the merged result before touching anything.
	let mut merged = match out_to_value(txn, &yrs::Out::YMap(row_map.clone())) {
		Value::Object(existing) => existing,
		_ => JsonMap::new(),
	};
	for (field, value) in patch {
		merged.insert(field.clone(), value.clone());
	}
	schema.validate_write(&Value::Object(merged))?;

	for (field, value) in patch {
		if field != "id" {
			map_insert_value(txn, &row_map, field, value);
		}
	}
	Ok(true)
}

fn delete_row(txn: &mut TransactionMut, rows: &MapRef, id: &str) -> DeleteStatus {
	if rows.remove(txn, id).is_some() {
		DeleteStatus::Deleted
	} else {
		DeleteStatus::NotFoundLocally
	}
}

// vim: ts=4
