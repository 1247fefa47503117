//! Multi-replica convergence: table rows, definitions, and schema merge.

use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

use epicenter_crdt::doc::DocHandle;
use epicenter_schema::{FieldSchema, KvSchema, KvSpec, RowSchema, TableDef, TableSchema, TableSpec,
	WorkspaceSchema};
use epicenter_types::types::{Epoch, Patch};
use epicenter_workspace::{DataDoc, DefChange, TableMetaPatch};

fn tasks_workspace() -> WorkspaceSchema {
	WorkspaceSchema::new()
		.with_table(
			"tasks",
			TableSpec::new(
				"Tasks",
				TableSchema::new(RowSchema::new([
					("id".to_string(), FieldSchema::Id),
					("title".to_string(), FieldSchema::text()),
					(
						"done".to_string(),
						FieldSchema::Boolean { nullable: false, default: Some(false) },
					),
				])),
			)
			.with_icon("check"),
		)
		.with_kv("zoom", KvSpec::new("Zoom", KvSchema::new(FieldSchema::integer())))
}

fn replica(client_id: u64) -> DataDoc {
	let doc = DocHandle::with_client_id("w1-0", client_id);
	DataDoc::with_doc("w1", Epoch(0), doc, tasks_workspace()).unwrap()
}

fn sync(a: &DataDoc, b: &DataDoc) {
	let from_a = a.doc().encode_state().unwrap();
	let from_b = b.doc().encode_state().unwrap();
	b.doc().apply_update(&from_a, Some("sync".into())).unwrap();
	a.doc().apply_update(&from_b, Some("sync".into())).unwrap();
}

#[test]
fn test_concurrent_row_writes_converge() {
	let a = replica(1);
	let b = replica(2);

	a.table("tasks").unwrap().set(&json!({"id": "a1", "title": "from a"})).unwrap();
	b.table("tasks").unwrap().set(&json!({"id": "b1", "title": "from b"})).unwrap();
	sync(&a, &b);

	let rows_a = a.table("tasks").unwrap().get_all_valid().unwrap();
	let rows_b = b.table("tasks").unwrap().get_all_valid().unwrap();
	assert_eq!(rows_a, rows_b);
	assert_eq!(rows_a.len(), 2);
}

#[test]
fn test_kv_converges() {
	let a = replica(1);
	let b = replica(2);
	a.kv().set("zoom", &json!(125)).unwrap();
	sync(&a, &b);
	assert_eq!(b.kv().get("zoom").unwrap().valid(), Some(json!(125)));
}

#[test]
fn test_schema_merge_is_idempotent() {
	let a = replica(1);
	// Construction already merged the schema; repeating writes nothing.
	assert_eq!(a.merge_schema().unwrap(), 0);
	assert_eq!(a.merge_schema().unwrap(), 0);
}

#[test]
fn test_concurrent_identical_schema_merges_converge() {
	let a = replica(1);
	let b = replica(2);
	// Both constructors wrote the same definition concurrently.
	sync(&a, &b);

	let defs_a = a.definition().tables().get_all().unwrap();
	let defs_b = b.definition().tables().get_all().unwrap();
	assert_eq!(defs_a, defs_b);
	assert_eq!(defs_a["tasks"].name, "Tasks");
	assert_eq!(defs_a["tasks"].icon.as_deref(), Some("check"));
	assert_eq!(defs_a["tasks"].fields.len(), 3);

	// And after convergence the merge stays a no-op on both sides.
	assert_eq!(a.merge_schema().unwrap(), 0);
	assert_eq!(b.merge_schema().unwrap(), 0);
}

#[test]
fn test_remote_changes_carry_provider_origin() {
	let a = replica(1);
	let b = replica(2);

	let seen: Arc<Mutex<Vec<Option<String>>>> = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&seen);
	let _guard = b.table("tasks").unwrap().observe(move |_ids, origin| {
		sink.lock().push(origin.map(str::to_string));
	});

	a.table("tasks").unwrap().set(&json!({"id": "a1", "title": "remote"})).unwrap();
	b.doc().apply_update(&a.doc().encode_state().unwrap(), Some("ws-sync".into())).unwrap();

	let seen = seen.lock();
	assert_eq!(seen.len(), 1);
	assert_eq!(seen[0].as_deref(), Some("ws-sync"));
}

#[test]
fn test_definition_table_add_delete_observers() {
	let a = replica(1);

	let seen: Arc<Mutex<Vec<(String, DefChange)>>> = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&seen);
	let tables = a.definition().tables();
	let _guard = tables.observe(move |changes, _origin| {
		for (name, change) in changes {
			sink.lock().push((name.clone(), *change));
		}
	});

	let def = TableDef {
		name: "Links".into(),
		icon: None,
		description: String::new(),
		fields: [("id".to_string(), FieldSchema::Id)].into_iter().collect(),
	};
	tables.set("links", &def).unwrap();
	assert!(tables.has("links").unwrap());
	assert!(tables.delete("links").unwrap());

	let seen = seen.lock();
	assert_eq!(seen.as_slice(), &[
		("links".to_string(), DefChange::Added),
		("links".to_string(), DefChange::Deleted),
	]);
}

#[test]
fn test_definition_field_and_metadata_accessors() {
	let a = replica(1);
	let tables = a.definition().tables();
	let entry = tables.entry("tasks");

	// Field-level edits.
	entry.set_field("due", &FieldSchema::date()).unwrap();
	assert!(entry.has_field("due").unwrap());
	assert_eq!(entry.field("due").unwrap(), Some(FieldSchema::date()));
	assert!(entry.field_names().unwrap().contains(&"due".to_string()));
	assert!(entry.delete_field("due").unwrap());
	assert!(!entry.has_field("due").unwrap());

	// Partial metadata update: description changes, icon cleared, name kept.
	entry
		.set_metadata(&TableMetaPatch {
			name: None,
			icon: Patch::Null,
			description: Some("All the tasks".into()),
		})
		.unwrap();
	let meta = entry.metadata().unwrap().unwrap();
	assert_eq!(meta.name, "Tasks");
	assert_eq!(meta.icon, None);
	assert_eq!(meta.description, "All the tasks");
}

#[test]
fn test_definition_field_observer() {
	let a = replica(1);
	let entry = a.definition().tables().entry("tasks");

	let seen: Arc<Mutex<Vec<(String, DefChange)>>> = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&seen);
	let _obs = entry
		.observe_fields(move |changes, _origin| {
			for (name, change) in changes {
				sink.lock().push((name.clone(), *change));
			}
		})
		.unwrap();

	entry.set_field("due", &FieldSchema::date()).unwrap();
	entry
		.set_field("due", &FieldSchema::Date { nullable: true, default: None })
		.unwrap();
	entry.delete_field("due").unwrap();

	let seen = seen.lock();
	assert_eq!(seen.as_slice(), &[
		("due".to_string(), DefChange::Added),
		("due".to_string(), DefChange::Updated),
		("due".to_string(), DefChange::Deleted),
	]);
}

#[test]
fn test_whole_definition_deep_observer_fires_once_per_commit() {
	let a = replica(1);

	let hits = Arc::new(Mutex::new(0usize));
	let sink = Arc::clone(&hits);
	let _guard = a.definition().observe(move || {
		*sink.lock() += 1;
	});

	let entry = a.definition().tables().entry("tasks");
	entry.set_field("due", &FieldSchema::date()).unwrap();
	entry
		.set_metadata(&TableMetaPatch {
			name: Some("Tasks!".into()),
			icon: Patch::Undefined,
			description: None,
		})
		.unwrap();

	assert_eq!(*hits.lock(), 2);

	// Row writes live outside the definition subtree and must not fire.
	a.table("tasks").unwrap().set(&json!({"id": "1", "title": "t"})).unwrap();
	assert_eq!(*hits.lock(), 2);
}

#[test]
fn test_kv_definition_roundtrip() {
	let a = replica(1);
	let kv_defs = a.definition().kv();
	let stored = kv_defs.get("zoom").unwrap().unwrap();
	assert_eq!(stored.name, "Zoom");
	assert_eq!(stored.field, FieldSchema::integer());
	assert_eq!(kv_defs.keys().unwrap(), vec!["zoom".to_string()]);
}
