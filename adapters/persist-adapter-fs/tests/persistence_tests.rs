//! Filesystem provider behavior: snapshot writes, reload, mirror
//! debouncing, and destroy semantics.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use epicenter_crdt::doc::{DocHandle, map_insert_value};
use epicenter_crdt::provider::{ProviderContext, ProviderFactory};
use epicenter_persist_adapter_fs::{FsPersistFactory, FsPersistOptions};
use epicenter_schema::{FieldSchema, RowSchema, TableSchema, TableSpec, WorkspaceSchema};
use epicenter_types::lifecycle::Provider;
use epicenter_types::types::Epoch;
use epicenter_workspace::{DataDoc, RowStatus};

fn fast_factory(root: &TempDir) -> FsPersistFactory {
	FsPersistFactory::with_options(
		root.path(),
		FsPersistOptions { mirror_enabled: true, mirror_debounce: Duration::from_millis(20) },
	)
}

async fn attach(factory: &FsPersistFactory, doc: &DocHandle, key: &str) -> Arc<dyn Provider> {
	factory
		.attach(ProviderContext::new(doc.clone(), key))
		.await
		.expect("attach failed")
}

/// Wait until the writer task has caught up, bounded.
async fn wait_for<F: Fn() -> bool>(what: &str, cond: F) {
	for _ in 0..200 {
		if cond() {
			return;
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
	panic!("timed out waiting for {}", what);
}

#[tokio::test]
async fn test_snapshot_written_on_update() {
	let dir = TempDir::new().expect("tempdir");
	let factory = fast_factory(&dir);
	let doc = DocHandle::new("registry");
	let provider = attach(&factory, &doc, "registry").await;
	provider.when_synced().await.expect("sync");

	{
		let map = doc.map("workspaces");
		let mut txn = doc.write().expect("txn");
		map_insert_value(&mut txn, &map, "w1", &json!(true));
	}

	let bin = dir.path().join("registry.bin");
	wait_for("snapshot file", || bin.exists()).await;
	provider.destroy().await.expect("destroy");
}

#[tokio::test]
async fn test_state_survives_reload() {
	let dir = TempDir::new().expect("tempdir");
	let factory = fast_factory(&dir);

	{
		let doc = DocHandle::new("registry");
		let provider = attach(&factory, &doc, "registry").await;
		provider.when_synced().await.expect("sync");
		let map = doc.map("workspaces");
		{
			let mut txn = doc.write().expect("txn");
			map_insert_value(&mut txn, &map, "w1", &json!(true));
			map_insert_value(&mut txn, &map, "w2", &json!(true));
		}
		provider.destroy().await.expect("destroy");
	}

	let doc = DocHandle::new("registry");
	let provider = attach(&factory, &doc, "registry").await;
	provider.when_synced().await.expect("sync");
	let mirror = doc.to_json().expect("json");
	assert_eq!(mirror["workspaces"], json!({"w1": true, "w2": true}));
	provider.destroy().await.expect("destroy");
}

#[tokio::test]
async fn test_mirror_is_debounced_and_coalesced() {
	let dir = TempDir::new().expect("tempdir");
	let factory = fast_factory(&dir);
	let doc = DocHandle::new("registry");
	let provider = attach(&factory, &doc, "registry").await;
	provider.when_synced().await.expect("sync");

	let map = doc.map("workspaces");
	for i in 0..5 {
		let mut txn = doc.write().expect("txn");
		map_insert_value(&mut txn, &map, &format!("w{}", i), &json!(true));
	}

	let json_path = dir.path().join("registry.json");
	wait_for("mirror file", || json_path.exists()).await;
	let mirror: serde_json::Value =
		serde_json::from_slice(&std::fs::read(&json_path).expect("read mirror"))
			.expect("parse mirror");
	// All five writes coalesce into a mirror that holds the final state.
	assert_eq!(mirror["workspaces"].as_object().map(|o| o.len()), Some(5));
	provider.destroy().await.expect("destroy");
}

#[tokio::test]
async fn test_mirror_can_be_disabled() {
	let dir = TempDir::new().expect("tempdir");
	let factory = FsPersistFactory::with_options(
		dir.path(),
		FsPersistOptions { mirror_enabled: false, mirror_debounce: Duration::from_millis(1) },
	);
	let doc = DocHandle::new("registry");
	let provider = attach(&factory, &doc, "registry").await;

	{
		let map = doc.map("workspaces");
		let mut txn = doc.write().expect("txn");
		map_insert_value(&mut txn, &map, "w1", &json!(true));
	}
	let bin = dir.path().join("registry.bin");
	wait_for("snapshot file", || bin.exists()).await;
	tokio::time::sleep(Duration::from_millis(30)).await;
	assert!(!dir.path().join("registry.json").exists());
	provider.destroy().await.expect("destroy");
}

#[tokio::test]
async fn test_destroy_writes_final_snapshot_and_is_idempotent() {
	let dir = TempDir::new().expect("tempdir");
	let factory = fast_factory(&dir);
	let doc = DocHandle::new("w1-0");
	let provider = attach(&factory, &doc, "workspaces/w1/0/data").await;
	provider.when_synced().await.expect("sync");

	{
		let map = doc.map("kv");
		let mut txn = doc.write().expect("txn");
		map_insert_value(&mut txn, &map, "theme", &json!("dark"));
	}

	provider.destroy().await.expect("destroy");
	provider.destroy().await.expect("destroy twice");

	let snapshots = dir.path().join("workspaces/w1/0/snapshots");
	let entries: Vec<_> = std::fs::read_dir(&snapshots)
		.expect("snapshots dir")
		.filter_map(Result::ok)
		.collect();
	assert_eq!(entries.len(), 1);
}

#[tokio::test]
async fn test_destroy_before_synced_is_safe() {
	let dir = TempDir::new().expect("tempdir");
	let factory = fast_factory(&dir);
	let doc = DocHandle::new("registry");
	let provider = attach(&factory, &doc, "registry").await;
	// No when_synced await; teardown must still be clean.
	provider.destroy().await.expect("destroy");
}

#[tokio::test]
async fn test_corrupt_snapshot_rejects_when_synced() {
	let dir = TempDir::new().expect("tempdir");
	std::fs::write(dir.path().join("registry.bin"), b"not a yjs update").expect("write");

	let factory = fast_factory(&dir);
	let doc = DocHandle::new("registry");
	let provider = attach(&factory, &doc, "registry").await;
	let err = provider.when_synced().await.expect_err("must reject");
	assert_eq!(err.code(), "E-PROVIDER-INIT");
	// Destroy is still safe after a failed initialization.
	provider.destroy().await.expect("destroy");
}

#[tokio::test]
async fn test_full_workspace_document_roundtrip() {
	let dir = TempDir::new().expect("tempdir");
	let factory = fast_factory(&dir);

	let schema = WorkspaceSchema::new().with_table(
		"notes",
		TableSpec::new(
			"Notes",
			TableSchema::new(RowSchema::new([
				("id".to_string(), FieldSchema::Id),
				("title".to_string(), FieldSchema::text()),
			])),
		),
	);

	{
		let data = DataDoc::new("w1", Epoch(0), schema.clone()).expect("data");
		data.attach(&factory, None).await.expect("attach");
		data.when_synced().await.expect("sync");
		data.table("notes")
			.expect("table")
			.set(&json!({"id": "1", "title": "persisted"}))
			.expect("set");
		data.destroy().await;
	}

	let data = DataDoc::new("w1", Epoch(0), schema).expect("data");
	data.attach(&factory, None).await.expect("attach");
	data.when_synced().await.expect("sync");
	assert_eq!(
		data.table("notes").expect("table").get("1").expect("get"),
		RowStatus::Valid { row: json!({"id": "1", "title": "persisted"}) }
	);
	assert!(dir.path().join("workspaces/w1/0/data.bin").exists());
	data.destroy().await;
}
