//! Orchestrator flows: provider attachment, readiness aggregation, epoch
//! changes, and persistence across client reopen.

mod common;

use serde_json::json;
use std::sync::Arc;

use common::{FailingFactory, MemoryPersistFactory};
use epicenter_crdt::provider::ProviderFactory;
use epicenter_schema::{FieldSchema, RowSchema, TableSchema, TableSpec, WorkspaceSchema};
use epicenter_types::types::Epoch;
use epicenter_workspace::{Orchestrator, OrchestratorOptions, RowStatus};

fn notes_workspace() -> WorkspaceSchema {
	WorkspaceSchema::new().with_table(
		"notes",
		TableSpec::new(
			"Notes",
			TableSchema::new(RowSchema::new([
				("id".to_string(), FieldSchema::Id),
				("title".to_string(), FieldSchema::text()),
			])),
		),
	)
}

fn options_with(factory: Arc<dyn ProviderFactory>) -> OrchestratorOptions {
	OrchestratorOptions { factories: vec![factory], ..Default::default() }
}

#[tokio::test]
async fn test_head_requires_registered_workspace() {
	let orchestrator = Orchestrator::new(OrchestratorOptions::default()).await.unwrap();
	orchestrator.registry().add_workspace("w1").unwrap();

	let err = orchestrator.head("ghost").await.unwrap_err();
	assert_eq!(err.code(), "E-WS-NOTFOUND");
	assert!(err.to_string().contains("w1"));

	assert!(orchestrator.head("w1").await.is_ok());
}

#[tokio::test]
async fn test_head_is_created_lazily_and_cached() {
	let orchestrator = Orchestrator::new(OrchestratorOptions::default()).await.unwrap();
	orchestrator.registry().add_workspace("w1").unwrap();

	let first = orchestrator.head("w1").await.unwrap();
	let second = orchestrator.head("w1").await.unwrap();
	assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn test_client_opens_at_current_epoch() {
	let orchestrator = Orchestrator::new(OrchestratorOptions::default()).await.unwrap();
	orchestrator.registry().add_workspace("w1").unwrap();
	orchestrator.head("w1").await.unwrap().bump().unwrap();

	let client = orchestrator.client("w1", notes_workspace()).await.unwrap();
	assert_eq!(client.epoch(), Epoch(1));
	assert_eq!(client.data().doc().id(), "w1-1");
	client.destroy().await;
}

#[tokio::test]
async fn test_when_synced_aggregates_providers() {
	let factory = Arc::new(MemoryPersistFactory::new());
	let orchestrator = Orchestrator::new(options_with(factory)).await.unwrap();
	orchestrator.registry().add_workspace("w1").unwrap();

	let client = orchestrator.client("w1", notes_workspace()).await.unwrap();
	client.when_synced().await.unwrap();
	client.destroy().await;
}

#[tokio::test]
async fn test_failing_provider_rejects_when_synced_but_destroy_is_safe() {
	let orchestrator = Orchestrator::new(options_with(Arc::new(FailingFactory))).await.unwrap();
	orchestrator.registry().add_workspace("w1").unwrap();

	let client = orchestrator.client("w1", notes_workspace()).await.unwrap();
	let err = client.when_synced().await.unwrap_err();
	assert_eq!(err.code(), "E-PROVIDER-INIT");

	// Destroy settles the failing provider without propagating.
	client.destroy().await;
	client.destroy().await;
}

#[tokio::test]
async fn test_rows_survive_client_reopen_via_persistence() {
	let factory = Arc::new(MemoryPersistFactory::new());
	let orchestrator = Orchestrator::new(options_with(factory.clone())).await.unwrap();
	orchestrator.registry().add_workspace("w1").unwrap();

	let client = orchestrator.client("w1", notes_workspace()).await.unwrap();
	client.when_synced().await.unwrap();
	client.data().table("notes").unwrap().set(&json!({"id": "1", "title": "kept"})).unwrap();
	client.destroy().await;

	let reopened = orchestrator.client("w1", notes_workspace()).await.unwrap();
	reopened.when_synced().await.unwrap();
	assert_eq!(
		reopened.data().table("notes").unwrap().get("1").unwrap(),
		RowStatus::Valid { row: json!({"id": "1", "title": "kept"}) }
	);
	reopened.destroy().await;
}

#[tokio::test]
async fn test_storage_keys_follow_logical_layout() {
	let factory = Arc::new(MemoryPersistFactory::new());
	let orchestrator = Orchestrator::new(options_with(factory.clone())).await.unwrap();
	orchestrator.registry().add_workspace("w1").unwrap();

	let head = orchestrator.head("w1").await.unwrap();
	head.bump().unwrap();
	let client = orchestrator.client("w1", notes_workspace()).await.unwrap();
	client.data().table("notes").unwrap().set(&json!({"id": "1", "title": "t"})).unwrap();
	client.destroy().await;

	assert_eq!(factory.storage_keys(), vec![
		"registry".to_string(),
		"workspaces/w1/1/data".to_string(),
		"workspaces/w1/head".to_string(),
	]);
}

#[tokio::test]
async fn test_epoch_bump_orphans_old_client_writes() {
	let factory = Arc::new(MemoryPersistFactory::new());
	let orchestrator = Orchestrator::new(options_with(factory.clone())).await.unwrap();
	orchestrator.registry().add_workspace("w1").unwrap();

	let client = orchestrator.client("w1", notes_workspace()).await.unwrap();
	assert_eq!(client.epoch(), Epoch(0));
	client.data().table("notes").unwrap().set(&json!({"id": "old", "title": "orphan"})).unwrap();

	// Epoch bump: the new client opens a fresh document identity.
	client.head().bump().unwrap();
	let fresh = orchestrator.reopen(client).await.unwrap();
	assert_eq!(fresh.epoch(), Epoch(1));
	assert_eq!(
		fresh.data().table("notes").unwrap().get("old").unwrap(),
		RowStatus::NotFound { id: "old".into() }
	);

	// The orphaned write still exists under the old epoch's storage key.
	assert!(factory.storage_keys().contains(&"workspaces/w1/0/data".to_string()));
	fresh.destroy().await;
}

#[tokio::test]
async fn test_epoch_observation_drives_reopen() {
	let orchestrator = Orchestrator::new(OrchestratorOptions::default()).await.unwrap();
	orchestrator.registry().add_workspace("w1").unwrap();

	let client = orchestrator.client("w1", notes_workspace()).await.unwrap();
	let head = Arc::clone(client.head());

	let (tx, rx) = std::sync::mpsc::channel();
	let _guard = head.observe_epoch(move |epoch| {
		let _ = tx.send(epoch);
	});

	head.bump().unwrap();
	let observed = rx.recv().unwrap();
	assert_eq!(observed, Epoch(1));

	let fresh = orchestrator.reopen(client).await.unwrap();
	assert_eq!(fresh.epoch(), observed);
	fresh.destroy().await;
}

#[tokio::test]
async fn test_close_workspace_and_orchestrator_destroy() {
	let orchestrator = Orchestrator::new(OrchestratorOptions::default()).await.unwrap();
	orchestrator.registry().add_workspace("w1").unwrap();
	orchestrator.registry().add_workspace("w2").unwrap();

	let head = orchestrator.head("w1").await.unwrap();
	orchestrator.close_workspace("w1").await;
	assert!(head.epoch().is_err());

	orchestrator.destroy().await;
	assert!(orchestrator.registry().workspace_ids().is_err());
}
