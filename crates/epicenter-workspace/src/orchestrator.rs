//! Orchestrator: composes the document graph.
//!
//! Owns the registry, a lazy map of head documents, and opens data clients
//! at the head's current epoch. Configured provider factories are attached
//! to every document the orchestrator opens, with storage keys following
//! the logical layout `registry`, `workspaces/{id}/head`,
//! `workspaces/{id}/{epoch}/data`.
//!
//! Epoch-change policy: the orchestrator never closes a client behind the
//! caller's back. Observing the head and calling `reopen` is the caller's
//! move; once a new client is open, writes on the superseded client stay in
//! the old epoch's document and are not forwarded.

use std::collections::HashMap;
use std::sync::Arc;

use epicenter_crdt::provider::{ProviderFactory, ProviderPaths};
use epicenter_schema::WorkspaceSchema;

use crate::data::DataDoc;
use crate::head::HeadDoc;
use crate::prelude::*;
use crate::registry::RegistryDoc;

/// Orchestrator configuration. All fields have working defaults: no
/// factories, no filesystem paths, client key derived per document.
#[derive(Default)]
pub struct OrchestratorOptions {
	/// Filesystem anchors handed to providers on node-like hosts.
	pub paths: Option<ProviderPaths>,
	/// Provider factories attached to every document.
	pub factories: Vec<Arc<dyn ProviderFactory>>,
	/// Stable client key for head epoch proposals. Defaults to each head
	/// document's own client id.
	pub client_key: Option<String>,
}

impl std::fmt::Debug for OrchestratorOptions {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("OrchestratorOptions")
			.field("paths", &self.paths)
			.field("factories", &self.factories.len())
			.field("client_key", &self.client_key)
			.finish()
	}
}

/// Open data client for one workspace at one epoch.
pub struct WorkspaceClient {
	data: Arc<DataDoc>,
	head: Arc<HeadDoc>,
}

impl std::fmt::Debug for WorkspaceClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("WorkspaceClient").field("data", &self.data).finish()
	}
}

impl WorkspaceClient {
	pub fn data(&self) -> &DataDoc {
		&self.data
	}

	pub fn head(&self) -> &Arc<HeadDoc> {
		&self.head
	}

	pub fn epoch(&self) -> Epoch {
		self.data.epoch()
	}

	/// Resolves when every provider on the data document is ready.
	pub async fn when_synced(&self) -> EpiResult<()> {
		self.data.when_synced().await
	}

	/// Destroy the data document's providers (settle all), then the
	/// document.
	pub async fn destroy(&self) {
		self.data.destroy().await;
	}
}

/// The document graph owner. One per user identity; its destruction
/// coincides with process shutdown.
pub struct Orchestrator {
	registry: Arc<RegistryDoc>,
	heads: tokio::sync::Mutex<HashMap<String, Arc<HeadDoc>>>,
	opts: OrchestratorOptions,
}

impl std::fmt::Debug for Orchestrator {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Orchestrator").field("opts", &self.opts).finish()
	}
}

impl Orchestrator {
	/// Create the orchestrator and its registry document eagerly, attaching
	/// every configured provider factory to the registry.
	pub async fn new(opts: OrchestratorOptions) -> EpiResult<Self> {
		let registry = Arc::new(RegistryDoc::new());
		for factory in &opts.factories {
			registry.attach(factory.as_ref(), opts.paths.clone()).await?;
		}
		Ok(Self { registry, heads: tokio::sync::Mutex::new(HashMap::new()), opts })
	}

	pub fn registry(&self) -> &Arc<RegistryDoc> {
		&self.registry
	}

	/// Head document for `workspace_id`, created lazily on first access.
	/// Fails with `WorkspaceNotFound` when the id is not in the registry.
	pub async fn head(&self, workspace_id: &str) -> EpiResult<Arc<HeadDoc>> {
		if !self.registry.has_workspace(workspace_id)? {
			return Err(Error::WorkspaceNotFound {
				workspace: workspace_id.to_string(),
				available: self.registry.workspace_ids()?,
			});
		}
		let mut heads = self.heads.lock().await;
		if let Some(head) = heads.get(workspace_id) {
			return Ok(Arc::clone(head));
		}
		let head = match &self.opts.client_key {
			Some(client_key) => {
				let doc =
					epicenter_crdt::doc::DocHandle::new(format!("{}-head", workspace_id));
				Arc::new(HeadDoc::with_doc(workspace_id, doc, client_key.clone()))
			}
			None => Arc::new(HeadDoc::new(workspace_id)),
		};
		for factory in &self.opts.factories {
			head.attach(factory.as_ref(), self.opts.paths.clone()).await?;
		}
		heads.insert(workspace_id.to_string(), Arc::clone(&head));
		Ok(head)
	}

	/// Open a data client for `workspace_id` at the head's current epoch,
	/// attaching every configured provider factory. The returned client's
	/// `when_synced` is the AND of all providers.
	pub async fn client(
		&self,
		workspace_id: &str,
		schema: WorkspaceSchema,
	) -> EpiResult<WorkspaceClient> {
		let head = self.head(workspace_id).await?;
		let epoch = head.epoch()?;
		let data = Arc::new(DataDoc::new(workspace_id, epoch, schema)?);
		for factory in &self.opts.factories {
			data.attach(factory.as_ref(), self.opts.paths.clone()).await?;
		}
		info!(workspace = %workspace_id, epoch = %epoch, "workspace client opened");
		Ok(WorkspaceClient { data, head })
	}

	/// Destroy `client` and open a fresh one at the head's current epoch.
	/// Pending writes on the old client stay in the old epoch's document.
	pub async fn reopen(&self, client: WorkspaceClient) -> EpiResult<WorkspaceClient> {
		let workspace_id = client.data.workspace_id().to_string();
		let schema = client.data.schema_arc();
		client.destroy().await;
		self.client(&workspace_id, (*schema).clone()).await
	}

	/// Drop a workspace from the working set, destroying its head document.
	pub async fn close_workspace(&self, workspace_id: &str) {
		let head = self.heads.lock().await.remove(workspace_id);
		if let Some(head) = head {
			head.destroy().await;
		}
	}

	/// Destroy every open head and the registry. Active clients are the
	/// caller's to destroy.
	pub async fn destroy(&self) {
		let heads = std::mem::take(&mut *self.heads.lock().await);
		for head in heads.into_values() {
			head.destroy().await;
		}
		self.registry.destroy().await;
	}
}

// vim: ts=4
