//! Provider factory contract.
//!
//! Documents attach providers (persistence, sync, materializers) through
//! factories. A factory receives the document handle plus addressing
//! context and returns a `Provider` implementing the lifecycle contract.
//! On node-like hosts the context also carries filesystem paths; browser
//! hosts leave them absent.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use crate::doc::DocHandle;
use crate::prelude::*;

use epicenter_types::lifecycle::Provider;

/// Filesystem anchor points for providers that persist to disk.
#[derive(Clone, Debug)]
pub struct ProviderPaths {
	/// The user's project directory.
	pub project_dir: PathBuf,
	/// The derived application data directory (`<project>/.epicenter`).
	pub data_dir: PathBuf,
}

impl ProviderPaths {
	pub fn new(project_dir: impl Into<PathBuf>) -> Self {
		let project_dir = project_dir.into();
		let data_dir = project_dir.join(".epicenter");
		Self { project_dir, data_dir }
	}
}

/// Context handed to a provider factory when a document attaches it.
#[derive(Clone, Debug)]
pub struct ProviderContext {
	/// The CRDT document the provider serves. Providers reference the
	/// document; they never keep it alive past its destruction.
	pub doc: DocHandle,
	/// Position of this document in the logical persistence layout, e.g.
	/// `registry`, `workspaces/{id}/head`, `workspaces/{id}/{epoch}/data`.
	pub storage_key: Box<str>,
	/// Filesystem anchors; absent on hosts without a filesystem.
	pub paths: Option<ProviderPaths>,
}

impl ProviderContext {
	pub fn new(doc: DocHandle, storage_key: impl Into<Box<str>>) -> Self {
		Self { doc, storage_key: storage_key.into(), paths: None }
	}

	pub fn with_paths(mut self, paths: ProviderPaths) -> Self {
		self.paths = Some(paths);
		self
	}

	pub fn doc_id(&self) -> &str {
		self.doc.id()
	}
}

/// Factory invoked once per document to produce a provider instance.
///
/// A factory failure surfaces as `ProviderInit` on the attaching document.
/// Factories must not mutate the document outside their own origin-tagged
/// transactions.
#[async_trait]
pub trait ProviderFactory: Send + Sync {
	async fn attach(&self, ctx: ProviderContext) -> EpiResult<Arc<dyn Provider>>;
}


// vim: ts=4
