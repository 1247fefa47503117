//! Data document: one (workspace, epoch) worth of schema, rows, and
//! settings.
//!
//! The document id is derived as `{workspace}-{epoch}`, so every epoch is a
//! distinct CRDT identity: bumping the epoch abandons the old document and
//! starts a fresh one. Schema definition and data live in the same
//! document, so schema changes and data edits converge together under the
//! CRDT merge.

use std::collections::HashMap;
use std::sync::Arc;

use epicenter_crdt::doc::DocHandle;
use epicenter_crdt::provider::{ProviderContext, ProviderFactory, ProviderPaths};
use epicenter_schema::WorkspaceSchema;
use epicenter_types::lifecycle::{Provider, destroy_all, when_synced_all};

use crate::definition::DefinitionHelper;
use crate::kv::KvHelper;
use crate::prelude::*;
use crate::table::TableHelper;

/// Per-(workspace, epoch) data document.
pub struct DataDoc {
	doc: DocHandle,
	workspace_id: Box<str>,
	epoch: Epoch,
	schema: Arc<WorkspaceSchema>,
	definition: DefinitionHelper,
	kv: KvHelper,
	tables: HashMap<String, TableHelper>,
	providers: parking_lot::Mutex<Vec<Arc<dyn Provider>>>,
}

impl std::fmt::Debug for DataDoc {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DataDoc")
			.field("workspace", &self.workspace_id)
			.field("epoch", &self.epoch)
			.finish()
	}
}

impl DataDoc {
	/// Open the data document for `workspace_id` at `epoch` and merge the
	/// code-defined schema into it.
	pub fn new(workspace_id: &str, epoch: Epoch, schema: WorkspaceSchema) -> EpiResult<Self> {
		let doc = DocHandle::new(format!("{}-{}", workspace_id, epoch));
		Self::with_doc(workspace_id, epoch, doc, schema)
	}

	/// Open over an explicit document handle (tests use this to pin client
	/// ids).
	pub fn with_doc(
		workspace_id: &str,
		epoch: Epoch,
		doc: DocHandle,
		schema: WorkspaceSchema,
	) -> EpiResult<Self> {
		let schema = Arc::new(schema);
		let definition = DefinitionHelper::new(doc.clone())?;
		let kv_specs = Arc::new(schema.kv.clone());
		let kv = KvHelper::new(doc.clone(), kv_specs);
		let mut tables = HashMap::new();
		for (key, spec) in &schema.tables {
			tables.insert(key.clone(), TableHelper::new(doc.clone(), key, spec.schema.clone())?);
		}

		let data = Self {
			doc,
			workspace_id: workspace_id.into(),
			epoch,
			schema,
			definition,
			kv,
			tables,
			providers: parking_lot::Mutex::new(Vec::new()),
		};
		data.merge_schema()?;
		Ok(data)
	}

	pub fn doc(&self) -> &DocHandle {
		&self.doc
	}

	pub fn workspace_id(&self) -> &str {
		&self.workspace_id
	}

	pub fn epoch(&self) -> Epoch {
		self.epoch
	}

	pub fn schema(&self) -> &WorkspaceSchema {
		&self.schema
	}

	pub(crate) fn schema_arc(&self) -> Arc<WorkspaceSchema> {
		Arc::clone(&self.schema)
	}

	/// Merge the code-defined schema into the stored definition inside one
	/// transaction. Entries that already match deep-equally are skipped, so
	/// repeating the call (or racing it from several clients) is safe.
	/// Returns the number of leaf writes.
	pub fn merge_schema(&self) -> EpiResult<usize> {
		self.definition.merge(&self.schema.table_defs(), &self.schema.kv_defs())
	}

	/// The stored schema definition.
	pub fn definition(&self) -> &DefinitionHelper {
		&self.definition
	}

	/// Typed helper for one registered table.
	pub fn table(&self, key: &str) -> EpiResult<&TableHelper> {
		self.tables.get(key).ok_or_else(|| Error::UnknownKey(key.to_string()))
	}

	pub fn table_keys(&self) -> Vec<String> {
		let mut keys: Vec<String> = self.tables.keys().cloned().collect();
		keys.sort();
		keys
	}

	/// Typed helper over the shared KV map.
	pub fn kv(&self) -> &KvHelper {
		&self.kv
	}

	/// Attach a provider produced by `factory`.
	pub async fn attach(
		&self,
		factory: &dyn ProviderFactory,
		paths: Option<ProviderPaths>,
	) -> EpiResult<()> {
		let storage_key =
			format!("workspaces/{}/{}/data", self.workspace_id, self.epoch);
		let mut ctx = ProviderContext::new(self.doc.clone(), storage_key);
		if let Some(paths) = paths {
			ctx = ctx.with_paths(paths);
		}
		let provider = factory.attach(ctx).await?;
		self.providers.lock().push(provider);
		Ok(())
	}

	/// Resolves when every attached provider finished its initial side
	/// effects.
	pub async fn when_synced(&self) -> EpiResult<()> {
		let providers = self.providers.lock().clone();
		when_synced_all(&providers).await
	}

	/// Destroy every provider (settle all), then the document. Safe to call
	/// more than once.
	pub async fn destroy(&self) {
		let providers = std::mem::take(&mut *self.providers.lock());
		destroy_all(&providers).await;
		self.doc.destroy();
	}
}

// vim: ts=4
