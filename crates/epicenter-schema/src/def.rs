//! Stored definition records and the code-level workspace schema.
//!
//! `TableDef`/`KvDef` are the shapes persisted inside a data document's
//! `definition` subtree. `WorkspaceSchema` is what application code hands
//! to the runtime when opening a workspace; it carries the versioned
//! schemas and projects down to definition records for the merge step.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::field::FieldSchema;
use crate::table::{KvSpec, TableSpec};

/// Stored definition of one table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
	pub name: String,
	#[serde(default)]
	pub icon: Option<String>,
	#[serde(default)]
	pub description: String,
	pub fields: BTreeMap<String, FieldSchema>,
}

/// Stored definition of one key-value setting.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KvDef {
	pub name: String,
	#[serde(default)]
	pub icon: Option<String>,
	#[serde(default)]
	pub description: String,
	pub field: FieldSchema,
}

impl TableSpec {
	/// Definition record for the current schema version.
	pub fn def(&self) -> TableDef {
		TableDef {
			name: self.name.clone(),
			icon: self.icon.clone(),
			description: self.description.clone(),
			fields: self.schema.current().fields.clone(),
		}
	}
}

impl KvSpec {
	pub fn def(&self) -> KvDef {
		KvDef {
			name: self.name.clone(),
			icon: self.icon.clone(),
			description: self.description.clone(),
			field: self.schema.current().clone(),
		}
	}
}

/// Code-defined schema for a workspace: the tables and settings the
/// application expects, keyed by their storage names.
#[derive(Clone, Debug, Default)]
pub struct WorkspaceSchema {
	pub tables: BTreeMap<String, TableSpec>,
	pub kv: BTreeMap<String, KvSpec>,
}

impl WorkspaceSchema {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_table(mut self, key: impl Into<String>, spec: TableSpec) -> Self {
		self.tables.insert(key.into(), spec);
		self
	}

	pub fn with_kv(mut self, key: impl Into<String>, spec: KvSpec) -> Self {
		self.kv.insert(key.into(), spec);
		self
	}

	/// Definition records for every table, keyed by storage name.
	pub fn table_defs(&self) -> BTreeMap<String, TableDef> {
		self.tables.iter().map(|(key, spec)| (key.clone(), spec.def())).collect()
	}

	pub fn kv_defs(&self) -> BTreeMap<String, KvDef> {
		self.kv.iter().map(|(key, spec)| (key.clone(), spec.def())).collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::table::{KvSchema, RowSchema, TableSchema};

	#[test]
	fn test_spec_projects_to_def() {
		let spec = TableSpec::new(
			"Notes",
			TableSchema::new(RowSchema::new([
				("id".to_string(), FieldSchema::Id),
				("title".to_string(), FieldSchema::text()),
			])),
		)
		.with_icon("note")
		.with_description("Freeform notes");

		let def = spec.def();
		assert_eq!(def.name, "Notes");
		assert_eq!(def.icon.as_deref(), Some("note"));
		assert_eq!(def.fields.len(), 2);
	}

	#[test]
	fn test_workspace_schema_collects_defs() {
		let schema = WorkspaceSchema::new()
			.with_table(
				"notes",
				TableSpec::new(
					"Notes",
					TableSchema::new(RowSchema::new([("id".to_string(), FieldSchema::Id)])),
				),
			)
			.with_kv("theme", KvSpec::new("Theme", KvSchema::new(FieldSchema::text())));

		assert_eq!(schema.table_defs().len(), 1);
		assert_eq!(schema.kv_defs().len(), 1);
		// Icon defaults to null, description to empty.
		assert_eq!(schema.kv_defs()["theme"].icon, None);
		assert_eq!(schema.table_defs()["notes"].description, "");
	}
}

// vim: ts=4
