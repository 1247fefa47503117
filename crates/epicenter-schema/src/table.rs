//! Row and key-value schema containers with versioning and
//! migration-on-read.

use serde_json::{Map as JsonMap, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::field::FieldSchema;
use crate::prelude::*;

/// Outcome of parsing a stored value on read.
#[derive(Clone, Debug, PartialEq)]
pub enum ReadOutcome {
	/// The value parses under the current version (possibly after
	/// migration).
	Valid(Value),
	/// No version matched; the raw value is preserved by the caller.
	Invalid(Vec<Issue>),
}

/// Migration hook: `(matched_version_index, raw_value) -> current_value`.
/// Version indexes are zero-based, oldest first; the current version is
/// never passed in.
pub type Migrator = Arc<dyn Fn(usize, Value) -> Result<Value, String> + Send + Sync>;

/// The shape of one row version: an ordered field map.
#[derive(Clone, Debug, PartialEq)]
pub struct RowSchema {
	pub fields: BTreeMap<String, FieldSchema>,
}

impl RowSchema {
	pub fn new(fields: impl IntoIterator<Item = (impl Into<String>, FieldSchema)>) -> Self {
		Self { fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect() }
	}

	/// Validate a row object, filling defaults for absent fields. Returns
	/// the normalized row.
	pub fn validate_row(&self, row: &Value) -> Result<Value, Vec<Issue>> {
		let Some(obj) = row.as_object() else {
			return Err(vec![Issue::new("expected a row object")]);
		};
		let mut issues = Vec::new();
		let mut normalized = JsonMap::with_capacity(obj.len());

		match obj.get("id").and_then(Value::as_str) {
			Some(id) if !id.is_empty() => {}
			_ => issues.push(Issue::at("id", "rows require a non-empty string id")),
		}

		for (name, field) in &self.fields {
			match obj.get(name) {
				Some(value) => match field.validate_value(value) {
					Ok(()) => {
						normalized.insert(name.clone(), value.clone());
					}
					Err(inner) => {
						issues.extend(inner.into_iter().map(|issue| issue.nested(name.clone())));
					}
				},
				None => {
					if let Some(default) = field.default_value() {
						normalized.insert(name.clone(), default);
					} else if !field.is_nullable() && !matches!(field, FieldSchema::Id) {
						issues.push(Issue::at(name.clone(), "field is required"));
					}
				}
			}
		}
		for name in obj.keys() {
			if name != "id" && !self.fields.contains_key(name) {
				issues.push(Issue::at(name.clone(), "field is not declared in the schema"));
			}
		}

		if issues.is_empty() {
			if let Some(id) = obj.get("id") {
				normalized.insert("id".into(), id.clone());
			}
			Ok(Value::Object(normalized))
		} else {
			Err(issues)
		}
	}
}

/// Versioned row schema for one table. The newest version is current;
/// historical versions participate in migration-on-read.
#[derive(Clone)]
pub struct TableSchema {
	versions: Vec<RowSchema>,
	migrator: Option<Migrator>,
}

impl std::fmt::Debug for TableSchema {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TableSchema")
			.field("versions", &self.versions.len())
			.field("migrator", &self.migrator.is_some())
			.finish()
	}
}

impl TableSchema {
	pub fn new(current: RowSchema) -> Self {
		Self { versions: vec![current], migrator: None }
	}

	/// Build from a full version history, oldest first. The last entry is
	/// the current version.
	pub fn with_history(versions: Vec<RowSchema>) -> EpiResult<Self> {
		if versions.is_empty() {
			return Err(Error::Internal("a table schema needs at least one version".into()));
		}
		Ok(Self { versions, migrator: None })
	}

	pub fn with_migrator(mut self, migrator: Migrator) -> Self {
		self.migrator = Some(migrator);
		self
	}

	pub fn current(&self) -> &RowSchema {
		// Construction guarantees at least one version.
		&self.versions[self.versions.len() - 1]
	}

	pub fn current_version(&self) -> usize {
		self.versions.len() - 1
	}

	/// Validate a row for writing. Only the current version counts; a
	/// mismatch is a hard error.
	pub fn validate_write(&self, row: &Value) -> EpiResult<Value> {
		self.current().validate_row(row).map_err(Error::SchemaValidation)
	}

	/// Parse a stored row on read: current version first, then historical
	/// versions newest-first through the migrator.
	pub fn parse_read(&self, row: &Value) -> EpiResult<ReadOutcome> {
		let current_issues = match self.current().validate_row(row) {
			Ok(valid) => return Ok(ReadOutcome::Valid(valid)),
			Err(issues) => issues,
		};
		let history_len = self.versions.len() - 1;
		for index in (0..history_len).rev() {
			if self.versions[index].validate_row(row).is_err() {
				continue;
			}
			let Some(migrator) = &self.migrator else {
				return Ok(ReadOutcome::Invalid(current_issues));
			};
			let migrated = migrator(index, row.clone()).map_err(Error::Migration)?;
			return match self.current().validate_row(&migrated) {
				Ok(valid) => Ok(ReadOutcome::Valid(valid)),
				Err(_) => Err(Error::Migration(format!(
					"migrator output for version {} does not parse under the current schema",
					index
				))),
			};
		}
		Ok(ReadOutcome::Invalid(current_issues))
	}
}

/// Versioned schema for one KV entry.
#[derive(Clone)]
pub struct KvSchema {
	versions: Vec<FieldSchema>,
	migrator: Option<Migrator>,
}

impl std::fmt::Debug for KvSchema {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("KvSchema")
			.field("versions", &self.versions.len())
			.field("migrator", &self.migrator.is_some())
			.finish()
	}
}

impl KvSchema {
	pub fn new(current: FieldSchema) -> Self {
		Self { versions: vec![current], migrator: None }
	}

	pub fn with_history(versions: Vec<FieldSchema>) -> EpiResult<Self> {
		if versions.is_empty() {
			return Err(Error::Internal("a kv schema needs at least one version".into()));
		}
		Ok(Self { versions, migrator: None })
	}

	pub fn with_migrator(mut self, migrator: Migrator) -> Self {
		self.migrator = Some(migrator);
		self
	}

	pub fn current(&self) -> &FieldSchema {
		&self.versions[self.versions.len() - 1]
	}

	pub fn validate_write(&self, value: &Value) -> EpiResult<Value> {
		self.current()
			.validate_value(value)
			.map(|()| value.clone())
			.map_err(Error::SchemaValidation)
	}

	pub fn parse_read(&self, value: &Value) -> EpiResult<ReadOutcome> {
		let current_issues = match self.current().validate_value(value) {
			Ok(()) => return Ok(ReadOutcome::Valid(value.clone())),
			Err(issues) => issues,
		};
		let history_len = self.versions.len() - 1;
		for index in (0..history_len).rev() {
			if self.versions[index].validate_value(value).is_err() {
				continue;
			}
			let Some(migrator) = &self.migrator else {
				return Ok(ReadOutcome::Invalid(current_issues));
			};
			let migrated = migrator(index, value.clone()).map_err(Error::Migration)?;
			return match self.current().validate_value(&migrated) {
				Ok(()) => Ok(ReadOutcome::Valid(migrated)),
				Err(_) => Err(Error::Migration(format!(
					"migrator output for version {} does not parse under the current schema",
					index
				))),
			};
		}
		Ok(ReadOutcome::Invalid(current_issues))
	}
}

/// Code-level specification of one table: display metadata plus the
/// versioned row schema.
#[derive(Clone, Debug)]
pub struct TableSpec {
	pub name: String,
	pub icon: Option<String>,
	pub description: String,
	pub schema: TableSchema,
}

impl TableSpec {
	pub fn new(name: impl Into<String>, schema: TableSchema) -> Self {
		Self { name: name.into(), icon: None, description: String::new(), schema }
	}

	pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
		self.icon = Some(icon.into());
		self
	}

	pub fn with_description(mut self, description: impl Into<String>) -> Self {
		self.description = description.into();
		self
	}
}

/// Code-level specification of one KV entry.
#[derive(Clone, Debug)]
pub struct KvSpec {
	pub name: String,
	pub icon: Option<String>,
	pub description: String,
	pub schema: KvSchema,
}

impl KvSpec {
	pub fn new(name: impl Into<String>, schema: KvSchema) -> Self {
		Self { name: name.into(), icon: None, description: String::new(), schema }
	}

	pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
		self.icon = Some(icon.into());
		self
	}

	pub fn with_description(mut self, description: impl Into<String>) -> Self {
		self.description = description.into();
		self
	}
}


// vim: ts=4
