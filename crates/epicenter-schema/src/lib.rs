//! Schema layer: typed field shapes, table and key-value schema containers,
//! versioning, and migration-on-read.
//!
//! Writes validate against the current schema version and fail loudly.
//! Reads validate against the union of current and historical versions; a
//! historical match goes through the user-supplied migrator, and a value
//! that matches nothing is surfaced as invalid with the raw value
//! preserved — reads never throw for plain validation failures.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

pub mod def;
pub mod field;
pub mod table;

mod prelude;

pub use def::{KvDef, TableDef, WorkspaceSchema};
pub use field::FieldSchema;
pub use table::{KvSchema, KvSpec, Migrator, ReadOutcome, RowSchema, TableSchema, TableSpec};

// vim: ts=4
