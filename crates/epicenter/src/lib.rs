//! Epicenter is a local-first, collaborative workspace runtime.
//!
//! # Features
//!
//! - CRDT document model (Yjs-compatible via yrs)
//!     - registry of workspaces
//!     - per-workspace epoch head with MAX aggregation
//!     - per-epoch data documents (schema + tables + settings)
//! - Schema-bound typed helpers
//!     - tables with validate/migrate-on-read
//!     - key-value settings
//!     - CRDT-stored, observable schema definitions
//! - Pluggable providers (persistence, sync) behind one lifecycle contract
//! - Last-write-wins keyed store over a CRDT array
//! - Typed action tree for REST/CLI/MCP adapters

// Re-export shared types and contracts from epicenter-types
pub use epicenter_types::clock;
pub use epicenter_types::error;
pub use epicenter_types::lifecycle;
pub use epicenter_types::types;
pub use epicenter_types::utils;
pub use epicenter_types::validate;

// Feature crate re-exports
pub use epicenter_action as action;
pub use epicenter_crdt as crdt;
pub use epicenter_schema as schema;
pub use epicenter_workspace as workspace;

pub mod prelude;

pub use epicenter_crdt::doc::DocHandle;
pub use epicenter_crdt::lww::LwwStore;
pub use epicenter_crdt::provider::{ProviderContext, ProviderFactory, ProviderPaths};
pub use epicenter_schema::{FieldSchema, KvSchema, KvSpec, RowSchema, TableSchema, TableSpec,
	WorkspaceSchema};
pub use epicenter_workspace::{DataDoc, HeadDoc, Orchestrator, OrchestratorOptions, RegistryDoc,
	WorkspaceClient};

// vim: ts=4
