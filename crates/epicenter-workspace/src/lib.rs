//! Workspace runtime: the document graph and its typed helpers.
//!
//! Three document levels make up a user's workspace state:
//!
//! - the **registry** lists the workspace ids the user can access;
//! - one **head** per workspace holds per-client epoch proposals,
//!   aggregated by MAX so concurrent bumps never skip a revision;
//! - one **data** document per (workspace, epoch) holds the schema
//!   definition, table rows, and key-value settings.
//!
//! Documents attach providers (persistence, sync) through factories and
//! aggregate their readiness; destruction settles every provider before
//! tearing the document down. All reads and writes are synchronous against
//! in-memory CRDT state; `when_synced` and `destroy` are the only
//! suspension points.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

pub mod data;
pub mod definition;
pub mod head;
pub mod kv;
pub mod observer;
pub mod orchestrator;
pub mod registry;
pub mod table;

mod prelude;

pub use data::DataDoc;
pub use definition::{DefChange, DefinitionHelper, KvDefs, TableDefs, TableEntry, TableMeta,
	TableMetaPatch};
pub use head::HeadDoc;
pub use kv::{KvHelper, KvStatus, KvTx};
pub use orchestrator::{Orchestrator, OrchestratorOptions, WorkspaceClient};
pub use registry::{RegistryChange, RegistryDoc};
pub use table::{DeleteStatus, InvalidRow, RowStatus, TableEvent, TableHelper, TableTx};

// vim: ts=4
