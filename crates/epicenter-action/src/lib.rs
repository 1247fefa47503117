//! Action system: typed handles for reads and writes, with no transport
//! binding.
//!
//! An action is a handler plus metadata: a kind (query or mutation), an
//! optional description, and an optional input validator with a JSON-schema
//! projection for adapters. Actions are composed into a nested tree whose
//! walk order is stable across process restarts, so REST, CLI, and MCP
//! adapters can derive routes from paths and trust them not to move.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

pub mod action;
pub mod tree;

mod prelude;

pub use action::{Action, ActionKind};
pub use tree::ActionTree;

// vim: ts=4
