//! Thin adapter over the yrs CRDT library.
//!
//! Everything in the runtime that touches yrs goes through this crate:
//! document construction, origin-tagged transactions, update
//! encoding/application, value conversion between `yrs::Any` and
//! `serde_json::Value`, and the last-write-wins keyed store over a CRDT
//! array. Keeping the yrs surface in one place means the document and
//! helper layers deal only in JSON values and callbacks.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

pub mod doc;
pub mod lww;
pub mod provider;
pub mod value;

mod prelude;

pub use doc::{DocHandle, UpdateObserver, origin_str};
pub use lww::{LwwEntry, LwwEvent, LwwStore, LwwSubscription};
pub use provider::{ProviderContext, ProviderFactory, ProviderPaths};
pub use value::{any_to_value, out_to_value, value_to_any};

// vim: ts=4
