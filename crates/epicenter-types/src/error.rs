//! Error handling subsystem. Implements a custom Error type.
//!
//! Reads that fail validation never produce an `Error` — they surface as an
//! explicit invalid status on the read result. Everything that throws goes
//! through this type: failed writes, unknown keys, missing workspaces,
//! migrator failures, provider initialization, and use-after-destroy.

use crate::prelude::*;
use crate::validate::Issue;

pub type EpiResult<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
	/// A write failed validation against the registered schema.
	SchemaValidation(Vec<Issue>),
	/// A typed helper was asked about a key or table that is not registered.
	UnknownKey(String),
	/// The workspace id is not present in the registry.
	WorkspaceNotFound { workspace: String, available: Vec<String> },
	/// A migrator failed or returned a value that does not parse under the
	/// current schema version.
	Migration(String),
	/// A provider's initial side effects failed.
	ProviderInit(String),
	/// Operation on a destroyed document or helper.
	Lifecycle(String),

	// Ambient
	Parse(String),
	Internal(String),
	Io(std::io::Error),
}

impl Error {
	/// Stable machine tag for adapters. One tag per failure kind.
	pub fn code(&self) -> &'static str {
		match self {
			Error::SchemaValidation(_) => "E-SCHEMA-INVALID",
			Error::UnknownKey(_) => "E-KEY-UNKNOWN",
			Error::WorkspaceNotFound { .. } => "E-WS-NOTFOUND",
			Error::Migration(_) => "E-SCHEMA-MIGRATE",
			Error::ProviderInit(_) => "E-PROVIDER-INIT",
			Error::Lifecycle(_) => "E-LIFECYCLE",
			Error::Parse(_) => "E-CORE-PARSE",
			Error::Internal(_) => "E-CORE-INTERNAL",
			Error::Io(_) => "E-SYS-IO",
		}
	}
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		match self {
			Error::SchemaValidation(issues) => {
				write!(f, "schema validation failed: ")?;
				for (i, issue) in issues.iter().enumerate() {
					if i > 0 {
						write!(f, "; ")?;
					}
					write!(f, "{}", issue)?;
				}
				Ok(())
			}
			Error::UnknownKey(key) => write!(f, "unknown key or table: {}", key),
			Error::WorkspaceNotFound { workspace, available } => {
				write!(f, "workspace '{}' not in registry (available: {:?})", workspace, available)
			}
			Error::Migration(msg) => write!(f, "migration failed: {}", msg),
			Error::ProviderInit(msg) => write!(f, "provider initialization failed: {}", msg),
			Error::Lifecycle(msg) => write!(f, "lifecycle violation: {}", msg),
			Error::Parse(msg) => write!(f, "parse error: {}", msg),
			Error::Internal(msg) => write!(f, "internal error: {}", msg),
			Error::Io(err) => write!(f, "io error: {}", err),
		}
	}
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		warn!("io error: {}", err);
		Self::Io(err)
	}
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		warn!("json error: {}", err);
		Error::Parse(err.to_string())
	}
}


// vim: ts=4
