//! Minimal validation interface shared by field schemas and action inputs.
//!
//! A validator takes a JSON value and either returns the (possibly coerced)
//! value or a list of issues. Validators are synchronous by construction;
//! there is no async variant of this trait, so async schemas cannot be
//! attached anywhere in the runtime.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single validation failure, anchored to a path inside the value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
	/// Path segments from the root of the validated value. Empty for issues
	/// on the value itself.
	pub path: Vec<String>,
	pub message: String,
}

impl Issue {
	pub fn new(message: impl Into<String>) -> Self {
		Self { path: Vec::new(), message: message.into() }
	}

	pub fn at(path: impl Into<String>, message: impl Into<String>) -> Self {
		Self { path: vec![path.into()], message: message.into() }
	}

	/// Prefix this issue's path with an outer segment.
	pub fn nested(mut self, segment: impl Into<String>) -> Self {
		self.path.insert(0, segment.into());
		self
	}
}

impl std::fmt::Display for Issue {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		if self.path.is_empty() {
			write!(f, "{}", self.message)
		} else {
			write!(f, "{}: {}", self.path.join("."), self.message)
		}
	}
}

/// Standard validation hook: `validate(value) -> { value } | { issues }`.
pub trait Validate: Send + Sync {
	fn validate(&self, value: &Value) -> Result<Value, Vec<Issue>>;

	/// Optional JSON-schema projection of this validator, for adapters that
	/// need to describe inputs over the wire. `None` when no projection is
	/// available.
	fn json_schema(&self) -> Option<Value> {
		None
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_issue_display() {
		assert_eq!(Issue::new("required").to_string(), "required");
		assert_eq!(Issue::at("title", "expected text").to_string(), "title: expected text");
		assert_eq!(
			Issue::at("title", "expected text").nested("rows").to_string(),
			"rows.title: expected text"
		);
	}
}

// vim: ts=4
