//! Field schemas: the typed shapes a table column or KV entry can take.
//!
//! Serialized with a `type` tag so definitions stored in the CRDT stay
//! readable and mergeable per field.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::prelude::*;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldSchema {
	/// Row identifier. Non-empty string, never nullable.
	Id,
	Text {
		#[serde(default)]
		nullable: bool,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		default: Option<String>,
	},
	Integer {
		#[serde(default)]
		nullable: bool,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		default: Option<i64>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		min: Option<i64>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		max: Option<i64>,
	},
	Real {
		#[serde(default)]
		nullable: bool,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		default: Option<f64>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		min: Option<f64>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		max: Option<f64>,
	},
	Boolean {
		#[serde(default)]
		nullable: bool,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		default: Option<bool>,
	},
	/// RFC 3339 datetime carrying its UTC offset, e.g.
	/// `2026-03-01T10:15:00+01:00`.
	Date {
		#[serde(default)]
		nullable: bool,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		default: Option<String>,
	},
	Select {
		options: Vec<String>,
		#[serde(default)]
		nullable: bool,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		default: Option<String>,
	},
	/// Homogeneous list of a scalar element shape.
	List {
		item: Box<FieldSchema>,
		#[serde(default)]
		nullable: bool,
	},
	/// Arbitrary JSON payload.
	Json {
		#[serde(default)]
		nullable: bool,
	},
}

impl FieldSchema {
	pub fn text() -> Self {
		FieldSchema::Text { nullable: false, default: None }
	}

	pub fn integer() -> Self {
		FieldSchema::Integer { nullable: false, default: None, min: None, max: None }
	}

	pub fn real() -> Self {
		FieldSchema::Real { nullable: false, default: None, min: None, max: None }
	}

	pub fn boolean() -> Self {
		FieldSchema::Boolean { nullable: false, default: None }
	}

	pub fn date() -> Self {
		FieldSchema::Date { nullable: false, default: None }
	}

	pub fn select(options: impl IntoIterator<Item = impl Into<String>>) -> Self {
		FieldSchema::Select {
			options: options.into_iter().map(Into::into).collect(),
			nullable: false,
			default: None,
		}
	}

	pub fn is_nullable(&self) -> bool {
		match self {
			FieldSchema::Id => false,
			FieldSchema::Text { nullable, .. }
			| FieldSchema::Integer { nullable, .. }
			| FieldSchema::Real { nullable, .. }
			| FieldSchema::Boolean { nullable, .. }
			| FieldSchema::Date { nullable, .. }
			| FieldSchema::Select { nullable, .. }
			| FieldSchema::List { nullable, .. }
			| FieldSchema::Json { nullable } => *nullable,
		}
	}

	/// Default used when a field is absent from a written row.
	pub fn default_value(&self) -> Option<Value> {
		match self {
			FieldSchema::Text { default, .. } => default.clone().map(Value::String),
			FieldSchema::Integer { default, .. } => default.map(Value::from),
			FieldSchema::Real { default, .. } => default.map(Value::from),
			FieldSchema::Boolean { default, .. } => default.map(Value::Bool),
			FieldSchema::Date { default, .. } => default.clone().map(Value::String),
			FieldSchema::Select { default, .. } => default.clone().map(Value::String),
			_ => None,
		}
	}

	/// Validate a present value against this shape.
	pub fn validate_value(&self, value: &Value) -> Result<(), Vec<Issue>> {
		if value.is_null() {
			return if self.is_nullable() {
				Ok(())
			} else {
				Err(vec![Issue::new("null is not allowed")])
			};
		}
		match self {
			FieldSchema::Id => match value.as_str() {
				Some(s) if !s.is_empty() => Ok(()),
				Some(_) => Err(vec![Issue::new("id must be a non-empty string")]),
				None => Err(vec![Issue::new("expected string id")]),
			},
			FieldSchema::Text { .. } => {
				if value.is_string() {
					Ok(())
				} else {
					Err(vec![Issue::new("expected text")])
				}
			}
			FieldSchema::Integer { min, max, .. } => match value.as_i64() {
				Some(n) => {
					let mut issues = Vec::new();
					if let Some(min) = min
						&& n < *min
					{
						issues.push(Issue::new(format!("below minimum {}", min)));
					}
					if let Some(max) = max
						&& n > *max
					{
						issues.push(Issue::new(format!("above maximum {}", max)));
					}
					if issues.is_empty() { Ok(()) } else { Err(issues) }
				}
				None => Err(vec![Issue::new("expected integer")]),
			},
			FieldSchema::Real { min, max, .. } => match value.as_f64() {
				Some(n) => {
					let mut issues = Vec::new();
					if let Some(min) = min
						&& n < *min
					{
						issues.push(Issue::new(format!("below minimum {}", min)));
					}
					if let Some(max) = max
						&& n > *max
					{
						issues.push(Issue::new(format!("above maximum {}", max)));
					}
					if issues.is_empty() { Ok(()) } else { Err(issues) }
				}
				None => Err(vec![Issue::new("expected number")]),
			},
			FieldSchema::Boolean { .. } => {
				if value.is_boolean() {
					Ok(())
				} else {
					Err(vec![Issue::new("expected boolean")])
				}
			}
			FieldSchema::Date { .. } => match value.as_str() {
				Some(s) => match DateTime::parse_from_rfc3339(s) {
					Ok(_) => Ok(()),
					Err(err) => Err(vec![Issue::new(format!("invalid datetime: {}", err))]),
				},
				None => Err(vec![Issue::new("expected RFC 3339 datetime string")]),
			},
			FieldSchema::Select { options, .. } => match value.as_str() {
				Some(s) if options.iter().any(|o| o == s) => Ok(()),
				Some(s) => Err(vec![Issue::new(format!("'{}' is not one of {:?}", s, options))]),
				None => Err(vec![Issue::new("expected one of the select options")]),
			},
			FieldSchema::List { item, .. } => match value.as_array() {
				Some(items) => {
					let mut issues = Vec::new();
					for (i, element) in items.iter().enumerate() {
						if let Err(inner) = item.validate_value(element) {
							issues
								.extend(inner.into_iter().map(|issue| issue.nested(i.to_string())));
						}
					}
					if issues.is_empty() { Ok(()) } else { Err(issues) }
				}
				None => Err(vec![Issue::new("expected array")]),
			},
			FieldSchema::Json { .. } => Ok(()),
		}
	}
}

impl Validate for FieldSchema {
	fn validate(&self, value: &Value) -> Result<Value, Vec<Issue>> {
		self.validate_value(value).map(|()| value.clone())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn test_id_requires_non_empty_string() {
		assert!(FieldSchema::Id.validate_value(&json!("row-1")).is_ok());
		assert!(FieldSchema::Id.validate_value(&json!("")).is_err());
		assert!(FieldSchema::Id.validate_value(&json!(7)).is_err());
		assert!(FieldSchema::Id.validate_value(&json!(null)).is_err());
	}

	#[test]
	fn test_nullable_accepts_null() {
		let field = FieldSchema::Text { nullable: true, default: None };
		assert!(field.validate_value(&json!(null)).is_ok());
		assert!(FieldSchema::text().validate_value(&json!(null)).is_err());
	}

	#[test]
	fn test_integer_bounds() {
		let field =
			FieldSchema::Integer { nullable: false, default: None, min: Some(0), max: Some(10) };
		assert!(field.validate_value(&json!(5)).is_ok());
		assert!(field.validate_value(&json!(-1)).is_err());
		assert!(field.validate_value(&json!(11)).is_err());
		assert!(field.validate_value(&json!(2.5)).is_err());
	}

	#[test]
	fn test_date_requires_rfc3339_with_offset() {
		assert!(FieldSchema::date().validate_value(&json!("2026-03-01T10:15:00+01:00")).is_ok());
		assert!(FieldSchema::date().validate_value(&json!("2026-03-01T10:15:00Z")).is_ok());
		assert!(FieldSchema::date().validate_value(&json!("2026-03-01")).is_err());
		assert!(FieldSchema::date().validate_value(&json!("soon")).is_err());
	}

	#[test]
	fn test_select_checks_options() {
		let field = FieldSchema::select(["light", "dark"]);
		assert!(field.validate_value(&json!("dark")).is_ok());
		assert!(field.validate_value(&json!("sepia")).is_err());
	}

	#[test]
	fn test_list_reports_element_paths() {
		let field = FieldSchema::List { item: Box::new(FieldSchema::integer()), nullable: false };
		assert!(field.validate_value(&json!([1, 2, 3])).is_ok());
		let issues = field.validate_value(&json!([1, "two", 3])).unwrap_err();
		assert_eq!(issues.len(), 1);
		assert_eq!(issues[0].path, vec!["1".to_string()]);
	}

	#[test]
	fn test_serde_tag_roundtrip() {
		let field =
			FieldSchema::Select { options: vec!["a".into()], nullable: true, default: None };
		let json = serde_json::to_value(&field).unwrap();
		assert_eq!(json["type"], "select");
		let back: FieldSchema = serde_json::from_value(json).unwrap();
		assert_eq!(back, field);
	}

	#[test]
	fn test_defaults_omitted_in_serialized_form() {
		let json = serde_json::to_value(FieldSchema::text()).unwrap();
		assert!(json.get("default").is_none());
		assert_eq!(json["nullable"], false);
	}
}

// vim: ts=4
