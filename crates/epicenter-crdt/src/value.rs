//! Conversions between `yrs::Any` / `yrs::Out` and `serde_json::Value`.
//!
//! Row and KV values cross the public API as JSON values; inside the CRDT
//! they live as `Any` payloads (plain data) or shared maps/arrays. The
//! conversions here are total: every CRDT value has a JSON projection.

use serde_json::{Map as JsonMap, Value};
use std::collections::HashMap;
use std::sync::Arc;
use yrs::types::ToJson;
use yrs::{Any, GetString, Out, ReadTxn};

/// Convert a plain CRDT value into JSON.
pub fn any_to_value(any: &Any) -> Value {
	match any {
		Any::Null | Any::Undefined => Value::Null,
		Any::Bool(b) => Value::Bool(*b),
		Any::Number(n) => {
			serde_json::Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null)
		}
		Any::BigInt(i) => Value::from(*i),
		Any::String(s) => Value::String(s.to_string()),
		Any::Buffer(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
		Any::Array(items) => Value::Array(items.iter().map(any_to_value).collect()),
		Any::Map(entries) => {
			let mut obj = JsonMap::with_capacity(entries.len());
			for (key, value) in entries.iter() {
				obj.insert(key.clone(), any_to_value(value));
			}
			Value::Object(obj)
		}
	}
}

/// Convert JSON into a plain CRDT value. Integers map to `BigInt`, other
/// numbers to `Number`.
pub fn value_to_any(value: &Value) -> Any {
	match value {
		Value::Null => Any::Null,
		Value::Bool(b) => Any::Bool(*b),
		Value::Number(n) => {
			if let Some(i) = n.as_i64() {
				Any::BigInt(i)
			} else {
				Any::Number(n.as_f64().unwrap_or(f64::MAX))
			}
		}
		Value::String(s) => Any::String(s.as_str().into()),
		Value::Array(items) => {
			let converted: Vec<Any> = items.iter().map(value_to_any).collect();
			Any::Array(converted.into())
		}
		Value::Object(obj) => {
			let converted: HashMap<String, Any> =
				obj.iter().map(|(k, v)| (k.clone(), value_to_any(v))).collect();
			Any::Map(Arc::new(converted))
		}
	}
}

/// Convert a value read out of a shared type into JSON. Shared maps and
/// arrays are projected recursively; text becomes a string.
pub fn out_to_value<T: ReadTxn>(txn: &T, out: &Out) -> Value {
	match out {
		Out::Any(any) => any_to_value(any),
		Out::YMap(map) => any_to_value(&map.to_json(txn)),
		Out::YArray(array) => any_to_value(&array.to_json(txn)),
		Out::YText(text) => Value::String(text.get_string(txn)),
		_ => Value::Null,
	}
}


// vim: ts=4
