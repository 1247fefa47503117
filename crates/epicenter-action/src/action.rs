//! Typed action handles.

use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use epicenter_types::validate::Validate;

use crate::prelude::*;

/// Whether an action reads or writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionKind {
	Query,
	Mutation,
}

type Handler = Arc<dyn Fn(Value) -> BoxFuture<'static, EpiResult<Value>> + Send + Sync>;

/// A typed handle wrapping a handler. Input validation runs before the
/// handler; validators are synchronous by construction (the `Validate`
/// trait has no async form), so an async schema cannot be attached.
#[derive(Clone)]
pub struct Action {
	kind: ActionKind,
	description: Option<String>,
	input: Option<Arc<dyn Validate>>,
	handler: Handler,
}

impl std::fmt::Debug for Action {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Action")
			.field("kind", &self.kind)
			.field("description", &self.description)
			.field("has_input", &self.input.is_some())
			.finish()
	}
}

impl Action {
	fn new<F, Fut>(kind: ActionKind, handler: F) -> Self
	where
		F: Fn(Value) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = EpiResult<Value>> + Send + 'static,
	{
		Self {
			kind,
			description: None,
			input: None,
			handler: Arc::new(move |input| Box::pin(handler(input))),
		}
	}

	/// A read-only action.
	pub fn query<F, Fut>(handler: F) -> Self
	where
		F: Fn(Value) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = EpiResult<Value>> + Send + 'static,
	{
		Self::new(ActionKind::Query, handler)
	}

	/// A writing action.
	pub fn mutation<F, Fut>(handler: F) -> Self
	where
		F: Fn(Value) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = EpiResult<Value>> + Send + 'static,
	{
		Self::new(ActionKind::Mutation, handler)
	}

	pub fn with_description(mut self, description: impl Into<String>) -> Self {
		self.description = Some(description.into());
		self
	}

	pub fn with_input(mut self, schema: Arc<dyn Validate>) -> Self {
		self.input = Some(schema);
		self
	}

	pub fn kind(&self) -> ActionKind {
		self.kind
	}

	pub fn description(&self) -> Option<&str> {
		self.description.as_deref()
	}

	/// JSON-schema projection of the input validator, for adapters that
	/// describe inputs over the wire.
	pub fn input_json_schema(&self) -> Option<Value> {
		self.input.as_ref().and_then(|schema| schema.json_schema())
	}

	/// Validate the input (when a schema is attached) and run the handler.
	pub async fn dispatch(&self, input: Value) -> EpiResult<Value> {
		let input = match &self.input {
			Some(schema) => schema.validate(&input).map_err(Error::SchemaValidation)?,
			None => input,
		};
		(self.handler)(input).await
	}
}


// vim: ts=4
