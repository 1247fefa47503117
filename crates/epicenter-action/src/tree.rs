//! Walkable action tree.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::action::Action;
use crate::prelude::*;

/// Nested record whose leaves are actions. Branches are ordered maps, so
/// the walk order — and therefore every action's path — is stable for a
/// given tree shape across process restarts.
pub enum ActionTree {
	Leaf(Action),
	Branch(BTreeMap<String, ActionTree>),
}

impl std::fmt::Debug for ActionTree {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			ActionTree::Leaf(action) => action.fmt(f),
			ActionTree::Branch(children) => f.debug_map().entries(children.iter()).finish(),
		}
	}
}

impl ActionTree {
	pub fn branch() -> Self {
		ActionTree::Branch(BTreeMap::new())
	}

	/// Insert a subtree under `name`. Only valid on branches; inserting
	/// into a leaf replaces it with a branch holding the new child.
	pub fn with(mut self, name: impl Into<String>, child: ActionTree) -> Self {
		if !matches!(self, ActionTree::Branch(_)) {
			self = ActionTree::branch();
		}
		if let ActionTree::Branch(children) = &mut self {
			children.insert(name.into(), child);
		}
		self
	}

	pub fn with_action(self, name: impl Into<String>, action: Action) -> Self {
		self.with(name, ActionTree::Leaf(action))
	}

	/// Every leaf with its path, in stable depth-first order.
	pub fn walk(&self) -> Vec<(Vec<String>, &Action)> {
		let mut leaves = Vec::new();
		let mut path = Vec::new();
		walk_into(self, &mut path, &mut leaves);
		leaves
	}

	/// Look up an action by path.
	pub fn get(&self, path: &[&str]) -> Option<&Action> {
		let mut node = self;
		for segment in path {
			match node {
				ActionTree::Branch(children) => node = children.get(*segment)?,
				ActionTree::Leaf(_) => return None,
			}
		}
		match node {
			ActionTree::Leaf(action) => Some(action),
			ActionTree::Branch(_) => None,
		}
	}

	/// Dispatch the action at `path`, failing with `UnknownKey` when no
	/// leaf lives there.
	pub async fn dispatch(&self, path: &[&str], input: Value) -> EpiResult<Value> {
		let action = self
			.get(path)
			.ok_or_else(|| Error::UnknownKey(path.join(".")))?;
		action.dispatch(input).await
	}
}

fn walk_into<'a>(
	node: &'a ActionTree,
	path: &mut Vec<String>,
	leaves: &mut Vec<(Vec<String>, &'a Action)>,
) {
	match node {
		ActionTree::Leaf(action) => leaves.push((path.clone(), action)),
		ActionTree::Branch(children) => {
			for (name, child) in children {
				path.push(name.clone());
				walk_into(child, path, leaves);
				path.pop();
			}
		}
	}
}


// vim: ts=4
