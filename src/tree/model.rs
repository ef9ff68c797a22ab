//! Canonical records for the tree data model (spec §3).

use crate::ids::{EntityId, NodeId, Timestamp, TreeId};
use serde::{Deserialize, Serialize};

/// `{ treeId, name, rootNodeId, trashRootNodeId }` — a tree owns two sentinel roots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
	pub tree_id: TreeId,
	pub name: String,
	pub root_node_id: NodeId,
	pub trash_root_node_id: NodeId,
}

/// `{ id, parentId, name, nodeType, createdAt, updatedAt, version, removed? }`.
///
/// `removed` is never flipped by a direct field write from the mutation pipeline; a node's
/// trash membership is derived from ancestor lookup against the tree's trash root (§9 — "two
/// sentinel roots... simplifies boundary policy"). The field exists only as a cached hint
/// for fast filtering and is kept consistent by `moveToTrash`/`recoverFromTrash`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNode {
	pub id: NodeId,
	pub tree_id: TreeId,
	pub parent_id: NodeId,
	pub name: String,
	pub node_type: String,
	pub created_at: Timestamp,
	pub updated_at: Timestamp,
	pub version: u64,
	pub removed: bool,
}

impl TreeNode {
	pub fn is_root_sentinel(&self, tree: &Tree) -> bool {
		self.id == tree.root_node_id || self.id == tree.trash_root_node_id
	}
}

/// `{ id, nodeId, ...payload, createdAt, updatedAt, version }`.
///
/// The core only guarantees the `node_id` binding and lifecycle coupling; plugin-defined
/// fields live in `payload` as an opaque JSON value (structured-clone analog) since the
/// core never inspects payload shape beyond its own fields (§9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
	pub id: EntityId,
	pub node_id: NodeId,
	pub node_type: String,
	pub payload: serde_json::Value,
	pub created_at: Timestamp,
	pub updated_at: Timestamp,
	pub version: u64,
}

/// Sort key for `getChildren` (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortBy {
	Name,
	CreatedAt,
	UpdatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
	Asc,
	Desc,
}

impl Default for SortBy {
	fn default() -> Self {
		SortBy::CreatedAt
	}
}

impl Default for SortOrder {
	fn default() -> Self {
		SortOrder::Asc
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChildrenOptions {
	#[serde(default)]
	pub sort_by: SortBy,
	#[serde(default)]
	pub sort_order: SortOrder,
	pub limit: Option<usize>,
	pub offset: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DescendantsOptions {
	pub max_depth: Option<usize>,
	pub include_types: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchMode {
	Exact,
	Partial,
	Regex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
	pub root_node_id: NodeId,
	pub query: String,
	pub mode: SearchMode,
	#[serde(default)]
	pub case_sensitive: bool,
}

/// Warnings surfaced alongside traversal results when the cycle guard trips (§4.2, §9).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum TraversalWarning {
	/// Traversal hit the depth/visited-node safety bound before exhausting the subtree.
	DepthBoundExceeded { at_node: NodeId, bound: usize },
	/// A node was revisited during traversal, indicating a corrupt (cyclic) parent chain.
	CycleDetected { at_node: NodeId },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraversalResult<T> {
	pub items: Vec<T>,
	pub warnings: Vec<TraversalWarning>,
}
