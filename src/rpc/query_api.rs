//! `QueryApi` — read-only tree queries (spec §4.7, §6).

use crate::error::EngineResult;
use crate::ids::{NodeId, TreeId};
use crate::storage::Storage;
use crate::tree::model::{ChildrenOptions, DescendantsOptions, Entity, SearchQuery, TraversalResult, Tree, TreeNode};
use crate::tree::TreeQueryService;
use std::sync::Arc;

#[derive(Clone)]
pub struct QueryApi {
	storage: Storage,
	queries: Arc<TreeQueryService>,
}

impl QueryApi {
	pub fn new(storage: Storage, queries: Arc<TreeQueryService>) -> Self {
		Self { storage, queries }
	}

	pub async fn get_node(&self, node_id: &NodeId) -> EngineResult<TreeNode> {
		self.queries.get_node(node_id).await
	}

	pub async fn get_entity(&self, node_id: &NodeId) -> EngineResult<Entity> {
		self.queries.get_entity(node_id).await
	}

	pub async fn get_children(&self, parent_id: &NodeId, options: &ChildrenOptions) -> EngineResult<Vec<TreeNode>> {
		self.queries.get_children(parent_id, options).await
	}

	pub async fn get_descendants(&self, root_id: &NodeId, options: &DescendantsOptions) -> EngineResult<TraversalResult<TreeNode>> {
		self.queries.get_descendants(root_id, options).await
	}

	pub async fn get_ancestors(&self, node_id: &NodeId) -> EngineResult<TraversalResult<TreeNode>> {
		self.queries.get_ancestors(node_id).await
	}

	pub async fn search_nodes(&self, query: &SearchQuery) -> EngineResult<TraversalResult<TreeNode>> {
		self.queries.search_nodes(query).await
	}

	/// `getTree(treeId)` backward-compat shortcut.
	pub async fn get_tree(&self, tree_id: &TreeId) -> EngineResult<Tree> {
		let core = self.storage.core.read().await;
		core.get_tree(tree_id)
			.cloned()
			.ok_or_else(|| crate::error::EngineError::UnknownTree(tree_id.to_string()))
	}

	/// `listTrees()` backward-compat shortcut.
	pub async fn list_trees(&self) -> Vec<Tree> {
		self.storage.core.read().await.list_trees()
	}
}
