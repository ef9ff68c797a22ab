//! `CoreDB`: durable store for trees, tree nodes, and one per-plugin entity table.

use crate::ids::{EntityId, NodeId, Timestamp, TreeId};
use crate::tree::model::{Entity, Tree, TreeNode};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum CoreDbError {
	#[error("storage unavailable: {0}")]
	Unavailable(String),
	#[error("quota exceeded: {0}")]
	QuotaExceeded(String),
	#[error("schema mismatch for store '{store}': stored {stored} > code {code}")]
	SchemaMismatch { store: String, stored: u32, code: u32 },
	#[error("duplicate tree id: {0}")]
	DuplicateTree(String),
	#[error("duplicate node id: {0}")]
	DuplicateNode(String),
	#[error("node not found: {0}")]
	NodeNotFound(String),
	#[error("entity not found: {0}")]
	EntityNotFound(String),
	#[error("sibling name conflict under parent {parent_id}: '{name}'")]
	NameConflict { parent_id: String, name: String },
}

pub type CoreDbResult<T> = Result<T, CoreDbError>;

/// A single per-plugin entity table (`entities_<nodeType>`), indexed by node id.
#[derive(Debug, Default)]
struct EntityTable {
	by_id: HashMap<EntityId, Entity>,
	by_node: HashMap<NodeId, EntityId>,
	schema_version: u32,
}

pub struct CoreDb {
	#[allow(dead_code)]
	store_name: String,
	trees: HashMap<TreeId, Tree>,
	nodes: HashMap<NodeId, TreeNode>,
	/// Index: parentId -> ordered set of child NodeIds (insertion order is createdAt order).
	children_by_parent: HashMap<NodeId, Vec<NodeId>>,
	/// Index: (parentId, name) -> NodeId, over non-removed children only.
	name_by_parent: HashMap<(NodeId, String), NodeId>,
	/// Index: nodeType -> set of NodeIds.
	nodes_by_type: HashMap<String, HashSet<NodeId>>,
	/// Index: updatedAt -> NodeIds updated at that timestamp (secondary sort support).
	nodes_by_updated_at: BTreeMap<Timestamp, Vec<NodeId>>,
	entities: HashMap<String, EntityTable>,
}

impl CoreDb {
	pub fn new(store_name: String) -> Self {
		Self {
			store_name,
			trees: HashMap::new(),
			nodes: HashMap::new(),
			children_by_parent: HashMap::new(),
			name_by_parent: HashMap::new(),
			nodes_by_type: HashMap::new(),
			nodes_by_updated_at: BTreeMap::new(),
			entities: HashMap::new(),
		}
	}

	// --- schema ---

	/// Verify the plugin's stored schema version is not newer than its code version
	/// (spec §4.1: "refuses to start if a plugin's stored schema is newer than its code").
	pub fn check_schema(&mut self, node_type: &str, code_version: u32) -> CoreDbResult<()> {
		let table = self.entities.entry(node_type.to_string()).or_default();
		if table.schema_version == 0 {
			table.schema_version = code_version;
			return Ok(());
		}
		if table.schema_version > code_version {
			return Err(CoreDbError::SchemaMismatch {
				store: format!("entities_{node_type}"),
				stored: table.schema_version,
				code: code_version,
			});
		}
		Ok(())
	}

	// --- trees ---

	pub fn insert_tree(&mut self, tree: Tree) -> CoreDbResult<()> {
		if self.trees.contains_key(&tree.tree_id) {
			return Err(CoreDbError::DuplicateTree(tree.tree_id.to_string()));
		}
		self.trees.insert(tree.tree_id.clone(), tree);
		Ok(())
	}

	pub fn get_tree(&self, tree_id: &TreeId) -> Option<&Tree> {
		self.trees.get(tree_id)
	}

	pub fn list_trees(&self) -> Vec<Tree> {
		self.trees.values().cloned().collect()
	}

	// --- nodes ---

	pub fn get_node(&self, id: &NodeId) -> Option<&TreeNode> {
		self.nodes.get(id)
	}

	/// Sibling-name uniqueness precheck (spec §4.2 invariant 1).
	pub fn name_conflict(&self, parent_id: &NodeId, name: &str) -> Option<NodeId> {
		self.name_by_parent
			.get(&(parent_id.clone(), name.to_string()))
			.cloned()
	}

	pub fn insert_node(&mut self, node: TreeNode) -> CoreDbResult<()> {
		if self.nodes.contains_key(&node.id) {
			return Err(CoreDbError::DuplicateNode(node.id.to_string()));
		}
		if !node.removed {
			if let Some(existing) =
				self.name_conflict(&node.parent_id, &node.name)
			{
				if existing != node.id {
					return Err(CoreDbError::NameConflict {
						parent_id: node.parent_id.to_string(),
						name: node.name.clone(),
					});
				}
			}
			self.name_by_parent
				.insert((node.parent_id.clone(), node.name.clone()), node.id.clone());
		}
		self.children_by_parent
			.entry(node.parent_id.clone())
			.or_default()
			.push(node.id.clone());
		self.nodes_by_type
			.entry(node.node_type.clone())
			.or_default()
			.insert(node.id.clone());
		self.nodes_by_updated_at
			.entry(node.updated_at)
			.or_default()
			.push(node.id.clone());
		self.nodes.insert(node.id.clone(), node);
		Ok(())
	}

	/// Replace a node's record in place, maintaining all secondary indices. Callers are
	/// responsible for invariant checks (name conflicts, acyclicity) before calling this.
	pub fn replace_node(&mut self, updated: TreeNode) -> CoreDbResult<()> {
		let previous = self
			.nodes
			.get(&updated.id)
			.cloned()
			.ok_or_else(|| CoreDbError::NodeNotFound(updated.id.to_string()))?;

		if previous.parent_id != updated.parent_id {
			if let Some(siblings) = self.children_by_parent.get_mut(&previous.parent_id) {
				siblings.retain(|id| id != &updated.id);
			}
			self.children_by_parent
				.entry(updated.parent_id.clone())
				.or_default()
				.push(updated.id.clone());
		}

		if !previous.removed {
			self.name_by_parent
				.remove(&(previous.parent_id.clone(), previous.name.clone()));
		}
		if !updated.removed {
			self.name_by_parent.insert(
				(updated.parent_id.clone(), updated.name.clone()),
				updated.id.clone(),
			);
		}

		if previous.node_type != updated.node_type {
			if let Some(set) = self.nodes_by_type.get_mut(&previous.node_type) {
				set.remove(&updated.id);
			}
			self.nodes_by_type
				.entry(updated.node_type.clone())
				.or_default()
				.insert(updated.id.clone());
		}

		if let Some(v) = self.nodes_by_updated_at.get_mut(&previous.updated_at) {
			v.retain(|id| id != &updated.id);
		}
		self.nodes_by_updated_at
			.entry(updated.updated_at)
			.or_default()
			.push(updated.id.clone());

		self.nodes.insert(updated.id.clone(), updated);
		Ok(())
	}

	pub fn remove_node(&mut self, id: &NodeId) -> CoreDbResult<TreeNode> {
		let node = self
			.nodes
			.remove(id)
			.ok_or_else(|| CoreDbError::NodeNotFound(id.to_string()))?;
		if let Some(siblings) = self.children_by_parent.get_mut(&node.parent_id) {
			siblings.retain(|cid| cid != id);
		}
		if !node.removed {
			self.name_by_parent
				.remove(&(node.parent_id.clone(), node.name.clone()));
		}
		if let Some(set) = self.nodes_by_type.get_mut(&node.node_type) {
			set.remove(id);
		}
		if let Some(v) = self.nodes_by_updated_at.get_mut(&node.updated_at) {
			v.retain(|nid| nid != id);
		}
		Ok(node)
	}

	pub fn children_of(&self, parent_id: &NodeId) -> Vec<TreeNode> {
		self.children_by_parent
			.get(parent_id)
			.map(|ids| ids.iter().filter_map(|id| self.nodes.get(id)).cloned().collect())
			.unwrap_or_default()
	}

	pub fn all_nodes_of_tree(&self, tree_id: &TreeId) -> Vec<&TreeNode> {
		self.nodes.values().filter(|n| &n.tree_id == tree_id).collect()
	}

	/// Total node count, used as a traversal safety bound when walking ancestor chains.
	pub fn node_count(&self) -> usize {
		self.nodes.len()
	}

	// --- entities ---

	pub fn insert_entity(&mut self, entity: Entity) -> CoreDbResult<()> {
		let table = self.entities.entry(entity.node_type.clone()).or_default();
		table.by_node.insert(entity.node_id.clone(), entity.id.clone());
		table.by_id.insert(entity.id.clone(), entity);
		Ok(())
	}

	pub fn get_entity_by_node(&self, node_type: &str, node_id: &NodeId) -> Option<Entity> {
		let table = self.entities.get(node_type)?;
		let entity_id = table.by_node.get(node_id)?;
		table.by_id.get(entity_id).cloned()
	}

	pub fn replace_entity(&mut self, entity: Entity) -> CoreDbResult<()> {
		let table = self.entities.entry(entity.node_type.clone()).or_default();
		if !table.by_id.contains_key(&entity.id) {
			return Err(CoreDbError::EntityNotFound(entity.id.to_string()));
		}
		table.by_id.insert(entity.id.clone(), entity);
		Ok(())
	}

	pub fn remove_entity_by_node(&mut self, node_type: &str, node_id: &NodeId) -> CoreDbResult<()> {
		if let Some(table) = self.entities.get_mut(node_type) {
			if let Some(entity_id) = table.by_node.remove(node_id) {
				table.by_id.remove(&entity_id);
			}
		}
		Ok(())
	}
}
