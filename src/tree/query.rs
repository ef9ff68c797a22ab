//! Read-only tree query service (spec §4.7).
//!
//! Each query is a small typed request dispatched against the store, rather than ad-hoc
//! methods scattered across the engine.

use crate::config::TraversalConfig;
use crate::error::{EngineError, EngineResult};
use crate::ids::NodeId;
use crate::storage::Storage;
use crate::tree::model::{
	ChildrenOptions, DescendantsOptions, Entity, SearchMode, SearchQuery, SortBy, SortOrder, TraversalResult,
	TraversalWarning, TreeNode,
};
use regex::Regex;
use std::collections::HashSet;

#[derive(Clone)]
pub struct TreeQueryService {
	storage: Storage,
	traversal: TraversalConfig,
}

impl TreeQueryService {
	pub fn new(storage: Storage, traversal: TraversalConfig) -> Self {
		Self { storage, traversal }
	}

	pub async fn get_node(&self, id: &NodeId) -> EngineResult<TreeNode> {
		let core = self.storage.core.read().await;
		core.get_node(id)
			.cloned()
			.ok_or_else(|| EngineError::UnknownNode(id.to_string()))
	}

	/// The entity bound 1:1 to a node, if the node's type has one registered.
	pub async fn get_entity(&self, node_id: &NodeId) -> EngineResult<Entity> {
		let core = self.storage.core.read().await;
		let node = core.get_node(node_id).ok_or_else(|| EngineError::UnknownNode(node_id.to_string()))?;
		core.get_entity_by_node(&node.node_type, node_id)
			.ok_or_else(|| EngineError::UnknownEntity(node_id.to_string()))
	}

	/// `getChildren(parentId, options)` — paginated, stable secondary sort on id.
	pub async fn get_children(&self, parent_id: &NodeId, options: &ChildrenOptions) -> EngineResult<Vec<TreeNode>> {
		let core = self.storage.core.read().await;
		if core.get_node(parent_id).is_none() {
			return Err(EngineError::UnknownNode(parent_id.to_string()));
		}
		let mut children: Vec<TreeNode> = core.children_of(parent_id).into_iter().filter(|n| !n.removed).collect();
		sort_nodes(&mut children, options.sort_by, options.sort_order);
		Ok(paginate(children, options.offset, options.limit))
	}

	/// `getDescendants(rootId, options)` — BFS bounded by `maxDepth`/the global depth bound,
	/// with cycle/depth warnings instead of panics (spec §4.2, §9).
	pub async fn get_descendants(
		&self,
		root_id: &NodeId,
		options: &DescendantsOptions,
	) -> EngineResult<TraversalResult<TreeNode>> {
		let core = self.storage.core.read().await;
		if core.get_node(root_id).is_none() {
			return Err(EngineError::UnknownNode(root_id.to_string()));
		}
		let bound = options.max_depth.unwrap_or(self.traversal.max_depth).min(self.traversal.max_depth);

		let mut items = Vec::new();
		let mut warnings = Vec::new();
		let mut visited: HashSet<NodeId> = HashSet::new();
		visited.insert(root_id.clone());
		let mut frontier = vec![(root_id.clone(), 0usize)];

		while let Some((current, depth)) = frontier.pop() {
			if depth >= bound {
				if !core.children_of(&current).is_empty() {
					warnings.push(TraversalWarning::DepthBoundExceeded {
						at_node: current.clone(),
						bound,
					});
				}
				continue;
			}
			for child in core.children_of(&current) {
				if child.removed {
					continue;
				}
				if let Some(types) = &options.include_types {
					if !types.iter().any(|t| t == &child.node_type) {
						continue;
					}
				}
				if !visited.insert(child.id.clone()) {
					warnings.push(TraversalWarning::CycleDetected {
						at_node: child.id.clone(),
					});
					continue;
				}
				frontier.push((child.id.clone(), depth + 1));
				items.push(child);
			}
		}
		Ok(TraversalResult { items, warnings })
	}

	/// `getAncestors(nodeId)` — walk up the parent chain to the tree's root sentinel.
	pub async fn get_ancestors(&self, node_id: &NodeId) -> EngineResult<TraversalResult<TreeNode>> {
		let core = self.storage.core.read().await;
		let mut node = core.get_node(node_id).cloned().ok_or_else(|| EngineError::UnknownNode(node_id.to_string()))?;

		let mut items = Vec::new();
		let mut warnings = Vec::new();
		let mut visited: HashSet<NodeId> = HashSet::new();
		visited.insert(node.id.clone());

		loop {
			if node.parent_id == node.id {
				break; // sentinel root is its own parent
			}
			if items.len() >= self.traversal.max_depth {
				warnings.push(TraversalWarning::DepthBoundExceeded {
					at_node: node.id.clone(),
					bound: self.traversal.max_depth,
				});
				break;
			}
			let Some(parent) = core.get_node(&node.parent_id).cloned() else {
				break;
			};
			if !visited.insert(parent.id.clone()) {
				warnings.push(TraversalWarning::CycleDetected { at_node: parent.id.clone() });
				break;
			}
			items.push(parent.clone());
			node = parent;
		}
		Ok(TraversalResult { items, warnings })
	}

	/// `searchNodes(query)` — exact/partial/regex name matching over the root node and its
	/// descendants. `getDescendants` excludes the root by contract, so it's added back in here.
	pub async fn search_nodes(&self, query: &SearchQuery) -> EngineResult<TraversalResult<TreeNode>> {
		let root = self.get_node(&query.root_node_id).await?;
		let descendants = self
			.get_descendants(&query.root_node_id, &DescendantsOptions::default())
			.await?;
		let candidates = std::iter::once(root).chain(descendants.items).filter(|n| !n.removed);

		let needle = if query.case_sensitive {
			query.query.clone()
		} else {
			query.query.to_lowercase()
		};
		let regex = match query.mode {
			SearchMode::Regex => {
				let pattern = if query.case_sensitive {
					query.query.clone()
				} else {
					format!("(?i){}", query.query)
				};
				Some(Regex::new(&pattern).map_err(|e| EngineError::InvalidQuery(e.to_string()))?)
			}
			_ => None,
		};

		let items = candidates
			.filter(|node| {
				let haystack = if query.case_sensitive { node.name.clone() } else { node.name.to_lowercase() };
				match query.mode {
					SearchMode::Exact => haystack == needle,
					SearchMode::Partial => haystack.contains(&needle),
					SearchMode::Regex => regex.as_ref().map(|r| r.is_match(&node.name)).unwrap_or(false),
				}
			})
			.collect();

		Ok(TraversalResult {
			items,
			warnings: descendants.warnings,
		})
	}
}

fn sort_nodes(nodes: &mut [TreeNode], sort_by: SortBy, order: SortOrder) {
	nodes.sort_by(|a, b| {
		let primary = match sort_by {
			SortBy::Name => a.name.cmp(&b.name),
			SortBy::CreatedAt => a.created_at.cmp(&b.created_at),
			SortBy::UpdatedAt => a.updated_at.cmp(&b.updated_at),
		};
		let primary = match order {
			SortOrder::Asc => primary,
			SortOrder::Desc => primary.reverse(),
		};
		primary.then_with(|| a.id.cmp(&b.id))
	});
}

fn paginate<T>(items: Vec<T>, offset: Option<usize>, limit: Option<usize>) -> Vec<T> {
	let offset = offset.unwrap_or(0);
	let iter = items.into_iter().skip(offset);
	match limit {
		Some(limit) => iter.take(limit).collect(),
		None => iter.collect(),
	}
}
