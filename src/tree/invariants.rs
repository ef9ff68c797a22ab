//! Structural invariants enforced by the mutation pipeline (spec §4.2, §4.3):
//! sibling-name uniqueness, acyclicity on move, and the trash boundary.

use crate::error::{EngineError, EngineResult};
use crate::ids::NodeId;
use crate::storage::CoreDb;
use crate::tree::model::Tree;
use serde::{Deserialize, Serialize};

/// How a create/rename/move resolves a sibling-name collision (spec §4.3 command table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OnNameConflict {
	Fail,
	AutoRename,
	ReplaceIfSameType,
}

impl Default for OnNameConflict {
	fn default() -> Self {
		OnNameConflict::AutoRename
	}
}

/// Outcome of resolving a candidate `(parentId, name)` against the sibling-name invariant.
pub enum NameResolution {
	/// No conflict, or conflict resolved by picking a fresh name.
	Use(String),
	/// `replaceIfSameType` resolved by removing the existing node first.
	ReplaceExisting(NodeId),
}

/// Sibling-name uniqueness (spec §4.2 invariant 1): no two non-removed children of the same
/// parent share a name. `policy` governs how a collision against `candidate_type` is handled.
pub fn resolve_name_conflict(
	core: &CoreDb,
	parent_id: &NodeId,
	candidate_name: &str,
	candidate_type: &str,
	policy: OnNameConflict,
) -> EngineResult<NameResolution> {
	let Some(existing_id) = core.name_conflict(parent_id, candidate_name) else {
		return Ok(NameResolution::Use(candidate_name.to_string()));
	};

	match policy {
		OnNameConflict::Fail => Err(EngineError::NameConflict {
			parent_id: parent_id.to_string(),
			name: candidate_name.to_string(),
		}),
		OnNameConflict::AutoRename => {
			let mut n = 1usize;
			loop {
				let candidate = format!("{candidate_name} ({n})");
				if core.name_conflict(parent_id, &candidate).is_none() {
					return Ok(NameResolution::Use(candidate));
				}
				n += 1;
			}
		}
		OnNameConflict::ReplaceIfSameType => {
			let existing = core
				.get_node(&existing_id)
				.ok_or_else(|| EngineError::UnknownNode(existing_id.to_string()))?;
			if existing.node_type == candidate_type {
				Ok(NameResolution::ReplaceExisting(existing_id))
			} else {
				Err(EngineError::NameConflict {
					parent_id: parent_id.to_string(),
					name: candidate_name.to_string(),
				})
			}
		}
	}
}

/// Acyclicity on move (spec §4.2 invariant 2): `target_parent_id` must not be `node_id`
/// itself or any of its descendants. Walks `target_parent_id`'s ancestor chain looking for
/// `node_id`; a corrupt (already-cyclic) chain trips the same error rather than looping
/// forever.
pub fn check_acyclic(core: &CoreDb, node_id: &NodeId, target_parent_id: &NodeId) -> EngineResult<()> {
	if node_id == target_parent_id {
		return Err(EngineError::CycleDetected {
			node_id: node_id.to_string(),
			target_parent_id: target_parent_id.to_string(),
		});
	}
	let mut current = target_parent_id.clone();
	let mut hops = 0usize;
	let bound = core_node_count_bound(core);
	loop {
		let Some(node) = core.get_node(&current) else {
			return Ok(());
		};
		if &node.parent_id == node_id {
			return Err(EngineError::CycleDetected {
				node_id: node_id.to_string(),
				target_parent_id: target_parent_id.to_string(),
			});
		}
		if node.parent_id == current {
			return Ok(()); // reached a sentinel root, whose parent is itself
		}
		current = node.parent_id.clone();
		hops += 1;
		if hops > bound {
			return Err(EngineError::CycleDetected {
				node_id: node_id.to_string(),
				target_parent_id: target_parent_id.to_string(),
			});
		}
	}
}

fn core_node_count_bound(core: &CoreDb) -> usize {
	core.node_count().max(1)
}

/// Trash boundary (spec §4.2 invariant 3, §9): trash membership is derived from ancestry
/// against the tree's `trash_root_node_id`, never a direct field flip. Plain `moveNodes`
/// must not cross this boundary in either direction; only `moveToTrash`/`recoverFromTrash`
/// may.
pub fn is_under_trash(core: &CoreDb, tree: &Tree, node_id: &NodeId) -> bool {
	if node_id == &tree.trash_root_node_id {
		return true;
	}
	let mut current = node_id.clone();
	let mut hops = 0usize;
	let bound = core_node_count_bound(core);
	while let Some(node) = core.get_node(&current) {
		if node.id == tree.trash_root_node_id {
			return true;
		}
		if node.parent_id == current {
			return false;
		}
		current = node.parent_id.clone();
		hops += 1;
		if hops > bound {
			return false;
		}
	}
	false
}

/// Reject a plain `moveNodes` that would cross the trash boundary; `moveToTrash` and
/// `recoverFromTrash` bypass this check deliberately.
pub fn assert_move_does_not_cross_trash_boundary(
	core: &CoreDb,
	tree: &Tree,
	node_id: &NodeId,
	target_parent_id: &NodeId,
) -> EngineResult<()> {
	let currently_trashed = is_under_trash(core, tree, node_id);
	let target_trashed = is_under_trash(core, tree, target_parent_id) || target_parent_id == &tree.trash_root_node_id;
	if currently_trashed || target_trashed {
		return Err(EngineError::AcrossTrashBoundary);
	}
	Ok(())
}

/// Sentinel roots (`rootNodeId`, `trashRootNodeId`) can never be renamed, moved, or deleted.
pub fn assert_not_sentinel(tree: &Tree, node_id: &NodeId) -> EngineResult<()> {
	if node_id == &tree.root_node_id || node_id == &tree.trash_root_node_id {
		return Err(EngineError::InvalidPayload(format!(
			"node {node_id} is a sentinel root and cannot be mutated"
		)));
	}
	Ok(())
}
