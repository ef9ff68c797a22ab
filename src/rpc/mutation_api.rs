//! `MutationApi` — command submission plus undo/redo (spec §4.3, §6).

use crate::command::{Command, CommandKind, CommandOutcome, CommandPipeline};
use crate::error::EngineResult;
use crate::ids::{NodeId, TreeId};
use crate::tree::OnNameConflict;
use std::sync::Arc;

#[derive(Clone)]
pub struct MutationApi {
	pipeline: Arc<CommandPipeline>,
}

impl MutationApi {
	pub fn new(pipeline: Arc<CommandPipeline>) -> Self {
		Self { pipeline }
	}

	pub async fn commit_command(&self, command: Command) -> EngineResult<CommandOutcome> {
		self.pipeline.commit(command).await
	}

	pub async fn undo(&self, tree_id: &TreeId) -> EngineResult<CommandOutcome> {
		self.pipeline.undo(tree_id).await
	}

	pub async fn redo(&self, tree_id: &TreeId) -> EngineResult<CommandOutcome> {
		self.pipeline.redo(tree_id).await
	}

	/// `create(parentId, nodeType, name, payload)` backward-compat shortcut for `createNode`.
	pub async fn create(
		&self,
		tree_id: TreeId,
		parent_id: NodeId,
		node_type: String,
		name: String,
		initial_payload: serde_json::Value,
	) -> EngineResult<CommandOutcome> {
		let command = Command::new(
			tree_id,
			CommandKind::CreateNode {
				parent_id,
				node_type,
				name,
				initial_payload,
				on_name_conflict: OnNameConflict::default(),
			},
		);
		self.pipeline.commit(command).await
	}

	/// `recoverFromTrash(nodeIds)` backward-compat shortcut.
	pub async fn recover_from_trash(&self, tree_id: TreeId, node_ids: Vec<NodeId>) -> EngineResult<CommandOutcome> {
		let command = Command::new(tree_id, CommandKind::RecoverFromTrash { node_ids, target_parent_id: None });
		self.pipeline.commit(command).await
	}

	/// `removeNodes(nodeIds)` backward-compat shortcut for permanent removal.
	pub async fn remove_nodes(&self, tree_id: TreeId, node_ids: Vec<NodeId>) -> EngineResult<CommandOutcome> {
		let command = Command::new(tree_id, CommandKind::RemovePermanent { node_ids });
		self.pipeline.commit(command).await
	}
}
