//! Command shape and the exhaustive command-kind table (spec §4.3).
//!
//! Each command is a typed enum variant carrying its own payload rather than an untyped
//! blob, so the pipeline's match over `CommandKind` is exhaustive and adding an operation
//! is a compile error everywhere it isn't yet handled.

use crate::ids::{now_ms, NodeId, SubscriptionId, Timestamp, TreeId};
use crate::tree::OnNameConflict;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `createNode` / `updateNode` / ... — every mutating operation the pipeline accepts.
/// `exportNodes`/`copyNodes` are read-only and served by the query service and RPC facade
/// directly; they never enter the pipeline and are not journaled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CommandKind {
	CreateNode {
		parent_id: NodeId,
		node_type: String,
		name: String,
		initial_payload: Value,
		#[serde(default)]
		on_name_conflict: OnNameConflict,
	},
	UpdateNode {
		node_id: NodeId,
		name: Option<String>,
		#[serde(default)]
		payload_patch: Value,
	},
	MoveNodes {
		node_ids: Vec<NodeId>,
		target_parent_id: NodeId,
		#[serde(default)]
		on_name_conflict: OnNameConflict,
	},
	DuplicateNodes {
		node_ids: Vec<NodeId>,
		target_parent_id: Option<NodeId>,
	},
	PasteNodes {
		source_node_ids: Vec<NodeId>,
		target_parent_id: NodeId,
		#[serde(default)]
		on_name_conflict: OnNameConflict,
	},
	MoveToTrash {
		node_ids: Vec<NodeId>,
	},
	RecoverFromTrash {
		node_ids: Vec<NodeId>,
		/// Where to restore to; defaults to the node's parent at the time it was trashed.
		target_parent_id: Option<NodeId>,
	},
	/// Permanent delete. Never journaled (spec §9) — there is no undo for this command.
	RemovePermanent {
		node_ids: Vec<NodeId>,
	},
	ImportNodes {
		parent_id: NodeId,
		nodes: Vec<ImportNodeSpec>,
	},
	CommitWorkingCopy {
		working_copy_id: crate::ids::WorkingCopyId,
	},
	CommitWorkingCopyForCreate {
		working_copy_id: crate::ids::WorkingCopyId,
	},
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportNodeSpec {
	pub node_type: String,
	pub name: String,
	pub payload: Value,
	pub children: Vec<ImportNodeSpec>,
}

/// `{ commandId, groupId?, kind, issuedAt, sourceViewId?, onNameConflict? }` (spec §4.3, §6).
///
/// `onNameConflict` at the envelope level is a convenience default the per-kind payload
/// already carries explicitly where relevant; kept here too since the RPC surface accepts it
/// at either level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
	pub command_id: String,
	pub group_id: Option<String>,
	pub tree_id: TreeId,
	pub kind: CommandKind,
	#[serde(default = "now_ms")]
	pub issued_at: Timestamp,
	pub source_view_id: Option<SubscriptionId>,
}

impl Command {
	pub fn new(tree_id: TreeId, kind: CommandKind) -> Self {
		Self {
			command_id: uuid::Uuid::new_v4().to_string(),
			group_id: None,
			tree_id,
			kind,
			issued_at: now_ms(),
			source_view_id: None,
		}
	}
}

/// What `commitCommand` hands back: applied state plus any non-fatal hook failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutcome {
	pub command_id: String,
	pub affected_node_ids: Vec<NodeId>,
	/// Present when a lifecycle hook failed after the storage write committed (spec §4.3,
	/// §7: `PartialFailure`). The command's data effects still happened.
	pub hook_error: Option<String>,
}
