//! Working-copy manager (spec §4.4): two-phase editing for "edit existing" and
//! "create new" flows. Edits live only in `EphemeralDB`; they never become visible to
//! readers of the original entity until a `commitWorkingCopy*` command lands them in
//! `CoreDB` (handled by [`crate::command::pipeline`]).

use crate::config::WorkingCopyConfig;
use crate::error::{EngineError, EngineResult};
use crate::ids::{now_ms, NodeId, Timestamp, WorkingCopyId};
use crate::storage::Storage;
use serde::{Deserialize, Serialize};

/// A copy of an entity (or a draft entity for `create`) living only in `EphemeralDB`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingCopyRecord {
	pub id: WorkingCopyId,
	/// `Some(nodeId)` for an edit-existing working copy, `None` for a create-draft.
	pub working_copy_of: Option<NodeId>,
	pub node_type: String,
	/// For a create-draft: the parent the new node will be created under.
	pub parent_node_id: Option<NodeId>,
	pub name: Option<String>,
	pub payload: serde_json::Value,
	pub copied_at: Timestamp,
	pub expires_at: Timestamp,
	pub is_dirty: bool,
	pub session_id: String,
}

#[derive(Clone)]
pub struct WorkingCopyManager {
	storage: Storage,
	config: WorkingCopyConfig,
}

impl WorkingCopyManager {
	pub fn new(storage: Storage, config: WorkingCopyConfig) -> Self {
		Self { storage, config }
	}

	/// `createWorkingCopy(nodeId)`: clone the node's current entity into `EphemeralDB`.
	pub async fn create_working_copy(
		&self,
		node_id: NodeId,
		node_type: String,
		current_payload: serde_json::Value,
		session_id: String,
		force: bool,
	) -> EngineResult<WorkingCopyId> {
		let mut db = self.storage.ephemeral.write().await;
		if let Some(existing) = db.find_by_target(&Some(node_id.clone())) {
			if force {
				let id = existing.id.clone();
				db.remove(&id).ok();
			} else {
				return Err(EngineError::WorkingCopyExists(node_id.to_string()));
			}
		}

		let now = now_ms();
		let record = WorkingCopyRecord {
			id: WorkingCopyId::new(),
			working_copy_of: Some(node_id),
			node_type,
			parent_node_id: None,
			name: None,
			payload: current_payload,
			copied_at: now,
			expires_at: now + self.config.ttl_ms,
			is_dirty: false,
			session_id,
		};
		let id = record.id.clone();
		db.insert(record);
		Ok(id)
	}

	/// `createDraftWorkingCopy(parentNodeId, nodeType)`: a draft entity not yet bound to
	/// any node.
	pub async fn create_draft_working_copy(
		&self,
		parent_node_id: NodeId,
		node_type: String,
		session_id: String,
	) -> EngineResult<WorkingCopyId> {
		let now = now_ms();
		let record = WorkingCopyRecord {
			id: WorkingCopyId::new(),
			working_copy_of: None,
			node_type,
			parent_node_id: Some(parent_node_id),
			name: None,
			payload: serde_json::Value::Object(Default::default()),
			copied_at: now,
			expires_at: now + self.config.ttl_ms,
			is_dirty: false,
			session_id,
		};
		let id = record.id.clone();
		let mut db = self.storage.ephemeral.write().await;
		db.insert(record);
		Ok(id)
	}

	pub async fn get(&self, id: &WorkingCopyId) -> EngineResult<WorkingCopyRecord> {
		let db = self.storage.ephemeral.read().await;
		let record = db
			.get(id)
			.cloned()
			.ok_or_else(|| EngineError::UnknownWorkingCopy(id.to_string()))?;
		if record.expires_at <= now_ms() {
			return Err(EngineError::WorkingCopyExpired(id.to_string()));
		}
		Ok(record)
	}

	/// Mutate the draft/copy fields. The UI "mutates the copy freely" (spec §4.4); reads
	/// of the original entity never observe this (isolation).
	pub async fn update(
		&self,
		id: &WorkingCopyId,
		name: Option<String>,
		payload_patch: serde_json::Value,
	) -> EngineResult<()> {
		let mut db = self.storage.ephemeral.write().await;
		let record = db
			.get_mut(id)
			.ok_or_else(|| EngineError::UnknownWorkingCopy(id.to_string()))?;
		if record.expires_at <= now_ms() {
			return Err(EngineError::WorkingCopyExpired(id.to_string()));
		}
		if let Some(name) = name {
			record.name = Some(name);
		}
		merge_json(&mut record.payload, payload_patch);
		record.is_dirty = true;
		Ok(())
	}

	pub async fn discard(&self, id: &WorkingCopyId) -> EngineResult<()> {
		let mut db = self.storage.ephemeral.write().await;
		db.remove(id)
			.map(|_| ())
			.map_err(|_| EngineError::UnknownWorkingCopy(id.to_string()))
	}

	/// Sweep working copies whose TTL elapsed (spec §4.4: "swept on engine start and
	/// periodically").
	pub async fn sweep_expired(&self) -> Vec<WorkingCopyId> {
		let mut db = self.storage.ephemeral.write().await;
		db.sweep_expired(now_ms())
	}
}

fn merge_json(target: &mut serde_json::Value, patch: serde_json::Value) {
	match (target, patch) {
		(serde_json::Value::Object(target_map), serde_json::Value::Object(patch_map)) => {
			for (k, v) in patch_map {
				merge_json(target_map.entry(k).or_insert(serde_json::Value::Null), v);
			}
		}
		(target, patch) => {
			*target = patch;
		}
	}
}
