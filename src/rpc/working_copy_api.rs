//! `WorkingCopyApi` — two-phase editing surface (spec §4.4, §6).

use crate::error::EngineResult;
use crate::ids::{NodeId, WorkingCopyId};
use crate::working_copy::{WorkingCopyManager, WorkingCopyRecord};
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone)]
pub struct WorkingCopyApi {
	manager: Arc<WorkingCopyManager>,
}

impl WorkingCopyApi {
	pub fn new(manager: Arc<WorkingCopyManager>) -> Self {
		Self { manager }
	}

	pub async fn create_working_copy(
		&self,
		node_id: NodeId,
		node_type: String,
		current_payload: Value,
		session_id: String,
		force: bool,
	) -> EngineResult<WorkingCopyId> {
		self.manager.create_working_copy(node_id, node_type, current_payload, session_id, force).await
	}

	pub async fn create_draft_working_copy(
		&self,
		parent_node_id: NodeId,
		node_type: String,
		session_id: String,
	) -> EngineResult<WorkingCopyId> {
		self.manager.create_draft_working_copy(parent_node_id, node_type, session_id).await
	}

	pub async fn get(&self, id: &WorkingCopyId) -> EngineResult<WorkingCopyRecord> {
		self.manager.get(id).await
	}

	pub async fn update(&self, id: &WorkingCopyId, name: Option<String>, payload_patch: Value) -> EngineResult<()> {
		self.manager.update(id, name, payload_patch).await
	}

	pub async fn discard(&self, id: &WorkingCopyId) -> EngineResult<()> {
		self.manager.discard(id).await
	}
}
