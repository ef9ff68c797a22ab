//! The entity handler contract a plugin supplies at runtime (spec §4.5).
//!
//! Handler operations are synchronous to the storage transaction: the core opens a
//! transaction, calls the handler, then commits — handlers must not perform their own I/O
//! outside the provided data. `validate` must be pure and side-effect-free. The
//! working-copy adapter's round-trip must be an identity on unmodified fields.

use crate::ids::NodeId;
use async_trait::async_trait;
use serde_json::Value;

pub type HandlerResult<T> = Result<T, String>;

/// Per-`nodeType` entity handler, plus the lifecycle hooks the plugin opted into via its
/// [`super::registry::LifecycleFlags`].
#[async_trait]
pub trait EntityHandler: Send + Sync {
	fn node_type(&self) -> &str;

	/// Pure, side-effect-free validation of a candidate entity payload.
	fn validate(&self, payload: &Value) -> HandlerResult<()>;

	async fn create_entity(&self, node_id: &NodeId, initial: Value) -> HandlerResult<Value>;
	async fn update_entity(&self, node_id: &NodeId, existing: Value, patch: Value) -> HandlerResult<Value>;
	async fn delete_entity(&self, node_id: &NodeId) -> HandlerResult<()>;

	/// Map a persisted entity payload into an ephemeral draft shape.
	async fn to_working_copy_draft(&self, entity_payload: Value) -> Value {
		entity_payload
	}

	/// Map an ephemeral draft shape back into persisted entity fields. Round-trip must be
	/// an identity on unmodified fields.
	async fn from_working_copy_draft(&self, draft: Value) -> HandlerResult<Value> {
		Ok(draft)
	}

	// --- lifecycle hooks (advisory; failures never revert the storage write, spec §4.3) ---

	async fn after_create(&self, _node_id: &NodeId) -> HandlerResult<()> {
		Ok(())
	}
	async fn before_delete(&self, _node_id: &NodeId) -> HandlerResult<()> {
		Ok(())
	}
	async fn after_update(&self, _node_id: &NodeId) -> HandlerResult<()> {
		Ok(())
	}
	async fn after_move(&self, _node_id: &NodeId, _prev_parent: &NodeId, _new_parent: &NodeId) -> HandlerResult<()> {
		Ok(())
	}
	async fn after_trash(&self, _node_id: &NodeId) -> HandlerResult<()> {
		Ok(())
	}
	async fn after_recover(&self, _node_id: &NodeId) -> HandlerResult<()> {
		Ok(())
	}
}
