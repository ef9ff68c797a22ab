//! The one node type the engine ships regardless of which plugins a deployment adds:
//! a plain folder with no entity fields beyond whatever the caller passes in. Registered
//! via `inventory::submit!`, so it is present the moment `bootstrap_from_inventory` runs
//! without any caller wiring.

use super::handler::{EntityHandler, HandlerResult};
use super::registry::{EntitySchema, InventoryPlugin, LifecycleFlags, PluginDefinition, PluginTreeScope, ValidationRules};
use crate::ids::NodeId;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub const FOLDER_NODE_TYPE: &str = "folder";

struct FolderHandler;

#[async_trait]
impl EntityHandler for FolderHandler {
	fn node_type(&self) -> &str {
		FOLDER_NODE_TYPE
	}

	fn validate(&self, _payload: &Value) -> HandlerResult<()> {
		Ok(())
	}

	async fn create_entity(&self, _node_id: &NodeId, initial: Value) -> HandlerResult<Value> {
		Ok(initial)
	}

	async fn update_entity(&self, _node_id: &NodeId, existing: Value, patch: Value) -> HandlerResult<Value> {
		let mut merged = existing;
		merge(&mut merged, patch);
		Ok(merged)
	}

	async fn delete_entity(&self, _node_id: &NodeId) -> HandlerResult<()> {
		Ok(())
	}
}

fn merge(target: &mut Value, patch: Value) {
	match (target, patch) {
		(Value::Object(target_map), Value::Object(patch_map)) => {
			for (k, v) in patch_map {
				merge(target_map.entry(k).or_insert(Value::Null), v);
			}
		}
		(target, patch) => *target = patch,
	}
}

fn definition() -> PluginDefinition {
	PluginDefinition {
		node_type: FOLDER_NODE_TYPE.to_string(),
		display_name: "Folder".to_string(),
		icon: "folder".to_string(),
		version: "1.0.0".to_string(),
		category: Some("structure".to_string()),
		create_order: 0,
		schema: EntitySchema {
			store_name: "entities_folder".to_string(),
			key_schema: "nodeId".to_string(),
			indices: vec![],
			schema_version: 1,
		},
		validation: ValidationRules::default(),
		lifecycle_flags: LifecycleFlags::default(),
		tree_scope: PluginTreeScope::All,
		ui_component_paths: Default::default(),
		reversible: true,
	}
}

fn handler() -> Arc<dyn EntityHandler> {
	Arc::new(FolderHandler)
}

inventory::submit! {
	InventoryPlugin {
		definition_fn: definition,
		handler_fn: handler,
	}
}
