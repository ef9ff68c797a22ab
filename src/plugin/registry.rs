//! Plugin registry (spec §4.5): typed, keyed by `nodeType`, with handler capability flags.
//! The core never inspects payload shape beyond its own fields — payloads are opaque to
//! everything but the plugin's handler and validators (§9, "dynamic dispatch / duck-typed
//! plugins in the source become a typed registry").

use super::handler::EntityHandler;
use crate::error::{EngineError, EngineResult};
use crate::ids::TreeId;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Which trees a plugin applies to (`getPluginsForTree(treeId|'*')`, spec §4.5/§6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PluginTreeScope {
	All,
	Specific(Vec<TreeId>),
}

impl PluginTreeScope {
	fn applies_to(&self, tree_id: &TreeId) -> bool {
		match self {
			Self::All => true,
			Self::Specific(ids) => ids.contains(tree_id),
		}
	}
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySchema {
	pub store_name: String,
	pub key_schema: String,
	pub indices: Vec<String>,
	pub schema_version: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRules {
	pub name_pattern: Option<String>,
	pub max_children: Option<usize>,
}

/// Which lifecycle hooks a plugin implements, so the pipeline can skip calling hooks that
/// are known no-ops.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleFlags {
	pub has_after_create: bool,
	pub has_before_delete: bool,
	pub has_after_update: bool,
	pub has_after_move: bool,
	pub has_after_trash: bool,
	pub has_after_recover: bool,
}

/// Plugin metadata registered alongside an [`EntityHandler`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginDefinition {
	pub node_type: String,
	pub display_name: String,
	pub icon: String,
	pub version: String,
	pub category: Option<String>,
	/// Dispatch order tiebreaker: plugins run in `(create_order, node_type)` order.
	pub create_order: i32,
	pub schema: EntitySchema,
	pub validation: ValidationRules,
	pub lifecycle_flags: LifecycleFlags,
	pub tree_scope: PluginTreeScope,
	/// Opaque to the core; consumed by the UI layer only (spec §4.5).
	pub ui_component_paths: HashMap<String, String>,
	/// Whether commands touching this plugin's entity can be undone (spec §9).
	pub reversible: bool,
}

struct RegisteredPlugin {
	definition: PluginDefinition,
	handler: Arc<dyn EntityHandler>,
}

/// A statically-known plugin, collected via `inventory::submit!` so it is registered the
/// moment the binary links it in, with no explicit host-side wiring call.
pub struct InventoryPlugin {
	pub definition_fn: fn() -> PluginDefinition,
	pub handler_fn: fn() -> Arc<dyn EntityHandler>,
}

inventory::collect!(InventoryPlugin);

#[derive(Default)]
pub struct PluginRegistry {
	plugins: parking_lot::RwLock<HashMap<String, RegisteredPlugin>>,
}

impl PluginRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// `register(definition, handler)` — refuses duplicates of `nodeType`.
	pub fn register(
		&self,
		definition: PluginDefinition,
		handler: Arc<dyn EntityHandler>,
	) -> EngineResult<()> {
		let mut plugins = self.plugins.write();
		if plugins.contains_key(&definition.node_type) {
			return Err(EngineError::InvalidPayload(format!(
				"node type '{}' already registered",
				definition.node_type
			)));
		}
		plugins.insert(definition.node_type.clone(), RegisteredPlugin { definition, handler });
		Ok(())
	}

	/// Pull in every plugin that self-registered via `inventory::submit!` in this binary.
	/// Safe to call more than once; already-registered node types are skipped.
	pub fn bootstrap_from_inventory(&self) {
		for plugin in inventory::iter::<InventoryPlugin> {
			let definition = (plugin.definition_fn)();
			if self.plugins.read().contains_key(&definition.node_type) {
				continue;
			}
			let handler = (plugin.handler_fn)();
			let _ = self.register(definition, handler);
		}
	}

	pub fn get_handler(&self, node_type: &str) -> EngineResult<Arc<dyn EntityHandler>> {
		self.plugins
			.read()
			.get(node_type)
			.map(|p| p.handler.clone())
			.ok_or_else(|| EngineError::UnknownNodeType(node_type.to_string()))
	}

	pub fn get_definition(&self, node_type: &str) -> EngineResult<PluginDefinition> {
		self.plugins
			.read()
			.get(node_type)
			.map(|p| p.definition.clone())
			.ok_or_else(|| EngineError::UnknownNodeType(node_type.to_string()))
	}

	pub fn is_registered(&self, node_type: &str) -> bool {
		self.plugins.read().contains_key(node_type)
	}

	/// `getPluginsForTree(treeId|'*')` — deterministic dispatch order by
	/// `(createOrder, nodeType)`.
	pub fn get_plugins_for_tree(&self, tree_id: Option<&TreeId>) -> Vec<PluginDefinition> {
		let plugins = self.plugins.read();
		let mut result: Vec<PluginDefinition> = plugins
			.values()
			.filter(|p| match tree_id {
				None => true,
				Some(id) => p.definition.tree_scope.applies_to(id),
			})
			.map(|p| p.definition.clone())
			.collect();
		result.sort_by(|a, b| {
			a.create_order
				.cmp(&b.create_order)
				.then_with(|| a.node_type.cmp(&b.node_type))
		});
		result
	}

	/// `getExtension(nodeType)` — the plugin's extension API surface, used by UI code to
	/// call plugin-specific methods through the facade. The core has no opinion on what
	/// that surface looks like, so it hands back the same typed handler.
	pub fn get_extension(&self, node_type: &str) -> EngineResult<Arc<dyn EntityHandler>> {
		self.get_handler(node_type)
	}

	pub fn registered_types(&self) -> Vec<String> {
		self.plugins.read().keys().cloned().collect()
	}
}
