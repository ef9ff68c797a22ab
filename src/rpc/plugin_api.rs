//! `PluginApi` — registry introspection surface (spec §4.5, §6).

use crate::error::EngineResult;
use crate::ids::TreeId;
use crate::plugin::{EntityHandler, PluginDefinition, PluginRegistry};
use std::sync::Arc;

#[derive(Clone)]
pub struct PluginApi {
	registry: Arc<PluginRegistry>,
}

impl PluginApi {
	pub fn new(registry: Arc<PluginRegistry>) -> Self {
		Self { registry }
	}

	/// `getPluginsForTree(treeId|'*')`.
	pub fn get_plugins_for_tree(&self, tree_id: Option<&TreeId>) -> Vec<PluginDefinition> {
		self.registry.get_plugins_for_tree(tree_id)
	}

	pub fn get_extension(&self, node_type: &str) -> EngineResult<Arc<dyn EntityHandler>> {
		self.registry.get_extension(node_type)
	}

	pub fn registered_types(&self) -> Vec<String> {
		self.registry.registered_types()
	}

	pub fn is_registered(&self, node_type: &str) -> bool {
		self.registry.is_registered(node_type)
	}
}
