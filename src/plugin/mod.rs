//! Plugin registry and entity handlers (spec §4.5).

pub mod builtin;
pub mod handler;
pub mod registry;

pub use builtin::FOLDER_NODE_TYPE;

pub use handler::{EntityHandler, HandlerResult};
pub use registry::{EntitySchema, InventoryPlugin, LifecycleFlags, PluginDefinition, PluginRegistry, PluginTreeScope, ValidationRules};
