//! Top-level engine wiring: owns every component and the ones that need a background task
//! (spec §4.4 working-copy sweeper). Wires long-running services at startup and stops them
//! on shutdown.

use crate::command::CommandPipeline;
use crate::config::InitializeOptions;
use crate::error::{EngineError, EngineResult};
use crate::health::{DatabaseHealth, ServiceHealth, ServiceStatus, StartedAt, SystemHealth};
use crate::ids::{now_ms, NodeId, TreeId};
use crate::plugin::PluginRegistry;
use crate::rpc::{MutationApi, PluginApi, QueryApi, SubscriptionApi, WorkingCopyApi};
use crate::storage::Storage;
use crate::subscription::SubscriptionFabric;
use crate::tree::model::Tree;
use crate::tree::TreeQueryService;
use crate::working_copy::WorkingCopyManager;
use std::sync::Arc;
use tracing::info;

pub struct Engine {
	storage: Storage,
	plugins: Arc<PluginRegistry>,
	started_at: StartedAt,
	sweeper: tokio::task::JoinHandle<()>,
	rpc_timeout_ms: u64,

	pub query: QueryApi,
	pub mutation: MutationApi,
	pub subscription: SubscriptionApi,
	pub working_copy: WorkingCopyApi,
	pub plugin: PluginApi,
}

impl Engine {
	/// `initialize(options)` (spec §6). Opens both logical stores, bootstraps plugins
	/// registered via `inventory::submit!`, sweeps any working copies/batch sessions left
	/// over from a previous run, and starts the periodic sweeper.
	pub async fn initialize(options: InitializeOptions) -> EngineResult<Self> {
		let storage = Storage::open(options.store_names.core_db.clone(), options.store_names.ephemeral_db.clone());

		let plugins = Arc::new(PluginRegistry::new());
		plugins.bootstrap_from_inventory();

		let fabric = Arc::new(SubscriptionFabric::new(storage.clone(), options.subscription.clone()));
		let working_copies = Arc::new(WorkingCopyManager::new(storage.clone(), options.working_copy.clone()));
		let pipeline = CommandPipeline::new(
			storage.clone(),
			plugins.clone(),
			fabric.clone(),
			working_copies.clone(),
			options.journal.clone(),
		);
		let queries = Arc::new(TreeQueryService::new(storage.clone(), options.traversal.clone()));

		working_copies.sweep_expired().await;

		let sweep_interval = options.working_copy.sweep_interval_ms;
		let sweeper_copies = working_copies.clone();
		let sweeper = tokio::spawn(async move {
			let mut interval = tokio::time::interval(std::time::Duration::from_millis(sweep_interval));
			loop {
				interval.tick().await;
				let swept = sweeper_copies.sweep_expired().await;
				if !swept.is_empty() {
					info!(count = swept.len(), "swept expired working copies");
				}
			}
		});

		let plugin_api = PluginApi::new(plugins.clone());

		Ok(Self {
			storage: storage.clone(),
			plugins,
			started_at: StartedAt::now(),
			sweeper,
			rpc_timeout_ms: options.rpc_timeout_ms,
			query: QueryApi::new(storage.clone(), queries),
			mutation: MutationApi::new(pipeline),
			subscription: SubscriptionApi::new(fabric),
			working_copy: WorkingCopyApi::new(working_copies),
			plugin: plugin_api,
		})
	}

	/// Register a plugin that didn't self-register via `inventory::submit!` — the path used
	/// by tests and by hosts that load plugins dynamically at runtime.
	pub fn register_plugin(
		&self,
		definition: crate::plugin::PluginDefinition,
		handler: Arc<dyn crate::plugin::EntityHandler>,
	) -> EngineResult<()> {
		self.plugins.register(definition, handler)
	}

	/// Bootstrap a brand-new tree: two sentinel roots (live root + trash root) and nothing
	/// else. Tree creation is bootstrap, not a user-issued mutation, so it bypasses the
	/// command pipeline and its journal entirely (spec §3, §9).
	pub async fn create_tree(&self, name: String) -> EngineResult<Tree> {
		let root_node_id = NodeId::new();
		let trash_root_node_id = NodeId::new();
		let tree_id = TreeId::new();
		let tree = Tree {
			tree_id: tree_id.clone(),
			name,
			root_node_id: root_node_id.clone(),
			trash_root_node_id: trash_root_node_id.clone(),
		};

		let now = now_ms();
		let root = crate::tree::model::TreeNode {
			id: root_node_id.clone(),
			tree_id: tree_id.clone(),
			parent_id: root_node_id.clone(),
			name: "root".to_string(),
			node_type: "_root".to_string(),
			created_at: now,
			updated_at: now,
			version: 1,
			removed: false,
		};
		let trash_root = crate::tree::model::TreeNode {
			id: trash_root_node_id.clone(),
			tree_id: tree_id.clone(),
			parent_id: trash_root_node_id.clone(),
			name: "trash".to_string(),
			node_type: "_trash".to_string(),
			created_at: now,
			updated_at: now,
			version: 1,
			removed: false,
		};

		let mut core = self.storage.core.write().await;
		core.insert_tree(tree.clone())
			.map_err(|e| EngineError::InvalidPayload(e.to_string()))?;
		core.insert_node(root).map_err(|e| EngineError::InvalidPayload(e.to_string()))?;
		core.insert_node(trash_root).map_err(|e| EngineError::InvalidPayload(e.to_string()))?;
		Ok(tree)
	}

	/// `getSystemHealth()` (spec §4.8, §6).
	pub async fn get_system_health(&self) -> SystemHealth {
		let core = self.storage.core.read().await;
		let ephemeral = self.storage.ephemeral.read().await;
		let databases = vec![
			DatabaseHealth {
				name: "CoreDB".to_string(),
				status: ServiceStatus::Ok,
				record_count: core.list_trees().len(),
			},
			DatabaseHealth {
				name: "EphemeralDB".to_string(),
				status: ServiceStatus::Ok,
				record_count: ephemeral.working_copy_count(),
			},
		];
		let services = vec![
			ServiceHealth {
				name: "pluginRegistry".to_string(),
				status: ServiceStatus::Ok,
				detail: Some(format!("{} registered types", self.plugins.registered_types().len())),
			},
			ServiceHealth {
				name: "workingCopySweeper".to_string(),
				status: if self.sweeper.is_finished() { ServiceStatus::Down } else { ServiceStatus::Ok },
				detail: None,
			},
		];
		SystemHealth {
			status: ServiceStatus::Ok,
			uptime_ms: self.started_at.uptime_ms(),
			databases,
			services,
			subscription_stats: self.subscription.get_subscription_stats(),
		}
	}

	pub fn rpc_timeout_ms(&self) -> u64 {
		self.rpc_timeout_ms
	}

	/// `shutdown()` (spec §4.8, §6): stop the background sweeper. Data already committed to
	/// `CoreDB` is untouched; `EphemeralDB` is non-durable by design and is simply dropped.
	pub async fn shutdown(self) {
		self.sweeper.abort();
		self.subscription.unsubscribe_all();
	}
}
