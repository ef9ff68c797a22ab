//! End-to-end scenarios over the full engine (spec §8): each test drives the public
//! `Engine`/RPC surface the way a host application would, rather than poking at internals.

use async_trait::async_trait;
use hierarchidb_engine::command::{Command, CommandKind};
use hierarchidb_engine::config::InitializeOptions;
use hierarchidb_engine::plugin::{
	EntitySchema, EntityHandler, HandlerResult, LifecycleFlags, PluginDefinition, PluginTreeScope, FOLDER_NODE_TYPE,
};
use hierarchidb_engine::tree::OnNameConflict;
use hierarchidb_engine::Engine;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

async fn new_engine() -> Engine {
	Engine::initialize(InitializeOptions::default()).await.expect("engine initializes")
}

fn create_folder(tree_id: &hierarchidb_engine::ids::TreeId, parent_id: &hierarchidb_engine::ids::NodeId, name: &str) -> Command {
	Command::new(
		tree_id.clone(),
		CommandKind::CreateNode {
			parent_id: parent_id.clone(),
			node_type: FOLDER_NODE_TYPE.to_string(),
			name: name.to_string(),
			initial_payload: json!({}),
			on_name_conflict: OnNameConflict::AutoRename,
		},
	)
}

/// Scenario 1 (spec §8): create folder under root, rename, move to trash, recover.
#[tokio::test]
async fn create_rename_trash_recover() {
	let engine = new_engine().await;
	let tree = engine.create_tree("scenario-1".to_string()).await.unwrap();

	let created = engine
		.mutation
		.commit_command(create_folder(&tree.tree_id, &tree.root_node_id, "A"))
		.await
		.unwrap();
	let node_id = created.affected_node_ids[0].clone();

	engine
		.mutation
		.commit_command(Command::new(
			tree.tree_id.clone(),
			CommandKind::UpdateNode {
				node_id: node_id.clone(),
				name: Some("B".to_string()),
				payload_patch: serde_json::Value::Null,
			},
		))
		.await
		.unwrap();

	engine
		.mutation
		.commit_command(Command::new(tree.tree_id.clone(), CommandKind::MoveToTrash { node_ids: vec![node_id.clone()] }))
		.await
		.unwrap();

	let trashed = engine.query.get_node(&node_id).await.unwrap();
	assert!(trashed.removed);
	assert_eq!(trashed.parent_id, tree.trash_root_node_id);

	engine
		.mutation
		.commit_command(Command::new(
			tree.tree_id.clone(),
			CommandKind::RecoverFromTrash {
				node_ids: vec![node_id.clone()],
				target_parent_id: Some(tree.root_node_id.clone()),
			},
		))
		.await
		.unwrap();

	let recovered = engine.query.get_node(&node_id).await.unwrap();
	assert_eq!(recovered.name, "B");
	assert_eq!(recovered.parent_id, tree.root_node_id);
	assert!(!recovered.removed);
	// Every one of create/rename/trash/recover bumps version by exactly one (spec §3:
	// "every mutable record carries a monotonically increasing version").
	assert_eq!(recovered.version, 4);
}

/// Scenario 2 (spec §8): two same-named siblings under root with `onNameConflict:
/// auto-rename` resolve to "X" and "X (1)".
#[tokio::test]
async fn name_conflict_auto_rename() {
	let engine = new_engine().await;
	let tree = engine.create_tree("scenario-2".to_string()).await.unwrap();

	let first = engine
		.mutation
		.commit_command(create_folder(&tree.tree_id, &tree.root_node_id, "X"))
		.await
		.unwrap();
	let second = engine
		.mutation
		.commit_command(create_folder(&tree.tree_id, &tree.root_node_id, "X"))
		.await
		.unwrap();

	let first_node = engine.query.get_node(&first.affected_node_ids[0]).await.unwrap();
	let second_node = engine.query.get_node(&second.affected_node_ids[0]).await.unwrap();
	assert_eq!(first_node.name, "X");
	assert_eq!(second_node.name, "X (1)");
}

/// Scenario 3 (spec §8): moving a node under its own descendant is rejected with
/// `CycleDetected`, with no writes and no events.
#[tokio::test]
async fn acyclicity_rejects_move_under_descendant() {
	let engine = new_engine().await;
	let tree = engine.create_tree("scenario-3".to_string()).await.unwrap();

	let parent = engine
		.mutation
		.commit_command(create_folder(&tree.tree_id, &tree.root_node_id, "parent"))
		.await
		.unwrap();
	let parent_id = parent.affected_node_ids[0].clone();
	let child = engine
		.mutation
		.commit_command(create_folder(&tree.tree_id, &parent_id, "child"))
		.await
		.unwrap();
	let child_id = child.affected_node_ids[0].clone();

	let before = engine.query.get_node(&parent_id).await.unwrap();

	let subscription_id = engine.subscription.subscribe_node(parent_id.clone());
	let mut rx = engine.subscription.take_receiver(&subscription_id).unwrap();
	// Drain the synthetic `initial` delivery so only real changes remain to observe.
	rx.try_recv().ok();

	let result = engine
		.mutation
		.commit_command(Command::new(
			tree.tree_id.clone(),
			CommandKind::MoveNodes {
				node_ids: vec![parent_id.clone()],
				target_parent_id: child_id,
				on_name_conflict: OnNameConflict::AutoRename,
			},
		))
		.await;

	assert!(matches!(result, Err(hierarchidb_engine::EngineError::CycleDetected { .. })));

	let after = engine.query.get_node(&parent_id).await.unwrap();
	assert_eq!(before.version, after.version);
	assert_eq!(before.parent_id, after.parent_id);
	assert!(rx.try_recv().is_err(), "no event should have been emitted for a rejected move");
}

/// Scenario 4 (spec §8): working-copy isolation and commit.
#[tokio::test]
async fn working_copy_isolation_and_commit() {
	let engine = new_engine().await;
	let tree = engine.create_tree("scenario-4".to_string()).await.unwrap();

	let created = engine
		.mutation
		.commit_command(create_folder(&tree.tree_id, &tree.root_node_id, "E"))
		.await
		.unwrap();
	let node_id = created.affected_node_ids[0].clone();
	let before_entity = engine.query.get_entity(&node_id).await.unwrap();

	let subscription_id = engine.subscription.subscribe_node(node_id.clone());
	let mut rx = engine.subscription.take_receiver(&subscription_id).unwrap();
	rx.try_recv().ok(); // drain `initial`

	let wc_id = engine
		.working_copy
		.create_working_copy(
			node_id.clone(),
			FOLDER_NODE_TYPE.to_string(),
			before_entity.payload.clone(),
			"session-1".to_string(),
			false,
		)
		.await
		.unwrap();

	engine
		.working_copy
		.update(&wc_id, None, json!({ "color": "blue" }))
		.await
		.unwrap();

	// Reads of the entity are still pre-edit while the working copy is open.
	let during = engine.query.get_entity(&node_id).await.unwrap();
	assert_eq!(during.payload, before_entity.payload);
	assert_eq!(during.version, before_entity.version);

	engine
		.mutation
		.commit_command(Command::new(tree.tree_id.clone(), CommandKind::CommitWorkingCopy { working_copy_id: wc_id }))
		.await
		.unwrap();

	let after = engine.query.get_entity(&node_id).await.unwrap();
	assert_eq!(after.payload["color"], json!("blue"));
	assert_eq!(after.version, before_entity.version + 1);

	// The `updated` event debounces for 16ms before delivery.
	tokio::time::sleep(std::time::Duration::from_millis(50)).await;
	let mut observed_updates = 0;
	while let Ok(delivery) = rx.try_recv() {
		if let hierarchidb_engine::subscription::Delivery::Change(event) = delivery {
			if event.event_type == hierarchidb_engine::subscription::ChangeEventType::Updated {
				observed_updates += 1;
			}
		}
	}
	assert_eq!(observed_updates, 1);
}

/// Scenario 5 (spec §8): 100 `updateNode` commands on the same node within the 16ms
/// debounce window coalesce to between 1 and 100 delivered events, the last of which
/// reflects the final committed state.
#[tokio::test]
async fn subscription_coalescing() {
	let engine = new_engine().await;
	let tree = engine.create_tree("scenario-5".to_string()).await.unwrap();

	let created = engine
		.mutation
		.commit_command(create_folder(&tree.tree_id, &tree.root_node_id, "N"))
		.await
		.unwrap();
	let node_id = created.affected_node_ids[0].clone();

	let subscription_id = engine.subscription.subscribe_subtree(tree.root_node_id.clone(), None, None, None);
	let mut rx = engine.subscription.take_receiver(&subscription_id).unwrap();
	rx.try_recv().ok(); // drain `initial`

	for i in 0..100 {
		engine
			.mutation
			.commit_command(Command::new(
				tree.tree_id.clone(),
				CommandKind::UpdateNode {
					node_id: node_id.clone(),
					name: Some(format!("N-{i}")),
					payload_patch: serde_json::Value::Null,
				},
			))
			.await
			.unwrap();
	}

	// Give every debounced delivery task (16ms window) time to land.
	tokio::time::sleep(std::time::Duration::from_millis(100)).await;

	let mut events = Vec::new();
	while let Ok(delivery) = rx.try_recv() {
		if let hierarchidb_engine::subscription::Delivery::Change(event) = delivery {
			events.push(event);
		}
	}

	assert!(!events.is_empty(), "at least one coalesced update must be delivered");
	assert!(events.len() <= 100);

	let final_node = engine.query.get_node(&node_id).await.unwrap();
	let last = events.last().unwrap();
	assert_eq!(last.version, final_node.version);
	assert_eq!(last.node_id, node_id);
}

/// A plugin whose `afterCreate` hook always fails, used to exercise scenario 6.
struct FailingHandler;

const FAILING_NODE_TYPE: &str = "test-failing";

#[async_trait]
impl EntityHandler for FailingHandler {
	fn node_type(&self) -> &str {
		FAILING_NODE_TYPE
	}
	fn validate(&self, _payload: &serde_json::Value) -> HandlerResult<()> {
		Ok(())
	}
	async fn create_entity(&self, _node_id: &hierarchidb_engine::ids::NodeId, initial: serde_json::Value) -> HandlerResult<serde_json::Value> {
		Ok(initial)
	}
	async fn update_entity(
		&self,
		_node_id: &hierarchidb_engine::ids::NodeId,
		existing: serde_json::Value,
		_patch: serde_json::Value,
	) -> HandlerResult<serde_json::Value> {
		Ok(existing)
	}
	async fn delete_entity(&self, _node_id: &hierarchidb_engine::ids::NodeId) -> HandlerResult<()> {
		Ok(())
	}
	async fn after_create(&self, _node_id: &hierarchidb_engine::ids::NodeId) -> HandlerResult<()> {
		Err("afterCreate deliberately failed".to_string())
	}
}

fn failing_plugin_definition() -> PluginDefinition {
	PluginDefinition {
		node_type: FAILING_NODE_TYPE.to_string(),
		display_name: "Test Failing Plugin".to_string(),
		icon: "warning".to_string(),
		version: "0.0.1".to_string(),
		category: None,
		create_order: 100,
		schema: EntitySchema {
			store_name: "entities_test_failing".to_string(),
			key_schema: "nodeId".to_string(),
			indices: vec![],
			schema_version: 1,
		},
		validation: Default::default(),
		lifecycle_flags: LifecycleFlags { has_after_create: true, ..Default::default() },
		tree_scope: PluginTreeScope::All,
		ui_component_paths: Default::default(),
		reversible: false,
	}
}

/// Scenario 6 (spec §8): `createNode` with a plugin whose `afterCreate` throws. The node
/// and entity still exist in storage, the `created` event is still delivered, and the
/// typed caller observes the failure via `CommandOutcome::hook_error`; the JSON facade
/// collapses the same outcome into a `PartialFailure` RPC error.
#[tokio::test]
async fn plugin_hook_failure_yields_partial_failure() {
	let engine = new_engine().await;
	engine.register_plugin(failing_plugin_definition(), Arc::new(FailingHandler)).unwrap();
	let tree = engine.create_tree("scenario-6".to_string()).await.unwrap();

	let subscription_id = engine.subscription.subscribe_subtree(tree.root_node_id.clone(), None, None, None);
	let mut rx = engine.subscription.take_receiver(&subscription_id).unwrap();
	rx.try_recv().ok(); // drain `initial`

	let command = Command::new(
		tree.tree_id.clone(),
		CommandKind::CreateNode {
			parent_id: tree.root_node_id.clone(),
			node_type: FAILING_NODE_TYPE.to_string(),
			name: "will-fail".to_string(),
			initial_payload: json!({}),
			on_name_conflict: OnNameConflict::AutoRename,
		},
	);

	// Typed in-process API: the command still succeeds, with the hook failure surfaced
	// as `CommandOutcome::hook_error`.
	let outcome = engine.mutation.commit_command(command.clone()).await.unwrap();
	let node_id = outcome.affected_node_ids[0].clone();
	assert!(outcome.hook_error.is_some());

	let node = engine.query.get_node(&node_id).await.unwrap();
	assert_eq!(node.name, "will-fail");
	let entity = engine.query.get_entity(&node_id).await.unwrap();
	assert_eq!(entity.node_id, node_id);

	// `created` events deliver via a detached spawned task; give it a moment to land.
	tokio::time::sleep(std::time::Duration::from_millis(20)).await;
	let mut saw_created = false;
	while let Ok(delivery) = rx.try_recv() {
		if let hierarchidb_engine::subscription::Delivery::Change(event) = delivery {
			if event.event_type == hierarchidb_engine::subscription::ChangeEventType::Created {
				saw_created = true;
			}
		}
	}
	assert!(saw_created, "the `created` event must be delivered even though the hook failed");

	// JSON facade: the same outcome collapses into `{success:false, error:{kind:
	// "PartialFailure", ...}}`.
	let dispatcher = hierarchidb_engine::rpc::ApiDispatcher::new(&engine);
	let another = Command::new(
		tree.tree_id.clone(),
		CommandKind::CreateNode {
			parent_id: tree.root_node_id.clone(),
			node_type: FAILING_NODE_TYPE.to_string(),
			name: "will-fail-2".to_string(),
			initial_payload: json!({}),
			on_name_conflict: OnNameConflict::AutoRename,
		},
	);
	let params = serde_json::to_value(&another).unwrap();
	let response = dispatcher.dispatch_json("commitCommand", params).await;
	assert_eq!(response["success"], json!(false));
	assert_eq!(response["error"]["kind"], json!("PartialFailure"));
}

/// Property: sibling-name uniqueness holds for live children across a mix of creates.
#[tokio::test]
async fn property_sibling_name_uniqueness() {
	let engine = new_engine().await;
	let tree = engine.create_tree("prop-names".to_string()).await.unwrap();

	for _ in 0..5 {
		engine
			.mutation
			.commit_command(create_folder(&tree.tree_id, &tree.root_node_id, "dup"))
			.await
			.unwrap();
	}

	let children = engine
		.query
		.get_children(&tree.root_node_id, &Default::default())
		.await
		.unwrap();
	let mut names: Vec<&str> = children.iter().map(|n| n.name.as_str()).collect();
	names.sort();
	let mut deduped = names.clone();
	deduped.dedup();
	assert_eq!(names.len(), deduped.len(), "no two live siblings may share a name");
}

/// Property: undo/redo round-trips to the same observable state.
#[tokio::test]
async fn property_undo_redo_round_trip() {
	let engine = new_engine().await;
	let tree = engine.create_tree("prop-undo".to_string()).await.unwrap();

	let created = engine
		.mutation
		.commit_command(create_folder(&tree.tree_id, &tree.root_node_id, "A"))
		.await
		.unwrap();
	let node_id = created.affected_node_ids[0].clone();

	engine
		.mutation
		.commit_command(Command::new(
			tree.tree_id.clone(),
			CommandKind::UpdateNode {
				node_id: node_id.clone(),
				name: Some("A-renamed".to_string()),
				payload_patch: serde_json::Value::Null,
			},
		))
		.await
		.unwrap();

	let after_rename = engine.query.get_node(&node_id).await.unwrap();

	engine.mutation.undo(&tree.tree_id).await.unwrap();
	let after_undo = engine.query.get_node(&node_id).await.unwrap();
	assert_eq!(after_undo.name, "A");

	engine.mutation.redo(&tree.tree_id).await.unwrap();
	let after_redo = engine.query.get_node(&node_id).await.unwrap();
	assert_eq!(after_redo.name, after_rename.name);
}

/// Property: committing a working copy is idempotent-safe via the pipeline's command-id
/// replay cache — resubmitting the exact same command returns the cached outcome rather
/// than double-applying.
#[tokio::test]
async fn property_idempotent_commit() {
	let engine = new_engine().await;
	let tree = engine.create_tree("prop-idempotent".to_string()).await.unwrap();

	let command = create_folder(&tree.tree_id, &tree.root_node_id, "once");
	let first = engine.mutation.commit_command(command.clone()).await.unwrap();
	let second = engine.mutation.commit_command(command).await.unwrap();

	assert_eq!(first.affected_node_ids, second.affected_node_ids);
	let children = engine
		.query
		.get_children(&tree.root_node_id, &Default::default())
		.await
		.unwrap();
	assert_eq!(children.iter().filter(|n| n.name == "once").count(), 1);
}
