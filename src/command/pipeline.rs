//! The command pipeline (spec §4.3): Validate → Plan → Apply → Hook → Emit → Journal →
//! Acknowledge, driven uniformly for every [`CommandKind`], with one orchestrator over the
//! typed command enum rather than one dispatch function per command family. Each stage
//! emits a `tracing::info!(command_kind = .., tree_id = ..)` span.

use super::journal::{JournalAction, JournalEntry, NodeSnapshot, UndoJournal};
use super::types::{Command, CommandKind, CommandOutcome, ImportNodeSpec};
use crate::config::JournalConfig;
use crate::error::{EngineError, EngineResult};
use crate::ids::{now_ms, EntityId, NodeId, TreeId};
use crate::plugin::PluginRegistry;
use crate::storage::core_db::CoreDb;
use crate::storage::Storage;
use crate::subscription::{ChangeEvent, ChangeEventType, EventCause, SubscriptionFabric};
use crate::tree::model::{Entity, Tree, TreeNode};
use crate::tree::{check_acyclic, invariants, resolve_name_conflict, NameResolution, OnNameConflict};
use crate::working_copy::WorkingCopyManager;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

enum HookCall {
	AfterCreate(String, NodeId),
	BeforeDelete(String, NodeId),
	AfterUpdate(String, NodeId),
	AfterMove(String, NodeId, NodeId, NodeId),
	AfterTrash(String, NodeId),
	AfterRecover(String, NodeId),
}

/// Everything one command's Apply stage produced, handed off to Hook/Emit/Journal.
struct ApplyResult {
	affected: Vec<NodeId>,
	events: Vec<ChangeEvent>,
	hooks: Vec<HookCall>,
	journal_action: Option<JournalAction>,
}

const IDEMPOTENCY_CACHE_CAP: usize = 4096;

/// One request to the serialized dispatch loop, with a reply channel back to the caller.
enum DriverRequest {
	Commit(Command, oneshot::Sender<EngineResult<CommandOutcome>>),
	Undo(TreeId, oneshot::Sender<EngineResult<CommandOutcome>>),
	Redo(TreeId, oneshot::Sender<EngineResult<CommandOutcome>>),
}

pub struct CommandPipeline {
	storage: Storage,
	plugins: Arc<PluginRegistry>,
	fabric: Arc<SubscriptionFabric>,
	working_copies: Arc<WorkingCopyManager>,
	journal: UndoJournal,
	seen: parking_lot::Mutex<(HashMap<String, CommandOutcome>, VecDeque<String>)>,
	/// Scratch slot for the most recent lifecycle hook failure within one `commit()` call.
	/// Commands never run concurrently against the same pipeline (single dispatch loop), so
	/// a single-slot cell is enough — no need for a map keyed by command id.
	last_hook_error: parking_lot::Mutex<Option<String>>,
	/// Every `commit`/`undo`/`redo` call is a request handed to the one task running
	/// [`CommandPipeline::drive`], so two commands are never in Apply at the same time and a
	/// command's writes are always all-or-nothing visible before the next one starts.
	driver_tx: mpsc::UnboundedSender<DriverRequest>,
}

impl CommandPipeline {
	pub fn new(
		storage: Storage,
		plugins: Arc<PluginRegistry>,
		fabric: Arc<SubscriptionFabric>,
		working_copies: Arc<WorkingCopyManager>,
		journal_config: JournalConfig,
	) -> Arc<Self> {
		let (driver_tx, driver_rx) = mpsc::unbounded_channel();
		let pipeline = Arc::new(Self {
			storage,
			plugins,
			fabric,
			working_copies,
			journal: UndoJournal::new(journal_config.max_entries_per_tree),
			seen: parking_lot::Mutex::new((HashMap::new(), VecDeque::new())),
			last_hook_error: parking_lot::Mutex::new(None),
			driver_tx,
		});
		tokio::spawn(Self::drive(pipeline.clone(), driver_rx));
		pipeline
	}

	/// The single serialized dispatch loop: one task, one request in flight at a time. Commit,
	/// undo and redo all go through here rather than racing each other under the fine-grained
	/// per-store `RwLock` alone.
	async fn drive(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<DriverRequest>) {
		while let Some(req) = rx.recv().await {
			match req {
				DriverRequest::Commit(command, reply) => {
					let result = self.commit_serialized(command).await;
					let _ = reply.send(result);
				}
				DriverRequest::Undo(tree_id, reply) => {
					let result = self.undo_serialized(&tree_id).await;
					let _ = reply.send(result);
				}
				DriverRequest::Redo(tree_id, reply) => {
					let result = self.redo_serialized(&tree_id).await;
					let _ = reply.send(result);
				}
			}
		}
	}

	/// Hand a command to the dispatch loop and wait for its outcome.
	pub async fn commit(&self, command: Command) -> EngineResult<CommandOutcome> {
		let (tx, rx) = oneshot::channel();
		self.driver_tx
			.send(DriverRequest::Commit(command, tx))
			.map_err(|_| EngineError::TransactionAborted("dispatch loop stopped".to_string()))?;
		rx.await.map_err(|_| EngineError::TransactionAborted("dispatch loop dropped the reply".to_string()))?
	}

	pub async fn undo(&self, tree_id: &TreeId) -> EngineResult<CommandOutcome> {
		let (tx, rx) = oneshot::channel();
		self.driver_tx
			.send(DriverRequest::Undo(tree_id.clone(), tx))
			.map_err(|_| EngineError::TransactionAborted("dispatch loop stopped".to_string()))?;
		rx.await.map_err(|_| EngineError::TransactionAborted("dispatch loop dropped the reply".to_string()))?
	}

	pub async fn redo(&self, tree_id: &TreeId) -> EngineResult<CommandOutcome> {
		let (tx, rx) = oneshot::channel();
		self.driver_tx
			.send(DriverRequest::Redo(tree_id.clone(), tx))
			.map_err(|_| EngineError::TransactionAborted("dispatch loop stopped".to_string()))?;
		rx.await.map_err(|_| EngineError::TransactionAborted("dispatch loop dropped the reply".to_string()))?
	}

	/// Drive one command through all seven stages. Idempotent: replaying the same
	/// `commandId` returns the cached outcome instead of re-applying (spec §4.3). Only ever
	/// called from [`CommandPipeline::drive`], never directly.
	async fn commit_serialized(&self, command: Command) -> EngineResult<CommandOutcome> {
		if let Some(cached) = self.seen.lock().0.get(&command.command_id).cloned() {
			info!(command_id = %command.command_id, "replayed idempotent command");
			return Ok(cached);
		}

		info!(command_id = %command.command_id, tree_id = %command.tree_id, "committing command");

		let journalable = !matches!(command.kind, CommandKind::RemovePermanent { .. });

		let apply = self.apply(&command).await?;

		for hook in &apply.hooks {
			self.run_hook(hook).await;
		}
		let hook_error = self.drain_hook_errors();

		for event in &apply.events {
			self.fabric.emit(event.clone()).await;
		}

		if journalable {
			if let Some(action) = apply.journal_action {
				self.journal.record(
					&command.tree_id,
					JournalEntry {
						command_id: command.command_id.clone(),
						group_id: command.group_id.clone(),
						at: command.issued_at,
						action,
					},
				);
			}
		}

		let outcome = CommandOutcome {
			command_id: command.command_id.clone(),
			affected_node_ids: apply.affected,
			hook_error,
		};
		self.cache_outcome(command.command_id, outcome.clone());
		Ok(outcome)
	}

	/// Pop the last undo group (commands sharing a `groupId` undo atomically), check each
	/// affected node's plugin is reversible, and replay each entry's inverse. Only ever called
	/// from [`CommandPipeline::drive`].
	async fn undo_serialized(&self, tree_id: &TreeId) -> EngineResult<CommandOutcome> {
		let group = self.journal.take_undo_group(tree_id);
		if group.is_empty() {
			return Err(EngineError::UndoUnavailable);
		}
		if let Err(e) = self.assert_group_reversible(&group) {
			self.journal.push_undone_to_redo(tree_id, group);
			return Err(e);
		}
		let mut affected = Vec::new();
		{
			let mut core = self.storage.core.write().await;
			for entry in group.iter().rev() {
				affected.extend(apply_inverse(&mut core, &entry.action, Direction::Undo)?);
			}
		}
		self.journal.push_undone_to_redo(tree_id, group);
		self.emit_sync_hint(tree_id).await;
		Ok(CommandOutcome {
			command_id: format!("undo-{}", now_ms()),
			affected_node_ids: affected,
			hook_error: None,
		})
	}

	async fn redo_serialized(&self, tree_id: &TreeId) -> EngineResult<CommandOutcome> {
		let group = self.journal.take_redo_group(tree_id);
		if group.is_empty() {
			return Err(EngineError::RedoUnavailable);
		}
		if let Err(e) = self.assert_group_reversible(&group) {
			self.journal.push_redone_to_undo(tree_id, group);
			return Err(e);
		}
		let mut affected = Vec::new();
		{
			let mut core = self.storage.core.write().await;
			for entry in &group {
				affected.extend(apply_inverse(&mut core, &entry.action, Direction::Redo)?);
			}
		}
		self.journal.push_redone_to_undo(tree_id, group);
		self.emit_sync_hint(tree_id).await;
		Ok(CommandOutcome {
			command_id: format!("redo-{}", now_ms()),
			affected_node_ids: affected,
			hook_error: None,
		})
	}

	/// A plugin that declares itself non-reversible (spec §9) refuses both undo and redo for
	/// every node of its type, not just the command that first touched it.
	fn assert_group_reversible(&self, group: &[JournalEntry]) -> EngineResult<()> {
		for entry in group {
			for node_type in entry.action.node_types() {
				if !self.plugins.get_definition(node_type)?.reversible {
					return Err(EngineError::NonReversible(node_type.to_string()));
				}
			}
		}
		Ok(())
	}

	/// Undo/redo bypass the normal per-field Emit stage (they restore whole rows at once);
	/// downstream subscribers still need *some* signal, so a plain `updated` event per
	/// affected node is enough to make them refetch.
	async fn emit_sync_hint(&self, tree_id: &TreeId) {
		let nodes: Vec<TreeNode> = {
			let core = self.storage.core.read().await;
			core.all_nodes_of_tree(tree_id).into_iter().cloned().collect()
		};
		for node in nodes {
			self.fabric
				.emit(ChangeEvent {
					event_type: ChangeEventType::Updated,
					node_id: node.id.clone(),
					tree_id: tree_id.clone(),
					prev_parent_id: None,
					new_parent_id: Some(node.parent_id.clone()),
					at: now_ms(),
					version: node.version,
					cause: EventCause {
						command_id: "undo-redo".to_string(),
						group_id: None,
					},
				})
				.await;
		}
	}

	fn cache_outcome(&self, command_id: String, outcome: CommandOutcome) {
		let mut seen = self.seen.lock();
		if seen.1.len() == IDEMPOTENCY_CACHE_CAP {
			if let Some(oldest) = seen.1.pop_front() {
				seen.0.remove(&oldest);
			}
		}
		seen.1.push_back(command_id.clone());
		seen.0.insert(command_id, outcome);
	}

	async fn run_hook(&self, hook: &HookCall) {
		let (node_type, result) = match hook {
			HookCall::AfterCreate(t, id) => (t, self.call_handler(t, |h| h.after_create(id)).await),
			HookCall::BeforeDelete(t, id) => (t, self.call_handler(t, |h| h.before_delete(id)).await),
			HookCall::AfterUpdate(t, id) => (t, self.call_handler(t, |h| h.after_update(id)).await),
			HookCall::AfterMove(t, id, prev, next) => (t, self.call_handler(t, |h| h.after_move(id, prev, next)).await),
			HookCall::AfterTrash(t, id) => (t, self.call_handler(t, |h| h.after_trash(id)).await),
			HookCall::AfterRecover(t, id) => (t, self.call_handler(t, |h| h.after_recover(id)).await),
		};
		if let Err(e) = result {
			warn!(node_type = %node_type, error = %e, "lifecycle hook failed");
			*self.last_hook_error.lock() = Some(e);
		}
	}

	fn drain_hook_errors(&self) -> Option<String> {
		self.last_hook_error.lock().take()
	}

	async fn call_handler<F, Fut>(&self, node_type: &str, f: F) -> Result<(), String>
	where
		F: FnOnce(Arc<dyn crate::plugin::EntityHandler>) -> Fut,
		Fut: std::future::Future<Output = Result<(), String>>,
	{
		match self.plugins.get_handler(node_type) {
			Ok(handler) => f(handler).await,
			Err(e) => Err(e.to_string()),
		}
	}

	async fn apply(&self, command: &Command) -> EngineResult<ApplyResult> {
		match &command.kind {
			CommandKind::CreateNode { .. } => self.apply_create_node(command).await,
			CommandKind::UpdateNode { .. } => self.apply_update_node(command).await,
			CommandKind::MoveNodes { .. } => self.apply_move_nodes(command).await,
			CommandKind::DuplicateNodes { .. } => self.apply_duplicate_nodes(command).await,
			CommandKind::PasteNodes { .. } => self.apply_paste_nodes(command).await,
			CommandKind::MoveToTrash { .. } => self.apply_move_to_trash(command).await,
			CommandKind::RecoverFromTrash { .. } => self.apply_recover_from_trash(command).await,
			CommandKind::RemovePermanent { node_ids } => self.apply_remove_permanent(&command.tree_id, node_ids).await,
			CommandKind::ImportNodes { .. } => self.apply_import_nodes(command).await,
			CommandKind::CommitWorkingCopy { working_copy_id } => {
				self.apply_commit_working_copy(command, working_copy_id).await
			}
			CommandKind::CommitWorkingCopyForCreate { working_copy_id } => {
				self.apply_commit_working_copy_for_create(command, working_copy_id).await
			}
		}
	}

	async fn apply_create_node(&self, command: &Command) -> EngineResult<ApplyResult> {
		let CommandKind::CreateNode {
			parent_id,
			node_type,
			name,
			initial_payload,
			on_name_conflict,
		} = &command.kind
		else {
			unreachable!()
		};

		let handler = self.plugins.get_handler(node_type)?;
		handler.validate(initial_payload).map_err(EngineError::InvalidPayload)?;

		let mut core = self.storage.core.write().await;
		let tree = get_tree(&core, &command.tree_id)?;
		if core.get_node(parent_id).is_none() {
			return Err(EngineError::UnknownNode(parent_id.to_string()));
		}
		if parent_id == &tree.trash_root_node_id || invariants::is_under_trash(&core, &tree, parent_id) {
			return Err(EngineError::AcrossTrashBoundary);
		}

		let resolution = resolve_name_conflict(&core, parent_id, name, node_type, *on_name_conflict)?;
		let final_name = match &resolution {
			NameResolution::Use(n) => n.clone(),
			NameResolution::ReplaceExisting(_) => name.clone(),
		};

		let now = now_ms();
		let node_id = NodeId::new();
		let new_node = TreeNode {
			id: node_id.clone(),
			tree_id: command.tree_id.clone(),
			parent_id: parent_id.clone(),
			name: final_name,
			node_type: node_type.clone(),
			created_at: now,
			updated_at: now,
			version: 1,
			removed: false,
		};

		let mut replaced_snapshot = None;
		if let NameResolution::ReplaceExisting(existing_id) = &resolution {
			let existing_entity = core.get_entity_by_node(node_type, existing_id);
			let existing_node = core.remove_node(existing_id).map_err(to_engine_storage_err)?;
			core.remove_entity_by_node(node_type, existing_id).ok();
			replaced_snapshot = Some(NodeSnapshot {
				node: existing_node,
				entity: existing_entity,
			});
		}

		core.insert_node(new_node.clone()).map_err(to_engine_storage_err)?;

		drop(core);
		let entity_payload = handler
			.create_entity(&node_id, initial_payload.clone())
			.await
			.map_err(EngineError::InvalidPayload)?;
		let entity = Entity {
			id: EntityId::new(),
			node_id: node_id.clone(),
			node_type: node_type.clone(),
			payload: entity_payload,
			created_at: now,
			updated_at: now,
			version: 1,
		};
		self.storage
			.core
			.write()
			.await
			.insert_entity(entity.clone())
			.map_err(to_engine_storage_err)?;

		let created_snapshot = NodeSnapshot {
			node: new_node.clone(),
			entity: Some(entity),
		};
		let journal_action = match replaced_snapshot {
			Some(removed) => JournalAction::Replaced {
				removed,
				created: created_snapshot,
			},
			None => JournalAction::Created(vec![created_snapshot]),
		};

		Ok(ApplyResult {
			affected: vec![node_id.clone()],
			events: vec![change_event(ChangeEventType::Created, &new_node, None, command)],
			hooks: vec![HookCall::AfterCreate(node_type.clone(), node_id)],
			journal_action: Some(journal_action),
		})
	}

	async fn apply_update_node(&self, command: &Command) -> EngineResult<ApplyResult> {
		let CommandKind::UpdateNode { node_id, name, payload_patch } = &command.kind else {
			unreachable!()
		};
		let mut core = self.storage.core.write().await;
		let tree = get_tree(&core, &command.tree_id)?;
		invariants::assert_not_sentinel(&tree, node_id)?;
		let before_node = core.get_node(node_id).cloned().ok_or_else(|| EngineError::UnknownNode(node_id.to_string()))?;
		let before_entity = core.get_entity_by_node(&before_node.node_type, node_id);

		if let Some(name) = name {
			if let Some(existing) = core.name_conflict(&before_node.parent_id, name) {
				if &existing != node_id {
					return Err(EngineError::NameConflict {
						parent_id: before_node.parent_id.to_string(),
						name: name.clone(),
					});
				}
			}
		}

		let now = now_ms();
		let mut after_node = before_node.clone();
		if let Some(name) = name {
			after_node.name = name.clone();
		}
		after_node.updated_at = now;
		after_node.version += 1;
		core.replace_node(after_node.clone()).map_err(to_engine_storage_err)?;
		drop(core);

		let handler = self.plugins.get_handler(&before_node.node_type)?;
		let after_entity = if !is_null(payload_patch) {
			// A real patch was supplied: merge it through the handler, whether or not an
			// entity already exists for this node.
			let existing_payload = before_entity.as_ref().map(|e| e.payload.clone()).unwrap_or(serde_json::json!({}));
			let merged = handler
				.update_entity(node_id, existing_payload, payload_patch.clone())
				.await
				.map_err(EngineError::InvalidPayload)?;
			let mut entity = before_entity.clone().unwrap_or(Entity {
				id: EntityId::new(),
				node_id: node_id.clone(),
				node_type: before_node.node_type.clone(),
				payload: serde_json::json!({}),
				created_at: now,
				updated_at: now,
				version: 0,
			});
			entity.payload = merged;
			entity.updated_at = now;
			entity.version += 1;
			let mut core = self.storage.core.write().await;
			if before_entity.is_some() {
				core.replace_entity(entity.clone()).map_err(to_engine_storage_err)?;
			} else {
				core.insert_entity(entity.clone()).map_err(to_engine_storage_err)?;
			}
			Some(entity)
		} else if let Some(mut entity) = before_entity.clone() {
			// No patch (e.g. a name-only rename): the entity is untouched except for the
			// lifecycle-coupled version/updatedAt bump every commit gives it.
			entity.updated_at = now;
			entity.version += 1;
			let mut core = self.storage.core.write().await;
			core.replace_entity(entity.clone()).map_err(to_engine_storage_err)?;
			Some(entity)
		} else {
			None
		};

		Ok(ApplyResult {
			affected: vec![node_id.clone()],
			events: vec![change_event(ChangeEventType::Updated, &after_node, None, command)],
			hooks: vec![HookCall::AfterUpdate(before_node.node_type.clone(), node_id.clone())],
			journal_action: Some(JournalAction::Updated {
				before: NodeSnapshot { node: before_node, entity: before_entity },
				after: NodeSnapshot { node: after_node, entity: after_entity },
			}),
		})
	}

	async fn apply_move_nodes(&self, command: &Command) -> EngineResult<ApplyResult> {
		let CommandKind::MoveNodes { node_ids, target_parent_id, on_name_conflict } = &command.kind else {
			unreachable!()
		};
		let mut core = self.storage.core.write().await;
		let tree = get_tree(&core, &command.tree_id)?;
		if core.get_node(target_parent_id).is_none() {
			return Err(EngineError::UnknownNode(target_parent_id.to_string()));
		}

		let mut snapshots = Vec::new();
		let mut events = Vec::new();
		let mut hooks = Vec::new();
		for node_id in node_ids {
			invariants::assert_not_sentinel(&tree, node_id)?;
			check_acyclic(&core, node_id, target_parent_id)?;
			invariants::assert_move_does_not_cross_trash_boundary(&core, &tree, node_id, target_parent_id)?;
			let node = core.get_node(node_id).cloned().ok_or_else(|| EngineError::UnknownNode(node_id.to_string()))?;
			let entity = core.get_entity_by_node(&node.node_type, node_id);

			let resolution = resolve_name_conflict(&core, target_parent_id, &node.name, &node.node_type, *on_name_conflict)?;
			let final_name = match resolution {
				NameResolution::Use(n) => n,
				NameResolution::ReplaceExisting(existing_id) => {
					core.remove_node(&existing_id).ok();
					core.remove_entity_by_node(&node.node_type, &existing_id).ok();
					node.name.clone()
				}
			};

			let mut moved = node.clone();
			let prev_parent = moved.parent_id.clone();
			moved.parent_id = target_parent_id.clone();
			moved.name = final_name;
			moved.updated_at = now_ms();
			moved.version += 1;
			core.replace_node(moved.clone()).map_err(to_engine_storage_err)?;

			snapshots.push((
				NodeSnapshot { node: node.clone(), entity: entity.clone() },
				NodeSnapshot { node: moved.clone(), entity },
			));
			events.push(change_event(ChangeEventType::Moved, &moved, Some(prev_parent.clone()), command));
			hooks.push(HookCall::AfterMove(node.node_type.clone(), node_id.clone(), prev_parent, target_parent_id.clone()));
		}

		Ok(ApplyResult {
			affected: node_ids.clone(),
			events,
			hooks,
			journal_action: Some(JournalAction::Moved(snapshots)),
		})
	}

	async fn apply_duplicate_nodes(&self, command: &Command) -> EngineResult<ApplyResult> {
		let CommandKind::DuplicateNodes { node_ids, target_parent_id } = &command.kind else {
			unreachable!()
		};
		let mut core = self.storage.core.write().await;
		get_tree(&core, &command.tree_id)?;
		let mut created = Vec::new();
		let mut affected = Vec::new();
		let mut events = Vec::new();
		let mut hooks = Vec::new();

		for node_id in node_ids {
			let node = core.get_node(node_id).cloned().ok_or_else(|| EngineError::UnknownNode(node_id.to_string()))?;
			let parent = target_parent_id.clone().unwrap_or(node.parent_id.clone());
			let (root_new, mut subtree_snapshots) = clone_subtree(&mut core, &node, &parent)?;
			affected.push(root_new.id.clone());
			events.push(change_event(ChangeEventType::Created, &root_new, None, command));
			hooks.push(HookCall::AfterCreate(root_new.node_type.clone(), root_new.id.clone()));
			created.append(&mut subtree_snapshots);
		}

		Ok(ApplyResult {
			affected,
			events,
			hooks,
			journal_action: Some(JournalAction::Created(created)),
		})
	}

	async fn apply_paste_nodes(&self, command: &Command) -> EngineResult<ApplyResult> {
		let CommandKind::PasteNodes { source_node_ids, target_parent_id, on_name_conflict } = &command.kind else {
			unreachable!()
		};
		let _ = on_name_conflict;
		let mut core = self.storage.core.write().await;
		get_tree(&core, &command.tree_id)?;
		if core.get_node(target_parent_id).is_none() {
			return Err(EngineError::UnknownNode(target_parent_id.to_string()));
		}
		let mut created = Vec::new();
		let mut affected = Vec::new();
		let mut events = Vec::new();
		let mut hooks = Vec::new();
		for node_id in source_node_ids {
			let node = core.get_node(node_id).cloned().ok_or_else(|| EngineError::UnknownNode(node_id.to_string()))?;
			let (root_new, mut subtree_snapshots) = clone_subtree(&mut core, &node, target_parent_id)?;
			affected.push(root_new.id.clone());
			events.push(change_event(ChangeEventType::Created, &root_new, None, command));
			hooks.push(HookCall::AfterCreate(root_new.node_type.clone(), root_new.id.clone()));
			created.append(&mut subtree_snapshots);
		}

		Ok(ApplyResult {
			affected,
			events,
			hooks,
			journal_action: Some(JournalAction::Created(created)),
		})
	}

	async fn apply_move_to_trash(&self, command: &Command) -> EngineResult<ApplyResult> {
		let CommandKind::MoveToTrash { node_ids } = &command.kind else {
			unreachable!()
		};
		let mut core = self.storage.core.write().await;
		let tree = get_tree(&core, &command.tree_id)?;
		let mut snapshots = Vec::new();
		let mut events = Vec::new();
		let mut hooks = Vec::new();
		for node_id in node_ids {
			invariants::assert_not_sentinel(&tree, node_id)?;
			let node = core.get_node(node_id).cloned().ok_or_else(|| EngineError::UnknownNode(node_id.to_string()))?;
			let entity = core.get_entity_by_node(&node.node_type, node_id);
			let prev_parent = node.parent_id.clone();
			let resolution = resolve_name_conflict(&core, &tree.trash_root_node_id, &node.name, &node.node_type, OnNameConflict::AutoRename)?;
			let final_name = match resolution {
				NameResolution::Use(n) => n,
				NameResolution::ReplaceExisting(_) => node.name.clone(),
			};
			let mut trashed = node.clone();
			trashed.parent_id = tree.trash_root_node_id.clone();
			trashed.name = final_name;
			trashed.removed = true;
			trashed.updated_at = now_ms();
			trashed.version += 1;
			core.replace_node(trashed.clone()).map_err(to_engine_storage_err)?;

			snapshots.push((
				NodeSnapshot { node: node.clone(), entity: entity.clone() },
				NodeSnapshot { node: trashed.clone(), entity },
			));
			events.push(change_event(ChangeEventType::Trashed, &trashed, Some(prev_parent), command));
			hooks.push(HookCall::AfterTrash(node.node_type.clone(), node_id.clone()));
		}
		Ok(ApplyResult {
			affected: node_ids.clone(),
			events,
			hooks,
			journal_action: Some(JournalAction::Trashed(snapshots)),
		})
	}

	async fn apply_recover_from_trash(&self, command: &Command) -> EngineResult<ApplyResult> {
		let CommandKind::RecoverFromTrash { node_ids, target_parent_id } = &command.kind else {
			unreachable!()
		};
		let mut core = self.storage.core.write().await;
		let tree = get_tree(&core, &command.tree_id)?;
		let mut snapshots = Vec::new();
		let mut events = Vec::new();
		let mut hooks = Vec::new();
		for node_id in node_ids {
			let node = core.get_node(node_id).cloned().ok_or_else(|| EngineError::UnknownNode(node_id.to_string()))?;
			let entity = core.get_entity_by_node(&node.node_type, node_id);
			let restore_parent = target_parent_id.clone().unwrap_or_else(|| tree.root_node_id.clone());
			let resolution = resolve_name_conflict(&core, &restore_parent, &node.name, &node.node_type, OnNameConflict::AutoRename)?;
			let final_name = match resolution {
				NameResolution::Use(n) => n,
				NameResolution::ReplaceExisting(_) => node.name.clone(),
			};
			let mut recovered = node.clone();
			recovered.parent_id = restore_parent.clone();
			recovered.name = final_name;
			recovered.removed = false;
			recovered.updated_at = now_ms();
			recovered.version += 1;
			core.replace_node(recovered.clone()).map_err(to_engine_storage_err)?;

			snapshots.push((
				NodeSnapshot { node: node.clone(), entity: entity.clone() },
				NodeSnapshot { node: recovered.clone(), entity },
			));
			events.push(change_event(ChangeEventType::Recovered, &recovered, Some(tree.trash_root_node_id.clone()), command));
			hooks.push(HookCall::AfterRecover(node.node_type.clone(), node_id.clone()));
		}
		Ok(ApplyResult {
			affected: node_ids.clone(),
			events,
			hooks,
			journal_action: Some(JournalAction::Trashed(snapshots)),
		})
	}

	async fn apply_remove_permanent(&self, tree_id: &TreeId, node_ids: &[NodeId]) -> EngineResult<ApplyResult> {
		let mut events = Vec::new();
		let mut hooks = Vec::new();
		for node_id in node_ids {
			let node_type = {
				let core = self.storage.core.read().await;
				let tree = get_tree(&core, tree_id)?;
				invariants::assert_not_sentinel(&tree, node_id)?;
				let node = core.get_node(node_id).ok_or_else(|| EngineError::UnknownNode(node_id.to_string()))?;
				node.node_type.clone()
			};
			let handler = self.plugins.get_handler(&node_type)?;
			handler.delete_entity(node_id).await.map_err(EngineError::InvalidPayload)?;

			let mut core = self.storage.core.write().await;
			let node = core.remove_node(node_id).map_err(to_engine_storage_err)?;
			core.remove_entity_by_node(&node.node_type, node_id).ok();
			drop(core);
			hooks.push(HookCall::BeforeDelete(node.node_type.clone(), node_id.clone()));
			events.push(change_event(ChangeEventType::Removed, &node, None, &dummy_command(tree_id.clone())));
		}
		Ok(ApplyResult {
			affected: node_ids.to_vec(),
			events,
			hooks,
			journal_action: None,
		})
	}

	async fn apply_import_nodes(&self, command: &Command) -> EngineResult<ApplyResult> {
		let CommandKind::ImportNodes { parent_id, nodes } = &command.kind else {
			unreachable!()
		};
		let mut core = self.storage.core.write().await;
		get_tree(&core, &command.tree_id)?;
		if core.get_node(parent_id).is_none() {
			return Err(EngineError::UnknownNode(parent_id.to_string()));
		}
		let mut created = Vec::new();
		let mut affected = Vec::new();
		let mut events = Vec::new();
		let mut hooks = Vec::new();
		for spec in nodes {
			import_one(&mut core, &command.tree_id, parent_id, spec, &mut created, &mut affected, &mut events, &mut hooks, command)?;
		}
		Ok(ApplyResult {
			affected,
			events,
			hooks,
			journal_action: Some(JournalAction::Created(created)),
		})
	}

	async fn apply_commit_working_copy(&self, command: &Command, working_copy_id: &crate::ids::WorkingCopyId) -> EngineResult<ApplyResult> {
		let wc = self.working_copies.get(working_copy_id).await?;
		let node_id = wc.working_copy_of.clone().ok_or_else(|| {
			EngineError::InvalidPayload("working copy is a create-draft; use commitWorkingCopyForCreate".to_string())
		})?;

		let mut core = self.storage.core.write().await;
		let before_node = core.get_node(&node_id).cloned().ok_or_else(|| EngineError::UnknownNode(node_id.to_string()))?;
		let before_entity = core.get_entity_by_node(&before_node.node_type, &node_id);

		let mut after_node = before_node.clone();
		if let Some(name) = &wc.name {
			after_node.name = name.clone();
		}
		after_node.updated_at = now_ms();
		after_node.version += 1;
		core.replace_node(after_node.clone()).map_err(to_engine_storage_err)?;
		drop(core);

		let handler = self.plugins.get_handler(&before_node.node_type)?;
		let final_payload = handler
			.from_working_copy_draft(wc.payload.clone())
			.await
			.map_err(EngineError::InvalidPayload)?;
		let mut entity = before_entity.clone().unwrap_or(Entity {
			id: EntityId::new(),
			node_id: node_id.clone(),
			node_type: before_node.node_type.clone(),
			payload: serde_json::json!({}),
			created_at: now_ms(),
			updated_at: now_ms(),
			version: 0,
		});
		entity.payload = final_payload;
		entity.updated_at = now_ms();
		entity.version += 1;
		{
			let mut core = self.storage.core.write().await;
			if before_entity.is_some() {
				core.replace_entity(entity.clone()).map_err(to_engine_storage_err)?;
			} else {
				core.insert_entity(entity.clone()).map_err(to_engine_storage_err)?;
			}
		}
		self.working_copies.discard(working_copy_id).await.ok();

		Ok(ApplyResult {
			affected: vec![node_id.clone()],
			events: vec![change_event(ChangeEventType::Updated, &after_node, None, command)],
			hooks: vec![HookCall::AfterUpdate(before_node.node_type.clone(), node_id)],
			journal_action: Some(JournalAction::Updated {
				before: NodeSnapshot { node: before_node, entity: before_entity },
				after: NodeSnapshot { node: after_node, entity: Some(entity) },
			}),
		})
	}

	async fn apply_commit_working_copy_for_create(
		&self,
		command: &Command,
		working_copy_id: &crate::ids::WorkingCopyId,
	) -> EngineResult<ApplyResult> {
		let wc = self.working_copies.get(working_copy_id).await?;
		let parent_id = wc
			.parent_node_id
			.clone()
			.ok_or_else(|| EngineError::InvalidPayload("create-draft working copy missing parentNodeId".to_string()))?;
		let name = wc
			.name
			.clone()
			.ok_or_else(|| EngineError::InvalidPayload("create-draft working copy missing name".to_string()))?;

		let handler = self.plugins.get_handler(&wc.node_type)?;
		let draft_payload = handler
			.from_working_copy_draft(wc.payload.clone())
			.await
			.map_err(EngineError::InvalidPayload)?;
		handler.validate(&draft_payload).map_err(EngineError::InvalidPayload)?;

		let create_command = Command {
			command_id: command.command_id.clone(),
			group_id: command.group_id.clone(),
			tree_id: command.tree_id.clone(),
			kind: CommandKind::CreateNode {
				parent_id,
				node_type: wc.node_type.clone(),
				name,
				initial_payload: draft_payload,
				on_name_conflict: OnNameConflict::AutoRename,
			},
			issued_at: command.issued_at,
			source_view_id: command.source_view_id.clone(),
		};
		let result = self.apply_create_node(&create_command).await?;
		self.working_copies.discard(working_copy_id).await.ok();
		Ok(result)
	}
}

enum Direction {
	Undo,
	Redo,
}

fn apply_inverse(core: &mut CoreDb, action: &JournalAction, direction: Direction) -> EngineResult<Vec<NodeId>> {
	match (action, direction) {
		(JournalAction::Created(snapshots), Direction::Undo) => {
			let mut ids = Vec::new();
			for snap in snapshots {
				ids.push(snap.node.id.clone());
				core.remove_node(&snap.node.id).ok();
				core.remove_entity_by_node(&snap.node.node_type, &snap.node.id).ok();
			}
			Ok(ids)
		}
		(JournalAction::Created(snapshots), Direction::Redo) => {
			let mut ids = Vec::new();
			for snap in snapshots {
				ids.push(snap.node.id.clone());
				core.insert_node(snap.node.clone()).map_err(to_engine_storage_err)?;
				if let Some(entity) = &snap.entity {
					core.insert_entity(entity.clone()).map_err(to_engine_storage_err)?;
				}
			}
			Ok(ids)
		}
		(JournalAction::Updated { before, .. }, Direction::Undo) => {
			core.replace_node(before.node.clone()).map_err(to_engine_storage_err)?;
			if let Some(entity) = &before.entity {
				core.replace_entity(entity.clone()).or_else(|_| core.insert_entity(entity.clone())).map_err(to_engine_storage_err)?;
			}
			Ok(vec![before.node.id.clone()])
		}
		(JournalAction::Updated { after, .. }, Direction::Redo) => {
			core.replace_node(after.node.clone()).map_err(to_engine_storage_err)?;
			if let Some(entity) = &after.entity {
				core.replace_entity(entity.clone()).or_else(|_| core.insert_entity(entity.clone())).map_err(to_engine_storage_err)?;
			}
			Ok(vec![after.node.id.clone()])
		}
		(JournalAction::Moved(pairs), Direction::Undo) | (JournalAction::Trashed(pairs), Direction::Undo) => {
			let mut ids = Vec::new();
			for (before, _) in pairs {
				core.replace_node(before.node.clone()).map_err(to_engine_storage_err)?;
				if let Some(entity) = &before.entity {
					core.replace_entity(entity.clone()).or_else(|_| core.insert_entity(entity.clone())).map_err(to_engine_storage_err)?;
				}
				ids.push(before.node.id.clone());
			}
			Ok(ids)
		}
		(JournalAction::Moved(pairs), Direction::Redo) | (JournalAction::Trashed(pairs), Direction::Redo) => {
			let mut ids = Vec::new();
			for (_, after) in pairs {
				core.replace_node(after.node.clone()).map_err(to_engine_storage_err)?;
				if let Some(entity) = &after.entity {
					core.replace_entity(entity.clone()).or_else(|_| core.insert_entity(entity.clone())).map_err(to_engine_storage_err)?;
				}
				ids.push(after.node.id.clone());
			}
			Ok(ids)
		}
		(JournalAction::Replaced { removed, created }, Direction::Undo) => {
			core.remove_node(&created.node.id).ok();
			core.remove_entity_by_node(&created.node.node_type, &created.node.id).ok();
			core.insert_node(removed.node.clone()).map_err(to_engine_storage_err)?;
			if let Some(entity) = &removed.entity {
				core.insert_entity(entity.clone()).map_err(to_engine_storage_err)?;
			}
			Ok(vec![removed.node.id.clone(), created.node.id.clone()])
		}
		(JournalAction::Replaced { removed, created }, Direction::Redo) => {
			core.remove_node(&removed.node.id).ok();
			core.remove_entity_by_node(&removed.node.node_type, &removed.node.id).ok();
			core.insert_node(created.node.clone()).map_err(to_engine_storage_err)?;
			if let Some(entity) = &created.entity {
				core.insert_entity(entity.clone()).map_err(to_engine_storage_err)?;
			}
			Ok(vec![removed.node.id.clone(), created.node.id.clone()])
		}
	}
}

fn clone_subtree(core: &mut CoreDb, root: &TreeNode, new_parent: &NodeId) -> EngineResult<(TreeNode, Vec<NodeSnapshot>)> {
	let resolution = resolve_name_conflict(core, new_parent, &root.name, &root.node_type, OnNameConflict::AutoRename)?;
	let final_name = match resolution {
		NameResolution::Use(n) => n,
		NameResolution::ReplaceExisting(_) => root.name.clone(),
	};
	let now = now_ms();
	let new_id = NodeId::new();
	let new_node = TreeNode {
		id: new_id.clone(),
		tree_id: root.tree_id.clone(),
		parent_id: new_parent.clone(),
		name: final_name,
		node_type: root.node_type.clone(),
		created_at: now,
		updated_at: now,
		version: 1,
		removed: false,
	};
	core.insert_node(new_node.clone()).map_err(to_engine_storage_err)?;

	let entity = core.get_entity_by_node(&root.node_type, &root.id).map(|e| {
		let mut cloned = e;
		cloned.id = EntityId::new();
		cloned.node_id = new_id.clone();
		cloned.created_at = now;
		cloned.updated_at = now;
		cloned.version = 1;
		cloned
	});
	if let Some(entity) = &entity {
		core.insert_entity(entity.clone()).map_err(to_engine_storage_err)?;
	}

	let mut snapshots = vec![NodeSnapshot { node: new_node.clone(), entity }];
	for child in core.children_of(&root.id) {
		if child.removed {
			continue;
		}
		let (_, mut child_snapshots) = clone_subtree(core, &child, &new_id)?;
		snapshots.append(&mut child_snapshots);
	}
	Ok((new_node, snapshots))
}

#[allow(clippy::too_many_arguments)]
fn import_one(
	core: &mut CoreDb,
	tree_id: &TreeId,
	parent_id: &NodeId,
	spec: &ImportNodeSpec,
	created: &mut Vec<NodeSnapshot>,
	affected: &mut Vec<NodeId>,
	events: &mut Vec<ChangeEvent>,
	hooks: &mut Vec<HookCall>,
	command: &Command,
) -> EngineResult<()> {
	let resolution = resolve_name_conflict(core, parent_id, &spec.name, &spec.node_type, OnNameConflict::AutoRename)?;
	let final_name = match resolution {
		NameResolution::Use(n) => n,
		NameResolution::ReplaceExisting(_) => spec.name.clone(),
	};
	let now = now_ms();
	let node_id = NodeId::new();
	let node = TreeNode {
		id: node_id.clone(),
		tree_id: tree_id.clone(),
		parent_id: parent_id.clone(),
		name: final_name,
		node_type: spec.node_type.clone(),
		created_at: now,
		updated_at: now,
		version: 1,
		removed: false,
	};
	core.insert_node(node.clone()).map_err(to_engine_storage_err)?;
	let entity = Entity {
		id: EntityId::new(),
		node_id: node_id.clone(),
		node_type: spec.node_type.clone(),
		payload: spec.payload.clone(),
		created_at: now,
		updated_at: now,
		version: 1,
	};
	core.insert_entity(entity.clone()).map_err(to_engine_storage_err)?;

	affected.push(node_id.clone());
	events.push(change_event(ChangeEventType::Created, &node, None, command));
	hooks.push(HookCall::AfterCreate(spec.node_type.clone(), node_id.clone()));
	created.push(NodeSnapshot { node, entity: Some(entity) });

	for child in &spec.children {
		import_one(core, tree_id, &node_id, child, created, affected, events, hooks, command)?;
	}
	Ok(())
}

fn get_tree(core: &CoreDb, tree_id: &TreeId) -> EngineResult<Tree> {
	core.get_tree(tree_id).cloned().ok_or_else(|| EngineError::UnknownTree(tree_id.to_string()))
}

fn change_event(event_type: ChangeEventType, node: &TreeNode, prev_parent_id: Option<NodeId>, command: &Command) -> ChangeEvent {
	ChangeEvent {
		event_type,
		node_id: node.id.clone(),
		tree_id: node.tree_id.clone(),
		prev_parent_id,
		new_parent_id: Some(node.parent_id.clone()),
		at: now_ms(),
		version: node.version,
		cause: EventCause {
			command_id: command.command_id.clone(),
			group_id: command.group_id.clone(),
		},
	}
}

fn dummy_command(tree_id: TreeId) -> Command {
	Command::new(tree_id, CommandKind::RemovePermanent { node_ids: vec![] })
}

fn is_null(v: &serde_json::Value) -> bool {
	matches!(v, serde_json::Value::Null) || matches!(v, serde_json::Value::Object(m) if m.is_empty())
}

fn to_engine_storage_err(e: crate::storage::core_db::CoreDbError) -> EngineError {
	use crate::storage::core_db::CoreDbError;
	match e {
		CoreDbError::Unavailable(m) => EngineError::StorageUnavailable(m),
		CoreDbError::QuotaExceeded(m) => EngineError::QuotaExceeded(m),
		CoreDbError::SchemaMismatch { store, stored, code } => EngineError::SchemaMismatch { store, stored, code },
		CoreDbError::DuplicateTree(id) => EngineError::InvalidPayload(format!("duplicate tree: {id}")),
		CoreDbError::DuplicateNode(id) => EngineError::InvalidPayload(format!("duplicate node: {id}")),
		CoreDbError::NodeNotFound(id) => EngineError::UnknownNode(id),
		CoreDbError::EntityNotFound(id) => EngineError::UnknownEntity(id),
		CoreDbError::NameConflict { parent_id, name } => EngineError::NameConflict { parent_id, name },
	}
}
