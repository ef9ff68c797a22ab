//! `ApiDispatcher`: JSON-in/JSON-out entry point over the five sub-APIs (spec §4.8, §6).
//!
//! Every call is wrapped in the implicit per-call timeout (default 30s, spec §4.8): on
//! timeout the caller gets `RpcTimeout` back, but the underlying work is **not** canceled —
//! it keeps running to completion in its spawned task, matching "without cancellation".
//! `initialize`/`shutdown`/`getSystemHealth` are lifecycle calls handled directly on
//! [`crate::engine::Engine`] rather than through this dispatcher, since they don't fit the
//! steady-state sub-API shape (shutdown consumes the engine; health needs no command/query
//! typing). `getExtension` is likewise only available through the typed in-process API: it
//! hands back a live `Arc<dyn EntityHandler>`, which has no JSON representation.

use crate::command::{Command, CommandOutcome};
use crate::engine::Engine;
use crate::error::{EngineError, EngineResult, ErrorPayload};
use serde::Serialize;
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;

use super::{MutationApi, PluginApi, QueryApi, SubscriptionApi, WorkingCopyApi};

#[derive(Clone)]
pub struct ApiDispatcher {
	query: QueryApi,
	mutation: MutationApi,
	subscription: SubscriptionApi,
	working_copy: WorkingCopyApi,
	plugin: PluginApi,
	rpc_timeout_ms: u64,
}

impl ApiDispatcher {
	pub fn new(engine: &Engine) -> Self {
		Self {
			query: engine.query.clone(),
			mutation: engine.mutation.clone(),
			subscription: engine.subscription.clone(),
			working_copy: engine.working_copy.clone(),
			plugin: engine.plugin.clone(),
			rpc_timeout_ms: engine.rpc_timeout_ms(),
		}
	}

	/// Structured-clone boundary: every argument and result is `serde_json::Value`.
	pub async fn dispatch_json(&self, method: &str, params: Value) -> Value {
		let result = self.route(method, params).await;
		match result {
			Ok(data) => data,
			Err(e) => err_envelope(e),
		}
	}

	async fn route(&self, method: &str, params: Value) -> Result<Value, Value> {
		match method {
			// --- Query sub-API ---
			"getNode" => self.call(field(&params, "nodeId")?, |id| {
				let q = self.query.clone();
				async move { q.get_node(&id).await }
			}).await,
			"getChildren" => {
				let parent_id = field(&params, "parentId")?;
				let options = params.get("options").cloned().unwrap_or(Value::Null);
				let options = from_value_or(options)?;
				self.call((parent_id, options), |(id, opts)| {
					let q = self.query.clone();
					async move { q.get_children(&id, &opts).await }
				})
				.await
			}
			"getDescendants" => {
				let root_id = field(&params, "rootId")?;
				let options = from_value_or(params.get("options").cloned().unwrap_or(Value::Null))?;
				self.call((root_id, options), |(id, opts)| {
					let q = self.query.clone();
					async move { q.get_descendants(&id, &opts).await }
				})
				.await
			}
			"getAncestors" => self.call(field(&params, "nodeId")?, |id| {
				let q = self.query.clone();
				async move { q.get_ancestors(&id).await }
			}).await,
			"getEntity" => self.call(field(&params, "nodeId")?, |id| {
				let q = self.query.clone();
				async move { q.get_entity(&id).await }
			}).await,
			"searchNodes" => {
				let query = parse(params)?;
				self.call(query, |q_arg| {
					let q = self.query.clone();
					async move { q.search_nodes(&q_arg).await }
				})
				.await
			}
			"getTree" => self.call(field(&params, "treeId")?, |id| {
				let q = self.query.clone();
				async move { q.get_tree(&id).await }
			}).await,
			"listTrees" => {
				let q = self.query.clone();
				Ok(to_value(q.list_trees().await))
			}

			// --- Mutation sub-API ---
			"commitCommand" => {
				let command: Command = parse(params)?;
				let m = self.mutation.clone();
				self.call_command(async move { m.commit_command(command).await }).await
			}
			"undo" => self.call(field(&params, "treeId")?, |id| {
				let m = self.mutation.clone();
				async move { m.undo(&id).await }
			}).await,
			"redo" => self.call(field(&params, "treeId")?, |id| {
				let m = self.mutation.clone();
				async move { m.redo(&id).await }
			}).await,
			// Backward-compat shortcuts onto the typed mutation methods above (spec §6).
			"create" => {
				let tree_id = field(&params, "treeId")?;
				let parent_id = field(&params, "parentId")?;
				let node_type = field(&params, "nodeType")?;
				let name = field(&params, "name")?;
				let initial_payload = params.get("initialPayload").cloned().unwrap_or(Value::Null);
				let m = self.mutation.clone();
				self.call_command(async move { m.create(tree_id, parent_id, node_type, name, initial_payload).await }).await
			}
			"recoverFromTrash" => {
				let tree_id = field(&params, "treeId")?;
				let node_ids = field(&params, "nodeIds")?;
				let m = self.mutation.clone();
				self.call_command(async move { m.recover_from_trash(tree_id, node_ids).await }).await
			}
			"removeNodes" => {
				let tree_id = field(&params, "treeId")?;
				let node_ids = field(&params, "nodeIds")?;
				let m = self.mutation.clone();
				self.call_command(async move { m.remove_nodes(tree_id, node_ids).await }).await
			}

			// --- Subscription sub-API (synchronous; no timeout needed) ---
			"subscribeNode" => {
				let node_id = field(&params, "nodeId")?;
				Ok(to_value(self.subscription.subscribe_node(node_id)))
			}
			"subscribeSubtree" => {
				let root_id = field(&params, "rootId")?;
				let depth = params.get("depth").and_then(|v| serde_json::from_value(v.clone()).ok());
				let include_types = params.get("includeTypes").and_then(|v| serde_json::from_value(v.clone()).ok());
				let exclude_types = params.get("excludeTypes").and_then(|v| serde_json::from_value(v.clone()).ok());
				Ok(to_value(self.subscription.subscribe_subtree(root_id, depth, include_types, exclude_types)))
			}
			"subscribeTree" => {
				let tree_id = field(&params, "treeId")?;
				Ok(to_value(self.subscription.subscribe_tree(tree_id)))
			}
			"unsubscribe" => {
				let id = field(&params, "subscriptionId")?;
				self.subscription.unsubscribe(&id).map_err(err_envelope)?;
				Ok(Value::Null)
			}
			"unsubscribeNode" => {
				let node_id = field(&params, "nodeId")?;
				self.subscription.unsubscribe_node(&node_id);
				Ok(Value::Null)
			}
			"unsubscribeTree" => {
				let tree_id = field(&params, "treeId")?;
				self.subscription.unsubscribe_tree(&tree_id);
				Ok(Value::Null)
			}
			"unsubscribeAll" => {
				self.subscription.unsubscribe_all();
				Ok(Value::Null)
			}
			"getRecentEvents" => {
				let node_id = field(&params, "nodeId")?;
				let limit = params.get("limit").and_then(Value::as_u64).unwrap_or(100) as usize;
				Ok(to_value(self.subscription.get_recent_events(&node_id, limit)))
			}
			"getEventHistory" => {
				let start = field(&params, "start")?;
				let end = field(&params, "end")?;
				let node_id: Option<crate::ids::NodeId> = params.get("nodeId").and_then(|v| serde_json::from_value(v.clone()).ok());
				Ok(to_value(self.subscription.get_event_history(start, end, node_id.as_ref())))
			}
			"getSubscriptionStats" => Ok(to_value(self.subscription.get_subscription_stats())),

			// --- Working-copy sub-API ---
			"createWorkingCopy" => {
				let node_id: crate::ids::NodeId = field(&params, "nodeId")?;
				let node_type: String = field(&params, "nodeType")?;
				let payload = params.get("currentPayload").cloned().unwrap_or(Value::Null);
				let session_id: String = field(&params, "sessionId")?;
				let force = params.get("force").and_then(Value::as_bool).unwrap_or(false);
				self.call((), |_| {
					let wc = self.working_copy.clone();
					async move { wc.create_working_copy(node_id, node_type, payload, session_id, force).await }
				})
				.await
			}
			"createDraftWorkingCopy" => {
				let parent_node_id: crate::ids::NodeId = field(&params, "parentNodeId")?;
				let node_type: String = field(&params, "nodeType")?;
				let session_id: String = field(&params, "sessionId")?;
				self.call((), |_| {
					let wc = self.working_copy.clone();
					async move { wc.create_draft_working_copy(parent_node_id, node_type, session_id).await }
				})
				.await
			}
			"getWorkingCopy" => self.call(field(&params, "workingCopyId")?, |id| {
				let wc = self.working_copy.clone();
				async move { wc.get(&id).await }
			}).await,
			"updateWorkingCopy" => {
				let working_copy_id: crate::ids::WorkingCopyId = field(&params, "workingCopyId")?;
				let name: Option<String> = params.get("name").and_then(|v| serde_json::from_value(v.clone()).ok());
				let payload_patch = params.get("payloadPatch").cloned().unwrap_or(Value::Null);
				self.call((), |_| {
					let wc = self.working_copy.clone();
					async move { wc.update(&working_copy_id, name, payload_patch).await }
				})
				.await
			}
			"discardWorkingCopy" => self.call(field(&params, "workingCopyId")?, |id| {
				let wc = self.working_copy.clone();
				async move { wc.discard(&id).await }
			}).await,

			// --- Plugin sub-API ---
			"getPluginsForTree" => {
				let tree_id: Option<crate::ids::TreeId> = params.get("treeId").and_then(|v| serde_json::from_value(v.clone()).ok());
				Ok(to_value(self.plugin.get_plugins_for_tree(tree_id.as_ref())))
			}
			"registeredTypes" => Ok(to_value(self.plugin.registered_types())),

			other => Err(err_envelope(EngineError::InvalidPayload(format!("unknown RPC method '{other}'")))),
		}
	}

	/// Like [`ApiDispatcher::call`], but for the mutation routes that hand back a
	/// `CommandOutcome`: a hook failure after a committed write surfaces as `PartialFailure`
	/// (spec §4.3, §7) even though the storage write and event already happened.
	async fn call_command<Fut>(&self, fut: Fut) -> Result<Value, Value>
	where
		Fut: Future<Output = EngineResult<CommandOutcome>> + Send + 'static,
	{
		let handle = tokio::spawn(fut);
		match tokio::time::timeout(Duration::from_millis(self.rpc_timeout_ms), handle).await {
			Ok(Ok(Ok(outcome))) => match outcome.hook_error.clone() {
				Some(inner) => Err(err_envelope(EngineError::PartialFailure { inner })),
				None => Ok(to_value(outcome)),
			},
			Ok(Ok(Err(e))) => Err(err_envelope(e)),
			Ok(Err(_join_error)) => Err(err_envelope(EngineError::TransactionAborted("handler task panicked".to_string()))),
			Err(_elapsed) => Err(err_envelope(EngineError::RpcTimeout)),
		}
	}

	/// Runs `f(arg)` to completion on a spawned task, racing it against the implicit timeout.
	/// On timeout the spawned task is left running (non-canceling, spec §4.8) and the caller
	/// gets back `RpcTimeout`.
	async fn call<Arg, T, F, Fut>(&self, arg: Arg, f: F) -> Result<Value, Value>
	where
		Arg: Send + 'static,
		T: Serialize + Send + 'static,
		F: FnOnce(Arg) -> Fut,
		Fut: Future<Output = EngineResult<T>> + Send + 'static,
	{
		let handle = tokio::spawn(f(arg));
		match tokio::time::timeout(Duration::from_millis(self.rpc_timeout_ms), handle).await {
			Ok(Ok(Ok(value))) => Ok(to_value(value)),
			Ok(Ok(Err(e))) => Err(err_envelope(e)),
			Ok(Err(_join_error)) => Err(err_envelope(EngineError::TransactionAborted("handler task panicked".to_string()))),
			Err(_elapsed) => Err(err_envelope(EngineError::RpcTimeout)),
		}
	}
}

fn to_value<T: Serialize>(value: T) -> Value {
	json!({ "success": true, "data": serde_json::to_value(value).unwrap_or(Value::Null) })
}

fn err_envelope(e: EngineError) -> Value {
	json!({ "success": false, "error": ErrorPayload::from(&e) })
}

fn field<T: serde::de::DeserializeOwned>(params: &Value, field_name: &str) -> Result<T, Value> {
	params
		.get(field_name)
		.cloned()
		.ok_or_else(|| err_envelope(EngineError::InvalidPayload(format!("missing field '{field_name}'"))))
		.and_then(|v| serde_json::from_value(v).map_err(|e| err_envelope(EngineError::InvalidPayload(e.to_string()))))
}

fn from_value_or<T: serde::de::DeserializeOwned + Default>(value: Value) -> Result<T, Value> {
	if value.is_null() {
		return Ok(T::default());
	}
	serde_json::from_value(value).map_err(|e| err_envelope(EngineError::InvalidPayload(e.to_string())))
}

fn parse<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, Value> {
	serde_json::from_value(value).map_err(|e| err_envelope(EngineError::InvalidPayload(e.to_string())))
}
