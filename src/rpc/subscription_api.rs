//! `SubscriptionApi` — node/subtree/tree observation (spec §4.6, §6).
//!
//! The RPC boundary only ever exposes a `SubscriptionId`; the matching `Delivery` receiver
//! is handed to the transport layer (out of scope) via [`SubscriptionApi::take_receiver`]
//! rather than crossing the structured-clone boundary itself, since channels aren't
//! serializable — only typed ids cross that boundary.

use crate::error::{EngineError, EngineResult};
use crate::ids::{NodeId, SubscriptionId, Timestamp, TreeId};
use crate::subscription::{ChangeEvent, Delivery, SubscriptionFabric, SubscriptionStats};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct SubscriptionApi {
	fabric: Arc<SubscriptionFabric>,
	receivers: Arc<parking_lot::Mutex<HashMap<SubscriptionId, mpsc::Receiver<Delivery>>>>,
}

impl SubscriptionApi {
	pub fn new(fabric: Arc<SubscriptionFabric>) -> Self {
		Self {
			fabric,
			receivers: Arc::new(parking_lot::Mutex::new(HashMap::new())),
		}
	}

	pub fn subscribe_node(&self, node_id: NodeId) -> SubscriptionId {
		let (id, rx) = self.fabric.subscribe_node(node_id);
		self.receivers.lock().insert(id.clone(), rx);
		id
	}

	pub fn subscribe_subtree(
		&self,
		root_id: NodeId,
		depth: Option<usize>,
		include_types: Option<Vec<String>>,
		exclude_types: Option<Vec<String>>,
	) -> SubscriptionId {
		let (id, rx) = self.fabric.subscribe_subtree(root_id, depth, include_types, exclude_types);
		self.receivers.lock().insert(id.clone(), rx);
		id
	}

	pub fn subscribe_tree(&self, tree_id: TreeId) -> SubscriptionId {
		let (id, rx) = self.fabric.subscribe_tree(tree_id);
		self.receivers.lock().insert(id.clone(), rx);
		id
	}

	/// Hand the transport layer (or a test) the receiving half for a subscription. Can only
	/// be taken once per subscription.
	pub fn take_receiver(&self, id: &SubscriptionId) -> EngineResult<mpsc::Receiver<Delivery>> {
		self.receivers
			.lock()
			.remove(id)
			.ok_or_else(|| EngineError::UnknownSubscription(id.to_string()))
	}

	pub fn unsubscribe(&self, id: &SubscriptionId) -> EngineResult<()> {
		self.receivers.lock().remove(id);
		self.fabric.unsubscribe(id)
	}

	pub fn unsubscribe_node(&self, node_id: &NodeId) {
		self.fabric.unsubscribe_node(node_id);
	}

	pub fn unsubscribe_tree(&self, tree_id: &TreeId) {
		self.fabric.unsubscribe_tree(tree_id);
	}

	pub fn unsubscribe_all(&self) {
		self.receivers.lock().clear();
		self.fabric.unsubscribe_all();
	}

	pub fn get_recent_events(&self, node_id: &NodeId, limit: usize) -> Vec<ChangeEvent> {
		self.fabric.get_recent_events(node_id, limit)
	}

	pub fn get_event_history(&self, start: Timestamp, end: Timestamp, node_id: Option<&NodeId>) -> Vec<ChangeEvent> {
		self.fabric.get_event_history(start, end, node_id)
	}

	pub fn get_subscription_stats(&self) -> SubscriptionStats {
		self.fabric.get_subscription_stats()
	}
}
