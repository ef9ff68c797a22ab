//! Subscription fan-out fabric (spec §4.6).
//!
//! One commit fans out to every matching subscription. Each subscription owns an internal
//! ordered queue plus a single forwarding task that drains it one event at a time — `emit`
//! only ever pushes onto that queue (never spawns a delivery task per event), so events
//! reach a subscriber in the order `emit` observed them, not in whatever order the runtime
//! happens to schedule a batch of detached tasks.

use super::event::{ChangeEvent, ChangeEventType, Delivery, SubscriptionScope};
use super::ring_buffer::EventRingBuffer;
use crate::config::SubscriptionConfig;
use crate::error::{EngineError, EngineResult};
use crate::ids::{now_ms, NodeId, SubscriptionId, Timestamp, TreeId};
use crate::storage::Storage;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::time::Instant as TokioInstant;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

struct SubscriptionState {
	scope: SubscriptionScope,
	sender: mpsc::Sender<Delivery>,
	/// Ordered inbox the forwarding task drains; `emit` only ever pushes here.
	internal_tx: mpsc::UnboundedSender<ChangeEvent>,
	resync_pending: AtomicBool,
	last_delivered_at: AtomicI64,
	delivered_count: AtomicU64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SubscriptionStats {
	pub active_subscriptions: usize,
	pub node_scoped: usize,
	pub subtree_scoped: usize,
	pub tree_scoped: usize,
	pub events_processed_last_24h: u64,
	pub ring_buffer_len: usize,
}

pub struct SubscriptionFabric {
	storage: Storage,
	config: SubscriptionConfig,
	subscriptions: parking_lot::RwLock<HashMap<SubscriptionId, Arc<SubscriptionState>>>,
	ring: parking_lot::Mutex<EventRingBuffer>,
	processed_at: parking_lot::Mutex<VecDeque<Timestamp>>,
}

impl SubscriptionFabric {
	pub fn new(storage: Storage, config: SubscriptionConfig) -> Self {
		let ring = EventRingBuffer::new(config.event_ring_buffer_size);
		Self {
			storage,
			config,
			subscriptions: parking_lot::RwLock::new(HashMap::new()),
			ring: parking_lot::Mutex::new(ring),
			processed_at: parking_lot::Mutex::new(VecDeque::new()),
		}
	}

	fn subscribe(&self, scope: SubscriptionScope) -> (SubscriptionId, mpsc::Receiver<Delivery>) {
		let (tx, rx) = mpsc::channel(self.config.queue_high_water_mark.max(1));
		let (itx, irx) = mpsc::unbounded_channel();
		let id = SubscriptionId::new();
		let state = Arc::new(SubscriptionState {
			scope: scope.clone(),
			sender: tx.clone(),
			internal_tx: itx,
			resync_pending: AtomicBool::new(false),
			last_delivered_at: AtomicI64::new(0),
			delivered_count: AtomicU64::new(0),
		});
		self.subscriptions.write().insert(id.clone(), state.clone());
		// The forwarding task holds only a `Weak` ref: once `unsubscribe` drops the map's
		// strong ref (and with it `internal_tx`), `irx` closes and the task exits instead of
		// keeping the subscription alive forever.
		let weak = Arc::downgrade(&state);
		tokio::spawn(Self::forward_loop(weak, irx, self.config.debounce_ms));
		// Synthetic `initial` event sent immediately on subscribe (spec §4.6).
		let _ = tx.try_send(Delivery::Initial {
			subscription_id: id.clone(),
		});
		(id, rx)
	}

	pub fn subscribe_node(&self, node_id: NodeId) -> (SubscriptionId, mpsc::Receiver<Delivery>) {
		self.subscribe(SubscriptionScope::Node { root_id: node_id })
	}

	pub fn subscribe_subtree(
		&self,
		root_id: NodeId,
		depth: Option<usize>,
		include_types: Option<Vec<String>>,
		exclude_types: Option<Vec<String>>,
	) -> (SubscriptionId, mpsc::Receiver<Delivery>) {
		self.subscribe(SubscriptionScope::Subtree {
			root_id,
			depth,
			include_types,
			exclude_types,
		})
	}

	pub fn subscribe_tree(&self, tree_id: TreeId) -> (SubscriptionId, mpsc::Receiver<Delivery>) {
		self.subscribe(SubscriptionScope::Tree { root_id: tree_id })
	}

	pub fn unsubscribe(&self, id: &SubscriptionId) -> EngineResult<()> {
		self.subscriptions
			.write()
			.remove(id)
			.map(|_| ())
			.ok_or_else(|| EngineError::UnknownSubscription(id.to_string()))
	}

	pub fn unsubscribe_node(&self, node_id: &NodeId) {
		self.subscriptions.write().retain(|_, s| match &s.scope {
			SubscriptionScope::Node { root_id } => root_id != node_id,
			SubscriptionScope::Subtree { root_id, .. } => root_id != node_id,
			SubscriptionScope::Tree { .. } => true,
		});
	}

	pub fn unsubscribe_tree(&self, tree_id: &TreeId) {
		self.subscriptions.write().retain(|_, s| match &s.scope {
			SubscriptionScope::Tree { root_id } => root_id != tree_id,
			_ => true,
		});
	}

	pub fn unsubscribe_all(&self) {
		self.subscriptions.write().clear();
	}

	/// Matching scope check. `Subtree`/`Node` scopes require walking the node's ancestor
	/// chain, since a `ChangeEvent` only carries the changed node's own id.
	async fn matches(&self, state: &SubscriptionState, event: &ChangeEvent) -> bool {
		match &state.scope {
			SubscriptionScope::Node { root_id } => &event.node_id == root_id,
			SubscriptionScope::Tree { root_id } => &event.tree_id == root_id,
			SubscriptionScope::Subtree {
				root_id,
				depth,
				include_types,
				exclude_types,
			} => {
				let core = self.storage.core.read().await;
				let Some(node) = core.get_node(&event.node_id) else {
					return false;
				};
				if let Some(types) = include_types {
					if !types.iter().any(|t| t == &node.node_type) {
						return false;
					}
				}
				if let Some(types) = exclude_types {
					if types.iter().any(|t| t == &node.node_type) {
						return false;
					}
				}
				let mut current = event.node_id.clone();
				let mut hops = 0usize;
				let bound = depth.unwrap_or(usize::MAX);
				loop {
					if &current == root_id {
						return true;
					}
					if hops >= bound {
						return false;
					}
					let Some(n) = core.get_node(&current) else {
						return false;
					};
					if n.parent_id == current {
						return false;
					}
					current = n.parent_id.clone();
					hops += 1;
				}
			}
		}
	}

	/// Dispatch a committed change to every matching subscription, in the order `emit` is
	/// called in — which is also commit order, since the pipeline drives every commit
	/// through a single serialized dispatch loop. Pushing onto a subscription's internal
	/// queue is a synchronous, unbounded send, so `emit` itself never blocks on a slow
	/// subscriber; only that subscription's own forwarding task waits on its debounce timer
	/// or its outward channel.
	pub async fn emit(&self, event: ChangeEvent) {
		self.ring.lock().push(event.clone());
		{
			let mut processed = self.processed_at.lock();
			processed.push_back(event.at);
			let cutoff = now_ms() - DAY_MS;
			while matches!(processed.front(), Some(t) if *t < cutoff) {
				processed.pop_front();
			}
		}

		let snapshot: Vec<Arc<SubscriptionState>> = self.subscriptions.read().values().cloned().collect();
		for state in snapshot {
			if !self.matches(&state, &event).await {
				continue;
			}
			let _ = state.internal_tx.send(event.clone());
		}
	}

	/// One per subscription, for its whole lifetime: drains `rx` in order, coalescing
	/// `updated` events per node over the debounce window and forwarding everything else
	/// (and any pending coalesced update for the same node, to preserve relative order)
	/// immediately. Holding only a `Weak` ref to `state` means the task exits on its own
	/// once `unsubscribe` drops the subscription rather than keeping it alive forever.
	async fn forward_loop(state: Weak<SubscriptionState>, mut rx: mpsc::UnboundedReceiver<ChangeEvent>, debounce_ms: u64) {
		let debounce = std::time::Duration::from_millis(debounce_ms);
		let mut pending: HashMap<NodeId, (ChangeEvent, TokioInstant)> = HashMap::new();
		loop {
			let next_deadline = pending.values().map(|(_, at)| *at).min();
			tokio::select! {
				maybe_event = rx.recv() => {
					let Some(event) = maybe_event else { break };
					if event.event_type == ChangeEventType::Updated {
						pending.insert(event.node_id.clone(), (event, TokioInstant::now() + debounce));
					} else {
						if let Some((superseded, _)) = pending.remove(&event.node_id) {
							Self::deliver_now(&state, superseded, true).await;
						}
						Self::deliver_now(&state, event, false).await;
					}
				}
				_ = Self::sleep_until_or_forever(next_deadline) => {
					let now = TokioInstant::now();
					let ready: Vec<NodeId> = pending
						.iter()
						.filter(|(_, (_, at))| *at <= now)
						.map(|(node_id, _)| node_id.clone())
						.collect();
					for node_id in ready {
						if let Some((event, _)) = pending.remove(&node_id) {
							Self::deliver_now(&state, event, true).await;
						}
					}
				}
			}
			if state.upgrade().is_none() {
				break;
			}
		}
	}

	async fn sleep_until_or_forever(deadline: Option<TokioInstant>) {
		match deadline {
			Some(d) => tokio::time::sleep_until(d).await,
			None => std::future::pending::<()>().await,
		}
	}

	/// `coalesced` events use `try_send` and fall back to a single `resyncHint` under back
	/// pressure (they're expendable — the client just refetches); other event kinds block on
	/// `.send().await` since dropping e.g. a `moved` event silently would be incorrect.
	async fn deliver_now(state: &Weak<SubscriptionState>, event: ChangeEvent, coalesced: bool) {
		let Some(state) = state.upgrade() else { return };
		let outcome = if coalesced {
			state.sender.try_send(Delivery::Change(event)).map_err(|_| ())
		} else {
			state.sender.send(Delivery::Change(event)).await.map_err(|_| ())
		};
		match outcome {
			Ok(()) => {
				state.delivered_count.fetch_add(1, Ordering::Relaxed);
				state.last_delivered_at.store(now_ms(), Ordering::Relaxed);
			}
			Err(()) => {
				if !state.resync_pending.swap(true, Ordering::Relaxed) {
					let _ = state.sender.try_send(Delivery::ResyncHint { scope: state.scope.clone() });
				}
			}
		}
	}

	pub fn get_recent_events(&self, node_id: &NodeId, limit: usize) -> Vec<ChangeEvent> {
		self.ring.lock().recent_for_node(node_id, limit)
	}

	pub fn get_event_history(&self, start: Timestamp, end: Timestamp, node_id: Option<&NodeId>) -> Vec<ChangeEvent> {
		self.ring.lock().history(start, end, node_id)
	}

	pub fn get_subscription_stats(&self) -> SubscriptionStats {
		let subs = self.subscriptions.read();
		let (mut node_scoped, mut subtree_scoped, mut tree_scoped) = (0, 0, 0);
		for s in subs.values() {
			match s.scope {
				SubscriptionScope::Node { .. } => node_scoped += 1,
				SubscriptionScope::Subtree { .. } => subtree_scoped += 1,
				SubscriptionScope::Tree { .. } => tree_scoped += 1,
			}
		}
		SubscriptionStats {
			active_subscriptions: subs.len(),
			node_scoped,
			subtree_scoped,
			tree_scoped,
			events_processed_last_24h: self.processed_at.lock().len() as u64,
			ring_buffer_len: self.ring.lock().len(),
		}
	}
}
