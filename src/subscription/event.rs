//! `ChangeEvent` and the subscription-scope types (spec §3, §4.6, §6).

use crate::ids::{NodeId, SubscriptionId, Timestamp, TreeId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeEventType {
	Created,
	Updated,
	Moved,
	Removed,
	Trashed,
	Recovered,
	EntityChanged,
}

/// `{commandId, groupId}` — why this event happened, carried on the wire (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventCause {
	pub command_id: String,
	pub group_id: Option<String>,
}

/// `{ type, nodeId, treeId, prevParentId?, newParentId?, at, version, cause }` (spec §3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
	#[serde(rename = "type")]
	pub event_type: ChangeEventType,
	pub node_id: NodeId,
	pub tree_id: TreeId,
	pub prev_parent_id: Option<NodeId>,
	pub new_parent_id: Option<NodeId>,
	pub at: Timestamp,
	pub version: u64,
	pub cause: EventCause,
}

/// Scope a subscription observes (spec §4.6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SubscriptionScope {
	Node {
		root_id: NodeId,
	},
	Subtree {
		root_id: NodeId,
		depth: Option<usize>,
		include_types: Option<Vec<String>>,
		exclude_types: Option<Vec<String>>,
	},
	Tree {
		root_id: TreeId,
	},
}

/// What actually gets pushed down a subscription's channel: a real change, the synthetic
/// `initial` snapshot-boundary event sent immediately on subscribe, or a back-pressure
/// `resyncHint`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Delivery {
	Change(ChangeEvent),
	Initial { subscription_id: SubscriptionId },
	ResyncHint { scope: SubscriptionScope },
}
