//! Bounded in-memory event history backing `getRecentEvents`/`getEventHistory` (spec §4.6).

use super::event::ChangeEvent;
use crate::ids::{NodeId, Timestamp};
use std::collections::VecDeque;

pub struct EventRingBuffer {
	capacity: usize,
	entries: VecDeque<ChangeEvent>,
}

impl EventRingBuffer {
	pub fn new(capacity: usize) -> Self {
		Self {
			capacity: capacity.max(1),
			entries: VecDeque::with_capacity(capacity.min(1024)),
		}
	}

	pub fn push(&mut self, event: ChangeEvent) {
		if self.entries.len() == self.capacity {
			self.entries.pop_front();
		}
		self.entries.push_back(event);
	}

	/// `getRecentEvents(nodeId, limit)` — most recent events touching a node, newest last.
	pub fn recent_for_node(&self, node_id: &NodeId, limit: usize) -> Vec<ChangeEvent> {
		let matches: Vec<ChangeEvent> = self
			.entries
			.iter()
			.filter(|e| &e.node_id == node_id)
			.cloned()
			.collect();
		let skip = matches.len().saturating_sub(limit);
		matches.into_iter().skip(skip).collect()
	}

	/// `getEventHistory(start, end, nodeId?)` — events with `at` in `[start, end]`.
	pub fn history(&self, start: Timestamp, end: Timestamp, node_id: Option<&NodeId>) -> Vec<ChangeEvent> {
		self.entries
			.iter()
			.filter(|e| e.at >= start && e.at <= end)
			.filter(|e| node_id.map(|id| &e.node_id == id).unwrap_or(true))
			.cloned()
			.collect()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}
