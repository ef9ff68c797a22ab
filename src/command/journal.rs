//! Per-tree bounded undo/redo journal (spec §4.3, §5).
//!
//! Each entry carries a before/after snapshot of the exact rows a command touched; undo and
//! redo replay the snapshot rather than recomputing anything.

use crate::ids::{Timestamp, TreeId};
use crate::tree::model::{Entity, TreeNode};
use std::collections::{HashMap, VecDeque};

/// One node's state (plus its entity payload, if any) at a point in time.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
	pub node: TreeNode,
	pub entity: Option<Entity>,
}

/// The reversible effect of a single command, expressed as snapshots rather than a replayed
/// command — undo/redo never re-run validation, they just restore rows.
#[derive(Debug, Clone)]
pub enum JournalAction {
	/// Node(s) came into existence. Undo removes them; redo reinserts them.
	Created(Vec<NodeSnapshot>),
	/// Node(s) moved. Undo restores `before` (parent, name, version); redo re-applies `after`.
	/// A full snapshot rather than a bare parent edge, so an auto-rename picked to dodge a
	/// name conflict at the destination undoes back to the node's original name too.
	Moved(Vec<(NodeSnapshot, NodeSnapshot)>),
	/// A node's own fields (name/payload) changed. Undo restores `before`; redo `after`.
	Updated { before: NodeSnapshot, after: NodeSnapshot },
	/// Node(s) crossed the trash boundary. Undo restores `before`; redo re-applies `after`.
	Trashed(Vec<(NodeSnapshot, NodeSnapshot)>),
	/// `replaceIfSameType` name-conflict resolution: an existing node was removed to make
	/// room for a new one. Undo removes the new node and reinserts the old; redo reverses.
	Replaced { removed: NodeSnapshot, created: NodeSnapshot },
}

impl JournalAction {
	/// Every node type this action touched, used to check plugin reversibility before undo
	/// or redo replays it.
	pub fn node_types(&self) -> Vec<&str> {
		match self {
			JournalAction::Created(snaps) => snaps.iter().map(|s| s.node.node_type.as_str()).collect(),
			JournalAction::Moved(pairs) | JournalAction::Trashed(pairs) => {
				pairs.iter().map(|(before, _)| before.node.node_type.as_str()).collect()
			}
			JournalAction::Updated { before, .. } => vec![before.node.node_type.as_str()],
			JournalAction::Replaced { removed, created } => {
				vec![removed.node.node_type.as_str(), created.node.node_type.as_str()]
			}
		}
	}
}

#[derive(Debug, Clone)]
pub struct JournalEntry {
	pub command_id: String,
	pub group_id: Option<String>,
	pub at: Timestamp,
	pub action: JournalAction,
}

/// One tree's bounded undo stack plus its parallel redo stack. Pushing a new entry clears
/// the redo stack (standard editor semantics: you can't redo past a fresh edit).
struct TreeJournal {
	undo: VecDeque<JournalEntry>,
	redo: VecDeque<JournalEntry>,
	max_entries: usize,
}

impl TreeJournal {
	fn new(max_entries: usize) -> Self {
		Self {
			undo: VecDeque::new(),
			redo: VecDeque::new(),
			max_entries,
		}
	}

	fn push(&mut self, entry: JournalEntry) {
		self.redo.clear();
		if self.undo.len() == self.max_entries {
			self.undo.pop_front();
		}
		self.undo.push_back(entry);
	}

	/// Pop every trailing entry sharing the most recent entry's `groupId` so a multi-node
	/// operation (e.g. `moveNodes` over several ids) undoes as one atomic unit. A `None`
	/// `groupId` means "no group" rather than "shared with every other ungrouped entry", so
	/// it never merges across entries — only a real `Some(id)` run does.
	fn pop_undo_group(&mut self) -> Vec<JournalEntry> {
		let Some(last) = self.undo.back() else {
			return Vec::new();
		};
		let group_id = last.group_id.clone();
		let mut group = vec![self.undo.pop_back().unwrap()];
		if let Some(gid) = group_id {
			while let Some(entry) = self.undo.back() {
				if entry.group_id.as_ref() != Some(&gid) {
					break;
				}
				group.push(self.undo.pop_back().unwrap());
			}
		}
		group
	}

	fn pop_redo_group(&mut self) -> Vec<JournalEntry> {
		let Some(last) = self.redo.back() else {
			return Vec::new();
		};
		let group_id = last.group_id.clone();
		let mut group = vec![self.redo.pop_back().unwrap()];
		if let Some(gid) = group_id {
			while let Some(entry) = self.redo.back() {
				if entry.group_id.as_ref() != Some(&gid) {
					break;
				}
				group.push(self.redo.pop_back().unwrap());
			}
		}
		group
	}

	fn push_to_redo(&mut self, entries: Vec<JournalEntry>) {
		for entry in entries {
			self.redo.push_back(entry);
		}
	}

	fn push_to_undo_no_clear(&mut self, entries: Vec<JournalEntry>) {
		for entry in entries {
			if self.undo.len() == self.max_entries {
				self.undo.pop_front();
			}
			self.undo.push_back(entry);
		}
	}
}

pub struct UndoJournal {
	max_entries_per_tree: usize,
	trees: parking_lot::Mutex<HashMap<TreeId, TreeJournal>>,
}

impl UndoJournal {
	pub fn new(max_entries_per_tree: usize) -> Self {
		Self {
			max_entries_per_tree,
			trees: parking_lot::Mutex::new(HashMap::new()),
		}
	}

	pub fn record(&self, tree_id: &TreeId, entry: JournalEntry) {
		let mut trees = self.trees.lock();
		trees
			.entry(tree_id.clone())
			.or_insert_with(|| TreeJournal::new(self.max_entries_per_tree))
			.push(entry);
	}

	/// Pop the atomic undo unit (all entries sharing the last command's `groupId`) off the
	/// stack, in chronological order (oldest of the group first, so replay order is correct).
	pub fn take_undo_group(&self, tree_id: &TreeId) -> Vec<JournalEntry> {
		let mut trees = self.trees.lock();
		let Some(journal) = trees.get_mut(tree_id) else {
			return Vec::new();
		};
		let mut group = journal.pop_undo_group();
		group.reverse();
		group
	}

	pub fn push_undone_to_redo(&self, tree_id: &TreeId, entries: Vec<JournalEntry>) {
		let mut trees = self.trees.lock();
		if let Some(journal) = trees.get_mut(tree_id) {
			journal.push_to_redo(entries);
		}
	}

	pub fn take_redo_group(&self, tree_id: &TreeId) -> Vec<JournalEntry> {
		let mut trees = self.trees.lock();
		let Some(journal) = trees.get_mut(tree_id) else {
			return Vec::new();
		};
		let mut group = journal.pop_redo_group();
		group.reverse();
		group
	}

	pub fn push_redone_to_undo(&self, tree_id: &TreeId, entries: Vec<JournalEntry>) {
		let mut trees = self.trees.lock();
		if let Some(journal) = trees.get_mut(tree_id) {
			journal.push_to_undo_no_clear(entries);
		}
	}

	pub fn has_undo(&self, tree_id: &TreeId) -> bool {
		self.trees.lock().get(tree_id).map(|j| !j.undo.is_empty()).unwrap_or(false)
	}

	pub fn has_redo(&self, tree_id: &TreeId) -> bool {
		self.trees.lock().get(tree_id).map(|j| !j.redo.is_empty()).unwrap_or(false)
	}
}
