//! `EphemeralDB`: non-durable store for working copies and batch/import sessions.

use crate::ids::{NodeId, Timestamp, WorkingCopyId};
use crate::working_copy::WorkingCopyRecord;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum EphemeralDbError {
	#[error("working copy not found: {0}")]
	NotFound(String),
}

pub type EphemeralDbResult<T> = Result<T, EphemeralDbError>;

/// A long-running import/processing session with a TTL (spec §4.1).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BatchSession {
	pub id: String,
	pub created_at: Timestamp,
	pub expires_at: Timestamp,
}

pub struct EphemeralDb {
	#[allow(dead_code)]
	store_name: String,
	working_copies: HashMap<WorkingCopyId, WorkingCopyRecord>,
	/// Index: workingCopyOf (target node, or None for a create-draft) -> WorkingCopyId.
	by_working_copy_of: HashMap<Option<NodeId>, WorkingCopyId>,
	by_expires_at: BTreeMap<Timestamp, Vec<WorkingCopyId>>,
	batch_sessions: HashMap<String, BatchSession>,
}

impl EphemeralDb {
	pub fn new(store_name: String) -> Self {
		Self {
			store_name,
			working_copies: HashMap::new(),
			by_working_copy_of: HashMap::new(),
			by_expires_at: BTreeMap::new(),
			batch_sessions: HashMap::new(),
		}
	}

	pub fn insert(&mut self, wc: WorkingCopyRecord) {
		self.by_working_copy_of
			.insert(wc.working_copy_of.clone(), wc.id.clone());
		self.by_expires_at
			.entry(wc.expires_at)
			.or_default()
			.push(wc.id.clone());
		self.working_copies.insert(wc.id.clone(), wc);
	}

	pub fn get(&self, id: &WorkingCopyId) -> Option<&WorkingCopyRecord> {
		self.working_copies.get(id)
	}

	pub fn get_mut(&mut self, id: &WorkingCopyId) -> Option<&mut WorkingCopyRecord> {
		self.working_copies.get_mut(id)
	}

	pub fn find_by_target(&self, target: &Option<NodeId>) -> Option<&WorkingCopyRecord> {
		self.by_working_copy_of
			.get(target)
			.and_then(|id| self.working_copies.get(id))
	}

	pub fn remove(&mut self, id: &WorkingCopyId) -> EphemeralDbResult<WorkingCopyRecord> {
		let wc = self
			.working_copies
			.remove(id)
			.ok_or_else(|| EphemeralDbError::NotFound(id.to_string()))?;
		self.by_working_copy_of.remove(&wc.working_copy_of);
		if let Some(v) = self.by_expires_at.get_mut(&wc.expires_at) {
			v.retain(|wid| wid != id);
		}
		Ok(wc)
	}

	/// Sweep every working copy whose TTL has elapsed as of `now`, returning their ids.
	pub fn sweep_expired(&mut self, now: Timestamp) -> Vec<WorkingCopyId> {
		let expired_keys: Vec<Timestamp> = self
			.by_expires_at
			.range(..=now)
			.map(|(k, _)| *k)
			.collect();
		let mut removed = Vec::new();
		for key in expired_keys {
			if let Some(ids) = self.by_expires_at.remove(&key) {
				for id in ids {
					if let Some(wc) = self.working_copies.remove(&id) {
						self.by_working_copy_of.remove(&wc.working_copy_of);
						removed.push(id);
					}
				}
			}
		}
		removed
	}

	pub fn working_copy_count(&self) -> usize {
		self.working_copies.len()
	}

	pub fn insert_batch_session(&mut self, session: BatchSession) {
		self.batch_sessions.insert(session.id.clone(), session);
	}

	pub fn get_batch_session(&self, id: &str) -> Option<&BatchSession> {
		self.batch_sessions.get(id)
	}

	pub fn sweep_expired_batch_sessions(&mut self, now: Timestamp) -> Vec<String> {
		let expired: Vec<String> = self
			.batch_sessions
			.values()
			.filter(|s| s.expires_at <= now)
			.map(|s| s.id.clone())
			.collect();
		for id in &expired {
			self.batch_sessions.remove(id);
		}
		expired
	}
}
