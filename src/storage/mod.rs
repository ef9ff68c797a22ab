//! Two logical stores backed by an in-process ordered map engine with secondary indices
//! (spec §4.1): durable `CoreDB` (trees, tree nodes, per-plugin entity tables) and
//! non-durable `EphemeralDB` (working copies, batch sessions).
//!
//! Plain `HashMap`/`BTreeMap` state, no query planner, one dedicated error enum per store.
//! Each logical store is guarded by a single `tokio::sync::RwLock` so multi-record writes
//! within one command are atomic and visible to readers all-or-nothing, matching the
//! "single-writer-at-a-time, atomic multi-record writes" contract.

pub mod core_db;
pub mod ephemeral_db;

pub use core_db::CoreDb;
pub use ephemeral_db::EphemeralDb;

use std::sync::Arc;
use tokio::sync::RwLock;

/// Handle to both logical stores, cloned cheaply and shared across the engine.
#[derive(Clone)]
pub struct Storage {
	pub core: Arc<RwLock<CoreDb>>,
	pub ephemeral: Arc<RwLock<EphemeralDb>>,
}

impl Storage {
	pub fn open(core_store_name: String, ephemeral_store_name: String) -> Self {
		Self {
			core: Arc::new(RwLock::new(CoreDb::new(core_store_name))),
			ephemeral: Arc::new(RwLock::new(EphemeralDb::new(ephemeral_store_name))),
		}
	}
}
