//! Configuration accepted by [`crate::Engine::initialize`].
//!
//! The engine has no CLI surface and reads no environment variables (spec §6); every knob
//! is passed in explicitly here. Defaults mirror the numeric bounds spec.md commits to in
//! §4.6 and §5.

use serde::{Deserialize, Serialize};

/// Store names for the two logical databases (spec §4.1, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreNames {
	pub core_db: String,
	pub ephemeral_db: String,
}

impl Default for StoreNames {
	fn default() -> Self {
		Self {
			core_db: "CoreDB".to_string(),
			ephemeral_db: "EphemeralDB".to_string(),
		}
	}
}

/// Knobs for the subscription fabric (spec §4.6, §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
	/// Per-subscription queue high-water mark before `updated` drop + `resyncHint`.
	pub queue_high_water_mark: usize,
	/// Debounce window for coalescing consecutive `updated` events, in milliseconds.
	pub debounce_ms: u64,
	/// Size of the in-memory event ring buffer backing `getRecentEvents`/`getEventHistory`.
	pub event_ring_buffer_size: usize,
}

impl Default for SubscriptionConfig {
	fn default() -> Self {
		Self {
			queue_high_water_mark: 1024,
			debounce_ms: 16,
			event_ring_buffer_size: 10_000,
		}
	}
}

/// Knobs for the working-copy manager (spec §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingCopyConfig {
	/// Time-to-live for an uncommitted working copy, in milliseconds. Default 24h.
	pub ttl_ms: i64,
	/// Interval between periodic sweeps for expired working copies, in milliseconds.
	pub sweep_interval_ms: u64,
}

impl Default for WorkingCopyConfig {
	fn default() -> Self {
		Self {
			ttl_ms: 24 * 60 * 60 * 1000,
			sweep_interval_ms: 60 * 1000,
		}
	}
}

/// Knobs for the command pipeline's undo/redo journal (spec §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalConfig {
	/// Bounded number of entries retained per tree.
	pub max_entries_per_tree: usize,
}

impl Default for JournalConfig {
	fn default() -> Self {
		Self {
			max_entries_per_tree: 100,
		}
	}
}

/// Knobs for query/traversal safety bounds (spec §4.7, §5, §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraversalConfig {
	/// Hard cap on traversal depth/visited-node count, guarding against corrupt cycles.
	pub max_depth: usize,
}

impl Default for TraversalConfig {
	fn default() -> Self {
		Self { max_depth: 10_000 }
	}
}

/// Full set of options accepted by `initialize()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeOptions {
	pub store_names: StoreNames,
	pub subscription: SubscriptionConfig,
	pub working_copy: WorkingCopyConfig,
	pub journal: JournalConfig,
	pub traversal: TraversalConfig,
	/// Implicit per-call RPC timeout, in milliseconds. Spec §4.8 default: 30s.
	#[serde(default = "default_rpc_timeout_ms")]
	pub rpc_timeout_ms: u64,
}

fn default_rpc_timeout_ms() -> u64 {
	30_000
}

impl Default for InitializeOptions {
	fn default() -> Self {
		Self {
			store_names: StoreNames::default(),
			subscription: SubscriptionConfig::default(),
			working_copy: WorkingCopyConfig::default(),
			journal: JournalConfig::default(),
			traversal: TraversalConfig::default(),
			rpc_timeout_ms: default_rpc_timeout_ms(),
		}
	}
}
