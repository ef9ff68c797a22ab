//! `getSystemHealth()` (spec §4.8, §6).

use crate::ids::now_ms;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ServiceStatus {
	Ok,
	Degraded,
	Down,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseHealth {
	pub name: String,
	pub status: ServiceStatus,
	pub record_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
	pub name: String,
	pub status: ServiceStatus,
	pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
	pub status: ServiceStatus,
	pub uptime_ms: i64,
	pub databases: Vec<DatabaseHealth>,
	pub services: Vec<ServiceHealth>,
	pub subscription_stats: crate::subscription::SubscriptionStats,
}

/// The moment `initialize()` completed, used to compute `uptimeMs`.
#[derive(Clone, Copy)]
pub struct StartedAt(pub i64);

impl StartedAt {
	pub fn now() -> Self {
		Self(now_ms())
	}

	pub fn uptime_ms(&self) -> i64 {
		(now_ms() - self.0).max(0)
	}
}
