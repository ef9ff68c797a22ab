//! Opaque, string-typed identifiers shared across the engine and the RPC boundary.
//!
//! Every id is a thin newtype over `String` so it travels across the structured-clone
//! boundary unchanged and can be used directly as a `HashMap`/`BTreeMap` key.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! opaque_id {
	($name:ident) => {
		#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		pub struct $name(pub String);

		impl $name {
			pub fn new() -> Self {
				Self(Uuid::new_v4().to_string())
			}

			pub fn as_str(&self) -> &str {
				&self.0
			}
		}

		impl Default for $name {
			fn default() -> Self {
				Self::new()
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "{}", self.0)
			}
		}

		impl From<String> for $name {
			fn from(s: String) -> Self {
				Self(s)
			}
		}

		impl From<&str> for $name {
			fn from(s: &str) -> Self {
				Self(s.to_string())
			}
		}
	};
}

opaque_id!(TreeId);
opaque_id!(NodeId);
opaque_id!(EntityId);
opaque_id!(WorkingCopyId);
opaque_id!(SubscriptionId);

/// Monotonic milliseconds since epoch, as required by the data model (§3).
pub type Timestamp = i64;

pub fn now_ms() -> Timestamp {
	chrono::Utc::now().timestamp_millis()
}
