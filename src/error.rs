//! Engine-wide error taxonomy (spec §7).
//!
//! One variant per error *kind*, not per call site. `EngineError::kind()` gives the stable,
//! machine-readable string that the RPC facade puts on the wire.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error, Clone, Serialize, Deserialize)]
pub enum EngineError {
	// --- Validation ---
	#[error("invalid payload: {0}")]
	InvalidPayload(String),
	#[error("invalid name: {0}")]
	InvalidName(String),
	#[error("name conflict: '{name}' already exists under parent {parent_id}")]
	NameConflict { parent_id: String, name: String },
	#[error("invalid query: {0}")]
	InvalidQuery(String),
	#[error("cycle detected moving node {node_id} under {target_parent_id}")]
	CycleDetected {
		node_id: String,
		target_parent_id: String,
	},
	#[error("operation crosses the trash boundary illegally")]
	AcrossTrashBoundary,

	// --- NotFound ---
	#[error("unknown node: {0}")]
	UnknownNode(String),
	#[error("unknown tree: {0}")]
	UnknownTree(String),
	#[error("unknown entity: {0}")]
	UnknownEntity(String),
	#[error("unknown working copy: {0}")]
	UnknownWorkingCopy(String),
	#[error("unknown subscription: {0}")]
	UnknownSubscription(String),
	#[error("unknown node type: {0}")]
	UnknownNodeType(String),

	// --- State ---
	#[error("working copy already exists for node {0}")]
	WorkingCopyExists(String),
	#[error("working copy {0} has expired")]
	WorkingCopyExpired(String),
	#[error("nothing to undo")]
	UndoUnavailable,
	#[error("nothing to redo")]
	RedoUnavailable,
	#[error("command is not reversible: {0}")]
	NonReversible(String),

	// --- Storage ---
	#[error("storage unavailable: {0}")]
	StorageUnavailable(String),
	#[error("quota exceeded: {0}")]
	QuotaExceeded(String),
	#[error("schema mismatch for store '{store}': stored version {stored} > code version {code}")]
	SchemaMismatch {
		store: String,
		stored: u32,
		code: u32,
	},
	#[error("transaction aborted: {0}")]
	TransactionAborted(String),

	// --- Plugin ---
	#[error("plugin hook failed: {0}")]
	HookFailed(String),
	#[error("handler missing for node type {0}")]
	HandlerMissing(String),

	// --- Partial ---
	#[error("command committed but a hook failed: {inner}")]
	PartialFailure { inner: String },

	// --- Transport ---
	#[error("rpc call timed out")]
	RpcTimeout,
	#[error("operation canceled")]
	Canceled,
}

impl EngineError {
	/// Stable machine-readable kind string for the `{success:false, error:{kind, ...}}`
	/// RPC result shape (spec §7).
	pub fn kind(&self) -> &'static str {
		match self {
			Self::InvalidPayload(_) => "InvalidPayload",
			Self::InvalidName(_) => "InvalidName",
			Self::NameConflict { .. } => "NameConflict",
			Self::InvalidQuery(_) => "InvalidQuery",
			Self::CycleDetected { .. } => "CycleDetected",
			Self::AcrossTrashBoundary => "AcrossTrashBoundary",
			Self::UnknownNode(_) => "UnknownNode",
			Self::UnknownTree(_) => "UnknownTree",
			Self::UnknownEntity(_) => "UnknownEntity",
			Self::UnknownWorkingCopy(_) => "UnknownWorkingCopy",
			Self::UnknownSubscription(_) => "UnknownSubscription",
			Self::UnknownNodeType(_) => "UnknownNodeType",
			Self::WorkingCopyExists(_) => "WorkingCopyExists",
			Self::WorkingCopyExpired(_) => "WorkingCopyExpired",
			Self::UndoUnavailable => "UndoUnavailable",
			Self::RedoUnavailable => "RedoUnavailable",
			Self::NonReversible(_) => "NonReversible",
			Self::StorageUnavailable(_) => "StorageUnavailable",
			Self::QuotaExceeded(_) => "QuotaExceeded",
			Self::SchemaMismatch { .. } => "SchemaMismatch",
			Self::TransactionAborted(_) => "TransactionAborted",
			Self::HookFailed(_) => "HookFailed",
			Self::HandlerMissing(_) => "HandlerMissing",
			Self::PartialFailure { .. } => "PartialFailure",
			Self::RpcTimeout => "RpcTimeout",
			Self::Canceled => "Canceled",
		}
	}

	/// `true` for the errors spec §7 says abort the command with no storage/event
	/// side effects (validation, not-found, state kinds).
	pub fn is_clean_abort(&self) -> bool {
		!matches!(self, Self::PartialFailure { .. })
	}
}

/// The RPC-boundary error payload: `{kind, message, details?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
	pub kind: String,
	pub message: String,
	pub details: Option<serde_json::Value>,
}

impl From<&EngineError> for ErrorPayload {
	fn from(err: &EngineError) -> Self {
		Self {
			kind: err.kind().to_string(),
			message: err.to_string(),
			details: None,
		}
	}
}
