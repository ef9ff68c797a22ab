//! HierarchiDB's Worker-side engine: a hierarchical tree data store with a transactional
//! command pipeline, two-phase working-copy editing, a subscription fabric for live UI
//! updates, a typed plugin registry, and a JSON RPC facade over all of it (spec §1-§9).
//!
//! [`Engine::initialize`] wires every component and hands back the five sub-APIs
//! (`query`, `mutation`, `subscription`, `working_copy`, `plugin`) plus
//! [`rpc::ApiDispatcher`] for callers that only speak `serde_json::Value`.

pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod ids;
pub mod plugin;
pub mod rpc;
pub mod storage;
pub mod subscription;
pub mod tree;
pub mod working_copy;

pub use engine::Engine;
pub use error::{EngineError, EngineResult, ErrorPayload};
