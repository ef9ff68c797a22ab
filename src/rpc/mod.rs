//! RPC facade (spec §4.8): five sub-APIs behind a structured-clone-only boundary.
//!
//! [`facade::ApiDispatcher`] offers typed sub-API methods for in-process callers (this
//! crate's own tests, or a future native binding) alongside a JSON-in/JSON-out
//! `dispatch_json` entry point for callers that only speak `serde_json::Value`, matching
//! the real RPC boundary's structured-clone restriction.

pub mod facade;
pub mod mutation_api;
pub mod plugin_api;
pub mod query_api;
pub mod subscription_api;
pub mod working_copy_api;

pub use facade::ApiDispatcher;
pub use mutation_api::MutationApi;
pub use plugin_api::PluginApi;
pub use query_api::QueryApi;
pub use subscription_api::SubscriptionApi;
pub use working_copy_api::WorkingCopyApi;
