//! Command pipeline (spec §4.3): the `Command` shape, the undo/redo journal, and the
//! `CommandPipeline` orchestrator that drives Validate → Plan → Apply → Hook → Emit →
//! Journal → Acknowledge.

pub mod journal;
pub mod pipeline;
pub mod types;

pub use pipeline::CommandPipeline;
pub use types::{Command, CommandKind, CommandOutcome, ImportNodeSpec};
