//! Tree data model, structural invariants, and the read-only query service (spec §3, §4.2,
//! §4.7).

pub mod invariants;
pub mod model;
pub mod query;

pub use invariants::{check_acyclic, resolve_name_conflict, NameResolution, OnNameConflict};
pub use model::{
	ChildrenOptions, DescendantsOptions, Entity, SearchMode, SearchQuery, SortBy, SortOrder, Tree, TraversalResult,
	TraversalWarning, TreeNode,
};
pub use query::TreeQueryService;
