//! Incremental tree projection synchronization.
//!
//! Keeps UI-facing row trees consistent with a live, mutable domain graph
//! whose membership, containment and attributes change over time.

pub mod change;
pub mod config;
pub mod db;
pub mod graph;
pub mod logging;
pub mod model;
pub mod order;
pub mod predicate;
pub mod projection;

pub use change::{ChangeChannel, ChangeEvent, ChangeFilter, ChangeKind, Delivery, ListenerId};
pub use config::{ConfigError, IssueLogLevel, SyncConfig};
pub use graph::sqlite::SqliteDomainGraph;
pub use graph::{DomainGraph, GraphError, GraphResult, MemoryGraph};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError, LoggingStatus};
pub use model::entity::{AttributeValue, Attributes, EntityId, EntityKind, EntitySnapshot};
pub use model::factory::RowFactory;
pub use model::observable::{ListChange, ObservableList, ObserverId};
pub use model::row::{RowBehavior, RowError, RowNode, RowParent, RowState};
pub use order::{ComparatorRegistry, ParentKey, RowComparator};
pub use predicate::{AllOf, AttributePattern, IncludeAll, InclusionPredicate, KindFilter, PredicateError};
pub use projection::{
    InvariantViolation, ProjectionError, ProjectionPanel, ProjectionPanelBuilder, RowSnapshot,
    SyncIssue, SyncReport, TreeSynchronizer,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
