//! Incremental tree projection.
//!
//! # Responsibility
//! - Keep a tree of `RowNode`s aligned with one scope of the domain graph.
//! - Own per-row subscriptions and release them with their rows.
//!
//! # Invariants
//! - Data irregularities are reported through `SyncReport`, never returned
//!   as errors.
//! - Only construction preconditions fail with `ProjectionError`.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod cache;
pub mod panel;
pub mod report;
pub mod subscription;
pub mod synchronizer;

pub use cache::ProjectionCache;
pub use panel::{ProjectionPanel, ProjectionPanelBuilder};
pub use report::{InvariantViolation, SyncIssue, SyncReport};
pub use subscription::SubscriptionManager;
pub use synchronizer::{RowSnapshot, TreeSynchronizer};

/// Construction-time precondition failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionError {
    /// A required collaborator is missing or unusable.
    InvalidConstructionArgument(&'static str),
}

impl Display for ProjectionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidConstructionArgument(what) => {
                write!(f, "invalid projection construction argument: {what}")
            }
        }
    }
}

impl Error for ProjectionError {}
