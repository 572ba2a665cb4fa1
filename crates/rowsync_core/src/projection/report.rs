//! Outcome of synchronization passes.
//!
//! Data-driven irregularities are absorbed by the synchronizer and surface
//! here as [`SyncIssue`] values instead of errors.

use crate::model::entity::EntityId;
use crate::model::row::RowParent;
use std::fmt::{Display, Formatter};

/// Irregularity absorbed during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncIssue {
    /// Update revision not greater than the cached one; dropped.
    StaleUpdateIgnored {
        entity_id: EntityId,
        revision: u64,
        cached_revision: u64,
    },
    /// Container row not projected or unable to hold children; row placed at root.
    MissingContainerRow {
        entity_id: EntityId,
        container_id: EntityId,
    },
    /// `Added` for an entity that already has a row.
    DuplicateMaterialization { entity_id: EntityId },
    /// `Removed` for an entity that never had a row.
    RemovalOfUnknownEntity { entity_id: EntityId },
    /// Container chain loops back to the entity; row placed at root.
    CyclicContainment {
        entity_id: EntityId,
        container_id: EntityId,
    },
}

impl SyncIssue {
    /// Stable snake_case code used in log events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::StaleUpdateIgnored { .. } => "stale_update_ignored",
            Self::MissingContainerRow { .. } => "missing_container_row",
            Self::DuplicateMaterialization { .. } => "duplicate_materialization",
            Self::RemovalOfUnknownEntity { .. } => "removal_of_unknown_entity",
            Self::CyclicContainment { .. } => "cyclic_containment",
        }
    }

    pub fn entity_id(&self) -> EntityId {
        match self {
            Self::StaleUpdateIgnored { entity_id, .. }
            | Self::MissingContainerRow { entity_id, .. }
            | Self::DuplicateMaterialization { entity_id }
            | Self::RemovalOfUnknownEntity { entity_id }
            | Self::CyclicContainment { entity_id, .. } => *entity_id,
        }
    }
}

impl Display for SyncIssue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StaleUpdateIgnored {
                entity_id,
                revision,
                cached_revision,
            } => write!(
                f,
                "stale update for {entity_id}: revision {revision} <= cached {cached_revision}"
            ),
            Self::MissingContainerRow {
                entity_id,
                container_id,
            } => write!(
                f,
                "container {container_id} of {entity_id} has no row; attached to root"
            ),
            Self::DuplicateMaterialization { entity_id } => {
                write!(f, "entity {entity_id} is already materialized")
            }
            Self::RemovalOfUnknownEntity { entity_id } => {
                write!(f, "removal of unknown entity {entity_id}")
            }
            Self::CyclicContainment {
                entity_id,
                container_id,
            } => write!(
                f,
                "container {container_id} of {entity_id} closes a containment cycle; attached to root"
            ),
        }
    }
}

/// Counters and issues of one or more passes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub added: usize,
    pub removed: usize,
    pub repositioned: usize,
    pub refreshed: usize,
    pub issues: Vec<SyncIssue>,
}

impl SyncReport {
    /// True when nothing changed and nothing was reported.
    pub fn is_noop(&self) -> bool {
        self.added == 0
            && self.removed == 0
            && self.repositioned == 0
            && self.refreshed == 0
            && self.issues.is_empty()
    }

    pub fn merge(&mut self, other: SyncReport) {
        self.added += other.added;
        self.removed += other.removed;
        self.repositioned += other.repositioned;
        self.refreshed += other.refreshed;
        self.issues.extend(other.issues);
    }

    pub fn has_issue(&self, code: &str) -> bool {
        self.issues.iter().any(|issue| issue.code() == code)
    }
}

/// Broken tree invariant found by an audit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// Included entity without a row.
    MissingRow(EntityId),
    /// Row whose entity is gone or excluded.
    OrphanRow(EntityId),
    /// Row sits under a parent other than its declared container.
    MisplacedRow {
        entity_id: EntityId,
        expected: RowParent,
        actual: Option<RowParent>,
    },
    /// Child list entry whose back-reference points elsewhere.
    BrokenBackReference { parent: RowParent, child: EntityId },
    /// Row listed under more than one parent, or twice under one.
    DuplicateChildEntry(EntityId),
    UnsortedChildren(RowParent),
    /// Cached row not in the `Live` state after a pass.
    NotLive(EntityId),
    SubscriptionCountMismatch { subscriptions: usize, live_rows: usize },
}
