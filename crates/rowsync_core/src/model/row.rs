//! Projected row node model.
//!
//! # Responsibility
//! - Hold the UI-facing projection of one domain entity.
//! - Enforce the row lifecycle `Unmaterialized -> Live -> Disposed`.
//! - Carry kind-specific behavior as a small capability object.
//!
//! # Invariants
//! - A row never changes identity or kind after construction.
//! - `revision` only moves forward; stale snapshots are rejected.
//! - `Disposed` is terminal; repeated disposal is a no-op.

use crate::model::entity::{attribute_text, Attributes, EntityId, EntityKind, EntitySnapshot, NAME_ATTRIBUTE};
use crate::model::observable::ObservableList;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

/// Non-owning back-reference from a row to its container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RowParent {
    /// The scope root of the owning panel.
    Root,
    /// Another projected row, by entity identity.
    Row(EntityId),
}

/// Lifecycle state of one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowState {
    /// Constructed and cached, not yet linked into the tree.
    Unmaterialized,
    /// Linked, subscribed and visible.
    Live,
    /// Detached from its old parent while a reposition is pending.
    Stale,
    /// Terminal.
    Disposed,
}

impl Display for RowState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            Self::Unmaterialized => "unmaterialized",
            Self::Live => "live",
            Self::Stale => "stale",
            Self::Disposed => "disposed",
        };
        f.write_str(value)
    }
}

/// Returns the states reachable from `from` in one step.
pub fn allowed_transitions(from: RowState) -> &'static [RowState] {
    use RowState::*;
    match from {
        Unmaterialized => &[Live, Disposed],
        Live => &[Stale, Disposed],
        Stale => &[Live, Disposed],
        Disposed => &[],
    }
}

/// Validates one lifecycle transition.
pub fn validate_transition(from: RowState, to: RowState) -> Result<(), RowError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(RowError::IllegalTransition { from, to })
    }
}

/// Row construction and lifecycle errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowError {
    /// A required construction collaborator or argument is missing/invalid.
    InvalidConstructionArgument(&'static str),
    /// Lifecycle transition not permitted by the row state machine.
    IllegalTransition { from: RowState, to: RowState },
}

impl Display for RowError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidConstructionArgument(what) => {
                write!(f, "invalid row construction argument: {what}")
            }
            Self::IllegalTransition { from, to } => {
                write!(f, "illegal row state transition: {from} -> {to}")
            }
        }
    }
}

impl Error for RowError {}

/// Kind-specific row capability.
///
/// Attached to every row instead of specializing rows per kind.
pub trait RowBehavior: Send + Sync {
    /// Display label derived from the attribute snapshot.
    fn label(&self, attributes: &Attributes) -> String;
    /// Whether rows of this kind may hold child rows.
    fn accepts_children(&self) -> bool;
}

/// Label from the `name` attribute.
#[derive(Debug, Clone, Copy)]
pub struct NamedRow {
    pub container: bool,
}

impl RowBehavior for NamedRow {
    fn label(&self, attributes: &Attributes) -> String {
        attribute_text(attributes, NAME_ATTRIBUTE)
            .unwrap_or("<unnamed>")
            .to_string()
    }

    fn accepts_children(&self) -> bool {
        self.container
    }
}

/// Parameter-like rows: name followed by the owning domain short name.
#[derive(Debug, Clone, Copy)]
pub struct ParameterRow;

impl RowBehavior for ParameterRow {
    fn label(&self, attributes: &Attributes) -> String {
        let name = attribute_text(attributes, NAME_ATTRIBUTE).unwrap_or("<unnamed>");
        match attribute_text(attributes, "owner") {
            Some(owner) => format!("{name} [{owner}]"),
            None => name.to_string(),
        }
    }

    fn accepts_children(&self) -> bool {
        true
    }
}

/// Option/state dependent value rows.
#[derive(Debug, Clone, Copy)]
pub struct ValueSetRow;

impl RowBehavior for ValueSetRow {
    fn label(&self, attributes: &Attributes) -> String {
        let parts: Vec<&str> = ["option", "state"]
            .into_iter()
            .filter_map(|key| attribute_text(attributes, key))
            .collect();
        if parts.is_empty() {
            attribute_text(attributes, NAME_ATTRIBUTE)
                .unwrap_or("<unnamed>")
                .to_string()
        } else {
            parts.join(" / ")
        }
    }

    fn accepts_children(&self) -> bool {
        false
    }
}

/// Projected tree node for one domain entity.
pub struct RowNode {
    id: EntityId,
    kind: EntityKind,
    attributes: Attributes,
    revision: u64,
    parent: Option<RowParent>,
    children: ObservableList<EntityId>,
    state: RowState,
    behavior: Arc<dyn RowBehavior>,
}

impl Debug for RowNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowNode")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("revision", &self.revision)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("state", &self.state)
            .finish()
    }
}

impl RowNode {
    /// Builds an unmaterialized row from one snapshot.
    ///
    /// # Errors
    /// - `InvalidConstructionArgument` when the snapshot carries the nil id.
    pub fn try_new(snapshot: &EntitySnapshot, behavior: Arc<dyn RowBehavior>) -> Result<Self, RowError> {
        if snapshot.id.is_nil() {
            return Err(RowError::InvalidConstructionArgument(
                "entity id must not be nil",
            ));
        }
        Ok(Self {
            id: snapshot.id,
            kind: snapshot.kind,
            attributes: snapshot.attributes.clone(),
            revision: snapshot.revision,
            parent: None,
            children: ObservableList::new(),
            state: RowState::Unmaterialized,
            behavior,
        })
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn name(&self) -> Option<&str> {
        attribute_text(&self.attributes, NAME_ATTRIBUTE)
    }

    pub fn label(&self) -> String {
        self.behavior.label(&self.attributes)
    }

    /// Last applied revision.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn parent(&self) -> Option<RowParent> {
        self.parent
    }

    pub fn children(&self) -> &ObservableList<EntityId> {
        &self.children
    }

    pub fn state(&self) -> RowState {
        self.state
    }

    pub fn is_live(&self) -> bool {
        self.state == RowState::Live
    }

    pub fn accepts_children(&self) -> bool {
        self.behavior.accepts_children()
    }

    pub(crate) fn children_mut(&mut self) -> &mut ObservableList<EntityId> {
        &mut self.children
    }

    pub(crate) fn set_parent(&mut self, parent: Option<RowParent>) {
        self.parent = parent;
    }

    /// Moves the row to `to`; disposing a disposed row is a silent no-op.
    pub(crate) fn transition(&mut self, to: RowState) -> Result<(), RowError> {
        if self.state == RowState::Disposed && to == RowState::Disposed {
            return Ok(());
        }
        validate_transition(self.state, to)?;
        self.state = to;
        Ok(())
    }

    /// Overwrites attributes when `snapshot` is newer than the cached revision.
    ///
    /// Returns whether the snapshot was applied.
    pub(crate) fn apply_snapshot(&mut self, snapshot: &EntitySnapshot) -> bool {
        if snapshot.id != self.id || snapshot.revision <= self.revision {
            return false;
        }
        self.attributes = snapshot.attributes.clone();
        self.revision = snapshot.revision;
        true
    }
}
