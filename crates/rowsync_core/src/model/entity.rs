//! Domain entity snapshot model.
//!
//! # Responsibility
//! - Describe the external, mutable records that row trees are projected from.
//! - Provide stable kind tags used by row factories and comparators.
//!
//! # Invariants
//! - `EntityId` is stable and the nil UUID never identifies a real entity.
//! - `revision` strictly increases on every mutation of the same entity.
//! - Snapshots are owned by the notification source; the projection core only
//!   reads them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier of one domain entity.
pub type EntityId = Uuid;

/// Well-known attribute key used by the default comparators and labels.
pub const NAME_ATTRIBUTE: &str = "name";

/// Kind tag of a domain entity.
///
/// The tag selects the row behavior and, for container rows, the comparator
/// applied to their children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// File-store folder; may contain folders and files.
    Folder,
    /// File-store file; positioned by the folder of its latest revision.
    File,
    /// Parameter group; may contain groups and parameters.
    ParameterGroup,
    /// Parameter owned by an element definition.
    Parameter,
    /// Parameter override owned by an element usage.
    ParameterOverride,
    /// Subscription of another domain to a parameter or override.
    ParameterSubscription,
    /// Usage of an element definition inside another one.
    ElementUsage,
    /// Option/state dependent value row of a parameter.
    ValueSet,
}

impl EntityKind {
    /// Every supported kind, in declaration order.
    pub const ALL: [EntityKind; 8] = [
        EntityKind::Folder,
        EntityKind::File,
        EntityKind::ParameterGroup,
        EntityKind::Parameter,
        EntityKind::ParameterOverride,
        EntityKind::ParameterSubscription,
        EntityKind::ElementUsage,
        EntityKind::ValueSet,
    ];

    /// Stable string id used in storage and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Folder => "folder",
            Self::File => "file",
            Self::ParameterGroup => "parameter_group",
            Self::Parameter => "parameter",
            Self::ParameterOverride => "parameter_override",
            Self::ParameterSubscription => "parameter_subscription",
            Self::ElementUsage => "element_usage",
            Self::ValueSet => "value_set",
        }
    }

    /// Parses one kind from its stable string id.
    pub fn parse(value: &str) -> Result<Self, EntityKindError> {
        let normalized = value.trim();
        if normalized.is_empty() {
            return Err(EntityKindError::Empty);
        }
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| EntityKindError::Unsupported(normalized.to_string()))
    }

    /// Returns whether this kind is displayed as a parameter row.
    pub fn is_parameter_like(self) -> bool {
        matches!(
            self,
            Self::Parameter | Self::ParameterOverride | Self::ParameterSubscription
        )
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind tag parse errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityKindError {
    Empty,
    Unsupported(String),
}

impl Display for EntityKindError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "entity kind must not be blank"),
            Self::Unsupported(value) => write!(f, "unsupported entity kind `{value}`"),
        }
    }
}

impl Error for EntityKindError {}

/// One attribute value carried by an entity snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttributeValue {
    Text(String),
    Integer(i64),
    Flag(bool),
}

impl AttributeValue {
    /// Returns the text payload, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }
}

impl Display for AttributeValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(value) => f.write_str(value),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Flag(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

/// Attribute snapshot, ordered by key for deterministic output.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// Returns one text attribute by key.
pub fn attribute_text<'a>(attributes: &'a Attributes, key: &str) -> Option<&'a str> {
    attributes.get(key).and_then(AttributeValue::as_text)
}

/// Point-in-time read model of one domain entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    /// Stable entity id.
    pub id: EntityId,
    /// Kind tag.
    pub kind: EntityKind,
    /// Current container. `None` means attached to the scope root.
    pub container: Option<EntityId>,
    /// Mutation counter; strictly increasing per entity.
    pub revision: u64,
    /// Current attribute values.
    pub attributes: Attributes,
}

impl EntitySnapshot {
    /// Creates a root-attached snapshot without attributes.
    pub fn new(id: EntityId, kind: EntityKind, revision: u64) -> Self {
        Self {
            id,
            kind,
            container: None,
            revision,
            attributes: Attributes::new(),
        }
    }

    /// Creates a snapshot with a fresh id, revision 1 and a `name` attribute.
    pub fn named(kind: EntityKind, name: impl Into<String>) -> Self {
        let name: String = name.into();
        Self::new(Uuid::new_v4(), kind, 1).with_attribute(NAME_ATTRIBUTE, name)
    }

    pub fn with_container(mut self, container: Option<EntityId>) -> Self {
        self.container = container;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Returns the `name` attribute, if present.
    pub fn name(&self) -> Option<&str> {
        attribute_text(&self.attributes, NAME_ATTRIBUTE)
    }
}
