//! Domain graph accessor boundary.
//!
//! # Responsibility
//! - Answer "what does entity X look like now" and "which entities belong to
//!   scope S now" for the synchronizer.
//! - Provide an in-memory graph that announces its own mutations.
//!
//! # Invariants
//! - Every mutation bumps the entity revision by exactly one.
//! - Mutations are announced after the new state is readable.

use crate::change::{ChangeChannel, ChangeEvent};
use crate::db::DbError;
use crate::model::entity::{AttributeValue, EntityId, EntitySnapshot, NAME_ATTRIBUTE};
use log::debug;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Mutex, PoisonError, RwLock};

pub mod sqlite;

pub type GraphResult<T> = Result<T, GraphError>;

/// Errors raised by domain graph accessors and mutators.
#[derive(Debug)]
pub enum GraphError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Target entity does not exist or is deleted.
    EntityNotFound(EntityId),
    /// Insert of an identity that already exists.
    DuplicateEntity(EntityId),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    MissingRequiredTable(&'static str),
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
    /// Stored or supplied data cannot form a valid snapshot.
    InvalidData(String),
}

impl Display for GraphError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::EntityNotFound(id) => write!(f, "entity not found: {id}"),
            Self::DuplicateEntity(id) => write!(f, "entity already exists: {id}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "domain graph requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "domain graph requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "domain graph requires column `{column}` in table `{table}`"
            ),
            Self::InvalidData(message) => write!(f, "invalid graph data: {message}"),
        }
    }
}

impl Error for GraphError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for GraphError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for GraphError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Read access to the live domain graph.
pub trait DomainGraph {
    /// Current snapshot of one entity, `None` when it no longer exists.
    fn entity(&self, id: EntityId) -> GraphResult<Option<EntitySnapshot>>;

    /// Identities currently belonging to `scope`, excluding the owner itself.
    fn scope_members(&self, scope: EntityId) -> GraphResult<Vec<EntityId>>;

    /// Snapshots of every current scope member.
    fn scope_snapshots(&self, scope: EntityId) -> GraphResult<Vec<EntitySnapshot>> {
        let mut snapshots = Vec::new();
        for id in self.scope_members(scope)? {
            if let Some(snapshot) = self.entity(id)? {
                snapshots.push(snapshot);
            }
        }
        Ok(snapshots)
    }

    fn is_member(&self, scope: EntityId, id: EntityId) -> GraphResult<bool> {
        Ok(self.scope_members(scope)?.contains(&id))
    }
}

#[derive(Debug, Clone)]
struct StoredEntity {
    scope: EntityId,
    snapshot: EntitySnapshot,
}

/// Thread-safe in-memory domain graph.
///
/// Mutators may run on any thread; each one publishes the matching change
/// event to every attached, still-open channel.
#[derive(Debug, Default)]
pub struct MemoryGraph {
    entities: RwLock<HashMap<EntityId, StoredEntity>>,
    channels: Mutex<Vec<ChangeChannel>>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Announces later mutations on `channel` as well.
    pub fn attach_channel(&self, channel: ChangeChannel) {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(channel);
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Adds one entity to `scope` and announces `Added`.
    ///
    /// Revisions below 1 are raised to 1.
    ///
    /// # Errors
    /// - `InvalidData` for the nil identity or a nil scope.
    /// - `DuplicateEntity` when the identity already exists.
    pub fn insert(&self, scope: EntityId, mut snapshot: EntitySnapshot) -> GraphResult<u64> {
        if snapshot.id.is_nil() || scope.is_nil() {
            return Err(GraphError::InvalidData(
                "entity and scope ids must not be nil".to_string(),
            ));
        }
        snapshot.revision = snapshot.revision.max(1);
        let id = snapshot.id;
        let revision = snapshot.revision;
        {
            let mut entities = self.write();
            if entities.contains_key(&id) {
                return Err(GraphError::DuplicateEntity(id));
            }
            entities.insert(id, StoredEntity { scope, snapshot });
        }
        self.announce(ChangeEvent::added(id, revision));
        Ok(revision)
    }

    /// Mutates one entity and announces `Updated` with the bumped revision.
    ///
    /// Identity, kind and revision are owned by the graph; changes `edit`
    /// makes to them are discarded.
    pub fn update(&self, id: EntityId, edit: impl FnOnce(&mut EntitySnapshot)) -> GraphResult<u64> {
        let revision = {
            let mut entities = self.write();
            let stored = entities
                .get_mut(&id)
                .ok_or(GraphError::EntityNotFound(id))?;
            let mut next = stored.snapshot.clone();
            edit(&mut next);
            next.id = stored.snapshot.id;
            next.kind = stored.snapshot.kind;
            next.revision = stored.snapshot.revision + 1;
            stored.snapshot = next;
            stored.snapshot.revision
        };
        self.announce(ChangeEvent::updated(id, revision));
        Ok(revision)
    }

    pub fn set_container(&self, id: EntityId, container: Option<EntityId>) -> GraphResult<u64> {
        self.update(id, |snapshot| snapshot.container = container)
    }

    pub fn set_attribute(
        &self,
        id: EntityId,
        key: &str,
        value: impl Into<AttributeValue>,
    ) -> GraphResult<u64> {
        let value = value.into();
        self.update(id, |snapshot| {
            snapshot.attributes.insert(key.to_string(), value);
        })
    }

    pub fn rename(&self, id: EntityId, name: &str) -> GraphResult<u64> {
        self.set_attribute(id, NAME_ATTRIBUTE, name)
    }

    /// Deletes one entity and announces `Removed` with revision + 1.
    pub fn remove(&self, id: EntityId) -> GraphResult<u64> {
        let stored = self
            .write()
            .remove(&id)
            .ok_or(GraphError::EntityNotFound(id))?;
        let revision = stored.snapshot.revision + 1;
        self.announce(ChangeEvent::removed(id, revision));
        Ok(revision)
    }

    fn announce(&self, event: ChangeEvent) {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels.retain(|channel| !channel.is_closed());
        for channel in channels.iter() {
            channel.publish(event);
        }
        debug!(
            "event=graph_mutation module=graph status=ok kind={:?} revision={} channels={}",
            event.kind,
            event.revision,
            channels.len()
        );
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<EntityId, StoredEntity>> {
        self.entities.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<EntityId, StoredEntity>> {
        self.entities.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DomainGraph for MemoryGraph {
    fn entity(&self, id: EntityId) -> GraphResult<Option<EntitySnapshot>> {
        Ok(self.read().get(&id).map(|stored| stored.snapshot.clone()))
    }

    fn scope_members(&self, scope: EntityId) -> GraphResult<Vec<EntityId>> {
        let mut members: Vec<EntityId> = self
            .read()
            .iter()
            .filter(|(id, stored)| stored.scope == scope && **id != scope)
            .map(|(id, _)| *id)
            .collect();
        members.sort();
        Ok(members)
    }

    fn scope_snapshots(&self, scope: EntityId) -> GraphResult<Vec<EntitySnapshot>> {
        let mut snapshots: Vec<EntitySnapshot> = self
            .read()
            .values()
            .filter(|stored| stored.scope == scope && stored.snapshot.id != scope)
            .map(|stored| stored.snapshot.clone())
            .collect();
        snapshots.sort_by_key(|snapshot| snapshot.id);
        Ok(snapshots)
    }

    fn is_member(&self, scope: EntityId, id: EntityId) -> GraphResult<bool> {
        Ok(id != scope
            && self
                .read()
                .get(&id)
                .is_some_and(|stored| stored.scope == scope))
    }
}

#[cfg(test)]
mod tests {
    use super::{DomainGraph, GraphError, MemoryGraph};
    use crate::change::{ChangeChannel, ChangeFilter, ChangeKind};
    use crate::model::entity::{EntityKind, EntitySnapshot};
    use uuid::Uuid;

    #[test]
    fn mutations_bump_revision_and_announce() {
        let graph = MemoryGraph::new();
        let channel = ChangeChannel::new();
        channel.subscribe(ChangeFilter::any()).unwrap();
        graph.attach_channel(channel.clone());

        let scope = Uuid::new_v4();
        let file = EntitySnapshot::named(EntityKind::File, "a.txt");
        let id = file.id;
        assert_eq!(graph.insert(scope, file).unwrap(), 1);
        assert_eq!(graph.rename(id, "b.txt").unwrap(), 2);
        assert_eq!(graph.remove(id).unwrap(), 3);

        let kinds: Vec<(ChangeKind, u64)> = channel
            .drain()
            .into_iter()
            .map(|delivery| (delivery.event.kind, delivery.event.revision))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (ChangeKind::Added, 1),
                (ChangeKind::Updated, 2),
                (ChangeKind::Removed, 3)
            ]
        );
    }

    #[test]
    fn update_cannot_rewrite_identity_or_revision() {
        let graph = MemoryGraph::new();
        let scope = Uuid::new_v4();
        let folder = EntitySnapshot::named(EntityKind::Folder, "F1");
        let id = folder.id;
        graph.insert(scope, folder).unwrap();

        graph
            .update(id, |snapshot| {
                snapshot.id = Uuid::new_v4();
                snapshot.kind = EntityKind::File;
                snapshot.revision = 99;
            })
            .unwrap();

        let stored = graph.entity(id).unwrap().unwrap();
        assert_eq!(stored.kind, EntityKind::Folder);
        assert_eq!(stored.revision, 2);
    }

    #[test]
    fn scope_membership_excludes_other_scopes_and_owner() {
        let graph = MemoryGraph::new();
        let scope = Uuid::new_v4();
        let owner = EntitySnapshot::new(scope, EntityKind::ElementUsage, 1);
        graph.insert(scope, owner).unwrap();
        let inside = EntitySnapshot::named(EntityKind::Parameter, "mass");
        let inside_id = inside.id;
        graph.insert(scope, inside).unwrap();
        graph
            .insert(Uuid::new_v4(), EntitySnapshot::named(EntityKind::Parameter, "other"))
            .unwrap();

        assert_eq!(graph.scope_members(scope).unwrap(), vec![inside_id]);
        assert!(graph.is_member(scope, inside_id).unwrap());
        assert!(!graph.is_member(scope, scope).unwrap());
    }

    #[test]
    fn rejects_duplicates_and_unknown_targets() {
        let graph = MemoryGraph::new();
        let scope = Uuid::new_v4();
        let file = EntitySnapshot::named(EntityKind::File, "a");
        graph.insert(scope, file.clone()).unwrap();

        assert!(matches!(
            graph.insert(scope, file),
            Err(GraphError::DuplicateEntity(_))
        ));
        assert!(matches!(
            graph.remove(Uuid::new_v4()),
            Err(GraphError::EntityNotFound(_))
        ));
    }
}
