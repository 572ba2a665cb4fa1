//! SQLite-backed domain graph.
//!
//! # Responsibility
//! - Read live entity snapshots and scope membership from `entities`.
//! - Offer write helpers that bump revisions and announce the change.
//!
//! # Invariants
//! - Soft-deleted rows (`is_deleted=1`) are invisible to readers.
//! - Writers bump `revision` by one inside the same statement/transaction
//!   that changes the row; the change event is published after commit.

use crate::change::{ChangeChannel, ChangeEvent};
use crate::db::migrations::latest_version;
use crate::graph::{DomainGraph, GraphError, GraphResult};
use crate::model::entity::{AttributeValue, Attributes, EntityId, EntityKind, EntitySnapshot, NAME_ATTRIBUTE};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use uuid::Uuid;

const ENTITY_COLUMNS: [&str; 8] = [
    "entity_uuid",
    "scope_uuid",
    "kind",
    "container_uuid",
    "revision",
    "attributes_json",
    "is_deleted",
    "updated_at",
];

const SELECT_LIVE: &str = "SELECT entity_uuid, kind, container_uuid, revision, attributes_json
     FROM entities";

/// Domain graph over a migrated graph-store connection.
pub struct SqliteDomainGraph<'conn> {
    conn: &'conn Connection,
    channels: Vec<ChangeChannel>,
}

impl<'conn> SqliteDomainGraph<'conn> {
    /// Wraps a connection after checking its schema.
    ///
    /// # Errors
    /// - `UninitializedConnection` when migrations are not fully applied.
    /// - `MissingRequiredTable` / `MissingRequiredColumn` for a damaged schema.
    pub fn try_new(conn: &'conn Connection) -> GraphResult<Self> {
        ensure_graph_connection_ready(conn)?;
        Ok(Self {
            conn,
            channels: Vec::new(),
        })
    }

    /// Announces later writes on `channel` as well.
    pub fn attach_channel(&mut self, channel: ChangeChannel) {
        self.channels.push(channel);
    }

    /// Inserts one entity into `scope` and announces `Added`.
    pub fn insert(&self, scope: EntityId, snapshot: &EntitySnapshot) -> GraphResult<u64> {
        if snapshot.id.is_nil() || scope.is_nil() {
            return Err(GraphError::InvalidData(
                "entity and scope ids must not be nil".to_string(),
            ));
        }
        let revision = snapshot.revision.max(1);
        let attributes_json = encode_attributes(&snapshot.attributes)?;

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let exists: i64 = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM entities WHERE entity_uuid = ?1);",
            [snapshot.id.to_string()],
            |row| row.get(0),
        )?;
        if exists == 1 {
            return Err(GraphError::DuplicateEntity(snapshot.id));
        }
        tx.execute(
            "INSERT INTO entities (
                entity_uuid,
                scope_uuid,
                kind,
                container_uuid,
                revision,
                attributes_json,
                is_deleted,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, (strftime('%s', 'now') * 1000));",
            params![
                snapshot.id.to_string(),
                scope.to_string(),
                snapshot.kind.as_str(),
                snapshot.container.map(|id| id.to_string()),
                to_sql_revision(revision)?,
                attributes_json,
            ],
        )?;
        tx.commit()?;

        self.announce(ChangeEvent::added(snapshot.id, revision));
        Ok(revision)
    }

    /// Changes the container of one live entity.
    pub fn set_container(&self, id: EntityId, container: Option<EntityId>) -> GraphResult<u64> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "UPDATE entities
             SET container_uuid = ?2,
                 revision = revision + 1,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE entity_uuid = ?1 AND is_deleted = 0;",
            params![id.to_string(), container.map(|value| value.to_string())],
        )?;
        if changed == 0 {
            return Err(GraphError::EntityNotFound(id));
        }
        let revision = stored_revision(&tx, id)?;
        tx.commit()?;

        self.announce(ChangeEvent::updated(id, revision));
        Ok(revision)
    }

    /// Sets one attribute of a live entity.
    pub fn set_attribute(
        &self,
        id: EntityId,
        key: &str,
        value: impl Into<AttributeValue>,
    ) -> GraphResult<u64> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let mut snapshot = load_live(&tx, id)?.ok_or(GraphError::EntityNotFound(id))?;
        snapshot.attributes.insert(key.to_string(), value.into());
        let revision = snapshot.revision + 1;
        tx.execute(
            "UPDATE entities
             SET attributes_json = ?2,
                 revision = ?3,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE entity_uuid = ?1;",
            params![
                id.to_string(),
                encode_attributes(&snapshot.attributes)?,
                to_sql_revision(revision)?,
            ],
        )?;
        tx.commit()?;

        self.announce(ChangeEvent::updated(id, revision));
        Ok(revision)
    }

    pub fn rename(&self, id: EntityId, name: &str) -> GraphResult<u64> {
        self.set_attribute(id, NAME_ATTRIBUTE, name)
    }

    /// Soft-deletes one live entity and announces `Removed`.
    pub fn soft_delete(&self, id: EntityId) -> GraphResult<u64> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "UPDATE entities
             SET is_deleted = 1,
                 revision = revision + 1,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE entity_uuid = ?1 AND is_deleted = 0;",
            [id.to_string()],
        )?;
        if changed == 0 {
            return Err(GraphError::EntityNotFound(id));
        }
        let revision = stored_revision(&tx, id)?;
        tx.commit()?;

        self.announce(ChangeEvent::removed(id, revision));
        Ok(revision)
    }

    fn announce(&self, event: ChangeEvent) {
        let delivered = self
            .channels
            .iter()
            .filter(|channel| channel.publish(event))
            .count();
        debug!(
            "event=graph_mutation module=graph_sqlite status=ok kind={:?} revision={} channels={delivered}",
            event.kind, event.revision
        );
    }
}

impl DomainGraph for SqliteDomainGraph<'_> {
    fn entity(&self, id: EntityId) -> GraphResult<Option<EntitySnapshot>> {
        load_live(self.conn, id)
    }

    fn scope_members(&self, scope: EntityId) -> GraphResult<Vec<EntityId>> {
        let mut stmt = self.conn.prepare(
            "SELECT entity_uuid
             FROM entities
             WHERE scope_uuid = ?1 AND is_deleted = 0 AND entity_uuid <> ?1
             ORDER BY entity_uuid ASC;",
        )?;
        let mut rows = stmt.query([scope.to_string()])?;
        let mut members = Vec::new();
        while let Some(row) = rows.next()? {
            let value: String = row.get(0)?;
            members.push(parse_uuid(&value, "entity_uuid")?);
        }
        Ok(members)
    }

    fn scope_snapshots(&self, scope: EntityId) -> GraphResult<Vec<EntitySnapshot>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_LIVE}
             WHERE scope_uuid = ?1 AND is_deleted = 0 AND entity_uuid <> ?1
             ORDER BY entity_uuid ASC;"
        ))?;
        let mut rows = stmt.query([scope.to_string()])?;
        let mut snapshots = Vec::new();
        while let Some(row) = rows.next()? {
            snapshots.push(parse_snapshot_row(row)?);
        }
        Ok(snapshots)
    }

    fn is_member(&self, scope: EntityId, id: EntityId) -> GraphResult<bool> {
        if scope == id {
            return Ok(false);
        }
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM entities
                WHERE entity_uuid = ?1 AND scope_uuid = ?2 AND is_deleted = 0
            );",
            params![id.to_string(), scope.to_string()],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }
}

fn load_live(conn: &Connection, id: EntityId) -> GraphResult<Option<EntitySnapshot>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT_LIVE}
         WHERE entity_uuid = ?1 AND is_deleted = 0;"
    ))?;
    let mut rows = stmt.query([id.to_string()])?;
    match rows.next()? {
        Some(row) => parse_snapshot_row(row).map(Some),
        None => Ok(None),
    }
}

fn parse_snapshot_row(row: &Row<'_>) -> GraphResult<EntitySnapshot> {
    let id: String = row.get(0)?;
    let kind: String = row.get(1)?;
    let container: Option<String> = row.get(2)?;
    let revision: i64 = row.get(3)?;
    let attributes_json: String = row.get(4)?;

    let kind = EntityKind::parse(&kind)
        .map_err(|err| GraphError::InvalidData(format!("{err} in entities.kind")))?;
    let attributes: Attributes = serde_json::from_str(&attributes_json).map_err(|err| {
        GraphError::InvalidData(format!("invalid attributes_json for `{id}`: {err}"))
    })?;

    Ok(EntitySnapshot {
        id: parse_uuid(&id, "entity_uuid")?,
        kind,
        container: container
            .as_deref()
            .map(|value| parse_uuid(value, "container_uuid"))
            .transpose()?,
        revision: from_sql_revision(revision)?,
        attributes,
    })
}

fn stored_revision(conn: &Connection, id: EntityId) -> GraphResult<u64> {
    let revision: i64 = conn.query_row(
        "SELECT revision FROM entities WHERE entity_uuid = ?1;",
        [id.to_string()],
        |row| row.get(0),
    )?;
    from_sql_revision(revision)
}

fn encode_attributes(attributes: &Attributes) -> GraphResult<String> {
    serde_json::to_string(attributes)
        .map_err(|err| GraphError::InvalidData(format!("attributes not serializable: {err}")))
}

fn to_sql_revision(revision: u64) -> GraphResult<i64> {
    i64::try_from(revision)
        .map_err(|_| GraphError::InvalidData(format!("revision {revision} out of range")))
}

fn from_sql_revision(revision: i64) -> GraphResult<u64> {
    u64::try_from(revision)
        .map_err(|_| GraphError::InvalidData(format!("negative revision {revision}")))
}

fn parse_uuid(value: &str, column: &'static str) -> GraphResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| GraphError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

fn ensure_graph_connection_ready(conn: &Connection) -> GraphResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(GraphError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    if !table_exists(conn, "entities")? {
        return Err(GraphError::MissingRequiredTable("entities"));
    }
    for column in ENTITY_COLUMNS {
        if !table_has_column(conn, "entities", column)? {
            return Err(GraphError::MissingRequiredColumn {
                table: "entities",
                column,
            });
        }
    }
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> GraphResult<bool> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1;",
            [table],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(exists.is_some())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> GraphResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}
