//! Graph store migration registry.
//!
//! # Invariants
//! - `version` values are strictly increasing.
//! - All pending migrations commit in one transaction together with the
//!   final `PRAGMA user_version`.

use crate::db::{DbError, DbResult};
use log::info;
use rusqlite::Connection;

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: u32,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: include_str!("0001_entities.sql"),
    },
    Migration {
        version: 2,
        sql: include_str!("0002_container_index.sql"),
    },
];

/// Returns the latest schema version known by this binary.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

/// Reads `PRAGMA user_version`.
pub fn current_version(conn: &Connection) -> DbResult<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}

/// Applies every migration newer than the stored version.
///
/// # Errors
/// - `UnsupportedSchemaVersion` when the store is newer than this binary.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    let from = current_version(conn)?;
    let latest = latest_version();
    if from > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: from,
            latest_supported: latest,
        });
    }
    if from == latest {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for migration in MIGRATIONS.iter().filter(|migration| migration.version > from) {
        tx.execute_batch(migration.sql)
            .map_err(|source| DbError::Migration {
                version: migration.version,
                source,
            })?;
    }
    tx.execute_batch(&format!("PRAGMA user_version = {latest};"))?;
    tx.commit()?;

    info!("event=graph_store_migrate module=db status=ok from={from} to={latest}");
    Ok(())
}
