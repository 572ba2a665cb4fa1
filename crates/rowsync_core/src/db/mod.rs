//! Graph store: SQLite files holding entity snapshots per scope.
//!
//! # Invariants
//! - Schema version is tracked via `PRAGMA user_version`.
//! - Graph accessors must not read entity rows before migrations succeed.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

/// Graph store bootstrap and schema errors.
#[derive(Debug)]
pub enum DbError {
    /// The store could not be opened at all (`mode` is `file` or `memory`).
    Open {
        mode: &'static str,
        source: rusqlite::Error,
    },
    /// One migration script failed; nothing of the batch was committed.
    Migration {
        version: u32,
        source: rusqlite::Error,
    },
    /// The store was written by a newer binary.
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    Sqlite(rusqlite::Error),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open { mode, source } => write!(f, "cannot open {mode} graph store: {source}"),
            Self::Migration { version, source } => {
                write!(f, "graph store migration v{version} failed: {source}")
            }
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "graph store schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::Sqlite(err) => write!(f, "graph store error: {err}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Open { source, .. } | Self::Migration { source, .. } => Some(source),
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
