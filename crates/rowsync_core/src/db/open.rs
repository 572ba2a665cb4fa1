//! Connection bootstrap for the graph store.
//!
//! # Invariants
//! - Returned connections have migrations fully applied.
//! - Every open attempt logs one `graph_store_open` outcome with its duration.

use super::migrations::apply_migrations;
use super::{DbError, DbResult};
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

/// Opens (or creates) a graph store file and applies pending migrations.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    open_with("file", || Connection::open(path))
}

/// Opens a private in-memory graph store with the schema applied.
pub fn open_db_in_memory() -> DbResult<Connection> {
    open_with("memory", Connection::open_in_memory)
}

fn open_with(
    mode: &'static str,
    connect: impl FnOnce() -> rusqlite::Result<Connection>,
) -> DbResult<Connection> {
    let started_at = Instant::now();
    info!("event=graph_store_open module=db status=start mode={mode}");

    let mut conn = connect().map_err(|source| {
        error!(
            "event=graph_store_open module=db status=error mode={mode} duration_ms={} error_code=open_failed error={source}",
            started_at.elapsed().as_millis()
        );
        DbError::Open { mode, source }
    })?;

    if let Err(err) = bootstrap_connection(&mut conn) {
        error!(
            "event=graph_store_open module=db status=error mode={mode} duration_ms={} error_code=bootstrap_failed error={err}",
            started_at.elapsed().as_millis()
        );
        return Err(err);
    }

    info!(
        "event=graph_store_open module=db status=ok mode={mode} duration_ms={}",
        started_at.elapsed().as_millis()
    );
    Ok(conn)
}

fn bootstrap_connection(conn: &mut Connection) -> DbResult<()> {
    conn.busy_timeout(Duration::from_secs(5))?;
    apply_migrations(conn)
}
