//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections.
//! - Configure connection pragmas the store relies on.
//! - Bring the schema to the latest version before returning, unless the
//!   caller explicitly asks for an unmigrated connection.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON`, which owner cascades and
//!   enum references depend on.
//! - Busy waits are bounded by the configured timeout.

use super::migrations::apply_migrations;
use super::DbResult;
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens a SQLite database file and applies all pending migrations.
///
/// # Side effects
/// - Emits `db_open` logging events with duration and status.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    open_with("file", true, || Connection::open(path))
}

/// Opens an in-memory SQLite database and applies all pending migrations.
pub fn open_db_in_memory() -> DbResult<Connection> {
    open_with("memory", true, Connection::open_in_memory)
}

/// Opens a SQLite database file without touching its schema version.
///
/// Used by tooling that drives `migrations::migrate_to` itself.
pub fn open_db_unmigrated(path: impl AsRef<Path>) -> DbResult<Connection> {
    open_with("file", false, || Connection::open(path))
}

/// Opens an empty in-memory database at schema version 0.
pub fn open_db_in_memory_unmigrated() -> DbResult<Connection> {
    open_with("memory", false, Connection::open_in_memory)
}

fn open_with(
    mode: &'static str,
    migrate: bool,
    opener: impl FnOnce() -> rusqlite::Result<Connection>,
) -> DbResult<Connection> {
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode={mode} migrate={migrate}");

    let mut conn = opener().map_err(|err| {
        error!(
            "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_open_failed error={err}",
            started_at.elapsed().as_millis()
        );
        err
    })?;

    match bootstrap_connection(&mut conn, migrate) {
        Ok(()) => {
            info!(
                "event=db_open module=db status=ok mode={mode} duration_ms={}",
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_bootstrap_failed error={err}",
                started_at.elapsed().as_millis()
            );
            Err(err)
        }
    }
}

fn bootstrap_connection(conn: &mut Connection, migrate: bool) -> DbResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    if migrate {
        apply_migrations(conn)?;
    }
    Ok(())
}
