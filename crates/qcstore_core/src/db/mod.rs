//! SQLite storage bootstrap, schema migrations and legacy backfill.
//!
//! # Responsibility
//! - Open and configure SQLite connections for the QC file store.
//! - Move the schema up or down through registered migrations.
//! - Reconcile legacy per-calc-type columns into `qc_file` rows.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - Core code must not read/write `qc_file` before migrations succeed.
//! - Downgrades never delete `qc_file` rows created by the backfill.

use thiserror::Error;

pub mod backfill;
pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory, open_db_in_memory_unmigrated, open_db_unmigrated};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error("database schema version {db_version} is newer than supported {latest_supported}")]
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    #[error("unknown target schema version {requested}; latest supported is {latest_supported}")]
    UnknownTargetVersion {
        requested: u32,
        latest_supported: u32,
    },
    #[error("schema version {actual_version} is not ready; expected {expected_version}")]
    SchemaNotReady {
        expected_version: u32,
        actual_version: u32,
    },
    #[error("cannot convert legacy value `{value}` in qc_file.{column}")]
    InvalidLegacyValue { column: &'static str, value: String },
}
