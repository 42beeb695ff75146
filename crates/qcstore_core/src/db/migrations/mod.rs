//! SQLite migration registry and executor.
//!
//! # Responsibility
//! - Register schema migrations in strictly increasing order.
//! - Apply pending migrations, or revert applied ones, atomically.
//!
//! # Invariants
//! - `version` values must remain monotonic.
//! - Applied migration version is mirrored to `PRAGMA user_version`.
//! - A migration's `down` steps undo structure only where its `up` steps
//!   created data that must survive (version 3 keeps backfilled rows).

use crate::codec::ChecksumAlgorithm;
use crate::db::backfill::backfill_legacy_columns;
use crate::db::{DbError, DbResult};
use crate::model::qc_file::{CalcType, Checksum, OwnerKind, QcFileStatus};
use log::info;
use rusqlite::{Connection, OptionalExtension};
use std::str::FromStr;

#[derive(Clone, Copy)]
enum Step {
    Sql(&'static str),
    Hook(fn(&Connection) -> DbResult<()>),
}

#[derive(Clone, Copy)]
struct Migration {
    version: u32,
    name: &'static str,
    up: &'static [Step],
    down: &'static [Step],
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "registries",
        up: &[Step::Sql(include_str!("0001_registries.sql"))],
        down: &[Step::Sql(include_str!("0001_registries.down.sql"))],
    },
    Migration {
        version: 2,
        name: "qc_file",
        up: &[Step::Sql(include_str!("0002_qc_file.sql"))],
        down: &[Step::Sql(include_str!("0002_qc_file.down.sql"))],
    },
    Migration {
        version: 3,
        name: "qc_file_strict",
        up: &[
            Step::Sql(include_str!("0003_qc_file_enums.sql")),
            Step::Hook(check_legacy_values),
            Step::Sql(include_str!("0003_qc_file_strict.sql")),
            Step::Hook(run_initial_backfill),
        ],
        down: &[Step::Sql(include_str!("0003_qc_file_strict.down.sql"))],
    },
];

/// Returns the latest migration version known by this binary.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

/// Returns the schema version recorded in the database.
pub fn current_version(conn: &Connection) -> DbResult<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}

/// Applies all pending migrations on the provided connection.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    migrate_to(conn, latest_version())
}

/// Moves the schema to `target`, upgrading or downgrading as needed.
///
/// All steps run in one transaction; on error nothing is applied.
///
/// # Errors
/// - `UnknownTargetVersion` when `target` is newer than this binary.
/// - `UnsupportedSchemaVersion` when the database is newer than this binary.
/// - `InvalidLegacyValue` when existing rows cannot be converted.
pub fn migrate_to(conn: &mut Connection, target: u32) -> DbResult<()> {
    let current = current_version(conn)?;
    let latest = latest_version();

    if target > latest {
        return Err(DbError::UnknownTargetVersion {
            requested: target,
            latest_supported: latest,
        });
    }
    if current > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: current,
            latest_supported: latest,
        });
    }
    if current == target {
        return Ok(());
    }

    let tx = conn.transaction()?;
    if current < target {
        for migration in MIGRATIONS
            .iter()
            .filter(|migration| migration.version > current && migration.version <= target)
        {
            run_steps(&tx, migration.up)?;
            set_user_version(&tx, migration.version)?;
            info!(
                "event=db_migrate module=db status=ok direction=up version={} name={}",
                migration.version, migration.name
            );
        }
    } else {
        for migration in MIGRATIONS
            .iter()
            .rev()
            .filter(|migration| migration.version <= current && migration.version > target)
        {
            run_steps(&tx, migration.down)?;
            set_user_version(&tx, migration.version - 1)?;
            info!(
                "event=db_migrate module=db status=ok direction=down version={} name={}",
                migration.version, migration.name
            );
        }
    }
    tx.commit()?;

    Ok(())
}

fn run_steps(conn: &Connection, steps: &[Step]) -> DbResult<()> {
    for step in steps {
        match step {
            Step::Sql(sql) => conn.execute_batch(sql)?,
            Step::Hook(hook) => hook(conn)?,
        }
    }
    Ok(())
}

fn set_user_version(conn: &Connection, version: u32) -> DbResult<()> {
    conn.execute_batch(&format!("PRAGMA user_version = {version};"))?;
    Ok(())
}

/// Refuses the strict rebuild when existing rows cannot satisfy it.
fn check_legacy_values(conn: &Connection) -> DbResult<()> {
    ensure_parses(conn, "calc_type", |value| CalcType::from_str(value).is_ok())?;
    ensure_parses(conn, "status", |value| QcFileStatus::from_str(value).is_ok())?;
    ensure_parses(conn, "checksum", |value| Checksum::parse(value).is_ok())?;

    let mut stmt = conn.prepare(
        "SELECT id
         FROM qc_file
         WHERE (species_id IS NOT NULL)
             + (transition_state_id IS NOT NULL)
             + (np_species_id IS NOT NULL)
             + (vdw_entry_id IS NOT NULL) <> 1
         ORDER BY id
         LIMIT 1;",
    )?;
    let mut rows = stmt.query([])?;
    if let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        return Err(DbError::InvalidLegacyValue {
            column: "owner",
            value: format!("row {id} does not reference exactly one owner"),
        });
    }

    let duplicate_checksum: Option<String> = conn
        .query_row(
            "SELECT lower(trim(checksum))
             FROM qc_file
             GROUP BY 1
             HAVING count(*) > 1
             ORDER BY 1
             LIMIT 1;",
            [],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(checksum) = duplicate_checksum {
        return Err(DbError::InvalidLegacyValue {
            column: "checksum",
            value: format!("{checksum} is stored by more than one row"),
        });
    }

    for kind in OwnerKind::ALL {
        ensure_single_slot_occupant(conn, kind)?;
    }

    Ok(())
}

fn ensure_single_slot_occupant(conn: &Connection, kind: OwnerKind) -> DbResult<()> {
    let column = kind.column();
    let duplicate: Option<(i64, String)> = conn
        .query_row(
            &format!(
                "SELECT {column}, lower(trim(calc_type))
                 FROM qc_file
                 WHERE {column} IS NOT NULL
                 GROUP BY 1, 2
                 HAVING count(*) > 1
                 ORDER BY 1, 2
                 LIMIT 1;"
            ),
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    match duplicate {
        Some((owner_id, calc_type)) => Err(DbError::InvalidLegacyValue {
            column,
            value: format!(
                "{} {owner_id} has more than one {calc_type} row",
                kind.label()
            ),
        }),
        None => Ok(()),
    }
}

fn ensure_parses(
    conn: &Connection,
    column: &'static str,
    accepts: impl Fn(&str) -> bool,
) -> DbResult<()> {
    let mut stmt = conn.prepare(&format!(
        "SELECT DISTINCT lower(trim({column})) FROM qc_file;"
    ))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let value: String = row.get(0)?;
        if !accepts(&value) {
            return Err(DbError::InvalidLegacyValue { column, value });
        }
    }
    Ok(())
}

fn run_initial_backfill(conn: &Connection) -> DbResult<()> {
    backfill_legacy_columns(conn, ChecksumAlgorithm::default())?;
    Ok(())
}
