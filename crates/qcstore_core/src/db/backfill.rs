//! Backfill of `qc_file` rows from legacy per-calc-type columns.
//!
//! # Responsibility
//! - Read the `<calc>_ess_id` / `<calc>_level_id` column pairs hung off
//!   owner tables and synthesize one `qc_file` row per populated pair.
//!
//! # Invariants
//! - Re-running inserts nothing for slots that already have a record.
//! - Legacy columns are only read, never updated or cleared.
//! - A malformed legacy row is logged and skipped; it never aborts the run.

use crate::codec::ChecksumAlgorithm;
use crate::db::migrations::{current_version, latest_version};
use crate::db::{DbError, DbResult};
use crate::model::qc_file::{CalcType, Checksum, OwnerKind, QcOwner};
use log::{info, warn};
use rusqlite::types::Value;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::time::Instant;

/// Owner table carrying legacy calc-type columns.
struct LegacySource {
    table: &'static str,
    owner_kind: OwnerKind,
    calc_types: &'static [CalcType],
}

// Identifiers below are interpolated into SQL; keep them static.
const LEGACY_SOURCES: &[LegacySource] = &[
    LegacySource {
        table: "species",
        owner_kind: OwnerKind::Species,
        calc_types: &CalcType::ALL,
    },
    LegacySource {
        table: "transition_state",
        owner_kind: OwnerKind::TransitionState,
        calc_types: &[CalcType::Opt, CalcType::Freq, CalcType::Sp],
    },
];

/// Counters describing one backfill run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    /// Records created by this run.
    pub inserted: u64,
    /// Legacy pairs whose slot already had a record.
    pub skipped: u64,
    /// Legacy pairs that could not be converted.
    pub failed: u64,
}

/// Runs the backfill against a fully migrated database.
///
/// Safe to interrupt and re-run.
///
/// # Errors
/// - `SchemaNotReady` when the schema is not at the latest version.
pub fn run_backfill(conn: &Connection, algorithm: ChecksumAlgorithm) -> DbResult<BackfillReport> {
    let expected_version = latest_version();
    let actual_version = current_version(conn)?;
    if actual_version != expected_version {
        return Err(DbError::SchemaNotReady {
            expected_version,
            actual_version,
        });
    }

    backfill_legacy_columns(conn, algorithm)
}

pub(crate) fn backfill_legacy_columns(
    conn: &Connection,
    algorithm: ChecksumAlgorithm,
) -> DbResult<BackfillReport> {
    let started_at = Instant::now();
    info!(
        "event=qc_backfill module=db status=start algorithm={}",
        algorithm.as_str()
    );

    let mut report = BackfillReport::default();
    for source in LEGACY_SOURCES {
        for &calc_type in source.calc_types {
            backfill_column_pair(conn, source, calc_type, algorithm, &mut report)?;
        }
    }

    info!(
        "event=qc_backfill module=db status=ok inserted={} skipped={} failed={} duration_ms={}",
        report.inserted,
        report.skipped,
        report.failed,
        started_at.elapsed().as_millis()
    );
    Ok(report)
}

struct LegacyRow {
    owner_id: i64,
    ess: Value,
    level: Value,
    occupied: bool,
}

fn backfill_column_pair(
    conn: &Connection,
    source: &LegacySource,
    calc_type: CalcType,
    algorithm: ChecksumAlgorithm,
    report: &mut BackfillReport,
) -> DbResult<()> {
    let table = source.table;
    let owner_column = source.owner_kind.column();
    let ess_column = format!("{calc_type}_ess_id");
    let level_column = format!("{calc_type}_level_id");

    let mut stmt = conn.prepare(&format!(
        "SELECT
            s.id,
            s.{ess_column},
            s.{level_column},
            EXISTS(
                SELECT 1 FROM qc_file q
                WHERE q.{owner_column} = s.id AND q.calc_type = ?1
            )
         FROM {table} s
         WHERE s.{ess_column} IS NOT NULL
           AND s.{level_column} IS NOT NULL
         ORDER BY s.id;"
    ))?;
    let rows = stmt
        .query_map([calc_type.as_str()], |row| {
            Ok(LegacyRow {
                owner_id: row.get(0)?,
                ess: row.get(1)?,
                level: row.get(2)?,
                occupied: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let insert_sql = format!(
        "INSERT INTO qc_file (
            {owner_column},
            calc_type,
            status,
            level_id,
            ess_id,
            compressed,
            checksum
        ) VALUES (?1, ?2, 'ok', ?3, ?4, 1, ?5);"
    );

    for row in rows {
        if row.occupied {
            report.skipped += 1;
            continue;
        }

        let (Value::Integer(ess_id), Value::Integer(level_id)) = (&row.ess, &row.level) else {
            warn!(
                "event=qc_backfill_row module=db status=skipped table={table} owner_id={} calc_type={calc_type} error_code=non_integer_reference",
                row.owner_id
            );
            report.failed += 1;
            continue;
        };

        let owner = QcOwner::new(source.owner_kind, row.owner_id);
        let checksum = Checksum::placeholder(owner, calc_type, algorithm);
        match conn.execute(
            &insert_sql,
            params![
                row.owner_id,
                calc_type.as_str(),
                level_id,
                ess_id,
                checksum.as_str()
            ],
        ) {
            Ok(_) => report.inserted += 1,
            Err(err) => {
                warn!(
                    "event=qc_backfill_row module=db status=skipped table={table} owner_id={} calc_type={calc_type} error_code=insert_failed error={err}",
                    row.owner_id
                );
                report.failed += 1;
            }
        }
    }

    Ok(())
}
