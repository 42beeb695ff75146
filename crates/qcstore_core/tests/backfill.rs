use qcstore_core::db::migrations::migrate_to;
use qcstore_core::db::{open_db_in_memory, open_db_in_memory_unmigrated, DbError};
use qcstore_core::{
    run_backfill, BackfillReport, CalcType, Checksum, ChecksumAlgorithm, QcFileCreate,
    QcFileListQuery, QcFileRepository, QcFileService, QcFileStatus, QcOwner,
    SqliteQcFileRepository, StoreConfig,
};
use rusqlite::Connection;

fn registries(conn: &Connection) {
    conn.execute_batch(
        "INSERT INTO level (id, method, basis) VALUES (9, 'ccsd(t)-f12', 'cc-pvtz-f12');
         INSERT INTO ess (id, name, version) VALUES (3, 'molpro', '2022.3');",
    )
    .unwrap();
}

fn records_for(conn: &Connection, owner: QcOwner) -> Vec<qcstore_core::QcFile> {
    let repo = SqliteQcFileRepository::try_new(conn).unwrap();
    repo.list_qc_files(&QcFileListQuery {
        owner: Some(owner),
        ..QcFileListQuery::default()
    })
    .unwrap()
}

#[test]
fn legacy_species_columns_become_placeholder_records() {
    let conn = open_db_in_memory().unwrap();
    registries(&conn);
    conn.execute_batch(
        "INSERT INTO species (id, label, opt_ess_id, opt_level_id) VALUES (7, 'H2O', 3, 9);",
    )
    .unwrap();

    let report = run_backfill(&conn, ChecksumAlgorithm::Sha256).unwrap();
    assert_eq!(
        report,
        BackfillReport {
            inserted: 1,
            skipped: 0,
            failed: 0
        }
    );

    let records = records_for(&conn, QcOwner::Species(7));
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.calc_type, CalcType::Opt);
    assert_eq!(record.status, QcFileStatus::Ok);
    assert_eq!(record.ess_id, 3);
    assert_eq!(record.level_id, 9);
    assert!(record.payloads.is_empty());
    assert!(record.payloads.compressed);
    assert_eq!(
        record.checksum,
        Checksum::placeholder(QcOwner::Species(7), CalcType::Opt, ChecksumAlgorithm::Sha256)
    );

    let legacy: (i64, i64) = conn
        .query_row(
            "SELECT opt_ess_id, opt_level_id FROM species WHERE id = 7;",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(legacy, (3, 9));
}

#[test]
fn rerunning_backfill_inserts_nothing() {
    let conn = open_db_in_memory().unwrap();
    registries(&conn);
    conn.execute_batch(
        "INSERT INTO species (id, opt_ess_id, opt_level_id, sp_ess_id, sp_level_id)
         VALUES (7, 3, 9, 3, 9);",
    )
    .unwrap();

    let first = run_backfill(&conn, ChecksumAlgorithm::Sha256).unwrap();
    assert_eq!(first.inserted, 2);

    let second = run_backfill(&conn, ChecksumAlgorithm::Sha256).unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.skipped, 2);
    assert_eq!(records_for(&conn, QcOwner::Species(7)).len(), 2);
}

#[test]
fn uploaded_slots_are_left_alone() {
    let conn = open_db_in_memory().unwrap();
    registries(&conn);
    conn.execute_batch(
        "INSERT INTO species (id, opt_ess_id, opt_level_id) VALUES (7, 3, 9);",
    )
    .unwrap();
    let service = QcFileService::new(
        SqliteQcFileRepository::try_new(&conn).unwrap(),
        StoreConfig::default(),
    );
    let uploaded = service
        .propose_write(
            &QcFileCreate::new(QcOwner::Species(7), CalcType::Opt, 9, 3)
                .with_output("h2o.out", b"Molpro output".to_vec()),
        )
        .unwrap()
        .into_record();

    let report = run_backfill(&conn, ChecksumAlgorithm::Sha256).unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.inserted, 0);

    let records = records_for(&conn, QcOwner::Species(7));
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].checksum, uploaded.checksum);
}

#[test]
fn transition_state_columns_are_covered() {
    let conn = open_db_in_memory().unwrap();
    registries(&conn);
    conn.execute_batch(
        "INSERT INTO species (id, freq_ess_id, freq_level_id) VALUES (4, 3, 9);
         INSERT INTO transition_state (id, label, freq_ess_id, freq_level_id)
         VALUES (4, 'TS1', 3, 9);",
    )
    .unwrap();

    let report = run_backfill(&conn, ChecksumAlgorithm::Sha256).unwrap();
    assert_eq!(report.inserted, 2);

    let ts = records_for(&conn, QcOwner::TransitionState(4));
    assert_eq!(ts.len(), 1);
    assert_eq!(ts[0].calc_type, CalcType::Freq);
    let species = records_for(&conn, QcOwner::Species(4));
    assert_ne!(ts[0].checksum, species[0].checksum);
}

#[test]
fn broken_legacy_rows_are_counted_and_skipped() {
    let conn = open_db_in_memory().unwrap();
    registries(&conn);
    conn.execute_batch(
        "PRAGMA foreign_keys = OFF;
         INSERT INTO species (id, opt_ess_id, opt_level_id) VALUES (7, 3, 9);
         INSERT INTO species (id, opt_ess_id, opt_level_id) VALUES (8, 77, 9);
         INSERT INTO species (id, irc_ess_id, irc_level_id) VALUES (9, 'orca', 9);
         PRAGMA foreign_keys = ON;",
    )
    .unwrap();

    let report = run_backfill(&conn, ChecksumAlgorithm::Sha256).unwrap();
    assert_eq!(
        report,
        BackfillReport {
            inserted: 1,
            skipped: 0,
            failed: 2
        }
    );
    assert!(records_for(&conn, QcOwner::Species(8)).is_empty());
    assert!(records_for(&conn, QcOwner::Species(9)).is_empty());
}

#[test]
fn backfill_requires_the_latest_schema() {
    let mut conn = open_db_in_memory_unmigrated().unwrap();
    migrate_to(&mut conn, 2).unwrap();

    let err = run_backfill(&conn, ChecksumAlgorithm::Sha256).unwrap_err();
    assert!(matches!(
        err,
        DbError::SchemaNotReady {
            expected_version: 3,
            actual_version: 2
        }
    ));
}

#[test]
fn schema_upgrade_runs_the_backfill() {
    let mut conn = open_db_in_memory_unmigrated().unwrap();
    migrate_to(&mut conn, 2).unwrap();
    registries(&conn);
    conn.execute_batch(
        "INSERT INTO species (id, label, opt_ess_id, opt_level_id) VALUES (7, 'H2O', 3, 9);",
    )
    .unwrap();

    migrate_to(&mut conn, 3).unwrap();

    assert_eq!(records_for(&conn, QcOwner::Species(7)).len(), 1);
}
