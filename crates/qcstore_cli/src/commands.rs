//! Command handlers for the `qcstore` binary.
//!
//! # Responsibility
//! - Open the database and build the store service per invocation.
//! - Translate CLI arguments into core requests and core results into JSON.
//!
//! # Invariants
//! - Payload bytes are never printed; only metadata reaches stdout.

use crate::cli::{Cli, Commands, OwnerArgs};
use qcstore_core::db::migrations::{current_version, latest_version, migrate_to};
use qcstore_core::db::open_db_unmigrated;
use qcstore_core::{
    init_logging, open_db, run_backfill, CollisionPolicy, ConfigError, DbError, LogLevel,
    LoggingError, ModelError, QcFileCreate, QcFileError, QcFileListQuery, QcFileService,
    QcFileView, RepoError, SqliteQcFileRepository, StoreConfig,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Store(#[from] QcFileError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("failed to read `{}`: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write `{}`: {source}", path.display())]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Logging(#[from] LoggingError),
}

impl CliError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_invalid",
            Self::Db(_) => "db_failed",
            Self::Repo(_) => "storage_failed",
            Self::Store(err) => err.code(),
            Self::Model(ModelError::InvalidOwner { .. }) => "invalid_owner",
            Self::Model(_) => "invalid_request",
            Self::ReadFile { .. } => "read_failed",
            Self::WriteFile { .. } => "write_failed",
            Self::Json(_) => "encode_failed",
            Self::Logging(_) => "logging_failed",
        }
    }
}

/// JSON body plus whether the command found the store healthy.
#[derive(Debug)]
pub struct CommandOutput {
    pub body: Value,
    pub success: bool,
}

impl CommandOutput {
    fn ok(body: Value) -> Self {
        Self {
            body,
            success: true,
        }
    }
}

/// Starts file logging when `--log-dir` is given. `--log-level` is
/// checked even when logging stays off.
pub fn start_logging(cli: &Cli) -> Result<(), CliError> {
    let level = match cli.log_level.as_deref() {
        Some(level) => level.parse::<LogLevel>()?,
        None => LogLevel::for_build(),
    };
    if let Some(log_dir) = cli.log_dir.as_deref() {
        init_logging(level, log_dir)?;
    }
    Ok(())
}

/// File config first, then `QCSTORE_*` environment overrides.
pub fn load_config(path: Option<&Path>) -> Result<StoreConfig, CliError> {
    let base = match path {
        Some(path) => StoreConfig::load(path)?,
        None => StoreConfig::default(),
    };
    Ok(base.with_overrides(|key| std::env::var(key).ok())?)
}

pub fn run(cli: Cli) -> Result<CommandOutput, CliError> {
    let config = load_config(cli.config.as_deref())?;
    let db = cli.db;

    match cli.command {
        Commands::Migrate { target } => migrate(&db, target),
        Commands::Backfill => {
            let conn = open_db(&db)?;
            let report = run_backfill(&conn, config.checksum_algorithm)?;
            Ok(CommandOutput::ok(serde_json::to_value(report)?))
        }
        Commands::Put {
            owner,
            calc_type,
            level_id,
            ess_id,
            input,
            output,
            status,
            checksum,
            supersede,
        } => {
            let mut config = config;
            if supersede {
                config.collision_policy = CollisionPolicy::Supersede;
            }
            let reference = owner.to_ref();
            let (input_name, input_file) = read_payload(input.as_deref())?;
            let (output_name, output_file) = read_payload(output.as_deref())?;
            let request = QcFileCreate {
                species_id: reference.species_id,
                transition_state_id: reference.transition_state_id,
                np_species_id: reference.np_species_id,
                vdw_entry_id: reference.vdw_entry_id,
                calc_type,
                status,
                level_id,
                ess_id,
                input_name,
                output_name,
                input_file,
                output_file,
                checksum,
            };

            let conn = open_db(&db)?;
            let service = QcFileService::new(SqliteQcFileRepository::try_new(&conn)?, config);
            let outcome = service.propose_write(&request)?;
            let replaced_id = match &outcome {
                qcstore_core::WriteOutcome::Superseded { replaced_id, .. } => Some(*replaced_id),
                _ => None,
            };
            Ok(CommandOutput::ok(json!({
                "outcome": outcome.kind(),
                "record": QcFileView::from(outcome.record()),
                "replaced_id": replaced_id,
            })))
        }
        Commands::Get {
            id,
            input_out,
            output_out,
        } => {
            let conn = open_db(&db)?;
            let service = QcFileService::new(SqliteQcFileRepository::try_new(&conn)?, config);
            let record = service.require(id)?;

            let mut written = Vec::new();
            if input_out.is_some() || output_out.is_some() {
                let payloads = service.read_payloads(id)?;
                for (target, bytes) in [(input_out, payloads.input), (output_out, payloads.output)]
                {
                    if let (Some(path), Some(bytes)) = (target, bytes) {
                        std::fs::write(&path, bytes).map_err(|source| CliError::WriteFile {
                            path: path.clone(),
                            source,
                        })?;
                        written.push(path.display().to_string());
                    }
                }
            }

            Ok(CommandOutput::ok(json!({
                "record": QcFileView::from(&record),
                "written": written,
            })))
        }
        Commands::Verify { id } => {
            let conn = open_db(&db)?;
            let service = QcFileService::new(SqliteQcFileRepository::try_new(&conn)?, config);
            match id {
                Some(id) => {
                    let integrity = service.verify(id)?;
                    Ok(CommandOutput::ok(json!({ "id": id, "integrity": integrity })))
                }
                None => {
                    let report = service.verify_all()?;
                    let success = report.corrupt.is_empty();
                    Ok(CommandOutput {
                        body: serde_json::to_value(report)?,
                        success,
                    })
                }
            }
        }
        Commands::List {
            owner,
            calc_type,
            status,
            limit,
            offset,
        } => {
            let query = QcFileListQuery {
                owner: owner_filter(&owner)?,
                calc_type,
                status,
                limit,
                offset,
            };
            let conn = open_db(&db)?;
            let service = QcFileService::new(SqliteQcFileRepository::try_new(&conn)?, config);
            let views = service
                .list(&query)?
                .iter()
                .map(QcFileView::from)
                .collect::<Vec<_>>();
            Ok(CommandOutput::ok(serde_json::to_value(views)?))
        }
    }
}

fn migrate(db: &Path, target: Option<u32>) -> Result<CommandOutput, CliError> {
    let mut conn = open_db_unmigrated(db)?;
    let from_version = current_version(&conn)?;
    let to_version = target.unwrap_or_else(latest_version);
    migrate_to(&mut conn, to_version)?;
    Ok(CommandOutput::ok(json!({
        "from_version": from_version,
        "to_version": to_version,
    })))
}

fn owner_filter(owner: &OwnerArgs) -> Result<Option<qcstore_core::QcOwner>, CliError> {
    if owner.is_empty() {
        return Ok(None);
    }
    Ok(Some(owner.to_ref().resolve()?))
}

fn read_payload(path: Option<&Path>) -> Result<(Option<String>, Option<Vec<u8>>), CliError> {
    let Some(path) = path else {
        return Ok((None, None));
    };
    let bytes = std::fs::read(path).map_err(|source| CliError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned());
    Ok((name, Some(bytes)))
}

#[cfg(test)]
mod tests {
    use super::{run, start_logging, CliError};
    use crate::cli::Cli;
    use clap::Parser;
    use qcstore_core::{LoggingError, QcFileError};
    use std::path::Path;
    use tempfile::TempDir;

    fn invoke(db: &Path, args: &[&str]) -> Result<super::CommandOutput, CliError> {
        let mut argv = vec!["qcstore", "--db", db.to_str().unwrap()];
        argv.extend_from_slice(args);
        run(Cli::try_parse_from(argv).unwrap())
    }

    fn seeded_store(dir: &TempDir) -> std::path::PathBuf {
        let db = dir.path().join("store.db");
        let conn = qcstore_core::open_db(&db).unwrap();
        conn.execute_batch(
            "INSERT INTO level (id, method, basis) VALUES (1, 'wb97xd', 'def2-tzvp');
             INSERT INTO ess (id, name, version) VALUES (2, 'orca', '5.0.4');
             INSERT INTO species (id, label) VALUES (42, 'CH4');",
        )
        .unwrap();
        db
    }

    #[test]
    fn unknown_log_level_is_refused_without_log_dir() {
        let cli = Cli::try_parse_from(["qcstore", "--log-level", "verbose", "verify"]).unwrap();

        let err = start_logging(&cli).unwrap_err();
        assert_eq!(err.code(), "logging_failed");
        assert!(matches!(
            err,
            CliError::Logging(LoggingError::UnsupportedLevel(ref level)) if level == "verbose"
        ));
    }

    #[test]
    fn relative_log_dir_is_refused() {
        let cli = Cli::try_parse_from(["qcstore", "--log-dir", "logs", "verify"]).unwrap();

        match start_logging(&cli) {
            Err(CliError::Logging(LoggingError::RelativeDirectory(path))) => {
                assert_eq!(path, Path::new("logs"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn logging_stays_off_without_log_dir() {
        let cli = Cli::try_parse_from(["qcstore", "--log-level", "WARN", "verify"]).unwrap();
        start_logging(&cli).unwrap();
    }

    #[test]
    fn migrate_reports_versions_and_can_step_down() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("fresh.db");

        let up = invoke(&db, &["migrate"]).unwrap();
        assert_eq!(up.body["from_version"], 0);
        assert_eq!(up.body["to_version"], 3);

        let down = invoke(&db, &["migrate", "--to", "2"]).unwrap();
        assert_eq!(down.body["from_version"], 3);
        assert_eq!(down.body["to_version"], 2);
    }

    #[test]
    fn put_get_and_list_roundtrip_through_files() {
        let dir = TempDir::new().unwrap();
        let db = seeded_store(&dir);
        let output = dir.path().join("methane.out");
        std::fs::write(&output, b"ORCA output...").unwrap();

        let put = invoke(
            &db,
            &[
                "put",
                "--species",
                "42",
                "--calc-type",
                "opt",
                "--level",
                "1",
                "--ess",
                "2",
                "--output",
                output.to_str().unwrap(),
            ],
        )
        .unwrap();
        assert_eq!(put.body["outcome"], "created");
        assert_eq!(put.body["record"]["output_name"], "methane.out");
        assert_eq!(put.body["record"]["status"], "pending");
        let id = put.body["record"]["id"].as_i64().unwrap();

        let restored = dir.path().join("restored.out");
        let get = invoke(
            &db,
            &[
                "get",
                &id.to_string(),
                "--output-out",
                restored.to_str().unwrap(),
            ],
        )
        .unwrap();
        assert_eq!(get.body["written"].as_array().unwrap().len(), 1);
        assert_eq!(std::fs::read(&restored).unwrap(), b"ORCA output...");

        let list = invoke(&db, &["list", "--species", "42"]).unwrap();
        assert_eq!(list.body.as_array().unwrap().len(), 1);

        let verify = invoke(&db, &["verify"]).unwrap();
        assert!(verify.success);
        assert_eq!(verify.body["verified"], 1);
    }

    #[test]
    fn put_without_owner_is_rejected() {
        let dir = TempDir::new().unwrap();
        let db = seeded_store(&dir);

        let err = invoke(
            &db,
            &["put", "--calc-type", "sp", "--level", "1", "--ess", "2"],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CliError::Store(QcFileError::InvalidOwner { populated: 0 })
        ));
        assert_eq!(err.code(), "invalid_owner");
    }

    #[test]
    fn list_rejects_two_owner_filters() {
        let dir = TempDir::new().unwrap();
        let db = seeded_store(&dir);

        let err = invoke(&db, &["list", "--species", "1", "--vdw-entry", "1"]).unwrap_err();
        assert_eq!(err.code(), "invalid_owner");
    }
}
