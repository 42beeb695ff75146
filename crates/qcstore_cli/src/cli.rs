//! Command-line surface of the `qcstore` binary.

use clap::{Args, Parser, Subcommand};
use qcstore_core::{CalcType, OwnerRef, QcFileStatus};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "qcstore", version, about = "Quantum chemistry file store", long_about = None)]
pub struct Cli {
    /// SQLite database file
    #[arg(long, global = true, default_value = "qcstore.db")]
    pub db: PathBuf,

    /// JSON store config; `QCSTORE_*` environment variables override it
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Absolute directory for rolling log files; logging is off when omitted
    #[arg(long = "log-dir", global = true)]
    pub log_dir: Option<PathBuf>,

    /// trace|debug|info|warn|error
    #[arg(long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Exactly one owner for writes; at most one for list filters.
#[derive(Args, Debug, Clone, Default)]
pub struct OwnerArgs {
    #[arg(long = "species")]
    pub species_id: Option<i64>,
    #[arg(long = "transition-state")]
    pub transition_state_id: Option<i64>,
    #[arg(long = "np-species")]
    pub np_species_id: Option<i64>,
    #[arg(long = "vdw-entry")]
    pub vdw_entry_id: Option<i64>,
}

impl OwnerArgs {
    pub fn to_ref(&self) -> OwnerRef {
        OwnerRef {
            species_id: self.species_id,
            transition_state_id: self.transition_state_id,
            np_species_id: self.np_species_id,
            vdw_entry_id: self.vdw_entry_id,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_ref() == OwnerRef::default()
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Move the schema to the latest (or a given) version
    Migrate {
        /// target schema version; downgrades keep stored records
        #[arg(long = "to")]
        target: Option<u32>,
    },

    /// Create records from legacy per-calc-type owner columns
    Backfill,

    /// Store one QC file
    Put {
        #[command(flatten)]
        owner: OwnerArgs,
        #[arg(long = "calc-type")]
        calc_type: CalcType,
        #[arg(long = "level")]
        level_id: i64,
        #[arg(long = "ess")]
        ess_id: i64,
        /// input deck on disk; its file name is recorded
        #[arg(long)]
        input: Option<PathBuf>,
        /// program output on disk; its file name is recorded
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        status: Option<QcFileStatus>,
        /// digest computed by the uploader, verified before storing
        #[arg(long)]
        checksum: Option<String>,
        /// replace an existing record for the same owner and calc type
        #[arg(long)]
        supersede: bool,
    },

    /// Show one record, optionally writing its payloads to disk
    Get {
        id: i64,
        #[arg(long = "input-out")]
        input_out: Option<PathBuf>,
        #[arg(long = "output-out")]
        output_out: Option<PathBuf>,
    },

    /// Verify one record, or every record when no id is given
    Verify { id: Option<i64> },

    /// List record metadata
    List {
        #[command(flatten)]
        owner: OwnerArgs,
        #[arg(long = "calc-type")]
        calc_type: Option<CalcType>,
        #[arg(long)]
        status: Option<QcFileStatus>,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::{Cli, Commands};
    use clap::Parser;
    use qcstore_core::{CalcType, QcFileStatus};

    #[test]
    fn put_parses_owner_and_enums() {
        let cli = Cli::try_parse_from([
            "qcstore",
            "--db",
            "/tmp/store.db",
            "put",
            "--species",
            "42",
            "--calc-type",
            "opt",
            "--level",
            "1",
            "--ess",
            "2",
            "--status",
            "ok",
            "--supersede",
        ])
        .unwrap();

        assert_eq!(cli.db.to_str(), Some("/tmp/store.db"));
        match cli.command {
            Commands::Put {
                owner,
                calc_type,
                status,
                supersede,
                ..
            } => {
                assert_eq!(owner.species_id, Some(42));
                assert!(owner.transition_state_id.is_none());
                assert_eq!(calc_type, CalcType::Opt);
                assert_eq!(status, Some(QcFileStatus::Ok));
                assert!(supersede);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn put_rejects_unknown_calc_type() {
        let result = Cli::try_parse_from([
            "qcstore",
            "put",
            "--species",
            "1",
            "--calc-type",
            "md",
            "--level",
            "1",
            "--ess",
            "1",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::try_parse_from(["qcstore", "verify", "--db", "a.db", "--log-level", "debug"])
            .unwrap();
        assert_eq!(cli.db.to_str(), Some("a.db"));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(matches!(cli.command, Commands::Verify { id: None }));
    }

    #[test]
    fn migrate_accepts_target_version() {
        let cli = Cli::try_parse_from(["qcstore", "migrate", "--to", "2"]).unwrap();
        assert!(matches!(cli.command, Commands::Migrate { target: Some(2) }));
    }

    #[test]
    fn list_owner_filter_is_optional() {
        let cli = Cli::try_parse_from(["qcstore", "list", "--calc-type", "freq"]).unwrap();
        match cli.command {
            Commands::List { owner, calc_type, .. } => {
                assert!(owner.is_empty());
                assert_eq!(calc_type, Some(CalcType::Freq));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
