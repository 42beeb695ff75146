//! Core domain logic for the QC file store.
//! This crate is the single source of truth for QC file invariants.

pub mod codec;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use codec::{ChecksumAlgorithm, CodecError};
pub use config::{CollisionPolicy, CompressionConfig, ConfigError, StoreConfig};
pub use db::backfill::{run_backfill, BackfillReport};
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use logging::{flush_logs, init_logging, LogLevel, LoggingError};
pub use model::qc_file::{
    CalcType, Checksum, ModelError, OwnerKind, OwnerRef, QcFile, QcFileId, QcFileStatus, QcOwner,
};
pub use model::schema::{DecodedPayloads, PayloadUpload, QcFileCreate, QcFileView};
pub use repo::qc_file_repo::{
    QcFileListQuery, QcFileRepository, RepoError, RepoResult, SqliteQcFileRepository,
};
pub use service::qc_file_service::{
    Integrity, QcFileError, QcFileResult, QcFileService, VerifyReport, WriteOutcome,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
