//! QC file use-case service.
//!
//! # Responsibility
//! - Resolve ownership and slot conflicts before a record is committed.
//! - Checksum and encode payloads according to `StoreConfig`.
//! - Decode and re-verify payloads on read-back.
//!
//! # Invariants
//! - Every write runs inside one repository atomic scope.
//! - Checksums are computed over raw bytes, before compression.
//! - Read paths never return bytes that fail decoding or verification.
//! - A slot conflict is resolved only by the configured policy; there is no
//!   silent overwrite.

use crate::codec::{self, CodecError};
use crate::config::{CollisionPolicy, StoreConfig};
use crate::model::qc_file::{
    validate_file_name, CalcType, Checksum, EncodedPayloads, ModelError, QcFile, QcFileDraft,
    QcFileId, QcFileStatus, QcOwner,
};
use crate::model::schema::{DecodedPayloads, PayloadUpload, QcFileCreate};
use crate::repo::qc_file_repo::{QcFileListQuery, QcFileRepository, RepoError};
use log::{info, warn};
use serde::Serialize;
use std::time::Instant;
use thiserror::Error;

const VERIFY_PAGE_SIZE: u32 = 64;

pub type QcFileResult<T> = Result<T, QcFileError>;

/// Errors surfaced to QC file callers.
#[derive(Debug, Error)]
pub enum QcFileError {
    /// Zero or several owner references were supplied.
    #[error("exactly one owner reference is required, got {populated}")]
    InvalidOwner { populated: usize },
    /// The owner already has a record for this calc type.
    #[error("{owner} already has a {calc_type} file (record {existing_id})")]
    DuplicateSlot {
        owner: QcOwner,
        calc_type: CalcType,
        existing_id: QcFileId,
    },
    /// The content is already stored for another owner or calc type.
    #[error("checksum {checksum} is already stored by record {existing_id}")]
    ChecksumCollision {
        checksum: Checksum,
        existing_id: QcFileId,
    },
    /// Stored or uploaded bytes failed decoding or checksum verification.
    #[error("corrupt payload: {0}")]
    CorruptPayload(String),
    #[error("invalid request: {0}")]
    InvalidRequest(ModelError),
    #[error("qc file not found: {0}")]
    NotFound(QcFileId),
    #[error(transparent)]
    Codec(CodecError),
    #[error(transparent)]
    Repo(RepoError),
}

impl QcFileError {
    /// Stable identifier used in log lines and CLI output.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidOwner { .. } => "invalid_owner",
            Self::DuplicateSlot { .. } => "duplicate_slot",
            Self::ChecksumCollision { .. } => "checksum_collision",
            Self::CorruptPayload(_) => "corrupt_payload",
            Self::InvalidRequest(_) => "invalid_request",
            Self::NotFound(_) => "not_found",
            Self::Codec(_) => "codec_failed",
            Self::Repo(_) => "storage_failed",
        }
    }
}

impl From<ModelError> for QcFileError {
    fn from(value: ModelError) -> Self {
        match value {
            ModelError::InvalidOwner { populated } => Self::InvalidOwner { populated },
            other => Self::InvalidRequest(other),
        }
    }
}

impl From<RepoError> for QcFileError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::DuplicateSlot {
                owner,
                calc_type,
                existing_id,
            } => Self::DuplicateSlot {
                owner,
                calc_type,
                existing_id,
            },
            RepoError::ChecksumCollision {
                checksum,
                existing_id,
            } => Self::ChecksumCollision {
                checksum,
                existing_id,
            },
            RepoError::NotFound(id) => Self::NotFound(id),
            RepoError::Validation(err) => err.into(),
            other => Self::Repo(other),
        }
    }
}

impl From<CodecError> for QcFileError {
    fn from(value: CodecError) -> Self {
        match value {
            CodecError::CorruptPayload(details) => Self::CorruptPayload(details),
            other => Self::Codec(other),
        }
    }
}

/// Result of a successful `propose_write`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// A new record now occupies a previously free slot.
    Created(QcFile),
    /// Identical content was already stored for the same slot.
    Unchanged(QcFile),
    /// The previous occupant was removed and replaced.
    Superseded { record: QcFile, replaced_id: QcFileId },
}

impl WriteOutcome {
    pub fn record(&self) -> &QcFile {
        match self {
            Self::Created(record) | Self::Unchanged(record) => record,
            Self::Superseded { record, .. } => record,
        }
    }

    pub fn into_record(self) -> QcFile {
        match self {
            Self::Created(record) | Self::Unchanged(record) => record,
            Self::Superseded { record, .. } => record,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Created(_) => "created",
            Self::Unchanged(_) => "unchanged",
            Self::Superseded { .. } => "superseded",
        }
    }
}

/// Integrity state of one stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Integrity {
    /// Payloads decode and hash to the stored checksum.
    Verified,
    /// No payloads are stored; the checksum is a placeholder.
    Unverifiable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorruptRecord {
    pub id: QcFileId,
    pub reason: String,
}

/// Summary of an integrity sweep over all records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub checked: u64,
    pub verified: u64,
    pub unverifiable: u64,
    pub corrupt: Vec<CorruptRecord>,
}

/// Use-case service for QC file storage.
pub struct QcFileService<R: QcFileRepository> {
    repo: R,
    config: StoreConfig,
}

impl<R: QcFileRepository> QcFileService<R> {
    /// Creates a service using the provided repository implementation.
    pub fn new(repo: R, config: StoreConfig) -> Self {
        Self { repo, config }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Validates and stores one QC file.
    ///
    /// # Contract
    /// - Owner must resolve to exactly one kind, else `InvalidOwner`.
    /// - A declared checksum must match the received bytes, else
    ///   `CorruptPayload`.
    /// - Content already stored for the same slot, on the same payload
    ///   sides, returns `Unchanged`. The stored metadata is kept; differing
    ///   status, level, ess or names in the request are ignored and logged.
    /// - Content stored for another slot fails with `ChecksumCollision`.
    /// - An occupied slot fails with `DuplicateSlot` under
    ///   `RejectDuplicate`, or is replaced under `Supersede`.
    pub fn propose_write(&self, request: &QcFileCreate) -> QcFileResult<WriteOutcome> {
        let started_at = Instant::now();
        let owner = request.owner_ref().resolve()?;
        let calc_type = request.calc_type;
        validate_file_name("input_name", request.input_name.as_deref())?;
        validate_file_name("output_name", request.output_name.as_deref())?;

        let (checksum, payloads) = self.prepare_content(
            owner,
            calc_type,
            request.input_file.as_deref(),
            request.output_file.as_deref(),
            request.checksum.as_deref(),
        )?;
        let draft = QcFileDraft {
            owner,
            calc_type,
            status: request.status.unwrap_or_default(),
            level_id: request.level_id,
            ess_id: request.ess_id,
            input_name: request.input_name.clone(),
            output_name: request.output_name.clone(),
            payloads,
            checksum,
        };
        let policy = self.config.collision_policy;

        let result = self.repo.atomically(|repo| -> QcFileResult<WriteOutcome> {
            if let Some(existing) = repo.find_by_checksum(&draft.checksum)? {
                if !existing.occupies(owner, calc_type) {
                    return Err(QcFileError::ChecksumCollision {
                        checksum: draft.checksum.clone(),
                        existing_id: existing.id,
                    });
                }
                // One payload hashes alike on either side; a side swap goes
                // through the slot policy.
                if same_payload_sides(&existing.payloads, &draft.payloads) {
                    return Ok(WriteOutcome::Unchanged(existing));
                }
            }

            let Some(prior) = repo.find_by_slot(owner, calc_type)? else {
                return Ok(WriteOutcome::Created(repo.insert_qc_file(&draft)?));
            };

            match policy {
                CollisionPolicy::RejectDuplicate => Err(QcFileError::DuplicateSlot {
                    owner,
                    calc_type,
                    existing_id: prior.id,
                }),
                CollisionPolicy::Supersede => {
                    repo.delete_qc_file(prior.id)?;
                    let record = repo.insert_qc_file(&draft)?;
                    Ok(WriteOutcome::Superseded {
                        record,
                        replaced_id: prior.id,
                    })
                }
            }
        });

        match &result {
            Ok(outcome) => info!(
                "event=qc_file_write module=service status=ok outcome={} id={} owner={owner} calc_type={calc_type} policy={} metadata_ignored={} duration_ms={}",
                outcome.kind(),
                outcome.record().id,
                policy.as_str(),
                matches!(outcome, WriteOutcome::Unchanged(existing) if !same_metadata(existing, &draft)),
                started_at.elapsed().as_millis()
            ),
            Err(err) => warn!(
                "event=qc_file_write module=service status=error owner={owner} calc_type={calc_type} policy={} duration_ms={} error_code={}",
                policy.as_str(),
                started_at.elapsed().as_millis(),
                err.code()
            ),
        }
        result
    }

    /// Gets one record's metadata and stored (encoded) payloads.
    pub fn get(&self, id: QcFileId) -> QcFileResult<Option<QcFile>> {
        Ok(self.repo.get_qc_file(id)?)
    }

    /// Gets one record or fails with `NotFound`.
    pub fn require(&self, id: QcFileId) -> QcFileResult<QcFile> {
        self.repo.get_qc_file(id)?.ok_or(QcFileError::NotFound(id))
    }

    pub fn list(&self, query: &QcFileListQuery) -> QcFileResult<Vec<QcFile>> {
        Ok(self.repo.list_qc_files(query)?)
    }

    /// Lists every record owned by `owner`, ordered by id.
    pub fn list_for_owner(&self, owner: QcOwner) -> QcFileResult<Vec<QcFile>> {
        self.list(&QcFileListQuery {
            owner: Some(owner),
            ..QcFileListQuery::default()
        })
    }

    /// Returns the raw payload bytes of one record.
    ///
    /// # Errors
    /// - `CorruptPayload` when decoding fails or the decoded bytes do not
    ///   hash to the stored checksum.
    pub fn read_payloads(&self, id: QcFileId) -> QcFileResult<DecodedPayloads> {
        let record = self.require(id)?;
        let decoded = decode_payloads(&record)?;
        self.check_integrity(&record, &decoded)?;
        Ok(decoded)
    }

    /// Verifies one record without returning its bytes.
    pub fn verify(&self, id: QcFileId) -> QcFileResult<Integrity> {
        let record = self.require(id)?;
        let decoded = decode_payloads(&record)?;
        self.check_integrity(&record, &decoded)
    }

    /// Verifies every stored record, page by page.
    ///
    /// Corruption is collected into the report; storage failures abort.
    pub fn verify_all(&self) -> QcFileResult<VerifyReport> {
        let started_at = Instant::now();
        let mut report = VerifyReport::default();
        let mut offset = 0;

        loop {
            let page = self.repo.list_qc_files(&QcFileListQuery {
                limit: Some(VERIFY_PAGE_SIZE),
                offset,
                ..QcFileListQuery::default()
            })?;
            if page.is_empty() {
                break;
            }

            for record in &page {
                report.checked += 1;
                let outcome = decode_payloads(record)
                    .and_then(|decoded| self.check_integrity(record, &decoded));
                match outcome {
                    Ok(Integrity::Verified) => report.verified += 1,
                    Ok(Integrity::Unverifiable) => report.unverifiable += 1,
                    Err(QcFileError::CorruptPayload(reason)) => {
                        warn!(
                            "event=qc_file_verify module=service status=corrupt id={}",
                            record.id
                        );
                        report.corrupt.push(CorruptRecord {
                            id: record.id,
                            reason,
                        });
                    }
                    Err(other) => return Err(other),
                }
            }
            offset += VERIFY_PAGE_SIZE;
        }

        info!(
            "event=qc_file_verify module=service status=ok checked={} verified={} unverifiable={} corrupt={} duration_ms={}",
            report.checked,
            report.verified,
            report.unverifiable,
            report.corrupt.len(),
            started_at.elapsed().as_millis()
        );
        Ok(report)
    }

    /// Sets the processing status of one record.
    pub fn update_status(&self, id: QcFileId, status: QcFileStatus) -> QcFileResult<QcFile> {
        self.repo.update_status(id, status)?;
        info!("event=qc_file_status module=service status=ok id={id} new_status={status}");
        self.require(id)
    }

    /// Replaces both file names of one record.
    pub fn rename_files(
        &self,
        id: QcFileId,
        input_name: Option<&str>,
        output_name: Option<&str>,
    ) -> QcFileResult<QcFile> {
        validate_file_name("input_name", input_name)?;
        validate_file_name("output_name", output_name)?;
        self.repo.update_names(id, input_name, output_name)?;
        self.require(id)
    }

    /// Re-uploads the payloads of an existing record.
    ///
    /// Owner and calc type are kept; checksum and encoding are recomputed.
    ///
    /// # Errors
    /// - `ChecksumCollision` when another record already stores this content.
    /// - `CorruptPayload` when a declared checksum does not match.
    pub fn replace_payloads(
        &self,
        id: QcFileId,
        upload: &PayloadUpload,
        status: QcFileStatus,
    ) -> QcFileResult<QcFile> {
        let record = self.repo.atomically(|repo| -> QcFileResult<QcFile> {
            let current = repo
                .get_qc_file(id)?
                .ok_or(QcFileError::NotFound(id))?;
            let (checksum, payloads) = self.prepare_content(
                current.owner,
                current.calc_type,
                upload.input_file.as_deref(),
                upload.output_file.as_deref(),
                upload.checksum.as_deref(),
            )?;

            if let Some(existing) = repo.find_by_checksum(&checksum)? {
                if existing.id != id {
                    return Err(QcFileError::ChecksumCollision {
                        checksum,
                        existing_id: existing.id,
                    });
                }
            }

            repo.replace_payloads(id, &payloads, &checksum)?;
            repo.update_status(id, status)?;
            repo.get_qc_file(id)?.ok_or(QcFileError::NotFound(id))
        })?;

        info!(
            "event=qc_file_reupload module=service status=ok id={id} new_status={status}"
        );
        Ok(record)
    }

    fn prepare_content(
        &self,
        owner: QcOwner,
        calc_type: CalcType,
        input: Option<&[u8]>,
        output: Option<&[u8]>,
        declared: Option<&str>,
    ) -> QcFileResult<(Checksum, EncodedPayloads)> {
        let algorithm = self.config.checksum_algorithm;
        let computed = Checksum::of_content(input, output, algorithm);

        if let Some(declared) = declared {
            let declared = Checksum::parse(declared)?;
            match &computed {
                Some(actual) if *actual == declared => {}
                Some(actual) => {
                    return Err(QcFileError::CorruptPayload(format!(
                        "declared checksum {declared} does not match received content {actual}"
                    )));
                }
                None => {
                    return Err(QcFileError::CorruptPayload(format!(
                        "declared checksum {declared} but no payload was received"
                    )));
                }
            }
        }

        let checksum =
            computed.unwrap_or_else(|| Checksum::placeholder(owner, calc_type, algorithm));
        let compression = self.config.compression;
        let encode = |bytes: Option<&[u8]>| -> QcFileResult<Option<Vec<u8>>> {
            match bytes {
                None => Ok(None),
                Some(bytes) if compression.enabled => {
                    Ok(Some(codec::compress(bytes, compression.level)?))
                }
                Some(bytes) => Ok(Some(bytes.to_vec())),
            }
        };

        let payloads = EncodedPayloads {
            input: encode(input)?,
            output: encode(output)?,
            compressed: compression.enabled,
        };
        Ok((checksum, payloads))
    }

    fn check_integrity(
        &self,
        record: &QcFile,
        decoded: &DecodedPayloads,
    ) -> QcFileResult<Integrity> {
        let actual = Checksum::of_content(
            decoded.input.as_deref(),
            decoded.output.as_deref(),
            self.config.checksum_algorithm,
        );
        match actual {
            None => Ok(Integrity::Unverifiable),
            Some(actual) if actual == record.checksum => Ok(Integrity::Verified),
            Some(actual) => Err(QcFileError::CorruptPayload(format!(
                "record {} stores checksum {} but content hashes to {actual}",
                record.id, record.checksum
            ))),
        }
    }
}

fn same_payload_sides(stored: &EncodedPayloads, proposed: &EncodedPayloads) -> bool {
    stored.input.is_some() == proposed.input.is_some()
        && stored.output.is_some() == proposed.output.is_some()
}

fn same_metadata(stored: &QcFile, proposed: &QcFileDraft) -> bool {
    stored.status == proposed.status
        && stored.level_id == proposed.level_id
        && stored.ess_id == proposed.ess_id
        && stored.input_name == proposed.input_name
        && stored.output_name == proposed.output_name
}

fn decode_payloads(record: &QcFile) -> QcFileResult<DecodedPayloads> {
    let decode = |bytes: &Option<Vec<u8>>| -> QcFileResult<Option<Vec<u8>>> {
        match bytes {
            None => Ok(None),
            Some(bytes) if record.payloads.compressed => {
                codec::decompress(bytes).map(Some).map_err(|err| match err {
                    CodecError::CorruptPayload(details) => QcFileError::CorruptPayload(format!(
                        "record {}: {details}",
                        record.id
                    )),
                    other => other.into(),
                })
            }
            Some(bytes) => Ok(Some(bytes.clone())),
        }
    };

    Ok(DecodedPayloads {
        input: decode(&record.payloads.input)?,
        output: decode(&record.payloads.output)?,
    })
}
