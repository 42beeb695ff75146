//! QC file domain model.
//!
//! # Responsibility
//! - Define the persisted file record and its closed value domains.
//! - Model polymorphic ownership as a sum type so "exactly one owner" is the
//!   only representable state once a reference has been resolved.
//!
//! # Invariants
//! - `QcOwner` always names exactly one owner kind.
//! - `owner` and `calc_type` never change after a record is created.
//! - `Checksum` is always 64 lowercase hex characters.

use crate::codec::{self, ChecksumAlgorithm, DIGEST_HEX_LEN};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// Surrogate key of a stored record.
pub type QcFileId = i64;
/// Opaque id of an owning entity in an external collection.
pub type OwnerId = i64;
/// Opaque id into the level-of-theory registry.
pub type LevelId = i64;
/// Opaque id into the electronic-structure-software registry.
pub type EssId = i64;

/// Matches the `String(255)` limit of the file name columns.
pub const MAX_FILE_NAME_CHARS: usize = 255;

static CHECKSUM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-f]{64}$").expect("valid checksum regex"));

/// Validation errors raised while building domain values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("exactly one owner reference is required, got {populated}")]
    InvalidOwner { populated: usize },
    #[error("unknown calc type `{0}`")]
    UnknownCalcType(String),
    #[error("unknown qc file status `{0}`")]
    UnknownStatus(String),
    #[error("invalid checksum `{0}`; expected {DIGEST_HEX_LEN} hex characters")]
    InvalidChecksum(String),
    #[error("invalid {field}: {reason}")]
    InvalidFileName { field: &'static str, reason: String },
}

/// Calculation that produced a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalcType {
    Opt,
    Freq,
    Scan,
    Irc,
    Sp,
}

impl CalcType {
    pub const ALL: [CalcType; 5] = [
        CalcType::Opt,
        CalcType::Freq,
        CalcType::Scan,
        CalcType::Irc,
        CalcType::Sp,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Opt => "opt",
            Self::Freq => "freq",
            Self::Scan => "scan",
            Self::Irc => "irc",
            Self::Sp => "sp",
        }
    }
}

impl FromStr for CalcType {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "opt" => Ok(Self::Opt),
            "freq" => Ok(Self::Freq),
            "scan" => Ok(Self::Scan),
            "irc" => Ok(Self::Irc),
            "sp" => Ok(Self::Sp),
            other => Err(ModelError::UnknownCalcType(other.to_string())),
        }
    }
}

impl Display for CalcType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing state of a stored file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QcFileStatus {
    /// Stored but not yet verified.
    #[default]
    Pending,
    Ok,
    Failed,
}

impl QcFileStatus {
    pub const ALL: [QcFileStatus; 3] = [
        QcFileStatus::Pending,
        QcFileStatus::Ok,
        QcFileStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ok => "ok",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for QcFileStatus {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "ok" => Ok(Self::Ok),
            "failed" => Ok(Self::Failed),
            other => Err(ModelError::UnknownStatus(other.to_string())),
        }
    }
}

impl Display for QcFileStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of entity that can own a QC file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OwnerKind {
    Species,
    TransitionState,
    NonPhysicalSpecies,
    VdwEntry,
}

impl OwnerKind {
    pub const ALL: [OwnerKind; 4] = [
        OwnerKind::Species,
        OwnerKind::TransitionState,
        OwnerKind::NonPhysicalSpecies,
        OwnerKind::VdwEntry,
    ];

    /// Owner foreign key column in `qc_file`.
    pub fn column(self) -> &'static str {
        match self {
            Self::Species => "species_id",
            Self::TransitionState => "transition_state_id",
            Self::NonPhysicalSpecies => "np_species_id",
            Self::VdwEntry => "vdw_entry_id",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Species => "species",
            Self::TransitionState => "transition_state",
            Self::NonPhysicalSpecies => "np_species",
            Self::VdwEntry => "vdw_entry",
        }
    }
}

/// The single entity a QC file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum QcOwner {
    Species(OwnerId),
    TransitionState(OwnerId),
    #[serde(rename = "np_species")]
    NonPhysicalSpecies(OwnerId),
    VdwEntry(OwnerId),
}

impl QcOwner {
    pub fn new(kind: OwnerKind, id: OwnerId) -> Self {
        match kind {
            OwnerKind::Species => Self::Species(id),
            OwnerKind::TransitionState => Self::TransitionState(id),
            OwnerKind::NonPhysicalSpecies => Self::NonPhysicalSpecies(id),
            OwnerKind::VdwEntry => Self::VdwEntry(id),
        }
    }

    pub fn kind(self) -> OwnerKind {
        match self {
            Self::Species(_) => OwnerKind::Species,
            Self::TransitionState(_) => OwnerKind::TransitionState,
            Self::NonPhysicalSpecies(_) => OwnerKind::NonPhysicalSpecies,
            Self::VdwEntry(_) => OwnerKind::VdwEntry,
        }
    }

    pub fn id(self) -> OwnerId {
        match self {
            Self::Species(id)
            | Self::TransitionState(id)
            | Self::NonPhysicalSpecies(id)
            | Self::VdwEntry(id) => id,
        }
    }
}

impl Display for QcOwner {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.kind().label(), self.id())
    }
}

/// Unresolved owner reference as supplied by callers and stored in rows.
///
/// Mirrors the four nullable owner columns. Use [`OwnerRef::resolve`] to
/// obtain a [`QcOwner`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRef {
    pub species_id: Option<OwnerId>,
    pub transition_state_id: Option<OwnerId>,
    pub np_species_id: Option<OwnerId>,
    pub vdw_entry_id: Option<OwnerId>,
}

impl OwnerRef {
    /// Resolves the reference into exactly one owner.
    ///
    /// # Errors
    /// - `ModelError::InvalidOwner` when zero or several ids are populated.
    pub fn resolve(&self) -> Result<QcOwner, ModelError> {
        let populated = [
            self.species_id.map(QcOwner::Species),
            self.transition_state_id.map(QcOwner::TransitionState),
            self.np_species_id.map(QcOwner::NonPhysicalSpecies),
            self.vdw_entry_id.map(QcOwner::VdwEntry),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();

        match populated.as_slice() {
            [owner] => Ok(*owner),
            other => Err(ModelError::InvalidOwner {
                populated: other.len(),
            }),
        }
    }
}

impl From<QcOwner> for OwnerRef {
    fn from(owner: QcOwner) -> Self {
        let mut reference = Self::default();
        match owner {
            QcOwner::Species(id) => reference.species_id = Some(id),
            QcOwner::TransitionState(id) => reference.transition_state_id = Some(id),
            QcOwner::NonPhysicalSpecies(id) => reference.np_species_id = Some(id),
            QcOwner::VdwEntry(id) => reference.vdw_entry_id = Some(id),
        }
        reference
    }
}

/// Content digest used for integrity checks and deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Checksum(String);

impl Checksum {
    /// Parses a hex digest, accepting upper-case input.
    pub fn parse(value: &str) -> Result<Self, ModelError> {
        let normalized = value.trim().to_ascii_lowercase();
        if !CHECKSUM_RE.is_match(&normalized) {
            return Err(ModelError::InvalidChecksum(value.to_string()));
        }
        Ok(Self(normalized))
    }

    /// Digest of the raw payloads, or `None` when there are none.
    pub fn of_content(
        input: Option<&[u8]>,
        output: Option<&[u8]>,
        algorithm: ChecksumAlgorithm,
    ) -> Option<Self> {
        codec::content_checksum(input, output, algorithm).map(Self)
    }

    /// Deterministic digest standing in for content that is not stored.
    ///
    /// Derived from the owner and calc type only, so a slot keeps the same
    /// placeholder across runs.
    pub fn placeholder(owner: QcOwner, calc_type: CalcType, algorithm: ChecksumAlgorithm) -> Self {
        let label = format!("{}:{}:{}", owner.kind().label(), owner.id(), calc_type);
        Self(codec::checksum(label.as_bytes(), algorithm))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Checksum {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Checksum> for String {
    fn from(value: Checksum) -> Self {
        value.0
    }
}

impl Display for Checksum {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Payload bytes as stored, with the encoding flag shared by both fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedPayloads {
    pub input: Option<Vec<u8>>,
    pub output: Option<Vec<u8>>,
    pub compressed: bool,
}

impl EncodedPayloads {
    pub fn is_empty(&self) -> bool {
        self.input.is_none() && self.output.is_none()
    }
}

/// A record ready to be inserted. Ids and timestamps come from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QcFileDraft {
    pub owner: QcOwner,
    pub calc_type: CalcType,
    pub status: QcFileStatus,
    pub level_id: LevelId,
    pub ess_id: EssId,
    pub input_name: Option<String>,
    pub output_name: Option<String>,
    pub payloads: EncodedPayloads,
    pub checksum: Checksum,
}

impl QcFileDraft {
    pub fn validate(&self) -> Result<(), ModelError> {
        validate_file_name("input_name", self.input_name.as_deref())?;
        validate_file_name("output_name", self.output_name.as_deref())?;
        Ok(())
    }
}

/// Persisted QC file record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QcFile {
    pub id: QcFileId,
    pub owner: QcOwner,
    pub calc_type: CalcType,
    pub status: QcFileStatus,
    pub level_id: LevelId,
    pub ess_id: EssId,
    pub input_name: Option<String>,
    pub output_name: Option<String>,
    pub payloads: EncodedPayloads,
    pub checksum: Checksum,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    /// Unix epoch milliseconds.
    pub updated_at: i64,
}

impl QcFile {
    /// Returns whether this record occupies the given owner/calc-type slot.
    pub fn occupies(&self, owner: QcOwner, calc_type: CalcType) -> bool {
        self.owner == owner && self.calc_type == calc_type
    }
}

/// Checks an optional file name against column limits.
pub fn validate_file_name(field: &'static str, value: Option<&str>) -> Result<(), ModelError> {
    let Some(value) = value else {
        return Ok(());
    };

    if value.trim().is_empty() {
        return Err(ModelError::InvalidFileName {
            field,
            reason: "must not be blank".to_string(),
        });
    }
    if value.chars().count() > MAX_FILE_NAME_CHARS {
        return Err(ModelError::InvalidFileName {
            field,
            reason: format!("longer than {MAX_FILE_NAME_CHARS} characters"),
        });
    }
    if value.chars().any(char::is_control) {
        return Err(ModelError::InvalidFileName {
            field,
            reason: "contains control characters".to_string(),
        });
    }
    Ok(())
}
