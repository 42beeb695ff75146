//! Request and response shapes for QC file use-cases.
//!
//! Requests carry raw (uncompressed) bytes and the owner as four optional
//! ids, exactly as an API client would send them. Responses never carry
//! payload bytes.

use crate::model::qc_file::{
    CalcType, Checksum, EssId, LevelId, OwnerId, OwnerRef, QcFile, QcFileId, QcFileStatus,
    QcOwner,
};
use serde::{Deserialize, Serialize};

/// Create request for one QC file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QcFileCreate {
    #[serde(default)]
    pub species_id: Option<OwnerId>,
    #[serde(default)]
    pub transition_state_id: Option<OwnerId>,
    #[serde(default)]
    pub np_species_id: Option<OwnerId>,
    #[serde(default)]
    pub vdw_entry_id: Option<OwnerId>,
    pub calc_type: CalcType,
    /// Defaults to `pending` when omitted.
    #[serde(default)]
    pub status: Option<QcFileStatus>,
    pub level_id: LevelId,
    pub ess_id: EssId,
    #[serde(default)]
    pub input_name: Option<String>,
    #[serde(default)]
    pub output_name: Option<String>,
    #[serde(default)]
    pub input_file: Option<Vec<u8>>,
    #[serde(default)]
    pub output_file: Option<Vec<u8>>,
    /// Digest computed by the uploader; verified against the received bytes.
    #[serde(default)]
    pub checksum: Option<String>,
}

impl QcFileCreate {
    pub fn new(owner: QcOwner, calc_type: CalcType, level_id: LevelId, ess_id: EssId) -> Self {
        let owner = OwnerRef::from(owner);
        Self {
            species_id: owner.species_id,
            transition_state_id: owner.transition_state_id,
            np_species_id: owner.np_species_id,
            vdw_entry_id: owner.vdw_entry_id,
            calc_type,
            status: None,
            level_id,
            ess_id,
            input_name: None,
            output_name: None,
            input_file: None,
            output_file: None,
            checksum: None,
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.input_name = Some(name.into());
        self.input_file = Some(bytes.into());
        self
    }

    pub fn with_output(mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.output_name = Some(name.into());
        self.output_file = Some(bytes.into());
        self
    }

    pub fn with_status(mut self, status: QcFileStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn owner_ref(&self) -> OwnerRef {
        OwnerRef {
            species_id: self.species_id,
            transition_state_id: self.transition_state_id,
            np_species_id: self.np_species_id,
            vdw_entry_id: self.vdw_entry_id,
        }
    }
}

/// Replacement payloads for an existing record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PayloadUpload {
    #[serde(default)]
    pub input_file: Option<Vec<u8>>,
    #[serde(default)]
    pub output_file: Option<Vec<u8>>,
    #[serde(default)]
    pub checksum: Option<String>,
}

/// Raw payload bytes after decoding and verification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedPayloads {
    pub input: Option<Vec<u8>>,
    pub output: Option<Vec<u8>>,
}

/// Metadata view of a stored record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QcFileView {
    pub id: QcFileId,
    pub owner: QcOwner,
    pub calc_type: CalcType,
    pub status: QcFileStatus,
    pub level_id: LevelId,
    pub ess_id: EssId,
    pub input_name: Option<String>,
    pub output_name: Option<String>,
    pub has_input: bool,
    pub has_output: bool,
    pub compressed: bool,
    pub checksum: Checksum,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<&QcFile> for QcFileView {
    fn from(record: &QcFile) -> Self {
        Self {
            id: record.id,
            owner: record.owner,
            calc_type: record.calc_type,
            status: record.status,
            level_id: record.level_id,
            ess_id: record.ess_id,
            input_name: record.input_name.clone(),
            output_name: record.output_name.clone(),
            has_input: record.payloads.input.is_some(),
            has_output: record.payloads.output.is_some(),
            compressed: record.payloads.compressed,
            checksum: record.checksum.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}
