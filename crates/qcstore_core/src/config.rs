//! Store configuration.
//!
//! # Responsibility
//! - Hold tunables for checksum algorithm, compression and slot collisions.
//! - Load them from defaults, a JSON document, or `QCSTORE_*` variables.
//!
//! # Invariants
//! - A `StoreConfig` returned by any loader has passed `validate()`.
//!
//! | Env Var                       | Default            |
//! |-------------------------------|--------------------|
//! | `QCSTORE_CHECKSUM_ALGORITHM`  | `sha256`           |
//! | `QCSTORE_COMPRESSION`         | `true`             |
//! | `QCSTORE_COMPRESSION_LEVEL`   | `3`                |
//! | `QCSTORE_COLLISION_POLICY`    | `reject_duplicate` |

use crate::codec::{ChecksumAlgorithm, DEFAULT_COMPRESSION_LEVEL};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const ENV_CHECKSUM_ALGORITHM: &str = "QCSTORE_CHECKSUM_ALGORITHM";
pub const ENV_COMPRESSION: &str = "QCSTORE_COMPRESSION";
pub const ENV_COMPRESSION_LEVEL: &str = "QCSTORE_COMPRESSION_LEVEL";
pub const ENV_COLLISION_POLICY: &str = "QCSTORE_COLLISION_POLICY";

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid value `{value}` for {key}")]
    InvalidValue { key: &'static str, value: String },
    #[error("compression level {0} is outside the supported zstd range")]
    CompressionLevel(i32),
}

/// What a write does when its owner/calc-type slot is already taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Refuse the write with a duplicate-slot conflict.
    #[default]
    RejectDuplicate,
    /// Remove the current occupant and store the new record in one transaction.
    Supersede,
}

impl CollisionPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RejectDuplicate => "reject_duplicate",
            Self::Supersede => "supersede",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "reject" | "reject_duplicate" => Some(Self::RejectDuplicate),
            "supersede" | "replace" => Some(Self::Supersede),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub enabled: bool,
    pub level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub checksum_algorithm: ChecksumAlgorithm,
    pub compression: CompressionConfig,
    pub collision_policy: CollisionPolicy,
}

impl StoreConfig {
    /// Parses a JSON document; omitted fields keep their defaults.
    pub fn from_json_str(document: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&document)
    }

    /// Defaults overridden by `QCSTORE_*` environment variables.
    pub fn from_env() -> ConfigResult<Self> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from `lookup`, keyed by the `QCSTORE_*` names.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> ConfigResult<Self> {
        if let Some(value) = lookup(ENV_CHECKSUM_ALGORITHM) {
            self.checksum_algorithm =
                ChecksumAlgorithm::parse(&value).ok_or(ConfigError::InvalidValue {
                    key: ENV_CHECKSUM_ALGORITHM,
                    value,
                })?;
        }

        if let Some(value) = lookup(ENV_COMPRESSION) {
            let normalized = value.trim().to_ascii_lowercase();
            self.compression.enabled = match normalized.as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: ENV_COMPRESSION,
                        value,
                    })
                }
            };
        }

        if let Some(value) = lookup(ENV_COMPRESSION_LEVEL) {
            self.compression.level =
                value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue {
                        key: ENV_COMPRESSION_LEVEL,
                        value: value.clone(),
                    })?;
        }

        if let Some(value) = lookup(ENV_COLLISION_POLICY) {
            self.collision_policy =
                CollisionPolicy::parse(&value).ok_or(ConfigError::InvalidValue {
                    key: ENV_COLLISION_POLICY,
                    value,
                })?;
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if !zstd::compression_level_range().contains(&self.compression.level) {
            return Err(ConfigError::CompressionLevel(self.compression.level));
        }
        Ok(())
    }
}
