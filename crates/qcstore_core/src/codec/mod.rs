//! Content codec for QC file payloads.
//!
//! # Responsibility
//! - Fingerprint raw payload bytes for integrity checks and deduplication.
//! - Provide a lossless, self-describing compression format for payloads.
//!
//! # Invariants
//! - Digests are computed over uncompressed bytes only, so re-encoding the
//!   same content never changes its identity.
//! - `decompress` never returns bytes for input it cannot fully decode.
//! - All functions are pure.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// zstd level used when configuration does not override it.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;
/// Length of every hex digest produced by this module.
pub const DIGEST_HEX_LEN: usize = 64;

const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

pub type CodecResult<T> = Result<T, CodecError>;

#[derive(Debug, Error)]
pub enum CodecError {
    /// Input was not produced by [`compress`] or has been damaged.
    #[error("corrupt payload: {0}")]
    CorruptPayload(String),
    #[error("payload encoding failed: {0}")]
    Encode(#[source] std::io::Error),
}

/// 256-bit digest used for checksums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumAlgorithm {
    #[default]
    Sha256,
    Blake3,
}

impl ChecksumAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Blake3 => "blake3",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Some(Self::Sha256),
            "blake3" => Some(Self::Blake3),
            _ => None,
        }
    }
}

enum ContentHasher {
    Sha256(Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl ContentHasher {
    fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            ChecksumAlgorithm::Blake3 => Self::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    fn update(&mut self, bytes: &[u8]) {
        match self {
            Self::Sha256(hasher) => hasher.update(bytes),
            Self::Blake3(hasher) => {
                hasher.update(bytes);
            }
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Self::Sha256(hasher) => hex::encode(hasher.finalize()),
            Self::Blake3(hasher) => hasher.finalize().to_hex().to_string(),
        }
    }
}

/// Returns the lowercase hex digest of `bytes`.
pub fn checksum(bytes: &[u8], algorithm: ChecksumAlgorithm) -> String {
    let mut hasher = ContentHasher::new(algorithm);
    hasher.update(bytes);
    hasher.finalize_hex()
}

/// Returns the canonical digest of a record's raw payloads.
///
/// A single payload hashes to the digest of exactly its bytes. When both are
/// present the input length is framed in front so that moving bytes between
/// input and output changes the digest. Returns `None` when there is no
/// content to hash.
pub fn content_checksum(
    input: Option<&[u8]>,
    output: Option<&[u8]>,
    algorithm: ChecksumAlgorithm,
) -> Option<String> {
    match (input, output) {
        (None, None) => None,
        (Some(bytes), None) | (None, Some(bytes)) => Some(checksum(bytes, algorithm)),
        (Some(input), Some(output)) => {
            let mut hasher = ContentHasher::new(algorithm);
            hasher.update(&(input.len() as u64).to_be_bytes());
            hasher.update(input);
            hasher.update(output);
            Some(hasher.finalize_hex())
        }
    }
}

/// Compresses `bytes` into a single zstd frame.
pub fn compress(bytes: &[u8], level: i32) -> CodecResult<Vec<u8>> {
    zstd::stream::encode_all(bytes, level).map_err(CodecError::Encode)
}

/// Decompresses a buffer produced by [`compress`].
///
/// # Errors
/// - `CorruptPayload` when the frame header is missing, the frame is
///   truncated, or the compressed stream is malformed.
pub fn decompress(bytes: &[u8]) -> CodecResult<Vec<u8>> {
    if !bytes.starts_with(&ZSTD_MAGIC) {
        return Err(CodecError::CorruptPayload(
            "missing zstd frame header".to_string(),
        ));
    }

    zstd::stream::decode_all(bytes).map_err(|err| CodecError::CorruptPayload(err.to_string()))
}
