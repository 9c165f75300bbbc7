use std::time::Duration;

use thiserror::Error;

use crate::dedup::key::DedupKey;
use crate::store::StoreUnavailable;

/// Reasons an argument vector cannot be turned into a stable claim key.
#[derive(Debug, Error)]
pub enum KeyDerivationError {
    #[error("operation identifier must not be empty")]
    EmptyOperation,

    #[error("namespace {0:?} must be non-empty and must not contain '_'")]
    InvalidNamespace(String),

    #[error("argument {index} has no canonical encoding")]
    Unserializable {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    /// NaN and infinities have no JSON form and would all read as `null`.
    #[error("argument {index} contains a NaN or infinite float")]
    NonFinite { index: usize },

    #[error("argument {index} nests deeper than {limit} levels")]
    TooDeep { index: usize, limit: usize },
}

/// Everything a guarded call site may get back instead of an accepted claim.
#[derive(Debug, Error)]
pub enum DedupError {
    #[error(transparent)]
    KeyDerivation(#[from] KeyDerivationError),

    #[error(transparent)]
    StoreUnavailable(#[from] StoreUnavailable),

    /// An equivalent call already holds the key.
    #[error("duplicate submission, key={key}")]
    DuplicateSubmission { key: DedupKey },

    #[error("ttl must be at least 1ms, got {0:?}")]
    InvalidTtl(Duration),
}

impl DedupError {
    /// Only store outages are worth retrying. Duplicates and usage errors are final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DedupError::StoreUnavailable(_))
    }

    pub fn duplicate_key(&self) -> Option<&DedupKey> {
        match self {
            DedupError::DuplicateSubmission { key } => Some(key),
            _ => None,
        }
    }
}
