pub mod memory_store;
pub mod redb_store;
pub mod redis_store;

pub use memory_store::MemoryClaimStore;
pub use redb_store::RedbClaimStore;
pub use redis_store::RedisClaimStore;

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::dedup::DedupKey;

/// The store could not be reached, or did not answer in time.
///
/// Always distinct from a negative claim: an ambiguous answer is never a
/// confirmed duplicate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("claim store unavailable: {0}")]
pub struct StoreUnavailable(pub String);

impl StoreUnavailable {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Marker written into a claim record by one claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClaimToken(Uuid);

impl ClaimToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw).ok().map(Self)
    }
}

impl fmt::Display for ClaimToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

/// Shared key-value store offering an atomic claim-if-absent with expiry.
///
/// Implementations must make `claim_if_absent` indivisible for every client
/// sharing the store: of all callers racing on one live key exactly one sees
/// `true`.
#[rocket::async_trait]
pub trait ClaimStore: Send + Sync {
    /// Creates a record holding `token` that expires after `ttl`, unless a
    /// live record already exists. Returns whether the record was created.
    async fn claim_if_absent(
        &self,
        key: &DedupKey,
        token: &ClaimToken,
        ttl: Duration,
    ) -> Result<bool, StoreUnavailable>;

    /// Token held by the live record for `key`, if any.
    async fn claim_owner(&self, key: &DedupKey) -> Result<Option<ClaimToken>, StoreUnavailable>;
}
