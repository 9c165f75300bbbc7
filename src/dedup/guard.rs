use log::{debug, error, warn};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::common::{DEFAULT_STORE_TIMEOUT, MAX_TTL};
use crate::dedup::error::{DedupError, KeyDerivationError};
use crate::dedup::key::{Arguments, DedupKey, KeyDeriver};
use crate::dedup::retry::RetryPolicy;
use crate::dedup::Norepeat;
use crate::store::{ClaimStore, ClaimToken, StoreUnavailable};

/// What the guard does once the store stays unreachable after all retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Report the outage. The guarded call must not run.
    #[default]
    FailClosed,
    /// Let the call through and log it. Duplicates may slip by.
    FailOpen,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// This call owns the key for its ttl and may run the operation once.
    Accepted(DedupKey),
    /// An equivalent call already holds the key.
    Rejected(DedupKey),
}

impl Outcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Outcome::Accepted(_))
    }

    pub fn key(&self) -> &DedupKey {
        match self {
            Outcome::Accepted(key) | Outcome::Rejected(key) => key,
        }
    }
}

/// Accept/reject gate in front of non-idempotent operations.
///
/// The guard keeps no per-call state; all coordination goes through the
/// store's atomic claim, so any number of clones, in any number of processes,
/// can share one store.
#[derive(Clone)]
pub struct DedupGuard {
    store: Arc<dyn ClaimStore>,
    deriver: KeyDeriver,
    store_timeout: Duration,
    retry: RetryPolicy,
    failure_mode: FailureMode,
}

impl DedupGuard {
    pub fn new(store: Arc<dyn ClaimStore>) -> Self {
        Self {
            store,
            deriver: KeyDeriver::default(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            retry: RetryPolicy::default(),
            failure_mode: FailureMode::default(),
        }
    }

    pub fn with_namespace(mut self, namespace: &str) -> Result<Self, KeyDerivationError> {
        self.deriver = KeyDeriver::new(namespace)?;
        Ok(self)
    }

    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_failure_mode(mut self, failure_mode: FailureMode) -> Self {
        self.failure_mode = failure_mode;
        self
    }

    pub fn deriver(&self) -> &KeyDeriver {
        &self.deriver
    }

    /// Claims the key of `operation_id(args)` for `ttl`.
    ///
    /// `ttl` must be at least 1ms. Longer windows than [`MAX_TTL`] are held for
    /// [`MAX_TTL`].
    ///
    /// If the caller drops this future before the store answers, the claim
    /// may still land; it then simply expires after `ttl`.
    pub async fn try_acquire(
        &self,
        operation_id: &str,
        args: &Arguments,
        ttl: Duration,
    ) -> Result<Outcome, DedupError> {
        if ttl < Duration::from_millis(1) {
            return Err(DedupError::InvalidTtl(ttl));
        }
        let ttl = ttl.min(MAX_TTL);
        let key = self.deriver.derive(operation_id, args)?;
        let token = ClaimToken::generate();

        match self.claim_with_retry(&key, &token, ttl).await {
            Ok(true) => {
                debug!(key = key.as_str(); "Claim accepted");
                Ok(Outcome::Accepted(key))
            }
            Ok(false) => {
                warn!(key = key.as_str(), operation = operation_id; "Duplicate submission rejected");
                Ok(Outcome::Rejected(key))
            }
            Err(err) => match self.failure_mode {
                FailureMode::FailClosed => {
                    error!(key = key.as_str(); "Refusing call, {}", err);
                    Err(err.into())
                }
                FailureMode::FailOpen => {
                    warn!(key = key.as_str(); "Letting call through without a claim, {}", err);
                    Ok(Outcome::Accepted(key))
                }
            },
        }
    }

    /// [`DedupGuard::try_acquire`] with a rejection turned into
    /// [`DedupError::DuplicateSubmission`].
    pub async fn ensure_unique(
        &self,
        operation_id: &str,
        args: &Arguments,
        ttl: Duration,
    ) -> Result<DedupKey, DedupError> {
        match self.try_acquire(operation_id, args, ttl).await? {
            Outcome::Accepted(key) => Ok(key),
            Outcome::Rejected(key) => Err(DedupError::DuplicateSubmission { key }),
        }
    }

    /// Runs `operation` only if the call described by `policy` and `args`
    /// wins its claim.
    pub async fn guarded<F, Fut, T>(
        &self,
        policy: &Norepeat,
        args: &Arguments,
        operation: F,
    ) -> Result<T, DedupError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.ensure_unique(policy.value, args, policy.expire).await?;
        Ok(operation().await)
    }

    // Every attempt re-issues the same claim with the same token. Once an
    // attempt has failed ambiguously, a later refusal may be our own earlier
    // claim, so the record's token decides.
    async fn claim_with_retry(
        &self,
        key: &DedupKey,
        token: &ClaimToken,
        ttl: Duration,
    ) -> Result<bool, StoreUnavailable> {
        let mut retries = 0;
        let mut ambiguous = false;
        loop {
            match self.claim_once(key, token, ttl).await {
                Ok(true) => return Ok(true),
                Ok(false) if ambiguous => return self.owned_by(key, token).await,
                Ok(false) => return Ok(false),
                Err(err) if retries < self.retry.max_retries => {
                    retries += 1;
                    ambiguous = true;
                    let delay = self.retry.delay_for_attempt(retries);
                    warn!(key = key.as_str(), retry = retries; "{}, retrying in {:?}", err, delay);
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn claim_once(
        &self,
        key: &DedupKey,
        token: &ClaimToken,
        ttl: Duration,
    ) -> Result<bool, StoreUnavailable> {
        timeout(self.store_timeout, self.store.claim_if_absent(key, token, ttl))
            .await
            .unwrap_or_else(|_| {
                Err(StoreUnavailable::new(format!(
                    "claim timed out after {:?}",
                    self.store_timeout
                )))
            })
    }

    async fn owned_by(&self, key: &DedupKey, token: &ClaimToken) -> Result<bool, StoreUnavailable> {
        let owner = timeout(self.store_timeout, self.store.claim_owner(key))
            .await
            .unwrap_or_else(|_| {
                Err(StoreUnavailable::new(format!(
                    "owner lookup timed out after {:?}",
                    self.store_timeout
                )))
            })?;

        let recovered = owner.as_ref() == Some(token);
        if recovered {
            debug!(key = key.as_str(); "Recovered claim from an earlier ambiguous attempt");
        }
        Ok(recovered)
    }
}
