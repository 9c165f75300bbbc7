use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;

use crate::common::{DEFAULT_SWEEP_INTERVAL, MAX_TTL};
use crate::dedup::DedupKey;
use crate::store::{ClaimStore, ClaimToken, StoreUnavailable};

#[derive(Debug, Clone)]
struct Claim {
    token: ClaimToken,
    expires_at: Instant,
}

impl Claim {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Claim store living inside one process.
///
/// The per-key entry lock of the map makes claims atomic among the guards of
/// this process only. Expired records are replaced on the next claim of the
/// same key, and every `sweep_interval` claims the whole map is swept.
#[derive(Debug)]
pub struct MemoryClaimStore {
    claims: DashMap<String, Claim>,
    sweep_interval: usize,
    claim_count: AtomicUsize,
}

impl Default for MemoryClaimStore {
    fn default() -> Self {
        Self {
            claims: DashMap::new(),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            claim_count: AtomicUsize::new(0),
        }
    }
}

impl MemoryClaimStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sweep_interval(mut self, claims: usize) -> Self {
        self.sweep_interval = claims.max(1);
        self
    }

    /// Number of records still held, expired ones included.
    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.claims.len();
        self.claims.retain(|_, claim| claim.is_live(now));
        before.saturating_sub(self.claims.len())
    }
}

#[rocket::async_trait]
impl ClaimStore for MemoryClaimStore {
    async fn claim_if_absent(
        &self,
        key: &DedupKey,
        token: &ClaimToken,
        ttl: Duration,
    ) -> Result<bool, StoreUnavailable> {
        let now = Instant::now();
        let claim = Claim {
            token: *token,
            expires_at: now.checked_add(ttl).unwrap_or_else(|| now + MAX_TTL),
        };

        let claimed = match self.claims.entry(key.as_str().to_owned()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    false
                } else {
                    occupied.insert(claim);
                    true
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(claim);
                true
            }
        };

        // The entry guard is gone here; retain locks every shard.
        let count = self.claim_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count % self.sweep_interval == 0 {
            self.purge_expired();
        }
        Ok(claimed)
    }

    async fn claim_owner(&self, key: &DedupKey) -> Result<Option<ClaimToken>, StoreUnavailable> {
        let now = Instant::now();
        Ok(self
            .claims
            .get(key.as_str())
            .filter(|claim| claim.is_live(now))
            .map(|claim| claim.token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::{Arguments, KeyDeriver};

    fn key(name: &str) -> DedupKey {
        KeyDeriver::default()
            .derive("/repeat", &Arguments::new().with(name).unwrap())
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn second_claim_is_refused_until_expiry() {
        let store = MemoryClaimStore::new();
        let key = key("alice");
        let ttl = Duration::from_millis(5000);

        assert!(store.claim_if_absent(&key, &ClaimToken::generate(), ttl).await.unwrap());
        assert!(!store.claim_if_absent(&key, &ClaimToken::generate(), ttl).await.unwrap());

        tokio::time::advance(Duration::from_millis(4999)).await;
        assert!(!store.claim_if_absent(&key, &ClaimToken::generate(), ttl).await.unwrap());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(store.claim_if_absent(&key, &ClaimToken::generate(), ttl).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn refused_claim_keeps_the_original_owner() {
        let store = MemoryClaimStore::new();
        let key = key("alice");
        let first = ClaimToken::generate();
        let ttl = Duration::from_secs(1);

        store.claim_if_absent(&key, &first, ttl).await.unwrap();
        store
            .claim_if_absent(&key, &ClaimToken::generate(), ttl)
            .await
            .unwrap();
        assert_eq!(store.claim_owner(&key).await.unwrap(), Some(first));

        tokio::time::advance(ttl).await;
        assert_eq!(store.claim_owner(&key).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_only_expired_records() {
        let store = MemoryClaimStore::new();
        store
            .claim_if_absent(&key("short"), &ClaimToken::generate(), Duration::from_millis(10))
            .await
            .unwrap();
        store
            .claim_if_absent(&key("long"), &ClaimToken::generate(), Duration::from_secs(10))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_millis(20)).await;
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_expired_claims_do_not_pile_up() {
        let store = MemoryClaimStore::new().with_sweep_interval(100);
        let ttl = Duration::from_millis(10);

        for i in 0..1000 {
            let key = key(&format!("user{i}"));
            assert!(store.claim_if_absent(&key, &ClaimToken::generate(), ttl).await.unwrap());
        }
        assert_eq!(store.len(), 1000);

        tokio::time::advance(Duration::from_secs(60)).await;
        for i in 0..100 {
            let key = key(&format!("late{i}"));
            store.claim_if_absent(&key, &ClaimToken::generate(), ttl).await.unwrap();
        }
        assert_eq!(store.len(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_keeps_live_claims() {
        let store = MemoryClaimStore::new().with_sweep_interval(2);
        let held = key("held");
        let owner = ClaimToken::generate();

        store.claim_if_absent(&held, &owner, Duration::from_secs(60)).await.unwrap();
        store
            .claim_if_absent(&key("brief"), &ClaimToken::generate(), Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        store
            .claim_if_absent(&key("next"), &ClaimToken::generate(), Duration::from_secs(60))
            .await
            .unwrap();
        store
            .claim_if_absent(&key("other"), &ClaimToken::generate(), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.claim_owner(&held).await.unwrap(), Some(owner));
    }
}
