use anyhow::{Context, Result};
use log::{info, warn};
use redb::{Database, ReadableTable, Table, TableDefinition};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::spawn_blocking;

use crate::common::DEFAULT_SWEEP_INTERVAL;
use crate::dedup::DedupKey;
use crate::store::{ClaimStore, ClaimToken, StoreUnavailable};

// Claim key -> serde_json encoded ClaimRecord
pub const CLAIM_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("claim");

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
struct ClaimRecord {
    token: String,
    expires_at_ms: u64,
}

impl ClaimRecord {
    fn is_live(&self, now_ms: u64) -> bool {
        self.expires_at_ms > now_ms
    }

    /// Undecodable bytes count as no claim at all.
    fn decode(key: &str, bytes: &[u8]) -> Option<Self> {
        match serde_json::from_slice(bytes) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(key = key; "Dropping undecodable claim record: {}", err);
                None
            }
        }
    }
}

/// Claim store backed by an embedded redb file.
///
/// redb runs one write transaction at a time, and each claim is a single
/// read-check-insert write transaction, so claims are atomic for every guard
/// sharing this handle. The file lock keeps other processes out entirely.
/// Every `sweep_interval` claims, the claim's transaction also removes all
/// expired records.
#[derive(Clone)]
pub struct RedbClaimStore {
    db: Arc<Database>,
    sweep_interval: usize,
    claim_count: Arc<AtomicUsize>,
}

impl RedbClaimStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let db = Database::create(path)
            .with_context(|| format!("Failed to open claim database {}", path.display()))?;

        let txn = db.begin_write()?;
        {
            let _ = txn.open_table(CLAIM_TABLE)?;
        }
        txn.commit()?;

        let store = Self {
            db: Arc::new(db),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            claim_count: Arc::new(AtomicUsize::new(0)),
        };
        let purged = store.purge_expired()?;
        info!(path = &*path.display().to_string(); "Claim database ready, purged {} expired claims", purged);
        Ok(store)
    }

    pub fn with_sweep_interval(mut self, claims: usize) -> Self {
        self.sweep_interval = claims.max(1);
        self
    }

    /// Number of records in the file, expired ones included.
    pub fn len(&self) -> Result<usize> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CLAIM_TABLE)?;
        Ok(table.iter()?.count())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Removes every expired or undecodable record, returning how many were dropped.
    pub fn purge_expired(&self) -> Result<usize> {
        let now = now_millis()?;
        let txn = self.db.begin_write()?;
        let purged = {
            let mut table = txn.open_table(CLAIM_TABLE)?;
            purge_table(&mut table, now)?
        };
        txn.commit()?;
        Ok(purged)
    }

    fn sweep_due(&self) -> bool {
        let count = self.claim_count.fetch_add(1, Ordering::Relaxed) + 1;
        count % self.sweep_interval == 0
    }
}

#[rocket::async_trait]
impl ClaimStore for RedbClaimStore {
    async fn claim_if_absent(
        &self,
        key: &DedupKey,
        token: &ClaimToken,
        ttl: Duration,
    ) -> Result<bool, StoreUnavailable> {
        let db = Arc::clone(&self.db);
        let key = key.as_str().to_owned();
        let token = *token;
        let sweep = self.sweep_due();

        spawn_blocking(move || claim_blocking(&db, &key, &token, ttl, sweep))
            .await
            .map_err(|err| StoreUnavailable::new(format!("claim task failed: {err}")))?
            .map_err(|err| StoreUnavailable::new(format!("{err:#}")))
    }

    async fn claim_owner(&self, key: &DedupKey) -> Result<Option<ClaimToken>, StoreUnavailable> {
        let db = Arc::clone(&self.db);
        let key = key.as_str().to_owned();

        spawn_blocking(move || owner_blocking(&db, &key))
            .await
            .map_err(|err| StoreUnavailable::new(format!("owner task failed: {err}")))?
            .map_err(|err| StoreUnavailable::new(format!("{err:#}")))
    }
}

fn purge_table(table: &mut Table<&'static str, &'static [u8]>, now: u64) -> Result<usize> {
    let mut dead = Vec::new();
    for entry in table.iter()? {
        let (key, value) = entry?;
        let key = key.value();
        let live = ClaimRecord::decode(key, value.value()).is_some_and(|record| record.is_live(now));
        if !live {
            dead.push(key.to_string());
        }
    }
    for key in &dead {
        table.remove(key.as_str())?;
    }
    Ok(dead.len())
}

fn claim_blocking(
    db: &Database,
    key: &str,
    token: &ClaimToken,
    ttl: Duration,
    sweep: bool,
) -> Result<bool> {
    let now = now_millis()?;
    let txn = db.begin_write()?;
    let (claimed, swept) = {
        let mut table = txn.open_table(CLAIM_TABLE)?;
        let swept = if sweep { purge_table(&mut table, now)? } else { 0 };

        let live = match table.get(key)? {
            Some(value) => {
                ClaimRecord::decode(key, value.value()).is_some_and(|record| record.is_live(now))
            }
            None => false,
        };

        if live {
            (false, swept)
        } else {
            let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
            let record = ClaimRecord {
                token: token.to_string(),
                expires_at_ms: now.saturating_add(ttl_ms),
            };
            let bytes = serde_json::to_vec(&record)?;
            table.insert(key, bytes.as_slice())?;
            (true, swept)
        }
    };

    if claimed || swept > 0 {
        txn.commit().context("Failed to commit claim")?;
    } else {
        txn.abort()?;
    }
    Ok(claimed)
}

fn owner_blocking(db: &Database, key: &str) -> Result<Option<ClaimToken>> {
    let now = now_millis()?;
    let txn = db.begin_read()?;
    let table = txn.open_table(CLAIM_TABLE)?;
    let owner = table
        .get(key)?
        .and_then(|value| ClaimRecord::decode(key, value.value()))
        .filter(|record| record.is_live(now))
        .and_then(|record| ClaimToken::parse(&record.token));
    Ok(owner)
}

fn now_millis() -> Result<u64> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("System clock is before the unix epoch")?;
    Ok(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
}
