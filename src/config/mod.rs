use anyhow::{Context, Result};
use dotenv::dotenv;
use log::info;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::common::{DEFAULT_NAMESPACE, DEFAULT_SWEEP_INTERVAL, ENV_PREFIX};
use crate::dedup::{BackoffStrategy, DedupGuard, FailureMode, RetryPolicy};
use crate::store::{ClaimStore, MemoryClaimStore, RedbClaimStore, RedisClaimStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Claims held in this process only
    #[default]
    Memory,
    /// Claims held in an embedded redb file
    Redb,
    /// Claims held on a Redis server shared by every replica
    Redis,
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreBackend::Memory => "memory",
            StoreBackend::Redb => "redb",
            StoreBackend::Redis => "redis",
        }
    }
}

/// Guard settings, read from `NOREPEAT_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Prefix of every claim key
    pub namespace: String,
    pub backend: StoreBackend,
    pub redis_url: String,
    pub redb_path: PathBuf,
    /// Bound on a single store round-trip
    pub store_timeout_ms: u64,
    /// Retries after the store could not be reached
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Let calls through when the store is down (duplicates may slip by)
    pub fail_open: bool,
    /// Claims between two sweeps of expired records (memory and redb)
    pub sweep_interval: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            backend: StoreBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            redb_path: PathBuf::from("./db/norepeat.redb"),
            store_timeout_ms: 1000,
            max_retries: 2,
            retry_base_delay_ms: 50,
            retry_max_delay_ms: 1000,
            fail_open: false,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl DedupConfig {
    /// Reads `.env` if present, then the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::prefixed(ENV_PREFIX)
            .from_iter(vars)
            .with_context(|| format!("Failed to read {}* configuration", ENV_PREFIX))
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn failure_mode(&self) -> FailureMode {
        if self.fail_open {
            FailureMode::FailOpen
        } else {
            FailureMode::FailClosed
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            strategy: BackoffStrategy::ExponentialWithJitter,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }

    pub async fn build_store(&self) -> Result<Arc<dyn ClaimStore>> {
        let store: Arc<dyn ClaimStore> = match self.backend {
            StoreBackend::Memory => {
                Arc::new(MemoryClaimStore::new().with_sweep_interval(self.sweep_interval))
            }
            StoreBackend::Redb => Arc::new(
                RedbClaimStore::open(&self.redb_path)?.with_sweep_interval(self.sweep_interval),
            ),
            StoreBackend::Redis => Arc::new(RedisClaimStore::connect(&self.redis_url).await?),
        };
        Ok(store)
    }

    pub async fn build_guard(&self) -> Result<DedupGuard> {
        let store = self
            .build_store()
            .await
            .with_context(|| format!("Failed to open {} claim store", self.backend.as_str()))?;

        let guard = DedupGuard::new(store)
            .with_namespace(&self.namespace)?
            .with_store_timeout(self.store_timeout())
            .with_retry_policy(self.retry_policy())
            .with_failure_mode(self.failure_mode());

        info!(
            backend = self.backend.as_str(),
            namespace = self.namespace.as_str(),
            fail_open = self.fail_open;
            "Dedup guard ready"
        );
        Ok(guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = DedupConfig::from_vars(vars(&[("PATH", "/usr/bin")])).unwrap();
        assert_eq!(config, DedupConfig::default());
        assert_eq!(config.failure_mode(), FailureMode::FailClosed);
    }

    #[test]
    fn prefixed_variables_override_defaults() {
        let config = DedupConfig::from_vars(vars(&[
            ("NOREPEAT_NAMESPACE", "orders"),
            ("NOREPEAT_BACKEND", "redis"),
            ("NOREPEAT_REDIS_URL", "redis://cache:6379"),
            ("NOREPEAT_STORE_TIMEOUT_MS", "250"),
            ("NOREPEAT_MAX_RETRIES", "0"),
            ("NOREPEAT_FAIL_OPEN", "true"),
            ("NOREPEAT_SWEEP_INTERVAL", "64"),
        ]))
        .unwrap();

        assert_eq!(config.namespace, "orders");
        assert_eq!(config.backend, StoreBackend::Redis);
        assert_eq!(config.redis_url, "redis://cache:6379");
        assert_eq!(config.store_timeout(), Duration::from_millis(250));
        assert_eq!(config.retry_policy().max_retries, 0);
        assert_eq!(config.failure_mode(), FailureMode::FailOpen);
        assert_eq!(config.sweep_interval, 64);
        assert_eq!(config.redb_path, PathBuf::from("./db/norepeat.redb"));
    }

    #[test]
    fn malformed_values_are_reported() {
        let err = DedupConfig::from_vars(vars(&[("NOREPEAT_STORE_TIMEOUT_MS", "soon")]))
            .unwrap_err();
        assert!(format!("{err:#}").contains("NOREPEAT_"));
    }

    #[tokio::test]
    async fn memory_guard_is_built_from_defaults() {
        let guard = DedupConfig::default().build_guard().await.unwrap();
        assert_eq!(guard.deriver().namespace(), DEFAULT_NAMESPACE);
    }

    #[tokio::test]
    async fn invalid_namespace_stops_the_build() {
        let config = DedupConfig {
            namespace: "no_repeat".to_string(),
            ..DedupConfig::default()
        };
        assert!(config.build_guard().await.is_err());
    }
}
