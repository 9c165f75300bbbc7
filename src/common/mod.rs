pub mod errors;

use std::sync::LazyLock;
use std::time::Duration;

use tokio::runtime::{Builder, Runtime};

/// Prefix of every claim key unless the configuration overrides it.
pub const DEFAULT_NAMESPACE: &str = "norepeat";

/// Joins namespace, operation identifier and digest inside a claim key.
pub const KEY_SEPARATOR: char = '_';

/// Hex length of a BLAKE3 digest.
pub const DIGEST_HEX_LEN: usize = 64;

/// Arguments nested deeper than this are refused during key derivation.
pub const MAX_ARGUMENT_DEPTH: usize = 64;

/// Longest window a single claim may hold a key. Longer ttls are clamped to it.
pub const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Stores drop expired records once every this many claims.
pub const DEFAULT_SWEEP_INTERVAL: usize = 1024;

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(1000);

pub const ENV_PREFIX: &str = "NOREPEAT_";

pub static CURRENT_NUM_THREADS: LazyLock<usize> = LazyLock::new(|| {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
});

// Rocket-specific Tokio Runtime
// This runtime is dedicated to handling network requests, with thread names clearly labeled.
pub static ROCKET_RUNTIME: LazyLock<Runtime> = LazyLock::new(|| {
    Builder::new_multi_thread()
        .worker_threads(*CURRENT_NUM_THREADS)
        .thread_name("rocket-io-worker")
        .enable_all()
        .build()
        .expect("Failed to build Rocket Tokio runtime")
});
