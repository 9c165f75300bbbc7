pub mod error;
mod finite;
pub mod guard;
pub mod key;
pub mod retry;

pub use error::{DedupError, KeyDerivationError};
pub use guard::{DedupGuard, FailureMode, Outcome};
pub use key::{Arguments, DedupKey, KeyDeriver, derive_key};
pub use retry::{BackoffStrategy, RetryPolicy};

use std::time::Duration;

/// Dedup policy of one guarded operation: which identifier it claims under
/// and for how long an accepted call blocks its repeats.
///
/// ```
/// use norepeat::dedup::Norepeat;
///
/// const SUBMIT_ORDER: Norepeat = Norepeat::new("/orders", 5000);
/// assert_eq!(SUBMIT_ORDER.expire.as_millis(), 5000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Norepeat {
    pub value: &'static str,
    pub expire: Duration,
}

impl Norepeat {
    pub const fn new(value: &'static str, expire_millis: u64) -> Self {
        Self {
            value,
            expire: Duration::from_millis(expire_millis),
        }
    }
}
