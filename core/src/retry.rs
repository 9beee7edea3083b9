//! Retry with randomized backoff for transient database failures.
//!
//! Only `ErrorClass::Transient` errors are retried. Data and fatal
//! errors return on the first attempt.

use crate::{
    error::{ArrearsError, ArrearsResult},
    rng::JitterRng,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Fixed part of every backoff.
    pub base_delay_ms: u64,
    /// Upper bound of the random part, in whole seconds.
    pub max_interval_seconds: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_interval_seconds: 5,
        }
    }
}

impl RetryPolicy {
    /// Never sleeps. Used by tests.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay_ms: 0,
            max_interval_seconds: 0,
        }
    }

    /// `base + random(0..=max_interval_seconds)` seconds of jitter,
    /// drawn at millisecond resolution.
    pub fn backoff(&self, rng: &mut JitterRng) -> Duration {
        let window_ms = self.max_interval_seconds.saturating_mul(1_000).saturating_add(1);
        let jitter_ms = rng.next_u64_below(window_ms);
        Duration::from_millis(self.base_delay_ms.saturating_add(jitter_ms))
    }
}

/// A value together with how many retries it took.
#[derive(Debug)]
pub struct Retried<T> {
    pub value: T,
    pub retries: u32,
}

/// The error that ended the attempts, with the retries spent before it.
#[derive(Debug)]
pub struct RetryFailure {
    pub retries: u32,
    pub error: ArrearsError,
}

/// Run `op` until it succeeds, fails with a non-transient error, or has
/// been retried `policy.max_retries` times. Exhaustion is reported as
/// `ArrearsError::RetriesExhausted` wrapping the last transient error.
pub fn retry_with_backoff<T>(
    policy: &RetryPolicy,
    rng: &mut JitterRng,
    label: &str,
    mut op: impl FnMut() -> ArrearsResult<T>,
) -> Result<Retried<T>, RetryFailure> {
    let mut retries = 0;
    loop {
        match op() {
            Ok(value) => return Ok(Retried { value, retries }),
            Err(e) if e.is_transient() && retries < policy.max_retries => {
                retries += 1;
                let delay = policy.backoff(rng);
                log::warn!(
                    "{label}: transient failure ({e}); retry {retries}/{} in {delay:?} [{}]",
                    policy.max_retries,
                    rng.name
                );
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
            }
            Err(e) if e.is_transient() => {
                return Err(RetryFailure {
                    retries,
                    error: ArrearsError::RetriesExhausted {
                        attempts: retries + 1,
                        last_error: Box::new(e),
                    },
                })
            }
            Err(e) => return Err(RetryFailure { retries, error: e }),
        }
    }
}
