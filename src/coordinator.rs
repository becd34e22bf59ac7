//! Exclusive-writer acquisition with bounded randomized backoff
//!
//! Index writers take an exclusive lock that other processes may hold.
//! Acquisition retries with a uniformly random sleep in
//! `[0.1 * base_delay, base_delay]` so contending processes do not retry
//! in lockstep. Nested acquisition of the same handle within one process
//! is not supported.

use crate::config::WriterConfig;
use crate::error::{Result, SearchError};
use rand::Rng;
use std::time::Duration;

/// A single failed attempt to take the writer lock
#[derive(Debug, Clone)]
pub struct LockContention(pub String);

/// Bounds on the acquisition retry loop
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Consecutive lock failures tolerated before giving up
    pub max_attempts: u32,

    /// Upper bound of the randomized sleep between attempts
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 40,
            base_delay: Duration::from_millis(250),
        }
    }
}

impl From<&WriterConfig> for RetryPolicy {
    fn from(config: &WriterConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
        }
    }
}

/// Run `attempt` until it yields a writer or the policy is exhausted.
///
/// After `max_attempts` consecutive contention failures the last failure
/// is surfaced as [`SearchError::LockTimeout`]. Any other error from the
/// attempt closure is the caller's to model inside `attempt` itself; this
/// loop only understands contention.
pub async fn acquire<T, F>(policy: &RetryPolicy, mut attempt: F) -> Result<T>
where
    F: FnMut() -> std::result::Result<T, LockContention>,
{
    let mut failures = 0u32;
    loop {
        match attempt() {
            Ok(writer) => return Ok(writer),
            Err(LockContention(reason)) => {
                failures += 1;
                if failures >= policy.max_attempts {
                    tracing::warn!(attempts = failures, %reason, "writer lock not acquired");
                    return Err(SearchError::LockTimeout {
                        attempts: failures,
                        reason,
                    });
                }
                tokio::time::sleep(backoff(policy.base_delay)).await;
            }
        }
    }
}

fn backoff(base: Duration) -> Duration {
    base.mul_f64(rand::thread_rng().gen_range(0.1..=1.0))
}
