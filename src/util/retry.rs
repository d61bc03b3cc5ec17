//! Retry loops for network fetches and contended cache writes.

use std::time::Duration;

use anyhow::Result;
use backoff::backoff::Constant;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};

use crate::core::PackageError;

/// Capped exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 8,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(20),
        }
    }
}

impl RetryPolicy {
    /// A policy that retries without sleeping, for tests.
    pub fn immediate(max_attempts: usize) -> Self {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// The backoff schedule: doubling from `initial_delay`, capped at
    /// `max_delay`, without jitter. Attempts are bounded by [`run`](Self::run).
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_delay)
            .with_randomization_factor(0.0)
            .with_multiplier(2.0)
            .with_max_interval(self.max_delay)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Run `op` until it succeeds or the attempts run out.
    ///
    /// `op` receives the zero-based attempt number. Exhausting every attempt
    /// yields [`PackageError::DownloadFailed`] carrying each attempt's error.
    pub fn run<T>(&self, target: &str, mut op: impl FnMut(usize) -> Result<T>) -> Result<T> {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        let mut errors = Vec::new();

        let result = backoff::retry(self.backoff(), || {
            let current = attempt;
            attempt += 1;
            op(current).map_err(|e| {
                tracing::debug!("attempt {} for {} failed: {:#}", attempt, target, e);
                errors.push(format!("{:#}", e));
                if attempt >= attempts {
                    backoff::Error::permanent(())
                } else {
                    backoff::Error::transient(())
                }
            })
        });

        result.map_err(|_| {
            PackageError::DownloadFailed {
                url: target.to_string(),
                attempts,
                errors,
            }
            .into()
        })
    }
}

/// Retry `op` a fixed number of times with a constant delay.
///
/// Returns the last error when every attempt fails.
pub fn retry_fixed<T>(
    attempts: usize,
    delay: Duration,
    mut op: impl FnMut() -> std::io::Result<T>,
) -> std::io::Result<T> {
    let attempts = attempts.max(1);
    let mut attempt = 0;

    backoff::retry(Constant::new(delay), || {
        attempt += 1;
        op().map_err(|e| {
            if attempt >= attempts {
                backoff::Error::permanent(e)
            } else {
                tracing::debug!("attempt {} failed: {}", attempt, e);
                backoff::Error::transient(e)
            }
        })
    })
    .map_err(|e| match e {
        backoff::Error::Permanent(e) => e,
        backoff::Error::Transient { err, .. } => err,
    })
}
