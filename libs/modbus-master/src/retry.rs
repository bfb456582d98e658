//! Retry policy executor
//!
//! Runs an attempt function up to a bounded number of times with a fixed delay
//! between attempts. Failures are classified through [`Classify`]: transient
//! failures are retried, fatal ones abort immediately. The cancellation token
//! is checked before every attempt and raced against every delay.

use std::fmt::Display;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{Classify, FailureKind};

/// Retry strategy, selected once from the configuration snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    /// One attempt, same classification semantics
    SingleAttempt,
    /// Up to `max_attempts` attempts with a fixed `delay` between them
    Bounded { max_attempts: u32, delay: Duration },
}

impl RetryStrategy {
    /// Create from configuration values
    ///
    /// A retry count of 0 or 1 means "no retry" and yields `SingleAttempt`.
    pub fn from_config(number_of_retries: u32, retry_delay_ms: u64) -> Self {
        if number_of_retries <= 1 {
            RetryStrategy::SingleAttempt
        } else {
            RetryStrategy::Bounded {
                max_attempts: number_of_retries,
                delay: Duration::from_millis(retry_delay_ms),
            }
        }
    }

    /// Total number of attempts this strategy allows
    pub fn max_attempts(&self) -> u32 {
        match self {
            RetryStrategy::SingleAttempt => 1,
            RetryStrategy::Bounded { max_attempts, .. } => (*max_attempts).max(1),
        }
    }

    /// Pause between two attempts
    pub fn delay(&self) -> Duration {
        match self {
            RetryStrategy::SingleAttempt => Duration::ZERO,
            RetryStrategy::Bounded { delay, .. } => *delay,
        }
    }
}

/// Why the executor stopped without a result
#[derive(Debug)]
pub enum RetryError<E> {
    /// Cancellation observed; not a reportable failure
    Cancelled { attempts: u32 },
    /// Fatal failure, remaining attempts not consumed
    Fatal { attempts: u32, error: E },
    /// Every attempt failed transiently; carries the last cause
    Exhausted { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    /// Attempts made before stopping
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Cancelled { attempts }
            | RetryError::Fatal { attempts, .. }
            | RetryError::Exhausted { attempts, .. } => *attempts,
        }
    }
}

/// Bounded retry-with-fixed-delay executor
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    /// Operation name used in log events
    name: &'static str,
    strategy: RetryStrategy,
}

impl RetryExecutor {
    /// Create a new executor
    pub fn new(name: &'static str, strategy: RetryStrategy) -> Self {
        Self { name, strategy }
    }

    /// Get the strategy this executor was built with
    pub fn strategy(&self) -> RetryStrategy {
        self.strategy
    }

    /// Execute `attempt` against `target` until it succeeds, fails fatally,
    /// runs out of attempts, or `cancel` fires.
    ///
    /// The attempt receives exclusive access to `target` and the 1-based
    /// attempt number.
    pub async fn execute<S, T, E, F>(
        &self,
        cancel: &CancellationToken,
        target: &mut S,
        mut attempt: F,
    ) -> Result<T, RetryError<E>>
    where
        S: ?Sized + Send,
        E: Classify + Display,
        F: for<'a> FnMut(&'a mut S, u32) -> BoxFuture<'a, Result<T, E>>,
    {
        let max_attempts = self.strategy.max_attempts();
        let mut attempts = 0;

        loop {
            if cancel.is_cancelled() {
                trace!("{} cancelled before attempt {}", self.name, attempts + 1);
                return Err(RetryError::Cancelled { attempts });
            }

            attempts += 1;
            let error = match attempt(&mut *target, attempts).await {
                Ok(value) => {
                    if attempts > 1 {
                        debug!("{} succeeded on attempt {}", self.name, attempts);
                    }
                    return Ok(value);
                },
                Err(e) => e,
            };

            if error.is_cancellation() {
                trace!("{} cancelled during attempt {}", self.name, attempts);
                return Err(RetryError::Cancelled { attempts });
            }

            if error.failure_kind() == FailureKind::Fatal {
                debug!("{} failed fatally on attempt {}: {}", self.name, attempts, error);
                return Err(RetryError::Fatal { attempts, error });
            }

            if attempts >= max_attempts {
                return Err(RetryError::Exhausted {
                    attempts,
                    last: error,
                });
            }

            let delay = self.strategy.delay();
            warn!(
                "{} failed, retry {}/{} in {}ms: {}",
                self.name,
                attempts + 1,
                max_attempts,
                delay.as_millis(),
                error
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    trace!("{} cancelled while waiting to retry", self.name);
                    return Err(RetryError::Cancelled { attempts });
                },
                _ = tokio::time::sleep(delay) => {},
            }
        }
    }
}
