//! Bounded retry combinator
//!
//! A fixed number of attempts separated by a fixed sleep. There is no sleep
//! after the final attempt, so a run that never succeeds is bounded by
//! `(max_attempts - 1) * interval` plus the time spent in the operation.
//! [`Retry::run_paced`] also puts a deadline on every attempt, which bounds
//! the whole run by `max_attempts * interval`.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Configures a bounded retry operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retry {
    max_attempts: u32,
    interval: Duration,
}

/// A successful retry run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Succeeded<T> {
    /// Value produced by the succeeding attempt
    pub value: T,
    /// 1-based number of the succeeding attempt
    pub attempts: u32,
}

/// A retry run that used up its budget
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exhausted<E> {
    /// Error from the final attempt
    pub last_error: E,
    /// Attempts made
    pub attempts: u32,
}

impl Retry {
    /// `max_attempts` tries with `interval` between them; at least one try is always made
    #[must_use]
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }

    /// Attempt budget
    #[inline]
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Sleep between attempts
    #[inline]
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Upper bound on time spent sleeping across a whole run
    #[must_use]
    pub fn max_sleep(&self) -> Duration {
        self.interval * (self.max_attempts - 1)
    }

    /// Run `op` until it returns `Ok` or the budget is spent.
    ///
    /// `op` receives the 0-based attempt number.
    ///
    /// # Errors
    /// [`Exhausted`] carrying the final attempt's error.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<Succeeded<T>, Exhausted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    return Ok(Succeeded {
                        value,
                        attempts: attempt + 1,
                    })
                }
                Err(last_error) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(Exhausted {
                            last_error,
                            attempts: attempt,
                        });
                    }
                    debug!(attempt, interval = ?self.interval, "retrying");
                    tokio::time::sleep(self.interval).await;
                }
            }
        }
    }

    /// Run `op` on a fixed schedule: attempt `k` starts no earlier than
    /// `k * interval` and is cut off at `(k + 1) * interval`, with
    /// `on_deadline` standing in for its error.
    ///
    /// A whole run, successful or not, takes at most `max_attempts * interval`.
    /// A zero interval leaves attempts without a deadline.
    ///
    /// # Errors
    /// [`Exhausted`] carrying the final attempt's error.
    pub async fn run_paced<T, E, F, Fut, D>(
        &self,
        mut op: F,
        on_deadline: D,
    ) -> Result<Succeeded<T>, Exhausted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        D: Fn(Duration) -> E,
    {
        let start = Instant::now();
        let mut attempt = 0;
        loop {
            let tick = start + self.interval * (attempt + 1);
            let result = if self.interval.is_zero() {
                op(attempt).await
            } else {
                tokio::time::timeout_at(tick, op(attempt))
                    .await
                    .unwrap_or_else(|_| Err(on_deadline(self.interval)))
            };
            match result {
                Ok(value) => {
                    return Ok(Succeeded {
                        value,
                        attempts: attempt + 1,
                    })
                }
                Err(last_error) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(Exhausted {
                            last_error,
                            attempts: attempt,
                        });
                    }
                    debug!(attempt, interval = ?self.interval, "retrying on schedule");
                    tokio::time::sleep_until(tick).await;
                }
            }
        }
    }
}

/// Shorthand for `Retry::new(attempts, interval).run(op)`.
///
/// # Errors
/// [`Exhausted`] when no attempt succeeds.
pub async fn retry<T, E, F, Fut>(
    attempts: u32,
    interval: Duration,
    op: F,
) -> Result<Succeeded<T>, Exhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    Retry::new(attempts, interval).run(op).await
}
