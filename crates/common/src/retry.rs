//! Bounded retry with exponential backoff.
//!
//! The attempt budget is modeled as an explicit schedule so backoff and
//! cancellation can be tested without touching the network: callers run the
//! operation, and on failure ask the schedule for the next wait. `None`
//! means the budget is spent.

use std::future::Future;
use std::time::Duration;

/// Attempt budget and backoff shape for a retried operation.
///
/// Shared by the in-process send loop and the bounded-retry cache and
/// publish operations. Never mutated after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryStrategy {
    /// Maximum number of tries, including the first.
    pub attempts: u32,
    /// Wait before the second try.
    pub initial_delay: Duration,
    /// Factor applied to the wait after each failed try.
    pub backoff_multiplier: f64,
}

impl RetryStrategy {
    /// `attempts` is clamped to at least one try.
    pub fn new(attempts: u32, initial_delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            attempts: attempts.max(1),
            initial_delay,
            backoff_multiplier,
        }
    }

    /// Start a fresh schedule for one operation.
    pub fn schedule(&self) -> RetrySchedule {
        RetrySchedule {
            remaining: self.attempts.max(1),
            wait: self.initial_delay,
            multiplier: self.backoff_multiplier,
        }
    }
}

/// Mutable per-operation state: each failed try either yields the wait
/// before the next try or exhausts the budget.
#[derive(Debug, Clone)]
pub struct RetrySchedule {
    remaining: u32,
    wait: Duration,
    multiplier: f64,
}

impl RetrySchedule {
    /// Record a failed try. Returns the wait before the next try, or `None`
    /// once the budget is spent.
    pub fn backoff(&mut self) -> Option<Duration> {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            return None;
        }

        let wait = self.wait;
        self.wait = Duration::from_secs_f64(self.wait.as_secs_f64() * self.multiplier);
        Some(wait)
    }

    /// Tries left in the budget.
    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}

/// Run `op` until it succeeds or the strategy's budget is spent, sleeping
/// the scheduled wait between tries. Returns the last error on exhaustion.
///
/// Used for network-level resilience (cache round-trips, broker publishes).
/// The send handler runs its own loop instead, because its waits must also
/// observe cancellation.
pub async fn retry<T, E, F, Fut>(strategy: &RetryStrategy, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut schedule = strategy.schedule();
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => match schedule.backoff() {
                Some(wait) => tokio::time::sleep(wait).await,
                None => return Err(err),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_schedule_yields_attempts_minus_one_waits() {
        let strategy = RetryStrategy::new(3, Duration::from_millis(100), 2.0);
        let mut schedule = strategy.schedule();

        assert_eq!(schedule.backoff(), Some(Duration::from_millis(100)));
        assert_eq!(schedule.backoff(), Some(Duration::from_millis(200)));
        assert_eq!(schedule.backoff(), None);
    }

    #[test]
    fn test_waits_non_decreasing() {
        let strategy = RetryStrategy::new(5, Duration::from_millis(50), 1.5);
        let mut schedule = strategy.schedule();

        let mut last = Duration::ZERO;
        while let Some(wait) = schedule.backoff() {
            assert!(wait >= last);
            last = wait;
        }
    }

    #[test]
    fn test_single_attempt_exhausts_immediately() {
        let strategy = RetryStrategy::new(1, Duration::from_millis(100), 2.0);
        assert_eq!(strategy.schedule().backoff(), None);
    }

    #[test]
    fn test_zero_attempts_clamped_to_one() {
        let strategy = RetryStrategy::new(0, Duration::from_millis(100), 2.0);
        assert_eq!(strategy.attempts, 1);
        assert_eq!(strategy.schedule().backoff(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_on_kth_attempt() {
        let strategy = RetryStrategy::new(5, Duration::from_millis(10), 2.0);
        let calls = AtomicU32::new(0);

        let result: Result<u32, &str> = retry(&strategy, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 { Err("not yet") } else { Ok(n) }
        })
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_returns_last_error() {
        let strategy = RetryStrategy::new(3, Duration::from_millis(10), 2.0);
        let calls = AtomicU32::new(0);

        let result: Result<(), u32> = retry(&strategy, || async {
            Err(calls.fetch_add(1, Ordering::SeqCst) + 1)
        })
        .await;

        assert_eq!(result, Err(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
