//! Scheduled retries that never block the calling thread.
//!
//! Each attempt after the first is deferred with an explicit delay on the
//! Tokio timer, so the executing context stays free to service other work
//! (for example draining a [`MainQueue`](crate::MainQueue)) while it waits.
//! Typical use is re-activating a preview window whose owning application is
//! not ready yet.

use std::{cmp, fmt::Display, future::Future, result::Result as StdResult, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::{task::JoinHandle, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Upper bound on attempts for a single retried operation.
pub const RETRY_MAX_ATTEMPTS: u32 = 50;
/// Upper bound on the delay between two attempts.
pub const RETRY_MAX_DELAY_MS: u64 = 10_000;

/// Attempt count and pacing for a retried operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first. Clamped to `1..=RETRY_MAX_ATTEMPTS`.
    pub attempts: u32,
    /// Delay before the second attempt, in milliseconds.
    pub delay_ms: u64,
    /// Multiplier applied to the delay after each failed attempt (1 = fixed).
    pub backoff: u32,
    /// Cap on any single delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay_ms: 50,
            backoff: 2,
            max_delay_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    /// Fixed-delay policy.
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        let delay_ms = delay.as_millis().min(u128::from(RETRY_MAX_DELAY_MS)) as u64;
        Self {
            attempts,
            delay_ms,
            backoff: 1,
            max_delay_ms: delay_ms,
        }
    }

    /// Attempts after clamping.
    pub fn effective_attempts(&self) -> u32 {
        self.attempts.clamp(1, RETRY_MAX_ATTEMPTS)
    }

    /// Delay to wait before `attempt` (1-based). Zero for the first attempt.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let cap = cmp::min(self.max_delay_ms, RETRY_MAX_DELAY_MS);
        let factor = u64::from(self.backoff.max(1));
        let mut ms = self.delay_ms;
        for _ in 2..attempt {
            ms = ms.saturating_mul(factor);
            if ms >= cap {
                break;
            }
        }
        Duration::from_millis(cmp::min(ms, cap))
    }
}

/// Run `op` until it succeeds or the policy's attempts are used up.
///
/// `op` receives the 1-based attempt number. Waits between attempts are
/// `tokio::time::sleep`s, never thread-blocking.
pub async fn retry<T, E, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = StdResult<T, E>>,
    E: Display,
{
    let attempts = policy.effective_attempts();
    let mut last = String::new();
    for attempt in 1..=attempts {
        let delay = policy.delay_before(attempt);
        if !delay.is_zero() {
            trace!(label, attempt, delay_ms = delay.as_millis(), "retry_wait");
            time::sleep(delay).await;
        }
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(label, attempt, "retry_succeeded");
                }
                return Ok(value);
            }
            Err(e) => {
                last = e.to_string();
                debug!(label, attempt, attempts, error = %last, "retry_attempt_failed");
            }
        }
    }
    Err(Error::RetriesExhausted {
        label: label.to_string(),
        attempts,
        last,
    })
}

/// Handle to a retry running on its own task.
#[derive(Debug)]
pub struct RetryHandle<T> {
    /// Cancels the remaining attempts.
    token: CancellationToken,
    /// Task running the attempts.
    handle: JoinHandle<Result<T>>,
}

impl<T> RetryHandle<T> {
    /// Cancel any attempts that have not run yet.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// True once the retry has finished (successfully or not).
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the outcome.
    pub async fn join(self) -> Result<T> {
        match self.handle.await {
            Ok(result) => result,
            Err(_) => Err(Error::RetryCancelled),
        }
    }
}

/// Run [`retry`] on a new task of the current runtime.
pub fn spawn_retry<T, E, F, Fut>(policy: RetryPolicy, label: String, op: F) -> RetryHandle<T>
where
    T: Send + 'static,
    F: FnMut(u32) -> Fut + Send + 'static,
    Fut: Future<Output = StdResult<T, E>> + Send,
    E: Display + Send,
{
    let token = CancellationToken::new();
    let cancel = token.clone();
    let handle = tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                trace!(label = %label, "retry_cancelled");
                Err(Error::RetryCancelled)
            }
            result = retry(policy, &label, op) => result,
        }
    });
    RetryHandle { token, handle }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use tokio::time::Instant;

    use super::*;

    #[test]
    fn delays_back_off_and_cap() {
        let policy = RetryPolicy {
            attempts: 6,
            delay_ms: 50,
            backoff: 2,
            max_delay_ms: 300,
        };
        let delays: Vec<u64> = (1..=6)
            .map(|n| policy.delay_before(n).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![0, 50, 100, 200, 300, 300]);
    }

    #[test]
    fn fixed_policy_and_clamping() {
        let policy = RetryPolicy::fixed(0, Duration::from_millis(25));
        assert_eq!(policy.effective_attempts(), 1);
        assert_eq!(policy.delay_before(4), Duration::from_millis(25));
        let many = RetryPolicy {
            attempts: 1_000,
            ..RetryPolicy::default()
        };
        assert_eq!(many.effective_attempts(), RETRY_MAX_ATTEMPTS);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_scheduled_waits() {
        let start = Instant::now();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let policy = RetryPolicy::fixed(5, Duration::from_millis(40));
        let value = retry(policy, "activate", move |attempt| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                if attempt < 3 { Err("not ready") } else { Ok(attempt) }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(80) && waited < Duration::from_millis(90));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_last_error() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(10));
        let err = retry(policy, "activate", |attempt| async move {
            Err::<(), _>(format!("attempt {attempt} refused"))
        })
        .await
        .unwrap_err();
        match err {
            Error::RetriesExhausted {
                label,
                attempts,
                last,
            } => {
                assert_eq!(label, "activate");
                assert_eq!(attempts, 3);
                assert_eq!(last, "attempt 3 refused");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_does_not_block_other_tasks() {
        let ticks = Arc::new(AtomicU32::new(0));
        let t = ticks.clone();
        let ticker = tokio::spawn(async move {
            for _ in 0..10 {
                time::sleep(Duration::from_millis(10)).await;
                t.fetch_add(1, Ordering::SeqCst);
            }
        });
        let policy = RetryPolicy::fixed(2, Duration::from_millis(150));
        let outcome = retry(policy, "slow", |_| async { Err::<(), _>("no") }).await;
        assert!(outcome.is_err());
        // The other task kept running during the 150ms wait.
        assert_eq!(ticks.load(Ordering::SeqCst), 10);
        ticker.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_pending_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let handle = spawn_retry(
            RetryPolicy::fixed(10, Duration::from_millis(100)),
            "activate".to_string(),
            move |_| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("busy")
                }
            },
        );
        time::sleep(Duration::from_millis(150)).await;
        handle.cancel();
        assert!(matches!(handle.join().await, Err(Error::RetryCancelled)));
        let seen = calls.load(Ordering::SeqCst);
        assert_eq!(seen, 2);
        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn spawned_retry_returns_value() {
        let handle = spawn_retry(RetryPolicy::default(), "ok".to_string(), |attempt| async move {
            Ok::<_, String>(attempt * 10)
        });
        assert_eq!(handle.join().await.unwrap(), 10);
    }
}
