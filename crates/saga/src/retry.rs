//! Retry policies for step handlers.
//!
//! The engine never retries on its own: every step carries a policy, and the
//! default [`NoRetry`] gives up after the first failure. Callers that want
//! retries attach a policy with their own numbers.

use std::future::Future;
use std::time::Duration;

use common::StepId;

use crate::error::HandlerType;

/// Decides whether a failed handler call is attempted again.
pub trait RetryPolicy: Send + Sync + std::fmt::Debug {
    /// Returns the delay before the next attempt, or `None` to give up.
    ///
    /// `attempt` is the 1-based number of the attempt that just failed.
    fn next_delay(&self, handler: HandlerType, attempt: u32) -> Option<Duration>;
}

/// Never retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn next_delay(&self, _handler: HandlerType, _attempt: u32) -> Option<Duration> {
        None
    }
}

/// Retries up to `max_attempts` total attempts with a constant delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedRetry {
    max_attempts: u32,
    delay: Duration,
    retry_compensation: bool,
}

impl FixedRetry {
    /// Creates a policy allowing `max_attempts` attempts in total, applied to
    /// both invoke and compensate handlers.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            retry_compensation: true,
        }
    }

    /// Restricts retries to invoke handlers.
    pub fn invoke_only(mut self) -> Self {
        self.retry_compensation = false;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl RetryPolicy for FixedRetry {
    fn next_delay(&self, handler: HandlerType, attempt: u32) -> Option<Duration> {
        if handler == HandlerType::Compensate && !self.retry_compensation {
            return None;
        }
        (attempt < self.max_attempts).then_some(self.delay)
    }
}

/// Calls `attempt_fn` until it succeeds or the policy gives up.
///
/// Returns the final result together with the number of attempts made.
pub(crate) async fn with_retry<T, E, F, Fut>(
    policy: &dyn RetryPolicy,
    handler: HandlerType,
    step_id: &StepId,
    mut attempt_fn: F,
) -> (Result<T, E>, u32)
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match attempt_fn(attempt).await {
            Ok(value) => return (Ok(value), attempt),
            Err(err) => match policy.next_delay(handler, attempt) {
                Some(delay) => {
                    tracing::warn!(
                        step = %step_id,
                        %handler,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "step handler failed, retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                None => return (Err(err), attempt),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn test_no_retry_gives_up_immediately() {
        assert_eq!(NoRetry.next_delay(HandlerType::Invoke, 1), None);
        assert_eq!(NoRetry.next_delay(HandlerType::Compensate, 1), None);
    }

    #[test]
    fn test_fixed_retry_counts_total_attempts() {
        let policy = FixedRetry::new(3, Duration::from_millis(5));
        assert_eq!(
            policy.next_delay(HandlerType::Invoke, 1),
            Some(Duration::from_millis(5))
        );
        assert_eq!(
            policy.next_delay(HandlerType::Invoke, 2),
            Some(Duration::from_millis(5))
        );
        assert_eq!(policy.next_delay(HandlerType::Invoke, 3), None);
    }

    #[test]
    fn test_fixed_retry_invoke_only() {
        let policy = FixedRetry::new(3, Duration::ZERO).invoke_only();
        assert!(policy.next_delay(HandlerType::Invoke, 1).is_some());
        assert!(policy.next_delay(HandlerType::Compensate, 1).is_none());
    }

    #[tokio::test]
    async fn test_with_retry_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let policy = FixedRetry::new(5, Duration::ZERO);
        let step = StepId::from("flaky");

        let (result, attempts) = with_retry(&policy, HandlerType::Invoke, &step, |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { if n < 3 { Err("not yet") } else { Ok(n) } }
        })
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_with_retry_returns_last_error() {
        let policy = FixedRetry::new(2, Duration::ZERO);
        let step = StepId::from("broken");

        let (result, attempts) =
            with_retry(&policy, HandlerType::Invoke, &step, |attempt| async move {
                Err::<(), _>(format!("attempt {attempt}"))
            })
            .await;

        assert_eq!(result, Err("attempt 2".to_string()));
        assert_eq!(attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_waits_between_attempts() {
        let policy = FixedRetry::new(2, Duration::from_secs(30));
        let step = StepId::from("slow");
        let start = tokio::time::Instant::now();

        let (result, _) =
            with_retry(&policy, HandlerType::Invoke, &step, |attempt| async move {
                if attempt == 1 { Err(()) } else { Ok(()) }
            })
            .await;

        assert!(result.is_ok());
        assert!(start.elapsed() >= Duration::from_secs(30));
    }
}
