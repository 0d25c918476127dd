//! Retry with Backoff
//!
//! Transport failures are retried on a fixed exponential schedule; anything
//! the provider actually answered is returned as-is.

use std::future::Future;
use std::time::Duration;

use crate::error::Result;

/// Sleep schedule between attempts
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    /// 100 ms, 400 ms, 1.6 s
    fn default() -> Self {
        Self::with_delays(vec![
            Duration::from_millis(100),
            Duration::from_millis(400),
            Duration::from_millis(1600),
        ])
    }
}

impl RetryPolicy {
    pub fn with_delays(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self::with_delays(Vec::new())
    }

    pub fn max_attempts(&self) -> usize {
        self.delays.len() + 1
    }

    /// Run `op` until it succeeds, fails permanently, or the schedule runs out
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.delays.len() => {
                    let delay = self.delays[attempt];
                    attempt += 1;
                    tracing::warn!(
                        op = label,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Provider call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PaymentError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy::with_delays(vec![Duration::ZERO; 3])
    }

    #[test]
    fn test_default_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.delays[2], Duration::from_millis(1600));
    }

    #[tokio::test]
    async fn test_retries_transport_until_success() {
        let calls = &AtomicUsize::new(0);
        let result = fast()
            .run("pause", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(PaymentError::Transport("reset".into()))
                } else {
                    Ok("done")
                }
            })
            .await;
        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_schedule() {
        let calls = &AtomicUsize::new(0);
        let result: Result<()> = fast()
            .run("cancel", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(PaymentError::Transport("timeout".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let calls = &AtomicUsize::new(0);
        let result: Result<()> = fast()
            .run("resume", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(PaymentError::UpstreamRejected("No such subscription".into()))
            })
            .await;
        assert_eq!(
            result,
            Err(PaymentError::UpstreamRejected("No such subscription".into()))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
