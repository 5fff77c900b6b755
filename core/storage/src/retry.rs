//! Backoff for transient failures of remote stores.
//!
//! Only store clients retry. Services built on the stores surface
//! `Unavailable` to their caller as is.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use cipherdrop_common::Result;

/// Doubling backoff with jitter, retrying only `Error::is_retryable` failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Wait ceiling before the first retry.
    pub base: Duration,
    /// Upper bound for any wait.
    pub cap: Duration,
}

impl Backoff {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base: Duration::from_millis(250),
            cap: Duration::from_secs(10),
        }
    }

    /// Fail on the first error.
    pub fn never() -> Self {
        Self::new(0)
    }

    pub fn with_base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    pub fn with_cap(mut self, cap: Duration) -> Self {
        self.cap = cap;
        self
    }

    /// Longest wait before retry number `retry` (0-based): `base * 2^retry`,
    /// bounded by `cap`.
    pub fn ceiling(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Actual wait: uniform between half the ceiling and the ceiling.
    pub fn delay(&self, retry: u32) -> Duration {
        let half = self.ceiling(retry) / 2;
        half + half.mul_f64(rand::random::<f64>())
    }

    /// Run `op` until it succeeds, fails permanently, or retries run out.
    ///
    /// `what` names the call in log lines.
    pub async fn run<F, Fut, T>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retry = 0;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !err.is_retryable() || retry >= self.max_retries {
                return Err(err);
            }

            let wait = self.delay(retry);
            retry += 1;
            warn!(
                call = what,
                retry,
                wait_ms = wait.as_millis() as u64,
                error = %err,
                "Store call failed, retrying"
            );
            sleep(wait).await;
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cipherdrop_common::Error;
    use std::cell::Cell;

    fn quick(max_retries: u32) -> Backoff {
        Backoff::new(max_retries).with_base(Duration::from_millis(2))
    }

    #[test]
    fn test_ceiling_doubles_until_cap() {
        let b = Backoff::new(5)
            .with_base(Duration::from_secs(1))
            .with_cap(Duration::from_secs(5));

        assert_eq!(b.ceiling(0), Duration::from_secs(1));
        assert_eq!(b.ceiling(1), Duration::from_secs(2));
        assert_eq!(b.ceiling(2), Duration::from_secs(4));
        assert_eq!(b.ceiling(3), Duration::from_secs(5));
        assert_eq!(b.ceiling(40), Duration::from_secs(5));
    }

    #[test]
    fn test_delay_within_half_to_full_ceiling() {
        let b = Backoff::default();
        for retry in 0..6 {
            let d = b.delay(retry);
            assert!(d >= b.ceiling(retry) / 2);
            assert!(d <= b.ceiling(retry));
        }
    }

    #[tokio::test]
    async fn test_unavailable_is_retried() {
        let calls = Cell::new(0);
        let out = quick(3)
            .run("get", || {
                calls.set(calls.get() + 1);
                let n = calls.get();
                async move {
                    if n < 3 {
                        Err(Error::Unavailable("503".to_string()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(out.unwrap(), 3);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_fail_at_once() {
        let calls = Cell::new(0);
        let out: Result<()> = quick(3)
            .run("get", || {
                calls.set(calls.get() + 1);
                async { Err(Error::AuthenticationFailure) }
            })
            .await;

        assert!(matches!(out, Err(Error::AuthenticationFailure)));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = Cell::new(0);
        let out: Result<()> = quick(2)
            .run("put", || {
                calls.set(calls.get() + 1);
                async { Err(Error::Unavailable("down".to_string())) }
            })
            .await;

        assert!(matches!(out, Err(Error::Unavailable(_))));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn test_never() {
        let calls = Cell::new(0);
        let _: Result<()> = Backoff::never()
            .run("put", || {
                calls.set(calls.get() + 1);
                async { Err(Error::Unavailable("down".to_string())) }
            })
            .await;

        assert_eq!(calls.get(), 1);
    }
}
