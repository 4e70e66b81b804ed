use crate::api::Error;
use futures_util::future::BoxFuture;
use std::time::Duration;

/// How many times, and how far apart, an operation is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts; `None` retries forever.
    pub max_attempts: Option<u32>,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn bounded(max_attempts: u32, delay: Duration) -> Self {
        RetryPolicy {
            max_attempts: Some(max_attempts),
            delay,
        }
    }

    pub const fn unbounded(delay: Duration) -> Self {
        RetryPolicy {
            max_attempts: None,
            delay,
        }
    }

    /// Whether another attempt may follow `attempts` failed ones.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempts < max)
    }

    pub async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }

    /// Run `op` against `state` until it succeeds, fails with an error `retryable` rejects, or
    /// the policy runs out of attempts. The last error is returned in the latter two cases.
    pub async fn run<S, T, F, R>(&self, state: &mut S, mut op: F, retryable: R) -> Result<T, Error>
    where
        F: for<'a> FnMut(&'a mut S) -> BoxFuture<'a, Result<T, Error>>,
        R: Fn(&Error) -> bool,
    {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            match op(&mut *state).await {
                Ok(value) => return Ok(value),
                Err(e) if retryable(&e) && self.allows_retry(attempts) => {
                    log::debug!("Attempt {} failed: {}; retrying", attempts, e);
                    self.pause().await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
