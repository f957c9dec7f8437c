//! Retry/backoff/timeout policy.
//!
//! One configuration struct and one generic entry point,
//! [`call_with_policy`], keep the retry logic in a single auditable place
//! instead of scattering it across wrappers.  Every caller that needs
//! retries -- the dispatch strategies, or external code driving arbitrary
//! async work -- goes through here.

use std::future::Future;
use std::time::Duration;

/// Retry configuration shared by all dispatch strategies.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempt count.  `0` and `1` both mean a single attempt.
    pub retries: u32,
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Delay after the first failed attempt; multiplied by
    /// `backoff_factor` after each subsequent failure.
    pub retry_delay: Duration,
    /// Exponential backoff multiplier.
    pub backoff_factor: f64,
    /// Per-attempt time limit.  A timed-out attempt counts as a failure
    /// and consumes a retry.
    pub timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 1,
            initial_delay: Duration::ZERO,
            retry_delay: Duration::ZERO,
            backoff_factor: 1.0,
            timeout: None,
        }
    }
}

impl RetryPolicy {
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Why a policy-driven call gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptError {
    /// The final attempt exceeded the per-attempt time limit.
    Timeout { limit: Duration },
    /// The final attempt failed with this message.
    Failed(String),
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout { limit } => write!(f, "attempt timed out after {limit:?}"),
            Self::Failed(message) => write!(f, "{message}"),
        }
    }
}

/// Run `attempt` under `policy`: initial delay, per-attempt timeout, and
/// exponential backoff between failed attempts.  Returns the first success
/// or the last failure.
pub async fn call_with_policy<T, F, Fut>(
    policy: &RetryPolicy,
    mut attempt: F,
) -> std::result::Result<T, AttemptError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, String>>,
{
    if !policy.initial_delay.is_zero() {
        tokio::time::sleep(policy.initial_delay).await;
    }

    let total = policy.retries.max(1);
    let mut delay = policy.retry_delay;

    for round in 1..=total {
        let outcome = match policy.timeout {
            Some(limit) => match tokio::time::timeout(limit, attempt()).await {
                Ok(result) => result.map_err(AttemptError::Failed),
                Err(_) => Err(AttemptError::Timeout { limit }),
            },
            None => attempt().await.map_err(AttemptError::Failed),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(error) => {
                if round == total {
                    return Err(error);
                }
                tracing::debug!(
                    round = round,
                    total = total,
                    error = %error,
                    "attempt failed, retrying"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                delay = delay.mul_f64(policy.backoff_factor);
            }
        }
    }

    unreachable!("loop returns on the final round")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
