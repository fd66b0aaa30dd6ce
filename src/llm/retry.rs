//! Bounded retry with exponential backoff around model calls

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use super::client::{LanguageModel, ModelRequest};
use crate::error::ModelError;

/// Retry policy for model calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Same attempt budget, no waiting between attempts
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before the retry following `attempt` (0-based)
    ///
    /// A rate-limit hint from the server wins over the computed backoff,
    /// but is still capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        let backoff = self.base_delay.saturating_mul(factor).min(self.max_delay);
        match hint {
            Some(hint) => hint.max(backoff).min(self.max_delay),
            None => backoff,
        }
    }
}

/// What to do with the outcome of one attempt
#[derive(Debug)]
pub enum RetryAction<T> {
    Success(T),
    Retry(ModelError),
    Fail(ModelError),
}

/// A value together with the number of retries spent obtaining it
#[derive(Debug, Clone, PartialEq)]
pub struct Retried<T> {
    pub value: T,
    pub retries: u32,
}

#[derive(Debug, Error)]
#[error("{label} failed after {retries} retries: {last_error}")]
pub struct RetryExhausted {
    pub label: String,
    pub retries: u32,
    pub last_error: ModelError,
}

/// Run `operation` until it succeeds, fails permanently, or the policy is spent
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<Retried<T>, RetryExhausted>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = RetryAction<T>>,
{
    let mut attempt = 0;
    loop {
        match operation(attempt).await {
            RetryAction::Success(value) => {
                if attempt > 0 {
                    debug!(label, retries = attempt, "Succeeded after retry");
                }
                return Ok(Retried {
                    value,
                    retries: attempt,
                });
            }
            RetryAction::Fail(error) => {
                return Err(RetryExhausted {
                    label: label.to_string(),
                    retries: attempt,
                    last_error: error,
                });
            }
            RetryAction::Retry(error) => {
                if attempt >= policy.max_retries {
                    return Err(RetryExhausted {
                        label: label.to_string(),
                        retries: attempt,
                        last_error: error,
                    });
                }
                let delay = policy.delay_for(attempt, error.retry_after());
                warn!(
                    label,
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Model call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Call the model and parse its answer, retrying transient failures and
/// unparseable responses
pub async fn complete_parsed<T, P>(
    model: &dyn LanguageModel,
    request: &ModelRequest,
    policy: &RetryPolicy,
    parse: P,
) -> Result<Retried<T>, RetryExhausted>
where
    P: Fn(&str) -> Result<T, String>,
{
    let label = format!("{:?}", request.task);
    let parse = &parse;
    with_retry(policy, &label, |_| async move {
        match model.complete(request).await {
            Ok(text) => match parse(&text) {
                Ok(value) => RetryAction::Success(value),
                Err(reason) => RetryAction::Retry(ModelError::Malformed(reason)),
            },
            Err(e) if e.is_transient() => RetryAction::Retry(e),
            Err(e) => RetryAction::Fail(e),
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0, None), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1, None), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2, None), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(10, None), Duration::from_secs(8));
    }

    #[test]
    fn test_rate_limit_hint_respected_but_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0, Some(Duration::from_secs(3))), Duration::from_secs(3));
        assert_eq!(policy.delay_for(0, Some(Duration::from_secs(60))), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&RetryPolicy::immediate(3), "test", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    RetryAction::Retry(ModelError::Timeout)
                } else {
                    RetryAction::Success("ok")
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result.value, "ok");
        assert_eq!(result.retries, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_budget() {
        let calls = AtomicU32::new(0);
        let err = with_retry(&RetryPolicy::immediate(2), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { RetryAction::<()>::Retry(ModelError::Timeout) }
        })
        .await
        .unwrap_err();

        assert_eq!(err.retries, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let calls = AtomicU32::new(0);
        let err = with_retry(&RetryPolicy::immediate(3), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                RetryAction::<()>::Fail(ModelError::Api {
                    status: 401,
                    body: "unauthorized".to_string(),
                })
            }
        })
        .await
        .unwrap_err();

        assert_eq!(err.retries, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
