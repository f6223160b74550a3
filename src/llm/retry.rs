// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Retry logic for LLM API calls with exponential backoff
//!
//! Retries run against a wall-clock budget rather than an attempt count:
//! `delay = base * 2^attempt`, clamped to whatever budget remains. Both the
//! request and the backoff sleep race the cancellation token.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::ResilienceConfig;
use crate::error::{ApiError, Result, TabwrightError};

/// Backoff policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry (doubled on each subsequent one)
    pub base_delay: Duration,
    /// Total wall-clock time allowed across all attempts
    pub budget: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&ResilienceConfig::default())
    }
}

impl From<&ResilienceConfig> for RetryPolicy {
    fn from(config: &ResilienceConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            budget: Duration::from_millis(config.budget_ms),
        }
    }
}

impl RetryPolicy {
    /// Unclamped delay before retry number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// Options for one [`request_with_retry`] loop
pub struct RetryOptions<'a> {
    /// Label used in logs
    pub request_tag: &'a str,
    pub cancel: &'a CancellationToken,
    pub policy: RetryPolicy,
    /// Pulls an HTTP status out of a failure for diagnostics
    pub extract_status_code: fn(&TabwrightError) -> Option<u16>,
}

impl<'a> RetryOptions<'a> {
    pub fn new(request_tag: &'a str, cancel: &'a CancellationToken, policy: RetryPolicy) -> Self {
        Self {
            request_tag,
            cancel,
            policy,
            extract_status_code: TabwrightError::status_code,
        }
    }
}

/// Determine if an error is retryable
///
/// Status codes are not consulted: a 401 is retried like a 503 until the
/// budget runs out.
pub fn is_retryable(error: &TabwrightError) -> bool {
    !matches!(
        error,
        TabwrightError::Aborted | TabwrightError::Api(ApiError::PartialStream { .. })
    )
}

/// Call `request` until it succeeds, is cancelled, or the budget is spent.
pub async fn request_with_retry<F, Fut, T>(mut request: F, options: RetryOptions<'_>) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let RetryOptions {
        request_tag,
        cancel,
        policy,
        extract_status_code,
    } = options;

    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(TabwrightError::Aborted);
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TabwrightError::Aborted),
            result = request() => result,
        };

        let error = match outcome {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(
                        target: "tabwright.llm.retry",
                        request = request_tag,
                        attempts = attempt + 1,
                        "request succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(error) if error.is_abort() => return Err(error),
            Err(error) if !is_retryable(&error) => {
                tracing::debug!(
                    target: "tabwright.llm.retry",
                    request = request_tag,
                    error = %error,
                    "non-retryable failure"
                );
                return Err(error);
            }
            Err(error) => error,
        };

        let remaining = policy.budget.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            tracing::warn!(
                target: "tabwright.llm.retry",
                request = request_tag,
                attempts = attempt + 1,
                error = %error,
                "retry budget exhausted"
            );
            return Err(error);
        }

        let delay = policy.delay_for(attempt).min(remaining);
        tracing::warn!(
            target: "tabwright.llm.retry",
            request = request_tag,
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            status = ?extract_status_code(&error),
            error = %error,
            "request failed; retrying"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TabwrightError::Aborted),
            _ = sleep(delay) => {}
        }
        attempt += 1;
    }
}
