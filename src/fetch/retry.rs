//! Bounded exponential backoff around a single-request sender.
//!
//! Delays are `min_wait * 2^n`, capped at `max_wait`, for at most
//! `max_retries` retries. Transient outcomes are connection/timeout errors and
//! the statuses 408, 429 and 5xx except 501.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use reqwest::{Request, Response, StatusCode};
use tokio_retry::RetryIf;
use tracing::{debug, warn};

pub const DEFAULT_MIN_WAIT: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(3);
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub min_wait: Duration,
    pub max_wait: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            min_wait: DEFAULT_MIN_WAIT,
            max_wait: DEFAULT_MAX_WAIT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl RetryPolicy {
    pub fn new(min_wait: Duration, max_wait: Duration, max_retries: u32) -> Self {
        Self {
            min_wait,
            max_wait: max_wait.max(min_wait),
            max_retries,
        }
    }

    /// Attempts including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// The wait before each retry, in order.
    pub fn backoff(&self) -> Backoff {
        Backoff {
            next: self.min_wait.min(self.max_wait),
            max: self.max_wait,
            remaining: self.max_retries,
        }
    }

    pub fn retries_status(&self, status: StatusCode) -> bool {
        status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS
            || (status.is_server_error() && status != StatusCode::NOT_IMPLEMENTED)
    }

    pub fn retries_error(&self, err: &reqwest::Error) -> bool {
        if err.is_builder() || err.is_redirect() || err.is_status() {
            return false;
        }
        err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
    }
}

/// Iterator of backoff delays fed to `tokio_retry`.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
    remaining: u32,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        Some(delay)
    }
}

// ── Execution ─────────────────────────────────────────────────────────────────

/// Why an attempt did not produce a final response.
#[derive(Debug)]
pub(crate) enum Attempt {
    /// The transport failed.
    Failed(reqwest::Error),
    /// A response arrived with a retryable status.
    Status(Response),
    /// The request body is a stream and cannot be cloned for another attempt.
    Unreplayable,
}

impl Attempt {
    fn is_transient(&self, policy: &RetryPolicy) -> bool {
        match self {
            Self::Failed(err) => policy.retries_error(err),
            Self::Status(_) => true,
            Self::Unreplayable => false,
        }
    }
}

/// Sends copies of `request` until one yields a non-retryable outcome or the
/// policy runs out. Returns the last outcome and the number of attempts made.
pub(crate) async fn run<F, Fut>(
    policy: &RetryPolicy,
    request: &Request,
    mut send: F,
) -> (Result<Response, Attempt>, u32)
where
    F: FnMut(Request) -> Fut,
    Fut: Future<Output = reqwest::Result<Response>>,
{
    let attempts = AtomicU32::new(0);

    let outcome = RetryIf::spawn(
        policy.backoff(),
        || {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(attempt, max_attempts = policy.max_attempts(), "attempt");
            let sent = request.try_clone().map(&mut send);
            async move {
                let Some(sent) = sent else {
                    return Err(Attempt::Unreplayable);
                };
                match sent.await {
                    Ok(response) if policy.retries_status(response.status()) => {
                        Err(Attempt::Status(response))
                    }
                    Ok(response) => Ok(response),
                    Err(err) => Err(Attempt::Failed(err)),
                }
            }
        },
        |failure: &Attempt| {
            let transient = failure.is_transient(policy);
            let attempt = attempts.load(Ordering::Relaxed);
            match failure {
                Attempt::Status(response) if attempt < policy.max_attempts() => {
                    warn!(attempt, status = %response.status(), "retryable status");
                }
                Attempt::Failed(err) if transient && attempt < policy.max_attempts() => {
                    warn!(attempt, error = %err, "transient transport error");
                }
                _ => {}
            }
            transient
        },
    )
    .await;

    (outcome, attempts.into_inner())
}
