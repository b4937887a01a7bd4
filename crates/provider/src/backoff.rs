//! Bounded, classified retries with exponential backoff

use regex::Regex;
use std::fmt::Display;
use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Whether a failed attempt may be repeated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    Fatal,
}

/// Errors that know their retry class
pub trait Classify {
    fn classify(&self) -> ErrorClass;
}

impl Classify for String {
    fn classify(&self) -> ErrorClass {
        classify_message(self)
    }
}

impl Classify for &str {
    fn classify(&self) -> ErrorClass {
        classify_message(self)
    }
}

/// 408, 429 and 5xx are retryable; every other 4xx is fatal
pub fn classify_status(status: u16) -> ErrorClass {
    match status {
        408 | 429 => ErrorClass::Retryable,
        500..=599 => ErrorClass::Retryable,
        400..=499 => ErrorClass::Fatal,
        _ => ErrorClass::Retryable,
    }
}

fn fatal_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)unauthori[sz]ed|forbidden|invalid api key|authentication|permission denied|validation|bad request|invalid request|\b(40[0-79]|41\d|42[0-8]|4[3-9]\d)\b",
        )
        .ok()
    })
    .as_ref()
}

fn is_match(pattern: Option<&Regex>, message: &str) -> bool {
    pattern.is_some_and(|re| re.is_match(message))
}

/// Classify a free-form error message.
///
/// Auth, validation and 4xx wording (other than 408 and 429) is fatal even
/// when the message also mentions timeouts or 5xx numbers. Everything else,
/// network, timeout, rate-limit and 5xx failures included, is retryable.
pub fn classify_message(message: &str) -> ErrorClass {
    if is_match(fatal_pattern(), message) {
        ErrorClass::Fatal
    } else {
        ErrorClass::Retryable
    }
}

/// Retry tunables
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Policy that makes exactly one attempt
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// `min(base_delay * backoff_factor^attempt, max_delay)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.base_delay_ms as f64 * self.backoff_factor.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Why [`Backoff::run`] gave up
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every permitted attempt failed with a retryable error
    Exhausted { attempts: u32, last: E },
    /// A non-retryable error stopped the retries
    Fatal { attempts: u32, last: E },
    /// The cancellation token fired
    Cancelled { attempts: u32 },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. }
            | Self::Fatal { attempts, .. }
            | Self::Cancelled { attempts } => *attempts,
        }
    }

    pub fn into_last(self) -> Option<E> {
        match self {
            Self::Exhausted { last, .. } | Self::Fatal { last, .. } => Some(last),
            Self::Cancelled { .. } => None,
        }
    }
}

impl<E: Display> Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exhausted { attempts, last } => {
                write!(f, "gave up after {} attempt(s): {}", attempts, last)
            }
            Self::Fatal { attempts, last } => {
                write!(f, "non-retryable failure on attempt {}: {}", attempts, last)
            }
            Self::Cancelled { attempts } => write!(f, "cancelled after {} attempt(s)", attempts),
        }
    }
}

impl<E: std::fmt::Debug + Display> std::error::Error for RetryError<E> {}

/// Runs an operation up to `max_retries + 1` times
#[derive(Debug, Clone, Default)]
pub struct Backoff {
    policy: RetryPolicy,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, fails fatally, or attempts run out.
    /// `op` receives the zero-based attempt index.
    pub async fn run<T, E, F, Fut>(&self, op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        self.run_cancellable(&CancellationToken::new(), op).await
    }

    /// As [`Backoff::run`], aborting an in-flight attempt or delay on cancellation
    pub async fn run_cancellable<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        let max_attempts = self.policy.max_attempts();
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled { attempts: attempt });
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(RetryError::Cancelled { attempts: attempt + 1 });
                }
                outcome = op(attempt) => outcome,
            };

            let error = match outcome {
                Ok(value) => {
                    if attempt > 0 {
                        debug!("◆ SUCCEEDED ON ATTEMPT {}", attempt + 1);
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            let attempts = attempt + 1;
            if error.classify() == ErrorClass::Fatal {
                warn!("◆ NON-RETRYABLE FAILURE ON ATTEMPT {}: {}", attempts, error);
                return Err(RetryError::Fatal {
                    attempts,
                    last: error,
                });
            }
            if attempts >= max_attempts {
                warn!("◆ RETRIES EXHAUSTED AFTER {} ATTEMPT(S): {}", attempts, error);
                return Err(RetryError::Exhausted {
                    attempts,
                    last: error,
                });
            }

            let delay = self.policy.delay_for(attempt);
            warn!(
                attempt = attempts,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                "◆ RETRYING AFTER: {}",
                error
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(RetryError::Cancelled { attempts });
                }
                _ = tokio::time::sleep(delay) => {}
            }

            attempt += 1;
        }
    }
}
