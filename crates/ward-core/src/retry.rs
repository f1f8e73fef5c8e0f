//! Retry policy, error classification and the executor wrapped around upstream storage calls.
//!
//! Every storage call goes through [`RetryExecutor::execute`] so call sites share one policy:
//!
//! - [`classify`]: maps an error to [`ErrorClass`] (terminal, retryable, or unknown)
//! - [`RetryPolicy`]: attempt bound and backoff (`min(cap, base * 2^n) + uniform(0, jitter)`)
//! - [`RetryOutcome`]: success, or a terminal / exhausted failure with its attempt count

use std::fmt;
use std::future::Future;
use std::time::Duration;

use metrics::counter;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::metrics::{STORAGE_FAILURES_TOTAL, STORAGE_RETRIES_TOTAL};

// ─────────────────────────────────────────────────────────────────────────────
// Classification
// ─────────────────────────────────────────────────────────────────────────────

/// What an upstream error exposes for classification. Every method is optional.
pub trait Classify {
    /// HTTP-style status code, if the error came with a response.
    fn status_code(&self) -> Option<u16> {
        None
    }

    /// Upstream error code (PostgREST `PGRST…`, Postgres SQLSTATE, or a numeric status).
    fn upstream_code(&self) -> Option<&str> {
        None
    }

    /// `true` for connect/reset/DNS/timeout failures where no response was obtained.
    fn is_transport(&self) -> bool {
        false
    }

    /// `true` when upstream already acted on the request and only the reply was unusable.
    /// Never retried.
    fn is_terminal(&self) -> bool {
        false
    }
}

/// Retry classification of an upstream error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Client or logic fault; retrying cannot help.
    Terminal,
    /// Rate limiting, server fault or network fault.
    Retryable,
    /// Nothing recognisable; retried so transient faults are not swallowed.
    Unknown,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::Terminal)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Terminal => "terminal",
            Self::Retryable => "retryable",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify an upstream error.
///
/// An explicit terminal flag wins; otherwise status is consulted first, then the upstream
/// code, then the transport flag.
pub fn classify<E: Classify + ?Sized>(error: &E) -> ErrorClass {
    if error.is_terminal() {
        return ErrorClass::Terminal;
    }
    if let Some(class) = error.status_code().and_then(classify_status) {
        return class;
    }
    if let Some(class) = error.upstream_code().and_then(classify_code) {
        return class;
    }
    if error.is_transport() {
        return ErrorClass::Retryable;
    }
    ErrorClass::Unknown
}

fn classify_status(status: u16) -> Option<ErrorClass> {
    match status {
        429 => Some(ErrorClass::Retryable),
        400..=499 => Some(ErrorClass::Terminal),
        500..=u16::MAX => Some(ErrorClass::Retryable),
        _ => None,
    }
}

fn classify_code(code: &str) -> Option<ErrorClass> {
    if code.starts_with("PGRST") {
        return Some(ErrorClass::Terminal);
    }
    if code.len() == 3 {
        if let Ok(status) = code.parse::<u16>() {
            return classify_status(status);
        }
    }
    if code.len() != 5 {
        return None;
    }
    // SQLSTATE class is the first two characters.
    match code.get(..2)? {
        "08" | "40" | "53" | "57" | "58" => Some(ErrorClass::Retryable),
        "22" | "23" | "42" | "P0" => Some(ErrorClass::Terminal),
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Policy
// ─────────────────────────────────────────────────────────────────────────────

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;
pub const DEFAULT_MAX_DELAY_MS: u64 = 3_000;
pub const DEFAULT_JITTER_MS: u64 = 100;

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}
fn default_jitter_ms() -> u64 {
    DEFAULT_JITTER_MS
}

/// Attempt bound and backoff parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Cap applied before jitter is added.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Upper bound of the uniform jitter added to each delay.
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_ms: DEFAULT_JITTER_MS,
        }
    }
}

impl RetryPolicy {
    /// `min(cap, base * 2^retry)` for the zero-based retry index.
    pub fn backoff_ceiling(&self, retry: u32) -> Duration {
        let exponential = self
            .base_delay_ms
            .saturating_mul(1u64 << retry.min(31));
        Duration::from_millis(exponential.min(self.max_delay_ms))
    }

    /// Ceiling plus uniform jitter in `[0, jitter_ms]`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        };
        self.backoff_ceiling(retry) + Duration::from_millis(jitter)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outcome
// ─────────────────────────────────────────────────────────────────────────────

/// Why a retried call gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Classified terminal on first occurrence; no retries were made.
    Terminal,
    /// Still failing with a retryable error after the last permitted attempt.
    Exhausted,
}

/// Result of [`RetryExecutor::execute_outcome`].
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Success(T),
    Failure {
        kind: FailureKind,
        attempts: u32,
        error: E,
    },
}

impl<T, E> RetryOutcome<T, E> {
    /// Drop the failure metadata, surfacing the last error unchanged.
    pub fn into_result(self) -> Result<T, E> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Failure { error, .. } => Err(error),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Executor
// ─────────────────────────────────────────────────────────────────────────────

/// Runs one upstream operation under a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds, fails terminally, or runs out of attempts.
    ///
    /// The last error is returned as-is.
    pub async fn execute<T, E, F, Fut>(&self, label: &str, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + fmt::Display,
    {
        self.execute_outcome(label, operation).await.into_result()
    }

    /// Like [`execute`](Self::execute) but reports how the call ended.
    pub async fn execute_outcome<T, E, F, Fut>(
        &self,
        label: &str,
        mut operation: F,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + fmt::Display,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let error = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(label, attempt, "upstream call succeeded after retry");
                    }
                    return RetryOutcome::Success(value);
                }
                Err(error) => error,
            };

            let class = classify(&error);
            if !class.is_retryable() {
                tracing::warn!(label, attempt, error = %error, "upstream call failed with non-retryable error");
                counter!(STORAGE_FAILURES_TOTAL, "kind" => "terminal").increment(1);
                return RetryOutcome::Failure {
                    kind: FailureKind::Terminal,
                    attempts: attempt,
                    error,
                };
            }

            if attempt >= max_attempts {
                tracing::error!(label, attempts = attempt, class = %class, error = %error, "upstream call failed after exhausting retries");
                counter!(STORAGE_FAILURES_TOTAL, "kind" => "exhausted").increment(1);
                return RetryOutcome::Failure {
                    kind: FailureKind::Exhausted,
                    attempts: attempt,
                    error,
                };
            }

            let delay = self.policy.backoff(attempt - 1);
            tracing::warn!(
                label,
                attempt,
                class = %class,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "upstream call failed, retrying"
            );
            counter!(STORAGE_RETRIES_TOTAL, "class" => class.as_str()).increment(1);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
