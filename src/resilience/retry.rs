//! Retry orchestration.
//!
//! Every attempt goes through the shared [`RateGate`]. Failures are
//! classified; only transient ones are retried, with exponential backoff
//! (`base * 2^(n-1)`) perturbed by a symmetric ±20% jitter. Two budgets bound
//! the loop: the attempt count and the cumulative backoff sleep (60s).

use crate::classify::{classify, ClassifiedFailure};
use crate::failure::RemoteFailure;
use crate::resilience::metadata::{AttemptMetadata, Retried};
use crate::resilience::rate_gate::RateGate;
use crate::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY_MS: u64 = 2_000;
/// Ceiling on cumulative backoff sleep for one logical call.
pub const MAX_TOTAL_WAIT_MS: u64 = 60_000;
/// Jitter is drawn from `[-JITTER_RATIO, +JITTER_RATIO]`.
pub const JITTER_RATIO: f64 = 0.2;

/// Source of the jitter factor applied to each backoff delay.
pub trait JitterSource: Send + Sync {
    /// A value in `[-JITTER_RATIO, JITTER_RATIO]`.
    fn sample(&self) -> f64;
}

/// Uniform jitter over the full ±20% range.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformJitter;

impl JitterSource for UniformJitter {
    fn sample(&self) -> f64 {
        rand::thread_rng().gen_range(-JITTER_RATIO..=JITTER_RATIO)
    }
}

/// Constant jitter, clamped to the allowed range.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedJitter(pub f64);

impl JitterSource for FixedJitter {
    fn sample(&self) -> f64 {
        self.0.clamp(-JITTER_RATIO, JITTER_RATIO)
    }
}

/// How a guarded call ended when it did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    QuotaFailed,
    Fatal,
    Exhausted,
    Aborted,
}

impl TerminalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalState::QuotaFailed => "quota_failed",
            TerminalState::Fatal => "fatal",
            TerminalState::Exhausted => "exhausted",
            TerminalState::Aborted => "aborted",
        }
    }
}

/// Internal decision for how to proceed after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    Retry { delay: Duration },
    Stop(TerminalState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_total_wait_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_total_wait_ms: MAX_TOTAL_WAIT_MS,
        }
    }

    /// At least one attempt is always made.
    #[inline]
    pub fn attempt_limit(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Un-jittered delay after failed attempt `attempt` (1-indexed):
    /// `base_delay_ms * 2^(attempt-1)`.
    pub fn exponential_base_ms(&self, attempt: u32) -> u64 {
        let factor = 1u64
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u64::MAX);
        self.base_delay_ms.saturating_mul(factor)
    }

    /// `round(exponential_base * (1 + jitter))`, jitter clamped to ±20%.
    pub fn backoff_delay_ms(&self, attempt: u32, jitter: f64) -> u64 {
        let jitter = jitter.clamp(-JITTER_RATIO, JITTER_RATIO);
        let base = self.exponential_base_ms(attempt) as f64;
        (base * (1.0 + jitter)).round() as u64
    }

    /// Decide what to do after attempt `attempt` (1-indexed) failed.
    ///
    /// Jitter is only sampled when a retry is actually on the table.
    pub(crate) fn decide(
        &self,
        failure: &ClassifiedFailure,
        attempt: u32,
        total_wait_ms: u64,
        jitter: &dyn JitterSource,
    ) -> Decision {
        match failure {
            ClassifiedFailure::Quota(_) => Decision::Stop(TerminalState::QuotaFailed),
            ClassifiedFailure::Opaque(_) => Decision::Stop(TerminalState::Fatal),
            ClassifiedFailure::Transient(_) if attempt >= self.attempt_limit() => {
                Decision::Stop(TerminalState::Exhausted)
            }
            ClassifiedFailure::Transient(_) => {
                let delay_ms = self.backoff_delay_ms(attempt, jitter.sample());
                if total_wait_ms.saturating_add(delay_ms) > self.max_total_wait_ms {
                    Decision::Stop(TerminalState::Aborted)
                } else {
                    Decision::Retry {
                        delay: Duration::from_millis(delay_ms),
                    }
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_BASE_DELAY_MS)
    }
}

/// Runs operations through the rate gate with classification-driven retry.
///
/// The gate is injected rather than global so several executors (and tests
/// running on a paused clock) can share or isolate it explicitly.
#[derive(Clone)]
pub struct RetryExecutor {
    gate: Arc<RateGate>,
    policy: RetryPolicy,
    jitter: Arc<dyn JitterSource>,
}

impl RetryExecutor {
    pub fn new(gate: Arc<RateGate>) -> Self {
        Self {
            gate,
            policy: RetryPolicy::default(),
            jitter: Arc::new(UniformJitter),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn gate(&self) -> &Arc<RateGate> {
        &self.gate
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run `operation` with this executor's policy.
    ///
    /// `operation_name` only labels logs and errors.
    pub async fn execute_with_retry<T, E, F, Fut>(
        &self,
        operation: F,
        operation_name: &str,
    ) -> Result<Retried<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<RemoteFailure>,
    {
        self.execute_with_policy(operation, operation_name, self.policy)
            .await
    }

    /// Run `operation` with explicit attempt and base-delay settings. The
    /// total wait ceiling stays fixed.
    pub async fn execute_with_retry_opts<T, E, F, Fut>(
        &self,
        operation: F,
        operation_name: &str,
        max_attempts: u32,
        base_delay_ms: u64,
    ) -> Result<Retried<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<RemoteFailure>,
    {
        self.execute_with_policy(
            operation,
            operation_name,
            RetryPolicy::new(max_attempts, base_delay_ms),
        )
        .await
    }

    async fn execute_with_policy<T, E, F, Fut>(
        &self,
        mut operation: F,
        operation_name: &str,
        policy: RetryPolicy,
    ) -> Result<Retried<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<RemoteFailure>,
    {
        let mut metadata = AttemptMetadata::default();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            metadata.attempts = attempt;

            self.gate.admit().await;
            debug!(
                operation = operation_name,
                attempt,
                max_attempts = policy.attempt_limit(),
                "dispatching AI call"
            );

            let failure: RemoteFailure = match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        info!(
                            operation = operation_name,
                            attempts = attempt,
                            total_wait_ms = metadata.total_wait_ms,
                            "AI call succeeded after retry"
                        );
                    }
                    return Ok(Retried { result, metadata });
                }
                Err(e) => e.into(),
            };

            let classified = classify(&failure);
            match policy.decide(
                &classified,
                attempt,
                metadata.total_wait_ms,
                self.jitter.as_ref(),
            ) {
                Decision::Retry { delay } => {
                    let delay_ms = delay.as_millis() as u64;
                    warn!(
                        operation = operation_name,
                        attempt,
                        delay_ms,
                        total_wait_ms = metadata.total_wait_ms,
                        error = %failure,
                        "transient AI failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    metadata.total_wait_ms += delay_ms;
                }
                Decision::Stop(state) => {
                    warn!(
                        operation = operation_name,
                        attempts = attempt,
                        total_wait_ms = metadata.total_wait_ms,
                        failure_kind = classified.kind(),
                        state = state.as_str(),
                        error = %failure,
                        "AI call failed"
                    );
                    return Err(terminal_error(state, classified, operation_name, metadata));
                }
            }
        }
    }
}

fn terminal_error(
    state: TerminalState,
    failure: ClassifiedFailure,
    operation: &str,
    mut metadata: AttemptMetadata,
) -> Error {
    let operation = operation.to_string();
    match failure {
        ClassifiedFailure::Quota(failure) => Error::Quota {
            operation,
            failure,
            metadata,
        },
        ClassifiedFailure::Opaque(source) => Error::Fatal {
            operation,
            source,
            metadata,
        },
        ClassifiedFailure::Transient(source) if state == TerminalState::Aborted => {
            metadata.aborted = true;
            Error::Aborted {
                operation,
                source,
                metadata,
            }
        }
        ClassifiedFailure::Transient(source) => {
            metadata.exhausted = true;
            Error::Exhausted {
                operation,
                source,
                metadata,
            }
        }
    }
}
