//! Resilience primitives for outbound AI calls.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`rate_gate`] | FIFO gate enforcing a minimum interval between dispatches |
//! | [`retry`] | Classification-driven retry with jittered exponential backoff |
//! | [`metadata`] | Attempt metadata and the success envelope |
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use will_ai_resilience::failure::RemoteFailure;
//! use will_ai_resilience::resilience::rate_gate::{RateGate, RateGateConfig};
//! use will_ai_resilience::resilience::retry::RetryExecutor;
//!
//! # async fn demo() -> will_ai_resilience::Result<()> {
//! let gate = Arc::new(RateGate::new(RateGateConfig::from_rpm(10)?));
//! let executor = RetryExecutor::new(gate);
//!
//! let out = executor
//!     .execute_with_retry(|| async { Ok::<_, RemoteFailure>("clause") }, "draft_clause")
//!     .await?;
//! println!("{} after {} attempt(s)", out.result, out.metadata.attempts);
//! # Ok(())
//! # }
//! ```

pub mod metadata;
pub mod rate_gate;
pub mod retry;
