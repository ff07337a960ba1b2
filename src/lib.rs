//! # will-ai-resilience
//!
//! Outbound AI-call resilience core for the will-drafting service.
//!
//! Every call to the generation API goes through three steps:
//!
//! - **Rate gate**: calls leave one at a time, in arrival order, spaced by at
//!   least `ceil(60000 / requests_per_minute)` ms.
//! - **Classification**: a failed call is a quota rejection (terminal), a
//!   transient hiccup (retried), or opaque (surfaced as-is).
//! - **Retry**: transient failures are retried with jittered exponential
//!   backoff, bounded by an attempt count and a 60s total-wait budget.
//!
//! Callers get a [`Retried`] envelope with attempt metadata, or an [`Error`]
//! that carries the same metadata.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use will_ai_resilience::{GenerationClient, ResilienceConfig, TransportConfig};
//!
//! #[tokio::main]
//! async fn main() -> will_ai_resilience::Result<()> {
//!     let client = GenerationClient::from_config(
//!         &TransportConfig::new("https://generativelanguage.googleapis.com", "gemini-1.5-flash"),
//!         &ResilienceConfig::from_env()?,
//!     )?;
//!
//!     match client.generate_text("Summarize the estate plan", "summarize_plan").await {
//!         Ok(out) => println!("{} ({} attempts)", out.result, out.metadata.attempts),
//!         Err(e) => eprintln!("{}", e.user_message()),
//!     }
//!     Ok(())
//! }
//! ```

pub mod classify;
pub mod client;
pub mod config;
pub mod failure;
pub mod resilience;
pub mod transport;

pub use classify::{classify, ClassifiedFailure, QuotaFailure, QuotaSubtype};
pub use client::GenerationClient;
pub use config::ResilienceConfig;
pub use failure::{RemoteFailure, StatusField};
pub use resilience::metadata::{AttemptMetadata, Retried};
pub use resilience::rate_gate::{RateGate, RateGateConfig};
pub use resilience::retry::{RetryExecutor, RetryPolicy, MAX_TOTAL_WAIT_MS};
pub use transport::{AuthStyle, HttpTransport, TransportConfig};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
