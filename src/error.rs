use crate::classify::{QuotaFailure, QuotaSubtype};
use crate::failure::RemoteFailure;
use crate::resilience::metadata::AttemptMetadata;
use thiserror::Error;

/// Structured error context for configuration and setup failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "config.requests_per_minute")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected range, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "config_loader", "rate_gate")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Terminal failures of a guarded AI call, plus setup errors.
///
/// Every call-path variant carries the [`AttemptMetadata`] collected while the
/// call was retried, so callers can report attempts and waited time the same
/// way whichever terminal state was reached.
#[derive(Debug, Error)]
pub enum Error {
    /// Quota rejection (HTTP 429). Never retried.
    #[error("{operation}: quota exceeded ({}): {}", .failure.subtype, .failure.message)]
    Quota {
        operation: String,
        failure: QuotaFailure,
        metadata: AttemptMetadata,
    },

    /// Non-retryable failure, surfaced on first occurrence.
    #[error("{operation}: {source}")]
    Fatal {
        operation: String,
        #[source]
        source: RemoteFailure,
        metadata: AttemptMetadata,
    },

    /// Transient failure that persisted through every allowed attempt.
    #[error("{operation}: gave up after {} attempts: {source}", .metadata.attempts)]
    Exhausted {
        operation: String,
        #[source]
        source: RemoteFailure,
        metadata: AttemptMetadata,
    },

    /// Transient failure whose next backoff would overrun the wait budget.
    #[error("{operation}: retry wait budget exceeded after {}ms: {source}", .metadata.total_wait_ms)]
    Aborted {
        operation: String,
        #[source]
        source: RemoteFailure,
        metadata: AttemptMetadata,
    },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Attempt metadata for call-path errors.
    pub fn metadata(&self) -> Option<&AttemptMetadata> {
        match self {
            Error::Quota { metadata, .. }
            | Error::Fatal { metadata, .. }
            | Error::Exhausted { metadata, .. }
            | Error::Aborted { metadata, .. } => Some(metadata),
            Error::Configuration { .. } => None,
        }
    }

    /// Label of the guarded operation, if this error came from one.
    pub fn operation(&self) -> Option<&str> {
        match self {
            Error::Quota { operation, .. }
            | Error::Fatal { operation, .. }
            | Error::Exhausted { operation, .. }
            | Error::Aborted { operation, .. } => Some(operation),
            Error::Configuration { .. } => None,
        }
    }

    /// The quota payload, when this is a quota rejection.
    pub fn quota(&self) -> Option<&QuotaFailure> {
        match self {
            Error::Quota { failure, .. } => Some(failure),
            _ => None,
        }
    }

    /// The original remote failure, for non-quota call-path errors.
    pub fn remote(&self) -> Option<&RemoteFailure> {
        match self {
            Error::Fatal { source, .. }
            | Error::Exhausted { source, .. }
            | Error::Aborted { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Text suitable for showing to an end user.
    pub fn user_message(&self) -> String {
        match self {
            Error::Quota { failure, .. } => match failure.subtype {
                QuotaSubtype::Rpm => format!(
                    "The AI service is busy right now. Please try again in about {} seconds.",
                    failure.retry_after_seconds.unwrap_or(60)
                ),
                QuotaSubtype::Rpd => {
                    "The daily AI usage limit has been reached. It resets at midnight.".to_string()
                }
                QuotaSubtype::Unknown => match failure.retry_after_seconds {
                    Some(secs) => format!(
                        "The AI service quota was exceeded. Please try again in about {} seconds.",
                        secs
                    ),
                    None => "The AI service quota was exceeded. Please try again later.".to_string(),
                },
            },
            Error::Exhausted { metadata, .. } => format!(
                "The AI service did not respond after {} attempts ({:.1}s waited). Please try again.",
                metadata.attempts,
                metadata.total_wait_ms as f64 / 1000.0
            ),
            Error::Aborted { metadata, .. } => format!(
                "The AI service is unavailable; stopped retrying after {} attempts ({:.1}s waited). Please try again later.",
                metadata.attempts,
                metadata.total_wait_ms as f64 / 1000.0
            ),
            Error::Fatal { .. } => "The AI request failed unexpectedly.".to_string(),
            Error::Configuration { .. } => "The AI service is misconfigured.".to_string(),
        }
    }
}
