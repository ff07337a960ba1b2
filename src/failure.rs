//! The observable shape of a failed remote call.
//!
//! [`RemoteFailure`] is what an operation hands back when a generation call
//! fails. It keeps the raw fields the classifier looks at (status, status
//! text, message, OS error code, structured details) and nothing else, so
//! classification stays a pure function of what the provider actually said.

use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use std::io;
use thiserror::Error;

/// Primary status as providers report it.
///
/// Some SDKs surface a bare number, others nest it in an object with a
/// `code` field, and a few send it as a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatusField {
    Number(i64),
    Object { code: Option<i64> },
    Text(String),
}

impl StatusField {
    fn as_number(&self) -> Option<i64> {
        match self {
            StatusField::Number(n) => Some(*n),
            StatusField::Object { code } => *code,
            StatusField::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl fmt::Display for StatusField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusField::Number(n) => write!(f, "{}", n),
            StatusField::Object { code: Some(c) } => write!(f, "{}", c),
            StatusField::Object { code: None } => write!(f, "?"),
            StatusField::Text(s) => write!(f, "{}", s),
        }
    }
}

/// A failed remote call, as observed by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[error("{message}")]
pub struct RemoteFailure {
    /// Primary status (number, `{code}` object or text).
    pub status: Option<StatusField>,
    /// Secondary status code, usually the HTTP status of the response.
    pub status_code: Option<u16>,
    /// Provider status string such as `UNAVAILABLE` or `RESOURCE_EXHAUSTED`.
    pub status_text: Option<String>,
    pub message: String,
    /// OS or transport error code such as `ECONNRESET`.
    pub error_code: Option<String>,
    /// Structured provider details (retry info, quota violations, ...).
    pub details: Vec<serde_json::Value>,
    /// The transport succeeded but the AI returned no usable content.
    pub empty_response: bool,
}

impl RemoteFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            status_code: None,
            status_text: None,
            message: message.into(),
            error_code: None,
            details: Vec::new(),
            empty_response: false,
        }
    }

    /// Failure for a response that arrived but carried no usable content.
    pub fn empty_response(message: impl Into<String>) -> Self {
        Self {
            empty_response: true,
            ..Self::new(message)
        }
    }

    pub fn with_status(mut self, status: StatusField) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_status_code(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    pub fn with_status_text(mut self, text: impl Into<String>) -> Self {
        self.status_text = Some(text.into());
        self
    }

    pub fn with_error_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.details.push(detail);
        self
    }

    /// Numeric status: the primary status if it has a number, else the
    /// secondary status code.
    pub fn normalized_status(&self) -> Option<i64> {
        self.status
            .as_ref()
            .and_then(StatusField::as_number)
            .or(self.status_code.map(i64::from))
    }

    /// Build a failure from a non-success HTTP response body.
    ///
    /// Understands the Google-style envelope
    /// (`{"error": {"code", "message", "status", "details"}}`) and the
    /// OpenAI-style one (`{"error": {"message", "type", "code"}}`). Anything
    /// else keeps the raw body as the message.
    pub fn from_response_body(http_status: u16, body: &str) -> Self {
        let mut failure = RemoteFailure::new(body.trim()).with_status_code(http_status);

        let json: serde_json::Value = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(_) => {
                if failure.message.is_empty() {
                    failure.message = format!("HTTP {}", http_status);
                }
                return failure;
            }
        };
        let Some(err) = json.get("error") else {
            return failure;
        };

        if let Some(msg) = err.get("message").and_then(|v| v.as_str()) {
            failure.message = msg.to_string();
        } else if let Some(msg) = err.as_str() {
            failure.message = msg.to_string();
        }

        match err.get("code") {
            Some(serde_json::Value::Number(n)) => {
                if let Some(n) = n.as_i64() {
                    failure.status = Some(StatusField::Number(n));
                }
            }
            // OpenAI puts a machine-readable string in `code`
            Some(serde_json::Value::String(s)) => {
                failure.status_text = Some(s.clone());
            }
            _ => {}
        }

        if let Some(text) = err
            .get("status")
            .or_else(|| err.get("type"))
            .and_then(|v| v.as_str())
        {
            failure.status_text = Some(text.to_string());
        }

        if let Some(details) = err.get("details").and_then(|v| v.as_array()) {
            failure.details = details.clone();
        }

        failure
    }
}

impl From<reqwest::Error> for RemoteFailure {
    fn from(e: reqwest::Error) -> Self {
        let mut failure = RemoteFailure::new(e.to_string());
        if let Some(status) = e.status() {
            failure = failure.with_status_code(status.as_u16());
        }
        if let Some(code) = os_error_code(&e) {
            failure = failure.with_error_code(code);
        } else if e.is_timeout() {
            failure = failure.with_error_code("ETIMEDOUT");
        } else if e.is_connect() {
            failure = failure.with_error_code("ECONNREFUSED");
        }
        failure
    }
}

/// OS-level error code for the first `io::Error` in the source chain.
///
/// Resets after the connection is up only show up here; reqwest reports
/// them as plain request errors.
fn os_error_code(err: &(dyn StdError + 'static)) -> Option<&'static str> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<io::Error>() {
            return match io.kind() {
                io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe => Some("ECONNRESET"),
                io::ErrorKind::ConnectionRefused => Some("ECONNREFUSED"),
                io::ErrorKind::TimedOut => Some("ETIMEDOUT"),
                _ if is_lookup_failure(&io.to_string()) => Some("ENOTFOUND"),
                _ => None,
            };
        }
        current = e.source();
    }
    None
}

// getaddrinfo failures surface as `ErrorKind::Other` / `Uncategorized`.
fn is_lookup_failure(text: &str) -> bool {
    let text = text.to_lowercase();
    text.contains("failed to lookup address")
        || text.contains("name or service not known")
        || text.contains("no such host")
        || text.contains("nodename nor servname")
}
