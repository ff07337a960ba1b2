//! Failure classification.
//!
//! Two passes, in order:
//!
//! 1. **Quota**: status exactly 429. Terminal, never retried.
//! 2. **Transience**: empty AI response, 5xx, an unavailable/timeout/overloaded
//!    status text, a network-ish message, or a known OS network error code.
//!
//! Everything else is **Opaque** and surfaced as-is. Classification only looks
//! at the failure's own fields, so it gives the same answer no matter how
//! many attempts have been made.

use crate::failure::RemoteFailure;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;

/// OS-level network error codes treated as transient.
pub const NETWORK_ERROR_CODES: [&str; 4] = ["ECONNRESET", "ENOTFOUND", "ETIMEDOUT", "ECONNREFUSED"];

/// Retry-after used for per-minute quota rejections that carry no retry info.
pub const DEFAULT_RPM_RETRY_AFTER_SECS: u64 = 60;

const QUOTA_STATUS: i64 = 429;

const TRANSIENT_STATUS_TEXT: [&str; 3] = ["unavailable", "timeout", "overloaded"];
const TRANSIENT_MESSAGE_FRAGMENTS: [&str; 4] = ["network", "timeout", "overloaded", "fetch"];

static FIRST_INTEGER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid regex"));

/// Which quota window was exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QuotaSubtype {
    /// Requests per minute.
    Rpm,
    /// Requests per day.
    Rpd,
    Unknown,
}

impl fmt::Display for QuotaSubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QuotaSubtype::Rpm => "RPM",
            QuotaSubtype::Rpd => "RPD",
            QuotaSubtype::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Caller-facing payload of a quota rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaFailure {
    pub message: String,
    pub subtype: QuotaSubtype,
    pub retry_after_seconds: Option<u64>,
}

/// The three ways a failed call can be treated.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifiedFailure {
    Quota(QuotaFailure),
    Transient(RemoteFailure),
    Opaque(RemoteFailure),
}

impl ClassifiedFailure {
    /// Stable label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ClassifiedFailure::Quota(_) => "quota",
            ClassifiedFailure::Transient(_) => "transient",
            ClassifiedFailure::Opaque(_) => "opaque",
        }
    }

    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClassifiedFailure::Transient(_))
    }
}

/// Classify a failed call.
pub fn classify(failure: &RemoteFailure) -> ClassifiedFailure {
    if let Some(quota) = detect_quota(failure) {
        return ClassifiedFailure::Quota(quota);
    }
    if is_transient(failure) {
        ClassifiedFailure::Transient(failure.clone())
    } else {
        ClassifiedFailure::Opaque(failure.clone())
    }
}

/// Quota pass. `None` unless the status is exactly 429.
pub fn detect_quota(failure: &RemoteFailure) -> Option<QuotaFailure> {
    if failure.normalized_status() != Some(QUOTA_STATUS) {
        return None;
    }

    let parsed = retry_delay_seconds(failure);
    let msg = failure.message.to_lowercase();

    let (subtype, retry_after_seconds) =
        if msg.contains("requests per minute") || msg.contains("rpm") {
            (
                QuotaSubtype::Rpm,
                Some(parsed.unwrap_or(DEFAULT_RPM_RETRY_AFTER_SECS)),
            )
        } else if msg.contains("requests per day") || msg.contains("rpd") || msg.contains("daily") {
            (QuotaSubtype::Rpd, parsed)
        } else {
            (QuotaSubtype::Unknown, parsed)
        };

    Some(QuotaFailure {
        message: failure.message.clone(),
        subtype,
        retry_after_seconds,
    })
}

/// First integer in the first `retryDelay` entry of the failure's details.
///
/// Providers send this as `"37s"`, `"37.5s"` or a bare number.
pub fn retry_delay_seconds(failure: &RemoteFailure) -> Option<u64> {
    failure
        .details
        .iter()
        .find_map(|d| d.get("retryDelay"))
        .and_then(|v| match v {
            serde_json::Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)),
            serde_json::Value::String(s) => FIRST_INTEGER
                .find(s)
                .and_then(|m| m.as_str().parse::<u64>().ok()),
            _ => None,
        })
}

/// Transience pass.
pub fn is_transient(failure: &RemoteFailure) -> bool {
    if failure.empty_response {
        return true;
    }

    if let Some(status) = failure.normalized_status() {
        if (500..=599).contains(&status) {
            return true;
        }
    }

    if let Some(text) = &failure.status_text {
        let text = text.to_lowercase();
        if TRANSIENT_STATUS_TEXT.iter().any(|t| text.contains(t)) {
            return true;
        }
    }

    let msg = failure.message.to_lowercase();
    if TRANSIENT_MESSAGE_FRAGMENTS.iter().any(|t| msg.contains(t))
        || NETWORK_ERROR_CODES
            .iter()
            .any(|code| msg.contains(&code.to_lowercase()))
    {
        return true;
    }

    failure
        .error_code
        .as_deref()
        .is_some_and(|code| NETWORK_ERROR_CODES.contains(&code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::StatusField;
    use serde_json::json;

    fn quota(message: &str) -> RemoteFailure {
        RemoteFailure::new(message).with_status(StatusField::Number(429))
    }

    #[test]
    fn test_rpm_quota_defaults_retry_after() {
        match classify(&quota("Quota exceeded: RPM limit")) {
            ClassifiedFailure::Quota(q) => {
                assert_eq!(q.subtype, QuotaSubtype::Rpm);
                assert_eq!(q.retry_after_seconds, Some(DEFAULT_RPM_RETRY_AFTER_SECS));
            }
            other => panic!("expected quota, got {:?}", other),
        }
    }

    #[test]
    fn test_rpm_quota_uses_retry_info() {
        let f = quota("Too many requests per minute").with_detail(json!({
            "@type": "type.googleapis.com/google.rpc.RetryInfo",
            "retryDelay": "17s"
        }));
        let q = detect_quota(&f).unwrap();
        assert_eq!(q.subtype, QuotaSubtype::Rpm);
        assert_eq!(q.retry_after_seconds, Some(17));
    }

    #[test]
    fn test_rpd_quota_has_no_default_retry_after() {
        for msg in ["daily quota", "Requests per day exhausted", "RPD limit"] {
            let q = detect_quota(&quota(msg)).unwrap();
            assert_eq!(q.subtype, QuotaSubtype::Rpd, "message: {}", msg);
            assert_eq!(q.retry_after_seconds, None);
        }
    }

    #[test]
    fn test_unknown_quota_keeps_parsed_retry_after() {
        let f = quota("Resource has been exhausted")
            .with_detail(json!({"retryDelay": "12.5s"}));
        let q = detect_quota(&f).unwrap();
        assert_eq!(q.subtype, QuotaSubtype::Unknown);
        assert_eq!(q.retry_after_seconds, Some(12));
    }

    #[test]
    fn test_429_via_secondary_status_code_is_quota() {
        let f = RemoteFailure::new("slow down").with_status_code(429);
        assert!(matches!(classify(&f), ClassifiedFailure::Quota(_)));
    }

    #[test]
    fn test_quota_message_without_429_is_not_quota() {
        let f = RemoteFailure::new("daily quota").with_status_code(400);
        assert!(detect_quota(&f).is_none());
        assert!(matches!(classify(&f), ClassifiedFailure::Opaque(_)));
    }

    #[test]
    fn test_server_errors_are_transient() {
        for status in [500, 503, 599] {
            let f = RemoteFailure::new("oops").with_status(StatusField::Number(status));
            assert!(classify(&f).is_retryable(), "status {}", status);
        }
        let f = RemoteFailure::new("oops").with_status(StatusField::Number(600));
        assert!(!classify(&f).is_retryable());
    }

    #[test]
    fn test_numeric_text_status_is_treated_as_number() {
        let f = RemoteFailure::new("x").with_status(StatusField::Text("504".into()));
        assert_eq!(classify(&f).kind(), "transient");

        let f = RemoteFailure::new("x").with_status(StatusField::Text("429".into()));
        assert!(matches!(classify(&f), ClassifiedFailure::Quota(_)));
    }

    #[test]
    fn test_status_text_markers_are_transient() {
        for text in ["UNAVAILABLE", "DEADLINE_TIMEOUT", "model overloaded"] {
            let f = RemoteFailure::new("x").with_status_text(text);
            assert!(is_transient(&f), "status text {}", text);
        }
    }

    #[test]
    fn test_message_markers_are_transient() {
        for msg in [
            "Network error",
            "request timeout",
            "The model is overloaded",
            "fetch failed",
            "read ECONNRESET",
            "getaddrinfo ENOTFOUND api.example.com",
        ] {
            assert!(is_transient(&RemoteFailure::new(msg)), "message {}", msg);
        }
    }

    #[test]
    fn test_error_code_must_match_exactly() {
        assert!(is_transient(&RemoteFailure::new("x").with_error_code("ECONNREFUSED")));
        assert!(!is_transient(&RemoteFailure::new("x").with_error_code("ECONNREFUSED_X")));
    }

    #[test]
    fn test_empty_response_is_transient() {
        let f = RemoteFailure::empty_response("Empty response from AI");
        assert_eq!(classify(&f).kind(), "transient");
    }

    #[test]
    fn test_unrecognised_failures_are_opaque() {
        let f = RemoteFailure::new("invalid argument").with_status_code(400);
        assert_eq!(classify(&f).kind(), "opaque");
    }

    #[test]
    fn test_classification_is_idempotent() {
        let samples = [
            quota("rpm"),
            RemoteFailure::new("x").with_status_code(503),
            RemoteFailure::new("bad request").with_status_code(400),
        ];
        for f in &samples {
            assert_eq!(classify(f), classify(f));
        }
    }
}
