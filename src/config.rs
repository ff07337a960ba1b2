//! Tunables for the resilience core.
//!
//! Only three knobs exist: calls per minute, max attempts and base delay.
//! The 60s total-wait ceiling is fixed. Values come from serde (e.g. an app
//! config file) or from `AI_*` environment variables.

use crate::resilience::rate_gate::{RateGate, RateGateConfig};
use crate::resilience::retry::{
    RetryExecutor, RetryPolicy, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS, MAX_TOTAL_WAIT_MS,
};
use crate::{Error, ErrorContext, Result};
use serde::Deserialize;
use std::env;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResilienceConfig {
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl ResilienceConfig {
    /// Read `AI_REQUESTS_PER_MINUTE`, `AI_RETRY_MAX_ATTEMPTS` and
    /// `AI_RETRY_BASE_DELAY_MS`. Unset or unparsable values fall back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let cfg = Self {
            requests_per_minute: lookup("AI_REQUESTS_PER_MINUTE")
                .and_then(|s| s.trim().parse::<u32>().ok())
                .unwrap_or_else(default_requests_per_minute),
            max_attempts: lookup("AI_RETRY_MAX_ATTEMPTS")
                .and_then(|s| s.trim().parse::<u32>().ok())
                .unwrap_or_else(default_max_attempts),
            base_delay_ms: lookup("AI_RETRY_BASE_DELAY_MS")
                .and_then(|s| s.trim().parse::<u64>().ok())
                .unwrap_or_else(default_base_delay_ms),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.requests_per_minute == 0 {
            return Err(Error::configuration_with_context(
                "requests_per_minute must be at least 1",
                ErrorContext::new()
                    .with_field_path("requests_per_minute")
                    .with_source("resilience_config"),
            ));
        }
        if self.max_attempts == 0 {
            return Err(Error::configuration_with_context(
                "max_attempts must be at least 1",
                ErrorContext::new()
                    .with_field_path("max_attempts")
                    .with_source("resilience_config"),
            ));
        }
        if self.base_delay_ms > MAX_TOTAL_WAIT_MS {
            return Err(Error::configuration_with_context(
                "base_delay_ms exceeds the total wait budget",
                ErrorContext::new()
                    .with_field_path("base_delay_ms")
                    .with_details(format!(
                        "got {}ms, budget is {}ms",
                        self.base_delay_ms, MAX_TOTAL_WAIT_MS
                    ))
                    .with_source("resilience_config"),
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.base_delay_ms)
    }

    pub fn rate_gate(&self) -> Result<RateGate> {
        Ok(RateGate::new(RateGateConfig::from_rpm(
            self.requests_per_minute,
        )?))
    }

    /// Executor with a fresh gate. Share the returned executor (it is cheap
    /// to clone) rather than building one per call.
    pub fn build_executor(&self) -> Result<RetryExecutor> {
        self.validate()?;
        Ok(RetryExecutor::new(Arc::new(self.rate_gate()?)).with_policy(self.retry_policy()))
    }
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

fn default_requests_per_minute() -> u32 {
    10
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}
