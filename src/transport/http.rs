use crate::failure::RemoteFailure;
use crate::{Error, ErrorContext, Result};
use keyring::Entry;
use reqwest::header::HeaderMap;
use reqwest::Proxy;
use serde_json::{json, Value};
use std::env;
use std::time::Duration;
use tracing::debug;
use url::Url;
use uuid::Uuid;

const DEFAULT_PATH: &str = "/v1beta/models/{model}:generateContent";
const GOOGLE_API_KEY_HEADER: &str = "x-goog-api-key";

/// How the API key is attached to each request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    /// `Authorization: Bearer <key>` (OpenAI-compatible providers).
    Bearer,
    /// `x-goog-api-key: <key>` (Gemini API keys are not OAuth tokens).
    GoogleApiKey,
}

impl AuthStyle {
    pub fn for_provider(provider_id: &str) -> Self {
        match provider_id.to_lowercase().as_str() {
            "gemini" | "google" => AuthStyle::GoogleApiKey,
            _ => AuthStyle::Bearer,
        }
    }
}

/// Where and how to reach the generation API.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub base_url: String,
    pub model: String,
    /// Path template; `{model}` is substituted.
    pub path: String,
    /// Used to look up the API key (keyring entry, then `<PROVIDER>_API_KEY`).
    pub provider_id: String,
    /// Explicit key; skips the keyring/env lookup when set.
    pub api_key: Option<String>,
    pub auth_style: AuthStyle,
    pub timeout: Duration,
}

impl TransportConfig {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        // Minimal production-friendly defaults (env-overridable).
        let timeout_secs = env::var("AI_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(60);
        Self {
            base_url: base_url.into(),
            model: model.into(),
            path: DEFAULT_PATH.to_string(),
            provider_id: "gemini".to_string(),
            api_key: None,
            auth_style: AuthStyle::GoogleApiKey,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Also resets the auth style to the provider's default.
    pub fn with_provider_id(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = provider_id.into();
        self.auth_style = AuthStyle::for_provider(&self.provider_id);
        self
    }

    pub fn with_auth_style(mut self, auth_style: AuthStyle) -> Self {
        self.auth_style = auth_style;
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// One-shot HTTP calls to the generation API.
///
/// Each call is a single attempt. Non-success responses, transport errors
/// and empty generations all come back as [`RemoteFailure`] so the retry
/// layer can classify them.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    auth_style: AuthStyle,
}

impl HttpTransport {
    pub fn new(cfg: &TransportConfig) -> Result<Self> {
        let base = Url::parse(&cfg.base_url).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid base_url: {}", e),
                ErrorContext::new()
                    .with_field_path("transport.base_url")
                    .with_details(cfg.base_url.clone())
                    .with_source("http_transport"),
            )
        })?;

        let mut builder = reqwest::Client::builder().timeout(cfg.timeout);
        if let Ok(proxy_url) = env::var("AI_PROXY_URL") {
            if let Ok(proxy) = Proxy::all(&proxy_url) {
                builder = builder.proxy(proxy);
            }
        }
        let client = builder.build().map_err(|e| {
            Error::configuration_with_context(
                format!("failed to build HTTP client: {}", e),
                ErrorContext::new().with_source("http_transport"),
            )
        })?;

        let path = cfg.path.replace("{model}", &cfg.model);
        let url = format!("{}{}", base.as_str().trim_end_matches('/'), path);

        Ok(Self {
            client,
            url,
            api_key: cfg
                .api_key
                .clone()
                .or_else(|| Self::get_api_key(&cfg.provider_id)),
            auth_style: cfg.auth_style,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn get_api_key(provider_id: &str) -> Option<String> {
        // 1. Try Keyring
        if let Ok(entry) = Entry::new("will-ai", provider_id) {
            if let Ok(key) = entry.get_password() {
                return Some(key);
            }
        }

        // 2. Try Environment Variable (PROVIDER_API_KEY)
        let env_var = format!("{}_API_KEY", provider_id.to_uppercase());
        env::var(env_var).ok()
    }

    /// POST `body` and return the decoded JSON on success.
    pub async fn execute(&self, body: &Value) -> std::result::Result<Value, RemoteFailure> {
        let request_id = Uuid::new_v4().to_string();
        let mut req = self
            .client
            .post(&self.url)
            .json(body)
            .header("x-request-id", &request_id);
        if let Some(key) = &self.api_key {
            req = match self.auth_style {
                AuthStyle::Bearer => req.bearer_auth(key),
                AuthStyle::GoogleApiKey => req.header(GOOGLE_API_KEY_HEADER, key),
            };
        }

        let resp = req.send().await?;
        let status = resp.status();
        debug!(
            http_status = status.as_u16(),
            request_id = request_id.as_str(),
            "generation response received"
        );

        if !status.is_success() {
            let retry_after = retry_after_secs(resp.headers());
            let mut failure = error_body_failure(status.as_u16(), resp.text().await);
            if let Some(secs) = retry_after {
                if !failure.details.iter().any(|d| d.get("retryDelay").is_some()) {
                    failure = failure.with_detail(json!({ "retryDelay": format!("{}s", secs) }));
                }
            }
            return Err(failure);
        }

        let json = resp.json::<Value>().await.map_err(|e| {
            RemoteFailure::empty_response(format!("Invalid response from AI: {}", e))
        })?;
        Ok(json)
    }

    /// Send a single user prompt and return the generated text.
    pub async fn generate_text(&self, prompt: &str) -> std::result::Result<String, RemoteFailure> {
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }]
        });
        let response = self.execute(&body).await?;
        extract_text(&response)
            .ok_or_else(|| RemoteFailure::empty_response("Empty response from AI"))
    }
}

/// Concatenated text parts of the first candidate, if non-blank.
pub fn extract_text(response: &Value) -> Option<String> {
    let parts = response
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Failure for a non-success response. An unreadable body keeps the read
/// error in the message.
fn error_body_failure<E: std::fmt::Display>(
    http_status: u16,
    body: std::result::Result<String, E>,
) -> RemoteFailure {
    match body {
        Ok(body) => RemoteFailure::from_response_body(http_status, &body),
        Err(e) => RemoteFailure::new(format!(
            "HTTP {}: failed to read error body: {}",
            http_status, e
        ))
        .with_status_code(http_status),
    }
}

/// Only the common `Retry-After: <seconds>` form is supported.
fn retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("retry-after")?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}
