//! Guarded generation client: HTTP transport behind the retry executor.

use crate::config::ResilienceConfig;
use crate::resilience::metadata::Retried;
use crate::resilience::retry::RetryExecutor;
use crate::transport::{HttpTransport, TransportConfig};
use crate::Result;
use serde_json::Value;
use std::sync::Arc;

/// Every request from this client goes through the same rate gate.
#[derive(Clone)]
pub struct GenerationClient {
    transport: Arc<HttpTransport>,
    executor: RetryExecutor,
}

impl GenerationClient {
    pub fn new(transport: HttpTransport, executor: RetryExecutor) -> Self {
        Self {
            transport: Arc::new(transport),
            executor,
        }
    }

    pub fn from_config(transport: &TransportConfig, resilience: &ResilienceConfig) -> Result<Self> {
        Ok(Self::new(
            HttpTransport::new(transport)?,
            resilience.build_executor()?,
        ))
    }

    pub fn executor(&self) -> &RetryExecutor {
        &self.executor
    }

    /// Generate text for `prompt`. `operation_name` labels logs and errors.
    pub async fn generate_text(&self, prompt: &str, operation_name: &str) -> Result<Retried<String>> {
        let transport = self.transport.as_ref();
        self.executor
            .execute_with_retry(move || transport.generate_text(prompt), operation_name)
            .await
    }

    /// Send a raw request body and return the raw JSON response.
    pub async fn generate(&self, body: &Value, operation_name: &str) -> Result<Retried<Value>> {
        let transport = self.transport.as_ref();
        self.executor
            .execute_with_retry(move || transport.execute(body), operation_name)
            .await
    }
}
