use serde::Serialize;

/// What happened while a single logical call was being retried.
///
/// Fresh per invocation; attached to the success envelope and to every
/// terminal error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptMetadata {
    pub attempts: u32,
    pub total_wait_ms: u64,
    /// Stopped because the next backoff would overrun the wait budget.
    pub aborted: bool,
    /// Stopped because every allowed attempt failed transiently.
    pub exhausted: bool,
}

/// Successful result of a guarded call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Retried<T> {
    pub result: T,
    pub metadata: AttemptMetadata,
}

impl<T> Retried<T> {
    pub fn into_result(self) -> T {
        self.result
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Retried<U> {
        Retried {
            result: f(self.result),
            metadata: self.metadata,
        }
    }
}
