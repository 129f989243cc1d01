//! Scripted transport for tests. The handler decides each call's outcome
//! from the request itself; every executed task is recorded for assertions.

use crate::domain::errors::TransportError;
use crate::domain::ports::{ApiResponse, ApiTransport, RequestTask};
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

type Handler = Box<dyn Fn(&RequestTask) -> Result<serde_json::Value, TransportError> + Send + Sync>;
type DelayFn = Box<dyn Fn(&RequestTask) -> Duration + Send + Sync>;

pub struct MockTransport {
    handler: Handler,
    delay_fn: Option<DelayFn>,
    calls: Mutex<Vec<RequestTask>>,
}

impl MockTransport {
    pub fn new(
        handler: impl Fn(&RequestTask) -> Result<serde_json::Value, TransportError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            delay_fn: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every call succeeds with the same payload.
    pub fn succeeding_with(payload: serde_json::Value) -> Self {
        Self::new(move |_| Ok(payload.clone()))
    }

    /// Every call fails terminally with the same error.
    pub fn failing_with(error: TransportError) -> Self {
        Self::new(move |_| Err(error.clone()))
    }

    /// Delays every call by a fixed duration before responding.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.with_delay_fn(move |_| delay)
    }

    /// Delays each call by a per-request duration, e.g. to force completion
    /// order to differ from dispatch order.
    pub fn with_delay_fn(
        mut self,
        delay_fn: impl Fn(&RequestTask) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.delay_fn = Some(Box::new(delay_fn));
        self
    }

    pub fn calls(&self) -> Vec<RequestTask> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[async_trait]
impl ApiTransport for MockTransport {
    async fn execute(&self, task: RequestTask) -> Result<ApiResponse, TransportError> {
        if let Some(delay_fn) = &self.delay_fn {
            tokio::time::sleep(delay_fn(&task)).await;
        }

        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(task.clone());

        (self.handler)(&task).map(|body| ApiResponse {
            status: 200,
            body,
            attempts: 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::Credential;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_records_calls() {
        let transport = MockTransport::succeeding_with(json!({"price": 1.0}));

        let task = RequestTask::new("sources/alpaca/snapshots/AAPL", Credential::new("t"));
        let response = transport.execute(task).await.unwrap();

        assert_eq!(response.body, json!({"price": 1.0}));
        assert_eq!(transport.call_count(), 1);
        assert_eq!(transport.calls()[0].path, "sources/alpaca/snapshots/AAPL");
    }

    #[tokio::test]
    async fn test_mock_scripted_failure() {
        let transport = MockTransport::failing_with(TransportError::Server { status: 503 });

        let task = RequestTask::new("sources/alpaca/snapshots/AAPL", Credential::new("t"));
        let result = transport.execute(task).await;

        assert!(matches!(result, Err(TransportError::Server { status: 503 })));
    }
}
