//! Work submission to a selected worker.

use std::time::Duration;

use async_trait::async_trait;
use hyper::{Method, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::WorkerEndpoint;
use crate::error::DispatchError;
use crate::http::{self, HttpClient};

/// Acknowledgement returned by a worker that accepted and finished an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkReceipt {
    pub message: String,
    /// Seconds spent processing.
    pub processing_time: f64,
}

/// Sends one work item to a worker.
#[async_trait]
pub trait WorkDispatcher: Send + Sync {
    async fn dispatch(&self, worker: &WorkerEndpoint) -> Result<WorkReceipt, DispatchError>;
}

/// Submits work over HTTP with a bounded timeout.
pub struct HttpDispatcher {
    client: HttpClient,
    timeout: Duration,
}

impl HttpDispatcher {
    pub fn new(timeout: Duration) -> Self {
        Self::with_client(http::new_client(), timeout)
    }

    pub fn with_client(client: HttpClient, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

/// Overload signals a worker may answer with.
fn is_overloaded(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::TOO_MANY_REQUESTS
    )
}

#[async_trait]
impl WorkDispatcher for HttpDispatcher {
    async fn dispatch(&self, worker: &WorkerEndpoint) -> Result<WorkReceipt, DispatchError> {
        let unreachable = |reason: String| DispatchError::Unreachable {
            worker: worker.name.clone(),
            reason,
        };

        let (status, body) = http::fetch(&self.client, Method::POST, &worker.work_url, self.timeout)
            .await
            .map_err(|e| unreachable(e.to_string()))?;

        if is_overloaded(status) {
            return Err(DispatchError::Rejected {
                worker: worker.name.clone(),
            });
        }
        if !status.is_success() {
            return Err(unreachable(format!("unexpected status {}", status.as_u16())));
        }

        serde_json::from_slice(&body).map_err(|e| unreachable(format!("malformed receipt: {e}")))
    }
}
