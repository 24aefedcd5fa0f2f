//! Capacity probing.
//!
//! A probe asks one worker for its current spare capacity. Every failure mode
//! (timeout, refused connection, non-200 status, unparseable payload) collapses
//! into [`CapacityReading::Unreachable`]; the probe never returns an error.

use std::time::Duration;

use async_trait::async_trait;
use hyper::{Method, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::WorkerEndpoint;
use crate::error::ProbeError;
use crate::http::{self, HttpClient};

/// Spare capacity reported by a worker.
///
/// Idle values are synthetic percentages in `[0, 100]`; higher means more
/// headroom. Fields missing from the payload read as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capacity {
    pub cpu_idle: f64,
    #[serde(alias = "memory_idle")]
    pub mem_idle: f64,
    pub tasks_in_progress: u32,
    pub buffer_size: u64,
}

impl Capacity {
    /// Creates a reading with an empty remote buffer.
    pub fn new(cpu_idle: f64, mem_idle: f64, tasks_in_progress: u32) -> Self {
        Self {
            cpu_idle,
            mem_idle,
            tasks_in_progress,
            buffer_size: 0,
        }
    }

    /// Capacity score: mean idle percentage minus a per-task penalty.
    pub fn score(&self, penalty: f64) -> f64 {
        (self.cpu_idle + self.mem_idle) / 2.0 - f64::from(self.tasks_in_progress) * penalty
    }
}

/// Result of one capacity query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CapacityReading {
    Reported(Capacity),
    Unreachable,
}

impl CapacityReading {
    pub fn capacity(&self) -> Option<&Capacity> {
        match self {
            CapacityReading::Reported(capacity) => Some(capacity),
            CapacityReading::Unreachable => None,
        }
    }
}

/// Source of capacity readings.
#[async_trait]
pub trait CapacityProbe: Send + Sync {
    async fn probe(&self, worker: &WorkerEndpoint) -> CapacityReading;
}

/// Probes workers over HTTP with a bounded timeout.
pub struct HttpProbe {
    client: HttpClient,
    timeout: Duration,
}

impl HttpProbe {
    /// Creates a probe with its own HTTP client.
    pub fn new(timeout: Duration) -> Self {
        Self::with_client(http::new_client(), timeout)
    }

    /// Creates a probe sharing an existing HTTP client.
    pub fn with_client(client: HttpClient, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Queries the capacity endpoint, keeping the failure reason.
    pub async fn query(&self, worker: &WorkerEndpoint) -> Result<Capacity, ProbeError> {
        let (status, body) =
            http::fetch(&self.client, Method::GET, &worker.capacity_url, self.timeout).await?;
        if status != StatusCode::OK {
            return Err(ProbeError::Status(status.as_u16()));
        }
        serde_json::from_slice(&body).map_err(|e| ProbeError::Payload(e.to_string()))
    }
}

#[async_trait]
impl CapacityProbe for HttpProbe {
    async fn probe(&self, worker: &WorkerEndpoint) -> CapacityReading {
        match self.query(worker).await {
            Ok(capacity) => CapacityReading::Reported(capacity),
            Err(e) => {
                tracing::debug!(worker = %worker.name, error = %e, "capacity probe failed");
                CapacityReading::Unreachable
            }
        }
    }
}
