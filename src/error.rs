//! Error taxonomy for the balancer and its HTTP plumbing.
//!
//! None of these errors are fatal. Probe failures collapse into
//! [`CapacityReading::Unreachable`](crate::balancer::CapacityReading) at the
//! probe boundary, and dispatch and selection failures are absorbed by the
//! dispatch controller, which buffers the work item and keeps cycling.

use std::time::Duration;

/// Failure to complete an HTTP exchange with a worker.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid request: {0}")]
    Request(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("failed to read response body: {0}")]
    Body(String),
}

/// Reasons a capacity query produced no usable reading.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("capacity endpoint returned status {0}")]
    Status(u16),
    #[error("malformed capacity payload: {0}")]
    Payload(String),
}

/// Outcome of a work submission that did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The worker refused the item because it is overloaded.
    #[error("worker {worker} rejected work: overloaded")]
    Rejected { worker: String },
    /// The worker could not be reached or answered with garbage.
    #[error("worker {worker} unreachable: {reason}")]
    Unreachable { worker: String, reason: String },
}

/// Selection found nothing to dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    #[error("no available worker: new capacity needed")]
    NoCapacity,
}
