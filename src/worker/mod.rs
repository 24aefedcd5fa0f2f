//! Worker side: admission control and the HTTP endpoints the balancer talks to.

mod admission;
mod server;

pub use admission::{
    Admission, AdmissionController, AdmissionSettings, CapacitySnapshot, SubmitOutcome,
};
pub use server::{serve_worker, worker_handler, MetricsBody, WorkerContext};
