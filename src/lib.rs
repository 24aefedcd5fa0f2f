//! Capacity-aware load balancing across a fixed pool of workers.
//!
//! The balancer repeatedly probes every worker's spare capacity, keeps a
//! per-worker availability state with hysteresis, picks the least-loaded
//! available worker (randomly among near-ties) and submits work to it. Work
//! that is refused, fails in transit or finds no available worker is kept in a
//! bounded retry buffer.
//!
//! Workers protect themselves: a synthetic load accumulator decides whether to
//! admit new work, refused work is buffered locally, and a background drain
//! cycle promotes it once capacity recovers.
//!
//! # Architecture
//!
//! ```text
//!              +--------------------------------------+
//!              |          DispatchController          |
//!              |  probe -> availability -> selection  |
//!              |          -> dispatch | retry buffer  |
//!              +---------+--------------+-------------+
//!                        | GET /metrics | POST /work
//!          +-------------+--+    +------+---------+
//!          |    Worker 1    |    |    Worker 2    |  ...
//!          |   Admission    |    |   Admission    |
//!          |   Controller   |    |   Controller   |
//!          +----------------+    +----------------+
//! ```

pub mod balancer;
pub mod config;
pub mod error;
pub mod http;
pub mod monitor;
pub mod worker;

pub use balancer::{BalancerState, DispatchController, HttpDispatcher, HttpProbe};
pub use config::{Config, WorkerEndpoint};
pub use worker::{AdmissionController, WorkerContext};
