//! Balancer side: capacity probing, availability tracking, selection and the
//! dispatch loop.

mod availability;
mod controller;
mod dispatch;
mod probe;
mod retry_buffer;
mod selection;
mod status;

pub use availability::{Availability, AvailabilityTracker, Thresholds};
pub use controller::{BalancerState, ControllerSettings, CycleOutcome, DispatchController};
pub use dispatch::{HttpDispatcher, WorkDispatcher, WorkReceipt};
pub use probe::{Capacity, CapacityProbe, CapacityReading, HttpProbe};
pub use retry_buffer::{BufferedItem, OverflowPolicy, PushOutcome, RetryBuffer};
pub use selection::{Candidate, Selection, Selector};
pub use status::{serve_status, StatusReport, WorkerStatus};
