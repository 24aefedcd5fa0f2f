//! The dispatch loop.
//!
//! Each cycle probes every worker, updates availability, selects the
//! least-loaded available worker and submits one work item to it. Rejections,
//! transport failures and the absence of any available worker all end in the
//! item being buffered; the loop itself never stops.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{Span, WorkerEndpoint};
use crate::error::DispatchError;

use super::availability::{Availability, AvailabilityTracker, Thresholds};
use super::dispatch::{WorkDispatcher, WorkReceipt};
use super::probe::{CapacityProbe, CapacityReading};
use super::retry_buffer::{BufferedItem, OverflowPolicy, PushOutcome, RetryBuffer};
use super::selection::{Candidate, Selector};

/// Pacing between cycles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerSettings {
    /// Delay after a cycle that reached a worker, drawn uniformly.
    pub cycle_delay: Span<Duration>,
    /// Delay after a cycle that found no available worker.
    pub no_capacity_backoff: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            cycle_delay: Span::new(Duration::from_millis(500), Duration::from_millis(1_500)),
            no_capacity_backoff: Duration::from_secs(2),
        }
    }
}

/// What one cycle did.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The item was accepted; `drained` buffered items were retired with it.
    Dispatched {
        worker: String,
        receipt: WorkReceipt,
        drained: usize,
    },
    /// The worker refused the item as overloaded; it was buffered.
    Rejected { worker: String },
    /// The worker could not be reached; the item was buffered.
    Unreachable { worker: String },
    /// No worker was available; the item was buffered.
    NoCapacity,
}

impl CycleOutcome {
    pub fn buffered(&self) -> bool {
        !matches!(self, CycleOutcome::Dispatched { .. })
    }
}

/// Balancer state shared with the status endpoint.
pub struct BalancerState {
    availability: AvailabilityTracker,
    buffer: Mutex<RetryBuffer>,
    dispatched: AtomicU64,
}

impl BalancerState {
    pub fn new(thresholds: Thresholds, buffer: RetryBuffer) -> Self {
        Self {
            availability: AvailabilityTracker::new(thresholds),
            buffer: Mutex::new(buffer),
            dispatched: AtomicU64::new(0),
        }
    }

    pub fn availability(&self) -> &AvailabilityTracker {
        &self.availability
    }

    /// Items currently waiting for retry.
    pub fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Items lost to retry buffer overflow.
    pub fn overflowed(&self) -> u64 {
        self.buffer.lock().dropped()
    }

    /// Successful dispatches so far.
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    fn buffer_item(&self, reason: &'static str) {
        let (outcome, buffered) = {
            let mut buffer = self.buffer.lock();
            let outcome = buffer.push(BufferedItem::now());
            (outcome, buffer.len())
        };

        match outcome {
            PushOutcome::Buffered => {
                tracing::warn!(reason, buffered, "work item buffered for retry")
            }
            PushOutcome::DroppedOldest(evicted) => {
                let age_ms = evicted
                    .submitted_at
                    .elapsed()
                    .unwrap_or_default()
                    .as_millis() as u64;
                tracing::warn!(
                    reason,
                    buffered,
                    evicted_age_ms = age_ms,
                    "retry buffer full; dropped oldest item"
                )
            }
            PushOutcome::Rejected => {
                tracing::warn!(reason, buffered, "retry buffer full; work item dropped")
            }
        }
    }

    fn record_success(&self) -> usize {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        let mut buffer = self.buffer.lock();
        match buffer.pop_oldest() {
            Some(_) => {
                tracing::info!(buffered = buffer.len(), "retry buffer drained one item");
                1
            }
            None => 0,
        }
    }
}

impl Default for BalancerState {
    fn default() -> Self {
        Self::new(
            Thresholds::default(),
            RetryBuffer::new(1_024, OverflowPolicy::DropOldest),
        )
    }
}

/// Drives probe → availability → selection → dispatch.
pub struct DispatchController<P, D> {
    workers: Vec<WorkerEndpoint>,
    probe: P,
    dispatcher: D,
    selector: Selector,
    settings: ControllerSettings,
    state: Arc<BalancerState>,
    rng: StdRng,
}

impl<P: CapacityProbe, D: WorkDispatcher> DispatchController<P, D> {
    pub fn new(
        workers: Vec<WorkerEndpoint>,
        probe: P,
        dispatcher: D,
        state: Arc<BalancerState>,
    ) -> Self {
        Self {
            workers,
            probe,
            dispatcher,
            selector: Selector::default(),
            settings: ControllerSettings::default(),
            state,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_selector(mut self, selector: Selector) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_settings(mut self, settings: ControllerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Makes tie-breaks and cycle delays reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Returns the shared balancer state.
    pub fn state(&self) -> &Arc<BalancerState> {
        &self.state
    }

    /// Returns the configured workers in probe order.
    pub fn workers(&self) -> &[WorkerEndpoint] {
        &self.workers
    }

    /// Runs one probe/select/dispatch cycle.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let mut readings = Vec::with_capacity(self.workers.len());
        for worker in &self.workers {
            readings.push(self.probe.probe(worker).await);
        }

        let availability = self.state.availability();
        let candidates: Vec<Candidate<'_>> = self
            .workers
            .iter()
            .zip(&readings)
            .filter_map(|(worker, reading)| {
                match (availability.evaluate(&worker.name, reading), reading) {
                    (Availability::Available, CapacityReading::Reported(capacity)) => {
                        Some(Candidate {
                            worker,
                            capacity: *capacity,
                        })
                    }
                    _ => None,
                }
            })
            .collect();

        let target = match self.selector.select(&candidates, &mut self.rng) {
            Ok(selection) => {
                tracing::info!(
                    selected = %selection.worker.name,
                    score = selection.score,
                    scores = ?selection.scores,
                    tie_set = ?selection.tie_set,
                    "worker selected"
                );
                selection.worker.clone()
            }
            Err(e) => {
                tracing::error!(
                    workers = self.workers.len(),
                    error = %e,
                    "no available worker: new capacity needed"
                );
                self.state.buffer_item("no_capacity");
                return CycleOutcome::NoCapacity;
            }
        };

        match self.dispatcher.dispatch(&target).await {
            Ok(receipt) => {
                let drained = self.state.record_success();
                tracing::info!(
                    worker = %target.name,
                    outcome = "success",
                    processing_time = receipt.processing_time,
                    "work dispatched"
                );
                CycleOutcome::Dispatched {
                    worker: target.name,
                    receipt,
                    drained,
                }
            }
            Err(DispatchError::Rejected { worker }) => {
                tracing::warn!(worker = %worker, outcome = "rejected", "worker overloaded");
                self.state.buffer_item("rejected");
                CycleOutcome::Rejected { worker }
            }
            Err(DispatchError::Unreachable { worker, reason }) => {
                tracing::warn!(
                    worker = %worker,
                    outcome = "unreachable",
                    reason = %reason,
                    "dispatch failed"
                );
                self.state.buffer_item("unreachable");
                CycleOutcome::Unreachable { worker }
            }
        }
    }

    /// Delay before the cycle following `outcome`.
    pub fn next_delay(&mut self, outcome: &CycleOutcome) -> Duration {
        match outcome {
            CycleOutcome::NoCapacity => self.settings.no_capacity_backoff,
            _ => {
                let Span { min, max } = self.settings.cycle_delay;
                self.rng.gen_range(min..=max)
            }
        }
    }

    /// Cycles forever.
    pub async fn run(mut self) {
        tracing::info!(workers = self.workers.len(), "dispatch loop started");
        loop {
            let outcome = self.run_cycle().await;
            let delay = self.next_delay(&outcome);
            tokio::time::sleep(delay).await;
        }
    }
}
