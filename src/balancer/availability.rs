//! Per-worker availability tracking with hysteresis.
//!
//! A worker drops out of rotation as soon as either idle metric falls below
//! the low threshold (or it stops answering), and only re-enters once both
//! metrics reach the high threshold. Readings in between leave the state alone,
//! which keeps workers hovering near a single cut-off from flapping.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::probe::CapacityReading;

/// Whether a worker may be selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Availability {
    Available,
    Unavailable,
}

/// Downgrade/upgrade thresholds on idle percentage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub low: f64,
    pub high: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            low: 20.0,
            high: 70.0,
        }
    }
}

impl Thresholds {
    /// Applies one reading to the current state.
    pub fn next_state(&self, current: Availability, reading: &CapacityReading) -> Availability {
        let Some(capacity) = reading.capacity() else {
            return Availability::Unavailable;
        };

        if capacity.cpu_idle < self.low || capacity.mem_idle < self.low {
            Availability::Unavailable
        } else if capacity.cpu_idle >= self.high && capacity.mem_idle >= self.high {
            Availability::Available
        } else {
            current
        }
    }
}

/// Tracks availability of every worker.
///
/// Thread-safe via DashMap. Workers never evaluated are considered available.
pub struct AvailabilityTracker {
    states: DashMap<String, Availability>,
    thresholds: Thresholds,
}

impl AvailabilityTracker {
    /// Creates a new AvailabilityTracker.
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            states: DashMap::new(),
            thresholds,
        }
    }

    /// Feeds a fresh reading for `worker` and returns its resulting state.
    ///
    /// Transitions are logged; steady states are not.
    pub fn evaluate(&self, worker: &str, reading: &CapacityReading) -> Availability {
        let mut entry = self
            .states
            .entry(worker.to_string())
            .or_insert(Availability::Available);
        let previous = *entry;
        let next = self.thresholds.next_state(previous, reading);
        *entry = next;
        drop(entry);

        if previous != next {
            match reading.capacity() {
                Some(capacity) => tracing::info!(
                    worker = worker,
                    from = ?previous,
                    to = ?next,
                    cpu_idle = capacity.cpu_idle,
                    mem_idle = capacity.mem_idle,
                    "worker availability changed"
                ),
                None => tracing::info!(
                    worker = worker,
                    from = ?previous,
                    to = ?next,
                    "worker availability changed: unreachable"
                ),
            }
        }
        next
    }

    /// Returns the current state of a worker.
    pub fn state(&self, worker: &str) -> Availability {
        self.states
            .get(worker)
            .map(|state| *state)
            .unwrap_or(Availability::Available)
    }

    /// Returns whether a worker is available.
    pub fn is_available(&self, worker: &str) -> bool {
        self.state(worker) == Availability::Available
    }

    /// Counts the available workers among `names`.
    pub fn available_count<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> usize {
        names.into_iter().filter(|name| self.is_available(name)).count()
    }

    /// Returns the configured thresholds.
    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }
}

impl Default for AvailabilityTracker {
    fn default() -> Self {
        Self::new(Thresholds::default())
    }
}
