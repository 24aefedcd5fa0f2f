//! Worker-side admission control.
//!
//! The worker keeps a synthetic load accumulator. Accepted work raises it by a
//! random increment; completion decays it gradually (never below zero). When
//! either idle percentage falls under the admit threshold new work is refused
//! and remembered in a local buffer, which a background drain cycle promotes
//! back into processing once both idle percentages exceed the recovery
//! threshold.
//!
//! Load, task count, buffer and RNG sit behind one mutex so every capacity
//! snapshot is consistent. The lock is never held across an await.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::config::Span;

/// Admission tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdmissionSettings {
    /// Minimum idle percentage (both axes) to accept new work.
    pub admit_threshold: f64,
    /// Idle percentage (both axes) that must be exceeded to drain the buffer.
    pub recovery_threshold: f64,
    pub cpu_increment: Span<f64>,
    pub mem_increment: Span<f64>,
    pub cpu_decay: Span<f64>,
    pub mem_decay: Span<f64>,
    pub processing: Span<Duration>,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            admit_threshold: 20.0,
            recovery_threshold: 70.0,
            cpu_increment: Span::new(8.0, 12.0),
            mem_increment: Span::new(6.0, 10.0),
            cpu_decay: Span::new(3.0, 6.0),
            mem_decay: Span::new(2.0, 5.0),
            processing: Span::new(Duration::from_secs(10), Duration::from_secs(15)),
        }
    }
}

/// Point-in-time view of a worker's spare capacity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapacitySnapshot {
    pub cpu_idle: f64,
    pub mem_idle: f64,
    pub tasks_in_progress: u32,
    pub buffer_size: u64,
}

/// Immediate admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Accepted; simulated processing takes this long.
    Accepted(Duration),
    /// Refused and buffered locally.
    Rejected,
}

/// Final result of [`AdmissionController::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Completed { processing_time: Duration },
    Rejected,
}

struct LoadState {
    cpu_load: f64,
    mem_load: f64,
    tasks_in_progress: u32,
    buffer: VecDeque<SystemTime>,
    rng: StdRng,
}

impl LoadState {
    fn cpu_idle(&self) -> f64 {
        (100.0 - self.cpu_load).clamp(0.0, 100.0)
    }

    fn mem_idle(&self) -> f64 {
        (100.0 - self.mem_load).clamp(0.0, 100.0)
    }

    fn sample(&mut self, span: Span<f64>) -> f64 {
        self.rng.gen_range(span.min..=span.max)
    }

    /// Starts a task: bumps the task count and load, returns its duration.
    fn accrue(&mut self, settings: &AdmissionSettings) -> Duration {
        self.tasks_in_progress += 1;
        self.cpu_load += self.sample(settings.cpu_increment);
        self.mem_load += self.sample(settings.mem_increment);
        self.rng
            .gen_range(settings.processing.min..=settings.processing.max)
    }

    fn release(&mut self, settings: &AdmissionSettings) {
        self.tasks_in_progress = self.tasks_in_progress.saturating_sub(1);
        self.cpu_load = (self.cpu_load - self.sample(settings.cpu_decay)).max(0.0);
        self.mem_load = (self.mem_load - self.sample(settings.mem_decay)).max(0.0);
    }
}

/// Accepts, rejects or buffers work based on synthetic load.
pub struct AdmissionController {
    state: Mutex<LoadState>,
    settings: AdmissionSettings,
}

impl AdmissionController {
    /// Creates a controller seeded from OS entropy.
    pub fn new(settings: AdmissionSettings) -> Self {
        Self::with_rng(settings, StdRng::from_entropy())
    }

    /// Seeded variant for reproducible load curves.
    pub fn with_seed(settings: AdmissionSettings, seed: u64) -> Self {
        Self::with_rng(settings, StdRng::seed_from_u64(seed))
    }

    fn with_rng(settings: AdmissionSettings, rng: StdRng) -> Self {
        Self {
            state: Mutex::new(LoadState {
                cpu_load: 0.0,
                mem_load: 0.0,
                tasks_in_progress: 0,
                buffer: VecDeque::new(),
                rng,
            }),
            settings,
        }
    }

    pub fn settings(&self) -> &AdmissionSettings {
        &self.settings
    }

    /// Decides on one incoming item without waiting for it to finish.
    ///
    /// An accepted item must be followed by exactly one [`complete`](Self::complete).
    pub fn admit(&self) -> Admission {
        let mut state = self.state.lock();
        let (cpu_idle, mem_idle) = (state.cpu_idle(), state.mem_idle());

        if cpu_idle < self.settings.admit_threshold || mem_idle < self.settings.admit_threshold {
            state.buffer.push_back(SystemTime::now());
            tracing::warn!(
                cpu_idle,
                mem_idle,
                buffered = state.buffer.len(),
                "overloaded; work rejected and buffered"
            );
            return Admission::Rejected;
        }

        let processing = state.accrue(&self.settings);
        tracing::debug!(
            tasks_in_progress = state.tasks_in_progress,
            processing_ms = processing.as_millis() as u64,
            "work accepted"
        );
        Admission::Accepted(processing)
    }

    /// Finishes one task, decaying load.
    pub fn complete(&self) {
        self.state.lock().release(&self.settings);
    }

    /// Admits one item and, if accepted, simulates processing it.
    ///
    /// Processing runs on its own task, so the task count still settles if
    /// the caller stops waiting.
    pub async fn submit(self: &Arc<Self>) -> SubmitOutcome {
        match self.admit() {
            Admission::Rejected => SubmitOutcome::Rejected,
            Admission::Accepted(duration) => {
                let processing_time = self.process(duration).await.unwrap_or(duration);
                SubmitOutcome::Completed { processing_time }
            }
        }
    }

    /// Sleeps for `duration` on a detached task, then completes it.
    fn process(self: &Arc<Self>, duration: Duration) -> JoinHandle<Duration> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            tokio::time::sleep(duration).await;
            this.complete();
            started.elapsed()
        })
    }

    /// Returns the current capacity snapshot.
    pub fn capacity(&self) -> CapacitySnapshot {
        let state = self.state.lock();
        CapacitySnapshot {
            cpu_idle: state.cpu_idle(),
            mem_idle: state.mem_idle(),
            tasks_in_progress: state.tasks_in_progress,
            buffer_size: state.buffer.len() as u64,
        }
    }

    /// Promotes the oldest buffered item if capacity has recovered.
    ///
    /// Returns the promoted task's processing duration; the caller owes one
    /// [`complete`](Self::complete) after it elapses.
    pub fn drain_once(&self) -> Option<Duration> {
        let mut state = self.state.lock();
        let recovered = state.cpu_idle() > self.settings.recovery_threshold
            && state.mem_idle() > self.settings.recovery_threshold;
        if !recovered {
            return None;
        }

        let queued_at = state.buffer.pop_front()?;
        let processing = state.accrue(&self.settings);
        tracing::info!(
            waited_ms = queued_at.elapsed().unwrap_or_default().as_millis() as u64,
            remaining = state.buffer.len(),
            "buffered work promoted"
        );
        Some(processing)
    }

    /// Runs the drain cycle every `interval`, forever.
    pub async fn run_drain(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Some(duration) = self.drain_once() {
                self.process(duration);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_settings() -> AdmissionSettings {
        AdmissionSettings {
            processing: Span::new(Duration::from_millis(10), Duration::from_millis(15)),
            ..AdmissionSettings::default()
        }
    }

    fn loaded(cpu_load: f64, mem_load: f64) -> AdmissionController {
        let controller = AdmissionController::with_seed(fast_settings(), 42);
        {
            let mut state = controller.state.lock();
            state.cpu_load = cpu_load;
            state.mem_load = mem_load;
        }
        controller
    }

    fn loads(controller: &AdmissionController) -> (f64, f64) {
        let state = controller.state.lock();
        (state.cpu_load, state.mem_load)
    }

    // ========== Phase 1: Admission ==========

    #[test]
    fn test_fresh_worker_is_fully_idle() {
        let controller = AdmissionController::with_seed(fast_settings(), 1);
        assert_eq!(
            controller.capacity(),
            CapacitySnapshot {
                cpu_idle: 100.0,
                mem_idle: 100.0,
                tasks_in_progress: 0,
                buffer_size: 0,
            }
        );
    }

    #[test]
    fn test_low_cpu_idle_rejects_without_new_task() {
        let controller = loaded(85.0, 10.0);
        assert_eq!(controller.admit(), Admission::Rejected);

        let snapshot = controller.capacity();
        assert_eq!(snapshot.tasks_in_progress, 0);
        assert_eq!(snapshot.buffer_size, 1);
        assert_eq!(loads(&controller), (85.0, 10.0));
    }

    #[test]
    fn test_low_mem_idle_rejects() {
        let controller = loaded(10.0, 80.5);
        assert_eq!(controller.admit(), Admission::Rejected);
        assert_eq!(controller.capacity().tasks_in_progress, 0);
    }

    #[test]
    fn test_threshold_idle_is_admitted() {
        // idle == 20 on both axes is still acceptable.
        let controller = loaded(80.0, 80.0);
        assert!(matches!(controller.admit(), Admission::Accepted(_)));
    }

    #[test]
    fn test_admit_accrues_load_within_ranges() {
        let controller = loaded(0.0, 0.0);
        let Admission::Accepted(duration) = controller.admit() else {
            panic!("expected acceptance");
        };

        assert!(duration >= Duration::from_millis(10) && duration <= Duration::from_millis(15));
        let (cpu, mem) = loads(&controller);
        assert!((8.0..=12.0).contains(&cpu), "cpu load {}", cpu);
        assert!((6.0..=10.0).contains(&mem), "mem load {}", mem);
        assert_eq!(controller.capacity().tasks_in_progress, 1);
    }

    #[test]
    fn test_complete_decays_and_clamps_at_zero() {
        let controller = loaded(50.0, 50.0);
        controller.admit();
        controller.complete();
        let (cpu, mem) = loads(&controller);
        assert!(cpu > 50.0 - 6.0 + 8.0 - 0.001 && cpu < 50.0 + 12.0 - 3.0 + 0.001);
        assert!(mem > 50.0 - 5.0 + 6.0 - 0.001 && mem < 50.0 + 10.0 - 2.0 + 0.001);

        let idle = loaded(1.0, 1.0);
        idle.complete();
        assert_eq!(loads(&idle), (0.0, 0.0));
        assert_eq!(idle.capacity().tasks_in_progress, 0);
    }

    #[test]
    fn test_repeated_admission_eventually_rejects() {
        let controller = AdmissionController::with_seed(fast_settings(), 3);
        let mut accepted = 0;
        while controller.admit() != Admission::Rejected {
            accepted += 1;
            assert!(accepted < 20, "load never saturated");
        }
        // Needs at least 80 points of cpu load at <= 12 per task.
        assert!(accepted >= 7);
        assert!(controller.capacity().cpu_idle < 20.0 || controller.capacity().mem_idle < 20.0);
    }

    // ========== Phase 2: Submit ==========

    #[tokio::test(start_paused = true)]
    async fn test_submit_returns_task_count_to_baseline() {
        let controller = Arc::new(loaded(30.0, 30.0));
        let before = controller.capacity().tasks_in_progress;

        let outcome = controller.submit().await;
        let SubmitOutcome::Completed { processing_time } = outcome else {
            panic!("expected completion");
        };
        assert!(processing_time >= Duration::from_millis(10));
        assert!(processing_time <= Duration::from_millis(16));
        assert_eq!(controller.capacity().tasks_in_progress, before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_in_flight_counts_as_task() {
        let controller = Arc::new(loaded(0.0, 0.0));
        let handle = tokio::spawn({
            let controller = Arc::clone(&controller);
            async move { controller.submit().await }
        });

        // Let the submit reach its sleep.
        while controller.capacity().tasks_in_progress == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(controller.capacity().tasks_in_progress, 1);

        assert!(matches!(handle.await.unwrap(), SubmitOutcome::Completed { .. }));
        assert_eq!(controller.capacity().tasks_in_progress, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_submit_still_completes() {
        let controller = Arc::new(loaded(0.0, 0.0));

        let waited =
            tokio::time::timeout(Duration::from_millis(2), controller.submit()).await;
        assert!(waited.is_err());
        assert_eq!(controller.capacity().tasks_in_progress, 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(controller.capacity().tasks_in_progress, 0);
    }

    #[tokio::test]
    async fn test_submit_rejected_when_overloaded() {
        let controller = Arc::new(loaded(95.0, 95.0));
        assert_eq!(controller.submit().await, SubmitOutcome::Rejected);
        assert_eq!(controller.capacity().buffer_size, 1);
    }

    // ========== Phase 3: Drain Cycle ==========

    #[test]
    fn test_drain_needs_buffered_work() {
        let controller = loaded(0.0, 0.0);
        assert_eq!(controller.drain_once(), None);
        assert_eq!(controller.capacity().tasks_in_progress, 0);
    }

    #[test]
    fn test_drain_waits_for_recovery() {
        let controller = loaded(90.0, 90.0);
        controller.admit();
        assert_eq!(controller.capacity().buffer_size, 1);

        // idle exactly 70 does not exceed the recovery threshold
        {
            let mut state = controller.state.lock();
            state.cpu_load = 30.0;
            state.mem_load = 30.0;
        }
        assert_eq!(controller.drain_once(), None);

        {
            let mut state = controller.state.lock();
            state.cpu_load = 29.0;
            state.mem_load = 10.0;
        }
        assert!(controller.drain_once().is_some());
        let snapshot = controller.capacity();
        assert_eq!(snapshot.buffer_size, 0);
        assert_eq!(snapshot.tasks_in_progress, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_loop_promotes_backlog() {
        let controller = Arc::new(loaded(95.0, 95.0));
        controller.admit();
        controller.admit();
        assert_eq!(controller.capacity().buffer_size, 2);

        {
            let mut state = controller.state.lock();
            state.cpu_load = 0.0;
            state.mem_load = 0.0;
        }

        let handle = tokio::spawn(Arc::clone(&controller).run_drain(Duration::from_secs(1)));
        // Ticks at 0s and 1s each promote one item; both finish well before 2.5s.
        tokio::time::sleep(Duration::from_millis(2_500)).await;

        let snapshot = controller.capacity();
        assert_eq!(snapshot.buffer_size, 0);
        assert_eq!(snapshot.tasks_in_progress, 0);

        handle.abort();
    }

    #[test]
    fn test_controller_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AdmissionController>();
    }
}
