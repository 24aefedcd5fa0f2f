//! Console monitor: periodically prints every worker's reported capacity.

use std::time::Duration;

use crate::balancer::{CapacityProbe, CapacityReading};
use crate::config::WorkerEndpoint;

/// Probes every worker once and logs one line each.
pub async fn poll_once<P: CapacityProbe + ?Sized>(
    workers: &[WorkerEndpoint],
    probe: &P,
) -> Vec<(String, CapacityReading)> {
    let mut readings = Vec::with_capacity(workers.len());
    for worker in workers {
        let reading = probe.probe(worker).await;
        match &reading {
            CapacityReading::Reported(capacity) => tracing::info!(
                worker = %worker.name,
                cpu_idle = capacity.cpu_idle,
                mem_idle = capacity.mem_idle,
                tasks_in_progress = capacity.tasks_in_progress,
                buffer_size = capacity.buffer_size,
                "capacity"
            ),
            CapacityReading::Unreachable => {
                tracing::warn!(worker = %worker.name, "error reaching worker")
            }
        }
        readings.push((worker.name.clone(), reading));
    }
    readings
}

/// Polls forever at `interval`.
pub async fn run_monitor<P: CapacityProbe>(workers: Vec<WorkerEndpoint>, probe: P, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        poll_once(&workers, &probe).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::Capacity;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct HalfUp {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CapacityProbe for HalfUp {
        async fn probe(&self, worker: &WorkerEndpoint) -> CapacityReading {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if worker.name == "up" {
                CapacityReading::Reported(Capacity::new(70.0, 60.0, 1))
            } else {
                CapacityReading::Unreachable
            }
        }
    }

    fn workers() -> Vec<WorkerEndpoint> {
        vec![
            WorkerEndpoint::from_base("up", "http://up:5000"),
            WorkerEndpoint::from_base("down", "http://down:5000"),
        ]
    }

    #[tokio::test]
    async fn test_poll_once_reports_each_worker_in_order() {
        let probe = HalfUp {
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let readings = poll_once(&workers(), &probe).await;
        assert_eq!(
            readings,
            vec![
                (
                    "up".to_string(),
                    CapacityReading::Reported(Capacity::new(70.0, 60.0, 1))
                ),
                ("down".to_string(), CapacityReading::Unreachable),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_monitor_polls_every_interval() {
        let calls = Arc::new(AtomicUsize::new(0));
        let probe = HalfUp {
            calls: Arc::clone(&calls),
        };

        // Ticks at 0s, 1s and 2s.
        let _ = tokio::time::timeout(
            Duration::from_millis(2_500),
            run_monitor(workers(), probe, Duration::from_secs(1)),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }
}
