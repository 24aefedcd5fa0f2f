//! Read-only HTTP view of the balancer.
//!
//! `/status` reports every worker's availability and the retry buffer;
//! `/healthz` is a liveness probe. Everything else is 404.

use std::convert::Infallible;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use crate::config::WorkerEndpoint;
use crate::http;

use super::availability::Availability;
use super::controller::BalancerState;

/// Availability of one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub name: String,
    pub state: Availability,
}

/// Body of `GET /status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub workers: Vec<WorkerStatus>,
    pub buffered: usize,
    pub overflowed: u64,
    pub dispatched: u64,
}

impl StatusReport {
    /// Builds a report from the current balancer state.
    pub fn collect(state: &BalancerState, workers: &[WorkerEndpoint]) -> Self {
        Self {
            workers: workers
                .iter()
                .map(|w| WorkerStatus {
                    name: w.name.clone(),
                    state: state.availability().state(&w.name),
                })
                .collect(),
            buffered: state.buffered(),
            overflowed: state.overflowed(),
            dispatched: state.dispatched(),
        }
    }
}

fn route(
    req: &Request<Incoming>,
    state: &BalancerState,
    workers: &[WorkerEndpoint],
) -> Response<Full<Bytes>> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/status") => {
            http::json_response(StatusCode::OK, &StatusReport::collect(state, workers))
        }
        (_, "/healthz") => http::text_response(StatusCode::OK, "ok"),
        _ => http::text_response(StatusCode::NOT_FOUND, "not found"),
    }
}

/// Serves the status endpoint on `listener` until accepting fails.
pub async fn serve_status(
    listener: TcpListener,
    state: Arc<BalancerState>,
    workers: Vec<WorkerEndpoint>,
) -> std::io::Result<()> {
    let workers: Arc<[WorkerEndpoint]> = workers.into();
    http::serve(listener, move |req: Request<Incoming>| {
        let state = Arc::clone(&state);
        let workers = Arc::clone(&workers);
        async move { Ok::<_, Infallible>(route(&req, &state, &workers)) }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::probe::CapacityReading;
    use std::time::Duration;

    fn workers() -> Vec<WorkerEndpoint> {
        vec![
            WorkerEndpoint::from_base("w1", "http://w1:5000"),
            WorkerEndpoint::from_base("w2", "http://w2:5000"),
        ]
    }

    async fn start(
        state: Arc<BalancerState>,
    ) -> (String, tokio::task::JoinHandle<std::io::Result<()>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (
            format!("http://{}", addr),
            tokio::spawn(serve_status(listener, state, workers())),
        )
    }

    #[test]
    fn test_report_reflects_state() {
        let state = BalancerState::default();
        state
            .availability()
            .evaluate("w2", &CapacityReading::Unreachable);

        let report = StatusReport::collect(&state, &workers());
        assert_eq!(
            report.workers,
            vec![
                WorkerStatus {
                    name: "w1".to_string(),
                    state: Availability::Available,
                },
                WorkerStatus {
                    name: "w2".to_string(),
                    state: Availability::Unavailable,
                },
            ]
        );
        assert_eq!(report.buffered, 0);
        assert_eq!(report.dispatched, 0);
    }

    #[tokio::test]
    async fn test_status_endpoint_returns_report() {
        let state = Arc::new(BalancerState::default());
        state
            .availability()
            .evaluate("w1", &CapacityReading::Unreachable);
        let (base, handle) = start(Arc::clone(&state)).await;

        let client = http::new_client();
        let (status, body) = http::fetch(
            &client,
            Method::GET,
            &format!("{}/status", base),
            Duration::from_secs(2),
        )
        .await
        .unwrap();

        assert_eq!(status, StatusCode::OK);
        let report: StatusReport = serde_json::from_slice(&body).unwrap();
        assert_eq!(report.workers[0].state, Availability::Unavailable);
        assert_eq!(report.workers[1].state, Availability::Available);

        handle.abort();
    }

    #[tokio::test]
    async fn test_healthz_and_unknown_path() {
        let (base, handle) = start(Arc::new(BalancerState::default())).await;
        let client = http::new_client();

        let (status, body) = http::fetch(
            &client,
            Method::GET,
            &format!("{}/healthz", base),
            Duration::from_secs(2),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"ok");

        let (status, _) = http::fetch(
            &client,
            Method::GET,
            &format!("{}/foo", base),
            Duration::from_secs(2),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::NOT_FOUND);

        handle.abort();
    }
}
