//! HTTP surface of a worker.
//!
//! - `GET /metrics`: capacity snapshot
//! - `GET|POST /work`: submit one item; 200 with a receipt once processed,
//!   503 `{"error": "overloaded"}` when refused
//! - `/healthz`: liveness
//!
//! Any other path returns 404.

use std::convert::Infallible;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use crate::balancer::WorkReceipt;
use crate::http;

use super::admission::{AdmissionController, CapacitySnapshot, SubmitOutcome};

/// Body of `GET /metrics`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsBody {
    pub server: String,
    #[serde(flatten)]
    pub capacity: CapacitySnapshot,
}

/// A named worker and its admission state.
pub struct WorkerContext {
    pub name: String,
    pub admission: Arc<AdmissionController>,
}

impl WorkerContext {
    pub fn new(name: impl Into<String>, admission: Arc<AdmissionController>) -> Self {
        Self {
            name: name.into(),
            admission,
        }
    }
}

/// Handles one worker request.
pub async fn worker_handler(
    req: Request<Incoming>,
    ctx: Arc<WorkerContext>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => http::json_response(
            StatusCode::OK,
            &MetricsBody {
                server: ctx.name.clone(),
                capacity: ctx.admission.capacity(),
            },
        ),
        (&Method::GET | &Method::POST, "/work") => submit(&ctx).await,
        (_, "/healthz") => http::text_response(StatusCode::OK, "ok"),
        _ => http::text_response(StatusCode::NOT_FOUND, "not found"),
    };
    Ok(response)
}

async fn submit(ctx: &WorkerContext) -> Response<Full<Bytes>> {
    match ctx.admission.submit().await {
        SubmitOutcome::Completed { processing_time } => {
            let processing_time = processing_time.as_secs_f64();
            tracing::info!(worker = %ctx.name, processing_time, "task completed");
            http::json_response(
                StatusCode::OK,
                &WorkReceipt {
                    message: "Task completed".to_string(),
                    processing_time,
                },
            )
        }
        SubmitOutcome::Rejected => {
            tracing::warn!(worker = %ctx.name, "task rejected: overloaded");
            http::json_response(
                StatusCode::SERVICE_UNAVAILABLE,
                &serde_json::json!({ "error": "overloaded" }),
            )
        }
    }
}

/// Serves worker requests on `listener` until accepting fails.
pub async fn serve_worker(listener: TcpListener, ctx: Arc<WorkerContext>) -> std::io::Result<()> {
    http::serve(listener, move |req| worker_handler(req, Arc::clone(&ctx))).await
}
