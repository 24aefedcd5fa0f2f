//! Process entry point.
//!
//! `adaptive-lb <balancer|worker|monitor> [config.toml]`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use adaptive_lb::balancer::{serve_status, BalancerState, RetryBuffer};
use adaptive_lb::config::{self, Config};
use adaptive_lb::worker::{serve_worker, AdmissionController, WorkerContext};
use adaptive_lb::{http, monitor, DispatchController, HttpDispatcher, HttpProbe};
use anyhow::{bail, Context, Result};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const USAGE: &str = "usage: adaptive-lb <balancer|worker|monitor> [config.toml]";

const MONITOR_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let role = args.next().unwrap_or_default();
    if !matches!(role.as_str(), "balancer" | "worker" | "monitor") {
        bail!(USAGE);
    }

    let config_path = args.next().map(PathBuf::from);
    let config = config::load(config_path.as_deref()).context("loading configuration")?;

    tracing::info!(role = %role, "adaptive-lb starting");

    match role.as_str() {
        "balancer" => run_balancer(config).await,
        "worker" => run_worker(config).await,
        _ => {
            let probe = HttpProbe::new(config.balancer.probe_timeout());
            monitor::run_monitor(config.workers, probe, MONITOR_INTERVAL).await;
            Ok(())
        }
    }
}

async fn run_balancer(config: Config) -> Result<()> {
    if config.workers.is_empty() {
        bail!("no workers configured");
    }

    let settings = &config.balancer;
    let state = Arc::new(BalancerState::new(
        settings.thresholds(),
        RetryBuffer::new(settings.retry_buffer_capacity, settings.overflow_policy),
    ));

    if let Some(addr) = settings.status_addr {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding status endpoint on {addr}"))?;
        tracing::info!(%addr, "status endpoint listening");

        let state = Arc::clone(&state);
        let workers = config.workers.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_status(listener, state, workers).await {
                tracing::error!(error = %e, "status endpoint stopped");
            }
        });
    }

    let client = http::new_client();
    let mut controller = DispatchController::new(
        config.workers.clone(),
        HttpProbe::with_client(client.clone(), settings.probe_timeout()),
        HttpDispatcher::with_client(client, settings.dispatch_timeout()),
        state,
    )
    .with_selector(settings.selector())
    .with_settings(settings.controller_settings());
    if let Some(seed) = settings.seed {
        controller = controller.with_seed(seed);
    }

    controller.run().await;
    Ok(())
}

async fn run_worker(config: Config) -> Result<()> {
    let worker = config.worker;
    let settings = worker.admission_settings();
    let admission = Arc::new(match worker.seed {
        Some(seed) => AdmissionController::with_seed(settings, seed),
        None => AdmissionController::new(settings),
    });

    tokio::spawn(Arc::clone(&admission).run_drain(worker.drain_interval()));

    let listener = TcpListener::bind(worker.listen_addr)
        .await
        .with_context(|| format!("binding worker listener on {}", worker.listen_addr))?;
    tracing::info!(worker = %worker.name, addr = %worker.listen_addr, "worker listening");

    let ctx = Arc::new(WorkerContext::new(worker.name, admission));
    serve_worker(listener, ctx).await?;
    Ok(())
}
