//! Process configuration.
//!
//! Loaded once from a TOML file at startup and never re-read. Every field has a
//! default, so an empty file (or no file at all) yields a runnable three-worker
//! local setup.
//!
//! ```toml
//! [balancer]
//! penalty = 3.0
//! tie_epsilon = 0.5
//!
//! [worker]
//! name = "server1"
//! listen_addr = "0.0.0.0:5000"
//! processing_ms = { min = 10000, max = 15000 }
//!
//! [[workers]]
//! name = "server1"
//! capacity_url = "http://server1:5000/metrics"
//! work_url = "http://server1:5000/work"
//! ```

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::balancer::{ControllerSettings, OverflowPolicy, Selector, Thresholds};
use crate::worker::AdmissionSettings;

/// Default config file looked up when no path is given.
pub const DEFAULT_CONFIG_PATH: &str = "adaptive-lb.toml";

/// Environment variable overriding `worker.name`.
pub const WORKER_NAME_ENV: &str = "ADAPTIVE_LB_WORKER_NAME";

/// Environment variable overriding `worker.listen_addr`.
pub const WORKER_LISTEN_ENV: &str = "ADAPTIVE_LB_LISTEN";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{file}': {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file '{file}': {source}")]
    Parse {
        file: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Validation(String),
}

/// Inclusive numeric range sampled uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Span<T> {
    pub min: T,
    pub max: T,
}

impl<T> Span<T> {
    pub const fn new(min: T, max: T) -> Self {
        Self { min, max }
    }
}

impl<T: PartialOrd + std::fmt::Debug> Span<T> {
    fn check(&self, field: &str) -> Result<(), ConfigError> {
        if self.min > self.max {
            return Err(ConfigError::Validation(format!(
                "{field}: min {:?} exceeds max {:?}",
                self.min, self.max
            )));
        }
        Ok(())
    }
}

/// A backend worker known to the balancer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerEndpoint {
    /// Stable identity used in logs and state tracking.
    pub name: String,
    /// Capacity query endpoint (`GET`, JSON response).
    pub capacity_url: String,
    /// Work submission endpoint.
    pub work_url: String,
}

impl WorkerEndpoint {
    /// Builds an endpoint from a base URL such as `http://server1:5000`.
    pub fn from_base(name: impl Into<String>, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            name: name.into(),
            capacity_url: format!("{base}/metrics"),
            work_url: format!("{base}/work"),
        }
    }
}

/// Balancer tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    pub low_threshold: f64,
    pub high_threshold: f64,
    pub tie_epsilon: f64,
    pub penalty: f64,
    pub probe_timeout_ms: u64,
    pub dispatch_timeout_ms: u64,
    pub cycle_delay_ms: Span<u64>,
    pub no_capacity_backoff_ms: u64,
    pub retry_buffer_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    pub status_addr: Option<SocketAddr>,
    pub seed: Option<u64>,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            low_threshold: 20.0,
            high_threshold: 70.0,
            tie_epsilon: 0.5,
            penalty: 3.0,
            probe_timeout_ms: 2_000,
            dispatch_timeout_ms: 15_000,
            cycle_delay_ms: Span::new(500, 1_500),
            no_capacity_backoff_ms: 2_000,
            retry_buffer_capacity: 1_024,
            overflow_policy: OverflowPolicy::DropOldest,
            status_addr: None,
            seed: None,
        }
    }
}

impl BalancerConfig {
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            low: self.low_threshold,
            high: self.high_threshold,
        }
    }

    pub fn selector(&self) -> Selector {
        Selector::new(self.penalty, self.tie_epsilon)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            cycle_delay: Span::new(
                Duration::from_millis(self.cycle_delay_ms.min),
                Duration::from_millis(self.cycle_delay_ms.max),
            ),
            no_capacity_backoff: Duration::from_millis(self.no_capacity_backoff_ms),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let in_percent = |v: f64| (0.0..=100.0).contains(&v);
        if !in_percent(self.low_threshold) || !in_percent(self.high_threshold) {
            return Err(ConfigError::Validation(
                "balancer thresholds must lie in [0, 100]".to_string(),
            ));
        }
        if self.low_threshold >= self.high_threshold {
            return Err(ConfigError::Validation(format!(
                "balancer.low_threshold ({}) must be below high_threshold ({})",
                self.low_threshold, self.high_threshold
            )));
        }
        if !self.tie_epsilon.is_finite() || self.tie_epsilon < 0.0 {
            return Err(ConfigError::Validation(
                "balancer.tie_epsilon must be >= 0".to_string(),
            ));
        }
        if !self.penalty.is_finite() || self.penalty < 0.0 {
            return Err(ConfigError::Validation(
                "balancer.penalty must be >= 0".to_string(),
            ));
        }
        if self.probe_timeout_ms == 0 || self.dispatch_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "balancer timeouts must be positive".to_string(),
            ));
        }
        if self.retry_buffer_capacity == 0 {
            return Err(ConfigError::Validation(
                "balancer.retry_buffer_capacity must be positive".to_string(),
            ));
        }
        self.cycle_delay_ms.check("balancer.cycle_delay_ms")
    }
}

/// Worker-side admission tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub name: String,
    pub listen_addr: SocketAddr,
    pub admit_threshold: f64,
    pub recovery_threshold: f64,
    pub cpu_increment: Span<f64>,
    pub mem_increment: Span<f64>,
    pub cpu_decay: Span<f64>,
    pub mem_decay: Span<f64>,
    pub processing_ms: Span<u64>,
    pub drain_interval_ms: u64,
    pub seed: Option<u64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "server1".to_string(),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            admit_threshold: 20.0,
            recovery_threshold: 70.0,
            cpu_increment: Span::new(8.0, 12.0),
            mem_increment: Span::new(6.0, 10.0),
            cpu_decay: Span::new(3.0, 6.0),
            mem_decay: Span::new(2.0, 5.0),
            processing_ms: Span::new(10_000, 15_000),
            drain_interval_ms: 1_000,
            seed: None,
        }
    }
}

impl WorkerConfig {
    pub fn admission_settings(&self) -> AdmissionSettings {
        AdmissionSettings {
            admit_threshold: self.admit_threshold,
            recovery_threshold: self.recovery_threshold,
            cpu_increment: self.cpu_increment,
            mem_increment: self.mem_increment,
            cpu_decay: self.cpu_decay,
            mem_decay: self.mem_decay,
            processing: Span::new(
                Duration::from_millis(self.processing_ms.min),
                Duration::from_millis(self.processing_ms.max),
            ),
        }
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "worker.name must not be empty".to_string(),
            ));
        }
        if self.drain_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "worker.drain_interval_ms must be positive".to_string(),
            ));
        }
        let in_percent = |v: f64| (0.0..=100.0).contains(&v);
        if !in_percent(self.admit_threshold) || !in_percent(self.recovery_threshold) {
            return Err(ConfigError::Validation(
                "worker thresholds must lie in [0, 100]".to_string(),
            ));
        }
        let spans = [
            ("worker.cpu_increment", &self.cpu_increment),
            ("worker.mem_increment", &self.mem_increment),
            ("worker.cpu_decay", &self.cpu_decay),
            ("worker.mem_decay", &self.mem_decay),
        ];
        for (field, span) in spans {
            if !span.min.is_finite() || !span.max.is_finite() {
                return Err(ConfigError::Validation(format!("{field} must be finite")));
            }
            if span.min < 0.0 {
                return Err(ConfigError::Validation(format!("{field} must be >= 0")));
            }
            span.check(field)?;
        }
        self.processing_ms.check("worker.processing_ms")
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub balancer: BalancerConfig,
    pub worker: WorkerConfig,
    pub workers: Vec<WorkerEndpoint>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            balancer: BalancerConfig::default(),
            worker: WorkerConfig::default(),
            workers: vec![
                WorkerEndpoint::from_base("server1", "http://localhost:5000"),
                WorkerEndpoint::from_base("server2", "http://localhost:5001"),
                WorkerEndpoint::from_base("server3", "http://localhost:5002"),
            ],
        }
    }
}

impl Config {
    /// Checks semantic constraints the schema cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.balancer.validate()?;
        self.worker.validate()?;

        let mut seen = HashSet::new();
        for worker in &self.workers {
            if worker.name.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "workers[].name must not be empty".to_string(),
                ));
            }
            if !seen.insert(worker.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate worker name '{}'",
                    worker.name
                )));
            }
        }
        Ok(())
    }

    /// Applies `ADAPTIVE_LB_WORKER_NAME` / `ADAPTIVE_LB_LISTEN` overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(
            std::env::var(WORKER_NAME_ENV).ok(),
            std::env::var(WORKER_LISTEN_ENV).ok(),
        )
    }

    fn apply_overrides(
        &mut self,
        name: Option<String>,
        listen: Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(name) = name {
            self.worker.name = name;
        }
        if let Some(listen) = listen {
            self.worker.listen_addr = listen.parse().map_err(|e| {
                ConfigError::Validation(format!("{WORKER_LISTEN_ENV}='{listen}': {e}"))
            })?;
        }
        Ok(())
    }
}

/// Loads configuration from TOML text and validates it.
pub fn load_from_str(content: &str, source_name: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content).map_err(|e| ConfigError::Parse {
        file: source_name.to_string(),
        source: e,
    })?;
    config.validate()?;
    Ok(config)
}

/// Loads configuration from a file.
pub fn load_from_file(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        file: path.display().to_string(),
        source: e,
    })?;
    load_from_str(&content, &path.display().to_string())
}

/// Resolves the config for this process.
///
/// An explicit path must exist. Without one, [`DEFAULT_CONFIG_PATH`] is used
/// if present, otherwise built-in defaults.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(path) => load_from_file(path)?,
        None => {
            let default_path = PathBuf::from(DEFAULT_CONFIG_PATH);
            if default_path.exists() {
                load_from_file(&default_path)?
            } else {
                Config::default()
            }
        }
    };
    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}
