//! Orchestrator configuration.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Path segment under which the data directory is served.
pub const WORKER_DATA_ROUTE: &str = "worker-data/";

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root of locally materialized artifacts
    pub data_dir: PathBuf,
    /// Base URL workers use to reach this host, with trailing slash
    pub public_base_url: String,
    /// Pause before restarting a failed consumer loop
    pub consumer_backoff: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Timeout for a single artifact download
    pub download_timeout: Duration,
    /// Prometheus listener address, disabled when unset
    pub metrics_addr: Option<SocketAddr>,
    /// Stable consumer name, so pending deliveries survive a restart
    pub consumer_name: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            public_base_url: "http://host.docker.internal:5000/".to_string(),
            consumer_backoff: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(300),
            metrics_addr: None,
            consumer_name: "orchestrator".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            data_dir: std::env::var("PIPELINE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data")),
            public_base_url: normalize_base_url(
                std::env::var("PIPELINE_PUBLIC_BASE_URL")
                    .unwrap_or_else(|_| "http://host.docker.internal:5000/".to_string()),
            ),
            consumer_backoff: Duration::from_secs(
                std::env::var("PIPELINE_CONSUMER_BACKOFF_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
            shutdown_timeout: Duration::from_secs(
                std::env::var("PIPELINE_SHUTDOWN_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            download_timeout: Duration::from_secs(
                std::env::var("PIPELINE_DOWNLOAD_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            metrics_addr: std::env::var("METRICS_ADDR")
                .ok()
                .and_then(|s| s.parse().ok()),
            consumer_name: std::env::var("PIPELINE_CONSUMER_NAME")
                .unwrap_or_else(|_| "orchestrator".to_string()),
        }
    }

    /// Absolute-or-cwd-relative location of a data-relative path.
    pub fn local_path(&self, relative: &Path) -> PathBuf {
        self.data_dir.join(relative)
    }

    /// URL under which a data-relative path is served to workers.
    pub fn public_url(&self, relative: &Path) -> String {
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}{}{}", self.public_base_url, WORKER_DATA_ROUTE, relative)
    }
}

fn normalize_base_url(mut url: String) -> String {
    if !url.ends_with('/') {
        url.push('/');
    }
    url
}
