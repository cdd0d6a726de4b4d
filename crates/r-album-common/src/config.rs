//! ---
//! album_section: "01-core-functionality"
//! album_subsection: "module"
//! album_type: "source"
//! album_scope: "code"
//! album_description: "Shared primitives and utilities for the core runtime."
//! album_version: "v0.0.0-prealpha"
//! album_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_initial_retry_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_retry_multiplier() -> f64 {
    1.25
}

fn default_max_retries() -> u32 {
    10
}

fn default_reply_budget() -> Duration {
    Duration::from_secs(180)
}

fn default_idle_after() -> Duration {
    Duration::from_secs(10)
}

fn default_long_lock_warning() -> Duration {
    Duration::from_millis(1000)
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5500))
}

fn default_ws_path() -> String {
    "/cmd".to_owned()
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_path() -> String {
    "/metrics".to_owned()
}

/// Primary configuration object for the R-Album RPC runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    /// `None` when no file was found and defaults are in effect.
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "R_ALBUM_CONFIG";

    /// Load configuration from disk, respecting the `R_ALBUM_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    ///
    /// The environment override wins over every candidate and must point at a
    /// readable file. Candidates are inspected in order; the first one that
    /// exists is used. Defaults apply when none exists.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            let path = candidate.as_ref();
            if path.exists() {
                let config = Self::from_path(path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path.to_path_buf()),
                });
            }
        }

        debug!(
            inspected = %candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            "no configuration file found, using defaults"
        );
        Ok(LoadedAppConfig {
            config: AppConfig::default(),
            source: None,
        })
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.transport.validate()?;
        self.server.validate()?;
        self.metrics.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Retry, correlation and reply-wait settings for every adaptor.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportConfig {
    #[serde(default = "default_initial_retry_delay", rename = "initial_retry_delay_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub initial_retry_delay: Duration,
    #[serde(default = "default_retry_multiplier")]
    pub retry_multiplier: f64,
    /// Readiness checks made before a send is abandoned.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_reply_budget", rename = "reply_budget_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub reply_budget: Duration,
    /// Expire tracked calls once `reply_budget` elapses. Off by default.
    #[serde(default)]
    pub expire_pending: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            initial_retry_delay: default_initial_retry_delay(),
            retry_multiplier: default_retry_multiplier(),
            max_retries: default_max_retries(),
            reply_budget: default_reply_budget(),
            expire_pending: false,
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.retry_multiplier.is_finite() || self.retry_multiplier < 1.0 {
            return Err(anyhow!(
                "transport.retry_multiplier must be >= 1.0, got {}",
                self.retry_multiplier
            ));
        }
        if self.max_retries == 0 {
            return Err(anyhow!("transport.max_retries must be at least 1"));
        }
        Ok(())
    }
}

/// Dispatcher collaborator tuning.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchConfig {
    #[serde(default = "default_idle_after", rename = "idle_after_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub idle_after: Duration,
    /// Locks held longer than this are reported by the monitor.
    #[serde(default = "default_long_lock_warning", rename = "long_lock_warning_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub long_lock_warning: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            idle_after: default_idle_after(),
            long_lock_warning: default_long_lock_warning(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            ws_path: default_ws_path(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.ws_path.starts_with('/') {
            return Err(anyhow!(
                "server.ws_path must start with '/', got '{}'",
                self.ws_path
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            path: default_metrics_path(),
        }
    }
}

impl MetricsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.enabled && !self.path.starts_with('/') {
            return Err(anyhow!(
                "metrics.path must start with '/', got '{}'",
                self.path
            ));
        }
        Ok(())
    }
}
