//! ---
//! adit_section: "01-core-functionality"
//! adit_subsection: "module"
//! adit_type: "source"
//! adit_scope: "code"
//! adit_description: "Shared primitives and utilities for the bridge runtime."
//! adit_version: "v0.0.0-prealpha"
//! adit_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;
use uuid::Uuid;

use crate::logging::LogFormat;

fn default_manager_poll() -> Duration {
    Duration::from_millis(5000)
}

fn default_instance_status_poll() -> Duration {
    Duration::from_millis(1000)
}

fn default_heartbeat() -> Duration {
    Duration::from_millis(30_000)
}

fn default_http_manager_timeout() -> Duration {
    Duration::from_millis(2000)
}

fn default_http_instance_timeout() -> Duration {
    Duration::from_millis(2000)
}

fn default_transport_connect_timeout() -> Duration {
    Duration::from_millis(5000)
}

fn default_pong_timeout() -> Duration {
    Duration::from_millis(10_000)
}

fn default_reconnect_delay() -> Duration {
    Duration::from_millis(3000)
}

fn default_definition_cache() -> String {
    "{}".to_owned()
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

/// Primary configuration object for the bridge runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Hostname or address of the AdIT Manager.
    pub manager_host: String,
    /// REST port of the AdIT Manager.
    pub manager_port: u16,
    /// Channel this bridge operates on. `None` means no channel selected.
    #[serde(default)]
    pub channel_id: Option<String>,
    /// GUID identifying this console to Instances; used as the control
    /// transport URL path segment. Generated on first start when absent,
    /// then persisted by the host.
    #[serde(default)]
    pub control_interface_id: Option<Uuid>,
    /// Raises the default log filter from `info` to `debug`.
    #[serde(default)]
    pub verbose: bool,
    /// Opaque persisted definition cache blob (see adit-bridge-cache).
    #[serde(default = "default_definition_cache")]
    pub definition_cache: String,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where a [`BridgeConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedBridgeConfig {
    pub config: BridgeConfig,
    pub source: PathBuf,
}

impl BridgeConfig {
    pub const ENV_CONFIG_PATH: &'static str = "ADIT_BRIDGE_CONFIG";

    /// Load configuration from disk, respecting the `ADIT_BRIDGE_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedBridgeConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedBridgeConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedBridgeConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<BridgeConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// The Manager endpoint in `host:port` form, as used for cache binding.
    pub fn manager_endpoint(&self) -> String {
        format!("{}:{}", self.manager_host, self.manager_port)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.manager_host.trim().is_empty() {
            return Err(anyhow!("manager_host must be set"));
        }
        if self.manager_port == 0 {
            return Err(anyhow!("manager_port must be non-zero"));
        }
        if let Some(channel) = &self.channel_id {
            if channel.trim().is_empty() {
                return Err(anyhow!("channel_id must not be empty when present"));
            }
        }
        self.timing.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for BridgeConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: BridgeConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Periods and deadlines for every cycle and network operation the engine
/// performs. All values are given in milliseconds in the configuration file.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_manager_poll")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub manager_poll: Duration,
    #[serde(default = "default_instance_status_poll")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub instance_status_poll: Duration,
    #[serde(default = "default_heartbeat")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub heartbeat: Duration,
    #[serde(default = "default_http_manager_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub http_manager_timeout: Duration,
    #[serde(default = "default_http_instance_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub http_instance_timeout: Duration,
    #[serde(default = "default_transport_connect_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub transport_connect_timeout: Duration,
    #[serde(default = "default_pong_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub pong_timeout: Duration,
    #[serde(default = "default_reconnect_delay")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub reconnect_delay: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            manager_poll: default_manager_poll(),
            instance_status_poll: default_instance_status_poll(),
            heartbeat: default_heartbeat(),
            http_manager_timeout: default_http_manager_timeout(),
            http_instance_timeout: default_http_instance_timeout(),
            transport_connect_timeout: default_transport_connect_timeout(),
            pong_timeout: default_pong_timeout(),
            reconnect_delay: default_reconnect_delay(),
        }
    }
}

impl TimingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.manager_poll.is_zero()
            || self.instance_status_poll.is_zero()
            || self.heartbeat.is_zero()
        {
            return Err(anyhow!("poll periods must be non-zero"));
        }
        if self.pong_timeout >= self.heartbeat {
            return Err(anyhow!("pong_timeout must be shorter than the heartbeat period"));
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
