//! AdIT Bridge daemon
//!
//! Standalone runner for the bridge engine: loads the TOML configuration,
//! initialises tracing, persists engine state (control interface id,
//! definition cache, channel-name hint) to a JSON file beside the
//! configuration, and runs until SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::signal;
use tracing::{debug, info, warn};
use uuid::Uuid;

use adit_bridge_common::config::BridgeConfig;
use adit_bridge_common::logging::init_tracing;
use adit_bridge_core::{
    new_registry, BridgeMetrics, ConsoleHost, ConsoleState, DefinitionSet, Orchestrator,
};

/// Engine state the daemon persists across restarts on behalf of the engine.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct PersistedState {
    #[serde(default)]
    control_interface_id: Option<Uuid>,
    #[serde(default)]
    definition_cache: Option<String>,
    #[serde(default)]
    channel_name: Option<String>,
}

/// File-backed [`ConsoleHost`]: persists what the engine asks it to and
/// logs everything else.
struct FileStateHost {
    path: PathBuf,
    state: Mutex<PersistedState>,
}

impl FileStateHost {
    fn load(path: PathBuf) -> Result<Self> {
        let state = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!(path = %path.display(), error = %err, "state file undecodable; starting fresh");
                PersistedState::default()
            }),
            Err(_) => PersistedState::default(),
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    fn control_interface_id(&self) -> Option<Uuid> {
        self.state.lock().control_interface_id
    }

    fn definition_cache(&self) -> Option<String> {
        self.state.lock().definition_cache.clone()
    }

    fn write(&self) {
        let state = self.state.lock().clone();
        let encoded = match serde_json::to_string_pretty(&state) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(error = %err, "failed to encode daemon state");
                return;
            }
        };
        if let Err(err) = std::fs::write(&self.path, encoded) {
            warn!(path = %self.path.display(), error = %err, "failed to write daemon state");
        }
    }
}

impl ConsoleHost for FileStateHost {
    fn status_changed(&self, state: &ConsoleState) {
        info!(status = %state.status, message = %state.message, "bridge status");
    }

    fn definitions_changed(&self, definitions: &DefinitionSet) {
        info!(
            channels = definitions.channels.len(),
            variables = definitions.variables.len(),
            rules = definitions.rules.len(),
            "definition set rebound"
        );
    }

    fn publish_variables(&self, values: &[(String, String)]) {
        debug!(count = values.len(), "engine variables published");
    }

    fn variable_update(&self, variable_id: &str, value: &str) {
        info!(variable = %variable_id, value = %value, "variable update from primary");
    }

    fn persist_definition_cache(&self, encoded: &str) {
        self.state.lock().definition_cache = Some(encoded.to_owned());
        self.write();
    }

    fn persist_channel_name(&self, name: &str) {
        self.state.lock().channel_name = Some(name.to_owned());
        self.write();
    }

    fn persist_control_interface_id(&self, id: Uuid) {
        self.state.lock().control_interface_id = Some(id);
        self.write();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let candidates = match std::env::args().nth(1) {
        Some(path) => vec![PathBuf::from(path)],
        None => vec![
            PathBuf::from("adit-bridge.toml"),
            PathBuf::from("configs/adit-bridge.toml"),
        ],
    };
    let loaded = BridgeConfig::load_with_source(&candidates)
        .context("unable to load bridge configuration")?;
    let mut config = loaded.config;

    init_tracing("bridged", &config.logging, config.verbose)?;
    info!(source = %loaded.source.display(), "configuration loaded");

    let host = Arc::new(FileStateHost::load(loaded.source.with_extension("state.json"))?);

    // Identity and cache persisted by a previous run take effect unless the
    // configuration pins its own values.
    if config.control_interface_id.is_none() {
        config.control_interface_id = host.control_interface_id();
    }
    if config.definition_cache == "{}" {
        if let Some(cache) = host.definition_cache() {
            config.definition_cache = cache;
        }
    }

    let metrics = BridgeMetrics::new(new_registry())?;
    let handle = Orchestrator::new(config, host)
        .with_metrics(metrics)
        .start()
        .await?;

    shutdown_signal().await;
    info!("shutdown signal received");
    handle.shutdown().await?;
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        tokio::select! {
            _ = ctrl_c() => {},
            _ = terminate() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c().await;
    }
}

async fn ctrl_c() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(?err, "failed to install Ctrl+C handler");
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            term.recv().await;
        }
        Err(err) => warn!(?err, "failed to install SIGTERM handler"),
    }
}

#[cfg(not(unix))]
async fn terminate() {}
