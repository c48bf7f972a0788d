//! ---
//! adit_section: "01-core-functionality"
//! adit_subsection: "module"
//! adit_type: "source"
//! adit_scope: "code"
//! adit_description: "Primary orchestration and lifecycle management."
//! adit_version: "v0.0.0-prealpha"
//! adit_owner: "tbd"
//! ---
//! The orchestration engine.
//!
//! One engine task owns the registry, the selector, and every fingerprint.
//! The three periodic cycles, the supervisor event stream, and the command
//! mailbox are serialized through a single `select!` loop, so there is no
//! shared mutable state anywhere in the bridge. Supervisors talk back only
//! through their event channel.

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use adit_bridge_cache::{DefinitionBlobs, DefinitionCache, SaveOutcome};
use adit_bridge_common::config::{BridgeConfig, TimingConfig};
use adit_bridge_net::{fetch_instance_status, InstanceDescriptor, ManagerClient, NetError};

use crate::frames::{self, InboundFrame};
use crate::host::{ConsoleHost, DefinitionSet};
use crate::metrics::BridgeMetrics;
use crate::registry::{ConnState, InstanceRegistry};
use crate::selector::PrimarySelector;
use crate::status::{ConsoleState, ConsoleStatus, StatusIssues, StatusTracker};
use crate::supervisor::{
    self, SupervisorEvent, SupervisorEventKind, SupervisorSpawn, SupervisorTiming,
};

/// Commands accepted by a running engine.
#[derive(Debug, Clone)]
pub enum OrchestratorCommand {
    /// Broadcast a variable assignment to every Connected Instance.
    SetVariable { id: String, value: String },
    /// Broadcast a manual rule evaluation to every Connected Instance.
    EvaluateRule { id: String },
    /// Stop the engine. Repeats are no-ops.
    Stop,
}

/// Stable copy of one Instance's state for external readers.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceSnapshot {
    pub id: String,
    pub name: String,
    pub description: String,
    pub ip_address: String,
    pub api_port: u16,
    pub control_port: u16,
    pub conn_state: ConnState,
    pub connected: bool,
    pub reported_primary: Option<bool>,
    pub last_status_code: Option<i64>,
    pub status_poll_failures: u32,
}

/// Stable copy of the engine state, published on every meaningful change.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineSnapshot {
    /// `None` until the first Manager poll completes.
    pub manager_reachable: Option<bool>,
    pub channel_id: Option<String>,
    pub channel_name: Option<String>,
    /// Whether this session cold-started from the definition cache.
    pub loaded_from_cache: bool,
    /// Instances in Manager order.
    pub instances: Vec<InstanceSnapshot>,
    pub effective_primary: Option<String>,
    pub console: Option<ConsoleState>,
}

/// Engine entrypoint: configuration plus the injected host capability.
pub struct Orchestrator {
    config: BridgeConfig,
    host: Arc<dyn ConsoleHost>,
    metrics: Option<BridgeMetrics>,
}

impl Orchestrator {
    pub fn new(config: BridgeConfig, host: Arc<dyn ConsoleHost>) -> Self {
        Self {
            config,
            host,
            metrics: None,
        }
    }

    /// Attach engine metrics.
    pub fn with_metrics(mut self, metrics: BridgeMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validate configuration, spawn the engine task, and hand back the
    /// lifecycle handle. With invalid configuration the engine stays
    /// stopped and the host sees `badConfig`.
    pub async fn start(self) -> Result<OrchestratorHandle> {
        if let Err(err) = self.config.validate() {
            self.host.status_changed(&ConsoleState {
                status: ConsoleStatus::BadConfig,
                message: err.to_string(),
            });
            return Err(err);
        }

        let control_interface_id = match self.config.control_interface_id {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4();
                info!(control_interface_id = %id, "generated control interface id");
                self.host.persist_control_interface_id(id);
                id
            }
        };

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(EngineSnapshot::default());

        let http = reqwest::Client::new();
        let manager = ManagerClient::new(http.clone(), &self.config.manager_endpoint());
        let cache = DefinitionCache::open(
            &self.config.manager_endpoint(),
            self.config.channel_id.as_deref().unwrap_or(""),
            &self.config.definition_cache,
        );

        let engine = Engine {
            timing: self.config.timing.clone(),
            channel_id: self.config.channel_id.clone(),
            control_interface_id,
            host: self.host,
            metrics: self.metrics,
            http,
            manager,
            registry: InstanceRegistry::new(),
            selector: PrimarySelector::new(),
            cache,
            definitions: DefinitionSet::default(),
            rules_fingerprint: None,
            variables_fingerprint: None,
            applied_channel: None,
            manager_reachable: None,
            ever_fetched_definitions: false,
            cache_loaded_this_session: false,
            channel_name: None,
            next_generation: 0,
            event_tx,
            snapshot_tx,
            status: StatusTracker::default(),
        };
        let task = tokio::spawn(engine.run(command_rx, event_rx));

        Ok(OrchestratorHandle {
            commands: command_tx,
            snapshot: snapshot_rx,
            task,
        })
    }
}

/// Lifecycle handle held by the hosting console.
#[derive(Debug)]
pub struct OrchestratorHandle {
    commands: mpsc::UnboundedSender<OrchestratorCommand>,
    snapshot: watch::Receiver<EngineSnapshot>,
    task: JoinHandle<()>,
}

impl OrchestratorHandle {
    /// Broadcast a variable assignment. Dropped silently when no Instance
    /// is connected.
    pub fn set_variable(&self, id: impl Into<String>, value: impl Into<String>) {
        let _ = self.commands.send(OrchestratorCommand::SetVariable {
            id: id.into(),
            value: value.into(),
        });
    }

    /// Broadcast a manual rule evaluation.
    pub fn evaluate_rule(&self, id: impl Into<String>) {
        let _ = self.commands.send(OrchestratorCommand::EvaluateRule { id: id.into() });
    }

    /// Signal the engine to stop. A no-op once it has stopped.
    pub fn stop(&self) {
        let _ = self.commands.send(OrchestratorCommand::Stop);
    }

    /// Stop the engine and wait for teardown to finish.
    pub async fn shutdown(self) -> Result<()> {
        self.stop();
        self.task.await.map_err(anyhow::Error::new)
    }

    /// Stable copy of the current engine state.
    pub fn snapshot(&self) -> EngineSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Watch endpoint for engine state changes.
    pub fn watch(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshot.clone()
    }
}

struct Engine {
    timing: TimingConfig,
    channel_id: Option<String>,
    control_interface_id: Uuid,
    host: Arc<dyn ConsoleHost>,
    metrics: Option<BridgeMetrics>,
    http: reqwest::Client,
    manager: ManagerClient,
    registry: InstanceRegistry,
    selector: PrimarySelector,
    cache: DefinitionCache,
    definitions: DefinitionSet,
    rules_fingerprint: Option<String>,
    variables_fingerprint: Option<String>,
    applied_channel: Option<String>,
    manager_reachable: Option<bool>,
    ever_fetched_definitions: bool,
    cache_loaded_this_session: bool,
    channel_name: Option<String>,
    next_generation: u64,
    event_tx: mpsc::UnboundedSender<SupervisorEvent>,
    snapshot_tx: watch::Sender<EngineSnapshot>,
    status: StatusTracker,
}

impl Engine {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<OrchestratorCommand>,
        mut events: mpsc::UnboundedReceiver<SupervisorEvent>,
    ) {
        if self.cache.discarded_on_open() {
            self.host.persist_definition_cache(&self.cache.encoded());
        }
        if let Some(state) = self.status.transition(ConsoleState {
            status: ConsoleStatus::Connecting,
            message: "Engine starting".to_owned(),
        }) {
            self.host.status_changed(&state);
        }
        self.publish_snapshot();

        let mut manager_poll = tokio::time::interval(self.timing.manager_poll);
        manager_poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut status_poll = tokio::time::interval(self.timing.instance_status_poll);
        status_poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat = tokio::time::interval(self.timing.heartbeat);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = manager_poll.tick() => self.manager_poll().await,
                _ = status_poll.tick() => self.status_poll().await,
                _ = heartbeat.tick() => self.registry.ping_connected(),
                command = commands.recv() => match command {
                    Some(OrchestratorCommand::SetVariable { id, value }) => {
                        self.broadcast(&frames::set_variable_request(&id, &value));
                    }
                    Some(OrchestratorCommand::EvaluateRule { id }) => {
                        self.broadcast(&frames::evaluate_rule_request(&id));
                    }
                    Some(OrchestratorCommand::Stop) | None => break,
                },
                Some(event) = events.recv() => self.on_supervisor_event(event),
            }
        }

        self.shutdown().await;
    }

    /// Manager poll cycle: channels unconditionally, then the per-channel
    /// definition set all-or-nothing.
    async fn manager_poll(&mut self) {
        let timeout = self.timing.http_manager_timeout;
        match self.manager.fetch_channels(timeout).await {
            Ok(channels) => {
                self.note_manager_reachable();
                self.definitions.channels = channels;

                let Some(channel_id) = self.channel_id.clone() else {
                    self.refresh_status();
                    return;
                };
                self.fetch_channel_definitions(&channel_id).await;
                self.refresh_status();
            }
            Err(err) => {
                self.note_manager_unreachable(&err);
                if self.channel_id.is_some()
                    && !self.ever_fetched_definitions
                    && self.registry.is_empty()
                    && !self.cache_loaded_this_session
                {
                    self.cold_start_from_cache();
                }
                self.refresh_status();
            }
        }
    }

    async fn fetch_channel_definitions(&mut self, channel_id: &str) {
        let timeout = self.timing.http_manager_timeout;
        let (rules, variables, instances) = tokio::join!(
            self.manager.fetch_rules(channel_id, timeout),
            self.manager.fetch_variables(channel_id, timeout),
            self.manager.fetch_instances(channel_id, timeout),
        );
        let (rules, variables, instances) = match (rules, variables, instances) {
            (Ok(rules), Ok(variables), Ok(instances)) => (rules, variables, instances),
            (rules, variables, instances) => {
                warn!(
                    rules_ok = rules.is_ok(),
                    variables_ok = variables.is_ok(),
                    instances_ok = instances.is_ok(),
                    "definition fetch incomplete; keeping previous state"
                );
                return;
            }
        };

        let channel_name = self
            .definitions
            .channels
            .iter()
            .find(|channel| channel.id == channel_id)
            .map(|channel| channel.name.clone());
        if let Some(name) = &channel_name {
            if self.channel_name.as_deref() != Some(name) {
                self.channel_name = Some(name.clone());
                self.host.persist_channel_name(name);
            }
        }

        let rules_fingerprint = fingerprint(&rules);
        let variables_fingerprint = fingerprint(&variables);
        let changed = self.rules_fingerprint.as_deref() != Some(rules_fingerprint.as_str())
            || self.variables_fingerprint.as_deref() != Some(variables_fingerprint.as_str())
            || self.applied_channel.as_deref() != Some(channel_id);

        self.definitions.rules = rules;
        self.definitions.variables = variables;
        if changed {
            info!(
                channel = %channel_id,
                rules = self.definitions.rules.len(),
                variables = self.definitions.variables.len(),
                "definitions changed; rebinding host registries"
            );
            self.host.definitions_changed(&self.definitions);
            self.rules_fingerprint = Some(rules_fingerprint.clone());
            self.variables_fingerprint = Some(variables_fingerprint.clone());
            self.applied_channel = Some(channel_id.to_owned());
        }
        self.ever_fetched_definitions = true;

        self.apply_instances(&instances);

        let blobs = DefinitionBlobs {
            instances: fingerprint(&instances),
            variables: variables_fingerprint,
            rules: rules_fingerprint,
        };
        match self
            .cache
            .save(&blobs, channel_name.as_deref().unwrap_or(""))
        {
            Ok(SaveOutcome::Written(encoded)) => {
                debug!("definition cache updated");
                self.host.persist_definition_cache(&encoded);
            }
            Ok(SaveOutcome::Unchanged) => {}
            Err(err) => debug!(error = %err, "failed to encode definition cache"),
        }
    }

    /// Hydrate registry and definitions from the persisted cache while the
    /// Manager is down. Runs at most once per session.
    fn cold_start_from_cache(&mut self) {
        let Some(record) = self.cache.load().cloned() else {
            return;
        };

        let instances: Vec<InstanceDescriptor> = match serde_json::from_str(&record.instances) {
            Ok(instances) => instances,
            Err(err) => {
                debug!(error = %err, "cached instance blob undecodable; clearing cache");
                self.cache.clear();
                self.host.persist_definition_cache(&self.cache.encoded());
                return;
            }
        };
        let variables = match serde_json::from_str(&record.variables) {
            Ok(variables) => variables,
            Err(err) => {
                debug!(error = %err, "cached variable blob undecodable; clearing cache");
                self.cache.clear();
                self.host.persist_definition_cache(&self.cache.encoded());
                return;
            }
        };
        let rules = match serde_json::from_str(&record.rules) {
            Ok(rules) => rules,
            Err(err) => {
                debug!(error = %err, "cached rule blob undecodable; clearing cache");
                self.cache.clear();
                self.host.persist_definition_cache(&self.cache.encoded());
                return;
            }
        };

        info!(
            channel = %record.channel_name,
            "using cached definitions for '{}' (cached {})",
            record.channel_name,
            record.age()
        );

        self.definitions.variables = variables;
        self.definitions.rules = rules;
        self.host.definitions_changed(&self.definitions);
        self.rules_fingerprint = Some(record.rules.clone());
        self.variables_fingerprint = Some(record.variables.clone());
        self.applied_channel = Some(record.channel_id.clone());
        self.channel_name = Some(record.channel_name.clone());
        self.cache_loaded_this_session = true;
        if let Some(metrics) = &self.metrics {
            metrics.record_cache_load();
        }

        self.apply_instances(&instances);
    }

    fn apply_instances(&mut self, instances: &[InstanceDescriptor]) {
        let event_tx = self.event_tx.clone();
        let control_interface_id = self.control_interface_id;
        let timing = SupervisorTiming {
            connect_timeout: self.timing.transport_connect_timeout,
            pong_timeout: self.timing.pong_timeout,
            reconnect_delay: self.timing.reconnect_delay,
        };
        let mut next_generation = self.next_generation;

        let outcome = self.registry.sync_against(instances, &mut |descriptor| {
            next_generation += 1;
            supervisor::spawn(
                SupervisorSpawn {
                    instance_id: descriptor.id.clone(),
                    instance_name: descriptor.name.clone(),
                    host: descriptor.ip_address.clone(),
                    control_port: descriptor.control_port,
                    control_interface_id,
                    generation: next_generation,
                    timing: timing.clone(),
                },
                event_tx.clone(),
            )
        });
        self.next_generation = next_generation;

        if outcome.changed() {
            self.run_selector();
            self.publish_instance_variables();
        }
    }

    /// Instance status poll cycle: every registered Instance concurrently,
    /// then one selector run over the refreshed snapshot.
    async fn status_poll(&mut self) {
        if !self.registry.is_empty() {
            let timeout = self.timing.http_instance_timeout;
            let targets: Vec<(String, String, u16)> = self
                .registry
                .iter()
                .map(|record| {
                    (
                        record.descriptor.id.clone(),
                        record.descriptor.ip_address.clone(),
                        record.descriptor.api_port,
                    )
                })
                .collect();
            let polls = targets.into_iter().map(|(id, host, api_port)| {
                let http = self.http.clone();
                async move {
                    let result = fetch_instance_status(&http, &host, api_port, timeout).await;
                    (id, result)
                }
            });
            for (id, result) in futures_util::future::join_all(polls).await {
                let Some(record) = self.registry.get_mut(&id) else {
                    continue;
                };
                match result {
                    Ok(status) => {
                        if record.status_poll_failures > 0 {
                            info!(
                                instance = %id,
                                failures = record.status_poll_failures,
                                "instance status poll recovered"
                            );
                            record.status_poll_failures = 0;
                        }
                        record.last_status_code = Some(status.status_code);
                        record.reported_primary = Some(status.primary);
                    }
                    Err(err) => {
                        record.status_poll_failures += 1;
                        debug!(instance = %id, error = %err, "instance status poll failed");
                    }
                }
            }
        }

        self.run_selector();
        self.publish_instance_variables();
        self.refresh_status();
    }

    fn run_selector(&mut self) {
        let candidates = self.registry.candidates();
        if let Some(transition) = self.selector.evaluate(&candidates) {
            info!(
                previous = ?transition.previous,
                current = ?transition.current,
                "effective primary changed"
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_failover();
                metrics.set_primary(transition.current.instance_id());
            }
        }
    }

    fn on_supervisor_event(&mut self, event: SupervisorEvent) {
        {
            let Some(record) = self.registry.get(&event.instance_id) else {
                debug!(instance = %event.instance_id, "event from unregistered instance dropped");
                return;
            };
            if record.generation != event.generation {
                debug!(instance = %event.instance_id, "stale supervisor event dropped");
                return;
            }
        }

        match event.kind {
            SupervisorEventKind::Connecting => {
                if let Some(record) = self.registry.get_mut(&event.instance_id) {
                    record.conn_state = ConnState::Connecting;
                    record.healthy = false;
                }
                self.publish_snapshot();
            }
            SupervisorEventKind::Connected { reconnected } => {
                if let Some(record) = self.registry.get_mut(&event.instance_id) {
                    record.conn_state = ConnState::Connected;
                    record.healthy = true;
                }
                if reconnected {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_reconnect(&event.instance_id);
                    }
                }
                self.run_selector();
                self.publish_instance_variables();
                self.refresh_status();
            }
            SupervisorEventKind::Disconnected => {
                if let Some(record) = self.registry.get_mut(&event.instance_id) {
                    record.conn_state = ConnState::Disconnected;
                    record.healthy = false;
                }
                self.run_selector();
                self.publish_instance_variables();
                self.refresh_status();
            }
            SupervisorEventKind::Frame(payload) => self.on_frame(&event.instance_id, &payload),
        }
    }

    /// Inbound frame dispatch, gated by primary identity at delivery time.
    fn on_frame(&mut self, instance_id: &str, payload: &str) {
        match frames::parse_inbound(payload) {
            Ok(InboundFrame::Variable { id, value }) => {
                if self.selector.current().instance_id() == Some(instance_id) {
                    self.host.variable_update(&id, &value);
                } else {
                    debug!(
                        instance = %instance_id,
                        variable = %id,
                        "variable update from non-primary dropped"
                    );
                }
            }
            Ok(InboundFrame::Unhandled { element }) => {
                debug!(instance = %instance_id, element = %element, "unhandled control frame");
            }
            Err(err) => {
                debug!(instance = %instance_id, error = %err, "undecodable control frame dropped");
            }
        }
    }

    fn broadcast(&self, frame: &str) {
        let sent = self.registry.broadcast(frame);
        debug!(recipients = sent, "control frame broadcast");
    }

    fn note_manager_reachable(&mut self) {
        if self.manager_reachable != Some(true) {
            info!("manager reachable");
            self.manager_reachable = Some(true);
        }
    }

    fn note_manager_unreachable(&mut self, err: &NetError) {
        if self.manager_reachable != Some(false) {
            warn!(
                error = %err,
                "Manager unreachable, maintaining {} existing connections",
                self.registry.connected_count()
            );
            self.manager_reachable = Some(false);
        } else {
            debug!(error = %err, "manager still unreachable");
        }
    }

    fn refresh_status(&mut self) {
        let issues = StatusIssues {
            manager_unreachable: self.manager_reachable == Some(false),
            no_channel_selected: self.channel_id.is_none(),
            no_instances_registered: self.registry.is_empty(),
            no_instances_connected: self.registry.connected_count() == 0,
            no_primary_elected: self.selector.current().instance_id().is_none(),
        };
        let primary = self
            .selector
            .current()
            .instance_id()
            .and_then(|id| self.registry.get(id))
            .map(|record| {
                (
                    record.descriptor.name.clone(),
                    record.descriptor.id.clone(),
                )
            });
        let state = ConsoleState::derive(
            &issues,
            primary
                .as_ref()
                .map(|(name, id)| (name.as_str(), id.as_str())),
        );
        if let Some(state) = self.status.transition(state) {
            self.host.status_changed(&state);
        }
        self.publish_snapshot();
    }

    /// Engine-state variables for the host, in Manager order indexed from 1.
    fn publish_instance_variables(&self) {
        let primary_id = self.selector.current().instance_id();
        let primary_name = primary_id
            .and_then(|id| self.registry.get(id))
            .map(|record| record.descriptor.name.clone())
            .unwrap_or_default();

        let mut values = vec![
            (
                "primary_instance_id".to_owned(),
                primary_id.unwrap_or_default().to_owned(),
            ),
            ("primary_instance_name".to_owned(), primary_name),
            (
                "instances_connected".to_owned(),
                self.registry.connected_count().to_string(),
            ),
            (
                "instances_registered".to_owned(),
                self.registry.len().to_string(),
            ),
        ];
        for (index, record) in self.registry.iter().enumerate() {
            let n = index + 1;
            values.push((format!("instance_{n}_id"), record.descriptor.id.clone()));
            values.push((format!("instance_{n}_name"), record.descriptor.name.clone()));
            values.push((
                format!("instance_{n}_description"),
                record.descriptor.description.clone(),
            ));
            values.push((
                format!("instance_{n}_ip_address"),
                record.descriptor.ip_address.clone(),
            ));
            values.push((
                format!("instance_{n}_port_number"),
                record.descriptor.control_port.to_string(),
            ));
            values.push((
                format!("instance_{n}_connected"),
                (record.conn_state == ConnState::Connected).to_string(),
            ));
            values.push((
                format!("instance_{n}_primary"),
                record
                    .reported_primary
                    .map(|primary| primary.to_string())
                    .unwrap_or_default(),
            ));
        }
        self.host.publish_variables(&values);

        if let Some(metrics) = &self.metrics {
            metrics.set_fleet(self.registry.len(), self.registry.connected_count());
        }
    }

    fn publish_snapshot(&self) {
        let instances = self
            .registry
            .iter()
            .map(|record| InstanceSnapshot {
                id: record.descriptor.id.clone(),
                name: record.descriptor.name.clone(),
                description: record.descriptor.description.clone(),
                ip_address: record.descriptor.ip_address.clone(),
                api_port: record.descriptor.api_port,
                control_port: record.descriptor.control_port,
                conn_state: record.conn_state,
                connected: record.conn_state == ConnState::Connected,
                reported_primary: record.reported_primary,
                last_status_code: record.last_status_code,
                status_poll_failures: record.status_poll_failures,
            })
            .collect();
        let snapshot = EngineSnapshot {
            manager_reachable: self.manager_reachable,
            channel_id: self.channel_id.clone(),
            channel_name: self.channel_name.clone(),
            loaded_from_cache: self.cache_loaded_this_session,
            instances,
            effective_primary: self
                .selector
                .current()
                .instance_id()
                .map(ToOwned::to_owned),
            console: self.status.current().cloned(),
        };
        let _ = self.snapshot_tx.send(snapshot);
    }

    /// Teardown: close every supervisor (closing never triggers
    /// reconnection), clear the registry, reset the selector.
    async fn shutdown(&mut self) {
        info!("stopping orchestrator engine");
        let handles = self.registry.close_all();
        for handle in handles {
            handle.shutdown().await;
        }
        self.selector.reset();
        self.status.reset();
        self.publish_snapshot();
        info!("orchestrator engine stopped");
    }
}

fn fingerprint<T: Serialize>(value: &T) -> String {
    // Descriptor lists serialize infallibly; an empty fingerprint would only
    // force a spurious re-bind on the next cycle.
    serde_json::to_string(value).unwrap_or_default()
}
