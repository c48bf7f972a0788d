//! ---
//! adit_section: "07-resilience-fault-tolerance"
//! adit_subsection: "module"
//! adit_type: "source"
//! adit_scope: "code"
//! adit_description: "Instance supervision and primary election."
//! adit_version: "v0.0.0-prealpha"
//! adit_owner: "tbd"
//! ---
//! Per-Instance connection supervisor.
//!
//! Each registered Instance gets one supervisor task that exclusively owns
//! its control transport, reconnect timer, and pong deadline. The task
//! addresses its record by id and generation only; the orchestrator maps
//! events back onto the registry, so a supervisor outliving its record can
//! never corrupt a successor's state.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use adit_bridge_net::{ControlTransport, TransportEvent};
use tracing::{debug, info, warn};

/// Connection state of one Instance's control transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnState {
    Disconnected,
    Connecting,
    Connected,
}

/// Timing knobs a supervisor operates under.
#[derive(Debug, Clone)]
pub struct SupervisorTiming {
    pub connect_timeout: Duration,
    pub pong_timeout: Duration,
    pub reconnect_delay: Duration,
}

/// Static identity and endpoint a supervisor is spawned with.
#[derive(Debug, Clone)]
pub struct SupervisorSpawn {
    pub instance_id: String,
    pub instance_name: String,
    pub host: String,
    pub control_port: u16,
    pub control_interface_id: Uuid,
    pub generation: u64,
    pub timing: SupervisorTiming,
}

/// Commands the orchestrator sends into a supervisor.
#[derive(Debug, Clone)]
pub enum SupervisorCommand {
    /// Heartbeat tick: send a ping, or declare the transport dead when the
    /// previous ping is still unanswered.
    Ping,
    /// Broadcast payload for the control channel.
    Send(String),
    /// The Manager relabeled the instance endpoint; applies on the next
    /// connect attempt, never to a live transport.
    UpdateEndpoint { host: String, control_port: u16 },
    /// Intentional teardown; the task exits without emitting any event.
    Close,
}

/// What happened inside a supervisor, as reported to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEventKind {
    /// A connect attempt started.
    Connecting,
    /// The control transport opened.
    Connected {
        /// True when this record was healthy earlier in the session.
        reconnected: bool,
    },
    /// The control transport was lost unexpectedly.
    Disconnected,
    /// A text frame arrived.
    Frame(String),
}

/// Event envelope; `generation` lets the orchestrator discard events from a
/// supervisor that has been superseded for the same instance id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorEvent {
    pub instance_id: String,
    pub generation: u64,
    pub kind: SupervisorEventKind,
}

/// Handle owned by the registry record.
#[derive(Debug)]
pub struct SupervisorHandle {
    commands: mpsc::UnboundedSender<SupervisorCommand>,
    task: JoinHandle<()>,
    generation: u64,
}

impl SupervisorHandle {
    /// Generation this supervisor stamps onto its events.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Heartbeat tick for a Connected supervisor.
    pub fn ping(&self) {
        let _ = self.commands.send(SupervisorCommand::Ping);
    }

    /// Queue a broadcast payload.
    pub fn send(&self, payload: String) {
        let _ = self.commands.send(SupervisorCommand::Send(payload));
    }

    /// Pass a relabeled endpoint along for the next reconnect.
    pub fn update_endpoint(&self, host: String, control_port: u16) {
        let _ = self
            .commands
            .send(SupervisorCommand::UpdateEndpoint { host, control_port });
    }

    /// Request teardown without waiting for it.
    pub fn close(&self) {
        let _ = self.commands.send(SupervisorCommand::Close);
    }

    /// Request teardown and wait for the task to finish.
    pub async fn shutdown(self) {
        let _ = self.commands.send(SupervisorCommand::Close);
        let _ = self.task.await;
    }
}

/// Spawn the supervisor task for one Instance.
pub fn spawn(
    spec: SupervisorSpawn,
    events: mpsc::UnboundedSender<SupervisorEvent>,
) -> SupervisorHandle {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let generation = spec.generation;
    let task = tokio::spawn(run(spec, events, command_rx));
    SupervisorHandle {
        commands: command_tx,
        task,
        generation,
    }
}

/// Why the Connected phase ended.
enum SessionEnd {
    /// The peer closed or the socket failed.
    Remote,
    /// Liveness probing declared the transport dead.
    Dead,
    /// Intentional close; exit without an event.
    Stopped,
}

async fn run(
    mut spec: SupervisorSpawn,
    events: mpsc::UnboundedSender<SupervisorEvent>,
    mut commands: mpsc::UnboundedReceiver<SupervisorCommand>,
) {
    let mut ever_connected = false;
    let mut reconnect_wait: Option<Duration> = None;

    'lifecycle: loop {
        // Disconnected: at most one pending reconnect delay per record.
        if let Some(wait) = reconnect_wait.take() {
            let sleep = tokio::time::sleep(wait);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    command = commands.recv() => match command {
                        Some(SupervisorCommand::Close) | None => return,
                        Some(SupervisorCommand::UpdateEndpoint { host, control_port }) => {
                            spec.host = host;
                            spec.control_port = control_port;
                        }
                        // Pings and sends have nothing to act on here.
                        Some(_) => {}
                    },
                }
            }
        }

        // Connecting.
        emit(&events, &spec, SupervisorEventKind::Connecting);
        let url = format!(
            "ws://{}:{}/{}",
            spec.host, spec.control_port, spec.control_interface_id
        );
        let (transport_tx, mut transport_events) = mpsc::unbounded_channel();
        let connect = ControlTransport::connect(&url, spec.timing.connect_timeout, transport_tx);
        tokio::pin!(connect);

        let mut transport = loop {
            tokio::select! {
                result = &mut connect => match result {
                    Ok(transport) => break transport,
                    Err(err) => {
                        debug!(instance = %spec.instance_id, url = %url, error = %err, "control connect failed");
                        emit(&events, &spec, SupervisorEventKind::Disconnected);
                        reconnect_wait = Some(spec.timing.reconnect_delay);
                        continue 'lifecycle;
                    }
                },
                command = commands.recv() => match command {
                    // Dropping the half-open connect future cancels it.
                    Some(SupervisorCommand::Close) | None => return,
                    Some(SupervisorCommand::UpdateEndpoint { host, control_port }) => {
                        spec.host = host;
                        spec.control_port = control_port;
                    }
                    Some(_) => {}
                },
            }
        };

        // Connected.
        if ever_connected {
            info!(instance = %spec.instance_id, name = %spec.instance_name, url = %url, "control transport reconnected");
        } else {
            info!(instance = %spec.instance_id, name = %spec.instance_name, url = %url, "control transport connected");
        }
        emit(
            &events,
            &spec,
            SupervisorEventKind::Connected {
                reconnected: ever_connected,
            },
        );
        ever_connected = true;

        let mut pending_pong = false;
        let mut pong_deadline: Option<Instant> = None;

        let end = loop {
            let deadline = async {
                match pong_deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                event = transport_events.recv() => match event {
                    Some(TransportEvent::Opened) => {}
                    Some(TransportEvent::Text(text)) => {
                        emit(&events, &spec, SupervisorEventKind::Frame(text));
                    }
                    Some(TransportEvent::Pong) => {
                        pending_pong = false;
                        pong_deadline = None;
                    }
                    Some(TransportEvent::Closed { code }) => {
                        warn!(instance = %spec.instance_id, ?code, "control transport closed unexpectedly");
                        break SessionEnd::Remote;
                    }
                    Some(TransportEvent::Error(err)) => {
                        warn!(instance = %spec.instance_id, error = %err, "control transport failed");
                        break SessionEnd::Remote;
                    }
                    None => break SessionEnd::Remote,
                },
                command = commands.recv() => match command {
                    Some(SupervisorCommand::Ping) => {
                        if pending_pong {
                            warn!(instance = %spec.instance_id, "previous ping still unanswered; declaring transport dead");
                            break SessionEnd::Dead;
                        }
                        if transport.send_ping().await {
                            pending_pong = true;
                            pong_deadline = Some(Instant::now() + spec.timing.pong_timeout);
                        } else {
                            warn!(instance = %spec.instance_id, "ping send failed; declaring transport dead");
                            break SessionEnd::Dead;
                        }
                    }
                    Some(SupervisorCommand::Send(payload)) => {
                        if !transport.send_text(&payload).await {
                            debug!(instance = %spec.instance_id, "command frame not sent");
                        }
                    }
                    Some(SupervisorCommand::UpdateEndpoint { host, control_port }) => {
                        // The live transport is never reset for a relabel.
                        spec.host = host;
                        spec.control_port = control_port;
                    }
                    Some(SupervisorCommand::Close) | None => break SessionEnd::Stopped,
                },
                _ = deadline => {
                    warn!(instance = %spec.instance_id, "pong deadline elapsed; declaring transport dead");
                    break SessionEnd::Dead;
                }
            }
        };

        match end {
            SessionEnd::Stopped => {
                transport.close_forceful().await;
                return;
            }
            SessionEnd::Remote | SessionEnd::Dead => {
                transport.close_forceful().await;
                emit(&events, &spec, SupervisorEventKind::Disconnected);
                reconnect_wait = Some(spec.timing.reconnect_delay);
            }
        }
    }
}

fn emit(
    events: &mpsc::UnboundedSender<SupervisorEvent>,
    spec: &SupervisorSpawn,
    kind: SupervisorEventKind,
) {
    let _ = events.send(SupervisorEvent {
        instance_id: spec.instance_id.clone(),
        generation: spec.generation,
        kind,
    });
}
