//! ---
//! adit_section: "01-core-functionality"
//! adit_subsection: "module"
//! adit_type: "source"
//! adit_scope: "code"
//! adit_description: "Primary orchestration and lifecycle management."
//! adit_version: "v0.0.0-prealpha"
//! adit_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

/// Status levels surfaced to the operator console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConsoleStatus {
    /// Channel bound, instances connected, primary elected.
    Ok,
    /// Operating, but at least one issue needs operator attention.
    Warning,
    /// Neither the Manager nor any Instance is reachable.
    Disconnected,
    /// The engine cannot start with the current configuration.
    BadConfig,
    /// Instances are registered and connection attempts are in flight.
    Connecting,
}

impl ConsoleStatus {
    /// Static label for snapshots and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsoleStatus::Ok => "ok",
            ConsoleStatus::Warning => "warning",
            ConsoleStatus::Disconnected => "disconnected",
            ConsoleStatus::BadConfig => "badConfig",
            ConsoleStatus::Connecting => "connecting",
        }
    }
}

impl fmt::Display for ConsoleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The issue set a status derivation starts from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusIssues {
    pub manager_unreachable: bool,
    pub no_channel_selected: bool,
    pub no_instances_registered: bool,
    pub no_instances_connected: bool,
    pub no_primary_elected: bool,
}

impl StatusIssues {
    fn any(&self) -> bool {
        self.manager_unreachable
            || self.no_channel_selected
            || self.no_instances_registered
            || self.no_instances_connected
            || self.no_primary_elected
    }
}

/// A status level together with its operator-facing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleState {
    pub status: ConsoleStatus,
    pub message: String,
}

impl ConsoleState {
    /// Derive the console state from the current issue set.
    ///
    /// `primary_label` is `(name, id)` of the effective primary and is only
    /// consulted for the all-good message.
    pub fn derive(issues: &StatusIssues, primary_label: Option<(&str, &str)>) -> Self {
        if !issues.any() {
            let message = match primary_label {
                Some((name, id)) => format!("Primary: '{}' ({})", name, id),
                None => "All good".to_owned(),
            };
            return Self {
                status: ConsoleStatus::Ok,
                message,
            };
        }

        // Fully dark requires losing both the Manager and every Instance.
        if issues.manager_unreachable && issues.no_instances_connected {
            return Self {
                status: ConsoleStatus::Disconnected,
                message: Self::message_for(issues),
            };
        }

        // Instances are known and reachable attempts are still in flight.
        if issues.no_instances_connected
            && !issues.no_instances_registered
            && !issues.manager_unreachable
        {
            return Self {
                status: ConsoleStatus::Connecting,
                message: Self::message_for(issues),
            };
        }

        Self {
            status: ConsoleStatus::Warning,
            message: Self::message_for(issues),
        }
    }

    fn message_for(issues: &StatusIssues) -> String {
        let mut parts = Vec::new();
        if issues.manager_unreachable {
            parts.push("Manager unreachable");
        }
        if issues.no_channel_selected {
            parts.push("No channel selected");
        }
        if issues.no_instances_registered {
            parts.push("No instances registered");
        } else if issues.no_instances_connected {
            parts.push("No instances connected");
        }
        if issues.no_primary_elected && !issues.no_instances_registered {
            parts.push("No primary elected");
        }
        parts.join("; ")
    }
}

/// Pushes status changes to a sink only on transition, logging each one.
#[derive(Debug, Default)]
pub struct StatusTracker {
    last: Option<ConsoleState>,
}

impl StatusTracker {
    /// Record a freshly derived state; returns it when it differs from the
    /// previously observed one.
    pub fn transition(&mut self, state: ConsoleState) -> Option<ConsoleState> {
        if self.last.as_ref() == Some(&state) {
            return None;
        }
        info!(status = %state.status, message = %state.message, "console status transition");
        self.last = Some(state.clone());
        Some(state)
    }

    /// The most recently observed state.
    pub fn current(&self) -> Option<&ConsoleState> {
        self.last.as_ref()
    }

    /// Forget the observed state, so the next derivation always transitions.
    pub fn reset(&mut self) {
        self.last = None;
    }
}
