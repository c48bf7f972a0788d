//! ---
//! adit_section: "01-core-functionality"
//! adit_subsection: "module"
//! adit_type: "source"
//! adit_scope: "code"
//! adit_description: "Primary orchestration and lifecycle management."
//! adit_version: "v0.0.0-prealpha"
//! adit_owner: "tbd"
//! ---
use uuid::Uuid;

use adit_bridge_net::{ChannelDescriptor, RuleDescriptor, VariableDescriptor};

use crate::status::ConsoleState;

/// The definition set the host binds its action, variable, and preset
/// registries against. Refreshed atomically per poll cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DefinitionSet {
    /// Every channel the Manager enumerates, for the operator dropdown.
    pub channels: Vec<ChannelDescriptor>,
    /// Variables of the selected channel; each id is passed through to the
    /// host-facing variable registry.
    pub variables: Vec<VariableDescriptor>,
    /// Manual rules of the selected channel, invocable by operator command.
    pub rules: Vec<RuleDescriptor>,
}

/// Capability object the orchestrator uses to talk to the hosting console.
///
/// The engine calls these from its own task; implementations must be cheap
/// and non-blocking. Nothing here returns an error back into the engine:
/// every failure mode of the bridge surfaces as a status transition, not as
/// a propagated error.
pub trait ConsoleHost: Send + Sync + 'static {
    /// The console status changed. Called on transitions only.
    fn status_changed(&self, state: &ConsoleState);

    /// The definition set changed (or the selected channel did); the host
    /// should re-bind its action/variable registries.
    fn definitions_changed(&self, definitions: &DefinitionSet);

    /// Bulk publication of engine-state variables (`primary_instance_id`,
    /// `instances_connected`, per-instance tuples in Manager order).
    fn publish_variables(&self, values: &[(String, String)]);

    /// A variable update arrived from the Effective Primary.
    fn variable_update(&self, variable_id: &str, value: &str);

    /// Persist the encoded definition cache blob.
    fn persist_definition_cache(&self, encoded: &str);

    /// Persist the channel name hint for the operator dropdown.
    fn persist_channel_name(&self, name: &str);

    /// Persist the generated control interface id on first start.
    fn persist_control_interface_id(&self, id: Uuid);
}
