//! ---
//! adit_section: "01-core-functionality"
//! adit_subsection: "module"
//! adit_type: "source"
//! adit_scope: "code"
//! adit_description: "Primary orchestration and lifecycle management."
//! adit_version: "v0.0.0-prealpha"
//! adit_owner: "tbd"
//! ---
//! Orchestration engine of the AdIT bridge. The orchestrator polls the
//! Manager, keeps one supervised control connection per Instance, elects a
//! sticky Effective Primary, and relays state to the injected console host.

pub mod frames;
pub mod host;
pub mod metrics;
pub mod orchestrator;
pub mod registry;
pub mod selector;
pub mod status;
pub mod supervisor;

pub use frames::{evaluate_rule_request, set_variable_request, InboundFrame};
pub use host::{ConsoleHost, DefinitionSet};
pub use metrics::{new_registry, BridgeMetrics, SharedRegistry};
pub use orchestrator::{
    EngineSnapshot, InstanceSnapshot, Orchestrator, OrchestratorCommand, OrchestratorHandle,
};
pub use registry::{ConnState, InstanceRecord, InstanceRegistry};
pub use selector::{EffectivePrimary, PrimaryCandidate, PrimarySelector, PrimaryTransition};
pub use status::{ConsoleState, ConsoleStatus, StatusIssues};
pub use supervisor::{SupervisorEvent, SupervisorEventKind, SupervisorHandle, SupervisorTiming};
