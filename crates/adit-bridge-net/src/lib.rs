//! ---
//! adit_section: "05-networking-external-interfaces"
//! adit_subsection: "module"
//! adit_type: "source"
//! adit_scope: "code"
//! adit_description: "Manager and Instance connectivity."
//! adit_version: "v0.0.0-prealpha"
//! adit_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Network surfaces of the bridge: the typed Manager REST client, the
//! Instance status poller, and the bidirectional control transport.

pub mod manager;
pub mod status;
pub mod transport;

/// Result alias used throughout the networking crate.
pub type Result<T> = std::result::Result<T, NetError>;

/// Error taxonomy shared by every Manager and Instance HTTP operation.
/// Each variant maps to exactly one retry policy in the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Network-level failure: connect refused, reset, or request deadline
    /// exceeded. Retried by the next poll cycle.
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),
    /// The endpoint answered with a non-200 status.
    #[error("unexpected http status {0}")]
    HttpStatus(u16),
    /// The body could not be decoded into the expected shape.
    #[error("malformed response body: {0}")]
    Decode(String),
}

impl NetError {
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return NetError::HttpStatus(status.as_u16());
        }
        if err.is_decode() {
            return NetError::Decode(err.to_string());
        }
        NetError::Unreachable(err.to_string())
    }
}

pub use manager::{
    ChannelDescriptor, InstanceDescriptor, ManagerClient, RuleDescriptor, VariableDescriptor,
};
pub use status::{fetch_instance_status, InstanceStatus};
pub use transport::{ControlTransport, TransportError, TransportEvent};
