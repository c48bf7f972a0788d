//! ---
//! adit_section: "01-core-functionality"
//! adit_subsection: "module"
//! adit_type: "source"
//! adit_scope: "code"
//! adit_description: "Shared primitives and utilities for the bridge runtime."
//! adit_version: "v0.0.0-prealpha"
//! adit_owner: "tbd"
//! ---
//! Core shared primitives for the AdIT bridge workspace.
//! This crate exposes configuration loading, logging, and time
//! utilities consumed across the workspace.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{BridgeConfig, LoadedBridgeConfig, LoggingConfig, TimingConfig};
pub use logging::{init_tracing, LogFormat};
pub use time::humanize_age;
