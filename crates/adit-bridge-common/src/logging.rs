//! ---
//! adit_section: "01-core-functionality"
//! adit_subsection: "module"
//! adit_type: "source"
//! adit_scope: "code"
//! adit_description: "Shared primitives and utilities for the bridge runtime."
//! adit_version: "v0.0.0-prealpha"
//! adit_owner: "tbd"
//! ---
use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "ADIT_BRIDGE_LOG";

/// Non-blocking writer guards, parked for the lifetime of the process so
/// buffered log lines survive until exit.
static WRITER_GUARDS: OnceCell<(WorkerGuard, WorkerGuard)> = OnceCell::new();

/// Available log formats for the daemon.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Initialize the tracing subscriber for a bridge process.
///
/// The filter directive comes from `ADIT_BRIDGE_LOG`, then `RUST_LOG`; with
/// neither set, the `verbose` configuration flag decides between `info` and
/// `debug`. Operator-facing output goes to stdout in the configured format,
/// and a rolling daily JSON file keeps the post-mortem trail.
pub fn init_tracing(service_name: &str, config: &LoggingConfig, verbose: bool) -> Result<()> {
    std::fs::create_dir_all(&config.directory)?;

    let (stdout_sink, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let prefix = config.file_prefix.as_deref().unwrap_or(service_name);
    let daily_file = rolling::daily(&config.directory, format!("{prefix}.log"));
    let (file_sink, file_guard) = tracing_appender::non_blocking(daily_file);
    let _ = WRITER_GUARDS.set((stdout_guard, file_guard));

    // Exactly one of the stdout layers is active; Option<Layer> composes
    // as a no-op for the other.
    let (json_stdout, pretty_stdout) = match config.format {
        LogFormat::StructuredJson => (
            Some(
                fmt::layer()
                    .json()
                    .with_target(false)
                    .with_timer(fmt::time::UtcTime::rfc_3339())
                    .with_writer(stdout_sink),
            ),
            None,
        ),
        LogFormat::Pretty => (
            None,
            Some(
                fmt::layer()
                    .with_timer(fmt::time::UtcTime::rfc_3339())
                    .with_writer(stdout_sink),
            ),
        ),
    };

    let file_layer = fmt::layer()
        .json()
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_writer(file_sink);

    // A second call (as happens across tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(env_filter(verbose))
        .with(json_stdout)
        .with(pretty_stdout)
        .with(file_layer)
        .try_init();

    info!(service = %service_name, log_dir = %config.directory.display(), format = ?config.format, "logging initialised");
    Ok(())
}

/// First parseable directive wins: `ADIT_BRIDGE_LOG`, then `RUST_LOG`,
/// then the verbosity-derived default.
fn env_filter(verbose: bool) -> EnvFilter {
    for var in [LOG_ENV, "RUST_LOG"] {
        let Ok(directive) = std::env::var(var) else {
            continue;
        };
        match EnvFilter::try_new(&directive) {
            Ok(filter) => return filter,
            Err(err) => eprintln!("ignoring invalid {var} directive {directive:?}: {err}"),
        }
    }
    EnvFilter::new(if verbose { "debug" } else { "info" })
}
