//! ---
//! adit_section: "03-persistence-logging"
//! adit_subsection: "module"
//! adit_type: "source"
//! adit_scope: "code"
//! adit_description: "Metrics collection and export utilities."
//! adit_version: "v0.0.0-prealpha"
//! adit_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::Result;
use prometheus::{IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};

/// Shared registry type used across services.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Engine-level metrics, optional so embedded hosts can run without an
/// exporter.
#[derive(Clone, Debug)]
pub struct BridgeMetrics {
    registry: SharedRegistry,
    instances_registered: IntGauge,
    instances_connected: IntGauge,
    primary_info: IntGaugeVec,
    reconnects: IntCounterVec,
    failovers: IntCounter,
    cache_loads: IntCounter,
}

impl BridgeMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let instances_registered = IntGauge::with_opts(Opts::new(
            "adit_bridge_instances_registered",
            "Number of Instances currently registered for the channel",
        ))?;
        registry.register(Box::new(instances_registered.clone()))?;

        let instances_connected = IntGauge::with_opts(Opts::new(
            "adit_bridge_instances_connected",
            "Number of Instances with an open control transport",
        ))?;
        registry.register(Box::new(instances_connected.clone()))?;

        let primary_info = IntGaugeVec::new(
            Opts::new(
                "adit_bridge_primary_info",
                "Indicator (0/1) naming the current Effective Primary",
            ),
            &["instance"],
        )?;
        registry.register(Box::new(primary_info.clone()))?;

        let reconnects = IntCounterVec::new(
            Opts::new(
                "adit_bridge_reconnects_total",
                "Count of control transport reconnections by Instance",
            ),
            &["instance"],
        )?;
        registry.register(Box::new(reconnects.clone()))?;

        let failovers = IntCounter::with_opts(Opts::new(
            "adit_bridge_failovers_total",
            "Count of Effective Primary transitions",
        ))?;
        registry.register(Box::new(failovers.clone()))?;

        let cache_loads = IntCounter::with_opts(Opts::new(
            "adit_bridge_cache_loads_total",
            "Count of cold starts served from the definition cache",
        ))?;
        registry.register(Box::new(cache_loads.clone()))?;

        Ok(Self {
            registry,
            instances_registered,
            instances_connected,
            primary_info,
            reconnects,
            failovers,
            cache_loads,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn set_fleet(&self, registered: usize, connected: usize) {
        self.instances_registered.set(registered as i64);
        self.instances_connected.set(connected as i64);
    }

    pub fn set_primary(&self, instance: Option<&str>) {
        self.primary_info.reset();
        if let Some(instance) = instance {
            self.primary_info.with_label_values(&[instance]).set(1);
        }
    }

    pub fn record_reconnect(&self, instance: &str) {
        self.reconnects.with_label_values(&[instance]).inc();
    }

    pub fn record_failover(&self) {
        self.failovers.inc();
    }

    pub fn record_cache_load(&self) {
        self.cache_loads.inc();
    }
}

pub use prometheus;
