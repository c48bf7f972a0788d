//! ---
//! adit_section: "01-core-functionality"
//! adit_subsection: "module"
//! adit_type: "source"
//! adit_scope: "code"
//! adit_description: "Primary orchestration and lifecycle management."
//! adit_version: "v0.0.0-prealpha"
//! adit_owner: "tbd"
//! ---
use indexmap::IndexMap;
use tracing::info;

use adit_bridge_net::InstanceDescriptor;

use crate::selector::PrimaryCandidate;
use crate::supervisor::SupervisorHandle;

pub use crate::supervisor::ConnState;

/// One registered Instance. Exists exactly while the most recent successful
/// Manager fetch included its id.
#[derive(Debug)]
pub struct InstanceRecord {
    /// Manager-supplied identity and endpoints.
    pub descriptor: InstanceDescriptor,
    /// Control transport state, mirrored from supervisor events.
    pub conn_state: ConnState,
    /// True iff `conn_state == Connected`. HTTP status-poll failures never
    /// touch this.
    pub healthy: bool,
    /// Last `Primary` flag from the status endpoint; `None` until the first
    /// successful poll.
    pub reported_primary: Option<bool>,
    /// Last status code from the status endpoint.
    pub last_status_code: Option<i64>,
    /// Consecutive status poll failures.
    pub status_poll_failures: u32,
    /// Generation of the supervisor currently serving this record.
    pub generation: u64,
    pub(crate) handle: SupervisorHandle,
}

impl InstanceRecord {
    fn new(descriptor: InstanceDescriptor, handle: SupervisorHandle) -> Self {
        let generation = handle.generation();
        Self {
            descriptor,
            conn_state: ConnState::Disconnected,
            healthy: false,
            reported_primary: None,
            last_status_code: None,
            status_poll_failures: 0,
            generation,
            handle,
        }
    }
}

/// Result of one [`InstanceRegistry::sync_against`] pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl SyncOutcome {
    /// True when the pass changed the membership.
    pub fn changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

/// Id-keyed collection of Instance records, iterated in Manager order.
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    records: IndexMap<String, InstanceRecord>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&InstanceRecord> {
        self.records.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut InstanceRecord> {
        self.records.get_mut(id)
    }

    /// Records in Manager order.
    pub fn iter(&self) -> impl Iterator<Item = &InstanceRecord> {
        self.records.values()
    }

    /// Number of records with an open control transport.
    pub fn connected_count(&self) -> usize {
        self.records
            .values()
            .filter(|record| record.conn_state == ConnState::Connected)
            .count()
    }

    /// The election view of the registry, in Manager order.
    pub fn candidates(&self) -> Vec<PrimaryCandidate> {
        self.records
            .values()
            .map(|record| PrimaryCandidate {
                id: record.descriptor.id.clone(),
                name: record.descriptor.name.clone(),
                healthy: record.healthy,
                reported_primary: record.reported_primary,
            })
            .collect()
    }

    /// Diff the registry against the Manager-supplied instance list.
    ///
    /// Departed ids get their supervisor closed and their record dropped;
    /// new ids get a record and a freshly spawned supervisor; surviving ids
    /// keep their record (and its live transport) with metadata updated in
    /// place. The map's ordering is replaced by the list's ordering.
    pub fn sync_against(
        &mut self,
        list: &[InstanceDescriptor],
        spawn: &mut dyn FnMut(&InstanceDescriptor) -> SupervisorHandle,
    ) -> SyncOutcome {
        let mut outcome = SyncOutcome::default();

        let incoming: indexmap::IndexSet<&str> =
            list.iter().map(|descriptor| descriptor.id.as_str()).collect();
        let departed: Vec<String> = self
            .records
            .keys()
            .filter(|id| !incoming.contains(id.as_str()))
            .cloned()
            .collect();
        for id in departed {
            if let Some(record) = self.records.shift_remove(&id) {
                info!(instance = %id, name = %record.descriptor.name, "instance removed by manager");
                record.handle.close();
                outcome.removed.push(id);
            }
        }

        let mut reordered = IndexMap::with_capacity(list.len());
        for descriptor in list {
            match self.records.shift_remove(&descriptor.id) {
                Some(mut record) => {
                    let endpoint_changed = record.descriptor.ip_address != descriptor.ip_address
                        || record.descriptor.control_port != descriptor.control_port;
                    if endpoint_changed {
                        // Live transports are not reset for a relabel; the
                        // supervisor picks the new endpoint up on its next
                        // natural reconnect.
                        record.handle.update_endpoint(
                            descriptor.ip_address.clone(),
                            descriptor.control_port,
                        );
                    }
                    record.descriptor = descriptor.clone();
                    reordered.insert(descriptor.id.clone(), record);
                }
                None => {
                    info!(instance = %descriptor.id, name = %descriptor.name, "instance discovered");
                    let handle = spawn(descriptor);
                    reordered.insert(
                        descriptor.id.clone(),
                        InstanceRecord::new(descriptor.clone(), handle),
                    );
                    outcome.added.push(descriptor.id.clone());
                }
            }
        }
        self.records = reordered;

        outcome
    }

    /// Ping every Connected record, as one heartbeat tick.
    pub fn ping_connected(&self) {
        for record in self.records.values() {
            if record.conn_state == ConnState::Connected {
                record.handle.ping();
            }
        }
    }

    /// Queue `payload` on every Connected record. Returns how many
    /// supervisors received it.
    pub fn broadcast(&self, payload: &str) -> usize {
        let mut sent = 0;
        for record in self.records.values() {
            if record.conn_state == ConnState::Connected {
                record.handle.send(payload.to_owned());
                sent += 1;
            }
        }
        sent
    }

    /// Drop every record, returning the handles so the caller can await
    /// their teardown.
    pub fn close_all(&mut self) -> Vec<SupervisorHandle> {
        self.records
            .drain(..)
            .map(|(_, record)| record.handle)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    use crate::supervisor::{spawn, SupervisorSpawn, SupervisorTiming};
    use std::time::Duration;

    fn descriptor(id: &str, name: &str, ip: &str, control_port: u16) -> InstanceDescriptor {
        InstanceDescriptor {
            id: id.to_owned(),
            name: name.to_owned(),
            description: String::new(),
            ip_address: ip.to_owned(),
            api_port: 8001,
            control_port,
        }
    }

    fn test_spawner(
        generation: std::sync::Arc<std::sync::atomic::AtomicU64>,
    ) -> impl FnMut(&InstanceDescriptor) -> SupervisorHandle {
        move |descriptor| {
            let (events, events_rx) = mpsc::unbounded_channel();
            // Keep the channel open with nobody listening.
            std::mem::forget(events_rx);
            let generation =
                generation.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            spawn(
                SupervisorSpawn {
                    instance_id: descriptor.id.clone(),
                    instance_name: descriptor.name.clone(),
                    host: descriptor.ip_address.clone(),
                    control_port: descriptor.control_port,
                    control_interface_id: uuid::Uuid::nil(),
                    generation,
                    timing: SupervisorTiming {
                        connect_timeout: Duration::from_millis(50),
                        pong_timeout: Duration::from_millis(50),
                        reconnect_delay: Duration::from_secs(60),
                    },
                },
                events,
            )
        }
    }

    #[tokio::test]
    async fn sync_discovers_updates_and_removes() {
        let counter = std::sync::Arc::new(std::sync::atomic::AtomicU64::new(0));
        let mut spawner = test_spawner(counter);
        let mut registry = InstanceRegistry::new();

        let outcome = registry.sync_against(
            &[descriptor("I1", "N1", "10.0.0.2", 9091)],
            &mut spawner,
        );
        assert_eq!(outcome.added, vec!["I1"]);
        assert!(outcome.removed.is_empty());
        assert_eq!(registry.len(), 1);

        // Same membership, renamed and reordered metadata: no churn.
        let generation_before = registry.get("I1").unwrap().generation;
        let outcome = registry.sync_against(
            &[descriptor("I1", "N1-renamed", "10.0.0.2", 9091)],
            &mut spawner,
        );
        assert!(!outcome.changed());
        let record = registry.get("I1").unwrap();
        assert_eq!(record.descriptor.name, "N1-renamed");
        assert_eq!(record.generation, generation_before, "supervisor must survive a relabel");

        // Departure closes and removes.
        let outcome = registry.sync_against(&[], &mut spawner);
        assert_eq!(outcome.removed, vec!["I1"]);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn sync_is_idempotent() {
        let counter = std::sync::Arc::new(std::sync::atomic::AtomicU64::new(0));
        let mut spawner = test_spawner(counter);
        let mut registry = InstanceRegistry::new();

        let list = [
            descriptor("I1", "N1", "10.0.0.2", 9091),
            descriptor("I2", "N2", "10.0.0.3", 9091),
        ];
        registry.sync_against(&list, &mut spawner);
        let generations: Vec<u64> = registry.iter().map(|record| record.generation).collect();

        let outcome = registry.sync_against(&list, &mut spawner);
        assert!(!outcome.changed());
        let after: Vec<u64> = registry.iter().map(|record| record.generation).collect();
        assert_eq!(generations, after);
    }

    #[tokio::test]
    async fn ordering_follows_the_manager() {
        let counter = std::sync::Arc::new(std::sync::atomic::AtomicU64::new(0));
        let mut spawner = test_spawner(counter);
        let mut registry = InstanceRegistry::new();

        registry.sync_against(
            &[
                descriptor("I1", "N1", "10.0.0.2", 9091),
                descriptor("I2", "N2", "10.0.0.3", 9091),
            ],
            &mut spawner,
        );

        // The Manager flips the order; the registry follows verbatim.
        registry.sync_against(
            &[
                descriptor("I2", "N2", "10.0.0.3", 9091),
                descriptor("I1", "N1", "10.0.0.2", 9091),
            ],
            &mut spawner,
        );
        let ids: Vec<&str> = registry
            .iter()
            .map(|record| record.descriptor.id.as_str())
            .collect();
        assert_eq!(ids, vec!["I2", "I1"]);
    }

    #[tokio::test]
    async fn endpoint_drift_keeps_the_record() {
        let counter = std::sync::Arc::new(std::sync::atomic::AtomicU64::new(0));
        let mut spawner = test_spawner(counter);
        let mut registry = InstanceRegistry::new();

        registry.sync_against(&[descriptor("I1", "N1", "10.0.0.2", 9091)], &mut spawner);
        registry.get_mut("I1").unwrap().conn_state = ConnState::Connected;
        registry.get_mut("I1").unwrap().healthy = true;

        let outcome = registry.sync_against(
            &[descriptor("I1", "N1", "10.0.0.9", 9099)],
            &mut spawner,
        );
        assert!(!outcome.changed());
        let record = registry.get("I1").unwrap();
        assert_eq!(record.conn_state, ConnState::Connected, "live transport survives drift");
        assert_eq!(record.descriptor.ip_address, "10.0.0.9");
    }
}
