//! ---
//! adit_section: "03-persistence-logging"
//! adit_subsection: "module"
//! adit_type: "source"
//! adit_scope: "code"
//! adit_description: "Definition cache codec and retention policies."
//! adit_version: "v0.0.0-prealpha"
//! adit_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Versioned cache of the Manager-supplied definition set (instances,
//! variables, manual rules) so the bridge can cold-start and reconnect to a
//! known cluster while the Manager itself is down. The record travels as an
//! opaque JSON string persisted by the host console; this crate is the codec
//! and the validity policy around it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use adit_bridge_common::time::humanize_age;

/// Current cache envelope version. A persisted record with any other
/// version is discarded on load.
pub const CACHE_VERSION: u32 = 2;

/// Result alias used throughout the cache crate.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Error type for cache encode/decode failures.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The persisted definition snapshot, bound to one Manager endpoint and one
/// channel. Two records never coexist; saving replaces the previous one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Envelope version, compared against [`CACHE_VERSION`] on load.
    pub version: u32,
    /// When the blobs were captured.
    pub timestamp: DateTime<Utc>,
    /// Manager endpoint (`host:port`) the blobs were fetched from.
    pub manager_endpoint: String,
    /// Channel the blobs belong to.
    pub channel_id: String,
    /// Human label of the channel, for the operator dropdown.
    pub channel_name: String,
    /// Canonical JSON of the instance descriptor list.
    pub instances: String,
    /// Canonical JSON of the variable descriptor list.
    pub variables: String,
    /// Canonical JSON of the manual-rule descriptor list.
    pub rules: String,
}

impl CacheRecord {
    /// Age of the record as a human-readable phrase.
    pub fn age(&self) -> String {
        humanize_age(self.timestamp)
    }
}

/// The three definition blobs in their canonical serialized form.
#[derive(Debug, Clone, PartialEq)]
pub struct DefinitionBlobs {
    /// Canonical JSON of the instance descriptor list.
    pub instances: String,
    /// Canonical JSON of the variable descriptor list.
    pub variables: String,
    /// Canonical JSON of the manual-rule descriptor list.
    pub rules: String,
}

/// Outcome of a [`DefinitionCache::save`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// All three blobs were byte-identical to the persisted record; nothing
    /// was written.
    Unchanged,
    /// The record was replaced. The payload is the encoded string the host
    /// must persist.
    Written(String),
}

/// In-memory handle over the single persisted cache record, bound to the
/// currently configured Manager endpoint and channel.
#[derive(Debug)]
pub struct DefinitionCache {
    manager_endpoint: String,
    channel_id: String,
    record: Option<CacheRecord>,
    discarded_on_open: bool,
}

impl DefinitionCache {
    /// Decode the persisted blob for the given configuration binding.
    ///
    /// Any invalid persisted state (decode failure, version mismatch,
    /// binding mismatch, missing blob) is discarded here;
    /// [`DefinitionCache::discarded_on_open`] reports that the host should
    /// persist the cleared form.
    pub fn open(manager_endpoint: &str, channel_id: &str, persisted: &str) -> Self {
        let trimmed = persisted.trim();
        let mut discarded = false;
        let record = if trimmed.is_empty() || trimmed == "{}" {
            None
        } else {
            match serde_json::from_str::<CacheRecord>(trimmed) {
                Ok(record) => {
                    if let Some(reason) = invalid_reason(&record, manager_endpoint, channel_id) {
                        debug!(reason, "discarding persisted definition cache");
                        discarded = true;
                        None
                    } else {
                        Some(record)
                    }
                }
                Err(err) => {
                    debug!(error = %err, "persisted definition cache failed to decode; discarding");
                    discarded = true;
                    None
                }
            }
        };

        Self {
            manager_endpoint: manager_endpoint.to_owned(),
            channel_id: channel_id.to_owned(),
            record,
            discarded_on_open: discarded,
        }
    }

    /// True when `open` found persisted state it had to throw away. The
    /// host should persist [`DefinitionCache::encoded`] to clear it.
    pub fn discarded_on_open(&self) -> bool {
        self.discarded_on_open
    }

    /// The currently valid record, if any.
    pub fn load(&self) -> Option<&CacheRecord> {
        self.record.as_ref()
    }

    /// Replace the record with freshly fetched blobs. A no-op when all
    /// three blobs are byte-identical to the persisted ones.
    pub fn save(&mut self, blobs: &DefinitionBlobs, channel_name: &str) -> Result<SaveOutcome> {
        if let Some(current) = &self.record {
            if current.instances == blobs.instances
                && current.variables == blobs.variables
                && current.rules == blobs.rules
            {
                return Ok(SaveOutcome::Unchanged);
            }
        }

        let record = CacheRecord {
            version: CACHE_VERSION,
            timestamp: Utc::now(),
            manager_endpoint: self.manager_endpoint.clone(),
            channel_id: self.channel_id.clone(),
            channel_name: channel_name.to_owned(),
            instances: blobs.instances.clone(),
            variables: blobs.variables.clone(),
            rules: blobs.rules.clone(),
        };
        let encoded = serde_json::to_string(&record)?;
        self.record = Some(record);
        Ok(SaveOutcome::Written(encoded))
    }

    /// Drop the record. The cleared form still needs persisting by the host.
    pub fn clear(&mut self) {
        self.record = None;
    }

    /// The string form the host should persist: the encoded record, or the
    /// empty-object sentinel when no record is held.
    pub fn encoded(&self) -> String {
        match &self.record {
            Some(record) => serde_json::to_string(record).unwrap_or_else(|_| "{}".to_owned()),
            None => "{}".to_owned(),
        }
    }
}

fn invalid_reason(record: &CacheRecord, manager_endpoint: &str, channel_id: &str) -> Option<&'static str> {
    if record.version != CACHE_VERSION {
        return Some("version mismatch");
    }
    if record.manager_endpoint != manager_endpoint {
        return Some("manager endpoint mismatch");
    }
    if record.channel_id != channel_id {
        return Some("channel mismatch");
    }
    if record.instances.is_empty() || record.variables.is_empty() || record.rules.is_empty() {
        return Some("missing blob");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs() -> DefinitionBlobs {
        DefinitionBlobs {
            instances: r#"[{"ID":"I1"}]"#.to_owned(),
            variables: r#"[{"ID":"V1"}]"#.to_owned(),
            rules: "[]".to_owned(),
        }
    }

    #[test]
    fn save_then_reopen_roundtrips() {
        let mut cache = DefinitionCache::open("mgr:8000", "CH1", "{}");
        assert!(cache.load().is_none());
        assert!(!cache.discarded_on_open());

        let outcome = cache.save(&blobs(), "News").unwrap();
        let SaveOutcome::Written(encoded) = outcome else {
            panic!("expected a write");
        };

        let reopened = DefinitionCache::open("mgr:8000", "CH1", &encoded);
        let record = reopened.load().expect("record should survive");
        assert_eq!(record.channel_name, "News");
        assert_eq!(record.instances, blobs().instances);
        assert_eq!(record.version, CACHE_VERSION);
    }

    #[test]
    fn identical_blobs_are_not_rewritten() {
        let mut cache = DefinitionCache::open("mgr:8000", "CH1", "{}");
        assert!(matches!(
            cache.save(&blobs(), "News").unwrap(),
            SaveOutcome::Written(_)
        ));
        assert_eq!(cache.save(&blobs(), "News").unwrap(), SaveOutcome::Unchanged);

        let mut changed = blobs();
        changed.rules = r#"[{"ID":"R1"}]"#.to_owned();
        assert!(matches!(
            cache.save(&changed, "News").unwrap(),
            SaveOutcome::Written(_)
        ));
    }

    #[test]
    fn binding_mismatch_discards_on_open() {
        let mut cache = DefinitionCache::open("mgr:8000", "CH1", "{}");
        let SaveOutcome::Written(encoded) = cache.save(&blobs(), "News").unwrap() else {
            panic!("expected a write");
        };

        let other_channel = DefinitionCache::open("mgr:8000", "CH2", &encoded);
        assert!(other_channel.load().is_none());
        assert!(other_channel.discarded_on_open());

        let other_manager = DefinitionCache::open("mgr:9000", "CH1", &encoded);
        assert!(other_manager.load().is_none());
        assert!(other_manager.discarded_on_open());
    }

    #[test]
    fn version_mismatch_discards_on_open() {
        let mut cache = DefinitionCache::open("mgr:8000", "CH1", "{}");
        let SaveOutcome::Written(encoded) = cache.save(&blobs(), "News").unwrap() else {
            panic!("expected a write");
        };
        let mut value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        value["version"] = serde_json::json!(CACHE_VERSION + 1);

        let reopened = DefinitionCache::open("mgr:8000", "CH1", &value.to_string());
        assert!(reopened.load().is_none());
        assert!(reopened.discarded_on_open());
    }

    #[test]
    fn corrupt_blob_discards_on_open() {
        let reopened = DefinitionCache::open("mgr:8000", "CH1", "not json at all");
        assert!(reopened.load().is_none());
        assert!(reopened.discarded_on_open());
    }

    #[test]
    fn cleared_cache_encodes_as_empty_object() {
        let mut cache = DefinitionCache::open("mgr:8000", "CH1", "{}");
        cache.save(&blobs(), "News").unwrap();
        cache.clear();
        assert_eq!(cache.encoded(), "{}");
        assert!(cache.load().is_none());
    }
}
