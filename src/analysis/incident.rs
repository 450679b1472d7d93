//! Incident records and the bounded in-memory incident store.

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::detect::Severity;

const FINGERPRINT_LEN: usize = 12;

/// An anomaly promoted to an incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub node_id: String,
    pub service_id: Option<String>,
    pub anomaly_type: String,
    pub severity: Severity,
    pub metrics: BTreeMap<String, f64>,
    /// Name of the detector that raised the incident.
    pub detected_by: String,
    pub anomaly_score: f64,
    pub description: Option<String>,
}

impl IncidentEvent {
    /// New incident with a random id and no metrics.
    pub fn new(
        node_id: impl Into<String>,
        anomaly_type: impl Into<String>,
        severity: Severity,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            timestamp,
            node_id: node_id.into(),
            service_id: None,
            anomaly_type: anomaly_type.into(),
            severity,
            metrics: BTreeMap::new(),
            detected_by: String::new(),
            anomaly_score: 0.0,
            description: None,
        }
    }

    pub fn with_service(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = Some(service_id.into());
        self
    }

    pub fn with_metric(mut self, key: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(key.into(), value);
        self
    }

    /// Coarse identity used for deduplication: the first 12 hex characters
    /// of SHA-256 over `node_id:anomaly_type:severity`.
    pub fn fingerprint(&self) -> String {
        let key = format!("{}:{}:{}", self.node_id, self.anomaly_type, self.severity);
        let digest = Sha256::digest(key.as_bytes());
        let mut hex = hex::encode(digest);
        hex.truncate(FINGERPRINT_LEN);
        hex
    }
}

/// Incidents retained for correlation, bounded by count.
///
/// When full, the oldest incident by insertion is evicted and returned to
/// the caller so dependent caches can be pruned with it.
#[derive(Debug)]
pub struct IncidentStore {
    incidents: HashMap<String, IncidentEvent>,
    order: VecDeque<String>,
    capacity: usize,
}

impl IncidentStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            incidents: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Store an incident, returning any incident evicted to make room.
    pub fn insert(&mut self, incident: IncidentEvent) -> Option<IncidentEvent> {
        let id = incident.event_id.clone();
        if self.incidents.insert(id.clone(), incident).is_some() {
            // Re-inserting an id keeps its original position.
            return None;
        }
        self.order.push_back(id);

        if self.order.len() > self.capacity {
            let oldest = self.order.pop_front()?;
            return self.incidents.remove(&oldest);
        }
        None
    }

    pub fn get(&self, event_id: &str) -> Option<&IncidentEvent> {
        self.incidents.get(event_id)
    }

    pub fn contains(&self, event_id: &str) -> bool {
        self.incidents.contains_key(event_id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// All incidents in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &IncidentEvent> + '_ {
        self.order.iter().filter_map(|id| self.incidents.get(id))
    }

    /// The `limit` most recently inserted incidents, newest first.
    pub fn list_recent(&self, limit: usize) -> Vec<&IncidentEvent> {
        self.order
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| self.incidents.get(id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incident(node: &str, kind: &str, severity: Severity) -> IncidentEvent {
        IncidentEvent::new(node, kind, severity, Utc::now())
    }

    #[test]
    fn test_fingerprint_is_coarse() {
        let a = incident("node-1", "high_latency", Severity::High);
        let b = incident("node-1", "high_latency", Severity::High).with_metric("latency", 900.0);
        assert_ne!(a.event_id, b.event_id);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 12);
        assert!(a.fingerprint().chars().all(|c| c.is_ascii_hexdigit()));

        assert_ne!(
            a.fingerprint(),
            incident("node-2", "high_latency", Severity::High).fingerprint()
        );
        assert_ne!(
            a.fingerprint(),
            incident("node-1", "high_packet_loss", Severity::High).fingerprint()
        );
        assert_ne!(
            a.fingerprint(),
            incident("node-1", "high_latency", Severity::Critical).fingerprint()
        );
    }

    #[test]
    fn test_fingerprint_matches_sha256_prefix() {
        let a = incident("n", "t", Severity::Low);
        let expected = hex::encode(Sha256::digest(b"n:t:low"));
        assert_eq!(a.fingerprint(), expected[..12]);
    }

    #[test]
    fn test_store_evicts_oldest() {
        let mut store = IncidentStore::new(2);
        let first = incident("a", "x", Severity::Low);
        let first_id = first.event_id.clone();
        assert!(store.insert(first).is_none());
        assert!(store.insert(incident("b", "x", Severity::Low)).is_none());

        let evicted = store.insert(incident("c", "x", Severity::Low)).unwrap();
        assert_eq!(evicted.event_id, first_id);
        assert_eq!(store.len(), 2);
        assert!(!store.contains(&first_id));

        let recent: Vec<_> = store.list_recent(5).iter().map(|i| i.node_id.clone()).collect();
        assert_eq!(recent, vec!["c", "b"]);
        let ordered: Vec<_> = store.iter().map(|i| i.node_id.clone()).collect();
        assert_eq!(ordered, vec!["b", "c"]);
    }
}
