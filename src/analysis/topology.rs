//! Service dependency inference from incident timing.
//!
//! When service A fails shortly after service B, A probably depends on B.
//! Edges are only ever added and their confidence only ever rises.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::analysis::IncidentEvent;

/// Failures further apart than this are not treated as a dependency.
const DEPENDENCY_WINDOW_SECS: f64 = 10.0;
const MAX_GAP_PENALTY: f64 = 0.3;

#[derive(Debug, Clone, Serialize)]
pub struct ServiceDependency {
    pub service_id: String,
    pub depends_on: BTreeSet<String>,
    pub depends_on_confidence: BTreeMap<String, f64>,
    pub last_verified: DateTime<Utc>,
}

impl ServiceDependency {
    fn new(service_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            service_id: service_id.to_string(),
            depends_on: BTreeSet::new(),
            depends_on_confidence: BTreeMap::new(),
            last_verified: now,
        }
    }
}

#[derive(Debug, Default)]
pub struct TopologyLearner {
    services: HashMap<String, ServiceDependency>,
}

impl TopologyLearner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Learn edges from `related` incidents on other services that failed
    /// strictly before `incident` by less than ten seconds.
    pub fn update(&mut self, incident: &IncidentEvent, related: &[&IncidentEvent]) {
        let Some(service_id) = incident.service_id.as_deref() else {
            return;
        };

        let entry = self
            .services
            .entry(service_id.to_string())
            .or_insert_with(|| ServiceDependency::new(service_id, incident.timestamp));
        entry.last_verified = incident.timestamp;

        for other in related {
            let Some(other_service) = other.service_id.as_deref() else {
                continue;
            };
            if other_service == service_id {
                continue;
            }

            let gap = (incident.timestamp - other.timestamp).num_milliseconds() as f64 / 1000.0;
            if gap <= 0.0 || gap >= DEPENDENCY_WINDOW_SECS {
                continue;
            }

            let confidence = 1.0 - (gap / DEPENDENCY_WINDOW_SECS).min(MAX_GAP_PENALTY);
            entry.depends_on.insert(other_service.to_string());
            let current = entry
                .depends_on_confidence
                .entry(other_service.to_string())
                .or_insert(0.0);
            if confidence > *current {
                *current = confidence;
                debug!(
                    service = service_id,
                    depends_on = other_service,
                    confidence,
                    "dependency edge strengthened"
                );
            }
        }
    }

    /// Dependencies of `service_id` at or above `min_confidence`.
    pub fn likely_dependencies(&self, service_id: &str, min_confidence: f64) -> BTreeSet<String> {
        self.services
            .get(service_id)
            .map(|svc| {
                svc.depends_on_confidence
                    .iter()
                    .filter(|&(_, &c)| c >= min_confidence)
                    .map(|(dep, _)| dep.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn dependency(&self, service_id: &str) -> Option<&ServiceDependency> {
        self.services.get(service_id)
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }
}
