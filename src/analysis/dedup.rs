//! Similarity-based suppression of repeat incidents.

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::Duration;
use tracing::debug;

use crate::analysis::{window_start, IncidentEvent};

/// Outcome of a deduplication check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupVerdict {
    Unique,
    Duplicate { original_id: String },
}

impl DedupVerdict {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, DedupVerdict::Duplicate { .. })
    }
}

/// Groups incidents by fingerprint and flags near-identical repeats inside
/// the window.
///
/// Each fingerprint keeps at most `history_cap` incidents; the oldest is
/// dropped first.
#[derive(Debug)]
pub struct Deduplicator {
    window: Duration,
    threshold: f64,
    history_cap: usize,
    history: HashMap<String, VecDeque<IncidentEvent>>,
}

impl Deduplicator {
    pub fn new(window: Duration, threshold: f64, history_cap: usize) -> Self {
        Self {
            window,
            threshold,
            history_cap: history_cap.max(1),
            history: HashMap::new(),
        }
    }

    /// Check `incident` against recent incidents sharing its fingerprint.
    ///
    /// Non-duplicates are remembered; duplicates are not. Fingerprints whose
    /// newest incident has left the window are forgotten.
    pub fn check(&mut self, incident: &IncidentEvent) -> DedupVerdict {
        let fingerprint = incident.fingerprint();
        let cutoff = window_start(incident.timestamp, self.window);
        self.history
            .retain(|_, h| h.back().is_some_and(|prior| prior.timestamp > cutoff));

        let newest_match = self
            .history
            .get(&fingerprint)
            .and_then(|h| h.iter().rev().find(|prior| prior.timestamp > cutoff));

        if let Some(prior) = newest_match {
            let score = similarity(incident, prior);
            if score >= self.threshold {
                debug!(
                    incident = %incident.event_id,
                    original = %prior.event_id,
                    similarity = score,
                    "duplicate incident"
                );
                return DedupVerdict::Duplicate {
                    original_id: prior.event_id.clone(),
                };
            }
        }

        let entries = self.history.entry(fingerprint).or_default();
        if entries.len() == self.history_cap {
            entries.pop_front();
        }
        entries.push_back(incident.clone());
        DedupVerdict::Unique
    }

    /// Number of incidents remembered for a fingerprint.
    pub fn history_len(&self, fingerprint: &str) -> usize {
        self.history.get(fingerprint).map_or(0, VecDeque::len)
    }
}

/// Equal-weight blend of type, severity, node and metric agreement.
///
/// Mismatches still earn partial credit: 0.5 for type, 0.7 for severity and
/// 0.6 for node.
pub fn similarity(a: &IncidentEvent, b: &IncidentEvent) -> f64 {
    let type_match = if a.anomaly_type == b.anomaly_type { 1.0 } else { 0.5 };
    let severity_match = if a.severity == b.severity { 1.0 } else { 0.7 };
    let node_match = if a.node_id == b.node_id { 1.0 } else { 0.6 };
    let metrics = metric_similarity(&a.metrics, &b.metrics);

    (type_match + severity_match + node_match + metrics) * 0.25
}

/// Mean of `1 - |a - b| / max(|a|, |b|)` over shared keys.
///
/// Keys where both values are zero are skipped. Returns 0.5 when either map
/// is empty or nothing qualifies.
pub fn metric_similarity(a: &BTreeMap<String, f64>, b: &BTreeMap<String, f64>) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for (key, &v1) in a {
        let Some(&v2) = b.get(key) else { continue };
        let scale = v1.abs().max(v2.abs());
        if scale > 0.0 {
            sum += (1.0 - (v1 - v2).abs() / scale).max(0.0);
            count += 1;
        }
    }

    if count == 0 {
        0.5
    } else {
        sum / count as f64
    }
}
