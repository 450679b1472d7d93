//! Pairwise incident correlation.
//!
//! Two incidents correlate through up to four signals, and each signal
//! contributes only when it applies:
//!
//! | signal      | weight | applies when                                   |
//! |-------------|--------|------------------------------------------------|
//! | temporal    | 0.3    | less than 60s apart                            |
//! | dependency  | 0.4    | `b`'s service is a learned dependency of `a`'s |
//! | metrics     | 0.3    | always                                         |
//! | same node   | 0.1    | both on one node                               |

use std::collections::BTreeMap;

use chrono::Duration;

use crate::analysis::{IncidentEvent, IncidentStore, TopologyLearner};

const TEMPORAL_WINDOW_SECS: f64 = 60.0;
const DEPENDENCY_MIN_CONFIDENCE: f64 = 0.4;
const DEPENDENCY_SCORE: f64 = 0.7;
const SAME_NODE_SCORE: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct CorrelationEngine {
    window: Duration,
    min_confidence: f64,
}

impl CorrelationEngine {
    pub fn new(window: Duration, min_confidence: f64) -> Self {
        Self {
            window,
            min_confidence,
        }
    }

    /// Stored incidents within the window of `incident` whose correlation
    /// strictly exceeds the minimum confidence, ordered by timestamp then
    /// severity.
    pub fn related<'a>(
        &self,
        incident: &IncidentEvent,
        store: &'a IncidentStore,
        topology: &TopologyLearner,
    ) -> Vec<&'a IncidentEvent> {
        let mut related: Vec<&IncidentEvent> = store
            .iter()
            .filter(|other| other.event_id != incident.event_id)
            .filter(|other| {
                (incident.timestamp - other.timestamp).num_milliseconds().abs()
                    <= self.window.num_milliseconds()
            })
            .filter(|other| correlation(incident, other, topology) > self.min_confidence)
            .collect();
        related.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.severity.cmp(&b.severity))
        });
        related
    }
}

/// Correlation of `a` with `b` in [0, 1], averaged over applicable signals.
pub fn correlation(a: &IncidentEvent, b: &IncidentEvent, topology: &TopologyLearner) -> f64 {
    let mut score = 0.0;
    let mut weights = 0.0;

    // 1. Temporal proximity.
    let gap = (a.timestamp - b.timestamp).num_milliseconds().abs() as f64 / 1000.0;
    if gap < TEMPORAL_WINDOW_SECS {
        score += (1.0 - gap / TEMPORAL_WINDOW_SECS) * 0.3;
        weights += 0.3;
    }

    // 2. Learned service dependency.
    if let (Some(service_a), Some(service_b)) = (a.service_id.as_deref(), b.service_id.as_deref()) {
        if topology
            .likely_dependencies(service_a, DEPENDENCY_MIN_CONFIDENCE)
            .contains(service_b)
        {
            score += DEPENDENCY_SCORE * 0.4;
            weights += 0.4;
        }
    }

    // 3. Metric co-movement.
    score += metric_correlation(&a.metrics, &b.metrics) * 0.3;
    weights += 0.3;

    // 4. Same node.
    if a.node_id == b.node_id {
        score += SAME_NODE_SCORE * 0.1;
        weights += 0.1;
    }

    (score / weights).clamp(0.0, 1.0)
}

/// Average agreement over shared metric keys.
///
/// Both above 70 or both below 30 scores 0.8, the same side of 50 scores
/// 0.5, anything else 0. No shared keys scores 0.
pub fn metric_correlation(a: &BTreeMap<String, f64>, b: &BTreeMap<String, f64>) -> f64 {
    let scores: Vec<f64> = a
        .iter()
        .filter_map(|(key, &v1)| b.get(key).map(|&v2| (v1, v2)))
        .map(|(v1, v2)| {
            if (v1 > 70.0 && v2 > 70.0) || (v1 < 30.0 && v2 < 30.0) {
                0.8
            } else if (v1 > 50.0) == (v2 > 50.0) {
                0.5
            } else {
                0.0
            }
        })
        .collect();

    if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    }
}
