//! Root cause candidate generation and ranking.
//!
//! Candidates come from four sources: knowledge-base rule matches,
//! recurrence at a regular cadence, failures of services the incident's
//! service runs alongside, and a generic cascade heuristic. Candidates under
//! the minimum confidence are dropped and the top five are kept.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};

use crate::analysis::knowledge::KnowledgeBase;
use crate::analysis::{window_start, IncidentEvent, RootCause, RootCauseType};

pub const MAX_ROOT_CAUSES: usize = 5;
const CONFIDENCE_WEIGHTS: [f64; 3] = [0.5, 0.3, 0.2];

const RECURRENCE_MIN_OCCURRENCES: usize = 3;
const RECURRENCE_REGULARITY: f64 = 0.3;
const RECURRENCE_CONFIDENCE: f64 = 0.7;
const DEPENDENCY_CONFIDENCE: f64 = 0.7;
const MAX_DEPENDENCY_CAUSES: usize = 2;
const CASCADE_MIN_INCIDENTS: usize = 3;
const CASCADE_MIN_LAG_SECS: i64 = 5;
const CASCADE_CONFIDENCE: f64 = 0.6;

fn recurrence_horizon() -> Duration {
    Duration::hours(24)
}

// ---------------------------------------------------------------------------
// Recurrence tracking
// ---------------------------------------------------------------------------

/// Occurrence timestamps per `(node_id, anomaly_type)`, pruned to 24h.
#[derive(Debug, Default)]
pub struct RecurrenceTracker {
    occurrences: HashMap<String, VecDeque<DateTime<Utc>>>,
}

impl RecurrenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(incident: &IncidentEvent) -> String {
        format!("{}:{}", incident.node_id, incident.anomaly_type)
    }

    /// Record an occurrence, dropping those more than 24h older than the
    /// newest one kept. Keys whose newest occurrence is more than 24h older
    /// than this incident are forgotten.
    pub fn record(&mut self, incident: &IncidentEvent) {
        let horizon_start = window_start(incident.timestamp, recurrence_horizon());
        self.occurrences
            .retain(|_, times| times.back().is_some_and(|t| *t > horizon_start));

        let times = self.occurrences.entry(Self::key(incident)).or_default();
        let pos = times.partition_point(|t| *t <= incident.timestamp);
        times.insert(pos, incident.timestamp);

        if let Some(&newest) = times.back() {
            let cutoff = window_start(newest, recurrence_horizon());
            while times.front().is_some_and(|t| *t <= cutoff) {
                times.pop_front();
            }
        }
    }

    /// Occurrences of the incident's key in the 24h up to its timestamp,
    /// oldest first.
    pub fn recent(&self, incident: &IncidentEvent) -> Vec<DateTime<Utc>> {
        let cutoff = window_start(incident.timestamp, recurrence_horizon());
        self.occurrences
            .get(&Self::key(incident))
            .map(|times| {
                times
                    .iter()
                    .copied()
                    .filter(|t| *t > cutoff && *t <= incident.timestamp)
                    .collect()
            })
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RootCauseRanker {
    min_confidence: f64,
}

impl RootCauseRanker {
    pub fn new(min_confidence: f64) -> Self {
        Self { min_confidence }
    }

    /// Ranked root causes for `incident`, highest confidence first.
    ///
    /// `related` must be in ascending timestamp order.
    pub fn rank(
        &self,
        incident: &IncidentEvent,
        related: &[&IncidentEvent],
        knowledge: &KnowledgeBase,
        recurrence: &RecurrenceTracker,
    ) -> Vec<RootCause> {
        let mut causes = knowledge_causes(incident, knowledge);
        causes.extend(recurrence_cause(incident, recurrence));
        causes.extend(dependency_causes(incident, related));
        causes.extend(cascade_cause(incident, related));

        causes.retain(|c| c.confidence >= self.min_confidence);
        causes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        causes.truncate(MAX_ROOT_CAUSES);
        causes
    }
}

/// Weighted mean of the top three confidences with weights 0.5/0.3/0.2,
/// renormalized over the weights actually used.
pub fn overall_confidence(root_causes: &[RootCause]) -> f64 {
    let (sum, weight) = root_causes
        .iter()
        .zip(CONFIDENCE_WEIGHTS)
        .fold((0.0, 0.0), |(sum, weight), (rc, w)| {
            (sum + rc.confidence * w, weight + w)
        });
    if weight > 0.0 {
        (sum / weight).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn knowledge_causes(incident: &IncidentEvent, knowledge: &KnowledgeBase) -> Vec<RootCause> {
    knowledge
        .evaluate(&incident.metrics)
        .into_iter()
        .map(|m| RootCause {
            root_cause_id: format!("{}_{}", incident.event_id, m.rule.rule_id),
            event_id: incident.event_id.clone(),
            node_id: incident.node_id.clone(),
            cause_type: m.rule.cause_type,
            confidence: m.confidence,
            contributing_factors: vec![m.explanation.clone()],
            explanation: m.explanation,
            remediation_suggestions: m.rule.remediation_suggestions.clone(),
            temporal_pattern: None,
            affected_services: Vec::new(),
        })
        .collect()
}

fn recurrence_cause(incident: &IncidentEvent, recurrence: &RecurrenceTracker) -> Option<RootCause> {
    let recent = recurrence.recent(incident);
    if recent.len() < RECURRENCE_MIN_OCCURRENCES {
        return None;
    }

    let intervals: Vec<f64> = recent
        .windows(2)
        .map(|w| (w[1] - w[0]).num_milliseconds() as f64 / 1000.0)
        .collect();
    let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
    let variance = intervals.iter().map(|i| (i - mean).powi(2)).sum::<f64>() / intervals.len() as f64;
    let std_dev = variance.sqrt();

    if std_dev >= mean * RECURRENCE_REGULARITY {
        return None;
    }

    Some(RootCause {
        root_cause_id: format!("{}_pattern", incident.event_id),
        event_id: incident.event_id.clone(),
        node_id: incident.node_id.clone(),
        cause_type: RootCauseType::ConfigurationError,
        confidence: RECURRENCE_CONFIDENCE,
        explanation: format!("Recurring issue pattern detected (every {mean:.0}s)"),
        contributing_factors: vec![
            format!("Issue occurred {} times in 24h", recent.len()),
            format!("Regular interval: {mean:.0}±{std_dev:.0}s"),
        ],
        remediation_suggestions: vec![
            "Check for scheduled tasks or timers".to_string(),
            "Review cron jobs and scheduled services".to_string(),
            "Look for periodic garbage collection or log rotation".to_string(),
        ],
        temporal_pattern: Some(format!("every {mean:.0}s")),
        affected_services: Vec::new(),
    })
}

/// Earlier service failures among the related incidents, attributed as
/// cascades into this incident's service.
fn dependency_causes(incident: &IncidentEvent, related: &[&IncidentEvent]) -> Vec<RootCause> {
    let Some(service_id) = incident.service_id.as_deref() else {
        return Vec::new();
    };

    related
        .iter()
        .filter(|r| r.timestamp < incident.timestamp)
        .filter_map(|r| Some((r, r.service_id.as_deref()?)))
        .take(MAX_DEPENDENCY_CAUSES)
        .map(|(r, upstream)| RootCause {
            root_cause_id: format!("{}_dep_{}", incident.event_id, upstream),
            event_id: incident.event_id.clone(),
            node_id: r.node_id.clone(),
            cause_type: RootCauseType::CascadingFailure,
            confidence: DEPENDENCY_CONFIDENCE,
            explanation: format!("Cascading failure from dependent service {upstream}"),
            contributing_factors: vec![
                format!("Service {upstream} failed first"),
                format!("Service {service_id} depends on it"),
            ],
            remediation_suggestions: vec![
                format!("Restart service {upstream}"),
                format!("Monitor service {upstream} for stability"),
                "Consider adding redundancy".to_string(),
            ],
            temporal_pattern: None,
            affected_services: vec![upstream.to_string()],
        })
        .collect()
}

fn cascade_cause(incident: &IncidentEvent, related: &[&IncidentEvent]) -> Option<RootCause> {
    let total = related.len() + 1;
    if related.is_empty() || total < CASCADE_MIN_INCIDENTS {
        return None;
    }

    let first = related
        .iter()
        .copied()
        .chain(std::iter::once(incident))
        .min_by_key(|i| i.timestamp)?;
    if incident.timestamp - first.timestamp <= Duration::seconds(CASCADE_MIN_LAG_SECS) {
        return None;
    }

    Some(RootCause {
        root_cause_id: format!("{}_cascade", incident.event_id),
        event_id: incident.event_id.clone(),
        node_id: first.node_id.clone(),
        cause_type: RootCauseType::CascadingFailure,
        confidence: CASCADE_CONFIDENCE,
        explanation: format!("Part of cascading failure starting from {}", first.node_id),
        contributing_factors: vec![
            format!("Initial failure on {}", first.node_id),
            format!("{total} related incidents detected"),
        ],
        remediation_suggestions: vec![
            format!("Fix root cause on {}", first.node_id),
            "Implement failure isolation mechanisms".to_string(),
            "Add circuit breakers to prevent cascade".to_string(),
        ],
        temporal_pattern: None,
        affected_services: Vec::new(),
    })
}
