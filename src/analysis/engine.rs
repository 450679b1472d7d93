use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Duration;
use tracing::{debug, error, info};

use crate::analysis::correlation::CorrelationEngine;
use crate::analysis::dedup::{DedupVerdict, Deduplicator};
use crate::analysis::knowledge::KnowledgeBase;
use crate::analysis::ranker::{self, RecurrenceTracker, RootCauseRanker};
use crate::analysis::{
    AnalysisError, AnalysisStatus, CausalAnalysisResult, EventLink, IncidentEvent, IncidentStore,
    TopologyLearner,
};
use crate::config::AnalysisConfig;
use crate::monitor::MetricsRecorder;

const MAX_EVENT_CHAIN: usize = 10;
const MAX_WINDOW_SECS: u64 = 365 * 24 * 3600;

/// Owns every piece of analysis state: stored incidents, deduplication
/// history, learned topology, recurrence history and cached results.
///
/// Not thread-safe; callers serialize access (see `pipeline::worker`).
pub struct CausalEngine {
    enable_deduplication: bool,
    enable_topology_learning: bool,
    store: IncidentStore,
    deduplicator: Deduplicator,
    topology: TopologyLearner,
    knowledge: KnowledgeBase,
    correlation: CorrelationEngine,
    ranker: RootCauseRanker,
    recurrence: RecurrenceTracker,
    results: HashMap<String, CausalAnalysisResult>,
    recorder: Arc<dyn MetricsRecorder>,
}

impl CausalEngine {
    pub fn new(config: &AnalysisConfig, recorder: Arc<dyn MetricsRecorder>) -> Self {
        let window = Duration::seconds(config.correlation_window_secs.min(MAX_WINDOW_SECS) as i64);
        let knowledge = KnowledgeBase::with_extra_rules(config.extra_rules.iter().cloned());

        info!(
            window_secs = config.correlation_window_secs,
            min_confidence = config.min_confidence,
            dedup = config.enable_deduplication,
            topology_learning = config.enable_topology_learning,
            rules = knowledge.rules().len(),
            "causal engine initialized"
        );

        Self {
            enable_deduplication: config.enable_deduplication,
            enable_topology_learning: config.enable_topology_learning,
            store: IncidentStore::new(config.max_incidents),
            deduplicator: Deduplicator::new(window, config.dedup_threshold, config.dedup_history_cap),
            topology: TopologyLearner::new(),
            knowledge,
            correlation: CorrelationEngine::new(window, config.min_confidence),
            ranker: RootCauseRanker::new(config.min_confidence),
            recurrence: RecurrenceTracker::new(),
            results: HashMap::new(),
            recorder,
        }
    }

    /// Submit an incident. Unique incidents are stored for analysis;
    /// duplicates are reported with the id of the incident they repeat.
    pub fn add_incident(&mut self, incident: IncidentEvent) -> DedupVerdict {
        if self.enable_deduplication {
            let verdict = self.deduplicator.check(&incident);
            if let DedupVerdict::Duplicate { original_id } = &verdict {
                info!(
                    incident = %incident.event_id,
                    original = %original_id,
                    "incident is a duplicate"
                );
                return verdict;
            }
        }

        self.recurrence.record(&incident);
        if let Some(evicted) = self.store.insert(incident) {
            debug!(incident = %evicted.event_id, "incident evicted from store");
            self.results.remove(&evicted.event_id);
        }
        DedupVerdict::Unique
    }

    /// Run root cause analysis for a stored incident and cache the result.
    pub fn analyze(&mut self, incident_id: &str) -> Result<CausalAnalysisResult, AnalysisError> {
        let start = Instant::now();

        let Some(incident) = self.store.get(incident_id) else {
            error!(incident = incident_id, "incident not found");
            return Err(AnalysisError::IncidentNotFound(incident_id.to_string()));
        };

        // 1. Related incidents.
        let related = self.correlation.related(incident, &self.store, &self.topology);

        // 2. Learn topology before ranking so this incident's edges count.
        if self.enable_topology_learning {
            self.topology.update(incident, &related);
        }

        // 3. Rank candidates.
        let root_causes = self
            .ranker
            .rank(incident, &related, &self.knowledge, &self.recurrence);
        let confidence = ranker::overall_confidence(&root_causes);

        // 4. Event chain.
        let mut chain: Vec<&IncidentEvent> = std::iter::once(incident)
            .chain(related.iter().copied())
            .collect();
        chain.sort_by_key(|i| i.timestamp);
        let event_chain = chain
            .into_iter()
            .take(MAX_EVENT_CHAIN)
            .map(|i| EventLink {
                node_id: i.node_id.clone(),
                anomaly_type: i.anomaly_type.clone(),
            })
            .collect();

        let status = if root_causes.is_empty() {
            AnalysisStatus::NoRootCause
        } else {
            AnalysisStatus::Identified
        };
        let result = CausalAnalysisResult {
            incident_id: incident_id.to_string(),
            status,
            primary_root_cause: root_causes.first().cloned(),
            root_causes,
            analysis_time_ms: start.elapsed().as_secs_f64() * 1000.0,
            confidence,
            event_chain,
            is_duplicate: false,
            duplicate_of: None,
        };

        info!(
            incident = incident_id,
            root_causes = result.root_causes.len(),
            related = related.len(),
            confidence = result.confidence,
            elapsed_ms = result.analysis_time_ms,
            "causal analysis complete"
        );
        self.recorder
            .record_analysis(result.analysis_time_ms, result.root_causes.len(), result.confidence);

        self.results.insert(incident_id.to_string(), result.clone());
        Ok(result)
    }

    /// Cached analysis for an incident, if it has been analyzed and not
    /// evicted.
    pub fn result(&self, incident_id: &str) -> Option<&CausalAnalysisResult> {
        self.results.get(incident_id)
    }

    pub fn incident(&self, incident_id: &str) -> Option<&IncidentEvent> {
        self.store.get(incident_id)
    }

    pub fn incidents(&self) -> &IncidentStore {
        &self.store
    }

    pub fn topology(&self) -> &TopologyLearner {
        &self.topology
    }
}
