//! Detection to root cause pipeline.
//!
//! [`Pipeline::process`] takes one telemetry sample through detection,
//! incident creation, deduplication, causal analysis and recommendation
//! bucketing, and returns an [`IntegratedResult`] for the remediation
//! executor. Use [`worker::PipelineHandle`] to drive a pipeline from async
//! code.

pub mod recommend;
pub mod worker;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analysis::{
    CausalAnalysisResult, CausalEngine, DedupVerdict, IncidentEvent, RootCause, RootCauseType,
};
use crate::config::MeshMedicConfig;
use crate::detect::{
    DetectError, DetectionResult, Detector, HealthReport, Neighbor, NodeFeatures, Severity,
};
use crate::monitor::MetricsRecorder;

pub use recommend::Recommendations;
pub use worker::PipelineHandle;

const MAX_SUMMARIES: usize = 3;
const RECENT_IN_REPORT: usize = 10;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no analysis recorded for incident {0}")]
    UnknownIncident(String),

    #[error("pipeline worker has stopped")]
    WorkerStopped,

    #[error("invalid detection configuration: {0}")]
    InvalidConfig(#[from] DetectError),

    #[error("failed to serialize result: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Input / output types
// ---------------------------------------------------------------------------

/// One telemetry observation for a node and its neighborhood.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub node_id: String,
    #[serde(default)]
    pub features: NodeFeatures,
    #[serde(default)]
    pub neighbors: Vec<Neighbor>,
    #[serde(default)]
    pub service_id: Option<String>,
    /// Total nodes in the mesh, when known.
    #[serde(default)]
    pub network_size: Option<usize>,
    /// Fold this sample and its neighbors into the baseline.
    #[serde(default)]
    pub update_baseline: bool,
    /// Observation time; defaults to the time of processing.
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
}

impl TelemetrySample {
    pub fn new(node_id: impl Into<String>, features: NodeFeatures) -> Self {
        Self {
            node_id: node_id.into(),
            features,
            neighbors: Vec::new(),
            service_id: None,
            network_size: None,
            update_baseline: false,
            observed_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    /// No anomaly; no incident was created.
    Normal,
    /// A new incident was analyzed.
    Analyzed,
    /// Repeat of an incident whose analysis is returned.
    DuplicateCached,
    /// Repeat of an incident with no cached analysis; nothing was analyzed.
    DuplicateUncached,
}

/// Coarse severity for dashboards; `normal` when nothing was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityLabel {
    Normal,
    Low,
    Medium,
    High,
    Critical,
}

impl SeverityLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeverityLabel::Normal => "normal",
            SeverityLabel::Low => "low",
            SeverityLabel::Medium => "medium",
            SeverityLabel::High => "high",
            SeverityLabel::Critical => "critical",
        }
    }
}

impl From<Severity> for SeverityLabel {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Low => SeverityLabel::Low,
            Severity::Medium => SeverityLabel::Medium,
            Severity::High => SeverityLabel::High,
            Severity::Critical => SeverityLabel::Critical,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootCauseSummary {
    #[serde(rename = "type")]
    pub cause_type: RootCauseType,
    pub confidence: f64,
    pub explanation: String,
    pub factors: Vec<String>,
    pub suggestions: Vec<String>,
}

impl From<&RootCause> for RootCauseSummary {
    fn from(rc: &RootCause) -> Self {
        Self {
            cause_type: rc.cause_type,
            confidence: rc.confidence,
            explanation: rc.explanation.clone(),
            factors: rc.contributing_factors.clone(),
            suggestions: rc.remediation_suggestions.clone(),
        }
    }
}

/// Detection and analysis outcome for one sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegratedResult {
    /// Absent when no anomaly was detected.
    pub incident_id: Option<String>,
    pub node_id: String,
    pub status: PipelineStatus,
    pub is_anomaly: bool,
    pub anomaly_score: f64,
    pub anomaly_confidence: f64,
    pub anomaly_explanation: String,
    pub detection_method: String,
    pub root_causes: Vec<RootCauseSummary>,
    pub primary_root_cause: Option<RootCauseSummary>,
    pub causal_confidence: f64,
    pub immediate_actions: Vec<String>,
    pub investigation_steps: Vec<String>,
    pub long_term_fixes: Vec<String>,
    pub is_duplicate: bool,
    pub duplicate_of: Option<String>,
    pub detection_timestamp: DateTime<Utc>,
    pub analysis_timestamp: Option<DateTime<Utc>>,
    pub total_latency_ms: f64,
    pub severity: SeverityLabel,
}

// ---------------------------------------------------------------------------
// Report / export types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PipelineReport {
    NoAnalyses {
        message: String,
    },
    #[serde(rename = "ok")]
    Summary {
        summary: ReportSummary,
        root_cause_distribution: BTreeMap<RootCauseType, usize>,
        average_causal_confidence: f64,
        recent_incidents: Vec<RecentIncident>,
        detector: HealthReport,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub total_incidents: usize,
    pub critical_severity: usize,
    pub high_severity: usize,
    pub average_latency_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentIncident {
    pub incident_id: String,
    pub node_id: String,
    pub severity: SeverityLabel,
    pub root_cause: Option<String>,
}

#[derive(Serialize)]
struct IncidentExport<'a> {
    incident_id: &'a str,
    node_id: &'a str,
    severity: SeverityLabel,
    detection: DetectionSection<'a>,
    analysis: AnalysisSection<'a>,
    recommendations: RecommendationSection<'a>,
    timing: TimingSection,
}

#[derive(Serialize)]
struct DetectionSection<'a> {
    is_anomaly: bool,
    anomaly_score: f64,
    confidence: f64,
    explanation: &'a str,
    method: &'a str,
}

#[derive(Serialize)]
struct AnalysisSection<'a> {
    root_causes: &'a [RootCauseSummary],
    primary_root_cause: Option<&'a RootCauseSummary>,
    causal_confidence: f64,
}

#[derive(Serialize)]
struct RecommendationSection<'a> {
    immediate: &'a [String],
    investigation: &'a [String],
    long_term: &'a [String],
}

#[derive(Serialize)]
struct TimingSection {
    detection_timestamp: DateTime<Utc>,
    analysis_timestamp: Option<DateTime<Utc>>,
    total_latency_ms: f64,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Owns the detector, the causal engine and the cache of integrated
/// results.
pub struct Pipeline {
    detection_method: String,
    detector: Detector,
    engine: CausalEngine,
    completed: HashMap<String, IntegratedResult>,
    completed_order: VecDeque<String>,
    capacity: usize,
}

impl Pipeline {
    pub fn new(
        config: &MeshMedicConfig,
        recorder: Arc<dyn MetricsRecorder>,
    ) -> Result<Self, PipelineError> {
        let detector = Detector::new(config.detection.clone(), recorder.clone())?;
        let engine = CausalEngine::new(&config.analysis, recorder);
        Ok(Self {
            detection_method: config.pipeline.detection_method.clone(),
            detector,
            engine,
            completed: HashMap::new(),
            completed_order: VecDeque::new(),
            capacity: config.analysis.max_incidents.max(1),
        })
    }

    /// Run one sample through detection and, when anomalous, analysis.
    pub fn process(&mut self, sample: TelemetrySample) -> IntegratedResult {
        let start = Instant::now();
        let observed_at = sample.observed_at.unwrap_or_else(Utc::now);

        // 1. Detection
        let detection = self.detector.detect(
            &sample.node_id,
            &sample.features,
            &sample.neighbors,
            sample.network_size,
            sample.update_baseline,
            observed_at,
        );
        if !detection.is_anomaly {
            debug!(node_id = %sample.node_id, score = detection.anomaly_score, "sample normal");
            return self.normal_result(&sample, &detection, observed_at, start);
        }

        // 2. Incident
        let severity = Severity::from_score(detection.anomaly_score);
        let incident = self.build_incident(&sample, &detection, severity, observed_at);
        let incident_id = incident.event_id.clone();

        // 3. Deduplication
        if let DedupVerdict::Duplicate { original_id } = self.engine.add_incident(incident) {
            return match self.completed.get(&original_id) {
                Some(cached) => {
                    debug!(incident = %incident_id, original = %original_id, "returning cached analysis");
                    let mut result = cached.clone();
                    result.status = PipelineStatus::DuplicateCached;
                    result.is_duplicate = true;
                    result.duplicate_of = Some(original_id);
                    result
                }
                None => {
                    info!(
                        incident = %incident_id,
                        original = %original_id,
                        "duplicate of an incident with no cached analysis"
                    );
                    self.uncached_duplicate(&sample, &detection, severity, original_id, observed_at, start)
                }
            };
        }

        // 4. Causal analysis
        let analysis = match self.engine.analyze(&incident_id) {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!(incident = %incident_id, error = %e, "analysis unavailable");
                CausalAnalysisResult::unexplained(incident_id.clone())
            }
        };

        // 5. Recommendations and result
        let result = self.analyzed_result(&sample, &detection, severity, &analysis, observed_at, start);
        info!(
            incident = %incident_id,
            node_id = %sample.node_id,
            severity = %severity,
            root_causes = analysis.root_causes.len(),
            latency_ms = result.total_latency_ms,
            "incident analyzed"
        );
        self.cache(incident_id, result.clone());
        result
    }

    /// Cached result for an analyzed incident.
    pub fn result(&self, incident_id: &str) -> Option<&IntegratedResult> {
        self.completed.get(incident_id)
    }

    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    pub fn engine(&self) -> &CausalEngine {
        &self.engine
    }

    /// Aggregate statistics over cached analyses.
    pub fn report(&self) -> PipelineReport {
        if self.completed.is_empty() {
            return PipelineReport::NoAnalyses {
                message: "No analyses completed yet".to_string(),
            };
        }

        let results: Vec<&IntegratedResult> = self
            .completed_order
            .iter()
            .filter_map(|id| self.completed.get(id))
            .collect();
        let total = results.len();

        let mut distribution = BTreeMap::new();
        for r in &results {
            for rc in &r.root_causes {
                *distribution.entry(rc.cause_type).or_insert(0) += 1;
            }
        }

        let confidences: Vec<f64> = results
            .iter()
            .map(|r| r.causal_confidence)
            .filter(|&c| c > 0.0)
            .collect();
        let average_causal_confidence = if confidences.is_empty() {
            0.0
        } else {
            confidences.iter().sum::<f64>() / confidences.len() as f64
        };

        PipelineReport::Summary {
            summary: ReportSummary {
                total_incidents: total,
                critical_severity: results
                    .iter()
                    .filter(|r| r.severity == SeverityLabel::Critical)
                    .count(),
                high_severity: results
                    .iter()
                    .filter(|r| r.severity == SeverityLabel::High)
                    .count(),
                average_latency_ms: results.iter().map(|r| r.total_latency_ms).sum::<f64>()
                    / total as f64,
            },
            root_cause_distribution: distribution,
            average_causal_confidence,
            recent_incidents: results
                .iter()
                .skip(total.saturating_sub(RECENT_IN_REPORT))
                .map(|r| RecentIncident {
                    incident_id: r.incident_id.clone().unwrap_or_default(),
                    node_id: r.node_id.clone(),
                    severity: r.severity,
                    root_cause: r.primary_root_cause.as_ref().map(|p| p.explanation.clone()),
                })
                .collect(),
            detector: self.detector.health_report(),
        }
    }

    /// Pretty JSON document describing one analyzed incident.
    pub fn export_json(&self, incident_id: &str) -> Result<String, PipelineError> {
        let r = self
            .completed
            .get(incident_id)
            .ok_or_else(|| PipelineError::UnknownIncident(incident_id.to_string()))?;

        let doc = IncidentExport {
            incident_id,
            node_id: &r.node_id,
            severity: r.severity,
            detection: DetectionSection {
                is_anomaly: r.is_anomaly,
                anomaly_score: r.anomaly_score,
                confidence: r.anomaly_confidence,
                explanation: &r.anomaly_explanation,
                method: &r.detection_method,
            },
            analysis: AnalysisSection {
                root_causes: &r.root_causes,
                primary_root_cause: r.primary_root_cause.as_ref(),
                causal_confidence: r.causal_confidence,
            },
            recommendations: RecommendationSection {
                immediate: &r.immediate_actions,
                investigation: &r.investigation_steps,
                long_term: &r.long_term_fixes,
            },
            timing: TimingSection {
                detection_timestamp: r.detection_timestamp,
                analysis_timestamp: r.analysis_timestamp,
                total_latency_ms: r.total_latency_ms,
            },
        };
        Ok(serde_json::to_string_pretty(&doc)?)
    }

    // -- helpers ------------------------------------------------------------

    fn build_incident(
        &self,
        sample: &TelemetrySample,
        detection: &DetectionResult,
        severity: Severity,
        observed_at: DateTime<Utc>,
    ) -> IncidentEvent {
        let mut metrics = sample.features.metrics();
        metrics.insert("anomaly_score".to_string(), detection.anomaly_score);
        metrics.insert("confidence".to_string(), detection.confidence);

        IncidentEvent {
            event_id: Uuid::new_v4().to_string(),
            timestamp: observed_at,
            node_id: sample.node_id.clone(),
            service_id: sample.service_id.clone(),
            anomaly_type: detection.anomaly_type().to_string(),
            severity,
            metrics,
            detected_by: self.detection_method.clone(),
            anomaly_score: detection.anomaly_score,
            description: Some(detection.explanation.clone()),
        }
    }

    fn base_result(
        &self,
        sample: &TelemetrySample,
        detection: &DetectionResult,
        observed_at: DateTime<Utc>,
    ) -> IntegratedResult {
        IntegratedResult {
            incident_id: None,
            node_id: sample.node_id.clone(),
            status: PipelineStatus::Normal,
            is_anomaly: detection.is_anomaly,
            anomaly_score: detection.anomaly_score,
            anomaly_confidence: detection.confidence,
            anomaly_explanation: detection.explanation.clone(),
            detection_method: self.detection_method.clone(),
            root_causes: Vec::new(),
            primary_root_cause: None,
            causal_confidence: 0.0,
            immediate_actions: Vec::new(),
            investigation_steps: Vec::new(),
            long_term_fixes: Vec::new(),
            is_duplicate: false,
            duplicate_of: None,
            detection_timestamp: observed_at,
            analysis_timestamp: None,
            total_latency_ms: 0.0,
            severity: SeverityLabel::Normal,
        }
    }

    fn normal_result(
        &self,
        sample: &TelemetrySample,
        detection: &DetectionResult,
        observed_at: DateTime<Utc>,
        start: Instant,
    ) -> IntegratedResult {
        let mut result = self.base_result(sample, detection, observed_at);
        result.total_latency_ms = elapsed_ms(start);
        result
    }

    fn uncached_duplicate(
        &self,
        sample: &TelemetrySample,
        detection: &DetectionResult,
        severity: Severity,
        original_id: String,
        observed_at: DateTime<Utc>,
        start: Instant,
    ) -> IntegratedResult {
        let mut result = self.base_result(sample, detection, observed_at);
        result.incident_id = Some(original_id.clone());
        result.status = PipelineStatus::DuplicateUncached;
        result.is_duplicate = true;
        result.duplicate_of = Some(original_id);
        result.severity = severity.into();
        result.total_latency_ms = elapsed_ms(start);
        result
    }

    fn analyzed_result(
        &self,
        sample: &TelemetrySample,
        detection: &DetectionResult,
        severity: Severity,
        analysis: &CausalAnalysisResult,
        observed_at: DateTime<Utc>,
        start: Instant,
    ) -> IntegratedResult {
        let recs = analysis
            .primary_root_cause
            .as_ref()
            .map(|rc| recommend::categorize(&rc.remediation_suggestions))
            .unwrap_or_default();

        let mut result = self.base_result(sample, detection, observed_at);
        result.incident_id = Some(analysis.incident_id.clone());
        result.status = PipelineStatus::Analyzed;
        result.root_causes = analysis
            .root_causes
            .iter()
            .take(MAX_SUMMARIES)
            .map(RootCauseSummary::from)
            .collect();
        result.primary_root_cause = analysis.primary_root_cause.as_ref().map(RootCauseSummary::from);
        result.causal_confidence = analysis.confidence;
        result.immediate_actions = recs.immediate;
        result.investigation_steps = recs.investigation;
        result.long_term_fixes = recs.long_term;
        result.analysis_timestamp = Some(Utc::now());
        result.severity = severity.into();
        result.total_latency_ms = elapsed_ms(start);
        result
    }

    fn cache(&mut self, incident_id: String, result: IntegratedResult) {
        if self.completed.insert(incident_id.clone(), result).is_none() {
            self.completed_order.push_back(incident_id);
        }
        while self.completed_order.len() > self.capacity {
            if let Some(oldest) = self.completed_order.pop_front() {
                self.completed.remove(&oldest);
            }
        }
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::monitor::testing::CapturingRecorder;
    use crate::monitor::NoopRecorder;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(secs)
    }

    fn pipeline() -> Pipeline {
        Pipeline::new(&MeshMedicConfig::default(), Arc::new(NoopRecorder)).unwrap()
    }

    fn healthy_features() -> NodeFeatures {
        NodeFeatures {
            rssi: Some(-70.0),
            loss_rate: Some(0.01),
            latency: Some(50.0),
            cpu_percent: Some(30.0),
            memory_percent: Some(40.0),
            ..Default::default()
        }
    }

    fn degraded_features() -> NodeFeatures {
        NodeFeatures {
            rssi: Some(-95.0),
            loss_rate: Some(0.12),
            latency: Some(400.0),
            cpu_percent: Some(97.0),
            memory_percent: Some(92.0),
            ..Default::default()
        }
    }

    fn neighbors() -> Vec<Neighbor> {
        (0..2)
            .map(|i| {
                Neighbor::new(
                    format!("node-{i:02}"),
                    NodeFeatures {
                        rssi: Some(-68.0),
                        loss_rate: Some(0.01),
                        ..Default::default()
                    },
                )
            })
            .collect()
    }

    fn degraded_sample(secs: i64) -> TelemetrySample {
        TelemetrySample {
            neighbors: neighbors(),
            network_size: Some(10),
            observed_at: Some(at(secs)),
            ..TelemetrySample::new("node-42", degraded_features())
        }
    }

    #[test]
    fn test_normal_sample() {
        let mut p = pipeline();
        let sample = TelemetrySample {
            neighbors: neighbors(),
            network_size: Some(3),
            ..TelemetrySample::new("node-01", healthy_features())
        };
        let r = p.process(sample);
        assert_eq!(r.status, PipelineStatus::Normal);
        assert!(!r.is_anomaly);
        assert!(r.incident_id.is_none());
        assert_eq!(r.severity, SeverityLabel::Normal);
        assert!(r.root_causes.is_empty());
        assert!(matches!(p.report(), PipelineReport::NoAnalyses { .. }));
    }

    #[test]
    fn test_degraded_sample_is_analyzed() {
        let mut p = pipeline();
        let r = p.process(degraded_sample(0));

        assert_eq!(r.status, PipelineStatus::Analyzed);
        assert!(r.is_anomaly);
        assert_eq!(r.severity, SeverityLabel::Critical);
        let primary = r.primary_root_cause.as_ref().expect("primary root cause");
        assert_eq!(primary.cause_type, RootCauseType::ResourceExhaustion);
        assert_eq!(primary.confidence, 0.9);
        assert!(r.root_causes.len() <= 3);
        assert!(!r.immediate_actions.is_empty());
        assert!(r.immediate_actions.len() <= 3);
        assert!(r.investigation_steps.len() <= 3);
        assert!(r.long_term_fixes.len() <= 3);
        assert!((0.0..=1.0).contains(&r.causal_confidence));

        let id = r.incident_id.clone().unwrap();
        assert!(p.result(&id).is_some());
        let incident = p.engine().incident(&id).unwrap();
        assert_eq!(incident.anomaly_type, "low_signal_strength");
        assert_eq!(incident.metrics["cpu_percent"], 97.0);
        assert!(incident.metrics.contains_key("anomaly_score"));
    }

    #[test]
    fn test_repeat_returns_cached_analysis() {
        let mut p = pipeline();
        let first = p.process(degraded_sample(0));
        let second = p.process(degraded_sample(30));

        assert_eq!(second.status, PipelineStatus::DuplicateCached);
        assert!(second.is_duplicate);
        assert_eq!(second.duplicate_of, first.incident_id);
        assert_eq!(second.incident_id, first.incident_id);
        assert_eq!(second.primary_root_cause, first.primary_root_cause);
        assert_eq!(p.engine().incidents().len(), 1);
    }

    #[test]
    fn test_repeat_after_cache_eviction_is_uncached() {
        let mut config = MeshMedicConfig::default();
        config.analysis.max_incidents = 1;
        let mut p = Pipeline::new(&config, Arc::new(NoopRecorder)).unwrap();

        let first = p.process(degraded_sample(0));
        // A different node evicts the first analysis from the result cache.
        let mut other = degraded_sample(5);
        other.node_id = "node-77".to_string();
        p.process(other);
        assert!(p.result(first.incident_id.as_deref().unwrap()).is_none());

        let repeat = p.process(degraded_sample(30));
        assert_eq!(repeat.status, PipelineStatus::DuplicateUncached);
        assert_eq!(repeat.duplicate_of, first.incident_id);
        assert!(repeat.root_causes.is_empty());
        assert_eq!(repeat.severity, SeverityLabel::Critical);
    }

    #[test]
    fn test_report_and_export() {
        let mut p = pipeline();
        let r = p.process(degraded_sample(0));
        let id = r.incident_id.unwrap();

        match p.report() {
            PipelineReport::Summary {
                summary,
                root_cause_distribution,
                recent_incidents,
                average_causal_confidence,
                ..
            } => {
                assert_eq!(summary.total_incidents, 1);
                assert_eq!(summary.critical_severity, 1);
                assert!(root_cause_distribution[&RootCauseType::ResourceExhaustion] >= 1);
                assert_eq!(recent_incidents.len(), 1);
                assert_eq!(recent_incidents[0].incident_id, id);
                assert!(average_causal_confidence > 0.0);
            }
            other => panic!("unexpected report: {other:?}"),
        }

        let json: serde_json::Value = serde_json::from_str(&p.export_json(&id).unwrap()).unwrap();
        assert_eq!(json["incident_id"], id.as_str());
        assert_eq!(json["severity"], "critical");
        assert_eq!(json["detection"]["method"], "adaptive_heuristic");
        assert!(json["recommendations"]["immediate"].is_array());
        assert!(json["timing"]["total_latency_ms"].is_number());

        let report_json = serde_json::to_value(p.report()).unwrap();
        assert_eq!(report_json["status"], "ok");
    }

    #[test]
    fn test_export_unknown_incident() {
        let p = pipeline();
        assert!(matches!(
            p.export_json("nope"),
            Err(PipelineError::UnknownIncident(id)) if id == "nope"
        ));
        let report_json = serde_json::to_value(p.report()).unwrap();
        assert_eq!(report_json["status"], "no_analyses");
    }

    #[test]
    fn test_recorder_sees_both_phases() {
        let recorder = Arc::new(CapturingRecorder::default());
        let mut p = Pipeline::new(&MeshMedicConfig::default(), recorder.clone()).unwrap();
        p.process(degraded_sample(0));

        let inferences = recorder.inferences.lock().unwrap();
        assert_eq!(inferences.len(), 1);
        assert!(inferences[0].1);
        assert_eq!(inferences[0].2, "CRITICAL");
        assert_eq!(recorder.analyses.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_threshold_is_rejected() {
        let mut config = MeshMedicConfig::default();
        config.detection.base_threshold = 0.95;
        assert!(matches!(
            Pipeline::new(&config, Arc::new(NoopRecorder)),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_sample_json_defaults() {
        let sample: TelemetrySample =
            serde_json::from_str(r#"{"node_id": "n1", "features": {"rssi": -80, "snr": 12.5}}"#)
                .unwrap();
        assert!(sample.neighbors.is_empty());
        assert!(!sample.update_baseline);
        assert_eq!(sample.features.rssi, Some(-80.0));
        assert_eq!(sample.features.extra["snr"], 12.5);
    }

    #[test]
    fn test_earliest_timestamp_is_processed() {
        let line = r#"{"node_id": "n1", "observed_at": "-262143-01-01T00:00:00Z",
            "features": {"rssi": -95, "loss_rate": 0.2}}"#;
        let mut p = pipeline();

        let first = p.process(serde_json::from_str(line).unwrap());
        assert_eq!(first.status, PipelineStatus::Analyzed);
        let second = p.process(serde_json::from_str(line).unwrap());
        assert!(second.is_anomaly);
        assert_ne!(second.status, PipelineStatus::Normal);
    }
}
