use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::DetectionConfig;
use crate::detect::normalize::FeatureNormalizer;
use crate::detect::scorer::{AnomalyScorer, PredictionRecord};
use crate::detect::threshold::{self, AdaptiveThreshold};
use crate::detect::{DetectError, Neighbor, NetworkBaseline, NodeFeatures, NormalizedFeatures};
use crate::monitor::MetricsRecorder;

const FACTOR_Z: f64 = 1.5;
const FACTOR_STRESS: f64 = 0.8;
const MAX_RECOMMENDATIONS: usize = 3;
const REPORT_WINDOW: usize = 100;

/// Named contributor to an anomaly verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyFactor {
    LowSignalStrength,
    HighPacketLoss,
    HighLatency,
    ResourceStress,
}

impl AnomalyFactor {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyFactor::LowSignalStrength => "low_signal_strength",
            AnomalyFactor::HighPacketLoss => "high_packet_loss",
            AnomalyFactor::HighLatency => "high_latency",
            AnomalyFactor::ResourceStress => "resource_stress",
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            AnomalyFactor::LowSignalStrength => "low signal strength",
            AnomalyFactor::HighPacketLoss => "high packet loss",
            AnomalyFactor::HighLatency => "high latency",
            AnomalyFactor::ResourceStress => "high CPU/memory usage",
        }
    }

    fn from_normalized(normalized: &NormalizedFeatures) -> Vec<Self> {
        let mut factors = Vec::new();
        if normalized.rssi_z.abs() > FACTOR_Z {
            factors.push(AnomalyFactor::LowSignalStrength);
        }
        if normalized.loss_rate_z.abs() > FACTOR_Z {
            factors.push(AnomalyFactor::HighPacketLoss);
        }
        if normalized.latency_z.abs() > FACTOR_Z {
            factors.push(AnomalyFactor::HighLatency);
        }
        if normalized.resource_stress > FACTOR_STRESS {
            factors.push(AnomalyFactor::ResourceStress);
        }
        factors
    }
}

/// Verdict for one telemetry observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    pub node_id: String,
    pub is_anomaly: bool,
    pub anomaly_score: f64,
    pub confidence: f64,
    pub threshold_used: f64,
    pub network_health: f64,
    pub explanation: String,
    pub factors: Vec<AnomalyFactor>,
    pub recommendations: Vec<String>,
    pub inference_time_ms: f64,
    pub normalized_features: NormalizedFeatures,
    pub timestamp: DateTime<Utc>,
}

impl DetectionResult {
    /// Incident category: the leading contributing factor.
    pub fn anomaly_type(&self) -> &'static str {
        self.factors
            .first()
            .map(AnomalyFactor::as_str)
            .unwrap_or("anomaly_detected")
    }
}

/// Summary of recent detector activity.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub nodes_checked: usize,
    pub anomaly_rate: f64,
    pub average_anomaly_score: f64,
    pub network_health: f64,
    pub unique_nodes: usize,
    pub total_predictions: usize,
}

/// Detection phase: baseline, normalization, adaptive threshold and scoring.
pub struct Detector {
    config: DetectionConfig,
    baseline: NetworkBaseline,
    threshold: AdaptiveThreshold,
    scorer: AnomalyScorer,
    network_health: f64,
    recorder: Arc<dyn MetricsRecorder>,
}

impl Detector {
    pub fn new(
        config: DetectionConfig,
        recorder: Arc<dyn MetricsRecorder>,
    ) -> Result<Self, DetectError> {
        let threshold = AdaptiveThreshold::new(config.base_threshold)?;
        let scorer = AnomalyScorer::new(config.confidence_calibration);
        info!(
            base_threshold = config.base_threshold,
            adaptive_threshold = config.adaptive_threshold,
            confidence_calibration = config.confidence_calibration,
            "detector initialized"
        );
        Ok(Self {
            config,
            baseline: NetworkBaseline::default(),
            threshold,
            scorer,
            network_health: 1.0,
            recorder,
        })
    }

    /// Score one node observation against its neighborhood.
    pub fn detect(
        &mut self,
        node_id: &str,
        features: &NodeFeatures,
        neighbors: &[Neighbor],
        network_size: Option<usize>,
        update_baseline: bool,
        now: DateTime<Utc>,
    ) -> DetectionResult {
        let start = Instant::now();

        // 1. Opt-in baseline refresh from this batch
        if update_baseline {
            if self.config.adaptive_threshold {
                let batch: Vec<NodeFeatures> = std::iter::once(features.clone())
                    .chain(neighbors.iter().map(|n| n.features.clone()))
                    .collect();
                self.baseline.update_at(&batch, now);
            } else {
                debug!(%node_id, "baseline update requested with adaptive threshold disabled");
            }
        } else if self.config.adaptive_threshold && self.baseline_is_stale(now) {
            debug!(
                %node_id,
                last_updated = %self.baseline.last_updated,
                "normalizing against a stale baseline"
            );
        }

        // 2. Network health and threshold
        let network_health = threshold::network_health(features, neighbors);
        self.network_health = network_health;
        let threshold_used = if self.config.adaptive_threshold {
            self.threshold.threshold(network_health)
        } else {
            self.threshold.base_threshold()
        };

        // 3. Normalize and score
        let normalized = if self.config.adaptive_threshold {
            FeatureNormalizer::normalize(features, &self.baseline)
        } else {
            FeatureNormalizer::normalize(features, &NetworkBaseline::default())
        };
        let anomaly_score = self.scorer.score(&normalized, neighbors, network_size);
        let confidence = self.scorer.confidence(anomaly_score);
        let is_anomaly = anomaly_score >= threshold_used;

        // 4. Explain
        let factors = AnomalyFactor::from_normalized(&normalized);
        let explanation = explain(node_id, &factors, is_anomaly, anomaly_score);
        let recommendations = recommend(features, is_anomaly);

        let inference_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        let label = if is_anomaly && anomaly_score > 0.8 {
            "CRITICAL"
        } else if is_anomaly {
            "WARNING"
        } else {
            "NORMAL"
        };
        self.recorder
            .record_inference(inference_time_ms, is_anomaly, label);

        self.scorer.record(PredictionRecord {
            node_id: node_id.to_string(),
            anomaly_score,
            is_anomaly,
            confidence,
            timestamp: now,
        });

        if is_anomaly {
            warn!(
                %node_id,
                score = anomaly_score,
                threshold = threshold_used,
                confidence,
                "anomaly detected"
            );
        } else {
            debug!(%node_id, score = anomaly_score, threshold = threshold_used, "node nominal");
        }

        DetectionResult {
            node_id: node_id.to_string(),
            is_anomaly,
            anomaly_score,
            confidence,
            threshold_used,
            network_health,
            explanation,
            factors,
            recommendations,
            inference_time_ms,
            normalized_features: normalized,
            timestamp: now,
        }
    }

    pub fn baseline(&self) -> &NetworkBaseline {
        &self.baseline
    }

    /// Whether the baseline has outlived the configured refresh interval.
    ///
    /// An interval too large to represent never expires.
    pub fn baseline_is_stale(&self, now: DateTime<Utc>) -> bool {
        i64::try_from(self.config.baseline_max_age_hours)
            .ok()
            .and_then(Duration::try_hours)
            .is_some_and(|interval| self.baseline.should_update(now, interval))
    }

    pub fn last_score(&self, node_id: &str) -> Option<f64> {
        self.scorer.last_score(node_id)
    }

    pub fn health_report(&self) -> HealthReport {
        let history = self.scorer.history();
        let recent: Vec<&PredictionRecord> = history
            .iter()
            .skip(history.len().saturating_sub(REPORT_WINDOW))
            .collect();

        if recent.is_empty() {
            return HealthReport {
                nodes_checked: 0,
                anomaly_rate: 0.0,
                average_anomaly_score: 0.0,
                network_health: 1.0,
                unique_nodes: 0,
                total_predictions: 0,
            };
        }

        let n = recent.len() as f64;
        let anomalies = recent.iter().filter(|p| p.is_anomaly).count() as f64;
        let score_sum: f64 = recent.iter().map(|p| p.anomaly_score).sum();
        let unique: HashSet<&str> = recent.iter().map(|p| p.node_id.as_str()).collect();

        HealthReport {
            nodes_checked: recent.len(),
            anomaly_rate: anomalies / n,
            average_anomaly_score: score_sum / n,
            network_health: self.network_health,
            unique_nodes: unique.len(),
            total_predictions: history.len(),
        }
    }
}

fn explain(node_id: &str, factors: &[AnomalyFactor], is_anomaly: bool, score: f64) -> String {
    let status = if is_anomaly { "ANOMALY DETECTED" } else { "NORMAL" };
    if factors.is_empty() {
        return format!("{status}: {node_id} ({:.1}%)", score * 100.0);
    }
    let described: Vec<&str> = factors.iter().map(AnomalyFactor::describe).collect();
    format!(
        "{status}: {node_id} ({:.1}%). Contributing factors: {}",
        score * 100.0,
        described.join(", ")
    )
}

fn recommend(features: &NodeFeatures, is_anomaly: bool) -> Vec<String> {
    if !is_anomaly {
        return vec!["No action required".to_string()];
    }

    let mut recs: Vec<&str> = Vec::new();
    if features.rssi.unwrap_or(-70.0) < -80.0 {
        recs.push("Move node closer to AP or improve antenna position");
        recs.push("Consider adding a relay node");
    }
    if features.loss_rate.unwrap_or(0.0) > 0.05 {
        recs.push("Check for interference (WiFi, microwave, etc)");
        recs.push("Switch to different RF channel");
        recs.push("Restart wireless interface");
    }
    if features.cpu_percent.unwrap_or(0.0) > 90.0 {
        recs.push("Restart node to clear CPU load");
        recs.push("Investigate CPU-heavy processes");
    }
    if features.memory_percent.unwrap_or(0.0) > 85.0 {
        recs.push("Restart node to free memory");
        recs.push("Check for memory leaks");
    }
    if recs.is_empty() {
        recs.push("Review node logs for detailed diagnostics");
        recs.push("Perform connectivity test");
    }

    recs.into_iter()
        .take(MAX_RECOMMENDATIONS)
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::monitor::NoopRecorder;

    fn detector() -> Detector {
        Detector::new(DetectionConfig::default(), Arc::new(NoopRecorder)).unwrap()
    }

    fn healthy(node_id: &str) -> Neighbor {
        Neighbor::new(
            node_id,
            NodeFeatures {
                rssi: Some(-68.0),
                loss_rate: Some(0.01),
                latency: Some(45.0),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_degraded_node_is_flagged() {
        let mut det = detector();
        let features = NodeFeatures {
            rssi: Some(-95.0),
            loss_rate: Some(0.12),
            latency: Some(400.0),
            cpu_percent: Some(97.0),
            memory_percent: Some(92.0),
            ..Default::default()
        };
        let neighbors = vec![healthy("node-02"), healthy("node-03")];

        let result = det.detect("node-01", &features, &neighbors, Some(10), false, Utc::now());

        assert!(result.is_anomaly);
        assert!(result.anomaly_score >= result.threshold_used);
        assert!(result.explanation.starts_with("ANOMALY DETECTED: node-01"));
        assert_eq!(result.anomaly_type(), "low_signal_strength");
        assert!(result.factors.contains(&AnomalyFactor::ResourceStress));
        assert!(!result.recommendations.is_empty());
        assert!(result.recommendations.len() <= MAX_RECOMMENDATIONS);
        assert_eq!(det.last_score("node-01"), Some(result.anomaly_score));
    }

    #[test]
    fn test_healthy_node_is_nominal() {
        let mut det = detector();
        let features = NodeFeatures {
            rssi: Some(-70.0),
            loss_rate: Some(0.01),
            latency: Some(50.0),
            ..Default::default()
        };
        let neighbors: Vec<Neighbor> = (2..8).map(|i| healthy(&format!("node-{i:02}"))).collect();

        let result = det.detect("node-01", &features, &neighbors, Some(7), false, Utc::now());

        assert!(!result.is_anomaly);
        assert_eq!(result.recommendations, vec!["No action required".to_string()]);
        assert!(result.explanation.starts_with("NORMAL"));
        for v in [result.anomaly_score, result.confidence, result.network_health] {
            assert!((0.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn test_fixed_threshold_when_not_adaptive() {
        let config = DetectionConfig {
            adaptive_threshold: false,
            ..Default::default()
        };
        let mut det = Detector::new(config, Arc::new(NoopRecorder)).unwrap();
        let features = NodeFeatures {
            rssi: Some(-95.0),
            loss_rate: Some(0.3),
            ..Default::default()
        };
        let result = det.detect("node-01", &features, &[], None, true, Utc::now());
        assert_eq!(result.threshold_used, 0.6);
        assert_eq!(det.baseline().update_count, 0);
    }

    #[test]
    fn test_baseline_update_is_opt_in() {
        let mut det = detector();
        let features = NodeFeatures {
            rssi: Some(-70.0),
            ..Default::default()
        };
        det.detect("node-01", &features, &[healthy("node-02")], None, false, Utc::now());
        assert_eq!(det.baseline().update_count, 0);

        det.detect("node-01", &features, &[healthy("node-02")], None, true, Utc::now());
        assert_eq!(det.baseline().update_count, 1);
        assert!((det.baseline().mean_rssi + 69.0).abs() < 1e-9);
    }

    #[test]
    fn test_baseline_staleness() {
        let mut det = detector();
        let refreshed = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let features = NodeFeatures::default();
        det.detect("node-01", &features, &[healthy("node-02")], None, true, refreshed);

        assert!(!det.baseline_is_stale(refreshed));
        assert!(!det.baseline_is_stale(refreshed + Duration::hours(23)));
        assert!(det.baseline_is_stale(refreshed + Duration::hours(24)));

        // Detection against a stale baseline still works and leaves it alone.
        let later = refreshed + Duration::hours(48);
        det.detect("node-01", &features, &[], None, false, later);
        assert_eq!(det.baseline().last_updated, refreshed);
        assert_eq!(det.baseline().update_count, 1);
    }

    #[test]
    fn test_unrepresentable_max_age_never_expires() {
        let config = DetectionConfig {
            baseline_max_age_hours: u64::MAX,
            ..Default::default()
        };
        let det = Detector::new(config, Arc::new(NoopRecorder)).unwrap();
        assert!(!det.baseline_is_stale(DateTime::<Utc>::MAX_UTC));
    }

    #[test]
    fn test_health_report() {
        let mut det = detector();
        assert_eq!(det.health_report().nodes_checked, 0);

        let features = NodeFeatures::default();
        for i in 0..3 {
            det.detect(&format!("node-{i}"), &features, &[], None, false, Utc::now());
        }
        let report = det.health_report();
        assert_eq!(report.nodes_checked, 3);
        assert_eq!(report.unique_nodes, 3);
        assert_eq!(report.total_predictions, 3);
        assert_eq!(report.anomaly_rate, 0.0);
    }

    #[test]
    fn test_generic_recommendations() {
        let recs = recommend(&NodeFeatures::default(), true);
        assert_eq!(
            recs,
            vec![
                "Review node logs for detailed diagnostics".to_string(),
                "Perform connectivity test".to_string()
            ]
        );
    }
}
