//! Anomaly detection for mesh node telemetry.

pub mod baseline;
pub mod engine;
pub mod normalize;
pub mod scorer;
pub mod threshold;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use baseline::NetworkBaseline;
pub use engine::{DetectionResult, Detector, HealthReport};
pub use normalize::NormalizedFeatures;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("base threshold {value} outside [0, {ceiling}]")]
    InvalidThreshold { value: f64, ceiling: f64 },
}

/// Severity levels for detected incidents.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Map an anomaly score onto a severity band.
    pub fn from_score(score: f64) -> Self {
        if score > 0.8 {
            Severity::Critical
        } else if score > 0.6 {
            Severity::High
        } else if score > 0.4 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw telemetry reported by a single mesh node.
///
/// Every field is optional; consumers substitute their own defaults for
/// missing values. Unknown numeric keys (e.g. `snr`) are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeFeatures {
    /// Received signal strength, dBm.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rssi: Option<f64>,
    /// Packet loss as a fraction (0-1).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss_rate: Option<f64>,
    /// Round-trip latency, ms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throughput_mbps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_age_hours: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_percent: Option<f64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, f64>,
}

impl NodeFeatures {
    /// Flatten the present values into a metrics map.
    ///
    /// Keys starting with `_` are treated as private annotations and dropped.
    pub fn metrics(&self) -> BTreeMap<String, f64> {
        let named = [
            ("rssi", self.rssi),
            ("loss_rate", self.loss_rate),
            ("latency", self.latency),
            ("throughput_mbps", self.throughput_mbps),
            ("link_age_hours", self.link_age_hours),
            ("cpu_percent", self.cpu_percent),
            ("memory_percent", self.memory_percent),
        ];

        let mut out: BTreeMap<String, f64> = named
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k.to_string(), v)))
            .collect();

        for (k, v) in &self.extra {
            if !k.starts_with('_') {
                out.insert(k.clone(), *v);
            }
        }
        out
    }
}

/// A neighbor of the node under observation, with its own telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub node_id: String,
    #[serde(default)]
    pub features: NodeFeatures,
}

impl Neighbor {
    pub fn new(node_id: impl Into<String>, features: NodeFeatures) -> Self {
        Self {
            node_id: node_id.into(),
            features,
        }
    }
}
