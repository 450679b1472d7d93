use serde::{Deserialize, Serialize};

use crate::detect::{NetworkBaseline, NodeFeatures};

/// Derived z-scores and bounded ratios for one observation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedFeatures {
    pub rssi_z: f64,
    pub loss_rate_z: f64,
    pub latency_z: f64,
    /// Link age against a 24h reference, capped at 1.
    pub link_age_norm: f64,
    /// Throughput against a 100 Mbps reference, capped at 1.
    pub throughput_norm: f64,
    /// Mean of CPU and memory utilisation as fractions.
    pub resource_stress: f64,
}

/// Baseline-aware feature normalization.
pub struct FeatureNormalizer;

impl FeatureNormalizer {
    pub fn normalize(features: &NodeFeatures, baseline: &NetworkBaseline) -> NormalizedFeatures {
        let rssi = features.rssi.unwrap_or(baseline.mean_rssi);
        let loss_rate = features.loss_rate.unwrap_or(baseline.mean_loss_rate);
        let latency = features.latency.unwrap_or(baseline.mean_latency);

        let cpu_stress = features.cpu_percent.unwrap_or(0.0) / 100.0;
        let memory_stress = features.memory_percent.unwrap_or(0.0) / 100.0;

        NormalizedFeatures {
            rssi_z: z_score(rssi, baseline.mean_rssi, baseline.std_rssi),
            loss_rate_z: z_score(loss_rate, baseline.mean_loss_rate, baseline.std_loss_rate),
            latency_z: z_score(latency, baseline.mean_latency, baseline.std_latency),
            link_age_norm: (features.link_age_hours.unwrap_or(0.0) / 24.0).min(1.0),
            throughput_norm: (features.throughput_mbps.unwrap_or(0.0) / 100.0).min(1.0),
            resource_stress: (cpu_stress + memory_stress) / 2.0,
        }
    }
}

/// Z = (value - mean) / std, or 0 for a degenerate baseline.
fn z_score(value: f64, mean: f64, std: f64) -> f64 {
    if std > 0.0 {
        (value - mean) / std
    } else {
        0.0
    }
}
