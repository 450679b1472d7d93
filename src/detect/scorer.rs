//! Multi-signal anomaly scoring and confidence calibration.
//!
//! The score blends up to three signals, each in [0, 1]:
//!
//! | signal     | weight | present when                 |
//! |------------|--------|------------------------------|
//! | features   | 0.4    | always                       |
//! | neighbors  | 0.4    | the node has neighbors       |
//! | isolation  | 0.2    | the network size is known    |
//!
//! Only the weights of signals actually computed take part in the average.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::detect::{Neighbor, NormalizedFeatures};

const HISTORY_CAP: usize = 1000;
const CALIBRATION_WINDOW: usize = 50;
const FATIGUE_ALERT_RATE: f64 = 0.3;
const FATIGUE_PENALTY_SCALE: f64 = 0.3;
const NEIGHBOR_DEVIATION_Z: f64 = 1.0;

/// One entry of the bounded prediction history.
#[derive(Debug, Clone, Serialize)]
pub struct PredictionRecord {
    pub node_id: String,
    pub anomaly_score: f64,
    pub is_anomaly: bool,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug)]
pub struct AnomalyScorer {
    calibrate: bool,
    history: VecDeque<PredictionRecord>,
    last_scores: HashMap<String, f64>,
}

impl AnomalyScorer {
    pub fn new(calibrate: bool) -> Self {
        Self {
            calibrate,
            history: VecDeque::with_capacity(HISTORY_CAP),
            last_scores: HashMap::new(),
        }
    }

    /// Weighted anomaly score in [0, 1].
    pub fn score(
        &self,
        normalized: &NormalizedFeatures,
        neighbors: &[Neighbor],
        network_size: Option<usize>,
    ) -> f64 {
        let mut weighted = 0.0;
        let mut total_weight = 0.0;

        // 1. Feature deviation: mean |z| scaled so that 3 sigma saturates.
        let mean_abs_z = (normalized.rssi_z.abs()
            + normalized.loss_rate_z.abs()
            + normalized.latency_z.abs())
            / 3.0;
        weighted += (mean_abs_z / 3.0).min(1.0) * 0.4;
        total_weight += 0.4;

        // 2. Neighborhood comparison.
        if !neighbors.is_empty() {
            weighted += neighbor_deviation(normalized) * 0.4;
            total_weight += 0.4;
        }

        // 3. Isolation from the rest of the mesh.
        if let Some(size) = network_size.filter(|&n| n > 0) {
            let peers = size.saturating_sub(1).max(1) as f64;
            let isolation = (1.0 - neighbors.len() as f64 / peers).max(0.0);
            weighted += isolation * 0.2;
            total_weight += 0.2;
        }

        (weighted / total_weight).clamp(0.0, 1.0)
    }

    /// Confidence of a verdict: distance of the score from 0.5, scaled to
    /// [0, 1], then damped by the recent alert rate when calibration is on.
    ///
    /// Once more than 30% of the last 50 predictions were anomalous,
    /// confidence is lowered by up to 0.21.
    pub fn confidence(&self, score: f64) -> f64 {
        let base = ((score - 0.5).abs() * 2.0).clamp(0.0, 1.0);
        if !self.calibrate {
            return base;
        }

        let rate = self.recent_alert_rate();
        let penalty = if rate > FATIGUE_ALERT_RATE {
            (rate - FATIGUE_ALERT_RATE) * FATIGUE_PENALTY_SCALE
        } else {
            0.0
        };
        (base - penalty).clamp(0.0, 1.0)
    }

    /// Fraction of anomalous verdicts among the last 50 predictions.
    pub fn recent_alert_rate(&self) -> f64 {
        let window = self.history.len().min(CALIBRATION_WINDOW);
        if window == 0 {
            return 0.0;
        }
        let alerts = self
            .history
            .iter()
            .rev()
            .take(window)
            .filter(|p| p.is_anomaly)
            .count();
        alerts as f64 / window as f64
    }

    pub fn record(&mut self, record: PredictionRecord) {
        self.last_scores
            .insert(record.node_id.clone(), record.anomaly_score);
        if self.history.len() == HISTORY_CAP {
            self.history.pop_front();
        }
        self.history.push_back(record);
    }

    pub fn last_score(&self, node_id: &str) -> Option<f64> {
        self.last_scores.get(node_id).copied()
    }

    pub fn history(&self) -> &VecDeque<PredictionRecord> {
        &self.history
    }
}

/// Deviation counted only for |z| above one sigma, averaged over RSSI and
/// loss, saturating at 3 sigma.
fn neighbor_deviation(normalized: &NormalizedFeatures) -> f64 {
    let significant = |z: f64| if z.abs() > NEIGHBOR_DEVIATION_Z { z.abs() } else { 0.0 };
    let deviation = (significant(normalized.rssi_z) + significant(normalized.loss_rate_z)) / 2.0;
    (deviation / 3.0).min(1.0)
}
