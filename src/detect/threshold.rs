use std::collections::VecDeque;

use crate::detect::baseline::DEFAULT_RSSI;
use crate::detect::{DetectError, Neighbor, NodeFeatures};

/// Highest threshold the policy will ever return.
pub const THRESHOLD_CEILING: f64 = 0.85;

const HEALTH_ADJUSTMENT: f64 = 0.15;
const HISTORY_CAP: usize = 100;

/// Decision threshold that relaxes as the surrounding network degrades.
///
/// A degraded network produces noisier telemetry, so the threshold rises
/// (up to [`THRESHOLD_CEILING`]) as health falls.
#[derive(Debug, Clone)]
pub struct AdaptiveThreshold {
    base_threshold: f64,
    history: VecDeque<f64>,
}

impl AdaptiveThreshold {
    pub fn new(base_threshold: f64) -> Result<Self, DetectError> {
        if !(0.0..=THRESHOLD_CEILING).contains(&base_threshold) {
            return Err(DetectError::InvalidThreshold {
                value: base_threshold,
                ceiling: THRESHOLD_CEILING,
            });
        }
        Ok(Self {
            base_threshold,
            history: VecDeque::with_capacity(HISTORY_CAP),
        })
    }

    pub fn base_threshold(&self) -> f64 {
        self.base_threshold
    }

    /// Threshold for the given network health, recorded into the history.
    pub fn threshold(&mut self, network_health: f64) -> f64 {
        let threshold = Self::compute(self.base_threshold, network_health);
        if self.history.len() == HISTORY_CAP {
            self.history.pop_front();
        }
        self.history.push_back(threshold);
        threshold
    }

    /// `min(base + (1 - health) * 0.15, 0.85)` with health clamped to [0, 1].
    pub fn compute(base_threshold: f64, network_health: f64) -> f64 {
        let health = network_health.clamp(0.0, 1.0);
        (base_threshold + (1.0 - health) * HEALTH_ADJUSTMENT).min(THRESHOLD_CEILING)
    }

    /// Most recent thresholds, oldest first.
    pub fn history(&self) -> impl Iterator<Item = f64> + '_ {
        self.history.iter().copied()
    }
}

/// Composite [0, 1] health of a node and its neighborhood.
///
/// Loss degrades linearly to zero at 5%, RSSI is scored between -90 and
/// -50 dBm, and connectivity saturates at five neighbors.
pub fn network_health(node: &NodeFeatures, neighbors: &[Neighbor]) -> f64 {
    let all = std::iter::once(node).chain(neighbors.iter().map(|n| &n.features));
    let count = (neighbors.len() + 1) as f64;

    let (loss_sum, rssi_sum) = all.fold((0.0, 0.0), |(loss, rssi), f| {
        (
            loss + f.loss_rate.unwrap_or(0.0),
            rssi + f.rssi.unwrap_or(DEFAULT_RSSI),
        )
    });
    let avg_loss = loss_sum / count;
    let avg_rssi = rssi_sum / count;

    let loss_score = (1.0 - avg_loss / 0.05).max(0.0);
    let rssi_score = ((avg_rssi + 50.0) / 40.0).clamp(0.0, 1.0);
    let connectivity_score = (neighbors.len() as f64 / 5.0).min(1.0);

    (loss_score * 0.4 + rssi_score * 0.3 + connectivity_score * 0.3).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_examples() {
        assert!((AdaptiveThreshold::compute(0.6, 0.9) - 0.615).abs() < 1e-9);
        assert!((AdaptiveThreshold::compute(0.6, 0.2) - 0.72).abs() < 1e-9);
        assert!((AdaptiveThreshold::compute(0.6, 1.0) - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_threshold_bounded_and_monotonic() {
        let mut policy = AdaptiveThreshold::new(0.8).unwrap();
        let mut previous = f64::INFINITY;
        for step in 0..=20 {
            let health = step as f64 / 20.0;
            let t = policy.threshold(health);
            assert!(t >= 0.8 && t <= THRESHOLD_CEILING, "threshold {t} out of range");
            assert!(t <= previous, "threshold must not increase with health");
            previous = t;
        }
        // Ceiling engages for a high base threshold on a dead network.
        assert_eq!(policy.threshold(0.0), THRESHOLD_CEILING);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut policy = AdaptiveThreshold::new(0.6).unwrap();
        for _ in 0..250 {
            policy.threshold(0.5);
        }
        assert_eq!(policy.history().count(), HISTORY_CAP);
    }

    #[test]
    fn test_rejects_out_of_range_base() {
        assert!(AdaptiveThreshold::new(0.9).is_err());
        assert!(AdaptiveThreshold::new(-0.1).is_err());
    }

    #[test]
    fn test_network_health_healthy_mesh() {
        let node = NodeFeatures {
            rssi: Some(-50.0),
            loss_rate: Some(0.0),
            ..Default::default()
        };
        let neighbors: Vec<Neighbor> = (0..5)
            .map(|i| Neighbor::new(format!("n{i}"), node.clone()))
            .collect();
        assert!((network_health(&node, &neighbors) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_network_health_isolated_lossy_node() {
        let node = NodeFeatures {
            rssi: Some(-95.0),
            loss_rate: Some(0.2),
            ..Default::default()
        };
        assert_eq!(network_health(&node, &[]), 0.0);
    }
}
