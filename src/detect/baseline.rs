use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::detect::NodeFeatures;

pub(crate) const DEFAULT_RSSI: f64 = -70.0;
pub(crate) const DEFAULT_LOSS_RATE: f64 = 0.01;
pub(crate) const DEFAULT_LATENCY: f64 = 50.0;

/// Population mean and standard deviation of one metric across a batch,
/// substituting `default` where the metric is absent.
///
/// Single pass (Welford). An empty batch yields `(0.0, 0.0)`.
fn metric_stats(
    samples: &[NodeFeatures],
    metric: impl Fn(&NodeFeatures) -> Option<f64>,
    default: f64,
) -> (f64, f64) {
    let mut mean = 0.0;
    let mut m2 = 0.0;
    for (n, sample) in samples.iter().enumerate() {
        let x = metric(sample).unwrap_or(default);
        let delta = x - mean;
        mean += delta / (n + 1) as f64;
        m2 += delta * (x - mean);
    }
    if samples.is_empty() {
        (0.0, 0.0)
    } else {
        (mean, (m2 / samples.len() as f64).sqrt())
    }
}

/// Rolling statistics of a network segment, used to normalize node telemetry.
///
/// Only replaced or updated through explicit calls; detection never resets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkBaseline {
    pub mean_rssi: f64,
    pub std_rssi: f64,
    pub mean_loss_rate: f64,
    pub std_loss_rate: f64,
    pub mean_latency: f64,
    pub std_latency: f64,
    pub update_count: u64,
    pub last_updated: DateTime<Utc>,
}

impl Default for NetworkBaseline {
    fn default() -> Self {
        Self {
            mean_rssi: DEFAULT_RSSI,
            std_rssi: 10.0,
            mean_loss_rate: DEFAULT_LOSS_RATE,
            std_loss_rate: 0.005,
            mean_latency: DEFAULT_LATENCY,
            std_latency: 20.0,
            update_count: 0,
            last_updated: Utc::now(),
        }
    }
}

impl NetworkBaseline {
    /// Recompute the baseline from a batch of observations.
    pub fn update(&mut self, samples: &[NodeFeatures]) {
        self.update_at(samples, Utc::now());
    }

    /// Same as [`update`](Self::update) with an explicit timestamp.
    pub fn update_at(&mut self, samples: &[NodeFeatures], now: DateTime<Utc>) {
        if samples.is_empty() {
            debug!("empty baseline batch, keeping previous baseline");
            return;
        }

        (self.mean_rssi, self.std_rssi) = metric_stats(samples, |f| f.rssi, DEFAULT_RSSI);
        (self.mean_loss_rate, self.std_loss_rate) =
            metric_stats(samples, |f| f.loss_rate, DEFAULT_LOSS_RATE);
        (self.mean_latency, self.std_latency) =
            metric_stats(samples, |f| f.latency, DEFAULT_LATENCY);
        self.update_count += 1;
        self.last_updated = now;

        debug!(
            samples = samples.len(),
            rssi = %format!("{:.1}±{:.1}", self.mean_rssi, self.std_rssi),
            loss = %format!("{:.2}%±{:.2}%", self.mean_loss_rate * 100.0, self.std_loss_rate * 100.0),
            update_count = self.update_count,
            "baseline updated"
        );
    }

    /// Whether the baseline is older than `interval` at time `now`.
    pub fn should_update(&self, now: DateTime<Utc>, interval: Duration) -> bool {
        now - self.last_updated >= interval
    }
}
