//! TOML configuration for meshmedic.
//!
//! Every field has a default, so an empty file (or none at all) yields a
//! working pipeline. Discovery order is an explicit path, then the
//! `MESHMEDIC_CONFIG` environment variable, then
//! `/etc/meshmedic/meshmedic.toml`, then compiled-in defaults.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::analysis::knowledge::CausalRule;

pub const CONFIG_ENV: &str = "MESHMEDIC_CONFIG";
pub const SYSTEM_CONFIG_PATH: &str = "/etc/meshmedic/meshmedic.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeshMedicConfig {
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl MeshMedicConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded meshmedic configuration");
        Ok(config)
    }

    /// Resolve configuration using the discovery order in the module docs.
    ///
    /// An explicit path that fails to load is an error; the implicit
    /// locations fall through with a warning.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        Ok(Self::load_or_default())
    }

    /// Try `MESHMEDIC_CONFIG`, then the system path, then defaults.
    pub fn load_or_default() -> Self {
        // 1. Environment variable override.
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "MESHMEDIC_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        // 2. Standard system location.
        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        // 3. Defaults.
        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize configuration")
    }
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// Anomaly detection tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Threshold used on a perfectly healthy network, in [0, 0.85].
    pub base_threshold: f64,
    /// Raise the threshold on degraded networks and normalize against the
    /// learned baseline. When off, the base threshold and default baseline
    /// are used as-is.
    pub adaptive_threshold: bool,
    /// Damp confidence when the recent alert rate is high.
    pub confidence_calibration: bool,
    /// Age after which the baseline is reported stale.
    pub baseline_max_age_hours: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            base_threshold: 0.6,
            adaptive_threshold: true,
            confidence_calibration: true,
            baseline_max_age_hours: 24,
        }
    }
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

/// Root cause analysis tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Window for correlating and deduplicating incidents.
    pub correlation_window_secs: u64,
    /// Root causes and correlations below this confidence are dropped.
    pub min_confidence: f64,
    /// Similarity at or above which a same-fingerprint incident is a duplicate.
    pub dedup_threshold: f64,
    pub enable_deduplication: bool,
    pub enable_topology_learning: bool,
    /// Per-fingerprint history kept by the deduplicator.
    pub dedup_history_cap: usize,
    /// Incidents (and their cached results) retained in memory.
    pub max_incidents: usize,
    /// Rules appended after the built-in knowledge base.
    pub extra_rules: Vec<CausalRule>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            correlation_window_secs: 300,
            min_confidence: 0.5,
            dedup_threshold: 0.85,
            enable_deduplication: true,
            enable_topology_learning: true,
            dedup_history_cap: 64,
            max_incidents: 10_000,
            extra_rules: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Label stamped on integrated results.
    pub detection_method: String,
    /// Pending requests buffered by the worker handle.
    pub worker_queue_depth: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            detection_method: "adaptive_heuristic".to_string(),
            worker_queue_depth: 256,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
