//! Causal root cause analysis over detected incidents.
//!
//! Incidents produced by the detection phase are deduplicated, correlated
//! with their recent neighbors, and ranked against the knowledge base,
//! recurrence history and learned service topology.

pub mod correlation;
pub mod dedup;
pub mod engine;
pub mod incident;
pub mod knowledge;
pub mod ranker;
pub mod topology;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use dedup::DedupVerdict;
pub use engine::CausalEngine;
pub use incident::{IncidentEvent, IncidentStore};
pub use knowledge::{CausalRule, KnowledgeBase};
pub use topology::{ServiceDependency, TopologyLearner};

/// Start of the window of length `span` ending at `end`, saturating at the
/// earliest representable instant.
pub(crate) fn window_start(end: DateTime<Utc>, span: Duration) -> DateTime<Utc> {
    end.checked_sub_signed(span).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("incident {0} not found")]
    IncidentNotFound(String),
}

/// Category of a root cause, consumed by the remediation executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootCauseType {
    ResourceExhaustion,
    NetworkDegradation,
    ServiceFailure,
    ConfigurationError,
    ExternalInterference,
    CascadingFailure,
    HardwareFailure,
    Unknown,
}

impl RootCauseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RootCauseType::ResourceExhaustion => "resource_exhaustion",
            RootCauseType::NetworkDegradation => "network_degradation",
            RootCauseType::ServiceFailure => "service_failure",
            RootCauseType::ConfigurationError => "configuration_error",
            RootCauseType::ExternalInterference => "external_interference",
            RootCauseType::CascadingFailure => "cascading_failure",
            RootCauseType::HardwareFailure => "hardware_failure",
            RootCauseType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for RootCauseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified explanation for why an incident occurred.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootCause {
    pub root_cause_id: String,
    pub event_id: String,
    pub node_id: String,
    pub cause_type: RootCauseType,
    pub confidence: f64,
    pub explanation: String,
    pub contributing_factors: Vec<String>,
    pub remediation_suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporal_pattern: Option<String>,
    #[serde(default)]
    pub affected_services: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Identified,
    NoRootCause,
}

/// One step of an incident's event chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLink {
    pub node_id: String,
    pub anomaly_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CausalAnalysisResult {
    pub incident_id: String,
    pub status: AnalysisStatus,
    /// At most five, highest confidence first.
    pub root_causes: Vec<RootCause>,
    pub primary_root_cause: Option<RootCause>,
    pub analysis_time_ms: f64,
    /// Weighted confidence over the top three root causes.
    pub confidence: f64,
    /// Up to ten incidents in ascending time order.
    pub event_chain: Vec<EventLink>,
    pub is_duplicate: bool,
    pub duplicate_of: Option<String>,
}

impl CausalAnalysisResult {
    /// Result carrying no root causes.
    pub fn unexplained(incident_id: impl Into<String>) -> Self {
        Self {
            incident_id: incident_id.into(),
            status: AnalysisStatus::NoRootCause,
            root_causes: Vec::new(),
            primary_root_cause: None,
            analysis_time_ms: 0.0,
            confidence: 0.0,
            event_chain: Vec::new(),
            is_duplicate: false,
            duplicate_of: None,
        }
    }
}
