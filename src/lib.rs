//! meshmedic -- anomaly detection and causal root-cause analysis for
//! self-healing mesh networks.
//!
//! The crate provides the detection phase (baseline, adaptive threshold,
//! multi-signal scoring), the analysis phase (incident store, deduplication,
//! topology learning, rule-based knowledge base, correlation and ranking),
//! and a pipeline that joins them into one result per telemetry sample.

pub mod analysis;
pub mod config;
pub mod detect;
pub mod monitor;
pub mod pipeline;

pub use config::MeshMedicConfig;
pub use pipeline::{IntegratedResult, Pipeline, PipelineError, PipelineHandle, TelemetrySample};
