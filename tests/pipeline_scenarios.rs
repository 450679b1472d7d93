//! End-to-end pipeline scenarios driven through the public API.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use meshmedic::analysis::RootCauseType;
use meshmedic::detect::NodeFeatures;
use meshmedic::monitor::NoopRecorder;
use meshmedic::pipeline::PipelineStatus;
use meshmedic::{MeshMedicConfig, Pipeline, PipelineHandle, TelemetrySample};

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(secs)
}

fn pipeline() -> Pipeline {
    Pipeline::new(&MeshMedicConfig::default(), Arc::new(NoopRecorder)).unwrap()
}

/// Weak signal and heavy loss: anomalous without neighbors.
fn lossy() -> NodeFeatures {
    NodeFeatures {
        rssi: Some(-95.0),
        loss_rate: Some(0.2),
        ..Default::default()
    }
}

fn sample(node: &str, service: Option<&str>, secs: i64) -> TelemetrySample {
    TelemetrySample {
        service_id: service.map(str::to_string),
        observed_at: Some(at(secs)),
        ..TelemetrySample::new(node, lossy())
    }
}

#[test]
fn test_service_failure_cascade_learns_dependency() {
    let mut p = pipeline();

    // db fails, api follows one second later.
    let db = p.process(sample("node-db", Some("db"), 0));
    let api = p.process(sample("node-api", Some("api"), 1));
    assert_eq!(db.status, PipelineStatus::Analyzed);
    assert_eq!(api.status, PipelineStatus::Analyzed);

    let dep = p.engine().topology().dependency("api").expect("api learned");
    assert!(dep.depends_on.contains("db"));
    let tight = dep.depends_on_confidence["db"];
    assert!((tight - 0.9).abs() < 1e-9);

    // Same shape much later with a nine second gap.
    p.process(sample("node-cache", Some("cache"), 5_000));
    p.process(sample("node-web", Some("web"), 5_009));
    let loose = p.engine().topology().dependency("web").expect("web learned")
        .depends_on_confidence["cache"];
    assert!(tight > loose);

    let analysis = p
        .engine()
        .result(api.incident_id.as_deref().unwrap())
        .unwrap();
    let cascade = analysis
        .root_causes
        .iter()
        .find(|rc| rc.affected_services == vec!["db".to_string()])
        .expect("dependency cascade cause");
    assert_eq!(cascade.cause_type, RootCauseType::CascadingFailure);
    assert_eq!(cascade.node_id, "node-db");
    assert_eq!(analysis.event_chain.len(), 2);
    assert_eq!(analysis.event_chain[0].node_id, "node-db");
}

#[test]
fn test_regular_recurrence_flags_configuration_error() {
    let mut p = pipeline();
    let mut last = None;
    for secs in [0, 300, 600] {
        let r = p.process(sample("node-07", None, secs));
        assert_eq!(r.status, PipelineStatus::Analyzed, "at {secs}s");
        last = r.incident_id;
    }

    let analysis = p.engine().result(last.as_deref().unwrap()).unwrap();
    let pattern = analysis
        .root_causes
        .iter()
        .find(|rc| rc.cause_type == RootCauseType::ConfigurationError)
        .expect("recurrence cause");
    assert_eq!(pattern.temporal_pattern.as_deref(), Some("every 300s"));
    assert_eq!(pattern.confidence, 0.7);
}

#[test]
fn test_irregular_recurrence_is_not_a_pattern() {
    let mut p = pipeline();
    let mut last = None;
    for secs in [0, 400, 1_500] {
        last = p.process(sample("node-07", None, secs)).incident_id;
    }
    let analysis = p.engine().result(last.as_deref().unwrap()).unwrap();
    assert!(analysis
        .root_causes
        .iter()
        .all(|rc| rc.cause_type != RootCauseType::ConfigurationError));
}

#[test]
fn test_event_chain_is_bounded_and_ordered() {
    let mut p = pipeline();
    for i in 0..12 {
        p.process(sample(&format!("node-{i:02}"), None, i));
    }
    let last = p.process(sample("node-99", None, 12));
    let analysis = p
        .engine()
        .result(last.incident_id.as_deref().unwrap())
        .unwrap();

    assert_eq!(analysis.event_chain.len(), 10);
    let nodes: Vec<&str> = analysis
        .event_chain
        .iter()
        .map(|link| link.node_id.as_str())
        .collect();
    let expected: Vec<String> = (0..10).map(|i| format!("node-{i:02}")).collect();
    assert_eq!(nodes, expected);
    assert!(analysis.root_causes.len() <= 5);
    assert!(analysis.root_causes.iter().all(|rc| rc.confidence >= 0.5));
}

#[test]
fn test_dedup_disabled_analyzes_every_repeat() {
    let mut config = MeshMedicConfig::default();
    config.analysis.enable_deduplication = false;
    let mut p = Pipeline::new(&config, Arc::new(NoopRecorder)).unwrap();

    let a = p.process(sample("node-01", None, 0));
    let b = p.process(sample("node-01", None, 10));
    assert_eq!(b.status, PipelineStatus::Analyzed);
    assert_ne!(a.incident_id, b.incident_id);
}

#[tokio::test]
async fn test_handle_replays_in_order() {
    let (handle, worker) = PipelineHandle::spawn(pipeline(), 4);

    let first = handle.process(sample("node-01", None, 0)).await.unwrap();
    let repeat = handle.process(sample("node-01", None, 20)).await.unwrap();
    assert_eq!(repeat.status, PipelineStatus::DuplicateCached);
    assert_eq!(repeat.duplicate_of, first.incident_id);

    drop(handle);
    let pipeline = worker.await.unwrap();
    assert_eq!(pipeline.engine().incidents().len(), 1);
}
