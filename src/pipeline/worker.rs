//! Serialized access to a [`Pipeline`] from async code.
//!
//! The pipeline lives on one blocking task; handles send it commands over a
//! bounded channel and await the reply. Dropping every handle stops the
//! worker, and its `JoinHandle` yields the pipeline back.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::pipeline::{IntegratedResult, Pipeline, PipelineError, PipelineReport, TelemetrySample};

enum Command {
    Process {
        sample: Box<TelemetrySample>,
        reply: oneshot::Sender<IntegratedResult>,
    },
    Report {
        reply: oneshot::Sender<PipelineReport>,
    },
    Export {
        incident_id: String,
        reply: oneshot::Sender<Result<String, PipelineError>>,
    },
}

#[derive(Clone)]
pub struct PipelineHandle {
    tx: mpsc::Sender<Command>,
}

impl PipelineHandle {
    /// Move `pipeline` onto a blocking worker. Must be called inside a
    /// tokio runtime.
    pub fn spawn(mut pipeline: Pipeline, queue_depth: usize) -> (Self, JoinHandle<Pipeline>) {
        let (tx, mut rx) = mpsc::channel::<Command>(queue_depth.max(1));

        let worker = tokio::task::spawn_blocking(move || {
            info!("pipeline worker started");
            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    Command::Process { sample, reply } => {
                        let result = pipeline.process(*sample);
                        if reply.send(result).is_err() {
                            debug!("caller went away before the result was ready");
                        }
                    }
                    Command::Report { reply } => {
                        if reply.send(pipeline.report()).is_err() {
                            debug!("caller went away before the report was ready");
                        }
                    }
                    Command::Export { incident_id, reply } => {
                        if reply.send(pipeline.export_json(&incident_id)).is_err() {
                            debug!(%incident_id, "caller went away before the export was ready");
                        }
                    }
                }
            }
            info!("pipeline worker stopped");
            pipeline
        });

        (Self { tx }, worker)
    }

    pub async fn process(&self, sample: TelemetrySample) -> Result<IntegratedResult, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Process {
            sample: Box::new(sample),
            reply,
        })
        .await?;
        rx.await.map_err(|_| PipelineError::WorkerStopped)
    }

    pub async fn report(&self) -> Result<PipelineReport, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Report { reply }).await?;
        rx.await.map_err(|_| PipelineError::WorkerStopped)
    }

    pub async fn export_json(&self, incident_id: &str) -> Result<String, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Export {
            incident_id: incident_id.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| PipelineError::WorkerStopped)?
    }

    async fn send(&self, cmd: Command) -> Result<(), PipelineError> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| PipelineError::WorkerStopped)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::MeshMedicConfig;
    use crate::detect::NodeFeatures;
    use crate::monitor::NoopRecorder;
    use crate::pipeline::PipelineStatus;

    fn spawn() -> (PipelineHandle, JoinHandle<Pipeline>) {
        let pipeline = Pipeline::new(&MeshMedicConfig::default(), Arc::new(NoopRecorder)).unwrap();
        PipelineHandle::spawn(pipeline, 8)
    }

    fn stressed(node: &str) -> TelemetrySample {
        TelemetrySample::new(
            node,
            NodeFeatures {
                rssi: Some(-95.0),
                loss_rate: Some(0.2),
                cpu_percent: Some(99.0),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_process_and_export_through_handle() {
        let (handle, worker) = spawn();

        let result = handle.process(stressed("node-09")).await.unwrap();
        assert_eq!(result.status, PipelineStatus::Analyzed);
        let id = result.incident_id.unwrap();

        let json = handle.export_json(&id).await.unwrap();
        assert!(json.contains(&id));
        assert!(matches!(
            handle.export_json("missing").await,
            Err(PipelineError::UnknownIncident(_))
        ));

        drop(handle);
        let pipeline = worker.await.unwrap();
        assert!(pipeline.result(&id).is_some());
    }

    #[tokio::test]
    async fn test_concurrent_callers_are_serialized() {
        let (handle, worker) = spawn();

        let mut tasks = Vec::new();
        for i in 0..8 {
            let h = handle.clone();
            tasks.push(tokio::spawn(async move {
                h.process(stressed(&format!("node-{i}"))).await
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap().unwrap().is_anomaly);
        }

        let report = serde_json::to_value(handle.report().await.unwrap()).unwrap();
        assert_eq!(report["summary"]["total_incidents"], 8);

        drop(handle);
        let pipeline = worker.await.unwrap();
        assert_eq!(pipeline.engine().incidents().len(), 8);
    }

    #[test]
    fn test_report_before_any_analysis() {
        tokio_test::block_on(async {
            let (handle, worker) = spawn();
            let report = tokio_test::assert_ok!(handle.report().await);
            assert!(matches!(report, PipelineReport::NoAnalyses { .. }));
            drop(handle);
            tokio_test::assert_ok!(worker.await);
        });
    }

    #[tokio::test]
    async fn test_worker_survives_abandoned_requests() {
        let (handle, worker) = spawn();

        let (reply, rx) = oneshot::channel();
        drop(rx);
        handle.send(Command::Report { reply }).await.unwrap();
        let (reply, rx) = oneshot::channel();
        drop(rx);
        handle
            .send(Command::Export {
                incident_id: "missing".to_string(),
                reply,
            })
            .await
            .unwrap();

        let report = handle.report().await.unwrap();
        assert!(matches!(report, PipelineReport::NoAnalyses { .. }));
        drop(handle);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_stopped_worker() {
        let (tx, rx) = mpsc::channel::<Command>(1);
        drop(rx);
        let dead = PipelineHandle { tx };
        assert!(matches!(dead.report().await, Err(PipelineError::WorkerStopped)));
        assert!(matches!(
            dead.process(stressed("node-01")).await,
            Err(PipelineError::WorkerStopped)
        ));
    }
}
