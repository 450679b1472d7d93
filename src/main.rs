use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use meshmedic::analysis::KnowledgeBase;
use meshmedic::config::{LoggingConfig, MeshMedicConfig};
use meshmedic::monitor::TracingRecorder;
use meshmedic::pipeline::{IntegratedResult, PipelineReport, PipelineStatus};
use meshmedic::{Pipeline, PipelineHandle, TelemetrySample};

#[derive(Parser)]
#[command(
    name = "meshmedic",
    about = "Anomaly detection and root-cause analysis for self-healing mesh networks",
    version,
    long_about = None
)]
struct Cli {
    /// Configuration file (overrides MESHMEDIC_CONFIG and the system path)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset (overrides logging.level)
    #[arg(long, global = true, env = "MESHMEDIC_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Feed recorded telemetry (one JSON sample per line) through the pipeline
    Replay {
        /// JSONL file of telemetry samples
        #[arg(long)]
        input: PathBuf,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// List the causal rules in the knowledge base
    Rules,

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = MeshMedicConfig::discover(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    init_tracing(&config.logging);

    match cli.command {
        Commands::Replay { input, json } => replay(&config, &input, json).await?,
        Commands::Rules => {
            let kb = KnowledgeBase::with_extra_rules(config.analysis.extra_rules.iter().cloned());
            println!("{:<18} | {:<22} | {:<10} | Condition", "Rule", "Cause", "Confidence");
            println!("{:-<18}-|-{:-<22}-|-{:-<10}-|-{:-<30}", "", "", "", "");
            for rule in kb.rules() {
                println!(
                    "{:<18} | {:<22} | {:<10.2} | {}",
                    rule.rule_id,
                    rule.cause_type.as_str(),
                    rule.confidence,
                    rule.condition
                );
            }
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));

    // Results go to stdout; keep logs on stderr.
    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn replay(config: &MeshMedicConfig, input: &std::path::Path, json: bool) -> Result<()> {
    let content = tokio::fs::read_to_string(input)
        .await
        .with_context(|| format!("failed to read telemetry file: {}", input.display()))?;

    let pipeline = Pipeline::new(config, Arc::new(TracingRecorder))?;
    let (handle, worker) = PipelineHandle::spawn(pipeline, config.pipeline.worker_queue_depth);
    tracing::info!(input = %input.display(), "Replaying telemetry");

    if !json {
        println!(
            "{:<14} | {:<18} | {:<8} | {:<6} | Primary root cause",
            "Node", "Status", "Severity", "Score"
        );
        println!("{:-<14}-|-{:-<18}-|-{:-<8}-|-{:-<6}-|-{:-<30}", "", "", "", "", "");
    }

    for (n, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let sample: TelemetrySample = serde_json::from_str(line)
            .with_context(|| format!("line {}: invalid telemetry sample", n + 1))?;
        let result = handle.process(sample).await?;
        if json {
            println!("{}", serde_json::to_string(&result)?);
        } else {
            print_result(&result);
        }
    }

    let report = handle.report().await?;
    drop(handle);
    worker.await.context("pipeline worker panicked")?;

    if json {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_result(result: &IntegratedResult) {
    let status = match result.status {
        PipelineStatus::Normal => "normal",
        PipelineStatus::Analyzed => "analyzed",
        PipelineStatus::DuplicateCached => "duplicate (cached)",
        PipelineStatus::DuplicateUncached => "duplicate",
    };
    let cause = result
        .primary_root_cause
        .as_ref()
        .map(|rc| rc.explanation.as_str())
        .unwrap_or("-");
    println!(
        "{:<14} | {:<18} | {:<8} | {:<6.2} | {}",
        result.node_id,
        status,
        result.severity.as_str(),
        result.anomaly_score,
        cause
    );
    for action in &result.immediate_actions {
        println!("{:<14} | {:<18} | {:<8} | {:<6} |   -> {}", "", "", "", "", action);
    }
}

fn print_report(report: &PipelineReport) {
    println!("\n=== meshmedic Replay Report ===");
    match report {
        PipelineReport::NoAnalyses { message } => println!("{}", message),
        PipelineReport::Summary {
            summary,
            root_cause_distribution,
            average_causal_confidence,
            detector,
            ..
        } => {
            println!("Incidents analyzed:  {}", summary.total_incidents);
            println!("Critical / High:     {} / {}", summary.critical_severity, summary.high_severity);
            println!("Average latency:     {:.2} ms", summary.average_latency_ms);
            println!("Causal confidence:   {:.0}%", average_causal_confidence * 100.0);
            println!("Anomaly rate:        {:.0}%", detector.anomaly_rate * 100.0);
            println!("\nRoot causes:");
            for (cause, count) in root_cause_distribution {
                println!(" - {:<22} {}", cause.as_str(), count);
            }
        }
    }
    println!("===============================\n");
}
