//! FraudGraph backend entrypoint.
//!
//! Connects to the graph, wires the fraud pipeline, optionally bulk
//! loads seed data, and keeps a periodic stats line flowing until
//! ctrl-c.

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fraudgraph_backend::config::Settings;
use fraudgraph_backend::fraud::FraudService;
use fraudgraph_backend::generator::TransactionGenerator;
use fraudgraph_backend::graph::{poll_bulk_load, GraphClient, GraphOps};
use fraudgraph_backend::perf::PerfMonitor;

#[derive(Parser, Debug)]
#[command(name = "fraudgraph", about = "Real-time graph fraud detection pipeline")]
struct Args {
    /// Graph host (overrides GRAPH_HOST_ADDRESS).
    #[arg(long)]
    graph_host: Option<String>,

    /// Graph port (overrides GRAPH_PORT).
    #[arg(long)]
    graph_port: Option<u16>,

    /// Start sustained generation immediately at this TPS.
    #[arg(long)]
    start_tps: Option<f64>,

    /// Seconds between periodic stats log lines.
    #[arg(long, default_value_t = 30)]
    status_interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut settings = Settings::from_env();
    if let Some(host) = args.graph_host {
        settings.graph.host = host;
    }
    if let Some(port) = args.graph_port {
        settings.graph.port = port;
    }

    // The generator refuses to run without a reachable graph.
    let client = GraphClient::connect(settings.graph.clone())
        .await
        .context("graph database connection is required")?;
    let graph: Arc<dyn GraphOps> = Arc::new(client);

    if settings.generator.auto_load_data {
        let handle = graph
            .bulk_load_start(
                &settings.generator.bulk_vertices_dir,
                &settings.generator.bulk_edges_dir,
            )
            .await
            .context("starting bulk load")?;
        let status = poll_bulk_load(graph.as_ref(), &handle, Duration::from_secs(5))
            .await
            .context("bulk load failed")?;
        info!(elements_written = ?status.elements_written, "Seed data loaded");
    }

    let perf = PerfMonitor::new();
    let fraud = FraudService::new(
        Arc::clone(&graph),
        Arc::clone(&perf),
        settings.pipeline.fraud_workers,
        settings.pipeline.fraud_queue_capacity,
    );
    let generator = TransactionGenerator::new(graph, fraud, Arc::clone(&perf), &settings);

    if let Some(tps) = args.start_tps {
        let report = generator
            .start(tps, &chrono::Utc::now().to_rfc3339())
            .await;
        if report.success {
            info!(tps, "Auto-started generation");
        } else {
            warn!(message = %report.message, "Auto-start refused");
        }
    }

    let status_generator = Arc::clone(&generator);
    let status_interval = args.status_interval_secs.max(1);
    let status_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(status_interval));
        ticker.tick().await; // immediate first tick
        loop {
            ticker.tick().await;
            let stats = status_generator.performance_stats();
            info!(
                target: "stats",
                running = stats.is_running,
                target_tps = stats.target_tps,
                current_tps = stats.current_tps,
                scheduled = stats.total_scheduled,
                completed = stats.total_completed,
                failed = stats.total_failed,
                queue = stats.queue_size,
                avg_total_ms = stats.total_latency.avg_ms,
                "pipeline status"
            );
        }
    });

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("Shutting down");
    status_task.abort();
    generator.shutdown().await;

    Ok(())
}
