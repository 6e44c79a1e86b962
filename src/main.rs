use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use genmetrics::config::{GroupOptions, GroupSpec, StatisticsMode};
use genmetrics::monitor::{self, Style, Subject, Worker};
use genmetrics::simulator::{self, Workload};
use genmetrics::{server, telemetry, AppState};

/// Reads `GroupOptions` JSON from `var`, falling back to `fallback`.
fn options_from_env(var: &str, fallback: GroupOptions) -> Result<GroupOptions, String> {
    match std::env::var(var) {
        Ok(raw) => serde_json::from_str(&raw).map_err(|e| format!("{var}: {e}")),
        Err(_) => Ok(fallback),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::init_tracing();

    // ── 1. Describe the monitored groups ─────────────────────────
    let servers: Vec<Arc<dyn Subject>> = vec![
        Arc::new(Worker::server("session_cache")),
        Arc::new(Worker::server("rate_limiter")),
    ];
    let stages: Vec<Arc<dyn Subject>> = vec![
        Arc::new(Worker::stage("producer")),
        Arc::new(Worker::stage("enricher")),
        Arc::new(Worker::stage("writer")),
    ];

    let cluster_opts = options_from_env(
        "GENMETRICS_CLUSTER_OPTIONS",
        GroupOptions {
            statistics: StatisticsMode::InMemory,
            ..GroupOptions::default()
        },
    )?;
    let pipeline_opts = options_from_env(
        "GENMETRICS_PIPELINE_OPTIONS",
        GroupOptions {
            sample_rate: 0.5,
            ..GroupOptions::default()
        },
    )?;

    // ── 2. Start one actor per group ─────────────────────────────
    let cluster = monitor::start(GroupSpec::cluster("web", servers).with_options(cluster_opts))?;
    let pipeline =
        monitor::start(GroupSpec::pipeline("ingest", stages).with_options(pipeline_opts))?;

    // ── 3. Drive them with a synthetic workload ──────────────────
    let running = Arc::new(AtomicBool::new(true));
    let workloads = vec![
        tokio::spawn(simulator::run(
            cluster.clone(),
            Workload {
                kinds: vec!["session_cache".into(), "rate_limiter".into()],
                style: Style::Server,
                instances: 4,
                max_latency_us: 2_000,
                idle_us: 500,
            },
            running.clone(),
        )),
        tokio::spawn(simulator::run(
            pipeline.clone(),
            Workload {
                kinds: vec!["producer".into(), "enricher".into(), "writer".into()],
                style: Style::Stage,
                instances: 2,
                max_latency_us: 5_000,
                idle_us: 1_000,
            },
            running.clone(),
        )),
    ];

    // ── 4. Serve windows over HTTP ───────────────────────────────
    let state = Arc::new(AppState {
        groups: vec![cluster.clone(), pipeline.clone()],
    });
    let app = server::create_router(state);

    let addr = std::env::var("GENMETRICS_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!(%addr, "windows    → /api/groups/:name/window");
    tracing::info!(%addr, "live feed  → /api/groups/:name/stream");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    // ── 5. Wind down ─────────────────────────────────────────────
    running.store(false, Ordering::SeqCst);
    for w in workloads {
        let _ = w.await;
    }
    cluster.shutdown().await;
    pipeline.shutdown().await;
    Ok(())
}
