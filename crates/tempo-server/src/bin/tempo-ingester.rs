use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use clap::Parser;
use tempo_consumer::{ConsumerConfig, ConsumerMetrics, PartitionConsumer, Progress};
use tempo_log::LocalFileLog;
use tempo_ring::Ring;
use tempo_server::internal_live::{self, ConsumerHandle, LiveState};
use tempo_server::ring_bootstrap::{self, Peer};
use tempo_server::{logging, metrics_server, ring_debug, EXIT_BAD_CONFIG, EXIT_FAILURE, EXIT_SUCCESS};

/// Consumes a set of log partitions end to end: WAL, in-memory trace map,
/// block cutting, and recent reads (spec.md §4.2).
#[derive(Parser, Debug)]
#[command(about, version)]
struct Cli {
    /// Address to serve the internal live-tier API and `/ingester/ring` on.
    #[arg(long, env = "TEMPO_INGESTER_LISTEN", default_value = "0.0.0.0:3200")]
    listen: std::net::SocketAddr,

    #[arg(long, env = "TEMPO_METRICS_LISTEN", default_value = "0.0.0.0:3201")]
    metrics_listen: std::net::SocketAddr,

    #[arg(long, env = "TEMPO_LOG_ROOT")]
    log_root: std::path::PathBuf,

    #[arg(long, env = "TEMPO_PARTITION_COUNT", default_value = "64")]
    partition_count: u32,

    /// Partitions this process owns, e.g. `0,1,2,3`.
    #[arg(long, env = "TEMPO_PARTITIONS", value_delimiter = ',')]
    partitions: Vec<u32>,

    #[arg(long, env = "TEMPO_STORAGE_ROOT")]
    storage_root: std::path::PathBuf,

    #[arg(long, env = "TEMPO_WAL_ROOT")]
    wal_root: std::path::PathBuf,

    #[arg(long, env = "TEMPO_COMMIT_ROOT")]
    commit_root: std::path::PathBuf,

    /// This instance's own address, as advertised on the ring.
    #[arg(long, env = "TEMPO_SELF_ADDRESS")]
    self_address: String,

    #[arg(long, env = "TEMPO_SELF_ZONE", default_value = "zone-a")]
    self_zone: String,

    /// Other ring members, `zone=host:port`, comma-separated.
    #[arg(long, env = "TEMPO_RING_PEERS", value_delimiter = ',')]
    ring_peers: Vec<Peer>,

    #[arg(long, env = "TEMPO_TRACE_IDLE_PERIOD", value_parser = humantime::parse_duration, default_value = "10s")]
    trace_idle_period: Duration,

    #[arg(long, env = "TEMPO_MAX_BLOCK_BYTES", default_value = "67108864")]
    max_block_bytes: u64,

    #[arg(long, env = "TEMPO_MAX_BLOCK_DURATION", value_parser = humantime::parse_duration, default_value = "5m")]
    max_block_duration: Duration,
}

#[tokio::main]
async fn main() {
    logging::install();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(err) => {
            tracing::error!(error = ?err, "tempo-ingester failed");
            std::process::exit(EXIT_FAILURE);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if cli.partitions.is_empty() {
        tracing::error!("--partitions must name at least one owned partition");
        std::process::exit(EXIT_BAD_CONFIG);
    }
    for &p in &cli.partitions {
        if p >= cli.partition_count {
            tracing::error!(partition = p, partition_count = cli.partition_count, "owned partition out of range");
            std::process::exit(EXIT_BAD_CONFIG);
        }
    }

    let log = Arc::new(LocalFileLog::open(&cli.log_root, cli.partition_count).await?);
    let storage = Arc::new(tempo_storage::Driver::local(&cli.storage_root));
    let ring: Ring = ring_bootstrap::build(&cli.self_zone, &cli.self_address, &cli.ring_peers);

    let config = ConsumerConfig {
        trace_idle_period: cli.trace_idle_period,
        max_block_bytes: cli.max_block_bytes,
        max_block_duration: cli.max_block_duration,
        ..ConsumerConfig::default()
    };

    let mut consumers: HashMap<u32, ConsumerHandle> = HashMap::new();
    for &partition in &cli.partitions {
        let consumer = PartitionConsumer::start(
            partition,
            log.clone(),
            storage.clone(),
            cli.wal_root.clone(),
            cli.commit_root.clone(),
            config.clone(),
            ConsumerMetrics::new(),
        )
        .await?;
        consumers.insert(partition, Arc::new(tokio::sync::Mutex::new(consumer)));
    }
    let consumers = Arc::new(consumers);

    let mut consume_tasks = Vec::new();
    for (&partition, handle) in consumers.iter() {
        let handle = handle.clone();
        consume_tasks.push(tokio::spawn(async move {
            loop {
                let progress = handle.lock().await.run_once().await;
                match progress {
                    Progress::Advance(_) => {}
                    Progress::NoProgress => tokio::time::sleep(Duration::from_millis(200)).await,
                    Progress::Error(e) => {
                        tracing::warn!(partition, error = ?e, "consume step failed, backing off");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }));
    }

    let live_state = LiveState {
        consumers: consumers.clone(),
    };

    let app = Router::new()
        .route("/internal/live/lookup", get(internal_live::lookup_trace))
        .route("/internal/live/scan", get(internal_live::scan_range))
        .with_state(live_state)
        .route(
            "/ingester/ring",
            get({
                let ring = ring.clone();
                move || {
                    let ring = ring.clone();
                    async move { axum::response::Html(ring_debug::render(&ring.snapshot())) }
                }
            }),
        );

    let prom_handle = metrics_server::install_recorder();
    let metrics_app = metrics_server::build_router(prom_handle);

    let metrics_task = tokio::spawn(
        axum_server::bind(cli.metrics_listen).serve(metrics_app.into_make_service()),
    );

    tracing::info!(listen = %cli.listen, partitions = ?cli.partitions, "tempo-ingester starting");

    tokio::select! {
        res = axum_server::bind(cli.listen).serve(app.into_make_service()) => res.map_err(Into::into),
        res = metrics_task => res?.map_err(Into::into),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, draining partitions");
            for task in &consume_tasks {
                task.abort();
            }
            for (&partition, handle) in consumers.iter() {
                let mut guard = handle.lock().await;
                guard.shutdown().await;
                tracing::info!(partition, "partition drained");
            }
            Ok(())
        }
    }
}
