use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use clap::Parser;
use tempo_query::{Federator, FederatorConfig};
use tempo_server::api::{self, QueryState};
use tempo_server::live_client::HttpLiveTier;
use tempo_server::{logging, metrics_server, EXIT_FAILURE, EXIT_SUCCESS};

/// Query-frontend and querier collapsed into one process (SPEC_FULL.md §9
/// Open Question, spec.md §9 allows this reading): federates trace-id
/// lookups and range searches across the live and archive tiers.
#[derive(Parser, Debug)]
#[command(about, version)]
struct Cli {
    #[arg(long, env = "TEMPO_QUERY_LISTEN", default_value = "0.0.0.0:3300")]
    listen: std::net::SocketAddr,

    #[arg(long, env = "TEMPO_METRICS_LISTEN", default_value = "0.0.0.0:3301")]
    metrics_listen: std::net::SocketAddr,

    #[arg(long, env = "TEMPO_STORAGE_ROOT")]
    storage_root: std::path::PathBuf,

    /// One `--zone` flag per replica zone, each a comma-separated list of
    /// ingester addresses serving that zone's partitions (spec.md §4.2's
    /// replication factor). At least one zone must be given.
    #[arg(long = "zone", env = "TEMPO_QUERY_ZONES", value_delimiter = ';')]
    zones: Vec<String>,

    #[arg(long, env = "TEMPO_PARTITION_COUNT", default_value = "64")]
    partition_count: u32,

    #[arg(long, env = "TEMPO_QUERY_CONCURRENT_JOBS", default_value = "8")]
    concurrent_jobs: usize,
}

#[tokio::main]
async fn main() {
    logging::install();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(err) => {
            tracing::error!(error = ?err, "tempo-query failed");
            std::process::exit(EXIT_FAILURE);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let storage = Arc::new(tempo_storage::Driver::local(&cli.storage_root));

    let zones: Vec<Arc<HttpLiveTier>> = cli
        .zones
        .iter()
        .map(|addrs| {
            let addresses = addrs.split(',').map(|s| s.to_string()).collect();
            Arc::new(HttpLiveTier::new(addresses))
        })
        .collect();

    let config = FederatorConfig {
        concurrent_jobs: cli.concurrent_jobs,
        partition_count: cli.partition_count,
        ..FederatorConfig::default()
    };
    let federator = Arc::new(Federator::new(storage, zones, config));
    let state = QueryState { federator };

    let app = Router::new()
        .route("/api/traces/:traceID", get(api::get_trace::<HttpLiveTier>))
        .route("/api/search", get(api::search::<HttpLiveTier>))
        .route(
            "/api/metrics/query_range",
            get(api::metric_query_range::<HttpLiveTier>),
        )
        .with_state(state);

    let prom_handle = metrics_server::install_recorder();
    let metrics_app = metrics_server::build_router(prom_handle);

    let metrics_task = tokio::spawn(
        axum_server::bind(cli.metrics_listen).serve(metrics_app.into_make_service()),
    );

    tracing::info!(listen = %cli.listen, zones = cli.zones.len(), "tempo-query starting");

    tokio::select! {
        res = axum_server::bind(cli.listen).serve(app.into_make_service()) => res.map_err(Into::into),
        res = metrics_task => res?.map_err(Into::into),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
            Ok(())
        }
    }
}
