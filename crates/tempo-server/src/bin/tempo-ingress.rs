use std::sync::Arc;

use axum::routing::post;
use axum::Router;
use clap::Parser;
use tempo_ingress::RateLimitConfig;
use tempo_log::LocalFileLog;
use tempo_server::api::{self, IngressState};
use tempo_server::{logging, metrics_server, EXIT_BAD_CONFIG, EXIT_FAILURE, EXIT_SUCCESS};

/// Validates, rate-limits, partitions, and durably appends span batches to
/// the partition log (spec.md §4.1).
#[derive(Parser, Debug)]
#[command(about, version)]
struct Cli {
    /// Address to serve the span-submission API on.
    #[arg(long, env = "TEMPO_INGRESS_LISTEN", default_value = "0.0.0.0:3100")]
    listen: std::net::SocketAddr,

    /// Address to serve `/metrics` on.
    #[arg(long, env = "TEMPO_METRICS_LISTEN", default_value = "0.0.0.0:3101")]
    metrics_listen: std::net::SocketAddr,

    /// Directory backing the local partition log (the only `PartitionLog`
    /// implementation this workspace ships; spec.md §2 marks a real broker
    /// external).
    #[arg(long, env = "TEMPO_LOG_ROOT")]
    log_root: std::path::PathBuf,

    /// Number of partitions the log is divided into.
    #[arg(long, env = "TEMPO_PARTITION_COUNT", default_value = "64")]
    partition_count: u32,

    /// Known tenant allowlist. Empty means any well-formed tenant id is
    /// accepted (spec.md §4.1).
    #[arg(long, env = "TEMPO_KNOWN_TENANTS", value_delimiter = ',')]
    known_tenants: Vec<String>,

    /// Default per-tenant byte budget, tokens/sec.
    #[arg(long, env = "TEMPO_RATE_LIMIT_BYTES_PER_SEC")]
    rate_limit_bytes_per_sec: Option<f64>,

    /// Default per-tenant span budget, tokens/sec.
    #[arg(long, env = "TEMPO_RATE_LIMIT_SPANS_PER_SEC")]
    rate_limit_spans_per_sec: Option<f64>,

    /// Deadline for the append-retry loop before a batch fails outright.
    #[arg(long, env = "TEMPO_APPEND_DEADLINE", value_parser = humantime::parse_duration, default_value = "5s")]
    append_deadline: std::time::Duration,
}

#[tokio::main]
async fn main() {
    logging::install();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(err) => {
            tracing::error!(error = ?err, "tempo-ingress failed");
            std::process::exit(EXIT_FAILURE);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    for tenant in &cli.known_tenants {
        if tempo_proto::TenantId::new(tenant).is_err() {
            tracing::error!(tenant, "invalid --known-tenants entry");
            std::process::exit(EXIT_BAD_CONFIG);
        }
    }

    let log = LocalFileLog::open(&cli.log_root, cli.partition_count).await?;

    let mut default_limits = RateLimitConfig::unlimited();
    if let Some(bytes_per_sec) = cli.rate_limit_bytes_per_sec {
        default_limits.bytes_per_sec = bytes_per_sec;
        default_limits.burst_bytes = bytes_per_sec * 2.0;
    }
    if let Some(spans_per_sec) = cli.rate_limit_spans_per_sec {
        default_limits.spans_per_sec = spans_per_sec;
        default_limits.burst_spans = spans_per_sec * 2.0;
    }

    let mut router = tempo_ingress::Router::new(log, default_limits).with_append_deadline(cli.append_deadline);
    if !cli.known_tenants.is_empty() {
        let tenants: Vec<_> = cli
            .known_tenants
            .iter()
            .map(|t| tempo_proto::TenantId::new(t).unwrap())
            .collect();
        router = router.with_known_tenants(tenants);
    }

    let state = IngressState {
        router: Arc::new(router),
    };

    let app = Router::new()
        .route("/api/push", post(api::submit::<LocalFileLog>))
        .with_state(state);

    let prom_handle = metrics_server::install_recorder();
    let metrics_app = metrics_server::build_router(prom_handle);

    let metrics_task = tokio::spawn(
        axum_server::bind(cli.metrics_listen).serve(metrics_app.into_make_service()),
    );

    tracing::info!(listen = %cli.listen, metrics = %cli.metrics_listen, "tempo-ingress starting");

    tokio::select! {
        res = axum_server::bind(cli.listen).serve(app.into_make_service()) => res.map_err(Into::into),
        res = metrics_task => res?.map_err(Into::into),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
            Ok(())
        }
    }
}
