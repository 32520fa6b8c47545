use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tempo_compactor::{Compactor, CompactorConfig};
use tempo_proto::TenantId;
use tempo_server::ring_bootstrap::{self, Peer};
use tempo_server::{logging, metrics_server, EXIT_BAD_CONFIG, EXIT_FAILURE, EXIT_SUCCESS};

/// Groups and merges blocks, then enforces retention (spec.md §4.5). No
/// HTTP API beyond `/metrics` — spec.md §1 excludes a CLI/HTTP surface as a
/// feature to specify, but ambient observability is carried regardless
/// (SPEC_FULL.md §12).
#[derive(Parser, Debug)]
#[command(about, version)]
struct Cli {
    #[arg(long, env = "TEMPO_METRICS_LISTEN", default_value = "0.0.0.0:3401")]
    metrics_listen: std::net::SocketAddr,

    #[arg(long, env = "TEMPO_STORAGE_ROOT")]
    storage_root: std::path::PathBuf,

    /// Tenants this instance is responsible for compacting, gated by ring
    /// ownership (spec.md §4.5).
    #[arg(long, env = "TEMPO_COMPACTOR_TENANTS", value_delimiter = ',')]
    tenants: Vec<String>,

    #[arg(long, env = "TEMPO_SELF_ADDRESS")]
    self_address: String,

    #[arg(long, env = "TEMPO_SELF_ZONE", default_value = "zone-a")]
    self_zone: String,

    #[arg(long, env = "TEMPO_RING_PEERS", value_delimiter = ',')]
    ring_peers: Vec<Peer>,

    #[arg(long, env = "TEMPO_COMPACT_INTERVAL", value_parser = humantime::parse_duration, default_value = "1m")]
    compact_interval: Duration,

    #[arg(long, env = "TEMPO_RETENTION", value_parser = humantime::parse_duration, default_value = "336h")]
    retention: Duration,

    #[arg(long, env = "TEMPO_DELETION_GRACE", value_parser = humantime::parse_duration, default_value = "1h")]
    deletion_grace: Duration,

    #[arg(long, env = "TEMPO_MAX_GROUP_BYTES", default_value = "67108864")]
    max_group_bytes: u64,
}

#[tokio::main]
async fn main() {
    logging::install();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(err) => {
            tracing::error!(error = ?err, "tempo-compactor failed");
            std::process::exit(EXIT_FAILURE);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if cli.tenants.is_empty() {
        tracing::error!("--tenants must name at least one tenant to compact");
        std::process::exit(EXIT_BAD_CONFIG);
    }
    let tenants: Vec<TenantId> = cli
        .tenants
        .iter()
        .map(|t| TenantId::new(t))
        .collect::<Result<_, _>>()
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "invalid --tenants entry");
            std::process::exit(EXIT_BAD_CONFIG);
        });

    let storage = Arc::new(tempo_storage::Driver::local(&cli.storage_root));
    let ring = ring_bootstrap::build(&cli.self_zone, &cli.self_address, &cli.ring_peers);

    let compactor = Arc::new(Compactor::new(
        storage,
        ring,
        cli.self_address.clone(),
        CompactorConfig {
            max_group_bytes: cli.max_group_bytes,
            retention: cli.retention,
            deletion_grace: cli.deletion_grace,
        },
    ));

    let prom_handle = metrics_server::install_recorder();
    let metrics_app = metrics_server::build_router(prom_handle);
    let metrics_task = tokio::spawn(
        axum_server::bind(cli.metrics_listen).serve(metrics_app.into_make_service()),
    );

    let compact_loop = {
        let compactor = compactor.clone();
        async move {
            let mut ticker = tokio::time::interval(cli.compact_interval);
            loop {
                ticker.tick().await;
                for tenant in &tenants {
                    if let Err(e) = compactor.compact_tenant(tenant).await {
                        tracing::warn!(tenant = tenant.as_str(), error = ?e, "compaction pass failed");
                    }
                    let now_unix_nano = std::time::SystemTime::now()
                        .duration_since(std::time::UNIX_EPOCH)
                        .unwrap_or_default()
                        .as_nanos() as u64;
                    if let Err(e) = compactor.run_retention(tenant, now_unix_nano).await {
                        tracing::warn!(tenant = tenant.as_str(), error = ?e, "retention pass failed");
                    }
                }
                let failures = compactor.sweep_deletions(std::time::Instant::now()).await;
                if failures > 0 {
                    tracing::warn!(failures, "some queued block deletions failed and were re-queued");
                }
            }
        }
    };

    tracing::info!(tenants = ?cli.tenants.clone(), "tempo-compactor starting");

    tokio::select! {
        res = metrics_task => res?.map_err(Into::into),
        _ = compact_loop => unreachable!("compact loop never returns"),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
            Ok(())
        }
    }
}
