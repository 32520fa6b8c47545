//! Prometheus `/metrics` endpoint, grounded on the teacher stack's
//! `dekaf::metrics_server::build_router` — same recorder install and route,
//! minus the jemalloc gauge scrape that crate wires in because it links
//! `allocator`; these binaries use the system allocator.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install prometheus recorder")
}

pub fn build_router(handle: PrometheusHandle) -> axum::Router<()> {
    axum::Router::new()
        .route("/metrics", axum::routing::get(render_metrics))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(handle)
}

async fn render_metrics(
    axum::extract::State(handle): axum::extract::State<PrometheusHandle>,
) -> (axum::http::StatusCode, String) {
    (axum::http::StatusCode::OK, handle.render())
}
