//! Internal HTTP surface an ingester exposes so a query binary's
//! [`crate::live_client::HttpLiveTier`] can reach its partition consumers'
//! recent-read path (spec.md §4.4 "ask each owning consumer"). Not part of
//! spec.md §6's public API list — these routes are zone-internal.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use tempo_consumer::PartitionConsumer;
use tempo_log::LocalFileLog;
use tempo_proto::{Span, TenantId, TraceId};
use tokio::sync::Mutex;

use crate::error::AppError;

pub type ConsumerHandle = Arc<Mutex<PartitionConsumer<LocalFileLog>>>;

#[derive(Clone)]
pub struct LiveState {
    pub consumers: Arc<HashMap<u32, ConsumerHandle>>,
}

#[derive(serde::Deserialize)]
pub struct LookupParams {
    tenant: String,
    partition: u32,
    trace_id: String,
}

pub async fn lookup_trace(
    State(state): State<LiveState>,
    Query(params): Query<LookupParams>,
) -> Result<Json<Vec<Span>>, AppError> {
    let tenant = TenantId::new(&params.tenant)
        .map_err(|e| AppError::BadRequest(format!("bad tenant: {e}")))?;
    let trace_id = TraceId::from_hex(&params.trace_id)
        .map_err(|e| AppError::BadRequest(format!("bad trace id: {e}")))?;

    let Some(consumer) = state.consumers.get(&params.partition) else {
        return Ok(Json(Vec::new()));
    };
    let guard = consumer.lock().await;
    let spans = guard.lookup_trace(&tenant, &trace_id).await;
    Ok(Json(spans))
}

#[derive(serde::Deserialize)]
pub struct ScanParams {
    tenant: String,
    partition: u32,
    start: u64,
    end: u64,
}

pub async fn scan_range(
    State(state): State<LiveState>,
    Query(params): Query<ScanParams>,
) -> Result<Json<Vec<Span>>, AppError> {
    // `tenant` is accepted (and validated) for symmetry with `lookup_trace`
    // and because a future per-tenant live tier would need it, but
    // `PartitionConsumer::scan_range` is not itself tenant-scoped today
    // (spec.md §4.2's in-memory map indexes by tenant+trace, not a
    // tenant-filtered range index).
    let _tenant = TenantId::new(&params.tenant)
        .map_err(|e| AppError::BadRequest(format!("bad tenant: {e}")))?;

    let Some(consumer) = state.consumers.get(&params.partition) else {
        return Ok(Json(Vec::new()));
    };
    let guard = consumer.lock().await;
    let spans = guard.scan_range(params.start, params.end).await;
    Ok(Json(spans))
}
