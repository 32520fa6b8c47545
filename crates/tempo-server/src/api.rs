//! Public HTTP surface named by spec.md §6: span submission on the ingress
//! binary, trace lookup/search/metric-range on the query binary.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tempo_log::PartitionLog;
use tempo_proto::{SpanBatch, TraceId};
use tempo_query::{Federator, LiveTier};

use crate::error::AppError;
use crate::tenant::TenantHeader;

// ---- ingress --------------------------------------------------------------

#[derive(Clone)]
pub struct IngressState<L: PartitionLog> {
    pub router: Arc<tempo_ingress::Router<L>>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    partitions: Vec<PartitionOffset>,
}

#[derive(Debug, Serialize)]
struct PartitionOffset {
    partition: u32,
    offset: u64,
}

pub async fn submit<L: PartitionLog>(
    State(state): State<IngressState<L>>,
    TenantHeader(tenant): TenantHeader,
    Json(batch): Json<SpanBatch>,
) -> Result<Json<SubmitResponse>, AppError> {
    let outcome = state.router.submit(&tenant, batch).await?;
    Ok(Json(SubmitResponse {
        partitions: outcome
            .partition_offsets
            .into_iter()
            .map(|(partition, offset)| PartitionOffset { partition, offset })
            .collect(),
    }))
}

// ---- query ------------------------------------------------------------------

#[derive(Clone)]
pub struct QueryState<L: LiveTier> {
    pub federator: Arc<Federator<L>>,
}

#[derive(Debug, Deserialize)]
pub struct TraceQuery {
    #[serde(default)]
    strict: bool,
}

#[derive(Debug, Serialize)]
pub struct TraceResponse {
    spans: Vec<tempo_proto::Span>,
    incomplete: bool,
}

pub async fn get_trace<L: LiveTier>(
    State(state): State<QueryState<L>>,
    TenantHeader(tenant): TenantHeader,
    Path(trace_id): Path<String>,
    Query(q): Query<TraceQuery>,
) -> Result<Json<TraceResponse>, AppError> {
    let trace_id = TraceId::from_hex(&trace_id)
        .map_err(|e| AppError::BadRequest(format!("bad trace id: {e}")))?;
    let result = state
        .federator
        .lookup_trace(&tenant, &trace_id, q.strict)
        .await?;
    Ok(Json(TraceResponse {
        spans: result.spans,
        incomplete: result.incomplete,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    /// Opaque filter expression, forwarded to the federator's `Search`
    /// variant. Full TraceQL grammar is out of scope (spec.md §1); this
    /// implementation does not yet filter on `q` — it is accepted and
    /// threaded through so a later grammar can be layered on without an
    /// API break.
    #[serde(default)]
    #[allow(dead_code)]
    q: String,
    start: u64,
    end: u64,
    #[serde(default)]
    strict: bool,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    spans: Vec<tempo_proto::Span>,
    incomplete: bool,
}

pub async fn search<L: LiveTier>(
    State(state): State<QueryState<L>>,
    TenantHeader(tenant): TenantHeader,
    Query(q): Query<SearchQuery>,
) -> Result<Json<SearchResponse>, AppError> {
    let mut result = state
        .federator
        .search(&tenant, q.start, q.end, q.strict)
        .await?;
    if let Some(limit) = q.limit {
        result.spans.truncate(limit);
    }
    Ok(Json(SearchResponse {
        spans: result.spans,
        incomplete: result.incomplete,
    }))
}

#[derive(Debug, Deserialize)]
pub struct MetricRangeQuery {
    #[serde(default)]
    #[allow(dead_code)]
    q: String,
    start: u64,
    end: u64,
    step: u64,
}

#[derive(Debug, Serialize)]
pub struct MetricRangeBucket {
    start_unix_nano: u64,
    span_count: u64,
}

#[derive(Debug, Serialize)]
pub struct MetricRangeResponse {
    buckets: Vec<MetricRangeBucket>,
    incomplete: bool,
}

/// Buckets the federator's already-computed span set into `step`-sized
/// windows. A full PromQL evaluator is out of scope (spec.md §1); this is
/// the bucketed span-count shape the `MetricRange` operator variant
/// specifies (SPEC_FULL.md §12).
pub async fn metric_query_range<L: LiveTier>(
    State(state): State<QueryState<L>>,
    TenantHeader(tenant): TenantHeader,
    Query(q): Query<MetricRangeQuery>,
) -> Result<Json<MetricRangeResponse>, AppError> {
    if q.step == 0 {
        return Err(AppError::BadRequest("step must be nonzero".into()));
    }

    let result = state.federator.search(&tenant, q.start, q.end, false).await?;

    let mut buckets: Vec<MetricRangeBucket> = Vec::new();
    let mut cursor = q.start;
    while cursor < q.end {
        let bucket_end = (cursor + q.step).min(q.end);
        let span_count = result
            .spans
            .iter()
            .filter(|s| s.start_unix_nano >= cursor && s.start_unix_nano < bucket_end)
            .count() as u64;
        buckets.push(MetricRangeBucket {
            start_unix_nano: cursor,
            span_count,
        });
        cursor = bucket_end;
    }

    Ok(Json(MetricRangeResponse {
        buckets,
        incomplete: result.incomplete,
    }))
}
