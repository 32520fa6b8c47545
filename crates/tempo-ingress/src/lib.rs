//! Ingress router: validation, per-tenant rate limiting, trace-id hashing,
//! partition selection, and append-with-backoff to the partition log — all
//! of spec.md §4.1, verbatim.

mod ratelimit;

pub use ratelimit::RateLimitConfig;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tempo_log::PartitionLog;
use tempo_proto::{SpanBatch, TenantId};

use ratelimit::TenantBucket;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("tenant is not recognized")]
    Unauthenticated,
    #[error("tenant rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
    #[error("the partition log is unavailable")]
    Unavailable,
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<tempo_proto::IdError> for Error {
    fn from(e: tempo_proto::IdError) -> Self {
        Error::Malformed(e.to_string())
    }
}

impl From<tempo_proto::ValidationError> for Error {
    fn from(e: tempo_proto::ValidationError) -> Self {
        Error::Malformed(e.to_string())
    }
}

/// Deadline for the append-retry loop before a batch fails outright
/// (spec.md §4.1: "retry with exponential backoff up to a deadline").
pub const DEFAULT_APPEND_DEADLINE: Duration = Duration::from_secs(5);

/// Validates, rate-limits, partitions, and appends span batches to the
/// partition log. Holds no per-tenant allowlist by default: any
/// well-formed `TenantId` is accepted unless `known_tenants` is populated,
/// in which case it acts as the "reject if ... unknown" gate spec.md §4.1
/// names (an explicit allowlist is the obvious reading when one is
/// configured; the common single-tenant/open-multitenancy deployment leaves
/// it empty).
pub struct Router<L: PartitionLog> {
    log: L,
    default_limits: RateLimitConfig,
    tenant_limits: HashMap<TenantId, RateLimitConfig>,
    known_tenants: Option<std::collections::HashSet<TenantId>>,
    buckets: Mutex<HashMap<TenantId, TenantBucket>>,
    append_deadline: Duration,
}

/// Outcome of `Router::submit`: the partitions a batch's spans landed on and
/// the log offset each partition's append was assigned.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub partition_offsets: Vec<(u32, tempo_log::Offset)>,
}

impl<L: PartitionLog> Router<L> {
    pub fn new(log: L, default_limits: RateLimitConfig) -> Self {
        Router {
            log,
            default_limits,
            tenant_limits: HashMap::new(),
            known_tenants: None,
            buckets: Mutex::new(HashMap::new()),
            append_deadline: DEFAULT_APPEND_DEADLINE,
        }
    }

    pub fn with_tenant_limits(mut self, tenant: TenantId, limits: RateLimitConfig) -> Self {
        self.tenant_limits.insert(tenant, limits);
        self
    }

    pub fn with_known_tenants(mut self, tenants: impl IntoIterator<Item = TenantId>) -> Self {
        self.known_tenants = Some(tenants.into_iter().collect());
        self
    }

    pub fn with_append_deadline(mut self, deadline: Duration) -> Self {
        self.append_deadline = deadline;
        self
    }

    /// Validate, rate-limit, partition, and durably append `batch` on behalf
    /// of `tenant`. Either every span in the batch is appended, or the whole
    /// call fails — partial success is never exposed to the caller (spec.md
    /// §4.1).
    pub async fn submit(
        &self,
        tenant: &TenantId,
        batch: SpanBatch,
    ) -> Result<SubmitOutcome, Error> {
        if let Some(known) = &self.known_tenants {
            if !known.contains(tenant) {
                return Err(Error::Unauthenticated);
            }
        }

        batch.validate()?;

        let total_bytes = batch.total_bytes();
        let total_spans = batch.spans.len();
        self.check_rate_limit(tenant, total_bytes, total_spans)?;

        let mut by_partition: HashMap<u32, Vec<tempo_proto::Span>> = HashMap::new();
        for span in batch.spans {
            let key = span.trace_id.partition_key();
            let partition = key % self.log.partition_count();
            by_partition.entry(partition).or_default().push(span);
        }

        let mut partition_offsets = Vec::with_capacity(by_partition.len());
        for (partition, spans) in by_partition {
            let sub_batch = SpanBatch { spans };
            let offset = self
                .append_with_backoff(partition, tenant.clone(), sub_batch)
                .await?;
            partition_offsets.push((partition, offset));
        }

        Ok(SubmitOutcome { partition_offsets })
    }

    fn check_rate_limit(
        &self,
        tenant: &TenantId,
        bytes: usize,
        spans: usize,
    ) -> Result<(), Error> {
        let limits = self
            .tenant_limits
            .get(tenant)
            .cloned()
            .unwrap_or(self.default_limits);

        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets
            .entry(tenant.clone())
            .or_insert_with(|| TenantBucket::new(limits));
        bucket.try_consume(bytes as f64, spans as f64, Instant::now())
            .map_err(|retry_after| Error::RateLimited { retry_after })
    }

    /// Retries the partition append with exponential backoff until either it
    /// succeeds or `append_deadline` elapses, at which point the whole batch
    /// fails (spec.md §4.1).
    async fn append_with_backoff(
        &self,
        partition: u32,
        tenant: TenantId,
        batch: SpanBatch,
    ) -> Result<tempo_log::Offset, Error> {
        let start = Instant::now();
        let mut backoff = Duration::from_millis(20);

        loop {
            match self.log.append(partition, tenant.clone(), batch.clone()).await {
                Ok(offset) => return Ok(offset),
                Err(e) => {
                    if start.elapsed() >= self.append_deadline {
                        tracing::warn!(partition, error = %e, "append deadline exceeded, failing batch");
                        return Err(Error::Unavailable);
                    }
                    tracing::debug!(partition, error = %e, ?backoff, "append failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(1));
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempo_log::LocalFileLog;
    use tempo_proto::{Span, SpanId, SpanKind, Status, TraceId};

    fn span(trace: [u8; 16], start: u64) -> Span {
        Span {
            trace_id: TraceId(trace),
            span_id: SpanId([1; 8]),
            parent_span_id: None,
            service_name: "svc".into(),
            operation_name: "op".into(),
            kind: SpanKind::Server,
            start_unix_nano: start,
            duration_nano: 10,
            status: Status::unset(),
            attributes: vec![],
            events: vec![],
            links: vec![],
        }
    }

    async fn router(partitions: u32) -> (Router<LocalFileLog>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let log = LocalFileLog::open(dir.path(), partitions).await.unwrap();
        let limits = RateLimitConfig {
            bytes_per_sec: 1_000_000.0,
            burst_bytes: 1_000_000.0,
            spans_per_sec: 1_000.0,
            burst_spans: 1_000.0,
        };
        (Router::new(log, limits), dir)
    }

    #[tokio::test]
    async fn same_trace_id_always_routes_to_same_partition() {
        let (router, _dir) = router(8).await;
        let tenant = TenantId::new("acme").unwrap();
        let trace = [7u8; 16];

        let batch = SpanBatch {
            spans: vec![span(trace, 1), span(trace, 2), span(trace, 3)],
        };
        let outcome = router.submit(&tenant, batch).await.unwrap();
        assert_eq!(outcome.partition_offsets.len(), 1);
    }

    #[tokio::test]
    async fn rate_limit_rejects_over_burst() {
        let dir = tempfile::tempdir().unwrap();
        let log = LocalFileLog::open(dir.path(), 4).await.unwrap();
        let limits = RateLimitConfig {
            bytes_per_sec: 1_000_000.0,
            burst_bytes: 1_000_000.0,
            spans_per_sec: 1.0,
            burst_spans: 1.0,
        };
        let router = Router::new(log, limits);
        let tenant = TenantId::new("t").unwrap();

        let batch = SpanBatch {
            spans: vec![span([1; 16], 1), span([2; 16], 1), span([3; 16], 1)],
        };
        let err = router.submit(&tenant, batch).await.unwrap_err();
        assert!(matches!(err, Error::RateLimited { .. }));
    }

    #[tokio::test]
    async fn unknown_tenant_rejected_when_allowlist_configured() {
        let dir = tempfile::tempdir().unwrap();
        let log = LocalFileLog::open(dir.path(), 4).await.unwrap();
        let limits = RateLimitConfig {
            bytes_per_sec: 1_000_000.0,
            burst_bytes: 1_000_000.0,
            spans_per_sec: 1_000.0,
            burst_spans: 1_000.0,
        };
        let known = TenantId::new("known").unwrap();
        let router = Router::new(log, limits).with_known_tenants([known.clone()]);

        let unknown = TenantId::new("stranger").unwrap();
        let batch = SpanBatch {
            spans: vec![span([1; 16], 1)],
        };
        let err = router.submit(&unknown, batch).await.unwrap_err();
        assert!(matches!(err, Error::Unauthenticated));
    }

    #[tokio::test]
    async fn malformed_span_rejects_whole_batch() {
        let (router, _dir) = router(4).await;
        let tenant = TenantId::new("t").unwrap();
        let mut bad = span([1; 16], 1);
        bad.operation_name = "x".repeat(tempo_proto::span::MAX_SPAN_NAME_BYTES + 1);
        let batch = SpanBatch {
            spans: vec![span([2; 16], 1), bad],
        };
        let err = router.submit(&tenant, batch).await.unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
    }
}
