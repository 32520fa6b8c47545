//! Query federation: shards a trace-id lookup or a time-range TraceQL search
//! across the live tier (recent, in-memory) and the archive tier (compacted
//! blocks), merges the results, and caches per-fingerprint evaluations
//! (spec.md §4.4).

mod archive;
mod cache;
mod live;
mod merge;
mod sharding;

pub use archive::candidate_blocks;
pub use cache::{fingerprint, QueryCache};
pub use live::{Error as LiveError, LiveTier};
pub use merge::merge_dedup;
pub use sharding::{owning_partition, split_range, JobLimiter, DEFAULT_JOB_DEADLINE};

use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tempo_proto::{Span, TenantId, TraceId};
use tempo_storage::Driver;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("query returned a partial result under strict mode")]
    PartialResult,
}

/// A federated query result. `incomplete` is set when at least one shard
/// (a zone pair, or a sub-interval job) failed in both zones and the
/// caller did not request `strict` mode (spec.md §4.4 "Failure").
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub spans: Vec<Span>,
    pub incomplete: bool,
}

/// Tunables for range-query sharding (spec.md §4.4 "Sharding").
#[derive(Debug, Clone)]
pub struct FederatorConfig {
    pub target_bytes_per_job: u64,
    pub avg_bytes_per_ns: f64,
    pub concurrent_jobs: usize,
    pub partition_count: u32,
}

impl Default for FederatorConfig {
    fn default() -> Self {
        FederatorConfig {
            target_bytes_per_job: 64 * 1024 * 1024,
            avg_bytes_per_ns: 1.0,
            concurrent_jobs: 8,
            partition_count: 64,
        }
    }
}

/// Federates trace-id lookups and range searches across `L`'s two replica
/// zones (spec.md §4.2's replication factor) and the archive tier. One
/// `Federator` is shared by the query-frontend/querier HTTP surface.
pub struct Federator<L: LiveTier> {
    storage: Arc<Driver>,
    zones: Vec<Arc<L>>,
    cache: QueryCache,
    config: FederatorConfig,
}

impl<L: LiveTier> Federator<L> {
    pub fn new(storage: Arc<Driver>, zones: Vec<Arc<L>>, config: FederatorConfig) -> Self {
        Federator {
            storage,
            zones,
            cache: QueryCache::new(),
            config,
        }
    }

    /// Trace-id lookup: hedges across both zones' live tiers and, in
    /// parallel, consults the tenant index for candidate archive blocks
    /// (spec.md §4.4 "Sharding" for trace-id lookup).
    pub async fn lookup_trace(
        &self,
        tenant: &TenantId,
        trace_id: &TraceId,
        strict: bool,
    ) -> Result<QueryResult, Error> {
        let partition = owning_partition(trace_id, self.config.partition_count);

        let (live_spans, live_incomplete) = self.hedge_lookup(tenant, partition, trace_id).await;

        let archive_spans = match candidate_blocks(&self.storage, tenant, None, None).await {
            Ok(candidates) => archive::lookup_trace(&self.storage, tenant, trace_id, &candidates).await,
            Err(_) => Vec::new(),
        };

        let incomplete = live_incomplete;
        if incomplete && strict {
            return Err(Error::PartialResult);
        }

        let merged = merge_dedup(vec![live_spans, archive_spans]);
        Ok(QueryResult {
            spans: merged,
            incomplete,
        })
    }

    /// Range search: splits `[start, end]` into sub-interval jobs bounded by
    /// `target_bytes_per_job / avg_bytes_per_ns`, runs up to `concurrent_jobs`
    /// at once, and merges every job's partial result (spec.md §4.4
    /// "Sharding" for range queries).
    pub async fn search(
        &self,
        tenant: &TenantId,
        start: u64,
        end: u64,
        strict: bool,
    ) -> Result<QueryResult, Error> {
        let intervals = split_range(
            start,
            end,
            self.config.target_bytes_per_job,
            self.config.avg_bytes_per_ns,
        );
        let candidates = candidate_blocks(&self.storage, tenant, Some(start), Some(end))
            .await
            .unwrap_or_default();

        let limiter = Arc::new(JobLimiter::new(self.config.concurrent_jobs));
        let mut tasks = FuturesUnordered::new();
        for (job_start, job_end) in intervals {
            let limiter = limiter.clone();
            let candidates = candidates.clone();
            tasks.push(async move {
                let _permit = limiter.acquire().await;
                self.run_range_job(tenant, job_start, job_end, &candidates).await
            });
        }

        let mut all_spans = Vec::new();
        let mut incomplete = false;
        while let Some((spans, job_incomplete)) = tasks.next().await {
            all_spans.push(spans);
            incomplete |= job_incomplete;
        }

        if incomplete && strict {
            return Err(Error::PartialResult);
        }

        let merged = merge_dedup(all_spans);
        Ok(QueryResult {
            spans: merged,
            incomplete,
        })
    }

    async fn run_range_job(
        &self,
        tenant: &TenantId,
        start: u64,
        end: u64,
        candidates: &[tempo_proto::BlockMeta],
    ) -> (Vec<Span>, bool) {
        let key = fingerprint(
            tenant,
            "search",
            start,
            end,
            &format!("{}", candidates.len()),
        );

        let storage = self.storage.clone();
        let tenant_owned = tenant.clone();
        let candidates_owned = candidates.to_vec();
        let archive_spans = self
            .cache
            .evaluate(key, async move {
                archive::scan_range(&storage, &tenant_owned, start, end, &candidates_owned).await
            })
            .await;

        let (live_spans, live_incomplete) = self.hedge_scan(tenant, start, end).await;

        let mut spans = (*archive_spans).clone();
        spans.extend(live_spans);
        (spans, live_incomplete)
    }

    /// Hedged point lookup across every replica zone: the first zone to
    /// answer successfully wins. If every zone fails, the shard is flagged
    /// incomplete rather than the whole query failing outright (spec.md
    /// §4.4 "Failure": "A job failure is retried once to the peer zone. If
    /// both fail, the query returns a partial result flagged as incomplete
    /// unless `strict` mode is set").
    async fn hedge_lookup(&self, tenant: &TenantId, partition: u32, trace_id: &TraceId) -> (Vec<Span>, bool) {
        let mut tasks = FuturesUnordered::new();
        for zone in &self.zones {
            let zone = zone.clone();
            let tenant = tenant.clone();
            let trace_id = *trace_id;
            tasks.push(async move { zone.lookup_trace(&tenant, partition, &trace_id).await });
        }
        while let Some(result) = tasks.next().await {
            if let Ok(spans) = result {
                return (spans, false);
            }
        }
        (Vec::new(), true)
    }

    async fn hedge_scan(&self, tenant: &TenantId, start: u64, end: u64) -> (Vec<Span>, bool) {
        let partitions: Vec<u32> = (0..self.config.partition_count).collect();
        let mut tasks = FuturesUnordered::new();
        for partition in partitions {
            for zone in &self.zones {
                let zone = zone.clone();
                let tenant = tenant.clone();
                tasks.push(async move { zone.scan_range(&tenant, partition, start, end).await });
            }
        }

        let mut spans = Vec::new();
        let mut any_ok = false;
        let mut any_err = false;
        while let Some(result) = tasks.next().await {
            match result {
                Ok(found) => {
                    any_ok = true;
                    spans.extend(found);
                }
                Err(_) => any_err = true,
            }
        }
        // Incomplete only if every replica of at least one shard failed;
        // with no live tier configured at all (`any_ok` false, `any_err`
        // false) there's nothing to be incomplete about.
        let incomplete = any_err && !any_ok;
        (spans, incomplete)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use async_trait::async_trait;
    use tempo_proto::{SpanId, SpanKind, Status};

    fn span(trace: u8, start: u64) -> Span {
        Span {
            trace_id: TraceId([trace; 16]),
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

    struct FakeZone {
        fails: bool,
        spans: Vec<Span>,
    }

    #[async_trait]
    impl LiveTier for FakeZone {
        async fn lookup_trace(&self, _tenant: &TenantId, _partition: u32, trace_id: &TraceId) -> Result<Vec<Span>, live::Error> {
            if self.fails {
                return Err(live::Error::Unavailable);
            }
            Ok(self.spans.iter().filter(|s| &s.trace_id == trace_id).cloned().collect())
        }

        async fn scan_range(&self, _tenant: &TenantId, _partition: u32, start: u64, end: u64) -> Result<Vec<Span>, live::Error> {
            if self.fails {
                return Err(live::Error::Unavailable);
            }
            Ok(self
                .spans
                .iter()
                .filter(|s| s.start_unix_nano >= start && s.start_unix_nano <= end)
                .cloned()
                .collect())
        }
    }

    #[tokio::test]
    async fn lookup_succeeds_when_one_zone_is_down() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Driver::local(dir.path()));
        let zone_a = Arc::new(FakeZone { fails: true, spans: vec![] });
        let zone_b = Arc::new(FakeZone { fails: false, spans: vec![span(1, 100)] });
        let federator = Federator::new(
            storage,
            vec![zone_a, zone_b],
            FederatorConfig {
                partition_count: 16,
                ..Default::default()
            },
        );

        let tenant = TenantId::new("acme").unwrap();
        let result = federator.lookup_trace(&tenant, &TraceId([1; 16]), false).await.unwrap();
        assert_eq!(result.spans.len(), 1);
        assert!(!result.incomplete);
    }

    #[tokio::test]
    async fn lookup_flags_incomplete_when_every_zone_fails() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Driver::local(dir.path()));
        let zone_a = Arc::new(FakeZone { fails: true, spans: vec![] });
        let zone_b = Arc::new(FakeZone { fails: true, spans: vec![] });
        let federator = Federator::new(storage, vec![zone_a, zone_b], FederatorConfig::default());

        let tenant = TenantId::new("acme").unwrap();
        let result = federator.lookup_trace(&tenant, &TraceId([1; 16]), false).await.unwrap();
        assert!(result.spans.is_empty());
        assert!(result.incomplete);
    }

    #[tokio::test]
    async fn strict_mode_fails_instead_of_returning_partial() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Driver::local(dir.path()));
        let zone_a = Arc::new(FakeZone { fails: true, spans: vec![] });
        let federator = Federator::new(storage, vec![zone_a], FederatorConfig::default());

        let tenant = TenantId::new("acme").unwrap();
        let err = federator
            .lookup_trace(&tenant, &TraceId([1; 16]), true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PartialResult));
    }

    #[tokio::test]
    async fn lookup_merges_live_and_archive_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Driver::local(dir.path()));
        let tenant = TenantId::new("acme").unwrap();

        let (bytes, meta) = tempo_block::build_block(&tenant, 0, vec![span(7, 11_000_000_000)]).unwrap();
        storage
            .put(&tempo_storage::layout::block_data_key(&tenant, meta.block_id), bytes::Bytes::from(bytes))
            .await
            .unwrap();
        let index = tempo_index::IndexClient::new(&storage);
        index.add_block(&tenant, meta).await.unwrap();

        let zone = Arc::new(FakeZone { fails: false, spans: vec![span(7, 1_000)] });
        let federator = Federator::new(storage, vec![zone], FederatorConfig::default());

        let result = federator.lookup_trace(&tenant, &TraceId([7; 16]), false).await.unwrap();
        assert_eq!(result.spans.len(), 2);
    }
}
