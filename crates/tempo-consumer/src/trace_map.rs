//! The in-memory trace map: spans grouped by `(tenant, TraceID)`, sharded by
//! hash of `TraceID` into independently-locked shards to bound contention
//! (spec.md §4.2 "In-memory trace map").

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use tempo_proto::{Span, SpanId, TenantId, TraceId};
use tokio::sync::RwLock;

/// Number of independently-locked shards the trace map is split across.
pub const DEFAULT_SHARD_COUNT: usize = 256;

/// One open trace's accumulated spans. Append-only until `sealed` is set by
/// a cut, at which point it is removed from the map rather than mutated
/// further: a span arriving for an already-sealed trace starts a fresh
/// entry, per spec.md §4.2 (a sealed trace group is handed off wholesale to
/// the cutting protocol, not kept around for further appends).
#[derive(Debug)]
pub struct TraceEntry {
    pub spans: Vec<Span>,
    pub first_seen: Instant,
    pub last_updated: Instant,
    /// Identity tuples `(SpanID, StartNanos)` already present, for
    /// dedup-by-identity on WAL replay (spec.md §4.2 "Crash recovery").
    seen: HashSet<(SpanId, u64)>,
    pub byte_estimate: u64,
    /// Lowest log offset of any batch that contributed a span to this
    /// entry. Used to compute a safe WAL-pruning low-watermark: a segment
    /// is only deletable once every entry referencing it has been cut.
    pub min_offset: u64,
}

impl TraceEntry {
    fn new(span: Span, now: Instant, offset: u64) -> Self {
        let byte_estimate = estimate_span_bytes(&span);
        let mut seen = HashSet::new();
        seen.insert((span.span_id, span.start_unix_nano));
        TraceEntry {
            spans: vec![span],
            first_seen: now,
            last_updated: now,
            seen,
            byte_estimate,
            min_offset: offset,
        }
    }

    /// Appends `span` unless its identity tuple is already present. Returns
    /// the number of bytes added to this entry's estimate (zero if the span
    /// was a duplicate).
    fn append(&mut self, span: Span, now: Instant, offset: u64) -> u64 {
        let key = (span.span_id, span.start_unix_nano);
        if !self.seen.insert(key) {
            return 0;
        }
        let added = estimate_span_bytes(&span);
        self.byte_estimate += added;
        self.last_updated = now;
        self.min_offset = self.min_offset.min(offset);
        self.spans.push(span);
        added
    }
}

fn estimate_span_bytes(span: &Span) -> u64 {
    let fixed = 16 + 8 + 8 + 8 + 8 + 1 + 1u64;
    let names = (span.service_name.len() + span.operation_name.len()) as u64;
    let attrs: u64 = span
        .attributes
        .iter()
        .map(|a| (a.key.len() + 16) as u64)
        .sum();
    fixed + names + attrs
}

struct Shard {
    traces: HashMap<(TenantId, TraceId), TraceEntry>,
}

/// Sharded trace map. Each shard has exactly one writer — the owning
/// partition consumer — and many concurrent readers on the recent-read path
/// (spec.md §5 "Shared-resource policy"), so each shard is an `RwLock`
/// rather than a plain `Mutex`.
pub struct TraceMap {
    shards: Vec<RwLock<Shard>>,
}

/// Summary of one append, used by the caller to drive tenant-level cut
/// triggers without re-walking the map.
pub struct AppendOutcome {
    pub bytes_added: u64,
    pub is_new_trace: bool,
}

impl TraceMap {
    pub fn new(shard_count: usize) -> Self {
        let shards = (0..shard_count.max(1))
            .map(|_| {
                RwLock::new(Shard {
                    traces: HashMap::new(),
                })
            })
            .collect();
        TraceMap { shards }
    }

    fn shard_index(&self, trace_id: &TraceId) -> usize {
        (trace_id.partition_key() as usize) % self.shards.len()
    }

    pub async fn append(
        &self,
        tenant: &TenantId,
        span: Span,
        now: Instant,
        offset: u64,
    ) -> AppendOutcome {
        let idx = self.shard_index(&span.trace_id);
        let mut shard = self.shards[idx].write().await;
        let key = (tenant.clone(), span.trace_id);

        match shard.traces.get_mut(&key) {
            Some(entry) => AppendOutcome {
                bytes_added: entry.append(span, now, offset),
                is_new_trace: false,
            },
            None => {
                let bytes_added = estimate_span_bytes(&span);
                shard
                    .traces
                    .insert(key, TraceEntry::new(span, now, offset));
                AppendOutcome {
                    bytes_added,
                    is_new_trace: true,
                }
            }
        }
    }

    /// Lowest `min_offset` across every still-open trace, in any tenant —
    /// the safe low-watermark for WAL segment pruning: no segment holding an
    /// offset at or above this value may be deleted, since some open trace
    /// still depends on replaying it after a crash. `None` means no trace is
    /// open at all, so everything up to the current committed offset is
    /// safe to prune.
    pub async fn min_open_offset(&self) -> Option<u64> {
        let mut min = None;
        for shard in &self.shards {
            let shard = shard.read().await;
            for entry in shard.traces.values() {
                min = Some(min.map_or(entry.min_offset, |m: u64| m.min(entry.min_offset)));
            }
        }
        min
    }

    /// Removes and returns every open trace for `tenant` whose
    /// `trace_id` is in `only` (all of them, if `only` is `None`) —
    /// the "snapshot and seal" half of the cutting protocol (spec.md
    /// §4.2 step 1). Traces in other tenants are untouched.
    pub async fn seal_tenant(
        &self,
        tenant: &TenantId,
        only: Option<&HashSet<TraceId>>,
    ) -> Vec<(TraceId, TraceEntry)> {
        let mut out = Vec::new();
        for shard in &self.shards {
            let mut shard = shard.write().await;
            let keys: Vec<(TenantId, TraceId)> = shard
                .traces
                .keys()
                .filter(|(t, trace_id)| {
                    t == tenant && only.map(|o| o.contains(trace_id)).unwrap_or(true)
                })
                .cloned()
                .collect();
            for key in keys {
                if let Some(entry) = shard.traces.remove(&key) {
                    out.push((key.1, entry));
                }
            }
        }
        out
    }

    /// Traces whose oldest span is older than `idle_period`, grouped by
    /// tenant — the wall-clock idle cut trigger (spec.md §4.2).
    pub async fn idle_traces(
        &self,
        now: Instant,
        idle_period: std::time::Duration,
    ) -> HashMap<TenantId, HashSet<TraceId>> {
        let mut out: HashMap<TenantId, HashSet<TraceId>> = HashMap::new();
        for shard in &self.shards {
            let shard = shard.read().await;
            for ((tenant, trace_id), entry) in &shard.traces {
                if now.saturating_duration_since(entry.first_seen) >= idle_period {
                    out.entry(tenant.clone()).or_default().insert(*trace_id);
                }
            }
        }
        out
    }

    /// Recent-read point lookup: every span slice currently held for
    /// `(tenant, trace_id)`, read under a read-lock (spec.md §4.2 "Read path
    /// (recent)").
    pub async fn lookup(&self, tenant: &TenantId, trace_id: &TraceId) -> Vec<Span> {
        let idx = self.shard_index(trace_id);
        let shard = self.shards[idx].read().await;
        shard
            .traces
            .get(&(tenant.clone(), *trace_id))
            .map(|e| e.spans.clone())
            .unwrap_or_default()
    }

    /// Every span across every open trace whose time range `[start, end]`
    /// overlaps the query, regardless of tenant (the caller filters by
    /// tenant if needed) — the in-memory half of a time-range scan.
    pub async fn scan_range(&self, start: u64, end: u64) -> Vec<Span> {
        let mut out = Vec::new();
        for shard in &self.shards {
            let shard = shard.read().await;
            for entry in shard.traces.values() {
                for span in &entry.spans {
                    let span_end = span.start_unix_nano + span.duration_nano;
                    if span.start_unix_nano <= end && start <= span_end {
                        out.push(span.clone());
                    }
                }
            }
        }
        out
    }

    /// Total open bytes held for `tenant`, for size/memory-pressure
    /// triggers.
    pub async fn tenant_open_bytes(&self, tenant: &TenantId) -> u64 {
        let mut total = 0u64;
        for shard in &self.shards {
            let shard = shard.read().await;
            for ((t, _), entry) in &shard.traces {
                if t == tenant {
                    total += entry.byte_estimate;
                }
            }
        }
        total
    }

    /// Every distinct tenant with at least one open trace.
    pub async fn open_tenants(&self) -> HashSet<TenantId> {
        let mut out = HashSet::new();
        for shard in &self.shards {
            let shard = shard.read().await;
            for (tenant, _) in shard.traces.keys() {
                out.insert(tenant.clone());
            }
        }
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempo_proto::{SpanKind, Status};

    fn span(trace: u8, span_id: u8, start: u64) -> Span {
        Span {
            trace_id: TraceId([trace; 16]),
            span_id: SpanId([span_id; 8]),
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

    #[tokio::test]
    async fn duplicate_identity_tuple_is_not_appended_twice() {
        let map = TraceMap::new(4);
        let tenant = TenantId::new("t").unwrap();
        let now = Instant::now();

        map.append(&tenant, span(1, 1, 100), now, 0).await;
        let outcome = map.append(&tenant, span(1, 1, 100), now, 0).await;
        assert_eq!(outcome.bytes_added, 0);

        let spans = map.lookup(&tenant, &TraceId([1; 16])).await;
        assert_eq!(spans.len(), 1);
    }

    #[tokio::test]
    async fn seal_tenant_removes_only_that_tenant() {
        let map = TraceMap::new(4);
        let a = TenantId::new("a").unwrap();
        let b = TenantId::new("b").unwrap();
        let now = Instant::now();

        map.append(&a, span(1, 1, 100), now, 0).await;
        map.append(&b, span(2, 1, 100), now, 0).await;

        let sealed = map.seal_tenant(&a, None).await;
        assert_eq!(sealed.len(), 1);
        assert!(map.lookup(&a, &TraceId([1; 16])).await.is_empty());
        assert!(!map.lookup(&b, &TraceId([2; 16])).await.is_empty());
    }

    #[tokio::test]
    async fn idle_traces_groups_by_tenant() {
        let map = TraceMap::new(4);
        let tenant = TenantId::new("t").unwrap();
        let old = Instant::now() - std::time::Duration::from_secs(30);
        map.append(&tenant, span(1, 1, 100), old, 0).await;

        let idle = map
            .idle_traces(Instant::now(), std::time::Duration::from_secs(10))
            .await;
        assert!(idle.get(&tenant).unwrap().contains(&TraceId([1; 16])));
    }
}
