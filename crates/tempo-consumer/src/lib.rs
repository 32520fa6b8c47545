//! Partition consumer: the component spec.md §2 calls "the hard part".
//! Owns a set of log partitions, durably WALs every record before
//! acknowledging progress, groups spans into an in-memory trace map, cuts
//! and flushes blocks when a trigger fires, and serves recent reads for
//! spans not yet flushed (spec.md §4.2).

mod commit;
mod cutting;
mod metrics;
mod orphan;
mod recovery;
mod tenant_state;
mod trace_map;

pub use metrics::ConsumerMetrics;
pub use trace_map::DEFAULT_SHARD_COUNT;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use tempo_index::IndexClient;
use tempo_log::PartitionLog;
use tempo_proto::{Span, TenantId, TraceId};
use tempo_storage::Driver;
use tempo_wal::{WalRecord, WalWriter};
use tokio::sync::Semaphore;

use commit::CommitStore;
use tenant_state::TenantStateTracker;
use trace_map::TraceMap;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("partition log error")]
    Log(#[from] tempo_log::Error),
    #[error("wal error")]
    Wal(#[from] tempo_wal::Error),
    #[error("commit offset store error")]
    Commit(#[from] commit::Error),
    #[error("crash recovery failed")]
    Recovery(#[from] recovery::Error),
}

/// The consume loop's per-step result. The commit loop acts only on
/// `Advance`; `NoProgress` and `Error` never move the committed offset
/// (spec.md §9 "Cyclic back-reference"): making this explicit rather than
/// mutating shared state is what lets the consume loop and the commit loop
/// stay decoupled.
#[derive(Debug)]
pub enum Progress {
    Advance(u64),
    NoProgress,
    Error(Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionState {
    Joining,
    Running,
    Draining,
    Stopped,
}

/// Tunables governing the cut triggers and worker pool (spec.md §4.2, §5).
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub trace_idle_period: Duration,
    pub max_block_bytes: u64,
    pub max_block_duration: Duration,
    pub max_bytes_per_tenant: u64,
    pub cut_concurrency: usize,
    pub shard_count: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        ConsumerConfig {
            trace_idle_period: Duration::from_secs(10),
            max_block_bytes: 64 * 1024 * 1024,
            max_block_duration: Duration::from_secs(5 * 60),
            max_bytes_per_tenant: 128 * 1024 * 1024,
            cut_concurrency: 4,
            shard_count: DEFAULT_SHARD_COUNT,
        }
    }
}

/// A set of traces due to be cut, grouped by the tenant they belong to.
/// `None` as the trace-id set means "every open trace for this tenant".
struct DueCuts(Vec<(TenantId, Option<HashSet<TraceId>>)>);

/// A sealed-but-not-yet-flushed batch: removed from the trace map at seal
/// time, but not yet durably registered in the tenant index. Kept here so
/// a failed cut "retries with the same block id" in spirit — the same span
/// set, tried again on the next pass — instead of the spans being lost, and
/// so the recent-read path can still serve them (spec.md §4.2 "Read path
/// (recent)": "append any matching sealed-but-not-flushed traces").
struct PendingCut {
    tenant: TenantId,
    spans: Vec<Span>,
    min_offset: u64,
}

/// Owns one log partition end to end: WAL, trace map, cutting, and recent
/// reads. `L` is the partition log client; `Arc<Driver>`/`Arc<TenantStateTracker>`-style
/// sharing lets cut work run as real background tasks without the
/// lifetime gymnastics a borrowed `Driver` would force on `tokio::spawn`.
pub struct PartitionConsumer<L: PartitionLog + 'static> {
    partition: u32,
    log: Arc<L>,
    storage: Arc<Driver>,
    wal: WalWriter,
    commit: CommitStore,
    map: TraceMap,
    tenants: TenantStateTracker,
    /// Sealed batches awaiting a successful flush, kept across
    /// `run_once`/`shutdown` calls so a failed cut is retried rather than
    /// lost.
    sealed: Vec<PendingCut>,
    config: ConsumerConfig,
    metrics: ConsumerMetrics,
    cut_semaphore: Arc<Semaphore>,
    state: PartitionState,
    next_read_offset: u64,
    committed_offset: Option<u64>,
}

impl<L: PartitionLog + 'static> PartitionConsumer<L> {
    /// Brings a partition from cold storage to `Running`: replays the WAL
    /// to rebuild the trace map, determines the log offset to resume from,
    /// and opens a fresh WAL writer (spec.md §4.2 state machine: `Joining`
    /// -> `Running` "after offset recovery and WAL replay").
    pub async fn start(
        partition: u32,
        log: Arc<L>,
        storage: Arc<Driver>,
        wal_root: impl Into<PathBuf>,
        commit_root: impl Into<PathBuf>,
        config: ConsumerConfig,
        metrics: ConsumerMetrics,
    ) -> Result<Self, Error> {
        let wal_root = wal_root.into();
        let commit = CommitStore::new(commit_root, partition);
        let map = TraceMap::new(config.shard_count);

        let resume_offset = recovery::recover(&wal_root, &commit, partition, &map).await?;
        let wal = WalWriter::open(&wal_root, partition).await?;

        Ok(PartitionConsumer {
            partition,
            log,
            storage,
            wal,
            commit,
            map,
            tenants: TenantStateTracker::new(),
            sealed: Vec::new(),
            cut_semaphore: Arc::new(Semaphore::new(config.cut_concurrency.max(1))),
            config,
            metrics,
            state: PartitionState::Running,
            next_read_offset: resume_offset,
            committed_offset: resume_offset.checked_sub(1),
        })
    }

    pub fn state(&self) -> PartitionState {
        self.state
    }

    /// One iteration of the consume loop: read whatever is newly available
    /// from the log, durably WAL it, fold it into the trace map, fire any
    /// due cut trigger, and advance the committed offset past whatever just
    /// became safe to prune.
    pub async fn run_once(&mut self) -> Progress {
        if self.state != PartitionState::Running {
            return Progress::NoProgress;
        }

        let records = match self.log.read(self.partition, self.next_read_offset).await {
            Ok(r) => r,
            Err(e) => return Progress::Error(e.into()),
        };

        let now = Instant::now();
        let mut highest_offset = None;

        for record in &records {
            let wal_record = WalRecord {
                partition: self.partition,
                offset: record.offset,
                tenant: record.tenant.clone(),
                batch: record.batch.clone(),
            };
            if let Err(e) = self.wal.append(&wal_record).await {
                // WAL I/O is never retried: fatal to this consumer, which
                // restarts and replays from disk (spec.md §5 "Retries").
                return Progress::Error(e.into());
            }

            let batch_bytes = record.batch.total_bytes() as u64;
            for span in &record.batch.spans {
                self.map
                    .append(&record.tenant, span.clone(), now, record.offset)
                    .await;
            }
            self.tenants.note_append(&record.tenant, now);
            self.metrics.record_append(self.partition, batch_bytes);
            highest_offset = Some(record.offset);
        }

        if let Some(offset) = highest_offset {
            self.next_read_offset = offset + 1;
        }

        let due = self.due_cuts(now).await;
        self.cut_and_advance(due).await
    }

    /// Cuts every open trace across every tenant, commits, and transitions
    /// to `Stopped` — graceful shutdown never returns an error; a context
    /// cancellation mid-flush simply leaves the committed offset wherever
    /// it last durably landed (spec.md §4.2 "Graceful shutdown").
    pub async fn shutdown(&mut self) -> Progress {
        self.state = PartitionState::Draining;
        let tenants: Vec<TenantId> = self.map.open_tenants().await.into_iter().collect();
        let due = DueCuts(tenants.into_iter().map(|t| (t, None)).collect());
        let progress = self.cut_and_advance(due).await;
        self.state = PartitionState::Stopped;
        progress
    }

    /// Recent-read point lookup: shard lookup under a read-lock, plus any
    /// sealed-but-not-yet-flushed spans awaiting retry, per spec.md §4.2
    /// "Read path (recent)".
    pub async fn lookup_trace(&self, tenant: &TenantId, trace_id: &TraceId) -> Vec<Span> {
        let mut spans = self.map.lookup(tenant, trace_id).await;
        for pending in &self.sealed {
            if &pending.tenant != tenant {
                continue;
            }
            spans.extend(
                pending
                    .spans
                    .iter()
                    .filter(|s| &s.trace_id == trace_id)
                    .cloned(),
            );
        }
        spans
    }

    /// Time-range scan over the in-memory map and the sealed-but-unflushed
    /// overlay (live on-disk blocks are a query-path concern layered on
    /// top; spec.md §4.2 only requires the in-memory half here).
    pub async fn scan_range(&self, start: u64, end: u64) -> Vec<Span> {
        let mut spans = self.map.scan_range(start, end).await;
        for pending in &self.sealed {
            for span in &pending.spans {
                let span_end = span.start_unix_nano + span.duration_nano;
                if span.start_unix_nano <= end && start <= span_end {
                    spans.push(span.clone());
                }
            }
        }
        spans
    }

    /// Startup/periodic orphan sweep for every tenant this partition has
    /// ever seen traffic for (spec.md §4.2 "Orphan handling").
    pub async fn sweep_orphans(&self, tenant: &TenantId) -> Result<u32, tempo_storage::Error> {
        let index = IndexClient::new(&self.storage);
        orphan::sweep_tenant(&self.storage, &index, &self.metrics, tenant).await
    }

    async fn due_cuts(&self, now: Instant) -> DueCuts {
        let mut due: Vec<(TenantId, Option<HashSet<TraceId>>)> = Vec::new();

        let idle = self.map.idle_traces(now, self.config.trace_idle_period).await;
        for (tenant, trace_ids) in idle {
            due.push((tenant, Some(trace_ids)));
        }

        for tenant in self.tenants.tenants_by_lru() {
            if due.iter().any(|(t, only)| t == &tenant && only.is_none()) {
                continue;
            }
            let open_bytes = self.map.tenant_open_bytes(&tenant).await;
            self.metrics.set_tenant_open_bytes(&tenant, open_bytes);

            if open_bytes > self.config.max_block_bytes {
                due.push((tenant.clone(), None));
                continue;
            }
            if self.tenants.block_age(&tenant, now) >= self.config.max_block_duration {
                due.push((tenant.clone(), None));
            }
        }

        let tenant_count = self.tenants.tenant_count().max(1);
        let total_open: u64 = {
            let mut sum = 0u64;
            for tenant in self.map.open_tenants().await {
                sum += self.map.tenant_open_bytes(&tenant).await;
            }
            sum
        };
        if total_open > self.config.max_bytes_per_tenant * tenant_count as u64 {
            for tenant in self.tenants.tenants_by_lru() {
                if due.iter().any(|(t, only)| t == &tenant && only.is_none()) {
                    continue;
                }
                due.push((tenant, None));
                break;
            }
        }

        DueCuts(due)
    }

    /// Runs the cutting protocol for every entry in `due` with bounded
    /// concurrency, then prunes the WAL and advances the committed offset
    /// past whatever is now safe — the low-watermark is the oldest offset
    /// any still-open trace depends on, not simply "the last cut block's
    /// offset", so a trace left open by an idle-only cut never has its WAL
    /// segment deleted out from under it.
    async fn cut_and_advance(&mut self, due: DueCuts) -> Progress {
        for (tenant, only) in due.0 {
            let sealed = self.map.seal_tenant(&tenant, only.as_ref()).await;
            if sealed.is_empty() {
                continue;
            }
            self.tenants.reset(&tenant);

            let min_offset = sealed.iter().map(|(_, e)| e.min_offset).min().unwrap();
            let spans: Vec<Span> = sealed.into_iter().flat_map(|(_, e)| e.spans).collect();
            self.sealed.push(PendingCut {
                tenant,
                spans,
                min_offset,
            });
        }

        let pending = std::mem::take(&mut self.sealed);
        let mut tasks = FuturesUnordered::new();
        for (idx, batch) in pending.iter().enumerate() {
            let storage = self.storage.clone();
            let metrics = self.metrics.clone();
            let permit = self.cut_semaphore.clone();
            let tenant = batch.tenant.clone();
            let spans = batch.spans.clone();

            tasks.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore not closed");
                let index = IndexClient::new(&storage);
                let result = cutting::cut_and_flush(&storage, &index, &metrics, &tenant, 0, spans).await;
                (idx, result)
            }));
        }

        // Indexed by position in `pending` rather than moving each batch into
        // its task, so a panicking task still leaves its spans recoverable
        // here instead of silently vanishing from `self.sealed`.
        let mut failed = vec![false; pending.len()];
        while let Some(joined) = tasks.next().await {
            match joined {
                Ok((idx, Ok(_meta))) => {
                    // Flushed and registered. A stray data/meta object from a
                    // prior attempt at this same tenant is cleaned up by the
                    // next orphan sweep, not here.
                    let _ = idx;
                }
                Ok((idx, Err(e))) => {
                    tracing::warn!(partition = self.partition, tenant = pending[idx].tenant.as_str(), error = %e, "cut failed, retrying next pass");
                    failed[idx] = true;
                }
                Err(join_err) => {
                    tracing::error!(partition = self.partition, error = %join_err, "cut task panicked");
                    // The task's JoinError carries no index back; every
                    // still-unresolved batch in this pass is retried rather
                    // than risk losing one we can't identify.
                    failed.iter_mut().for_each(|f| *f = true);
                }
            }
        }
        for (batch, failed) in pending.into_iter().zip(failed) {
            if failed {
                self.sealed.push(batch);
            }
        }

        if let Some(offset) = self.next_read_offset.checked_sub(1) {
            let open_min = self.map.min_open_offset().await;
            let sealed_min = self.sealed.iter().map(|b| b.min_offset).min();
            let prune_bound = match (open_min, sealed_min) {
                (None, None) => offset,
                (a, b) => a.into_iter().chain(b).min().unwrap().saturating_sub(1),
            };
            if let Err(e) = self.wal.prune_up_to(prune_bound).await {
                return Progress::Error(e.into());
            }
        }

        match self.next_read_offset.checked_sub(1) {
            Some(offset) if self.committed_offset != Some(offset) => {
                if let Err(e) = self.commit.advance(offset).await {
                    return Progress::Error(e.into());
                }
                self.committed_offset = Some(offset);
                self.metrics.set_lag(self.partition, 0);
                Progress::Advance(offset)
            }
            _ => Progress::NoProgress,
        }
    }
}
