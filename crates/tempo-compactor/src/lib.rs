//! Compaction & retention: merges small same-level blocks into larger ones,
//! deduplicates spans, and deletes blocks past the retention horizon,
//! coordinating exclusive per-tenant ownership via the ring (spec.md §4.5).

mod grouping;
mod merge;
mod metrics;
mod retention;

pub use grouping::eligible_groups;
pub use merge::merge_spans;
pub use metrics::CompactorMetrics;
pub use retention::expired;

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tempo_index::IndexClient;
use tempo_proto::{BlockId, BlockMeta, TenantId};
use tempo_ring::{hash32, Ring};
use tempo_storage::{layout, Driver};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("object store error")]
    Storage(#[from] tempo_storage::Error),
    #[error("tenant index error")]
    Index(#[from] tempo_index::Error),
    #[error("block decode error")]
    Block(#[from] tempo_block::Error),
}

/// Tunables governing grouping, the compaction cadence, and how long
/// superseded/retired blocks linger in storage before physical deletion.
#[derive(Debug, Clone)]
pub struct CompactorConfig {
    pub max_group_bytes: u64,
    pub retention: Duration,
    /// How long a block superseded by a merge, or retired by retention,
    /// stays in object storage before this compactor deletes its bytes —
    /// spec.md §4.5: "superseded blocks deleted after a grace period."
    pub deletion_grace: Duration,
}

impl Default for CompactorConfig {
    fn default() -> Self {
        CompactorConfig {
            max_group_bytes: 64 * 1024 * 1024,
            retention: Duration::from_secs(14 * 24 * 3600),
            deletion_grace: Duration::from_secs(3600),
        }
    }
}

/// One completed merge: the new block's metadata and which input blocks it
/// superseded.
#[derive(Debug, Clone)]
pub struct CompactionResult {
    pub tenant: TenantId,
    pub merged: BlockMeta,
    pub superseded: Vec<BlockId>,
}

struct PendingDeletion {
    tenant: TenantId,
    block_id: BlockId,
    eligible_at: Instant,
}

/// Drives compaction and retention for the tenants this instance owns.
/// `self_address` is this instance's ring identity, used to check ownership
/// before and between jobs so an ownership change drains in-flight work
/// rather than racing a new owner (spec.md §4.5 "Ownership").
pub struct Compactor {
    storage: std::sync::Arc<Driver>,
    ring: Ring,
    self_address: String,
    config: CompactorConfig,
    metrics: CompactorMetrics,
    pending_deletions: std::sync::Mutex<VecDeque<PendingDeletion>>,
}

impl Compactor {
    pub fn new(storage: std::sync::Arc<Driver>, ring: Ring, self_address: String, config: CompactorConfig) -> Self {
        Compactor {
            storage,
            ring,
            self_address,
            config,
            metrics: CompactorMetrics::new(),
            pending_deletions: std::sync::Mutex::new(VecDeque::new()),
        }
    }

    /// True if this instance currently owns `tenant` per the ring's
    /// consistent-hash lookup (spec.md §4.5, §4.6).
    pub fn owns_tenant(&self, tenant: &TenantId) -> bool {
        let key = hash32(tenant.as_str().as_bytes());
        self.ring.snapshot().owner(key) == Some(self.self_address.as_str())
    }

    /// One compaction pass for `tenant`: groups eligible blocks, merges each
    /// group, and swaps it into the index. Re-checks ownership before every
    /// group so a mid-pass ownership change stops dispatching new jobs
    /// rather than racing the new owner (spec.md §4.5 "Ownership changes
    /// drain in-flight jobs before release" — the in-flight job itself still
    /// finishes; only *new* ones aren't started).
    pub async fn compact_tenant(&self, tenant: &TenantId) -> Result<Vec<CompactionResult>, Error> {
        if !self.owns_tenant(tenant) {
            return Ok(Vec::new());
        }

        let index = IndexClient::new(&self.storage);
        let current = index.read(tenant).await?;
        let groups = eligible_groups(&current.blocks, self.config.max_group_bytes);
        self.metrics.set_backlog(tenant, groups.len() as u64);

        let mut results = Vec::new();
        for group in groups {
            if !self.owns_tenant(tenant) {
                break;
            }
            let result = self.merge_group(tenant, &index, group).await?;
            results.push(result);
        }
        Ok(results)
    }

    async fn merge_group(
        &self,
        tenant: &TenantId,
        index: &IndexClient<'_>,
        group: Vec<BlockMeta>,
    ) -> Result<CompactionResult, Error> {
        let started = Instant::now();
        let level = group.iter().map(|b| b.compaction_level).max().unwrap_or(0);

        let mut inputs = Vec::with_capacity(group.len());
        for block in &group {
            let bytes = self.storage.get(&layout::block_data_key(tenant, block.block_id)).await?;
            let reader = tempo_block::BlockReader::open(bytes.to_vec())?;
            let spans = reader.scan_range(0, u64::MAX)?;
            inputs.push((block.block_id, spans));
        }

        let merged_spans = merge_spans(inputs);
        let span_count = merged_spans.len() as u64;
        let (bytes, meta) = tempo_block::build_block(tenant, level + 1, merged_spans)?;

        self.storage
            .put(&layout::block_data_key(tenant, meta.block_id), bytes::Bytes::from(bytes))
            .await?;
        self.storage
            .put(
                &layout::block_meta_key(tenant, meta.block_id),
                bytes::Bytes::from(serde_json::to_vec(&meta).expect("BlockMeta serialization cannot fail")),
            )
            .await?;

        let superseded: Vec<BlockId> = group.iter().map(|b| b.block_id).collect();
        index.replace_blocks(tenant, &superseded, meta.clone()).await?;

        self.metrics.record_job(tenant, level, group.len(), span_count, started.elapsed());

        let eligible_at = Instant::now() + self.config.deletion_grace;
        let mut pending = self.pending_deletions.lock().unwrap();
        for block_id in &superseded {
            pending.push_back(PendingDeletion {
                tenant: tenant.clone(),
                block_id: *block_id,
                eligible_at,
            });
        }

        Ok(CompactionResult {
            tenant: tenant.clone(),
            merged: meta,
            superseded,
        })
    }

    /// Marks blocks past the retention horizon for deletion and removes them
    /// from `tenant`'s index immediately (no grace period for retention,
    /// unlike compaction's superseded-block grace window — spec.md §4.5:
    /// "the compactor removes them after updating the index", with no
    /// mention of a delay). Their bytes are queued the same way superseded
    /// blocks are, so `sweep_deletions` reclaims them once nothing could
    /// still be reading the now-unindexed block.
    pub async fn run_retention(&self, tenant: &TenantId, now_unix_nano: u64) -> Result<Vec<BlockId>, Error> {
        if !self.owns_tenant(tenant) {
            return Ok(Vec::new());
        }
        let index = IndexClient::new(&self.storage);
        let current = index.read(tenant).await?;
        let expired_blocks = expired(&current.blocks, now_unix_nano, self.config.retention);
        if expired_blocks.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<BlockId> = expired_blocks.iter().map(|b| b.block_id).collect();
        index.remove_blocks(tenant, &ids).await?;
        self.metrics.record_retention_removal(tenant, ids.len());

        let eligible_at = Instant::now() + self.config.deletion_grace;
        let mut pending = self.pending_deletions.lock().unwrap();
        for block_id in &ids {
            pending.push_back(PendingDeletion {
                tenant: tenant.clone(),
                block_id: *block_id,
                eligible_at,
            });
        }
        Ok(ids)
    }

    /// Physically deletes every pending block whose grace period has
    /// elapsed. A single block's deletion failing does not abort the sweep
    /// — it's re-queued and counted, mirroring the consumer's orphan sweep
    /// rule that one failure must not block the rest (spec.md §4.2, carried
    /// here since §4.5 gives the compactor the same cleanup obligation).
    pub async fn sweep_deletions(&self, now: Instant) -> u32 {
        let due: Vec<PendingDeletion> = {
            let mut pending = self.pending_deletions.lock().unwrap();
            let mut due = Vec::new();
            let mut remaining = VecDeque::new();
            while let Some(entry) = pending.pop_front() {
                if entry.eligible_at <= now {
                    due.push(entry);
                } else {
                    remaining.push_back(entry);
                }
            }
            *pending = remaining;
            due
        };

        let mut failures = 0u32;
        for entry in due {
            let data_key = layout::block_data_key(&entry.tenant, entry.block_id);
            let meta_key = layout::block_meta_key(&entry.tenant, entry.block_id);
            let mut ok = true;
            if let Err(e) = self.storage.delete(&data_key).await {
                tracing::warn!(tenant = entry.tenant.as_str(), block_id = %entry.block_id, error = %e, "compactor block data delete failed");
                ok = false;
            }
            if let Err(e) = self.storage.delete(&meta_key).await {
                tracing::warn!(tenant = entry.tenant.as_str(), block_id = %entry.block_id, error = %e, "compactor block meta delete failed");
                ok = false;
            }
            if !ok {
                failures += 1;
                self.metrics.record_cleanup_failure(&entry.tenant);
                let mut pending = self.pending_deletions.lock().unwrap();
                pending.push_back(PendingDeletion {
                    tenant: entry.tenant,
                    block_id: entry.block_id,
                    eligible_at: now + self.config.deletion_grace,
                });
            }
        }
        failures
    }

    pub fn pending_deletion_count(&self) -> usize {
        self.pending_deletions.lock().unwrap().len()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempo_proto::{InstanceState, RingEntry, Span, SpanId, SpanKind, Status, TraceId};

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

    fn single_owner_ring(address: &str) -> Ring {
        let ring = Ring::new();
        ring.upsert(
            address.to_string(),
            RingEntry {
                address: address.to_string(),
                zone: "zone-a".into(),
                state: InstanceState::Active,
                last_heartbeat_unix_nano: 0,
                tokens: (0..tempo_proto::ring::TOKENS_PER_INSTANCE)
                    .map(|i| i as u32)
                    .collect(),
            },
        );
        ring
    }

    #[tokio::test]
    async fn compacts_overlapping_blocks_and_dedups_spans() {
        let dir = tempfile::tempdir().unwrap();
        let storage = std::sync::Arc::new(Driver::local(dir.path()));
        let ring = single_owner_ring("self");
        let compactor = Compactor::new(storage.clone(), ring, "self".to_string(), CompactorConfig::default());
        let tenant = TenantId::new("acme").unwrap();

        let index = IndexClient::new(&storage);
        let (bytes_a, meta_a) = tempo_block::build_block(&tenant, 0, vec![span(1, 1, 100), span(1, 2, 200)]).unwrap();
        storage.put(&layout::block_data_key(&tenant, meta_a.block_id), bytes::Bytes::from(bytes_a)).await.unwrap();
        index.add_block(&tenant, meta_a.clone()).await.unwrap();

        let (bytes_b, meta_b) = tempo_block::build_block(&tenant, 0, vec![span(1, 1, 100), span(1, 3, 300)]).unwrap();
        storage.put(&layout::block_data_key(&tenant, meta_b.block_id), bytes::Bytes::from(bytes_b)).await.unwrap();
        index.add_block(&tenant, meta_b.clone()).await.unwrap();

        let results = compactor.compact_tenant(&tenant).await.unwrap();
        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert_eq!(result.merged.compaction_level, 1);
        assert_eq!(result.merged.span_count, 3); // span 1/1 deduped across both inputs

        let idx = index.read(&tenant).await.unwrap();
        assert!(!idx.contains(meta_a.block_id));
        assert!(!idx.contains(meta_b.block_id));
        assert!(idx.contains(result.merged.block_id));
    }

    #[tokio::test]
    async fn non_owner_skips_compaction() {
        let dir = tempfile::tempdir().unwrap();
        let storage = std::sync::Arc::new(Driver::local(dir.path()));
        let ring = single_owner_ring("someone-else");
        let compactor = Compactor::new(storage, ring, "self".to_string(), CompactorConfig::default());
        let tenant = TenantId::new("acme").unwrap();

        assert!(!compactor.owns_tenant(&tenant));
        let results = compactor.compact_tenant(&tenant).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn retention_removes_expired_blocks_from_index() {
        let dir = tempfile::tempdir().unwrap();
        let storage = std::sync::Arc::new(Driver::local(dir.path()));
        let ring = single_owner_ring("self");
        let config = CompactorConfig {
            retention: Duration::from_secs(3600),
            ..Default::default()
        };
        let compactor = Compactor::new(storage.clone(), ring, "self".to_string(), config);
        let tenant = TenantId::new("acme").unwrap();

        let index = IndexClient::new(&storage);
        let meta = BlockMeta {
            block_id: BlockId::new(),
            tenant: tenant.clone(),
            min_start_unix_nano: 0,
            max_end_unix_nano: 0,
            span_count: 1,
            byte_size: 1,
            compaction_level: 0,
            content_hash: [0; 32],
        };
        index.add_block(&tenant, meta.clone()).await.unwrap();
        storage.put(&layout::block_data_key(&tenant, meta.block_id), bytes::Bytes::from_static(b"x")).await.unwrap();

        let now = 2 * 3600 * 1_000_000_000u64;
        let removed = compactor.run_retention(&tenant, now).await.unwrap();
        assert_eq!(removed, vec![meta.block_id]);

        let idx = index.read(&tenant).await.unwrap();
        assert!(!idx.contains(meta.block_id));
        assert_eq!(compactor.pending_deletion_count(), 1);
    }

    #[tokio::test]
    async fn sweep_deletions_reclaims_bytes_after_grace_period() {
        let dir = tempfile::tempdir().unwrap();
        let storage = std::sync::Arc::new(Driver::local(dir.path()));
        let ring = single_owner_ring("self");
        let config = CompactorConfig {
            deletion_grace: Duration::from_millis(0),
            ..Default::default()
        };
        let compactor = Compactor::new(storage.clone(), ring, "self".to_string(), config);
        let tenant = TenantId::new("acme").unwrap();

        let index = IndexClient::new(&storage);
        let meta = BlockMeta {
            block_id: BlockId::new(),
            tenant: tenant.clone(),
            min_start_unix_nano: 0,
            max_end_unix_nano: 0,
            span_count: 1,
            byte_size: 1,
            compaction_level: 0,
            content_hash: [0; 32],
        };
        index.add_block(&tenant, meta.clone()).await.unwrap();
        storage.put(&layout::block_data_key(&tenant, meta.block_id), bytes::Bytes::from_static(b"x")).await.unwrap();

        compactor.run_retention(&tenant, 10 * 365 * 24 * 3600 * 1_000_000_000u64).await.unwrap();
        let failures = compactor.sweep_deletions(Instant::now() + Duration::from_secs(1)).await;
        assert_eq!(failures, 0);
        assert!(storage
            .get_opt(&layout::block_data_key(&tenant, meta.block_id))
            .await
            .unwrap()
            .is_none());
    }
}
