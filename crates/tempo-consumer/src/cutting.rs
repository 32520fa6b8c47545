//! The cutting protocol: sealed trace groups become an immutable block on
//! object storage, registered in the tenant index, with their WAL made
//! eligible for pruning (spec.md §4.2 "Cutting protocol", steps 2-6; step 1
//! lives in `TraceMap::seal_tenant`).

use tempo_index::IndexClient;
use tempo_proto::{BlockMeta, Span, TenantId};
use tempo_storage::{layout, Driver};

use crate::metrics::ConsumerMetrics;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("block encoding failed")]
    Block(#[from] tempo_block::Error),
    #[error("object store error")]
    Storage(#[from] tempo_storage::Error),
    #[error("tenant index update failed")]
    Index(#[from] tempo_index::Error),
}

/// Serializes `spans` into a block, writes its data and `meta.json` objects,
/// and registers the block in `tenant`'s index — steps 2 through 4 of the
/// cutting protocol. Returns the written `BlockMeta` so the caller can
/// advance its WAL low-watermark and committed offset (steps 5-6).
pub async fn cut_and_flush(
    storage: &Driver,
    index: &IndexClient<'_>,
    metrics: &ConsumerMetrics,
    tenant: &TenantId,
    compaction_level: u32,
    spans: Vec<Span>,
) -> Result<BlockMeta, Error> {
    let started = std::time::Instant::now();
    let (bytes, meta) = tempo_block::build_block(tenant, compaction_level, spans)?;

    let data_key = layout::block_data_key(tenant, meta.block_id);
    let meta_key = layout::block_meta_key(tenant, meta.block_id);

    storage.put(&data_key, bytes::Bytes::from(bytes)).await?;
    let meta_json = bytes::Bytes::from(
        serde_json::to_vec(&meta).expect("BlockMeta serialization cannot fail"),
    );
    if let Err(e) = storage.put(&meta_key, meta_json).await {
        // The data object is already durable; its meta sibling failed, so
        // this block is a candidate for the next pass's orphan sweep rather
        // than retried inline here — the index was never updated, so no
        // reader can have observed it yet.
        tracing::warn!(
            tenant = tenant.as_str(),
            block_id = %meta.block_id,
            error = %e,
            "block meta.json write failed, block orphaned for cleanup"
        );
        return Err(e.into());
    }

    if let Err(e) = index.add_block(tenant, meta.clone()).await {
        tracing::warn!(
            tenant = tenant.as_str(),
            block_id = %meta.block_id,
            error = %e,
            "tenant index update failed, block orphaned for cleanup"
        );
        return Err(e.into());
    }

    metrics.record_cut(tenant, meta.span_count, started.elapsed());
    Ok(meta)
}

#[cfg(test)]
mod test {
    use super::*;
    use tempo_proto::{SpanId, SpanKind, Status, TraceId};

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

    #[tokio::test]
    async fn cut_writes_block_and_registers_it() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Driver::local(dir.path());
        let index = IndexClient::new(&storage);
        let metrics = ConsumerMetrics::new();
        let tenant = TenantId::new("acme").unwrap();

        let meta = cut_and_flush(&storage, &index, &metrics, &tenant, 0, vec![span(1, 100)])
            .await
            .unwrap();

        let idx = index.read(&tenant).await.unwrap();
        assert!(idx.contains(meta.block_id));

        let data = storage
            .get(&layout::block_data_key(&tenant, meta.block_id))
            .await
            .unwrap();
        assert_eq!(&data[0..4], tempo_block::MAGIC);
    }
}
