//! Archive-tier fetch: consult the tenant index for candidate blocks, then
//! bloom-filter/time-range-prefilter and decode only the ones that can
//! possibly contain a match (spec.md §4.3 "Reading", §4.4 "in parallel,
//! consult the tenant index ... fetch candidate archive blocks").

use futures::stream::{FuturesUnordered, StreamExt};
use tempo_block::BlockReader;
use tempo_index::IndexClient;
use tempo_proto::{BlockMeta, Span, TenantId, TraceId};
use tempo_storage::{layout, Driver};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("tenant index read failed")]
    Index(#[from] tempo_index::Error),
}

/// Candidate blocks for a trace-id lookup: every block in the tenant's
/// index. The block's own bloom filter does the real filtering once its
/// bytes are fetched; the index alone can't rule out a block without
/// fetching it, since it doesn't carry a bloom summary itself.
pub async fn candidate_blocks(
    storage: &Driver,
    tenant: &TenantId,
    start_hint: Option<u64>,
    end_hint: Option<u64>,
) -> Result<Vec<BlockMeta>, Error> {
    let index = IndexClient::new(storage);
    let catalog = index.read(tenant).await?;
    let blocks = match (start_hint, end_hint) {
        (Some(start), Some(end)) => catalog
            .blocks
            .into_iter()
            .filter(|b| b.overlaps(start, end))
            .collect(),
        _ => catalog.blocks,
    };
    Ok(blocks)
}

/// Fetches and bloom-filters every candidate block for a trace-id lookup,
/// with bounded concurrency implicit in `FuturesUnordered` draining as each
/// block's bytes arrive.
pub async fn lookup_trace(
    storage: &Driver,
    tenant: &TenantId,
    trace_id: &TraceId,
    candidates: &[BlockMeta],
) -> Vec<Span> {
    let mut tasks = FuturesUnordered::new();
    for meta in candidates {
        let key = layout::block_data_key(tenant, meta.block_id);
        let trace_id = *trace_id;
        tasks.push(async move {
            let bytes = storage.get(&key).await.ok()?;
            let reader = BlockReader::open(bytes.to_vec()).ok()?;
            reader.lookup_trace(&trace_id).ok().map(|l| l.spans)
        });
    }

    let mut spans = Vec::new();
    while let Some(result) = tasks.next().await {
        if let Some(found) = result {
            spans.extend(found);
        }
    }
    spans
}

/// Range scan over every candidate block overlapping `[start, end]`.
pub async fn scan_range(
    storage: &Driver,
    tenant: &TenantId,
    start: u64,
    end: u64,
    candidates: &[BlockMeta],
) -> Vec<Span> {
    let mut tasks = FuturesUnordered::new();
    for meta in candidates {
        if !meta.overlaps(start, end) {
            continue;
        }
        let key = layout::block_data_key(tenant, meta.block_id);
        tasks.push(async move {
            let bytes = storage.get(&key).await.ok()?;
            let reader = BlockReader::open(bytes.to_vec()).ok()?;
            reader.scan_range(start, end).ok()
        });
    }

    let mut spans = Vec::new();
    while let Some(result) = tasks.next().await {
        if let Some(found) = result {
            spans.extend(found);
        }
    }
    spans
}

#[cfg(test)]
mod test {
    use super::*;
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

    #[tokio::test]
    async fn lookup_finds_span_in_one_of_several_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Driver::local(dir.path());
        let index = IndexClient::new(&storage);
        let tenant = TenantId::new("acme").unwrap();

        let (bytes_a, meta_a) = tempo_block::build_block(&tenant, 0, vec![span(1, 100)]).unwrap();
        let (bytes_b, meta_b) = tempo_block::build_block(&tenant, 0, vec![span(2, 200)]).unwrap();
        storage
            .put(&layout::block_data_key(&tenant, meta_a.block_id), bytes::Bytes::from(bytes_a))
            .await
            .unwrap();
        storage
            .put(&layout::block_data_key(&tenant, meta_b.block_id), bytes::Bytes::from(bytes_b))
            .await
            .unwrap();
        index.add_block(&tenant, meta_a.clone()).await.unwrap();
        index.add_block(&tenant, meta_b.clone()).await.unwrap();

        let candidates = candidate_blocks(&storage, &tenant, None, None).await.unwrap();
        assert_eq!(candidates.len(), 2);

        let found = lookup_trace(&storage, &tenant, &TraceId([2; 16]), &candidates).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].trace_id, TraceId([2; 16]));
    }
}
