//! Orphan block cleanup: a block whose data (and/or meta.json) landed in
//! object storage but whose tenant-index update never committed is an
//! orphan — present in the store, absent from the index (spec.md §4.2
//! "Orphan handling"). Swept once per cut pass for the block just attempted,
//! and once at startup across every block under the tenant's prefix.

use tempo_index::IndexClient;
use tempo_proto::{BlockId, TenantId};
use tempo_storage::{layout, Driver};

use crate::metrics::ConsumerMetrics;

/// Lists every block id physically present under `tenant`'s prefix,
/// regardless of whether the index currently references it.
async fn list_block_ids(storage: &Driver, tenant: &TenantId) -> Result<Vec<BlockId>, tempo_storage::Error> {
    let keys = storage.list(&layout::block_prefix(tenant)).await?;
    let prefix = layout::block_prefix(tenant);

    let mut ids = std::collections::HashSet::new();
    for key in keys {
        let Some(rest) = key.strip_prefix(&prefix) else {
            continue;
        };
        let Some((id_str, _)) = rest.split_once('/') else {
            continue;
        };
        if let Ok(uuid) = uuid::Uuid::parse_str(id_str) {
            ids.insert(BlockId(uuid));
        }
    }
    Ok(ids.into_iter().collect())
}

/// Deletes every block present in storage but absent from `tenant`'s index.
/// A single block's deletion failing does not abort the sweep — it's
/// counted and the rest proceed (spec.md §4.2: "Block-cleanup failure for a
/// single block must not abort the pass").
pub async fn sweep_tenant(
    storage: &Driver,
    index: &IndexClient<'_>,
    metrics: &ConsumerMetrics,
    tenant: &TenantId,
) -> Result<u32, tempo_storage::Error> {
    let present = list_block_ids(storage, tenant).await?;
    let catalog = index.read(tenant).await.map_err(|_| {
        tempo_storage::Error::NotFound(layout::tenant_index_key(tenant))
    })?;

    let mut failures = 0u32;
    for block_id in present {
        if catalog.contains(block_id) {
            continue;
        }
        let data_key = layout::block_data_key(tenant, block_id);
        let meta_key = layout::block_meta_key(tenant, block_id);
        let mut ok = true;
        if let Err(e) = storage.delete(&data_key).await {
            tracing::warn!(tenant = tenant.as_str(), block_id = %block_id, error = %e, "orphan data delete failed");
            ok = false;
        }
        if let Err(e) = storage.delete(&meta_key).await {
            tracing::warn!(tenant = tenant.as_str(), block_id = %block_id, error = %e, "orphan meta delete failed");
            ok = false;
        }
        if !ok {
            failures += 1;
            metrics.record_orphan_cleanup_failure(tenant);
        }
    }
    Ok(failures)
}

#[cfg(test)]
mod test {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn orphan_not_in_index_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Driver::local(dir.path());
        let index = IndexClient::new(&storage);
        let metrics = ConsumerMetrics::new();
        let tenant = TenantId::new("acme").unwrap();

        let orphan_id = BlockId::new();
        storage
            .put(&layout::block_data_key(&tenant, orphan_id), Bytes::from_static(b"data"))
            .await
            .unwrap();
        storage
            .put(&layout::block_meta_key(&tenant, orphan_id), Bytes::from_static(b"{}"))
            .await
            .unwrap();

        let failures = sweep_tenant(&storage, &index, &metrics, &tenant).await.unwrap();
        assert_eq!(failures, 0);
        assert!(storage
            .get_opt(&layout::block_data_key(&tenant, orphan_id))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn indexed_block_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Driver::local(dir.path());
        let index = IndexClient::new(&storage);
        let metrics = ConsumerMetrics::new();
        let tenant = TenantId::new("acme").unwrap();

        let meta = tempo_proto::BlockMeta {
            block_id: BlockId::new(),
            tenant: tenant.clone(),
            min_start_unix_nano: 0,
            max_end_unix_nano: 1,
            span_count: 1,
            byte_size: 1,
            compaction_level: 0,
            content_hash: [0; 32],
        };
        storage
            .put(&layout::block_data_key(&tenant, meta.block_id), Bytes::from_static(b"data"))
            .await
            .unwrap();
        index.add_block(&tenant, meta.clone()).await.unwrap();

        let failures = sweep_tenant(&storage, &index, &metrics, &tenant).await.unwrap();
        assert_eq!(failures, 0);
        assert!(storage
            .get_opt(&layout::block_data_key(&tenant, meta.block_id))
            .await
            .unwrap()
            .is_some());
    }
}
