//! Tenant index client: a per-tenant manifest of live blocks, updated only
//! via optimistic compare-and-swap (spec.md §3, §4.2 step 4, §8 "Index CAS").

use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use tempo_proto::{BlockId, BlockMeta, TenantId, TenantIndex};
use tempo_storage::{layout, CasExpectation, Driver};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("object store error")]
    Storage(#[from] tempo_storage::Error),
    #[error("tenant index is corrupt")]
    Corrupt(#[from] serde_json::Error),
    #[error("exhausted CAS retry budget after {0} attempts")]
    RetriesExhausted(u32),
}

const MAX_CAS_RETRIES: u32 = 8;

pub struct IndexClient<'a> {
    storage: &'a Driver,
}

impl<'a> IndexClient<'a> {
    pub fn new(storage: &'a Driver) -> Self {
        IndexClient { storage }
    }

    pub async fn read(&self, tenant: &TenantId) -> Result<TenantIndex, Error> {
        let key = layout::tenant_index_key(tenant);
        match self.storage.get_opt(&key).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(TenantIndex::new(tenant.clone())),
        }
    }

    /// Append a single newly-cut block to the tenant index, retrying the
    /// read-modify-write on CAS conflict with bounded jittered backoff, per
    /// spec.md §4.2 step 4.
    pub async fn add_block(&self, tenant: &TenantId, meta: BlockMeta) -> Result<(), Error> {
        self.cas_loop(tenant, move |current| current.with_block_added(meta.clone()))
            .await
    }

    /// Atomically replace a group of superseded blocks with the merged block
    /// produced by compaction, per spec.md §4.5.
    pub async fn replace_blocks(
        &self,
        tenant: &TenantId,
        remove: &[BlockId],
        add: BlockMeta,
    ) -> Result<(), Error> {
        self.cas_loop(tenant, move |current| {
            current.with_blocks_replaced(remove, add.clone())
        })
        .await
    }

    /// Remove blocks past the retention horizon, per spec.md §4.5, §8.
    pub async fn remove_blocks(&self, tenant: &TenantId, remove: &[BlockId]) -> Result<(), Error> {
        self.cas_loop(tenant, move |current| current.with_blocks_removed(remove))
            .await
    }

    async fn cas_loop(
        &self,
        tenant: &TenantId,
        transform: impl Fn(&TenantIndex) -> TenantIndex,
    ) -> Result<(), Error> {
        let key = layout::tenant_index_key(tenant);

        for attempt in 1..=MAX_CAS_RETRIES {
            let current_bytes = self.storage.get_opt(&key).await?;
            let current = match &current_bytes {
                Some(b) => serde_json::from_slice::<TenantIndex>(b)?,
                None => TenantIndex::new(tenant.clone()),
            };

            let next = transform(&current);
            let next_bytes = Bytes::from(serde_json::to_vec(&next).map_err(Error::Corrupt)?);

            let expectation = match &current_bytes {
                Some(b) => CasExpectation::Matches(b.clone()),
                None => CasExpectation::Absent,
            };

            let result = self
                .storage
                .compare_and_swap(&key, move |_current| {
                    (next_bytes.clone(), clone_expectation(&expectation))
                })
                .await;

            match result {
                Ok(()) => return Ok(()),
                Err(tempo_storage::Error::PreconditionFailed(_)) => {
                    let jitter_ms = rand::thread_rng().gen_range(5..50);
                    tracing::debug!(tenant = tenant.as_str(), attempt, "tenant index CAS conflict, retrying");
                    tokio::time::sleep(Duration::from_millis(jitter_ms * attempt as u64)).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(Error::RetriesExhausted(MAX_CAS_RETRIES))
    }
}

fn clone_expectation(e: &CasExpectation) -> CasExpectation {
    match e {
        CasExpectation::Absent => CasExpectation::Absent,
        CasExpectation::Matches(b) => CasExpectation::Matches(b.clone()),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempo_storage::Driver;

    fn block(tenant: &TenantId) -> BlockMeta {
        BlockMeta {
            block_id: BlockId::new(),
            tenant: tenant.clone(),
            min_start_unix_nano: 0,
            max_end_unix_nano: 10,
            span_count: 1,
            byte_size: 10,
            compaction_level: 0,
            content_hash: [0; 32],
        }
    }

    #[tokio::test]
    async fn add_block_persists_and_is_readable() {
        let dir = tempfile::tempdir().unwrap();
        let driver = Driver::local(dir.path());
        let client = IndexClient::new(&driver);
        let tenant = TenantId::new("acme").unwrap();

        let meta = block(&tenant);
        let id = meta.block_id;
        client.add_block(&tenant, meta).await.unwrap();

        let idx = client.read(&tenant).await.unwrap();
        assert_eq!(idx.version, 1);
        assert!(idx.contains(id));
    }

    #[tokio::test]
    async fn concurrent_adds_never_lose_a_committed_block() {
        let dir = tempfile::tempdir().unwrap();
        let driver = Driver::local(dir.path());
        let tenant = TenantId::new("acme").unwrap();

        let ids: Vec<BlockId> = (0..10).map(|_| BlockId::new()).collect();
        let mut metas = Vec::new();
        for id in &ids {
            let mut m = block(&tenant);
            m.block_id = *id;
            metas.push(m);
        }

        let mut futs = Vec::new();
        for meta in metas {
            let driver = &driver;
            let tenant = tenant.clone();
            futs.push(async move {
                let client = IndexClient::new(driver);
                client.add_block(&tenant, meta).await.unwrap();
            });
        }
        futures::future::join_all(futs).await;

        let client = IndexClient::new(&driver);
        let idx = client.read(&tenant).await.unwrap();
        assert_eq!(idx.blocks.len(), 10);
        for id in ids {
            assert!(idx.contains(id));
        }
    }
}
