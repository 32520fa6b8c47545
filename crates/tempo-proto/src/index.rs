use serde::{Deserialize, Serialize};

use crate::block::BlockMeta;
use crate::ids::{BlockId, TenantId};

/// A per-tenant document listing all live blocks, plus a monotonically
/// increasing version used for compare-and-swap writes.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TenantIndex {
    pub tenant: Option<TenantId>,
    pub version: u64,
    pub blocks: Vec<BlockMeta>,
}

impl TenantIndex {
    pub fn new(tenant: TenantId) -> Self {
        TenantIndex {
            tenant: Some(tenant),
            version: 0,
            blocks: Vec::new(),
        }
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.blocks.iter().any(|b| b.block_id == id)
    }

    pub fn with_block_added(&self, meta: BlockMeta) -> Self {
        let mut blocks = self.blocks.clone();
        blocks.push(meta);
        TenantIndex {
            tenant: self.tenant.clone(),
            version: self.version + 1,
            blocks,
        }
    }

    pub fn with_blocks_replaced(&self, remove: &[BlockId], add: BlockMeta) -> Self {
        let mut blocks: Vec<BlockMeta> = self
            .blocks
            .iter()
            .filter(|b| !remove.contains(&b.block_id))
            .cloned()
            .collect();
        blocks.push(add);
        TenantIndex {
            tenant: self.tenant.clone(),
            version: self.version + 1,
            blocks,
        }
    }

    pub fn with_blocks_removed(&self, remove: &[BlockId]) -> Self {
        let blocks: Vec<BlockMeta> = self
            .blocks
            .iter()
            .filter(|b| !remove.contains(&b.block_id))
            .cloned()
            .collect();
        TenantIndex {
            tenant: self.tenant.clone(),
            version: self.version + 1,
            blocks,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn block(id: BlockId) -> BlockMeta {
        BlockMeta {
            block_id: id,
            tenant: TenantId::new("t").unwrap(),
            min_start_unix_nano: 0,
            max_end_unix_nano: 1,
            span_count: 1,
            byte_size: 1,
            compaction_level: 0,
            content_hash: [0; 32],
        }
    }

    #[test]
    fn add_bumps_version_and_appends() {
        let idx = TenantIndex::new(TenantId::new("t").unwrap());
        let id = BlockId::new();
        let idx2 = idx.with_block_added(block(id));
        assert_eq!(idx2.version, 1);
        assert!(idx2.contains(id));
        assert!(!idx.contains(id));
    }

    #[test]
    fn replace_swaps_group_for_merged_block() {
        let idx = TenantIndex::new(TenantId::new("t").unwrap());
        let a = BlockId::new();
        let b = BlockId::new();
        let idx = idx.with_block_added(block(a)).with_block_added(block(b));

        let merged = BlockId::new();
        let idx = idx.with_blocks_replaced(&[a, b], block(merged));

        assert!(!idx.contains(a));
        assert!(!idx.contains(b));
        assert!(idx.contains(merged));
        assert_eq!(idx.blocks.len(), 1);
    }
}
