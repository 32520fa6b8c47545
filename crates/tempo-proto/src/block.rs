use serde::{Deserialize, Serialize};

use crate::ids::{BlockId, TenantId};

/// Metadata describing an immutable, content-addressed block. Mirrors the
/// sibling `meta.json` object written alongside a block's data file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockMeta {
    pub block_id: BlockId,
    pub tenant: TenantId,
    pub min_start_unix_nano: u64,
    pub max_end_unix_nano: u64,
    pub span_count: u64,
    pub byte_size: u64,
    /// 0 = freshly cut, incremented by each compaction pass it survives.
    pub compaction_level: u32,
    /// SHA-256 over the block's byte stream, excluding the trailing CRC word.
    pub content_hash: [u8; 32],
}

impl BlockMeta {
    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        self.min_start_unix_nano <= end && start <= self.max_end_unix_nano
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn meta(min: u64, max: u64) -> BlockMeta {
        BlockMeta {
            block_id: BlockId::new(),
            tenant: TenantId::new("t").unwrap(),
            min_start_unix_nano: min,
            max_end_unix_nano: max,
            span_count: 1,
            byte_size: 10,
            compaction_level: 0,
            content_hash: [0; 32],
        }
    }

    #[test]
    fn overlap_detection() {
        let m = meta(100, 200);
        assert!(m.overlaps(150, 300));
        assert!(m.overlaps(0, 100));
        assert!(!m.overlaps(201, 300));
        assert!(!m.overlaps(0, 99));
    }
}
