//! Retention sweep: blocks whose `maxEnd` is older than `retention` are
//! marked for deletion and removed after the tenant index is updated
//! (spec.md §4.5 "Retention", §8 scenario 6).

use std::time::Duration;

use tempo_proto::BlockMeta;

/// Returns the blocks in `blocks` whose `maxEnd` is older than `retention`
/// relative to `now_unix_nano`.
pub fn expired(blocks: &[BlockMeta], now_unix_nano: u64, retention: Duration) -> Vec<BlockMeta> {
    let retention_nanos = retention.as_nanos() as u64;
    let horizon = now_unix_nano.saturating_sub(retention_nanos);
    blocks
        .iter()
        .filter(|b| b.max_end_unix_nano < horizon)
        .cloned()
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use tempo_proto::{BlockId, TenantId};

    fn block(max_end: u64) -> BlockMeta {
        BlockMeta {
            block_id: BlockId::new(),
            tenant: TenantId::new("acme").unwrap(),
            min_start_unix_nano: 0,
            max_end_unix_nano: max_end,
            span_count: 1,
            byte_size: 1,
            compaction_level: 0,
            content_hash: [0; 32],
        }
    }

    #[test]
    fn blocks_older_than_horizon_are_expired() {
        let retention = Duration::from_secs(3600);
        let now = 2 * 3600 * 1_000_000_000u64;
        let old = block(0);
        let fresh = block(now);
        let expired_blocks = expired(&[old.clone(), fresh.clone()], now, retention);
        assert_eq!(expired_blocks.len(), 1);
        assert_eq!(expired_blocks[0].block_id, old.block_id);
    }
}
