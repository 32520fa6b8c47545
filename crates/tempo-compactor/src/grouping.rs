//! Groups blocks eligible for compaction at a given level: same level,
//! overlapping time ranges, bounded total size (spec.md §4.5 "For each
//! tenant, periodically: ... group blocks eligible for compaction at level
//! `L` (small, overlapping time ranges, same level)").

use std::collections::BTreeMap;

use tempo_proto::BlockMeta;

/// A group is only worth merging once it has at least this many blocks.
pub const MIN_GROUP_SIZE: usize = 2;

/// Partitions `blocks` by compaction level, then within each level greedily
/// chains blocks whose time ranges overlap (or abut) into groups capped at
/// `max_group_bytes`. Singleton runs (nothing left to merge with) are
/// dropped rather than returned as a trivial one-block group.
pub fn eligible_groups(blocks: &[BlockMeta], max_group_bytes: u64) -> Vec<Vec<BlockMeta>> {
    let mut by_level: BTreeMap<u32, Vec<BlockMeta>> = BTreeMap::new();
    for block in blocks {
        by_level
            .entry(block.compaction_level)
            .or_default()
            .push(block.clone());
    }

    let mut groups = Vec::new();
    for (_level, mut level_blocks) in by_level {
        level_blocks.sort_by_key(|b| b.min_start_unix_nano);

        let mut current: Vec<BlockMeta> = Vec::new();
        let mut current_bytes = 0u64;
        let mut current_max_end = 0u64;

        for block in level_blocks {
            let overlaps_current = current.is_empty() || block.min_start_unix_nano <= current_max_end;
            let fits = current_bytes + block.byte_size <= max_group_bytes;

            if overlaps_current && fits {
                current_max_end = current_max_end.max(block.max_end_unix_nano);
                current_bytes += block.byte_size;
                current.push(block);
                continue;
            }

            flush_group(&mut groups, std::mem::take(&mut current));
            current_max_end = block.max_end_unix_nano;
            current_bytes = block.byte_size;
            current.push(block);
        }
        flush_group(&mut groups, current);
    }
    groups
}

fn flush_group(groups: &mut Vec<Vec<BlockMeta>>, group: Vec<BlockMeta>) {
    if group.len() >= MIN_GROUP_SIZE {
        groups.push(group);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempo_proto::{BlockId, TenantId};

    fn block(level: u32, min: u64, max: u64, bytes: u64) -> BlockMeta {
        BlockMeta {
            block_id: BlockId::new(),
            tenant: TenantId::new("acme").unwrap(),
            min_start_unix_nano: min,
            max_end_unix_nano: max,
            span_count: 1,
            byte_size: bytes,
            compaction_level: level,
            content_hash: [0; 32],
        }
    }

    #[test]
    fn groups_overlapping_same_level_blocks() {
        let blocks = vec![
            block(0, 0, 100, 10),
            block(0, 50, 150, 10),
            block(0, 300, 400, 10),
        ];
        let groups = eligible_groups(&blocks, 1_000);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 2);
    }

    #[test]
    fn does_not_mix_levels() {
        let blocks = vec![block(0, 0, 100, 10), block(1, 0, 100, 10)];
        assert!(eligible_groups(&blocks, 1_000).is_empty());
    }

    #[test]
    fn respects_max_group_bytes() {
        let blocks = vec![
            block(0, 0, 100, 60),
            block(0, 50, 150, 60),
            block(0, 60, 160, 60),
        ];
        let groups = eligible_groups(&blocks, 100);
        // First two blocks (120 bytes) exceed the 100-byte cap together, so
        // they each start their own singleton run and never group.
        assert!(groups.is_empty());
    }

    #[test]
    fn singleton_runs_are_dropped() {
        let blocks = vec![block(0, 0, 100, 10), block(0, 500, 600, 10)];
        assert!(eligible_groups(&blocks, 1_000).is_empty());
    }
}
