//! Block encoding: assembles spans into row groups, builds the row-group
//! index and bloom filter, and seals the whole thing behind a footer and
//! CRC32C trailer, per spec.md §4.2 step 2 and §4.3.

use std::collections::HashSet;

use sha2::{Digest, Sha256};
use tempo_proto::{BlockId, BlockMeta, Span, TenantId};

use crate::bloom::PartitionedBloom;
use crate::footer::{encode_footer, Footer};
use crate::rowgroup::{encode_row_group, RowGroupIndexEntry, ROW_GROUP_TARGET_RAW_BYTES};
use crate::{Error, MAGIC, VERSION};

/// Builds a block from an already-validated set of same-tenant spans. Spans
/// need not arrive sorted; the writer sorts them by `(TraceID, StartNanos)`
/// before cutting row groups, establishing the row-group monotonicity
/// invariant (spec.md §8).
pub fn build_block(
    tenant: &TenantId,
    compaction_level: u32,
    mut spans: Vec<Span>,
) -> Result<(Vec<u8>, BlockMeta), Error> {
    if spans.is_empty() {
        return Err(Error::EmptyBlock);
    }

    spans.sort_by(|a, b| {
        a.trace_id
            .0
            .cmp(&b.trace_id.0)
            .then(a.start_unix_nano.cmp(&b.start_unix_nano))
    });

    let min_start = spans.iter().map(|s| s.start_unix_nano).min().unwrap();
    let max_end = spans
        .iter()
        .map(|s| s.start_unix_nano + s.duration_nano)
        .max()
        .unwrap();
    let span_count = spans.len() as u64;

    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_be_bytes());

    let groups = cut_row_groups(&spans);
    let mut index_entries = Vec::with_capacity(groups.len());
    let row_group_section_start = out.len() as u64;

    for group in &groups {
        let encoded = encode_row_group(group);
        let offset = out.len() as u64 - row_group_section_start;
        let min_start = group.iter().map(|s| s.start_unix_nano).min().unwrap();
        let max_end = group
            .iter()
            .map(|s| s.start_unix_nano + s.duration_nano)
            .max()
            .unwrap();
        index_entries.push(RowGroupIndexEntry {
            offset,
            size: encoded.len() as u64,
            min_start_unix_nano: min_start,
            max_end_unix_nano: max_end,
            min_trace_id: group.first().unwrap().trace_id.0,
            max_trace_id: group.last().unwrap().trace_id.0,
        });
        out.extend_from_slice(&encoded);
    }

    let row_group_index_offset = out.len() as u64;
    encode_row_group_index(&mut out, &index_entries);

    let bloom_offset = out.len() as u64;
    let distinct_traces: HashSet<[u8; 16]> = spans.iter().map(|s| s.trace_id.0).collect();
    let mut bloom = PartitionedBloom::new(distinct_traces.len(), 0.01);
    for trace_id in &distinct_traces {
        bloom.insert(trace_id);
    }
    out.extend_from_slice(&bloom.encode());

    let bloom_section_end = out.len() as u64;
    let content_hash: [u8; 32] = Sha256::digest(&out[..bloom_section_end as usize]).into();

    let footer_offset = out.len() as u64;
    let footer = Footer {
        tenant: tenant.as_str().to_string(),
        min_start_unix_nano: min_start,
        max_end_unix_nano: max_end,
        span_count,
        row_group_count: groups.len() as u32,
        compaction_level,
        content_hash,
    };
    out.extend_from_slice(&encode_footer(&footer));

    out.extend_from_slice(&row_group_index_offset.to_be_bytes());
    out.extend_from_slice(&bloom_offset.to_be_bytes());
    out.extend_from_slice(&footer_offset.to_be_bytes());

    let crc = crc32c::crc32c(&out);
    out.extend_from_slice(&crc.to_be_bytes());

    let meta = BlockMeta {
        block_id: BlockId::new(),
        tenant: tenant.clone(),
        min_start_unix_nano: min_start,
        max_end_unix_nano: max_end,
        span_count,
        byte_size: out.len() as u64,
        compaction_level,
        content_hash,
    };

    Ok((out, meta))
}

fn cut_row_groups(spans: &[Span]) -> Vec<Vec<Span>> {
    let mut groups = Vec::new();
    let mut current = Vec::new();
    let mut current_bytes = 0usize;

    for span in spans {
        let estimated = estimate_span_bytes(span);
        if !current.is_empty() && current_bytes + estimated > ROW_GROUP_TARGET_RAW_BYTES {
            groups.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes += estimated;
        current.push(span.clone());
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

fn estimate_span_bytes(span: &Span) -> usize {
    let fixed = 16 + 8 + 8 + 8 + 8 + 1 + 1; // ids, timestamps, kind, status code
    let names = span.service_name.len() + span.operation_name.len();
    let attrs: usize = span
        .attributes
        .iter()
        .map(|a| a.key.len() + 16)
        .sum::<usize>();
    let events: usize = span
        .events
        .iter()
        .map(|e| e.name.len() + 24)
        .sum::<usize>();
    let links: usize = span.links.len() * 24;
    fixed + names + attrs + events + links
}

fn encode_row_group_index(out: &mut Vec<u8>, entries: &[RowGroupIndexEntry]) {
    out.extend_from_slice(&(entries.len() as u32).to_be_bytes());
    for e in entries {
        out.extend_from_slice(&e.offset.to_be_bytes());
        out.extend_from_slice(&e.size.to_be_bytes());
        out.extend_from_slice(&e.min_start_unix_nano.to_be_bytes());
        out.extend_from_slice(&e.max_end_unix_nano.to_be_bytes());
        out.extend_from_slice(&e.min_trace_id);
        out.extend_from_slice(&e.max_trace_id);
    }
}
