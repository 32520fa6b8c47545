//! Block reading: footer → bloom → row-group index → column decode, per
//! spec.md §4.3: "Reading: consult footer → seek to bloom → filter by
//! `TraceID` → seek to row groups containing candidates → decode only
//! required columns."

use tempo_proto::{Span, TraceId};

use crate::bloom::PartitionedBloom;
use crate::footer::{decode_footer, Footer, TRAILER_LEN};
use crate::rowgroup::{decode_row_group, decode_row_group_index, RowGroupIndexEntry};
use crate::{Error, MAGIC, VERSION};

const HEADER_LEN: usize = 8; // magic (4) + version (4)
const CRC_LEN: usize = 4;

/// A parsed, validated block ready for point lookups and range scans. Holds
/// the full byte stream plus the already-decoded footer, bloom filter, and
/// row-group index — nothing past that is decoded until a query asks for it.
pub struct BlockReader {
    bytes: Vec<u8>,
    footer: Footer,
    bloom: PartitionedBloom,
    index: Vec<RowGroupIndexEntry>,
}

/// Result of a point lookup: the matching spans plus whether the bloom
/// filter admitted any candidate groups at all (useful for callers that want
/// to distinguish "definitely absent" from "absent among admitted groups").
pub struct TraceLookup {
    pub spans: Vec<Span>,
    pub groups_scanned: usize,
}

impl BlockReader {
    /// Validates magic, version, and the trailing CRC32C, then parses the
    /// footer, bloom filter, and row-group index sections. Row groups
    /// themselves are decoded lazily by `lookup_trace`/`scan_range`.
    pub fn open(bytes: Vec<u8>) -> Result<Self, Error> {
        if bytes.len() < HEADER_LEN + TRAILER_LEN + CRC_LEN {
            return Err(Error::Truncated);
        }
        if &bytes[0..4] != MAGIC {
            return Err(Error::BadMagic);
        }
        let version = u32::from_be_bytes(bytes[4..8].try_into().unwrap());
        if version != VERSION {
            return Err(Error::UnsupportedVersion(version));
        }

        let crc_start = bytes.len() - CRC_LEN;
        let expected_crc = u32::from_be_bytes(bytes[crc_start..].try_into().unwrap());
        let actual_crc = crc32c::crc32c(&bytes[..crc_start]);
        if actual_crc != expected_crc {
            return Err(Error::ChecksumMismatch);
        }

        let trailer_start = crc_start - TRAILER_LEN;
        let trailer = &bytes[trailer_start..crc_start];
        let row_group_index_offset = u64::from_be_bytes(trailer[0..8].try_into().unwrap()) as usize;
        let bloom_offset = u64::from_be_bytes(trailer[8..16].try_into().unwrap()) as usize;
        let footer_offset = u64::from_be_bytes(trailer[16..24].try_into().unwrap()) as usize;

        let footer = decode_footer(
            bytes
                .get(footer_offset..trailer_start)
                .ok_or(Error::Malformed("footer: out of bounds"))?,
        )?;
        let bloom = PartitionedBloom::decode(
            bytes
                .get(bloom_offset..footer_offset)
                .ok_or(Error::Malformed("bloom: out of bounds"))?,
        )?;
        let index = decode_row_group_index(
            bytes
                .get(row_group_index_offset..bloom_offset)
                .ok_or(Error::Malformed("row group index: out of bounds"))?,
        )?;

        Ok(BlockReader {
            bytes,
            footer,
            bloom,
            index,
        })
    }

    pub fn footer(&self) -> &Footer {
        &self.footer
    }

    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        self.footer.min_start_unix_nano <= end && start <= self.footer.max_end_unix_nano
    }

    /// Point lookup by `TraceID`. Bloom-filters the whole block first; on a
    /// negative, returns immediately without touching any row group. On a
    /// positive, scans only the row groups whose `[min_trace_id,
    /// max_trace_id]` brackets the query id — O(1) in the common case since
    /// groups are cut from a globally trace-id-sorted stream.
    pub fn lookup_trace(&self, trace_id: &TraceId) -> Result<TraceLookup, Error> {
        if !self.bloom.might_contain(&trace_id.0) {
            return Ok(TraceLookup {
                spans: Vec::new(),
                groups_scanned: 0,
            });
        }

        let mut spans = Vec::new();
        let mut groups_scanned = 0;
        for entry in &self.index {
            if trace_id.0 < entry.min_trace_id || trace_id.0 > entry.max_trace_id {
                continue;
            }
            groups_scanned += 1;
            let group = self.decode_group(entry)?;
            spans.extend(group.into_iter().filter(|s| &s.trace_id == trace_id));
        }
        Ok(TraceLookup {
            spans,
            groups_scanned,
        })
    }

    /// Range scan: decodes every row group whose `[minStart, maxEnd]`
    /// overlaps `[start, end]` and returns all spans it contains (no
    /// trace-id filtering, per spec.md §4.3: "a range scan reads all groups
    /// whose `[minStart,maxEnd]` overlaps the query").
    pub fn scan_range(&self, start: u64, end: u64) -> Result<Vec<Span>, Error> {
        let mut spans = Vec::new();
        for entry in &self.index {
            if entry.min_start_unix_nano > end || start > entry.max_end_unix_nano {
                continue;
            }
            spans.extend(self.decode_group(entry)?);
        }
        Ok(spans)
    }

    fn decode_group(&self, entry: &RowGroupIndexEntry) -> Result<Vec<Span>, Error> {
        let start = HEADER_LEN + entry.offset as usize;
        let end = start + entry.size as usize;
        let bytes = self
            .bytes
            .get(start..end)
            .ok_or(Error::Malformed("row group: out of bounds"))?;
        decode_row_group(bytes)
    }
}
