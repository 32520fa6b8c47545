//! Per-column encode/decode. Integer columns are varint+zigzag then LZ4;
//! strings are dictionary-encoded then LZ4; fixed-width columns (trace/span
//! ids) are concatenated raw then LZ4. Each encoded column is whole and
//! independently decodable: the caller supplies the row count at decode time,
//! since a column chunk carries no count of its own (that lives in the row
//! group header).

use crate::Error;
use crate::varint::{read_varint, write_varint, zigzag_decode, zigzag_encode};

pub fn encode_int_column(values: &[i64]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(values.len() * 2);
    for &v in values {
        write_varint(&mut raw, zigzag_encode(v));
    }
    lz4_flex::compress_prepend_size(&raw)
}

pub fn decode_int_column(bytes: &[u8], count: usize) -> Result<Vec<i64>, Error> {
    let raw = lz4_flex::decompress_size_prepended(bytes).map_err(|_| Error::Malformed("int column: lz4"))?;
    let mut cursor = 0;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let v = read_varint(&raw, &mut cursor).ok_or(Error::Malformed("int column: varint"))?;
        out.push(zigzag_decode(v));
    }
    Ok(out)
}

pub fn encode_fixed_column<const N: usize>(values: &[[u8; N]]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(values.len() * N);
    for v in values {
        raw.extend_from_slice(v);
    }
    lz4_flex::compress_prepend_size(&raw)
}

pub fn decode_fixed_column<const N: usize>(bytes: &[u8], count: usize) -> Result<Vec<[u8; N]>, Error> {
    let raw = lz4_flex::decompress_size_prepended(bytes).map_err(|_| Error::Malformed("fixed column: lz4"))?;
    if raw.len() != count * N {
        return Err(Error::Malformed("fixed column: length mismatch"));
    }
    let mut out = Vec::with_capacity(count);
    for chunk in raw.chunks_exact(N) {
        out.push(chunk.try_into().unwrap());
    }
    Ok(out)
}

/// Dictionary-encodes `values`: a header of distinct strings in first-seen
/// order, followed by one varint dictionary index per row.
pub fn encode_string_column(values: &[String]) -> Vec<u8> {
    let mut dict = Vec::new();
    let mut index = std::collections::HashMap::new();
    let mut codes = Vec::with_capacity(values.len());

    for v in values {
        let code = *index.entry(v.clone()).or_insert_with(|| {
            dict.push(v.clone());
            (dict.len() - 1) as u64
        });
        codes.push(code);
    }

    let mut raw = Vec::new();
    write_varint(&mut raw, dict.len() as u64);
    for entry in &dict {
        write_varint(&mut raw, entry.len() as u64);
        raw.extend_from_slice(entry.as_bytes());
    }
    for code in codes {
        write_varint(&mut raw, code);
    }

    lz4_flex::compress_prepend_size(&raw)
}

pub fn decode_string_column(bytes: &[u8], count: usize) -> Result<Vec<String>, Error> {
    let raw = lz4_flex::decompress_size_prepended(bytes).map_err(|_| Error::Malformed("string column: lz4"))?;
    let mut cursor = 0;

    let dict_len = read_varint(&raw, &mut cursor).ok_or(Error::Malformed("string column: dict len"))? as usize;
    let mut dict = Vec::with_capacity(dict_len);
    for _ in 0..dict_len {
        let len = read_varint(&raw, &mut cursor).ok_or(Error::Malformed("string column: entry len"))? as usize;
        let end = cursor + len;
        let s = raw
            .get(cursor..end)
            .ok_or(Error::Malformed("string column: truncated entry"))?;
        dict.push(String::from_utf8_lossy(s).into_owned());
        cursor = end;
    }

    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let code = read_varint(&raw, &mut cursor).ok_or(Error::Malformed("string column: code"))? as usize;
        let s = dict
            .get(code)
            .ok_or(Error::Malformed("string column: dict index out of range"))?;
        out.push(s.clone());
    }
    Ok(out)
}
