use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 16-byte trace identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TraceId(pub [u8; 16]);

impl TraceId {
    pub fn from_hex(s: &str) -> Result<Self, IdError> {
        let bytes = hex_decode(s)?;
        let arr: [u8; 16] = bytes
            .try_into()
            .map_err(|_| IdError::WrongLength("TraceID", 16))?;
        Ok(TraceId(arr))
    }

    /// Fold the 128-bit id to a 32-bit partition key by xor-ing the two halves,
    /// each of which is itself folded in the same way down to 4 bytes.
    pub fn partition_key(&self) -> u32 {
        let mut acc = [0u8; 4];
        for (i, b) in self.0.iter().enumerate() {
            acc[i % 4] ^= b;
        }
        u32::from_be_bytes(acc)
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TraceId({})", self)
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// 8-byte span identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SpanId(pub [u8; 8]);

impl SpanId {
    pub fn from_hex(s: &str) -> Result<Self, IdError> {
        let bytes = hex_decode(s)?;
        let arr: [u8; 8] = bytes
            .try_into()
            .map_err(|_| IdError::WrongLength("SpanID", 8))?;
        Ok(SpanId(arr))
    }
}

impl fmt::Debug for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpanId({})", self)
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// An opaque per-tenant isolation boundary. No embedded `/`, `..`, or NUL.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    pub fn new(raw: impl Into<String>) -> Result<Self, IdError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(IdError::MalformedTenant("empty"));
        }
        if raw.contains('/') {
            return Err(IdError::MalformedTenant("contains '/'"));
        }
        if raw.contains("..") {
            return Err(IdError::MalformedTenant("contains '..'"));
        }
        if raw.contains('\0') {
            return Err(IdError::MalformedTenant("contains NUL"));
        }
        Ok(TenantId(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The tenant used when multitenancy is disabled, per spec.
    pub fn single_tenant() -> Self {
        TenantId("single-tenant".to_string())
    }
}

impl fmt::Debug for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TenantId({:?})", self.0)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TenantId {
    type Error = IdError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        TenantId::new(value)
    }
}

impl From<TenantId> for String {
    fn from(value: TenantId) -> Self {
        value.0
    }
}

impl FromStr for TenantId {
    type Err = IdError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TenantId::new(s)
    }
}

/// Content-addressed block identity. A UUIDv4, distinct from the block's
/// content hash: the id is assigned once per cut attempt, the hash is a pure
/// function of the block's bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId(pub uuid::Uuid);

impl BlockId {
    pub fn new() -> Self {
        BlockId(uuid::Uuid::new_v4())
    }
}

impl Default for BlockId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IdError {
    #[error("invalid hex encoding: {0}")]
    Hex(String),
    #[error("expected a {1}-byte {0}")]
    WrongLength(&'static str, usize),
    #[error("malformed tenant id: {0}")]
    MalformedTenant(&'static str),
}

fn hex_decode(s: &str) -> Result<Vec<u8>, IdError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.len() % 2 != 0 {
        return Err(IdError::Hex(s.to_string()));
    }
    let mut out = Vec::with_capacity(s.len() / 2);
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let hi = hex_val(bytes[i]).ok_or_else(|| IdError::Hex(s.to_string()))?;
        let lo = hex_val(bytes[i + 1]).ok_or_else(|| IdError::Hex(s.to_string()))?;
        out.push((hi << 4) | lo);
        i += 2;
    }
    Ok(out)
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn trace_id_round_trips_through_hex() {
        let id = TraceId::from_hex("0102030405060708090a0b0c0d0e0f10").unwrap();
        assert_eq!(id.to_string(), "0102030405060708090a0b0c0d0e0f10");
    }

    #[test]
    fn trace_id_partition_key_folds_halves() {
        // Two traces differing only in the high half fold to different keys
        // unless the xor happens to cancel out.
        let a = TraceId([0; 16]);
        let mut b_bytes = [0u8; 16];
        b_bytes[0] = 0xff;
        let b = TraceId(b_bytes);
        assert_ne!(a.partition_key(), b.partition_key());
    }

    #[test]
    fn tenant_rejects_path_traversal() {
        assert!(TenantId::new("ok-tenant").is_ok());
        assert!(TenantId::new("has/slash").is_err());
        assert!(TenantId::new("has..dots").is_err());
        assert!(TenantId::new("has\0nul").is_err());
        assert!(TenantId::new("").is_err());
    }

    #[test]
    fn single_tenant_default() {
        assert_eq!(TenantId::single_tenant().as_str(), "single-tenant");
    }
}
