use serde::{Deserialize, Serialize};

use crate::ids::TenantId;
use crate::span::SpanBatch;

/// The logical payload of a WAL record: a raw span batch as received from the
/// partition log, tagged with the tenant it belongs to (a single partition
/// serves many tenants' traces, since partitioning hashes on `TraceID`
/// alone) and the log offset and partition it came from. The on-disk framing
/// (length prefix, CRC32C) lives in `tempo-wal`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalRecord {
    pub partition: u32,
    pub offset: u64,
    pub tenant: TenantId,
    pub batch: SpanBatch,
}
