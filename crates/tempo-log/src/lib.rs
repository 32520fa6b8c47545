//! Partition log client contract. The log itself is explicitly external to
//! this specification (spec.md §2 marks it "external"); this crate supplies
//! the *client* surface every other component programs against — analogous
//! to how the teacher stack's `gazette` crate is a pure client of a broker
//! process it does not implement — plus one concrete, file-backed
//! implementation sufficient to exercise the full ingress → consumer → block
//! pipeline standalone, without a real Kafka/Gazette broker.

mod local;

pub use local::LocalFileLog;

use async_trait::async_trait;
use tempo_proto::{SpanBatch, TenantId};

/// A position within a single partition's record stream. Offsets are
/// zero-based and dense: the Nth successful `append` to a partition is
/// assigned offset N.
pub type Offset = u64;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("log i/o error")]
    Io(#[from] std::io::Error),
    #[error("record payload undecodable")]
    Decode(#[from] serde_json::Error),
    #[error("partition {0} does not exist (partition_count = {1})")]
    NoSuchPartition(u32, u32),
    #[error("log is unavailable")]
    Unavailable,
}

/// One record as read back from the log: its partition-local offset, the
/// tenant the batch belongs to (a partition is shared by many tenants, since
/// partitioning hashes on `TraceID` alone), and the span batch originally
/// appended.
#[derive(Debug, Clone)]
pub struct Record {
    pub offset: Offset,
    pub tenant: TenantId,
    pub batch: SpanBatch,
}

/// The client contract every ingress/consumer component programs against.
/// Within a partition, `append` order equals the order records become
/// visible to `read` (spec.md §4.1 "Ordering"); across partitions, no
/// ordering is implied.
#[async_trait]
pub trait PartitionLog: Send + Sync {
    /// Appends one record to `partition`, returning the offset it was
    /// assigned. Durable once this resolves successfully.
    async fn append(
        &self,
        partition: u32,
        tenant: TenantId,
        batch: SpanBatch,
    ) -> Result<Offset, Error>;

    /// Reads every record at or after `from_offset` in `partition`, in
    /// order, as of the time of the call. Does not block waiting for future
    /// records — callers poll by re-invoking with an advanced offset.
    async fn read(&self, partition: u32, from_offset: Offset) -> Result<Vec<Record>, Error>;

    /// Total number of partitions this log instance serves.
    fn partition_count(&self) -> u32;
}
