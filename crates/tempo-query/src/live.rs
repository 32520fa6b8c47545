//! The live-tier client contract: how the federator reaches a partition
//! consumer to ask for not-yet-flushed spans (spec.md §4.4 "ask each owning
//! consumer"). A real deployment dials this over the network; this crate
//! only specifies the contract, the same way `tempo-log`'s `PartitionLog`
//! is a pure client trait over an externally-owned process.

use async_trait::async_trait;
use tempo_proto::{Span, TenantId, TraceId};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("live tier unavailable")]
    Unavailable,
    #[error("request deadline exceeded")]
    Timeout,
}

/// One zone's view of a partition consumer. `lookup_trace`/`scan_range` mirror
/// `tempo_consumer::PartitionConsumer`'s recent-read surface; an in-process
/// deployment implements this as a thin wrapper over an `Arc<PartitionConsumer>`,
/// a networked one as an RPC client.
#[async_trait]
pub trait LiveTier: Send + Sync {
    async fn lookup_trace(
        &self,
        tenant: &TenantId,
        partition: u32,
        trace_id: &TraceId,
    ) -> Result<Vec<Span>, Error>;

    async fn scan_range(
        &self,
        tenant: &TenantId,
        partition: u32,
        start: u64,
        end: u64,
    ) -> Result<Vec<Span>, Error>;
}
