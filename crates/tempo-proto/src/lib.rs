//! Core data model shared by every Tempo component: spans, traces, tenants,
//! blocks, WAL records, the tenant index, and ring membership records.

pub mod block;
pub mod ids;
pub mod index;
pub mod ring;
pub mod span;
pub mod wal;

pub use block::BlockMeta;
pub use ids::{BlockId, IdError, SpanId, TenantId, TraceId};
pub use index::TenantIndex;
pub use ring::{InstanceState, RingEntry};
pub use span::{
    Attribute, AttributeValue, Event, Link, Span, SpanBatch, SpanKind, Status, StatusCode,
    ValidationError,
};
pub use wal::WalRecord;
