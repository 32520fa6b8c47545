//! Local write-ahead log for a partition consumer: a length-prefixed,
//! CRC32C-checksummed, append-only record stream, rotated into segments, per
//! spec.md §7 "WAL entry" and §8 "WAL segment".
//!
//! WAL I/O is never retried: a write error or a checksum mismatch is fatal to
//! the owning consumer, which exits and relies on segment replay after
//! restart (spec.md §7 "Retries").

mod segment;
mod writer;

pub use segment::{list_segments, replay_partition, replay_segment, segment_path, SegmentId};
pub use writer::WalWriter;

pub use tempo_proto::WalRecord;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("wal i/o error")]
    Io(#[from] std::io::Error),
    #[error("wal record corrupt: checksum mismatch in {path} at byte offset {byte_offset}")]
    Corrupt { path: String, byte_offset: u64 },
    #[error("wal record payload undecodable")]
    Decode(#[from] serde_json::Error),
}

/// Default ceiling on a single segment's size before the writer rotates to a
/// new one.
pub const DEFAULT_MAX_SEGMENT_BYTES: u64 = 64 * 1024 * 1024;
