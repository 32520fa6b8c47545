use std::path::PathBuf;

use tempo_proto::WalRecord;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::segment::{partition_dir, segment_path, SegmentId};
use crate::{Error, DEFAULT_MAX_SEGMENT_BYTES};

/// Append-only writer for a single partition's WAL. Every `append` fsyncs
/// before returning, so a caller that has observed success may safely
/// acknowledge progress against the partition log (spec.md §7).
pub struct WalWriter {
    root: PathBuf,
    partition: u32,
    max_segment_bytes: u64,
    seq: SegmentId,
    file: File,
    size: u64,
}

impl WalWriter {
    pub async fn open(root: impl Into<PathBuf>, partition: u32) -> Result<Self, Error> {
        Self::open_with_limit(root, partition, DEFAULT_MAX_SEGMENT_BYTES).await
    }

    pub async fn open_with_limit(
        root: impl Into<PathBuf>,
        partition: u32,
        max_segment_bytes: u64,
    ) -> Result<Self, Error> {
        let root = root.into();
        tokio::fs::create_dir_all(partition_dir(&root, partition)).await?;

        let existing = crate::segment::list_segments(&root, partition).await?;
        let seq = existing.last().map(|(s, _)| *s).unwrap_or(0).max(1);
        let path = segment_path(&root, partition, seq);

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let size = file.metadata().await?.len();

        Ok(WalWriter {
            root,
            partition,
            max_segment_bytes,
            seq,
            file,
            size,
        })
    }

    pub fn segment_seq(&self) -> SegmentId {
        self.seq
    }

    /// Append one record, fsync, then rotate to a fresh segment if the
    /// current one has crossed the size ceiling. Any error here is fatal to
    /// the caller: WAL I/O is not retried (spec.md §7 "Retries").
    pub async fn append(&mut self, record: &WalRecord) -> Result<(), Error> {
        let payload = serde_json::to_vec(&(&record.tenant, &record.batch))?;
        let crc = crc32c::crc32c(&payload);

        let mut frame = Vec::with_capacity(16 + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(&crc.to_be_bytes());
        frame.extend_from_slice(&record.offset.to_be_bytes());
        frame.extend_from_slice(&payload);

        self.file.write_all(&frame).await?;
        self.file.sync_data().await?;
        self.size += frame.len() as u64;

        if self.size >= self.max_segment_bytes {
            self.rotate().await?;
        }

        Ok(())
    }

    async fn rotate(&mut self) -> Result<(), Error> {
        let next_seq = self.seq + 1;
        let path = segment_path(&self.root, self.partition, next_seq);
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        self.file = file;
        self.seq = next_seq;
        self.size = 0;
        Ok(())
    }

    /// Delete every segment whose highest recorded offset is at or below
    /// `committed_offset`, per spec.md §7 step 5. The writer's own active
    /// segment is never deleted.
    pub async fn prune_up_to(&self, committed_offset: u64) -> Result<(), Error> {
        for (seq, path) in crate::segment::list_segments(&self.root, self.partition).await? {
            if seq == self.seq {
                continue;
            }
            let Some(max_offset) = crate::segment::highest_offset(&path).await? else {
                continue;
            };
            if max_offset <= committed_offset {
                tokio::fs::remove_file(&path).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempo_proto::SpanBatch;

    fn record(offset: u64) -> WalRecord {
        WalRecord {
            partition: 0,
            offset,
            tenant: tempo_proto::TenantId::new("acme").unwrap(),
            batch: SpanBatch { spans: vec![] },
        }
    }

    #[tokio::test]
    async fn append_then_replay_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = WalWriter::open(dir.path(), 0).await.unwrap();
        w.append(&record(1)).await.unwrap();
        w.append(&record(2)).await.unwrap();

        let replayed = crate::segment::replay_partition(dir.path(), 0)
            .await
            .unwrap();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0].offset, 1);
        assert_eq!(replayed[1].offset, 2);
    }

    #[tokio::test]
    async fn rotation_starts_a_fresh_segment_past_the_size_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = WalWriter::open_with_limit(dir.path(), 0, 1).await.unwrap();
        w.append(&record(1)).await.unwrap();
        assert_eq!(w.segment_seq(), 2);
        w.append(&record(2)).await.unwrap();
        assert_eq!(w.segment_seq(), 3);

        let segs = crate::segment::list_segments(dir.path(), 0).await.unwrap();
        assert_eq!(segs.len(), 3);
    }

    #[tokio::test]
    async fn prune_removes_only_fully_committed_segments() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = WalWriter::open_with_limit(dir.path(), 0, 1).await.unwrap();
        w.append(&record(1)).await.unwrap(); // written to segment 1, rotates to 2
        w.append(&record(2)).await.unwrap(); // written to segment 2, rotates to 3
        w.append(&record(3)).await.unwrap(); // written to segment 3, rotates to 4 (active, empty)

        w.prune_up_to(2).await.unwrap();

        let segs = crate::segment::list_segments(dir.path(), 0).await.unwrap();
        let seqs: Vec<_> = segs.iter().map(|(s, _)| *s).collect();
        assert_eq!(seqs, vec![3, 4]);
    }

    #[tokio::test]
    async fn corrupt_record_is_reported_and_replay_stops() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = WalWriter::open(dir.path(), 0).await.unwrap();
        w.append(&record(1)).await.unwrap();

        let path = crate::segment::segment_path(dir.path(), 0, w.segment_seq());
        let mut bytes = tokio::fs::read(&path).await.unwrap();
        // Flip a byte inside the payload without touching the length/crc header.
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        tokio::fs::write(&path, &bytes).await.unwrap();

        let err = crate::segment::replay_partition(dir.path(), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Corrupt { .. }));
    }
}
