//! Crash recovery: replay the local WAL to rebuild the in-memory trace map,
//! then resume consumption from the last committed offset (spec.md §4.2
//! "Crash recovery").

use std::path::Path;
use std::time::Instant;

use tempo_wal::WalRecord;

use crate::commit::CommitStore;
use crate::trace_map::TraceMap;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("wal replay failed")]
    Wal(#[from] tempo_wal::Error),
    #[error("commit offset store failed")]
    Commit(#[from] crate::commit::Error),
}

/// Rebuilds `map` from every record still on disk in this partition's WAL,
/// then returns the log offset consumption should resume from: one past the
/// last committed offset, or zero if nothing has ever been committed.
///
/// Replaying WAL records whose batches were already reflected in a flushed
/// block is harmless: those traces were removed from the map by the cut
/// that flushed them, and `tempo-wal`'s own pruning already deletes
/// segments once their offsets are covered by a committed block, so in
/// practice only not-yet-cut records remain to replay.
pub async fn recover(
    wal_root: &Path,
    commit: &CommitStore,
    partition: u32,
    map: &TraceMap,
) -> Result<u64, Error> {
    let records: Vec<WalRecord> = tempo_wal::replay_partition(wal_root, partition).await?;
    let now = Instant::now();

    for record in &records {
        for span in &record.batch.spans {
            map.append(&record.tenant, span.clone(), now, record.offset)
                .await;
        }
    }

    let resume_offset = match commit.read().await? {
        Some(last_committed) => last_committed + 1,
        None => 0,
    };
    Ok(resume_offset)
}

#[cfg(test)]
mod test {
    use super::*;
    use tempo_proto::{Span, SpanId, SpanKind, Status, TenantId, TraceId};
    use tempo_wal::WalWriter;

    fn span(trace: u8, start: u64) -> Span {
        Span {
            trace_id: TraceId([trace; 16]),
            span_id: SpanId([1; 8]),
            parent_span_id: None,
            service_name: "svc".into(),
            operation_name: "op".into(),
            kind: SpanKind::Server,
            start_unix_nano: start,
            duration_nano: 10,
            status: Status::unset(),
            attributes: vec![],
            events: vec![],
            links: vec![],
        }
    }

    #[tokio::test]
    async fn recovery_rebuilds_map_and_resumes_past_commit() {
        let wal_dir = tempfile::tempdir().unwrap();
        let commit_dir = tempfile::tempdir().unwrap();
        let tenant = TenantId::new("acme").unwrap();

        let mut writer = WalWriter::open(wal_dir.path(), 0).await.unwrap();
        writer
            .append(&WalRecord {
                partition: 0,
                offset: 5,
                tenant: tenant.clone(),
                batch: tempo_proto::SpanBatch {
                    spans: vec![span(1, 100)],
                },
            })
            .await
            .unwrap();

        let commit = CommitStore::new(commit_dir.path(), 0);
        commit.advance(4).await.unwrap();

        let map = TraceMap::new(4);
        let resume = recover(wal_dir.path(), &commit, 0, &map).await.unwrap();

        assert_eq!(resume, 5);
        let spans = map.lookup(&tenant, &TraceId([1; 16])).await;
        assert_eq!(spans.len(), 1);
    }

    #[tokio::test]
    async fn no_prior_commit_resumes_from_zero() {
        let wal_dir = tempfile::tempdir().unwrap();
        let commit_dir = tempfile::tempdir().unwrap();
        let commit = CommitStore::new(commit_dir.path(), 0);
        let map = TraceMap::new(4);

        let resume = recover(wal_dir.path(), &commit, 0, &map).await.unwrap();
        assert_eq!(resume, 0);
    }
}
