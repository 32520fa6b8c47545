//! The consumer's committed-offset store: a single small file per
//! partition, separate from the WAL itself, recording "every record up to
//! and including this offset is durable in a flushed block or still
//! replayable from the WAL" (spec.md §4.2 "Crash recovery": "reads the last
//! committed offset per partition").

use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("commit offset i/o error")]
    Io(#[from] std::io::Error),
    #[error("commit offset file is corrupt")]
    Corrupt,
}

pub struct CommitStore {
    path: PathBuf,
}

impl CommitStore {
    pub fn new(root: impl AsRef<Path>, partition: u32) -> Self {
        CommitStore {
            path: root.as_ref().join(format!("{partition}.commit")),
        }
    }

    pub async fn read(&self) -> Result<Option<u64>, Error> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let text = std::str::from_utf8(&bytes).map_err(|_| Error::Corrupt)?;
                let offset = text.trim().parse::<u64>().map_err(|_| Error::Corrupt)?;
                Ok(Some(offset))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes the new committed offset via a tmp-file rename, so a crash
    /// mid-write never leaves a torn offset behind.
    pub async fn advance(&self, offset: u64) -> Result<(), Error> {
        let tmp = self.path.with_extension("commit.tmp");
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&tmp, offset.to_string()).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn missing_commit_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = CommitStore::new(dir.path(), 0);
        assert_eq!(store.read().await.unwrap(), None);
    }

    #[tokio::test]
    async fn advance_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = CommitStore::new(dir.path(), 3);
        store.advance(42).await.unwrap();
        assert_eq!(store.read().await.unwrap(), Some(42));
    }
}
