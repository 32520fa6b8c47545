use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Error;

use super::RawBackend;

/// Filesystem-rooted backend: every key maps to a path under `root`. Used for
/// local/single-binary deployments and as the backend tests exercise the
/// hedging/retry wrappers against.
#[derive(Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalBackend { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl RawBackend for LocalBackend {
    async fn get_once(&self, key: &str) -> Result<Bytes, Error> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(key.to_string()))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn put_once(&self, key: &str, body: Bytes) -> Result<(), Error> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write to a temp file then rename, so a concurrent reader never
        // observes a partially-written object.
        let tmp = tmp_path(&path);
        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete_once(&self, key: &str) -> Result<(), Error> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn list_once(&self, prefix: &str) -> Result<Vec<String>, Error> {
        let base = self.path_for(prefix);
        let mut out = Vec::new();
        if !base.exists() {
            return Ok(out);
        }
        walk(&base, &self.root, &mut out).await?;
        Ok(out)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

fn walk<'a>(
    dir: &'a Path,
    root: &'a Path,
    out: &'a mut Vec<String>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), Error>> + Send + 'a>> {
    Box::pin(async move {
        if dir.is_file() {
            if let Ok(rel) = dir.strip_prefix(root) {
                out.push(rel.to_string_lossy().replace('\\', "/"));
            }
            return Ok(());
        }
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_dir() {
                walk(&path, root, out).await?;
            } else if let Ok(rel) = path.strip_prefix(root) {
                out.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path());
        backend
            .put_once("t/block/data", Bytes::from_static(b"hello"))
            .await
            .unwrap();
        let got = backend.get_once("t/block/data").await.unwrap();
        assert_eq!(&got[..], b"hello");
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path());
        let err = backend.get_once("missing").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path());
        backend.delete_once("missing").await.unwrap();
        backend
            .put_once("k", Bytes::from_static(b"v"))
            .await
            .unwrap();
        backend.delete_once("k").await.unwrap();
        backend.delete_once("k").await.unwrap();
        assert!(matches!(
            backend.get_once("k").await.unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn list_returns_keys_under_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path());
        backend
            .put_once("acme/b1/data", Bytes::from_static(b"a"))
            .await
            .unwrap();
        backend
            .put_once("acme/b2/data", Bytes::from_static(b"b"))
            .await
            .unwrap();
        backend
            .put_once("other/b3/data", Bytes::from_static(b"c"))
            .await
            .unwrap();

        let mut keys = backend.list_once("acme/").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["acme/b1/data", "acme/b2/data"]);
    }
}
