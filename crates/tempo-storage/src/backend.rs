use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Error;

/// The single-attempt operations a backend must provide. `Driver` layers
/// hedging and retry on top of these; backends themselves stay dumb.
#[async_trait]
pub trait RawBackend: Send + Sync {
    async fn get_once(&self, key: &str) -> Result<Bytes, Error>;
    async fn put_once(&self, key: &str, body: Bytes) -> Result<(), Error>;
    async fn delete_once(&self, key: &str) -> Result<(), Error>;
    async fn list_once(&self, prefix: &str) -> Result<Vec<String>, Error>;
}

mod local;
pub use local::LocalBackend;

/// Storage backend selector: a sum type dispatched explicitly rather than
/// through open polymorphism, per spec.md §9's "dynamic dispatch → tagged
/// variants" design note. `Local` is the only backend with a working body in
/// this workspace: wiring the real S3/GCS/Azure SDKs is outside this crate's
/// budget, but the shape of the dispatch is what's specified.
pub enum Backend {
    S3 { bucket: String, region: String },
    Gcs { bucket: String },
    Azure { account: String, container: String },
    Local(LocalBackend),
}

#[async_trait]
impl RawBackend for Backend {
    async fn get_once(&self, key: &str) -> Result<Bytes, Error> {
        match self {
            Backend::Local(l) => l.get_once(key).await,
            Backend::S3 { .. } => Err(Error::BackendNotLinked("s3")),
            Backend::Gcs { .. } => Err(Error::BackendNotLinked("gcs")),
            Backend::Azure { .. } => Err(Error::BackendNotLinked("azure")),
        }
    }

    async fn put_once(&self, key: &str, body: Bytes) -> Result<(), Error> {
        match self {
            Backend::Local(l) => l.put_once(key, body).await,
            Backend::S3 { .. } => Err(Error::BackendNotLinked("s3")),
            Backend::Gcs { .. } => Err(Error::BackendNotLinked("gcs")),
            Backend::Azure { .. } => Err(Error::BackendNotLinked("azure")),
        }
    }

    async fn delete_once(&self, key: &str) -> Result<(), Error> {
        match self {
            Backend::Local(l) => l.delete_once(key).await,
            Backend::S3 { .. } => Err(Error::BackendNotLinked("s3")),
            Backend::Gcs { .. } => Err(Error::BackendNotLinked("gcs")),
            Backend::Azure { .. } => Err(Error::BackendNotLinked("azure")),
        }
    }

    async fn list_once(&self, prefix: &str) -> Result<Vec<String>, Error> {
        match self {
            Backend::Local(l) => l.list_once(prefix).await,
            Backend::S3 { .. } => Err(Error::BackendNotLinked("s3")),
            Backend::Gcs { .. } => Err(Error::BackendNotLinked("gcs")),
            Backend::Azure { .. } => Err(Error::BackendNotLinked("azure")),
        }
    }
}
