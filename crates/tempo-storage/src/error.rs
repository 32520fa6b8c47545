#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("compare-and-swap precondition failed for {0}")]
    PreconditionFailed(String),
    #[error("backend {0:?} is not linked into this build")]
    BackendNotLinked(&'static str),
    #[error("object store io error")]
    Io(#[from] std::io::Error),
    #[error("object store transport error")]
    Transport(#[from] reqwest::Error),
    #[error("exhausted retry budget after {0} attempts")]
    RetriesExhausted(u32),
}
