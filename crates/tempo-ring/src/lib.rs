//! Gossip-backed consistent-hash ring used for routing and leader/ownership
//! decisions across ingress, consumers, the query federator, and the
//! compactor.
//!
//! The gossip transport itself is injected via the [`Gossip`] trait; this
//! crate owns only the membership data structure and the token math, the same
//! way the teacher stack's `gazette::Router` treats the broker connection as
//! an injected concern rather than something it dials up itself.

mod hash;
mod token_ring;

pub use hash::hash32;
pub use token_ring::{Ring, RingSnapshot};

use std::time::Duration;

use tempo_proto::{InstanceState, RingEntry};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no active instance found to own this key")]
    NoOwner,
    #[error("requested replication factor {0} exceeds distinct zone count {1}")]
    InsufficientZones(usize, usize),
}

/// Injectable gossip transport. A real implementation would run SWIM or a
/// similar protocol; `tempo-ring` only needs to broadcast the local instance's
/// state and receive updates about peers.
#[async_trait::async_trait]
pub trait Gossip: Send + Sync {
    async fn broadcast(&self, local: RingEntry);
    async fn poll_updates(&self) -> Vec<(String, RingEntry)>;
}

/// An in-process gossip stand-in used for single-binary deployments and
/// tests: every instance sharing the same `InMemoryGossip` handle observes
/// every other instance's broadcasts immediately.
#[derive(Clone, Default)]
pub struct InMemoryGossip {
    inner: std::sync::Arc<std::sync::Mutex<std::collections::HashMap<String, RingEntry>>>,
}

impl InMemoryGossip {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Gossip for InMemoryGossip {
    async fn broadcast(&self, local: RingEntry) {
        let mut guard = self.inner.lock().unwrap();
        guard.insert(local.address.clone(), local);
    }

    async fn poll_updates(&self) -> Vec<(String, RingEntry)> {
        let guard = self.inner.lock().unwrap();
        guard.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

/// Instances missing heartbeats longer than this are excluded from ownership
/// decisions (spec default).
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30);
/// Grace window during which an unhealthy instance still counts toward quorum.
pub const DEFAULT_QUORUM_GRACE: Duration = Duration::from_secs(60);

pub fn default_state() -> InstanceState {
    InstanceState::Joining
}
