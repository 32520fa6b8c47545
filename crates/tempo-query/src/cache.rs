//! Single-flight result cache: at most one concurrent evaluation per
//! fingerprint, with later callers awaiting the in-flight computation
//! (spec.md §4.4 "Cache"), the same pattern the reference stack's task spec
//! cache uses to share one in-flight fetch future across callers rather than
//! recomputing per caller.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use sha2::{Digest, Sha256};
use tempo_proto::{Span, TenantId};
use tokio::sync::Mutex as AsyncMutex;

/// Identifies a cacheable query: the tenant, the operator (trace lookup or
/// search), its parameters, and the time range — spec.md §4.4's
/// `hash(query, time-range, block-set)`. The block set itself is folded in by
/// the caller (it is only known after the tenant index is read), so this
/// type takes the already-serialized query description.
pub fn fingerprint(tenant: &TenantId, query_repr: &str, start: u64, end: u64, block_set: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(tenant.as_str().as_bytes());
    hasher.update(query_repr.as_bytes());
    hasher.update(start.to_be_bytes());
    hasher.update(end.to_be_bytes());
    hasher.update(block_set.as_bytes());
    hasher.finalize().into()
}

type SharedResult = Shared<BoxFuture<'static, Arc<Vec<Span>>>>;

/// Holds at most one in-flight (or most-recently-finished) future per
/// fingerprint. Entries are not evicted on a timer: `evaluate` always
/// replaces a finished entry rather than serving stale results, which keeps
/// this a pure "collapse concurrent duplicate work" cache rather than a
/// result cache with its own staleness policy.
#[derive(Default)]
pub struct QueryCache {
    inflight: AsyncMutex<HashMap<[u8; 32], SharedResult>>,
}

impl QueryCache {
    pub fn new() -> Self {
        QueryCache::default()
    }

    /// Returns the result for `key`, computing it via `compute` if no
    /// evaluation is in flight or the previous one has already completed.
    pub async fn evaluate<F>(&self, key: [u8; 32], compute: F) -> Arc<Vec<Span>>
    where
        F: std::future::Future<Output = Vec<Span>> + Send + 'static,
    {
        let mut guard = self.inflight.lock().await;
        if let Some(existing) = guard.get(&key) {
            if let Some(result) = existing.peek() {
                return result.clone();
            }
            let fut = existing.clone();
            drop(guard);
            return fut.await;
        }

        let shared: SharedResult = async move { Arc::new(compute.await) }.boxed().shared();
        guard.insert(key, shared.clone());
        drop(guard);
        shared.await
    }
}
