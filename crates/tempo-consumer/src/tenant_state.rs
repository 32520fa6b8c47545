//! Per-tenant bookkeeping for the size, duration, and memory-pressure cut
//! triggers (spec.md §4.2 "Cut triggers"). Tenant cardinality is orders of
//! magnitude below trace cardinality, so unlike the trace map this is a
//! single lock over a small map — no sharding needed.

use std::collections::HashMap;
use std::time::Instant;

use tempo_proto::TenantId;

#[derive(Debug, Clone, Copy)]
pub struct TenantOpenState {
    /// Wall-clock start of the tenant's current open block, i.e. the first
    /// span seen since the tenant's traces were last cut.
    pub block_started_at: Instant,
    pub last_updated: Instant,
}

impl TenantOpenState {
    fn new(now: Instant) -> Self {
        TenantOpenState {
            block_started_at: now,
            last_updated: now,
        }
    }
}

/// Tracks, per tenant, when its current open block started and was last
/// touched. Byte totals are read live from the trace map rather than
/// duplicated here, to avoid the two ever drifting out of sync.
pub struct TenantStateTracker {
    tenants: std::sync::Mutex<HashMap<TenantId, TenantOpenState>>,
}

impl TenantStateTracker {
    pub fn new() -> Self {
        TenantStateTracker {
            tenants: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Records an append for `tenant`, opening a new block-age window if
    /// this is the first span seen since the last cut.
    pub fn note_append(&self, tenant: &TenantId, now: Instant) {
        let mut tenants = self.tenants.lock().unwrap();
        tenants
            .entry(tenant.clone())
            .and_modify(|s| s.last_updated = now)
            .or_insert_with(|| TenantOpenState::new(now));
    }

    pub fn block_age(&self, tenant: &TenantId, now: Instant) -> std::time::Duration {
        self.tenants
            .lock()
            .unwrap()
            .get(tenant)
            .map(|s| now.saturating_duration_since(s.block_started_at))
            .unwrap_or_default()
    }

    /// Clears a tenant's open-block window after its traces have been cut,
    /// so the next span starts a fresh `maxBlockDuration` countdown.
    pub fn reset(&self, tenant: &TenantId) {
        self.tenants.lock().unwrap().remove(tenant);
    }

    /// Every tenant with an open block, ordered least-recently-updated
    /// first — the eviction order the memory-pressure trigger cuts in
    /// (spec.md §4.2: "least-recently-updated tenants are cut first").
    pub fn tenants_by_lru(&self) -> Vec<TenantId> {
        let tenants = self.tenants.lock().unwrap();
        let mut entries: Vec<(TenantId, Instant)> = tenants
            .iter()
            .map(|(t, s)| (t.clone(), s.last_updated))
            .collect();
        entries.sort_by_key(|(_, last_updated)| *last_updated);
        entries.into_iter().map(|(t, _)| t).collect()
    }

    pub fn tenant_count(&self) -> usize {
        self.tenants.lock().unwrap().len()
    }
}
