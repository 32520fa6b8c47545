use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::{rngs::StdRng, Rng, SeedableRng};
use tempo_proto::ring::TOKENS_PER_INSTANCE;
use tempo_proto::{InstanceState, RingEntry};
use tokio::sync::watch;

use crate::hash::hash32;
use crate::{Error, DEFAULT_HEARTBEAT_TIMEOUT, DEFAULT_QUORUM_GRACE};

/// A point-in-time view of ring membership, sufficient to make ownership
/// decisions without holding the ring's lock.
#[derive(Clone, Debug, Default)]
pub struct RingSnapshot {
    /// Token value -> owning instance address. A `BTreeMap` gives clockwise
    /// traversal via `range`.
    tokens: BTreeMap<u32, String>,
    entries: std::collections::HashMap<String, RingEntry>,
}

impl RingSnapshot {
    /// The first `ACTIVE` instance clockwise from `hash(key)`.
    pub fn owner(&self, key: u32) -> Option<&str> {
        self.owners(key, 1).into_iter().next()
    }

    /// The next `count` distinct zones clockwise from `hash(key)`, each
    /// represented by its first (clockwise-nearest) owning instance.
    pub fn owners(&self, key: u32, count: usize) -> Vec<&str> {
        let mut seen_zones = std::collections::HashSet::new();
        let mut out = Vec::new();

        let forward = self.tokens.range(key..).chain(self.tokens.range(..key));
        for (_, addr) in forward {
            let Some(entry) = self.entries.get(addr) else {
                continue;
            };
            if !entry.is_active() {
                continue;
            }
            if seen_zones.insert(entry.zone.clone()) {
                out.push(addr.as_str());
            }
            if out.len() == count {
                break;
            }
        }
        out
    }

    pub fn distinct_active_zones(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.is_active())
            .map(|e| e.zone.clone())
            .collect::<std::collections::HashSet<_>>()
            .len()
    }

    pub fn entry(&self, address: &str) -> Option<&RingEntry> {
        self.entries.get(address)
    }

    pub fn active_instances(&self) -> impl Iterator<Item = &RingEntry> {
        self.entries.values().filter(|e| e.is_active())
    }

    /// Every known instance regardless of health, for debug/introspection
    /// surfaces — `active_instances` is what ownership decisions use.
    pub fn all_instances(&self) -> impl Iterator<Item = &RingEntry> {
        self.entries.values()
    }
}

struct Inner {
    snapshot: RingSnapshot,
    heartbeat_timeout: Duration,
    quorum_grace: Duration,
}

/// The local, mutable view of ring membership. Cheap to clone (an `Arc`
/// handle); reads are lock-free snapshots per spec.md §5.
#[derive(Clone)]
pub struct Ring {
    inner: Arc<Mutex<Inner>>,
    version_tx: Arc<watch::Sender<u64>>,
}

impl Ring {
    pub fn new() -> Self {
        Self::with_timeouts(DEFAULT_HEARTBEAT_TIMEOUT, DEFAULT_QUORUM_GRACE)
    }

    pub fn with_timeouts(heartbeat_timeout: Duration, quorum_grace: Duration) -> Self {
        let (version_tx, _rx) = watch::channel(0);
        Ring {
            inner: Arc::new(Mutex::new(Inner {
                snapshot: RingSnapshot::default(),
                heartbeat_timeout,
                quorum_grace,
            })),
            version_tx: Arc::new(version_tx),
        }
    }

    /// Generate the 128 tokens an instance owns, deterministically derived
    /// from its address so repeated joins (e.g. after a restart) reclaim the
    /// same ring position.
    pub fn tokens_for(address: &str) -> Vec<u32> {
        let seed = hash32(address.as_bytes()) as u64;
        let mut rng = StdRng::seed_from_u64(seed);
        (0..TOKENS_PER_INSTANCE).map(|_| rng.gen::<u32>()).collect()
    }

    /// Register or update a peer's membership record (from gossip or local
    /// join).
    pub fn upsert(&self, address: String, entry: RingEntry) {
        let mut inner = self.inner.lock().unwrap();
        for token in &entry.tokens {
            inner.snapshot.tokens.insert(*token, address.clone());
        }
        inner.snapshot.entries.insert(address, entry);
        drop(inner);
        self.bump_version();
    }

    pub fn remove(&self, address: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.snapshot.entries.remove(address) {
            for token in &entry.tokens {
                inner.snapshot.tokens.remove(token);
            }
        }
        drop(inner);
        self.bump_version();
    }

    fn bump_version(&self) {
        self.version_tx.send_modify(|v| *v += 1);
    }

    /// Subscribe to ownership-relevant topology changes (joins, leaves,
    /// health transitions).
    pub fn watch_ownership_changes(&self) -> watch::Receiver<u64> {
        self.version_tx.subscribe()
    }

    /// Re-evaluate heartbeats against `now`, transitioning instances whose
    /// last heartbeat exceeds `heartbeat_timeout` to `Unhealthy`. Unhealthy
    /// instances are excluded from ownership but still counted for quorum
    /// within `quorum_grace`.
    pub fn reconcile(&self, now: SystemTime) {
        let now_nanos = now
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;

        let mut inner = self.inner.lock().unwrap();
        let timeout_nanos = inner.heartbeat_timeout.as_nanos() as u64;
        let mut changed = false;

        for entry in inner.snapshot.entries.values_mut() {
            let age = now_nanos.saturating_sub(entry.last_heartbeat_unix_nano);
            if age > timeout_nanos && entry.state == InstanceState::Active {
                entry.state = InstanceState::Unhealthy;
                changed = true;
            }
        }
        drop(inner);
        if changed {
            self.bump_version();
        }
    }

    /// True if `address` should still count toward quorum despite being
    /// unhealthy: within `quorum_grace` of its last heartbeat.
    pub fn counts_for_quorum(&self, address: &str, now: SystemTime) -> bool {
        let inner = self.inner.lock().unwrap();
        let Some(entry) = inner.snapshot.entries.get(address) else {
            return false;
        };
        if entry.is_active() {
            return true;
        }
        let now_nanos = now
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        let age = now_nanos.saturating_sub(entry.last_heartbeat_unix_nano);
        age <= inner.quorum_grace.as_nanos() as u64
    }

    pub fn snapshot(&self) -> RingSnapshot {
        self.inner.lock().unwrap().snapshot.clone()
    }

    /// Owners for a replication factor `r`: the next `r` distinct zones
    /// clockwise from `hash(key)`. Errors if fewer than `r` distinct active
    /// zones exist.
    pub fn owners_for_replication(&self, key: u32, r: usize) -> Result<Vec<String>, Error> {
        let snap = self.snapshot();
        let zones = snap.distinct_active_zones();
        if zones < r {
            return Err(Error::InsufficientZones(r, zones));
        }
        let owners: Vec<String> = snap.owners(key, r).into_iter().map(String::from).collect();
        if owners.is_empty() {
            return Err(Error::NoOwner);
        }
        Ok(owners)
    }
}

impl Default for Ring {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn entry(zone: &str, tokens: Vec<u32>, state: InstanceState) -> RingEntry {
        RingEntry {
            address: String::new(),
            zone: zone.to_string(),
            state,
            last_heartbeat_unix_nano: 0,
            tokens,
        }
    }

    #[test]
    fn tokens_are_deterministic_per_address() {
        let a = Ring::tokens_for("10.0.0.1:7000");
        let b = Ring::tokens_for("10.0.0.1:7000");
        assert_eq!(a, b);
        assert_eq!(a.len(), TOKENS_PER_INSTANCE);
        let c = Ring::tokens_for("10.0.0.2:7000");
        assert_ne!(a, c);
    }

    #[test]
    fn owner_picks_first_active_clockwise() {
        let ring = Ring::new();
        ring.upsert(
            "a".into(),
            entry("zone-a", vec![10, 200], InstanceState::Active),
        );
        ring.upsert(
            "b".into(),
            entry("zone-b", vec![100], InstanceState::Active),
        );

        let snap = ring.snapshot();
        // key=50 -> clockwise next token is 100 (owner b).
        assert_eq!(snap.owner(50), Some("b"));
        // key=150 -> clockwise next token is 200 (owner a).
        assert_eq!(snap.owner(150), Some("a"));
        // key=250 wraps to 10 (owner a).
        assert_eq!(snap.owner(250), Some("a"));
    }

    #[test]
    fn owner_skips_unhealthy_instances() {
        let ring = Ring::new();
        ring.upsert(
            "a".into(),
            entry("zone-a", vec![10], InstanceState::Unhealthy),
        );
        ring.upsert(
            "b".into(),
            entry("zone-b", vec![20], InstanceState::Active),
        );
        let snap = ring.snapshot();
        assert_eq!(snap.owner(5), Some("b"));
    }

    #[test]
    fn replication_owners_are_distinct_zones() {
        let ring = Ring::new();
        ring.upsert(
            "a1".into(),
            entry("zone-a", vec![10], InstanceState::Active),
        );
        ring.upsert(
            "a2".into(),
            entry("zone-a", vec![20], InstanceState::Active),
        );
        ring.upsert(
            "b1".into(),
            entry("zone-b", vec![30], InstanceState::Active),
        );

        let owners = ring.owners_for_replication(5, 2).unwrap();
        assert_eq!(owners.len(), 2);
        assert!(owners.contains(&"a1".to_string()));
        assert!(owners.contains(&"b1".to_string()));
    }

    #[test]
    fn replication_errors_on_insufficient_zones() {
        let ring = Ring::new();
        ring.upsert(
            "a1".into(),
            entry("zone-a", vec![10], InstanceState::Active),
        );
        let err = ring.owners_for_replication(5, 2).unwrap_err();
        assert!(matches!(err, Error::InsufficientZones(2, 1)));
    }

    #[test]
    fn reconcile_marks_stale_heartbeats_unhealthy() {
        let ring = Ring::with_timeouts(Duration::from_secs(30), Duration::from_secs(60));
        let mut e = entry("zone-a", vec![10], InstanceState::Active);
        e.last_heartbeat_unix_nano = 0;
        ring.upsert("a".into(), e);

        let now = UNIX_EPOCH + Duration::from_secs(31);
        ring.reconcile(now);

        let snap = ring.snapshot();
        assert_eq!(snap.entry("a").unwrap().state, InstanceState::Unhealthy);
        assert_eq!(snap.owner(5), None);
    }

    #[test]
    fn unhealthy_still_counts_for_quorum_within_grace() {
        let ring = Ring::with_timeouts(Duration::from_secs(30), Duration::from_secs(60));
        let mut e = entry("zone-a", vec![10], InstanceState::Active);
        e.last_heartbeat_unix_nano = 0;
        ring.upsert("a".into(), e);
        ring.reconcile(UNIX_EPOCH + Duration::from_secs(31));

        assert!(ring.counts_for_quorum("a", UNIX_EPOCH + Duration::from_secs(50)));
        assert!(!ring.counts_for_quorum("a", UNIX_EPOCH + Duration::from_secs(200)));
    }

    #[test]
    fn version_bumps_on_topology_change() {
        let ring = Ring::new();
        let mut rx = ring.watch_ownership_changes();
        assert_eq!(*rx.borrow(), 0);
        ring.upsert(
            "a".into(),
            entry("zone-a", vec![10], InstanceState::Active),
        );
        assert!(rx.has_changed().unwrap());
    }
}
