//! Builds a `tempo_ring::Ring` from a static peer list given on the
//! command line. Running a real gossip protocol (SWIM or similar) is
//! outside this workspace's budget — `tempo_ring::Gossip` specifies the
//! seam, the same way `tempo_log::PartitionLog` specifies the seam for a
//! broker this workspace doesn't implement — so every binary instead seeds
//! its `Ring` once at startup from `--peer zone=host:port` flags and treats
//! the membership as static for the life of the process.

use std::time::{SystemTime, UNIX_EPOCH};

use tempo_proto::{InstanceState, RingEntry};
use tempo_ring::Ring;

/// One `--peer` flag's value: `zone=host:port`, or bare `host:port` (zone
/// defaults to `default`).
#[derive(Debug, Clone)]
pub struct Peer {
    pub zone: String,
    pub address: String,
}

impl std::str::FromStr for Peer {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((zone, address)) => Ok(Peer {
                zone: zone.to_string(),
                address: address.to_string(),
            }),
            None => Ok(Peer {
                zone: "default".to_string(),
                address: s.to_string(),
            }),
        }
    }
}

pub fn build(self_zone: &str, self_address: &str, peers: &[Peer]) -> Ring {
    let ring = Ring::new();
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;

    ring.upsert(
        self_address.to_string(),
        RingEntry {
            address: self_address.to_string(),
            zone: self_zone.to_string(),
            state: InstanceState::Active,
            last_heartbeat_unix_nano: now,
            tokens: Ring::tokens_for(self_address),
        },
    );

    for peer in peers {
        if peer.address == self_address {
            continue;
        }
        ring.upsert(
            peer.address.clone(),
            RingEntry {
                address: peer.address.clone(),
                zone: peer.zone.clone(),
                state: InstanceState::Active,
                last_heartbeat_unix_nano: now,
                tokens: Ring::tokens_for(&peer.address),
            },
        );
    }

    ring
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn self_and_peers_are_all_active() {
        let peers = vec![Peer {
            zone: "zone-b".into(),
            address: "b:1".into(),
        }];
        let ring = build("zone-a", "a:1", &peers);
        let snap = ring.snapshot();
        assert!(snap.entry("a:1").unwrap().is_active());
        assert!(snap.entry("b:1").unwrap().is_active());
    }
}
