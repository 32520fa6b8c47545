use serde::{Deserialize, Serialize};

pub const TOKENS_PER_INSTANCE: usize = 128;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceState {
    Joining,
    Active,
    Leaving,
    Unhealthy,
}

/// A single instance's membership record: address, zone, health, and the
/// tokens it owns on the 32-bit ring.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RingEntry {
    pub address: String,
    pub zone: String,
    pub state: InstanceState,
    pub last_heartbeat_unix_nano: u64,
    pub tokens: Vec<u32>,
}

impl RingEntry {
    pub fn is_active(&self) -> bool {
        matches!(self.state, InstanceState::Active)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn active_predicate() {
        let mut e = RingEntry {
            address: "a:1".into(),
            zone: "z1".into(),
            state: InstanceState::Active,
            last_heartbeat_unix_nano: 0,
            tokens: vec![],
        };
        assert!(e.is_active());
        e.state = InstanceState::Unhealthy;
        assert!(!e.is_active());
    }
}
