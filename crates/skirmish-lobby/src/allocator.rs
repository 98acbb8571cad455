//! Relay endpoint allocation for newly formed battles.

use std::net::SocketAddr;

use skirmish_protocol::BattleCode;

/// Result of asking for a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    Ready(SocketAddr),
    /// No relay yet; the coordinator keeps the match and asks again on the
    /// next tick.
    Pending,
}

/// Picks the relay a battle's participants will dial.
///
/// Called from inside the coordinator's event loop; must not block.
pub trait RelayAllocator: Send + Sync + 'static {
    fn allocate(&self, region: &str, battle_code: &BattleCode) -> Allocation;
}

/// Always answers with one fixed relay address.
#[derive(Debug, Clone, Copy)]
pub struct StaticRelay {
    addr: SocketAddr,
}

impl StaticRelay {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

impl RelayAllocator for StaticRelay {
    fn allocate(&self, _region: &str, _battle_code: &BattleCode) -> Allocation {
        Allocation::Ready(self.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_relay_always_ready() {
        let addr: SocketAddr = "10.0.0.1:8003".parse().unwrap();
        let relay = StaticRelay::new(addr);
        assert_eq!(
            relay.allocate("anywhere", &BattleCode::from_millis(1)),
            Allocation::Ready(addr)
        );
    }
}
