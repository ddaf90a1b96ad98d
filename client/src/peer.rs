//! Per-player state of the direct connection mesh.

use crate::endpoint::Connection;
use protocol::{Packet, PeerPing, PeerPong, PlayerInfo};
use std::net::SocketAddrV4;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Interval between keepalive pings on a peer connection.
pub const PING_INTERVAL: Duration = Duration::from_secs(10);

/// Silence after which a peer connection is considered dead.
pub const PEER_TIMEOUT: Duration = Duration::from_secs(13);

/// Another player of the lobby.
///
/// The record outlives its connection: a reconnect swaps `conn` in place so
/// the player keeps its identity for mask bookkeeping.
#[derive(Debug)]
pub struct Peer {
    pub id: u8,
    pub name: String,
    /// Join counter announced by the host, checked on every handshake.
    pub join_counter: u32,
    pub external_addr: Option<SocketAddrV4>,
    pub internal_addr: Option<SocketAddrV4>,
    /// Connectivity mask last reported by this player.
    pub peer_mask: u32,
    /// Last measured round trip in milliseconds, 0 while disconnected.
    pub rtt_ms: u32,
    pub(crate) conn: Option<Arc<Connection>>,
}

impl Peer {
    pub fn new(info: &PlayerInfo) -> Self {
        Self {
            id: info.player_id,
            name: info.player_name.clone(),
            join_counter: info.join_counter,
            external_addr: info.external_addr,
            internal_addr: info.internal_addr,
            peer_mask: 0,
            rtt_ms: 0,
            conn: None,
        }
    }

    /// Refreshes the announced fields, keeping any live connection.
    pub fn update(&mut self, info: &PlayerInfo) {
        self.name.clone_from(&info.player_name);
        self.join_counter = info.join_counter;
        self.external_addr = info.external_addr;
        self.internal_addr = info.internal_addr;
    }

    /// Whether a live direct connection to this player is bound.
    pub fn is_connected(&self) -> bool {
        self.conn.as_ref().map_or(false, |c| !c.is_closed())
    }

    pub fn connection(&self) -> Option<&Arc<Connection>> {
        self.conn.as_ref()
    }

    /// Addresses to dial, internal first.
    pub fn dial_addrs(&self) -> impl Iterator<Item = SocketAddrV4> {
        [self.internal_addr, self.external_addr].into_iter().flatten()
    }

    /// Records the remote mask carried by a ping and builds the mandatory
    /// echo reply.
    pub fn on_ping(&mut self, ping: &PeerPing) -> Packet {
        self.peer_mask = ping.peer_mask;
        Packet::PeerPong(PeerPong {
            payload: ping.payload,
        })
    }

    /// Updates the round trip from a pong received at `now_ms`.
    pub fn on_pong(&mut self, pong: &PeerPong, now_ms: u32) -> u32 {
        self.rtt_ms = rtt_ms(now_ms, pong.payload);
        self.rtt_ms
    }

    pub fn info(&self) -> PeerInfo {
        PeerInfo {
            id: self.id,
            name: self.name.clone(),
            connected: self.is_connected(),
            rtt_ms: self.rtt_ms,
            peer_mask: self.peer_mask,
        }
    }
}

/// Round trip from an echoed ping payload, which carries the send time.
pub fn rtt_ms(now_ms: u32, payload: u32) -> u32 {
    now_ms.wrapping_sub(payload)
}

/// Milliseconds since `start`, as carried in ping payloads.
pub fn elapsed_ms(start: Instant) -> u32 {
    start.elapsed().as_millis() as u32
}

/// Snapshot of a peer for callers outside the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: u8,
    pub name: String,
    pub connected: bool,
    pub rtt_ms: u32,
    pub peer_mask: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(id: u8) -> PlayerInfo {
        PlayerInfo {
            join_counter: 1,
            player_id: id,
            player_name: format!("player{}", id),
            external_addr: Some("1.2.3.4:6112".parse().unwrap()),
            internal_addr: Some("192.168.0.4:6112".parse().unwrap()),
        }
    }

    #[test]
    fn test_ping_is_echoed() {
        let mut peer = Peer::new(&player(2));
        let ping = PeerPing {
            payload: 100,
            peer_mask: 0b11,
            game_ticks: 0,
        };

        let reply = peer.on_ping(&ping);

        assert_eq!(reply, Packet::PeerPong(PeerPong { payload: 100 }));
        assert_eq!(peer.peer_mask, 0b11);
    }

    #[test]
    fn test_rtt_from_echoed_payload() {
        let mut peer = Peer::new(&player(2));

        let rtt = peer.on_pong(&PeerPong { payload: 100 }, 300);

        assert_eq!(rtt, 200);
        assert_eq!(peer.info().rtt_ms, 200);
    }

    #[test]
    fn test_rtt_survives_elapsed_wraparound() {
        assert_eq!(rtt_ms(5, u32::MAX - 4), 10);
    }

    #[test]
    fn test_dial_order_prefers_internal() {
        let peer = Peer::new(&player(3));
        let addrs: Vec<_> = peer.dial_addrs().collect();

        assert_eq!(
            addrs,
            vec![
                "192.168.0.4:6112".parse().unwrap(),
                "1.2.3.4:6112".parse().unwrap()
            ]
        );
    }

    #[test]
    fn test_new_peer_is_disconnected() {
        let peer = Peer::new(&player(4));
        let info = peer.info();

        assert!(!info.connected);
        assert_eq!(info.name, "player4");
        assert_eq!(info.rtt_ms, 0);
    }
}
