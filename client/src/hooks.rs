//! Interception points for code layered on top of a session.

use protocol::Packet;

/// Callbacks invoked by a running session.
///
/// Every method has a no-op default. Returning `true` from a packet hook marks
/// the packet as handled and skips the session's own handling of it.
pub trait SessionHooks: Send + Sync {
    /// Packet received from the host.
    fn on_packet(&self, _packet: &Packet) -> bool {
        false
    }

    /// Packet received from a connected peer.
    fn on_peer_packet(&self, _player_id: u8, _packet: &Packet) -> bool {
        false
    }

    fn on_peer_connected(&self, _player_id: u8) {}

    fn on_peer_disconnected(&self, _player_id: u8) {}
}

/// Hooks that never intercept anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl SessionHooks for NoHooks {}
