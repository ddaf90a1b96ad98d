//! Peer set and connectivity mask of the direct connection mesh
//!
//! This module owns the bookkeeping side of the peer mesh:
//! - Player records announced by the host, keyed by player id
//! - The connectivity mask, bit `id - 1` set while a live connection to that
//!   player is bound
//! - Handshake validation, including the race between two connections for
//!   the same player
//!
//! The session keeps one [`PeerSet`] behind a single lock and performs every
//! mutation through it. No method here does I/O: connections that lose a race
//! or get removed are handed back to the caller, who closes them after
//! releasing the lock. Callers compare [`PeerSet::mask`] before and after a
//! mutation to decide whether a mask broadcast is due.

use crate::endpoint::Connection;
use crate::error::{Result, SessionError};
use crate::peer::{Peer, PeerInfo};
use log::info;
use protocol::{PeerConnect, PlayerInfo};
use std::collections::HashMap;
use std::sync::Arc;

/// Highest player id that fits the connectivity mask.
pub const MAX_PLAYER_ID: u8 = 32;

/// Which side opened a peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// We dialed the remote player.
    Dialed,
    /// The remote player dialed us.
    Accepted,
}

/// Bit of `player_id` in a connectivity mask.
pub fn mask_bit(player_id: u8) -> u32 {
    1u32 << (player_id - 1)
}

fn valid_id(player_id: u8) -> bool {
    (1..=MAX_PLAYER_ID).contains(&player_id)
}

/// Whether a new connection replaces a live one for the same player.
///
/// The connection dialed by the higher player id always survives. Both ends
/// apply the same rule, so they agree on the winner without talking.
pub fn new_connection_wins(local_id: u8, remote_id: u8, direction: Direction) -> bool {
    match direction {
        Direction::Accepted => remote_id > local_id,
        Direction::Dialed => local_id > remote_id,
    }
}

/// All known players of the lobby and our connectivity to them.
#[derive(Debug, Default)]
pub struct PeerSet {
    peers: HashMap<u8, Peer>,
    mask: u32,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a player announced by the host
    ///
    /// Returns true for a newly seen player. A repeated announcement refreshes
    /// the record but keeps its live connection. Ids outside the mask range
    /// are ignored.
    pub fn register(&mut self, info: &PlayerInfo) -> bool {
        if !valid_id(info.player_id) {
            return false;
        }

        match self.peers.get_mut(&info.player_id) {
            Some(peer) => {
                peer.update(info);
                false
            }
            None => {
                info!(
                    "Player {} ({}) joined the lobby",
                    info.player_id, info.player_name
                );
                self.peers.insert(info.player_id, Peer::new(info));
                true
            }
        }
    }

    /// Forgets a player for good, clearing its mask bit
    ///
    /// The removed record still carries its connection, which the caller
    /// must close.
    pub fn remove(&mut self, player_id: u8) -> Option<Peer> {
        let peer = self.peers.remove(&player_id)?;
        self.mask &= !mask_bit(player_id);
        Some(peer)
    }

    /// Runs the handshake checks without changing anything
    ///
    /// In order: the id must belong to an announced player, a race with a
    /// live connection must be won, the entry key must match and the join
    /// counter must match the announced one.
    pub fn check_handshake(
        &self,
        local_id: u8,
        handshake: &PeerConnect,
        conn: &Arc<Connection>,
        direction: Direction,
        entry_key: u32,
    ) -> Result<()> {
        let remote_id = handshake.player_id;
        let peer = self
            .peers
            .get(&remote_id)
            .filter(|_| valid_id(remote_id))
            .ok_or(SessionError::UnknownPeerId(remote_id))?;

        if let Some(current) = peer.conn.as_ref() {
            let live = !current.is_closed() && !Arc::ptr_eq(current, conn);
            if live && !new_connection_wins(local_id, remote_id, direction) {
                return Err(SessionError::AlreadyConnected);
            }
        }

        if handshake.entry_key != entry_key {
            return Err(SessionError::InvalidEntryKey);
        }
        if handshake.join_counter != peer.join_counter {
            return Err(SessionError::InvalidJoinCounter);
        }
        Ok(())
    }

    /// Validates a handshake and, if it passes, binds `conn` to the player
    ///
    /// Sets the player's mask bit and stores the mask it reported. Returns the
    /// connection that was displaced, if any; nothing is changed on error.
    pub fn accept_handshake(
        &mut self,
        local_id: u8,
        handshake: &PeerConnect,
        conn: &Arc<Connection>,
        direction: Direction,
        entry_key: u32,
    ) -> Result<Option<Arc<Connection>>> {
        self.check_handshake(local_id, handshake, conn, direction, entry_key)?;

        let remote_id = handshake.player_id;
        let peer = self
            .peers
            .get_mut(&remote_id)
            .ok_or(SessionError::UnknownPeerId(remote_id))?;

        let replaced = peer
            .conn
            .replace(Arc::clone(conn))
            .filter(|old| !Arc::ptr_eq(old, conn));
        peer.peer_mask = handshake.peer_mask;
        peer.rtt_ms = 0;
        self.mask |= mask_bit(remote_id);

        Ok(replaced)
    }

    /// Unbinds `conn` from a player after it failed or closed
    ///
    /// Does nothing when `conn` has already been replaced by a newer
    /// connection. Returns true if the connection was the current one.
    pub fn disconnect(&mut self, player_id: u8, conn: &Arc<Connection>) -> bool {
        let peer = match self.peers.get_mut(&player_id) {
            Some(peer) => peer,
            None => return false,
        };
        match peer.conn.as_ref() {
            Some(current) if Arc::ptr_eq(current, conn) => {}
            _ => return false,
        }

        peer.conn = None;
        peer.rtt_ms = 0;
        self.mask &= !mask_bit(player_id);
        true
    }

    /// Unbinds every connection for teardown, returning them with their ids.
    pub fn drain(&mut self) -> Vec<(u8, Arc<Connection>)> {
        self.mask = 0;
        self.peers
            .values_mut()
            .filter_map(|peer| {
                peer.rtt_ms = 0;
                peer.conn.take().map(|conn| (peer.id, conn))
            })
            .collect()
    }

    pub fn mask(&self) -> u32 {
        self.mask
    }

    pub fn get(&self, player_id: u8) -> Option<&Peer> {
        self.peers.get(&player_id)
    }

    pub fn get_mut(&mut self, player_id: u8) -> Option<&mut Peer> {
        self.peers.get_mut(&player_id)
    }

    /// Player ids of every known peer, ascending.
    pub fn ids(&self) -> Vec<u8> {
        let mut ids: Vec<u8> = self.peers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Live connections, for broadcasting.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.peers
            .values()
            .filter_map(|peer| peer.conn.clone())
            .filter(|conn| !conn.is_closed())
            .collect()
    }

    pub fn snapshot(&self) -> Vec<PeerInfo> {
        let mut infos: Vec<PeerInfo> = self.peers.values().map(Peer::info).collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
