//! Payload layouts of every packet type.
//!
//! Each struct describes the bytes that follow the frame header. Decoding
//! writes into an existing value so that pooled packets keep their
//! allocations between frames (see [`crate::PacketBuffer`]).

use crate::buffer::{count_u8, cstring_size, ReadExt, WriteExt, SOCKADDR_SIZE};
use crate::types::{
    GameVersion, LagPlayer, LeaveReason, Message, PlayerAction, RejectReason, SlotInfo,
};
use crate::{ProtocolError, Result};
use bytes::BufMut;
use std::net::SocketAddrV4;

/// Encoding and in-place decoding of a packet payload.
pub trait Payload: Default {
    /// Encoded payload size in bytes, not counting the frame header.
    fn size(&self) -> usize;

    fn write(&self, buf: &mut Vec<u8>) -> Result<()>;

    /// Overwrites every field of `self` from the front of `buf`.
    fn read(&mut self, buf: &mut &[u8]) -> Result<()>;
}

macro_rules! empty_payloads {
    ($($(#[$meta:meta])* $name:ident,)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
            pub struct $name;

            impl Payload for $name {
                fn size(&self) -> usize {
                    0
                }

                fn write(&self, _buf: &mut Vec<u8>) -> Result<()> {
                    Ok(())
                }

                fn read(&mut self, _buf: &mut &[u8]) -> Result<()> {
                    Ok(())
                }
            }
        )*
    };
}

empty_payloads! {
    /// Host announces the lobby countdown.
    CountDownStart,
    /// Host ends the countdown; clients answer with [`GameLoaded`].
    CountDownEnd,
    LeaveAck,
    /// Client finished loading the map.
    GameLoaded,
    DropLaggers,
    MapPartError,
}

/// Keepalive carrying an opaque payload that the receiver echoes back.
///
/// Used for host pings, host pongs and peer pongs alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ping {
    pub payload: u32,
}

pub type Pong = Ping;
pub type PeerPong = Ping;

impl Payload for Ping {
    fn size(&self) -> usize {
        4
    }

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.put_u32_le(self.payload);
        Ok(())
    }

    fn read(&mut self, buf: &mut &[u8]) -> Result<()> {
        self.payload = buf.read_u32()?;
        Ok(())
    }
}

/// Successful join reply: the slot table and the player id assigned to us.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SlotInfoJoin {
    pub slot_info: SlotInfo,
    pub player_id: u8,
    pub external_addr: Option<SocketAddrV4>,
}

impl Payload for SlotInfoJoin {
    fn size(&self) -> usize {
        self.slot_info.size() + 1 + SOCKADDR_SIZE
    }

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        self.slot_info.write(buf)?;
        buf.put_u8(self.player_id);
        buf.put_sockaddr(&self.external_addr);
        Ok(())
    }

    fn read(&mut self, buf: &mut &[u8]) -> Result<()> {
        self.slot_info.read_into(buf)?;
        self.player_id = buf.read_u8()?;
        self.external_addr = buf.read_sockaddr()?;
        Ok(())
    }
}

impl Payload for SlotInfo {
    fn size(&self) -> usize {
        SlotInfo::size(self)
    }

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        SlotInfo::write(self, buf)
    }

    fn read(&mut self, buf: &mut &[u8]) -> Result<()> {
        self.read_into(buf)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RejectJoin {
    pub reason: RejectReason,
}

impl Payload for RejectJoin {
    fn size(&self) -> usize {
        4
    }

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.put_u32_le(self.reason.into());
        Ok(())
    }

    fn read(&mut self, buf: &mut &[u8]) -> Result<()> {
        self.reason = buf.read_u32()?.into();
        Ok(())
    }
}

/// Host announcement of another lobby participant.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlayerInfo {
    pub join_counter: u32,
    pub player_id: u8,
    pub player_name: String,
    pub external_addr: Option<SocketAddrV4>,
    pub internal_addr: Option<SocketAddrV4>,
}

impl Payload for PlayerInfo {
    fn size(&self) -> usize {
        4 + 1 + cstring_size(&self.player_name) + 2 + 2 * SOCKADDR_SIZE
    }

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.put_u32_le(self.join_counter);
        buf.put_u8(self.player_id);
        buf.put_cstring(&self.player_name)?;
        buf.put_u16_le(1);
        buf.put_sockaddr(&self.external_addr);
        buf.put_sockaddr(&self.internal_addr);
        Ok(())
    }

    fn read(&mut self, buf: &mut &[u8]) -> Result<()> {
        self.join_counter = buf.read_u32()?;
        self.player_id = buf.read_u8()?;
        buf.read_cstring_into(&mut self.player_name)?;
        buf.skip(2)?;
        self.external_addr = buf.read_sockaddr()?;
        self.internal_addr = buf.read_sockaddr()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlayerLeft {
    pub player_id: u8,
    pub reason: LeaveReason,
}

impl Payload for PlayerLeft {
    fn size(&self) -> usize {
        5
    }

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.put_u8(self.player_id);
        buf.put_u32_le(self.reason.into());
        Ok(())
    }

    fn read(&mut self, buf: &mut &[u8]) -> Result<()> {
        self.player_id = buf.read_u8()?;
        self.reason = buf.read_u32()?.into();
        Ok(())
    }
}

macro_rules! player_id_payloads {
    ($($(#[$meta:meta])* $name:ident,)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
            pub struct $name {
                pub player_id: u8,
            }

            impl Payload for $name {
                fn size(&self) -> usize {
                    1
                }

                fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
                    buf.put_u8(self.player_id);
                    Ok(())
                }

                fn read(&mut self, buf: &mut &[u8]) -> Result<()> {
                    self.player_id = buf.read_u8()?;
                    Ok(())
                }
            }
        )*
    };
}

player_id_payloads! {
    PlayerLoaded,
    GameOver,
}

/// One simulation step from the host, optionally carrying player actions.
///
/// When actions are present they are preceded by the low 16 bits of a
/// CRC-32 over the action bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TimeSlot {
    pub time_increment_ms: u16,
    pub actions: Vec<PlayerAction>,
}

impl Payload for TimeSlot {
    fn size(&self) -> usize {
        if self.actions.is_empty() {
            return 2;
        }
        2 + 2 + self.actions.iter().map(PlayerAction::size).sum::<usize>()
    }

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.put_u16_le(self.time_increment_ms);
        if self.actions.is_empty() {
            return Ok(());
        }

        let crc_pos = buf.len();
        buf.put_u16_le(0);
        let start = buf.len();
        for action in &self.actions {
            action.write(buf)?;
        }
        let crc = crc32fast::hash(&buf[start..]) as u16;
        buf[crc_pos..crc_pos + 2].copy_from_slice(&crc.to_le_bytes());
        Ok(())
    }

    fn read(&mut self, buf: &mut &[u8]) -> Result<()> {
        self.time_increment_ms = buf.read_u16()?;
        if buf.is_empty() {
            self.actions.clear();
            return Ok(());
        }

        let crc = buf.read_u16()?;
        let data = std::mem::take(buf);
        if crc32fast::hash(data) as u16 != crc {
            return Err(ProtocolError::InvalidChecksum);
        }
        PlayerAction::read_all(&mut self.actions, data)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Desync {
    pub unknown: u32,
    pub checksum: u32,
    pub player_ids: Vec<u8>,
}

impl Payload for Desync {
    fn size(&self) -> usize {
        4 + 4 + 1 + self.player_ids.len()
    }

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.put_u32_le(self.unknown);
        buf.put_u32_le(self.checksum);
        buf.put_u8(count_u8(self.player_ids.len())?);
        buf.put_slice(&self.player_ids);
        Ok(())
    }

    fn read(&mut self, buf: &mut &[u8]) -> Result<()> {
        self.unknown = buf.read_u32()?;
        self.checksum = buf.read_u32()?;
        let count = buf.read_u8()? as usize;
        buf.read_bytes_into(count, &mut self.player_ids)
    }
}

impl Payload for Message {
    fn size(&self) -> usize {
        Message::size(self)
    }

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        Message::write(self, buf)
    }

    fn read(&mut self, buf: &mut &[u8]) -> Result<()> {
        self.read_into(buf)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StartLag {
    pub players: Vec<LagPlayer>,
}

impl Payload for StartLag {
    fn size(&self) -> usize {
        1 + self.players.len() * LagPlayer::SIZE
    }

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.put_u8(count_u8(self.players.len())?);
        for player in &self.players {
            player.write(buf);
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut &[u8]) -> Result<()> {
        LagPlayer::read_list(&mut self.players, buf)
    }
}

pub type StopLag = LagPlayer;

impl Payload for LagPlayer {
    fn size(&self) -> usize {
        LagPlayer::SIZE
    }

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        LagPlayer::write(self, buf);
        Ok(())
    }

    fn read(&mut self, buf: &mut &[u8]) -> Result<()> {
        self.read_into(buf)
    }
}

macro_rules! reason_payloads {
    ($($(#[$meta:meta])* $name:ident,)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
            pub struct $name {
                pub reason: LeaveReason,
            }

            impl Payload for $name {
                fn size(&self) -> usize {
                    4
                }

                fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
                    buf.put_u32_le(self.reason.into());
                    Ok(())
                }

                fn read(&mut self, buf: &mut &[u8]) -> Result<()> {
                    self.reason = buf.read_u32()?.into();
                    Ok(())
                }
            }
        )*
    };
}

reason_payloads! {
    PlayerKicked,
    /// Client request to leave the lobby or game.
    Leave,
}

/// Join request sent to the host as the first packet of a connection.
///
/// `listen_port` is little-endian, unlike the port inside `internal_addr`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Join {
    pub host_counter: u32,
    pub entry_key: u32,
    pub listen_port: u16,
    pub join_counter: u32,
    pub player_name: String,
    pub internal_addr: Option<SocketAddrV4>,
}

impl Payload for Join {
    fn size(&self) -> usize {
        4 + 4 + 1 + 2 + 4 + cstring_size(&self.player_name) + 2 + SOCKADDR_SIZE
    }

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.put_u32_le(self.host_counter);
        buf.put_u32_le(self.entry_key);
        buf.put_u8(0);
        buf.put_u16_le(self.listen_port);
        buf.put_u32_le(self.join_counter);
        buf.put_cstring(&self.player_name)?;
        buf.put_u16_le(1);
        buf.put_sockaddr(&self.internal_addr);
        Ok(())
    }

    fn read(&mut self, buf: &mut &[u8]) -> Result<()> {
        self.host_counter = buf.read_u32()?;
        self.entry_key = buf.read_u32()?;
        buf.skip(1)?;
        self.listen_port = buf.read_u16()?;
        self.join_counter = buf.read_u32()?;
        buf.read_cstring_into(&mut self.player_name)?;
        buf.skip(2)?;
        self.internal_addr = buf.read_sockaddr()?;
        Ok(())
    }
}

/// Client simulation actions, guarded by a CRC-32 of the data.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GameAction {
    pub data: Vec<u8>,
}

impl Payload for GameAction {
    fn size(&self) -> usize {
        4 + self.data.len()
    }

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.put_u32_le(crc32fast::hash(&self.data));
        buf.put_slice(&self.data);
        Ok(())
    }

    fn read(&mut self, buf: &mut &[u8]) -> Result<()> {
        let crc = buf.read_u32()?;
        let len = buf.len();
        buf.read_bytes_into(len, &mut self.data)?;
        if crc32fast::hash(&self.data) != crc {
            return Err(ProtocolError::InvalidChecksum);
        }
        Ok(())
    }
}

/// Acknowledgement of a time slot with the client's simulation checksum.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TimeSlotAck {
    pub checksum: Vec<u8>,
}

impl Payload for TimeSlotAck {
    fn size(&self) -> usize {
        1 + self.checksum.len()
    }

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.put_u8(count_u8(self.checksum.len())?);
        buf.put_slice(&self.checksum);
        Ok(())
    }

    fn read(&mut self, buf: &mut &[u8]) -> Result<()> {
        let len = buf.read_u8()? as usize;
        buf.read_bytes_into(len, &mut self.checksum)
    }
}

/// LAN query for hosted games of a given version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SearchGame {
    pub game_version: GameVersion,
    pub host_counter: u32,
}

impl Payload for SearchGame {
    fn size(&self) -> usize {
        GameVersion::SIZE + 4
    }

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        self.game_version.write(buf);
        buf.put_u32_le(self.host_counter);
        Ok(())
    }

    fn read(&mut self, buf: &mut &[u8]) -> Result<()> {
        self.game_version = GameVersion::read(buf)?;
        self.host_counter = buf.read_u32()?;
        Ok(())
    }
}

pub type CreateGame = SearchGame;

/// LAN advertisement of a hosted game.
///
/// `stat_string` is the encoded game settings blob, kept opaque here.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GameInfo {
    pub game_version: GameVersion,
    pub host_counter: u32,
    pub entry_key: u32,
    pub game_name: String,
    pub stat_string: Vec<u8>,
    pub slots_total: u32,
    pub game_flags: u32,
    pub slots_used: u32,
    pub slots_available: u32,
    pub uptime_sec: u32,
    pub game_port: u16,
}

impl Payload for GameInfo {
    fn size(&self) -> usize {
        GameVersion::SIZE
            + 4
            + 4
            + cstring_size(&self.game_name)
            + 1
            + self.stat_string.len()
            + 1
            + 5 * 4
            + 2
    }

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        self.game_version.write(buf);
        buf.put_u32_le(self.host_counter);
        buf.put_u32_le(self.entry_key);
        buf.put_cstring(&self.game_name)?;
        buf.put_u8(0);
        buf.put_cbytes(&self.stat_string)?;
        buf.put_u32_le(self.slots_total);
        buf.put_u32_le(self.game_flags);
        buf.put_u32_le(self.slots_used);
        buf.put_u32_le(self.slots_available);
        buf.put_u32_le(self.uptime_sec);
        buf.put_u16_le(self.game_port);
        Ok(())
    }

    fn read(&mut self, buf: &mut &[u8]) -> Result<()> {
        self.game_version = GameVersion::read(buf)?;
        self.host_counter = buf.read_u32()?;
        self.entry_key = buf.read_u32()?;
        buf.read_cstring_into(&mut self.game_name)?;
        buf.skip(1)?;
        buf.read_cbytes_into(&mut self.stat_string)?;
        self.slots_total = buf.read_u32()?;
        self.game_flags = buf.read_u32()?;
        self.slots_used = buf.read_u32()?;
        self.slots_available = buf.read_u32()?;
        self.uptime_sec = buf.read_u32()?;
        self.game_port = buf.read_u16()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RefreshGame {
    pub host_counter: u32,
    pub players_in_game: u32,
    pub game_slots: u32,
}

impl Payload for RefreshGame {
    fn size(&self) -> usize {
        12
    }

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.put_u32_le(self.host_counter);
        buf.put_u32_le(self.players_in_game);
        buf.put_u32_le(self.game_slots);
        Ok(())
    }

    fn read(&mut self, buf: &mut &[u8]) -> Result<()> {
        self.host_counter = buf.read_u32()?;
        self.players_in_game = buf.read_u32()?;
        self.game_slots = buf.read_u32()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecreateGame {
    pub host_counter: u32,
}

impl Payload for DecreateGame {
    fn size(&self) -> usize {
        4
    }

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.put_u32_le(self.host_counter);
        Ok(())
    }

    fn read(&mut self, buf: &mut &[u8]) -> Result<()> {
        self.host_counter = buf.read_u32()?;
        Ok(())
    }
}

/// Peer keepalive: an echo payload plus the sender's view of the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PeerPing {
    pub payload: u32,
    pub peer_mask: u32,
    pub game_ticks: u32,
}

impl Payload for PeerPing {
    fn size(&self) -> usize {
        12
    }

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.put_u32_le(self.payload);
        buf.put_u32_le(self.peer_mask);
        buf.put_u32_le(self.game_ticks);
        Ok(())
    }

    fn read(&mut self, buf: &mut &[u8]) -> Result<()> {
        self.payload = buf.read_u32()?;
        self.peer_mask = buf.read_u32()?;
        self.game_ticks = buf.read_u32()?;
        Ok(())
    }
}

/// First packet on every direct peer connection, in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PeerConnect {
    pub join_counter: u32,
    pub entry_key: u32,
    pub player_id: u8,
    pub peer_mask: u32,
}

impl Payload for PeerConnect {
    fn size(&self) -> usize {
        4 + 4 + 1 + 1 + 4
    }

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.put_u32_le(self.join_counter);
        buf.put_u32_le(self.entry_key);
        buf.put_u8(0);
        buf.put_u8(self.player_id);
        buf.put_u32_le(self.peer_mask);
        Ok(())
    }

    fn read(&mut self, buf: &mut &[u8]) -> Result<()> {
        self.join_counter = buf.read_u32()?;
        self.entry_key = buf.read_u32()?;
        buf.skip(1)?;
        self.player_id = buf.read_u8()?;
        self.peer_mask = buf.read_u32()?;
        Ok(())
    }
}

/// Connectivity bitmask broadcast: bit `id - 1` is set for every player the
/// sender holds a live direct connection to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PeerMask {
    pub peer_mask: u32,
}

impl Payload for PeerMask {
    fn size(&self) -> usize {
        4
    }

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.put_u32_le(self.peer_mask);
        Ok(())
    }

    fn read(&mut self, buf: &mut &[u8]) -> Result<()> {
        self.peer_mask = buf.read_u32()?;
        Ok(())
    }
}

/// Host request to verify the local copy of the map.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MapCheck {
    pub file_path: String,
    pub file_size: u32,
    pub file_crc: u32,
    pub file_xoro: u32,
    pub file_sha1: [u8; 20],
}

impl Payload for MapCheck {
    fn size(&self) -> usize {
        4 + cstring_size(&self.file_path) + 4 + 4 + 4 + 20
    }

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.put_u32_le(1);
        buf.put_cstring(&self.file_path)?;
        buf.put_u32_le(self.file_size);
        buf.put_u32_le(self.file_crc);
        buf.put_u32_le(self.file_xoro);
        buf.put_slice(&self.file_sha1);
        Ok(())
    }

    fn read(&mut self, buf: &mut &[u8]) -> Result<()> {
        buf.skip(4)?;
        buf.read_cstring_into(&mut self.file_path)?;
        self.file_size = buf.read_u32()?;
        self.file_crc = buf.read_u32()?;
        self.file_xoro = buf.read_u32()?;
        self.file_sha1 = buf.read_array()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StartDownload {
    pub player_id: u8,
}

impl Payload for StartDownload {
    fn size(&self) -> usize {
        5
    }

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.put_u32_le(1);
        buf.put_u8(self.player_id);
        Ok(())
    }

    fn read(&mut self, buf: &mut &[u8]) -> Result<()> {
        buf.skip(4)?;
        self.player_id = buf.read_u8()?;
        Ok(())
    }
}

const MAP_READY: u8 = 1;
const MAP_NOT_READY: u8 = 3;

/// Client's answer to [`MapCheck`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MapState {
    pub ready: bool,
    pub file_size: u32,
}

impl Payload for MapState {
    fn size(&self) -> usize {
        4 + 1 + 4
    }

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.put_u32_le(1);
        buf.put_u8(if self.ready { MAP_READY } else { MAP_NOT_READY });
        buf.put_u32_le(self.file_size);
        Ok(())
    }

    fn read(&mut self, buf: &mut &[u8]) -> Result<()> {
        buf.skip(4)?;
        self.ready = match buf.read_u8()? {
            MAP_READY => true,
            MAP_NOT_READY => false,
            _ => return Err(ProtocolError::MalformedData),
        };
        self.file_size = buf.read_u32()?;
        Ok(())
    }
}

/// Chunk of a map download, guarded by a CRC-32 of the chunk.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MapPart {
    pub recipient_id: u8,
    pub sender_id: u8,
    pub chunk_pos: u32,
    pub data: Vec<u8>,
}

impl Payload for MapPart {
    fn size(&self) -> usize {
        1 + 1 + 4 + 4 + 4 + self.data.len()
    }

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.put_u8(self.recipient_id);
        buf.put_u8(self.sender_id);
        buf.put_u32_le(1);
        buf.put_u32_le(self.chunk_pos);
        buf.put_u32_le(crc32fast::hash(&self.data));
        buf.put_slice(&self.data);
        Ok(())
    }

    fn read(&mut self, buf: &mut &[u8]) -> Result<()> {
        self.recipient_id = buf.read_u8()?;
        self.sender_id = buf.read_u8()?;
        buf.skip(4)?;
        self.chunk_pos = buf.read_u32()?;
        let crc = buf.read_u32()?;
        let len = buf.len();
        buf.read_bytes_into(len, &mut self.data)?;
        if crc32fast::hash(&self.data) != crc {
            return Err(ProtocolError::InvalidChecksum);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MapPartOk {
    pub recipient_id: u8,
    pub sender_id: u8,
    pub chunk_pos: u32,
}

impl Payload for MapPartOk {
    fn size(&self) -> usize {
        1 + 1 + 4 + 4
    }

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.put_u8(self.recipient_id);
        buf.put_u8(self.sender_id);
        buf.put_u32_le(1);
        buf.put_u32_le(self.chunk_pos);
        Ok(())
    }

    fn read(&mut self, buf: &mut &[u8]) -> Result<()> {
        self.recipient_id = buf.read_u8()?;
        self.sender_id = buf.read_u8()?;
        buf.skip(4)?;
        self.chunk_pos = buf.read_u32()?;
        Ok(())
    }
}

/// Packet with an id this crate does not understand; the payload is kept
/// verbatim so it can be inspected or forwarded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnknownPacket {
    pub id: u8,
    pub data: Vec<u8>,
}

impl Payload for UnknownPacket {
    fn size(&self) -> usize {
        self.data.len()
    }

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.put_slice(&self.data);
        Ok(())
    }

    fn read(&mut self, buf: &mut &[u8]) -> Result<()> {
        let len = buf.len();
        buf.read_bytes_into(len, &mut self.data)
    }
}
