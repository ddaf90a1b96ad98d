//! Sub-structures shared by several packet types.

use crate::buffer::{count_u16, count_u8, cstring_size, read_vec_into, take, ReadExt, WriteExt};
use crate::{ProtocolError, Result};
use bytes::BufMut;
use std::fmt;

/// Product tag and patch version used by LAN discovery packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GameVersion {
    pub product: [u8; 4],
    pub version: u32,
}

impl GameVersion {
    pub const SIZE: usize = 8;

    pub fn new(product: [u8; 4], version: u32) -> Self {
        Self { product, version }
    }

    pub(crate) fn write(&self, buf: &mut Vec<u8>) {
        buf.put_slice(&self.product);
        buf.put_u32_le(self.version);
    }

    pub(crate) fn read(buf: &mut &[u8]) -> Result<Self> {
        Ok(Self {
            product: buf.read_array()?,
            version: buf.read_u32()?,
        })
    }
}

/// State of a single lobby slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotData {
    pub player_id: u8,
    pub download_status: u8,
    pub slot_status: u8,
    pub computer: bool,
    pub team: u8,
    pub color: u8,
    pub race: u8,
    pub computer_type: u8,
    pub handicap: u8,
}

impl SlotData {
    pub const SIZE: usize = 9;

    fn write(&self, buf: &mut Vec<u8>) {
        buf.put_u8(self.player_id);
        buf.put_u8(self.download_status);
        buf.put_u8(self.slot_status);
        buf.put_bool(self.computer);
        buf.put_u8(self.team);
        buf.put_u8(self.color);
        buf.put_u8(self.race);
        buf.put_u8(self.computer_type);
        buf.put_u8(self.handicap);
    }

    fn read(buf: &mut &[u8]) -> Result<Self> {
        Ok(Self {
            player_id: buf.read_u8()?,
            download_status: buf.read_u8()?,
            slot_status: buf.read_u8()?,
            computer: buf.read_bool()?,
            team: buf.read_u8()?,
            color: buf.read_u8()?,
            race: buf.read_u8()?,
            computer_type: buf.read_u8()?,
            handicap: buf.read_u8()?,
        })
    }
}

/// Full slot table of the lobby, prefixed on the wire with its own byte size.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SlotInfo {
    pub slots: Vec<SlotData>,
    pub random_seed: u32,
    pub slot_layout: u8,
    pub num_players: u8,
}

impl SlotInfo {
    fn block_size(&self) -> usize {
        1 + self.slots.len() * SlotData::SIZE + 4 + 1 + 1
    }

    /// Encoded size including the `u16` block length prefix.
    pub(crate) fn size(&self) -> usize {
        2 + self.block_size()
    }

    pub(crate) fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.put_u16_le(count_u16(self.block_size())?);
        buf.put_u8(count_u8(self.slots.len())?);
        for slot in &self.slots {
            slot.write(buf);
        }
        buf.put_u32_le(self.random_seed);
        buf.put_u8(self.slot_layout);
        buf.put_u8(self.num_players);
        Ok(())
    }

    pub(crate) fn read_into(&mut self, buf: &mut &[u8]) -> Result<()> {
        let len = buf.read_u16()? as usize;
        let mut block = take(buf, len)?;

        let count = block.read_u8()? as usize;
        self.slots.clear();
        for _ in 0..count {
            self.slots.push(SlotData::read(&mut block)?);
        }
        self.random_seed = block.read_u32()?;
        self.slot_layout = block.read_u8()?;
        self.num_players = block.read_u8()?;

        if !block.is_empty() {
            return Err(ProtocolError::InvalidPacketSize);
        }
        Ok(())
    }
}

const MESSAGE_CHAT: u8 = 0x10;
const MESSAGE_TEAM_CHANGE: u8 = 0x11;
const MESSAGE_COLOR_CHANGE: u8 = 0x12;
const MESSAGE_RACE_CHANGE: u8 = 0x13;
const MESSAGE_HANDICAP_CHANGE: u8 = 0x14;
const MESSAGE_SCOPED_CHAT: u8 = 0x20;

/// Body of a chat or lobby-change message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    Chat(String),
    TeamChange(u8),
    ColorChange(u8),
    RaceChange(u8),
    HandicapChange(u8),
    /// In-game chat addressed to a scope (all, allies, observers, ...).
    ScopedChat { scope: u32, text: String },
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Chat(String::new())
    }
}

/// Chat or lobby-change message, used by the host relay, the host-bound
/// message and the peer-to-peer message packets alike.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    pub recipient_ids: Vec<u8>,
    pub sender_id: u8,
    pub content: MessageContent,
}

impl Message {
    pub fn chat(recipient_ids: Vec<u8>, sender_id: u8, text: impl Into<String>) -> Self {
        Self {
            recipient_ids,
            sender_id,
            content: MessageContent::Chat(text.into()),
        }
    }

    pub(crate) fn size(&self) -> usize {
        let content = match &self.content {
            MessageContent::Chat(text) => cstring_size(text),
            MessageContent::ScopedChat { text, .. } => 4 + cstring_size(text),
            _ => 1,
        };
        1 + self.recipient_ids.len() + 1 + 1 + content
    }

    pub(crate) fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.put_u8(count_u8(self.recipient_ids.len())?);
        buf.put_slice(&self.recipient_ids);
        buf.put_u8(self.sender_id);
        match &self.content {
            MessageContent::Chat(text) => {
                buf.put_u8(MESSAGE_CHAT);
                buf.put_cstring(text)?;
            }
            MessageContent::TeamChange(v) => {
                buf.put_u8(MESSAGE_TEAM_CHANGE);
                buf.put_u8(*v);
            }
            MessageContent::ColorChange(v) => {
                buf.put_u8(MESSAGE_COLOR_CHANGE);
                buf.put_u8(*v);
            }
            MessageContent::RaceChange(v) => {
                buf.put_u8(MESSAGE_RACE_CHANGE);
                buf.put_u8(*v);
            }
            MessageContent::HandicapChange(v) => {
                buf.put_u8(MESSAGE_HANDICAP_CHANGE);
                buf.put_u8(*v);
            }
            MessageContent::ScopedChat { scope, text } => {
                buf.put_u8(MESSAGE_SCOPED_CHAT);
                buf.put_u32_le(*scope);
                buf.put_cstring(text)?;
            }
        }
        Ok(())
    }

    pub(crate) fn read_into(&mut self, buf: &mut &[u8]) -> Result<()> {
        let count = buf.read_u8()? as usize;
        buf.read_bytes_into(count, &mut self.recipient_ids)?;
        self.sender_id = buf.read_u8()?;

        match buf.read_u8()? {
            MESSAGE_CHAT => {
                if !matches!(self.content, MessageContent::Chat(_)) {
                    self.content = MessageContent::Chat(String::new());
                }
                if let MessageContent::Chat(text) = &mut self.content {
                    buf.read_cstring_into(text)?;
                }
            }
            MESSAGE_SCOPED_CHAT => {
                let scope = buf.read_u32()?;
                if !matches!(self.content, MessageContent::ScopedChat { .. }) {
                    self.content = MessageContent::ScopedChat {
                        scope,
                        text: String::new(),
                    };
                }
                if let MessageContent::ScopedChat { scope: s, text } = &mut self.content {
                    *s = scope;
                    buf.read_cstring_into(text)?;
                }
            }
            MESSAGE_TEAM_CHANGE => self.content = MessageContent::TeamChange(buf.read_u8()?),
            MESSAGE_COLOR_CHANGE => self.content = MessageContent::ColorChange(buf.read_u8()?),
            MESSAGE_RACE_CHANGE => self.content = MessageContent::RaceChange(buf.read_u8()?),
            MESSAGE_HANDICAP_CHANGE => {
                self.content = MessageContent::HandicapChange(buf.read_u8()?)
            }
            _ => return Err(ProtocolError::MalformedData),
        }
        Ok(())
    }
}

/// One player's batch of simulation actions inside a time slot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlayerAction {
    pub player_id: u8,
    pub data: Vec<u8>,
}

impl PlayerAction {
    pub(crate) fn size(&self) -> usize {
        1 + 2 + self.data.len()
    }

    pub(crate) fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.put_u8(self.player_id);
        buf.put_u16_le(count_u16(self.data.len())?);
        buf.put_slice(&self.data);
        Ok(())
    }

    pub(crate) fn read_into(&mut self, buf: &mut &[u8]) -> Result<()> {
        self.player_id = buf.read_u8()?;
        let len = buf.read_u16()? as usize;
        buf.read_bytes_into(len, &mut self.data)
    }

    /// Decodes actions until the cursor is exhausted.
    pub(crate) fn read_all(actions: &mut Vec<PlayerAction>, mut buf: &[u8]) -> Result<()> {
        let mut n = 0;
        while !buf.is_empty() {
            if actions.len() == n {
                actions.push(PlayerAction::default());
            }
            actions[n].read_into(&mut buf)?;
            n += 1;
        }
        actions.truncate(n);
        Ok(())
    }
}

/// A lagging player and how long they have been lagging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LagPlayer {
    pub player_id: u8,
    pub lag_duration_ms: u32,
}

impl LagPlayer {
    pub const SIZE: usize = 5;

    pub(crate) fn write(&self, buf: &mut Vec<u8>) {
        buf.put_u8(self.player_id);
        buf.put_u32_le(self.lag_duration_ms);
    }

    pub(crate) fn read_into(&mut self, buf: &mut &[u8]) -> Result<()> {
        self.player_id = buf.read_u8()?;
        self.lag_duration_ms = buf.read_u32()?;
        Ok(())
    }

    pub(crate) fn read_list(players: &mut Vec<LagPlayer>, buf: &mut &[u8]) -> Result<()> {
        let count = buf.read_u8()? as usize;
        read_vec_into(players, count, |p| p.read_into(buf))
    }
}

/// Reason code carried by a join rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    Invalid,
    GameFull,
    GameStarted,
    WrongPassword,
    Other(u32),
}

impl Default for RejectReason {
    fn default() -> Self {
        RejectReason::Invalid
    }
}

impl From<u32> for RejectReason {
    fn from(value: u32) -> Self {
        match value {
            0x07 => RejectReason::Invalid,
            0x09 => RejectReason::GameFull,
            0x0A => RejectReason::GameStarted,
            0x1B => RejectReason::WrongPassword,
            other => RejectReason::Other(other),
        }
    }
}

impl From<RejectReason> for u32 {
    fn from(value: RejectReason) -> Self {
        match value {
            RejectReason::Invalid => 0x07,
            RejectReason::GameFull => 0x09,
            RejectReason::GameStarted => 0x0A,
            RejectReason::WrongPassword => 0x1B,
            RejectReason::Other(other) => other,
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Invalid => write!(f, "invalid join request"),
            RejectReason::GameFull => write!(f, "game full"),
            RejectReason::GameStarted => write!(f, "game already started"),
            RejectReason::WrongPassword => write!(f, "wrong entry key"),
            RejectReason::Other(code) => write!(f, "unknown reason {:#x}", code),
        }
    }
}

/// Reason code carried by leave, player-left and kick packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeaveReason {
    Disconnect,
    Lost,
    LostBuildings,
    Won,
    Draw,
    Observer,
    Lobby,
    Other(u32),
}

impl Default for LeaveReason {
    fn default() -> Self {
        LeaveReason::Lobby
    }
}

impl From<u32> for LeaveReason {
    fn from(value: u32) -> Self {
        match value {
            0x01 => LeaveReason::Disconnect,
            0x07 => LeaveReason::Lost,
            0x08 => LeaveReason::LostBuildings,
            0x09 => LeaveReason::Won,
            0x0A => LeaveReason::Draw,
            0x0B => LeaveReason::Observer,
            0x0D => LeaveReason::Lobby,
            other => LeaveReason::Other(other),
        }
    }
}

impl From<LeaveReason> for u32 {
    fn from(value: LeaveReason) -> Self {
        match value {
            LeaveReason::Disconnect => 0x01,
            LeaveReason::Lost => 0x07,
            LeaveReason::LostBuildings => 0x08,
            LeaveReason::Won => 0x09,
            LeaveReason::Draw => 0x0A,
            LeaveReason::Observer => 0x0B,
            LeaveReason::Lobby => 0x0D,
            LeaveReason::Other(other) => other,
        }
    }
}
