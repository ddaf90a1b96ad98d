//! Framing layer and packet type registry.
//!
//! Every frame on the wire is laid out as:
//!
//! ```text
//! +-----------+---------+-------------------+-----------------+
//! | 0xF7 (u8) | id (u8) | length (u16, LE)  | payload ...     |
//! +-----------+---------+-------------------+-----------------+
//! ```
//!
//! `length` counts the 4 header bytes. Dispatch from `id` to a payload layout
//! is a static `match` generated from the table in [`packets!`].

use crate::packets::*;
use crate::types::{Message, SlotInfo};
use crate::{ProtocolError, Result};
use bytes::BufMut;
use std::collections::HashMap;
use std::io::Read;

/// First byte of every frame.
pub const SIGNATURE: u8 = 0xF7;

/// Size of the frame header in bytes.
pub const HEADER_SIZE: usize = 4;

/// Largest frame accepted on the receive path by default.
pub const MAX_PACKET_SIZE: usize = 8192;

/// Packet type ids.
pub mod pid {
    pub const PING: u8 = 0x01;
    pub const SLOT_INFO_JOIN: u8 = 0x04;
    pub const REJECT_JOIN: u8 = 0x05;
    pub const PLAYER_INFO: u8 = 0x06;
    pub const PLAYER_LEFT: u8 = 0x07;
    pub const PLAYER_LOADED: u8 = 0x08;
    pub const SLOT_INFO: u8 = 0x09;
    pub const COUNT_DOWN_START: u8 = 0x0A;
    pub const COUNT_DOWN_END: u8 = 0x0B;
    pub const TIME_SLOT: u8 = 0x0C;
    pub const DESYNC: u8 = 0x0D;
    pub const MESSAGE_RELAY: u8 = 0x0F;
    pub const START_LAG: u8 = 0x10;
    pub const STOP_LAG: u8 = 0x11;
    pub const GAME_OVER: u8 = 0x14;
    pub const LEAVE_ACK: u8 = 0x1B;
    pub const PLAYER_KICKED: u8 = 0x1C;
    pub const JOIN: u8 = 0x1E;
    pub const LEAVE: u8 = 0x21;
    pub const GAME_LOADED: u8 = 0x23;
    pub const GAME_ACTION: u8 = 0x26;
    pub const TIME_SLOT_ACK: u8 = 0x27;
    pub const MESSAGE: u8 = 0x28;
    pub const DROP_LAGGERS: u8 = 0x29;
    pub const SEARCH_GAME: u8 = 0x2F;
    pub const GAME_INFO: u8 = 0x30;
    pub const CREATE_GAME: u8 = 0x31;
    pub const REFRESH_GAME: u8 = 0x32;
    pub const DECREATE_GAME: u8 = 0x33;
    pub const PEER_MESSAGE: u8 = 0x34;
    pub const PEER_PING: u8 = 0x35;
    pub const PEER_PONG: u8 = 0x36;
    pub const PEER_CONNECT: u8 = 0x37;
    pub const PEER_MASK: u8 = 0x3B;
    pub const MAP_CHECK: u8 = 0x3D;
    pub const START_DOWNLOAD: u8 = 0x3F;
    pub const MAP_STATE: u8 = 0x42;
    pub const MAP_PART: u8 = 0x43;
    pub const MAP_PART_OK: u8 = 0x44;
    pub const MAP_PART_ERROR: u8 = 0x45;
    pub const PONG: u8 = 0x46;
    pub const TIME_SLOT_FRAGMENT: u8 = 0x48;
}

macro_rules! packets {
    ($($pid:ident => $variant:ident($ty:ty),)*) => {
        /// Every packet of the protocol, tagged by its wire id.
        ///
        /// Several variants share a payload type where the layout is identical
        /// (pings and pongs, the three chat packets, the time slot fragments).
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub enum Packet {
            $($variant($ty),)*
            /// Any id missing from the table above.
            Unknown(UnknownPacket),
        }

        impl Packet {
            /// Wire id of this packet.
            pub fn type_id(&self) -> u8 {
                match self {
                    $(Packet::$variant(_) => pid::$pid,)*
                    Packet::Unknown(p) => p.id,
                }
            }

            /// Variant name, for logging.
            pub fn name(&self) -> &'static str {
                match self {
                    $(Packet::$variant(_) => stringify!($variant),)*
                    Packet::Unknown(_) => "Unknown",
                }
            }

            /// Default-valued packet for a wire id, used as a decode target.
            fn empty(id: u8) -> Packet {
                match id {
                    $(pid::$pid => Packet::$variant(<$ty>::default()),)*
                    _ => Packet::Unknown(UnknownPacket { id, data: Vec::new() }),
                }
            }

            fn payload_size(&self) -> usize {
                match self {
                    $(Packet::$variant(p) => Payload::size(p),)*
                    Packet::Unknown(p) => p.size(),
                }
            }

            fn write_payload(&self, buf: &mut Vec<u8>) -> Result<()> {
                match self {
                    $(Packet::$variant(p) => Payload::write(p, buf),)*
                    Packet::Unknown(p) => p.write(buf),
                }
            }

            fn read_payload(&mut self, buf: &mut &[u8]) -> Result<()> {
                match self {
                    $(Packet::$variant(p) => Payload::read(p, buf),)*
                    Packet::Unknown(p) => p.read(buf),
                }
            }
        }
    };
}

packets! {
    PING => Ping(Ping),
    SLOT_INFO_JOIN => SlotInfoJoin(SlotInfoJoin),
    REJECT_JOIN => RejectJoin(RejectJoin),
    PLAYER_INFO => PlayerInfo(PlayerInfo),
    PLAYER_LEFT => PlayerLeft(PlayerLeft),
    PLAYER_LOADED => PlayerLoaded(PlayerLoaded),
    SLOT_INFO => SlotInfo(SlotInfo),
    COUNT_DOWN_START => CountDownStart(CountDownStart),
    COUNT_DOWN_END => CountDownEnd(CountDownEnd),
    TIME_SLOT => TimeSlot(TimeSlot),
    DESYNC => Desync(Desync),
    MESSAGE_RELAY => MessageRelay(Message),
    START_LAG => StartLag(StartLag),
    STOP_LAG => StopLag(StopLag),
    GAME_OVER => GameOver(GameOver),
    LEAVE_ACK => LeaveAck(LeaveAck),
    PLAYER_KICKED => PlayerKicked(PlayerKicked),
    JOIN => Join(Join),
    LEAVE => Leave(Leave),
    GAME_LOADED => GameLoaded(GameLoaded),
    GAME_ACTION => GameAction(GameAction),
    TIME_SLOT_ACK => TimeSlotAck(TimeSlotAck),
    MESSAGE => Message(Message),
    DROP_LAGGERS => DropLaggers(DropLaggers),
    SEARCH_GAME => SearchGame(SearchGame),
    GAME_INFO => GameInfo(GameInfo),
    CREATE_GAME => CreateGame(CreateGame),
    REFRESH_GAME => RefreshGame(RefreshGame),
    DECREATE_GAME => DecreateGame(DecreateGame),
    PEER_MESSAGE => PeerMessage(Message),
    PEER_PING => PeerPing(PeerPing),
    PEER_PONG => PeerPong(PeerPong),
    PEER_CONNECT => PeerConnect(PeerConnect),
    PEER_MASK => PeerMask(PeerMask),
    MAP_CHECK => MapCheck(MapCheck),
    START_DOWNLOAD => StartDownload(StartDownload),
    MAP_STATE => MapState(MapState),
    MAP_PART => MapPart(MapPart),
    MAP_PART_OK => MapPartOk(MapPartOk),
    MAP_PART_ERROR => MapPartError(MapPartError),
    PONG => Pong(Pong),
    TIME_SLOT_FRAGMENT => TimeSlotFragment(TimeSlot),
}

/// Parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub type_id: u8,
    /// Total frame size including the header.
    pub size: usize,
}

impl FrameHeader {
    /// Validates the first [`HEADER_SIZE`] bytes of `buf`.
    ///
    /// A missing signature (or fewer than 4 bytes) is `NoProtocolSignature`;
    /// a declared size outside `[HEADER_SIZE, capacity]` is `MalformedData`.
    pub fn parse(buf: &[u8], capacity: usize) -> Result<Self> {
        if buf.len() < HEADER_SIZE || buf[0] != SIGNATURE {
            return Err(ProtocolError::NoProtocolSignature);
        }

        let type_id = buf[1];
        let size = u16::from_le_bytes([buf[2], buf[3]]) as usize;
        if size < HEADER_SIZE || size > capacity {
            return Err(ProtocolError::MalformedData);
        }

        Ok(Self { type_id, size })
    }
}

/// Encodes `packet` into a new buffer whose capacity equals its length.
pub fn encode(packet: &Packet) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + packet.payload_size());
    encode_into(packet, &mut buf)?;
    Ok(buf)
}

/// Encodes `packet` into `buf`, replacing its contents and reusing its
/// allocation.
pub fn encode_into(packet: &Packet, buf: &mut Vec<u8>) -> Result<()> {
    let size = HEADER_SIZE + packet.payload_size();
    let wire_size = u16::try_from(size).map_err(|_| ProtocolError::WrongSize)?;

    buf.clear();
    buf.reserve(size);
    buf.put_u8(SIGNATURE);
    buf.put_u8(packet.type_id());
    buf.put_u16_le(wire_size);

    if let Err(e) = packet.write_payload(buf) {
        buf.clear();
        return Err(e);
    }
    debug_assert_eq!(buf.len(), size);
    Ok(())
}

/// Decodes one frame from the front of `buf`.
///
/// Returns the packet and the number of bytes it occupied.
pub fn decode(buf: &[u8]) -> Result<(Packet, usize)> {
    let header = FrameHeader::parse(buf, MAX_PACKET_SIZE)?;
    let mut packet = Packet::empty(header.type_id);
    read_frame(&mut packet, buf, header)?;
    Ok((packet, header.size))
}

/// Reads and decodes one frame from a blocking reader.
pub fn decode_from<R: Read>(reader: &mut R) -> Result<(Packet, usize)> {
    let mut buffer = PacketBuffer::new();
    let (packet, size) = buffer.read_from(reader)?;
    Ok((packet.clone(), size))
}

fn read_frame(packet: &mut Packet, buf: &[u8], header: FrameHeader) -> Result<()> {
    if buf.len() < header.size {
        return Err(ProtocolError::MalformedData);
    }

    let mut payload = &buf[HEADER_SIZE..header.size];
    packet.read_payload(&mut payload)?;
    if !payload.is_empty() {
        return Err(ProtocolError::InvalidPacketSize);
    }
    Ok(())
}

/// Reusable decode target for a hot receive path.
///
/// Holds one pooled packet per wire id. Decoding a frame overwrites the pooled
/// value for that id in place, so strings and vectors keep their capacity and
/// steady-state decoding does not allocate. The returned reference is valid
/// until the next decode.
#[derive(Debug)]
pub struct PacketBuffer {
    slots: HashMap<u8, Packet>,
    frame: Vec<u8>,
    capacity: usize,
}

impl Default for PacketBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketBuffer {
    pub fn new() -> Self {
        Self::with_capacity(MAX_PACKET_SIZE)
    }

    /// Creates a buffer accepting frames of at most `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: HashMap::new(),
            frame: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Validates a raw header against this buffer's capacity.
    pub fn parse_header(&self, raw: &[u8]) -> Result<FrameHeader> {
        FrameHeader::parse(raw, self.capacity)
    }

    /// Decodes one frame from the front of `buf` into the pooled packet for
    /// its id.
    pub fn decode(&mut self, buf: &[u8]) -> Result<(&Packet, usize)> {
        let header = FrameHeader::parse(buf, self.capacity)?;
        let packet = decode_pooled(&mut self.slots, buf, header)?;
        Ok((packet, header.size))
    }

    /// Reads exactly one frame from a blocking reader and decodes it.
    pub fn read_from<R: Read>(&mut self, reader: &mut R) -> Result<(&Packet, usize)> {
        let mut raw = [0u8; HEADER_SIZE];
        reader.read_exact(&mut raw)?;
        let header = FrameHeader::parse(&raw, self.capacity)?;

        self.frame.clear();
        self.frame.extend_from_slice(&raw);
        self.frame.resize(header.size, 0);
        reader.read_exact(&mut self.frame[HEADER_SIZE..])?;

        let packet = decode_pooled(&mut self.slots, &self.frame, header)?;
        Ok((packet, header.size))
    }
}

fn decode_pooled<'a>(
    slots: &'a mut HashMap<u8, Packet>,
    buf: &[u8],
    header: FrameHeader,
) -> Result<&'a Packet> {
    let packet = slots
        .entry(header.type_id)
        .or_insert_with(|| Packet::empty(header.type_id));
    read_frame(packet, buf, header)?;
    Ok(packet)
}
