//! # Lobby Protocol Library
//!
//! This library contains the wire format spoken between a lobby host, the
//! players that join it, and the players among themselves. It has no network
//! knowledge: it turns bytes into [`Packet`] values and back.
//!
//! ## Framing
//!
//! Every message travels inside a frame:
//!
//! ```text
//! [0xF7][type id: u8][length: u16 LE][payload ...]
//! ```
//!
//! The length counts the 4 header bytes. A frame that does not start with the
//! signature byte is rejected with [`ProtocolError::NoProtocolSignature`]; a
//! length outside `[4, capacity]` is [`ProtocolError::MalformedData`].
//!
//! ### Byte Order
//! All integers are little-endian, except the port inside an encoded socket
//! address, which is big-endian (network order). Strings are null-terminated
//! and decode lossily, so invalid UTF-8 never fails a frame.
//!
//! ### Unknown Packets
//! Ids missing from the packet table are not an error. They decode to
//! [`Packet::Unknown`] with the raw payload retained, so a client keeps working
//! against hosts that speak extensions it does not understand.
//!
//! ## Module Organization
//!
//! ### Codec (`codec`)
//! - Frame header validation
//! - Static id → payload dispatch through the [`Packet`] enum
//! - [`encode`], [`encode_into`], [`decode`] and [`decode_from`]
//! - [`PacketBuffer`], the allocation-reusing decode target
//!
//! ### Packets (`packets`)
//! One struct per payload layout, each implementing [`Payload`].
//!
//! ### Types (`types`)
//! Sub-structures shared by several packets: slot tables, chat messages,
//! player actions, reject and leave reasons.
//!
//! ## Usage Example
//!
//! ```rust
//! use protocol::{decode, encode, Packet, Ping};
//!
//! let bytes = encode(&Packet::Ping(Ping { payload: 42 })).unwrap();
//! assert_eq!(bytes, vec![0xF7, 0x01, 8, 0, 42, 0, 0, 0]);
//!
//! let (packet, used) = decode(&bytes).unwrap();
//! assert_eq!(used, 8);
//! assert_eq!(packet, Packet::Ping(Ping { payload: 42 }));
//! ```
//!
//! ## Hot Path Decoding
//!
//! A busy lobby decodes thousands of frames per second across all of its
//! connections. [`PacketBuffer`] keeps one pooled packet per type id and
//! decodes into it in place, so once every packet kind has been seen, strings
//! and vectors are reused and decoding does not allocate.

mod buffer;
pub mod codec;
mod error;
pub mod packets;
pub mod types;

pub use buffer::SOCKADDR_SIZE;
pub use codec::{
    decode, decode_from, encode, encode_into, pid, FrameHeader, Packet, PacketBuffer,
    HEADER_SIZE, MAX_PACKET_SIZE, SIGNATURE,
};
pub use error::{ProtocolError, Result};
pub use packets::*;
pub use types::*;
