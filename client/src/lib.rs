//! # Fake Player Client Library
//!
//! This library impersonates a player in a game lobby. It joins a lobby run by
//! a remote host, answers the host's bookkeeping traffic, and keeps a direct
//! connection to every other participant the way a real game client does.
//!
//! ## Architecture Overview
//!
//! A session talks on many connections at once: one to the host and one to
//! each peer. Every connection is served by its own task, and all of them
//! share a single view of who is connected.
//!
//! ### Host Handshake
//! The player dials the host and sends a join request carrying the host
//! counter, the entry key and a fresh join counter. The first reply decides
//! the outcome: a slot table assigns our player id, a rejection ends the
//! session with a reason-specific error, anything else is a protocol
//! violation.
//!
//! ### Peer Mesh
//! For every player the host announces, the session dials the player's
//! internal address, then its external one. Inbound connections are accepted
//! as well. Both directions open with a `PeerConnect` handshake that is checked
//! against the announced player id, the entry key and the join counter. When
//! two connections race for the same player, the one dialed by the higher
//! player id survives on both ends.
//!
//! ### Connectivity Mask
//! Bit `id - 1` of a 32-bit mask is set while a peer connection is live. Every
//! change is broadcast to the host and every connected peer so that all
//! participants converge on the same view.
//!
//! ### Keepalive
//! Peers ping each other every 10 seconds with a payload holding the sender's
//! elapsed milliseconds; the echoed payload yields the round trip. A peer
//! silent for 13 seconds is dropped, and a host silent for 33 seconds ends
//! the session.
//!
//! ## Module Organization
//!
//! ### Endpoint Module (`endpoint`)
//! - Framed send and receive over any async stream
//! - Per-connection send lock and write deadline
//! - Close signal that wakes a blocked receive
//!
//! ### Mesh Module (`mesh`)
//! - Peer records and the connectivity mask
//! - Handshake validation and the connection race rule
//!
//! ### Session Module (`session`)
//! - Join handshake and host packet dispatch
//! - Accept, dial, serve and ping tasks
//! - Teardown and task tracking
//!
//! ### Hooks Module (`hooks`)
//! Interception points for layers built on top of a session.
//!
//! ### LAN Module (`lan`)
//! Finds a host, its host counter and its entry key via UDP broadcast.
//!
//! ## Usage Example
//!
//! ```no_run
//! use client::{Config, FakePlayer};
//! use protocol::LeaveReason;
//!
//! # async fn example() -> client::Result<()> {
//! let config = Config {
//!     host_addr: "192.168.1.10:6112".parse().unwrap(),
//!     entry_key: 0x2A,
//!     ..Config::default()
//! };
//!
//! let player = FakePlayer::join(config).await?;
//! println!("joined as player {}", player.player_id());
//!
//! player.send_chat("hello").await?;
//! player.leave(LeaveReason::Lobby).await?;
//! player.run().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Failure Handling
//!
//! Network errors stay local to the connection they happen on: the connection
//! is closed, its peer bit is cleared and its task exits. Only failures of the
//! host handshake and an explicit leave reach the caller. Closed connections
//! are expected during teardown and are logged at debug level only.

pub mod config;
pub mod endpoint;
pub mod error;
pub mod hooks;
pub mod lan;
pub mod mesh;
pub mod peer;
pub mod session;

pub use config::Config;
pub use error::{Result, SessionError};
pub use hooks::{NoHooks, SessionHooks};
pub use peer::PeerInfo;
pub use session::{FakePlayer, SessionState};
