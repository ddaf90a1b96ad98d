use std::net::{SocketAddr, SocketAddrV4};

/// Default lobby port of the game.
pub const DEFAULT_PORT: u16 = 6112;

/// Session parameters, consumed once by [`crate::FakePlayer::join`].
#[derive(Debug, Clone)]
pub struct Config {
    pub host_addr: SocketAddr,
    pub player_name: String,
    pub host_counter: u32,
    pub entry_key: u32,
    /// Join counter before the first dial; the dial increments it.
    pub join_counter: u32,
    /// Accept direct connections from other players.
    pub listen: bool,
    /// Local port for peer connections, 0 for an ephemeral one.
    pub listen_port: u16,
    /// Dial every player announced by the host.
    pub dial_peers: bool,
    /// Address announced to the host as our internal address.
    pub internal_addr: Option<SocketAddrV4>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            player_name: "fakeplayer".to_string(),
            host_counter: 1,
            entry_key: 0,
            join_counter: 0,
            listen: true,
            listen_port: 0,
            dial_peers: true,
            internal_addr: None,
        }
    }
}
