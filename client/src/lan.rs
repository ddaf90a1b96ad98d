//! LAN game discovery over UDP broadcast.

use crate::config::DEFAULT_PORT;
use crate::error::{Result, SessionError};
use log::{debug, info};
use protocol::{GameVersion, Packet, SearchGame, MAX_PACKET_SIZE};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

/// Product tag sent in LAN queries.
pub const DEFAULT_PRODUCT: [u8; 4] = *b"PX3W";

/// Patch version sent in LAN queries unless overridden.
pub const DEFAULT_VERSION: u32 = 26;

/// A game advertised on the local network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanGame {
    /// Advertising host with the game port it announced.
    pub addr: SocketAddr,
    pub host_counter: u32,
    pub entry_key: u32,
    pub name: String,
}

/// Broadcasts a query on the default port and returns the first answer.
pub async fn find_game(version: GameVersion, host_counter: u32, wait: Duration) -> Result<LanGame> {
    let target = SocketAddr::from((Ipv4Addr::BROADCAST, DEFAULT_PORT));
    find_game_at(target, version, host_counter, wait).await
}

/// Sends a query to `target` and returns the first game advertised back.
pub async fn find_game_at(
    target: SocketAddr,
    version: GameVersion,
    host_counter: u32,
    wait: Duration,
) -> Result<LanGame> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
    socket.set_broadcast(true)?;

    let query = protocol::encode(&Packet::SearchGame(SearchGame {
        game_version: version,
        host_counter,
    }))?;
    socket.send_to(&query, target).await?;
    debug!("Searching for LAN games via {}", target);

    let mut buf = vec![0u8; MAX_PACKET_SIZE];
    let game = match timeout(wait, receive_game(&socket, &mut buf)).await {
        Ok(result) => result?,
        Err(_) => return Err(SessionError::NoGameFound),
    };
    info!("Found LAN game \"{}\" at {}", game.name, game.addr);
    Ok(game)
}

async fn receive_game(socket: &UdpSocket, buf: &mut [u8]) -> Result<LanGame> {
    loop {
        let (len, src) = socket.recv_from(buf).await?;
        match parse_game_info(&buf[..len], src) {
            Ok(Some(game)) => return Ok(game),
            Ok(None) => continue,
            Err(e) => debug!("Ignoring datagram from {}: {}", src, e),
        }
    }
}

/// Interprets one datagram; anything but a game advertisement is `None`.
pub fn parse_game_info(buf: &[u8], src: SocketAddr) -> Result<Option<LanGame>> {
    let (packet, _) = protocol::decode(buf)?;
    Ok(match packet {
        Packet::GameInfo(info) => Some(LanGame {
            addr: SocketAddr::new(src.ip(), info.game_port),
            host_counter: info.host_counter,
            entry_key: info.entry_key,
            name: info.game_name,
        }),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::GameInfo;

    fn advertisement(port: u16) -> Vec<u8> {
        protocol::encode(&Packet::GameInfo(GameInfo {
            game_version: GameVersion::new(DEFAULT_PRODUCT, DEFAULT_VERSION),
            host_counter: 3,
            entry_key: 0xABCD,
            game_name: "local game".to_string(),
            game_port: port,
            ..Default::default()
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_uses_source_ip_and_advertised_port() {
        let src: SocketAddr = "192.168.1.20:6112".parse().unwrap();

        let game = parse_game_info(&advertisement(6200), src).unwrap().unwrap();

        assert_eq!(game.addr, "192.168.1.20:6200".parse().unwrap());
        assert_eq!(game.host_counter, 3);
        assert_eq!(game.entry_key, 0xABCD);
        assert_eq!(game.name, "local game");
    }

    #[test]
    fn test_parse_ignores_other_packets() {
        let src: SocketAddr = "192.168.1.20:6112".parse().unwrap();
        let refresh = protocol::encode(&Packet::RefreshGame(Default::default())).unwrap();

        assert_eq!(parse_game_info(&refresh, src).unwrap(), None);
        assert!(parse_game_info(&[1, 2, 3], src).is_err());
    }

    #[tokio::test]
    async fn test_find_game_answers_query() {
        let host = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = host.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (len, from) = host.recv_from(&mut buf).await.unwrap();
            match protocol::decode(&buf[..len]).unwrap().0 {
                Packet::SearchGame(search) => assert_eq!(search.host_counter, 0),
                other => panic!("unexpected query {:?}", other),
            }
            host.send_to(&advertisement(7000), from).await.unwrap();
        });

        let game = find_game_at(
            target,
            GameVersion::new(DEFAULT_PRODUCT, DEFAULT_VERSION),
            0,
            Duration::from_secs(2),
        )
        .await
        .unwrap();

        assert_eq!(game.addr, "127.0.0.1:7000".parse().unwrap());
    }

    #[tokio::test]
    async fn test_find_game_times_out() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = silent.local_addr().unwrap();

        let result = find_game_at(
            target,
            GameVersion::new(DEFAULT_PRODUCT, DEFAULT_VERSION),
            0,
            Duration::from_millis(50),
        )
        .await;

        assert!(matches!(result, Err(SessionError::NoGameFound)));
    }
}
