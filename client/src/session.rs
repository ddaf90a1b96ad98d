//! Fake player session: joins a lobby and keeps a full peer mesh alive.
//!
//! After [`FakePlayer::join`] returns, the player sits in the lobby. Calling
//! [`FakePlayer::run`] starts the background tasks:
//! - the host loop, answering host traffic until the host goes away
//! - the accept loop, taking direct connections from other players
//! - one dial task per announced player
//! - one serve task and one ping task per connected peer
//!
//! Every task holds a clone of a completion sender; `run` returns once all of
//! them are gone. Ending the host loop (error, timeout or [`FakePlayer::leave`])
//! tears the whole mesh down.

use crate::config::Config;
use crate::endpoint::{self, Connection, Receiver};
use crate::error::{Result, SessionError};
use crate::hooks::{NoHooks, SessionHooks};
use crate::mesh::{Direction, PeerSet};
use crate::peer::{elapsed_ms, PeerInfo, PEER_TIMEOUT, PING_INTERVAL};
use log::{debug, info, trace, warn};
use protocol::{
    GameLoaded, Join, Leave, LeaveReason, MapState, Message, MessageContent, Packet, PeerConnect,
    PeerMask, PeerPing, Pong, SlotInfo,
};
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{interval, sleep, timeout, Instant};

/// Deadline for connecting and for the first reply of any handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Silence after which the host connection is considered dead.
pub const HOST_TIMEOUT: Duration = Duration::from_secs(33);

/// Held by every background task; the session is done once all are dropped.
type TaskGuard = mpsc::Sender<()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Dialing,
    AwaitingJoinReply,
    InLobby,
    Rejected,
    Failed,
    Left,
}

/// State shared by the handle and every background task.
struct Shared {
    config: Config,
    player_id: u8,
    join_counter: u32,
    host: Arc<Connection>,
    peers: Mutex<PeerSet>,
    /// Held from reading the mask until its last send.
    broadcast: Mutex<()>,
    slot_info: Mutex<SlotInfo>,
    game_ticks: AtomicU32,
    state: watch::Sender<SessionState>,
    exit: Mutex<Option<SessionError>>,
    hooks: Arc<dyn SessionHooks>,
    start: Instant,
}

/// A joined lobby participant.
pub struct FakePlayer {
    shared: Arc<Shared>,
    local_addr: Option<SocketAddr>,
    host_rx: Mutex<Option<Receiver>>,
    listener: Mutex<Option<TcpListener>>,
    guard: Mutex<Option<TaskGuard>>,
    done: Mutex<mpsc::Receiver<()>>,
}

impl FakePlayer {
    /// Connects to the host and performs the join handshake.
    pub async fn join(config: Config) -> Result<Self> {
        Self::join_with_hooks(config, Arc::new(NoHooks)).await
    }

    pub async fn join_with_hooks(config: Config, hooks: Arc<dyn SessionHooks>) -> Result<Self> {
        let (state, _) = watch::channel(SessionState::Idle);
        Self::join_observed(config, hooks, state).await
    }

    /// Like [`FakePlayer::join_with_hooks`], publishing every state
    /// transition, including the join itself, on `state`.
    pub async fn join_observed(
        config: Config,
        hooks: Arc<dyn SessionHooks>,
        state: watch::Sender<SessionState>,
    ) -> Result<Self> {
        let link = match dial_host(&config, &state).await {
            Ok(link) => link,
            Err(e) => {
                let failed = match e {
                    SessionError::JoinRejected(_) => SessionState::Rejected,
                    _ => SessionState::Failed,
                };
                warn!("{:?}: join failed: {}", failed, e);
                state.send_replace(failed);
                return Err(e);
            }
        };

        info!(
            "Joined lobby at {} as player {} ({})",
            config.host_addr, link.player_id, config.player_name
        );
        state.send_replace(SessionState::InLobby);

        let (guard, done) = mpsc::channel(1);
        let shared = Arc::new(Shared {
            config,
            player_id: link.player_id,
            join_counter: link.join_counter,
            host: link.host,
            peers: Mutex::new(PeerSet::new()),
            broadcast: Mutex::new(()),
            slot_info: Mutex::new(link.slot_info),
            game_ticks: AtomicU32::new(0),
            state,
            exit: Mutex::new(None),
            hooks,
            start: Instant::now(),
        });

        Ok(Self {
            shared,
            local_addr: link.local_addr,
            host_rx: Mutex::new(Some(link.host_rx)),
            listener: Mutex::new(link.listener),
            guard: Mutex::new(Some(guard)),
            done: Mutex::new(done),
        })
    }

    /// Runs the session until the host connection ends and every background
    /// task has wound down.
    ///
    /// Calling it again after cancellation only waits for the wind-down.
    pub async fn run(&self) -> Result<()> {
        if let Some(guard) = self.guard.lock().await.take() {
            if let Some(host_rx) = self.host_rx.lock().await.take() {
                tokio::spawn(host_loop(
                    Arc::clone(&self.shared),
                    host_rx,
                    guard.clone(),
                ));
            }
            if let Some(listener) = self.listener.lock().await.take() {
                tokio::spawn(accept_loop(
                    Arc::clone(&self.shared),
                    listener,
                    guard.clone(),
                ));
            }
        }

        let mut done = self.done.lock().await;
        while done.recv().await.is_some() {}

        match self.shared.exit.lock().await.take() {
            Some(e) if self.state() != SessionState::Left => Err(e),
            _ => Ok(()),
        }
    }

    /// Announces leaving to the host and closes the host connection.
    pub async fn leave(&self, reason: LeaveReason) -> Result<()> {
        if self.shared.host.is_closed() {
            return Ok(());
        }

        info!("Leaving lobby ({:?})", reason);
        self.shared.state.send_replace(SessionState::Left);
        let sent = self.shared.host.send(&Packet::Leave(Leave { reason })).await;
        self.shared.host.close().await;
        sent
    }

    /// Sends a lobby chat line to every known player through the host.
    pub async fn send_chat(&self, text: &str) -> Result<()> {
        let recipients = self.shared.peers.lock().await.ids();
        let message = Message::chat(recipients, self.shared.player_id, text);
        self.shared.host.send(&Packet::Message(message)).await
    }

    pub fn player_id(&self) -> u8 {
        self.shared.player_id
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Address of the peer listener, if listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn game_ticks(&self) -> u32 {
        self.shared.game_ticks.load(Ordering::Relaxed)
    }

    pub async fn peer_mask(&self) -> u32 {
        self.shared.peers.lock().await.mask()
    }

    pub async fn peers(&self) -> Vec<PeerInfo> {
        self.shared.peers.lock().await.snapshot()
    }

    pub async fn slot_info(&self) -> SlotInfo {
        self.shared.slot_info.lock().await.clone()
    }
}

impl Shared {
    fn elapsed_ms(&self) -> u32 {
        elapsed_ms(self.start)
    }

    async fn own_handshake(&self) -> PeerConnect {
        PeerConnect {
            join_counter: self.join_counter,
            entry_key: self.config.entry_key,
            player_id: self.player_id,
            peer_mask: self.peers.lock().await.mask(),
        }
    }

    /// Sends the current mask to the host and every connected peer.
    async fn broadcast_mask(&self) {
        let _order = self.broadcast.lock().await;
        let (mask, conns) = {
            let peers = self.peers.lock().await;
            (peers.mask(), peers.connections())
        };
        debug!("Broadcasting peer mask {:#034b}", mask);

        let packet = Packet::PeerMask(PeerMask { peer_mask: mask });
        if let Err(e) = self.host.send(&packet).await {
            log_error("host", &e);
        }
        for conn in conns {
            if let Err(e) = conn.send(&packet).await {
                log_error(&conn.peer_addr().to_string(), &e);
            }
        }
    }

    /// Closes the host and every peer connection.
    async fn teardown(&self) {
        self.host.close().await;

        let drained = self.peers.lock().await.drain();
        for (id, conn) in drained {
            conn.close().await;
            self.hooks.on_peer_disconnected(id);
        }
        debug!("Session torn down");
    }
}

/// Host connection right after a successful join.
struct HostLink {
    listener: Option<TcpListener>,
    local_addr: Option<SocketAddr>,
    host: Arc<Connection>,
    host_rx: Receiver,
    join_counter: u32,
    player_id: u8,
    slot_info: SlotInfo,
}

async fn dial_host(config: &Config, state: &watch::Sender<SessionState>) -> Result<HostLink> {
    // Bound before joining so the real port goes into the join request.
    let listener = if config.listen {
        Some(TcpListener::bind(("0.0.0.0", config.listen_port)).await?)
    } else {
        None
    };
    let local_addr = match &listener {
        Some(listener) => Some(listener.local_addr()?),
        None => None,
    };
    let listen_port = local_addr.map_or(0, |addr| addr.port());

    state.send_replace(SessionState::Dialing);
    debug!("Connecting to {}", config.host_addr);
    let stream = timeout(HANDSHAKE_TIMEOUT, TcpStream::connect(config.host_addr))
        .await
        .map_err(|_| SessionError::Timeout)??;
    stream.set_nodelay(true)?;

    let internal_addr = config
        .internal_addr
        .or_else(|| match stream.local_addr() {
            Ok(SocketAddr::V4(addr)) if listener.is_some() => {
                Some(SocketAddrV4::new(*addr.ip(), listen_port))
            }
            _ => None,
        });

    let join_counter = config.join_counter.wrapping_add(1);
    let (host, mut host_rx) = endpoint::split(stream, config.host_addr);
    host.send(&Packet::Join(Join {
        host_counter: config.host_counter,
        entry_key: config.entry_key,
        listen_port,
        join_counter,
        player_name: config.player_name.clone(),
        internal_addr,
    }))
    .await?;

    state.send_replace(SessionState::AwaitingJoinReply);
    let reply = match host_rx.next(HANDSHAKE_TIMEOUT).await {
        Ok(Packet::SlotInfoJoin(join)) => Ok((join.player_id, join.slot_info.clone())),
        Ok(Packet::RejectJoin(reject)) => Err(SessionError::JoinRejected(reject.reason)),
        Ok(other) => Err(SessionError::UnexpectedPacket(other.type_id())),
        Err(e) => Err(e),
    };
    let (player_id, slot_info) = match reply {
        Ok(reply) => reply,
        Err(e) => {
            host.close().await;
            return Err(e);
        }
    };

    Ok(HostLink {
        listener,
        local_addr,
        host,
        host_rx,
        join_counter,
        player_id,
        slot_info,
    })
}

/// Logs a connection-local error at a level matching its class.
fn log_error(who: &str, e: &SessionError) {
    if e.is_closed() {
        debug!("{}: connection closed", who);
    } else if e.is_timeout() {
        info!("{}: timeout", who);
    } else {
        warn!("{}: {}", who, e);
    }
}

async fn host_loop(shared: Arc<Shared>, mut rx: Receiver, guard: TaskGuard) {
    let exit = loop {
        let packet = match rx.next(HOST_TIMEOUT).await {
            Ok(packet) => packet,
            Err(e) => break e,
        };
        if shared.hooks.on_packet(packet) {
            continue;
        }
        if let Err(e) = handle_host_packet(&shared, packet, &guard).await {
            break e;
        }
    };

    log_error("host", &exit);
    if *shared.state.borrow() != SessionState::Left {
        shared.state.send_replace(SessionState::Failed);
    }
    *shared.exit.lock().await = Some(exit);
    shared.teardown().await;
}

async fn handle_host_packet(shared: &Arc<Shared>, packet: &Packet, guard: &TaskGuard) -> Result<()> {
    match packet {
        Packet::Ping(ping) => {
            shared
                .host
                .send(&Packet::Pong(Pong {
                    payload: ping.payload,
                }))
                .await?;
        }
        Packet::MapCheck(check) => {
            // Contents are never verified; claim the size the host expects.
            shared
                .host
                .send(&Packet::MapState(MapState {
                    ready: true,
                    file_size: check.file_size,
                }))
                .await?;
        }
        Packet::PlayerInfo(player) => {
            if player.player_id == shared.player_id {
                return Ok(());
            }
            let addrs = {
                let mut peers = shared.peers.lock().await;
                let added = peers.register(player);
                let addrs = peers
                    .get(player.player_id)
                    .filter(|_| added && shared.config.dial_peers)
                    .map(|peer| peer.dial_addrs().collect::<Vec<_>>());
                addrs
            };
            if let Some(addrs) = addrs {
                tokio::spawn(dial_peer(
                    Arc::clone(shared),
                    player.player_id,
                    addrs,
                    guard.clone(),
                ));
            }
        }
        Packet::PlayerLeft(left) => {
            info!("Player {} left ({:?})", left.player_id, left.reason);
            let (removed, changed) = {
                let mut peers = shared.peers.lock().await;
                let before = peers.mask();
                let removed = peers.remove(left.player_id);
                (removed, peers.mask() != before)
            };
            if let Some(conn) = removed.and_then(|peer| peer.conn) {
                conn.close().await;
                shared.hooks.on_peer_disconnected(left.player_id);
            }
            if changed {
                shared.broadcast_mask().await;
            }
        }
        Packet::SlotInfo(slots) => {
            shared.slot_info.lock().await.clone_from(slots);
        }
        Packet::CountDownStart(_) => info!("Countdown started"),
        Packet::CountDownEnd(_) => {
            info!("Countdown ended, loading");
            shared.host.send(&Packet::GameLoaded(GameLoaded)).await?;
        }
        Packet::TimeSlot(slot) => {
            // Never acknowledged: no simulation runs here to checksum.
            shared
                .game_ticks
                .fetch_add(slot.time_increment_ms as u32, Ordering::Relaxed);
        }
        Packet::StartLag(lag) => {
            for player in &lag.players {
                debug!(
                    "Player {} lagging for {}ms",
                    player.player_id, player.lag_duration_ms
                );
            }
        }
        Packet::StopLag(lag) => debug!("Player {} stopped lagging", lag.player_id),
        Packet::PlayerLoaded(loaded) => debug!("Player {} loaded", loaded.player_id),
        Packet::MessageRelay(message) => log_message(message),
        Packet::PlayerKicked(kick) => warn!("Kicked by host ({:?})", kick.reason),
        Packet::GameOver(over) => info!("Game over for player {}", over.player_id),
        other => trace!("Ignoring host packet {}", other.name()),
    }
    Ok(())
}

fn log_message(message: &Message) {
    match &message.content {
        MessageContent::Chat(text) | MessageContent::ScopedChat { text, .. } => {
            info!("[{}] {}", message.sender_id, text)
        }
        change => debug!("Player {} lobby change {:?}", message.sender_id, change),
    }
}

async fn accept_loop(shared: Arc<Shared>, listener: TcpListener, guard: TaskGuard) {
    loop {
        tokio::select! {
            _ = shared.host.closed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    debug!("Inbound peer connection from {}", addr);
                    tokio::spawn(inbound_peer(Arc::clone(&shared), stream, addr, guard.clone()));
                }
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    sleep(Duration::from_millis(10)).await;
                }
            },
        }
    }
    debug!("Accept loop stopped");
}

async fn inbound_peer(shared: Arc<Shared>, stream: TcpStream, addr: SocketAddr, guard: TaskGuard) {
    let _ = stream.set_nodelay(true);
    let (conn, mut rx) = endpoint::split(stream, addr);

    match handshake(&shared, &conn, &mut rx, Direction::Accepted).await {
        Ok(id) => serve_peer(shared, id, conn, rx, guard).await,
        Err(e) => {
            log_error(&addr.to_string(), &e);
            conn.close().await;
        }
    }
}

async fn dial_peer(shared: Arc<Shared>, id: u8, addrs: Vec<SocketAddrV4>, guard: TaskGuard) {
    for addr in addrs {
        if shared.host.is_closed() {
            return;
        }
        let addr = SocketAddr::V4(addr);
        if addr.ip().is_unspecified() {
            continue;
        }

        let stream = match timeout(HANDSHAKE_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                debug!("Dial to player {} at {} failed: {}", id, addr, e);
                continue;
            }
            Err(_) => {
                info!("Dial to player {} at {}: timeout", id, addr);
                continue;
            }
        };
        let _ = stream.set_nodelay(true);

        let (conn, mut rx) = endpoint::split(stream, addr);
        match handshake(&shared, &conn, &mut rx, Direction::Dialed).await {
            Ok(id) => return serve_peer(shared, id, conn, rx, guard).await,
            Err(e) => {
                log_error(&format!("player {}", id), &e);
                conn.close().await;
                // A lost race or a rejection will not change on another address.
                if !e.is_closed() && !e.is_timeout() {
                    return;
                }
            }
        }
    }
}

/// Exchanges `PeerConnect` packets and binds the connection on success.
///
/// The dialing side speaks first; the accepting side validates and then
/// answers, so the first packet the dialer reads is always the handshake.
async fn handshake(
    shared: &Arc<Shared>,
    conn: &Arc<Connection>,
    rx: &mut Receiver,
    direction: Direction,
) -> Result<u8> {
    let entry_key = shared.config.entry_key;
    let local_id = shared.player_id;

    if direction == Direction::Dialed {
        conn.send(&Packet::PeerConnect(shared.own_handshake().await))
            .await?;
    }

    let remote = match rx.next(HANDSHAKE_TIMEOUT).await? {
        Packet::PeerConnect(remote) => *remote,
        _ => return Err(SessionError::InvalidFirstPacket),
    };

    if direction == Direction::Accepted {
        shared
            .peers
            .lock()
            .await
            .check_handshake(local_id, &remote, conn, direction, entry_key)?;
        conn.send(&Packet::PeerConnect(shared.own_handshake().await))
            .await?;
    }

    let (replaced, changed) = {
        let mut peers = shared.peers.lock().await;
        if shared.host.is_closed() {
            return Err(SessionError::Closed);
        }
        let before = peers.mask();
        let replaced = peers.accept_handshake(local_id, &remote, conn, direction, entry_key)?;
        (replaced, peers.mask() != before)
    };

    info!(
        "Connected to player {} at {} ({:?})",
        remote.player_id,
        conn.peer_addr(),
        direction
    );
    if let Some(old) = replaced {
        old.close().await;
    }
    if changed {
        shared.broadcast_mask().await;
    }
    shared.hooks.on_peer_connected(remote.player_id);
    Ok(remote.player_id)
}

async fn serve_peer(
    shared: Arc<Shared>,
    id: u8,
    conn: Arc<Connection>,
    mut rx: Receiver,
    guard: TaskGuard,
) {
    tokio::spawn(ping_peer(Arc::clone(&shared), Arc::clone(&conn), guard.clone()));

    let exit = loop {
        let packet = match rx.next(PEER_TIMEOUT).await {
            Ok(packet) => packet,
            Err(e) => break e,
        };
        if shared.hooks.on_peer_packet(id, packet) {
            continue;
        }
        if let Err(e) = handle_peer_packet(&shared, id, &conn, packet).await {
            break e;
        }
    };
    log_error(&format!("player {}", id), &exit);

    conn.close().await;
    let changed = shared.peers.lock().await.disconnect(id, &conn);
    if changed {
        info!("Disconnected from player {}", id);
        shared.hooks.on_peer_disconnected(id);
        if !shared.host.is_closed() {
            shared.broadcast_mask().await;
        }
    }
    drop(guard);
}

async fn handle_peer_packet(
    shared: &Shared,
    id: u8,
    conn: &Connection,
    packet: &Packet,
) -> Result<()> {
    match packet {
        Packet::PeerPing(ping) => {
            let pong = shared
                .peers
                .lock()
                .await
                .get_mut(id)
                .map(|peer| peer.on_ping(ping));
            if let Some(pong) = pong {
                conn.send(&pong).await?;
            }
        }
        Packet::PeerPong(pong) => {
            let now = shared.elapsed_ms();
            if let Some(peer) = shared.peers.lock().await.get_mut(id) {
                let rtt = peer.on_pong(pong, now);
                trace!("Player {} rtt {}ms", id, rtt);
            }
        }
        Packet::PeerMask(mask) => {
            if let Some(peer) = shared.peers.lock().await.get_mut(id) {
                peer.peer_mask = mask.peer_mask;
            }
        }
        Packet::PeerConnect(remote) => {
            if let Some(peer) = shared.peers.lock().await.get_mut(id) {
                peer.peer_mask = remote.peer_mask;
            }
        }
        Packet::PeerMessage(message) => log_message(message),
        other => trace!("Ignoring packet {} from player {}", other.name(), id),
    }
    Ok(())
}

async fn ping_peer(shared: Arc<Shared>, conn: Arc<Connection>, _guard: TaskGuard) {
    let mut ticker = interval(PING_INTERVAL);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = conn.closed() => break,
            _ = ticker.tick() => {
                let ping = PeerPing {
                    payload: shared.elapsed_ms(),
                    peer_mask: shared.peers.lock().await.mask(),
                    game_ticks: shared.game_ticks.load(Ordering::Relaxed),
                };
                if let Err(e) = conn.send(&Packet::PeerPing(ping)).await {
                    log_error(&conn.peer_addr().to_string(), &e);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{PeerPong, PlayerInfo, RejectReason, SlotInfoJoin};
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    const ENTRY_KEY: u32 = 0x1234;

    async fn read_packet(stream: &mut TcpStream) -> Packet {
        let mut header = [0u8; 4];
        stream.read_exact(&mut header).await.unwrap();
        let size = u16::from_le_bytes([header[2], header[3]]) as usize;
        let mut frame = header.to_vec();
        frame.resize(size, 0);
        stream.read_exact(&mut frame[4..]).await.unwrap();
        protocol::decode(&frame).unwrap().0
    }

    async fn write_packet(stream: &mut TcpStream, packet: Packet) {
        let bytes = protocol::encode(&packet).unwrap();
        stream.write_all(&bytes).await.unwrap();
    }

    async fn host_with_reply(reply: Packet) -> (SocketAddr, tokio::task::JoinHandle<Join>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let join = match read_packet(&mut stream).await {
                Packet::Join(join) => join,
                other => panic!("expected join, got {:?}", other),
            };
            write_packet(&mut stream, reply).await;
            // Keep the stream open until the client is done with it.
            let mut rest = Vec::new();
            let _ = stream.read_to_end(&mut rest).await;
            join
        });
        (addr, handle)
    }

    fn config(host_addr: SocketAddr) -> Config {
        Config {
            host_addr,
            player_name: "tester".to_string(),
            host_counter: 7,
            entry_key: 0x1234,
            join_counter: 4,
            listen: false,
            dial_peers: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_join_sends_request_and_adopts_id() {
        let (addr, host) = host_with_reply(Packet::SlotInfoJoin(SlotInfoJoin {
            player_id: 2,
            ..Default::default()
        }))
        .await;

        let player = FakePlayer::join(config(addr)).await.unwrap();
        assert_eq!(player.player_id(), 2);
        assert_eq!(player.state(), SessionState::InLobby);

        player.leave(LeaveReason::Lobby).await.unwrap();
        assert_eq!(player.state(), SessionState::Left);

        let join = host.await.unwrap();
        assert_eq!(join.host_counter, 7);
        assert_eq!(join.entry_key, 0x1234);
        assert_eq!(join.join_counter, 5);
        assert_eq!(join.player_name, "tester");
        assert_eq!(join.listen_port, 0);
    }

    #[tokio::test]
    async fn test_unexpected_first_reply_fails_join() {
        let (addr, _host) = host_with_reply(Packet::Ping(protocol::Ping { payload: 1 })).await;
        let (state, observer) = watch::channel(SessionState::Idle);

        let result = FakePlayer::join_observed(config(addr), Arc::new(NoHooks), state).await;
        assert!(matches!(result, Err(SessionError::UnexpectedPacket(0x01))));
        assert_eq!(*observer.borrow(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_rejection_surfaces_reason() {
        let (addr, _host) = host_with_reply(Packet::RejectJoin(protocol::RejectJoin {
            reason: RejectReason::WrongPassword,
        }))
        .await;
        let (state, observer) = watch::channel(SessionState::Idle);

        let result = FakePlayer::join_observed(config(addr), Arc::new(NoHooks), state).await;
        assert!(matches!(
            result,
            Err(SessionError::JoinRejected(RejectReason::WrongPassword))
        ));
        assert_eq!(*observer.borrow(), SessionState::Rejected);
    }

    #[tokio::test]
    async fn test_join_publishes_state_transitions() {
        let (addr, _host) = host_with_reply(Packet::SlotInfoJoin(SlotInfoJoin {
            player_id: 2,
            ..Default::default()
        }))
        .await;
        let (state, mut observer) = watch::channel(SessionState::Idle);
        let recorder = tokio::spawn(async move {
            let mut seen = vec![*observer.borrow_and_update()];
            while observer.changed().await.is_ok() {
                seen.push(*observer.borrow_and_update());
            }
            seen
        });

        let player = FakePlayer::join_observed(config(addr), Arc::new(NoHooks), state)
            .await
            .unwrap();
        assert_eq!(player.state(), SessionState::InLobby);
        assert_eq!(*player.subscribe_state().borrow(), SessionState::InLobby);
        drop(player);

        let seen = recorder.await.unwrap();
        assert_eq!(seen.first(), Some(&SessionState::Idle));
        assert!(seen.contains(&SessionState::AwaitingJoinReply));
        assert_eq!(seen.last(), Some(&SessionState::InLobby));
    }

    #[tokio::test]
    async fn test_listen_port_announced_in_join() {
        let (addr, host) = host_with_reply(Packet::SlotInfoJoin(SlotInfoJoin {
            player_id: 1,
            ..Default::default()
        }))
        .await;
        let mut config = config(addr);
        config.listen = true;

        let player = FakePlayer::join(config).await.unwrap();
        let port = player.local_addr().unwrap().port();
        player.leave(LeaveReason::Lobby).await.unwrap();

        let join = host.await.unwrap();
        assert_eq!(join.listen_port, port);
        assert_eq!(join.internal_addr.unwrap().port(), port);
    }

    #[tokio::test]
    async fn test_run_returns_after_leave() {
        let (addr, _host) = host_with_reply(Packet::SlotInfoJoin(SlotInfoJoin {
            player_id: 3,
            ..Default::default()
        }))
        .await;
        let player = Arc::new(FakePlayer::join(config(addr)).await.unwrap());

        let runner = Arc::clone(&player);
        let handle = tokio::spawn(async move { runner.run().await });
        sleep(Duration::from_millis(50)).await;
        player.leave(LeaveReason::Lobby).await.unwrap();

        let result = timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        assert!(result.is_ok());
        assert_eq!(player.state(), SessionState::Left);
    }

    fn memory_addr() -> SocketAddr {
        "127.0.0.1:6112".parse().unwrap()
    }

    /// Session state wired to an in-memory host; returns the host's far end.
    fn memory_session(hooks: Arc<dyn SessionHooks>) -> (Arc<Shared>, Arc<Connection>, Receiver) {
        let (near, far) = duplex(4096);
        let (host, _) = endpoint::split(near, memory_addr());
        let (state, _) = watch::channel(SessionState::InLobby);
        let shared = Arc::new(Shared {
            config: Config {
                entry_key: ENTRY_KEY,
                ..Default::default()
            },
            player_id: 2,
            join_counter: 1,
            host,
            peers: Mutex::new(PeerSet::new()),
            broadcast: Mutex::new(()),
            slot_info: Mutex::new(SlotInfo::default()),
            game_ticks: AtomicU32::new(0),
            state,
            exit: Mutex::new(None),
            hooks,
            start: Instant::now(),
        });
        let (host_far, host_far_rx) = endpoint::split(far, memory_addr());
        (shared, host_far, host_far_rx)
    }

    /// Both ends of an in-memory peer connection bound to player `id`.
    struct MemoryPeer {
        conn: Arc<Connection>,
        rx: Receiver,
        remote: Arc<Connection>,
        remote_rx: Receiver,
    }

    async fn bind_peer(shared: &Shared, id: u8) -> MemoryPeer {
        let (near, far) = duplex(4096);
        let (conn, rx) = endpoint::split(near, memory_addr());
        let (remote, remote_rx) = endpoint::split(far, memory_addr());

        let mut peers = shared.peers.lock().await;
        peers.register(&PlayerInfo {
            join_counter: 1,
            player_id: id,
            player_name: format!("player{}", id),
            ..Default::default()
        });
        let handshake = PeerConnect {
            join_counter: 1,
            entry_key: ENTRY_KEY,
            player_id: id,
            peer_mask: 0,
        };
        peers
            .accept_handshake(
                shared.player_id,
                &handshake,
                &conn,
                Direction::Accepted,
                ENTRY_KEY,
            )
            .unwrap();

        MemoryPeer {
            conn,
            rx,
            remote,
            remote_rx,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_ping_and_rtt() {
        let (shared, _host, _host_rx) = memory_session(Arc::new(NoHooks));
        let MemoryPeer {
            conn,
            rx,
            remote,
            mut remote_rx,
        } = bind_peer(&shared, 4).await;
        shared.game_ticks.store(500, Ordering::Relaxed);
        let (guard, _done) = mpsc::channel(1);
        tokio::spawn(serve_peer(Arc::clone(&shared), 4, conn, rx, guard));

        // First ping one interval after connecting
        let ping = match remote_rx.next(Duration::from_secs(12)).await.unwrap() {
            Packet::PeerPing(ping) => *ping,
            other => panic!("expected ping, got {:?}", other),
        };
        assert_eq!(ping.peer_mask, 0b1000);
        assert_eq!(ping.game_ticks, 500);
        assert!((10_000..10_010).contains(&ping.payload));

        sleep(Duration::from_millis(200)).await;
        remote
            .send(&Packet::PeerPong(PeerPong {
                payload: ping.payload,
            }))
            .await
            .unwrap();

        let rtt = loop {
            let rtt = shared.peers.lock().await.get(4).map_or(0, |peer| peer.rtt_ms);
            if rtt != 0 {
                break rtt;
            }
            tokio::task::yield_now().await;
        };
        assert!((200..=201).contains(&rtt), "rtt {}", rtt);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_times_out_and_clears_bit() {
        let (shared, _host, mut host_rx) = memory_session(Arc::new(NoHooks));
        let MemoryPeer {
            conn,
            rx,
            remote: _remote,
            remote_rx: _remote_rx,
        } = bind_peer(&shared, 5).await;
        let (guard, mut done) = mpsc::channel(1);
        tokio::spawn(serve_peer(Arc::clone(&shared), 5, conn, rx, guard));

        let started = Instant::now();
        let packet = host_rx.next(Duration::from_secs(20)).await.unwrap();
        assert_eq!(packet, &Packet::PeerMask(PeerMask { peer_mask: 0 }));
        assert!(started.elapsed() >= PEER_TIMEOUT);

        assert_eq!(shared.peers.lock().await.mask(), 0);
        let info = shared.peers.lock().await.snapshot();
        assert_eq!(info.len(), 1);
        assert!(!info[0].connected);

        // Serve and ping tasks both wound down
        assert!(done.recv().await.is_none());
    }

    struct SwallowFirstPing;

    impl SessionHooks for SwallowFirstPing {
        fn on_peer_packet(&self, _player_id: u8, packet: &Packet) -> bool {
            matches!(packet, Packet::PeerPing(ping) if ping.payload == 1)
        }
    }

    #[tokio::test]
    async fn test_peer_hook_skips_default_handling() {
        let (shared, _host, _host_rx) = memory_session(Arc::new(SwallowFirstPing));
        let MemoryPeer {
            conn,
            rx,
            remote,
            mut remote_rx,
        } = bind_peer(&shared, 4).await;
        let (guard, _done) = mpsc::channel(1);
        tokio::spawn(serve_peer(Arc::clone(&shared), 4, conn, rx, guard));

        for payload in [1, 2] {
            remote
                .send(&Packet::PeerPing(PeerPing {
                    payload,
                    ..Default::default()
                }))
                .await
                .unwrap();
        }

        let reply = remote_rx.next(Duration::from_secs(1)).await.unwrap();
        assert_eq!(reply, &Packet::PeerPong(PeerPong { payload: 2 }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_last_broadcast_carries_final_mask() {
        let (shared, _host, mut host_rx) = memory_session(Arc::new(NoHooks));

        let tasks: Vec<_> = (3..=14)
            .map(|id| {
                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    let peer = bind_peer(&shared, id).await;
                    shared.broadcast_mask().await;
                    peer
                })
            })
            .collect();
        let mut bound = Vec::new();
        for task in tasks {
            bound.push(task.await.unwrap());
        }

        let mut last = None;
        while let Ok(packet) = host_rx.next(Duration::from_millis(200)).await {
            if let Packet::PeerMask(mask) = packet {
                last = Some(mask.peer_mask);
            }
        }
        let expected = shared.peers.lock().await.mask();
        assert_eq!(expected, (3..=14).fold(0u32, |mask, id| mask | (1u32 << (id - 1))));
        assert_eq!(last, Some(expected));
        assert_eq!(bound.len(), 12);
    }
}
