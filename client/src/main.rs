use clap::Parser;
use client::lan::{self, DEFAULT_PRODUCT, DEFAULT_VERSION};
use client::{Config, FakePlayer};
use log::{info, warn};
use protocol::{GameVersion, LeaveReason};
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host address to join; searched on the LAN when omitted
    #[arg(value_name = "HOST")]
    target: Option<String>,

    /// Host address, alternative to the positional argument
    #[arg(long, conflicts_with = "target")]
    host: Option<String>,

    /// Display name
    #[arg(short = 'n', long, default_value = "fakeplayer")]
    name: String,

    /// Host counter of the game
    #[arg(long, default_value = "1")]
    host_counter: u32,

    /// Entry key of the game
    #[arg(short = 'k', long, default_value = "0")]
    entry_key: u32,

    /// Port for direct peer connections, 0 for any
    #[arg(short = 'p', long, default_value = "0")]
    listen_port: u16,

    /// Do not accept peer connections
    #[arg(long)]
    no_listen: bool,

    /// Do not dial announced players
    #[arg(long)]
    no_dial: bool,

    /// Find the game via LAN broadcast
    #[arg(long)]
    lan: bool,

    /// Game version used for LAN search
    #[arg(long, default_value_t = DEFAULT_VERSION)]
    game_version: u32,

    /// Enable debug logging
    #[arg(short = 'v', long)]
    verbose: bool,
}

fn resolve(host: &str) -> Result<SocketAddr, Box<dyn std::error::Error>> {
    let with_port = if host.contains(':') {
        host.to_string()
    } else {
        format!("{}:{}", host, client::config::DEFAULT_PORT)
    };
    with_port
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| format!("cannot resolve {}", host).into())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut config = Config {
        player_name: args.name,
        host_counter: args.host_counter,
        entry_key: args.entry_key,
        listen: !args.no_listen,
        listen_port: args.listen_port,
        dial_peers: !args.no_dial,
        ..Config::default()
    };

    match args.host.as_deref().or(args.target.as_deref()) {
        Some(host) if !args.lan => config.host_addr = resolve(host)?,
        _ => {
            info!("Searching LAN for a game...");
            let version = GameVersion::new(DEFAULT_PRODUCT, args.game_version);
            let game = lan::find_game(version, 0, Duration::from_secs(3)).await?;
            config.host_addr = game.addr;
            config.host_counter = game.host_counter;
            config.entry_key = game.entry_key;
        }
    }

    info!("Joining {} as {}", config.host_addr, config.player_name);
    let player = FakePlayer::join(config).await?;
    if let Some(addr) = player.local_addr() {
        info!("Accepting peers on {}", addr);
    }

    let interrupted = tokio::select! {
        result = player.run() => {
            if let Err(e) = result {
                warn!("Session ended: {}", e);
            }
            false
        }
        _ = tokio::signal::ctrl_c() => true,
    };

    if interrupted {
        info!("Interrupted, leaving");
        player.leave(LeaveReason::Lobby).await?;
        player.run().await?;
    }

    Ok(())
}
