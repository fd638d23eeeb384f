//! `rtc-call` command line client
//!
//! # Usage
//!
//! ```bash
//! # Mint a room on the backend
//! rtc-call --api-url https://api.example.com create-room
//!
//! # Join by id or by meeting link
//! rtc-call --signaling-url wss://signal.example.com join abc123
//! rtc-call --config call.toml join "https://app.example.com/video-call?room=abc123"
//!
//! # Relay through TURN
//! rtc-call --turn-servers turn:turn.example.com:3478:user:pass join abc123
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rtc_call::{CallConfig, CallSession, RoomApiClient, TurnServerConfig};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Two-party WebRTC call client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file; flags and environment override its values
    #[arg(short, long, env = "RTC_CALL_CONFIG")]
    config: Option<PathBuf>,

    /// Signaling server URL (ws:// or wss://)
    #[arg(long, env = "RTC_CALL_SIGNALING_URL")]
    signaling_url: Option<String>,

    /// Room API base URL (http:// or https://)
    #[arg(long, env = "RTC_CALL_API_URL")]
    api_url: Option<String>,

    /// Bearer token for the room API
    #[arg(long, env = "RTC_CALL_AUTH_TOKEN", hide_env_values = true)]
    auth_token: Option<String>,

    /// STUN servers (comma-separated)
    #[arg(long, value_delimiter = ',', env = "RTC_CALL_STUN_SERVERS")]
    stun_servers: Vec<String>,

    /// TURN servers (format: turn:host:port:username:password, comma-separated)
    #[arg(long, value_delimiter = ',', env = "RTC_CALL_TURN_SERVERS")]
    turn_servers: Vec<String>,

    /// ICE restarts before recovery gives up
    #[arg(long, env = "RTC_CALL_MAX_ICE_RESTARTS")]
    max_ice_restarts: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a room and print its id and meeting link
    CreateRoom,
    /// Join a room by id or meeting link and stay in the call until Ctrl-C
    Join {
        /// Room id or meeting link
        room: String,
    },
}

/// Parse a TURN server (turn:host:port:username:password or turns:...)
fn parse_turn_server(s: &str) -> Result<TurnServerConfig> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() < 5 {
        bail!(
            "Invalid TURN server format: '{}'. Expected: turn:host:port:username:password",
            s
        );
    }

    let protocol = parts[0];
    if protocol != "turn" && protocol != "turns" {
        bail!(
            "Invalid TURN protocol: '{}'. Expected 'turn' or 'turns'",
            protocol
        );
    }

    // Password may contain colons
    Ok(TurnServerConfig {
        url: format!("{}:{}:{}", protocol, parts[1], parts[2]),
        username: parts[3].to_string(),
        credential: parts[4..].join(":"),
    })
}

fn build_config(args: &Args) -> Result<CallConfig> {
    let mut config = match &args.config {
        Some(path) => CallConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => CallConfig::default(),
    };

    if let Some(url) = &args.signaling_url {
        config = config.with_signaling_url(url);
    }
    if let Some(url) = &args.api_url {
        config = config.with_api_base_url(url);
    }
    if let Some(token) = &args.auth_token {
        config = config.with_auth_token(token);
    }
    if !args.stun_servers.is_empty() {
        config.stun_servers = args.stun_servers.clone();
    }
    if !args.turn_servers.is_empty() {
        let turn_servers = args
            .turn_servers
            .iter()
            .map(|s| parse_turn_server(s))
            .collect::<Result<Vec<_>>>()?;
        for turn in &turn_servers {
            info!("Adding TURN server: {} (user: {})", turn.url, turn.username);
        }
        config = config.with_turn_servers(turn_servers);
    }
    if let Some(max) = args.max_ice_restarts {
        config.recovery.max_ice_restarts = max;
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    info!(version = rtc_call::version(), "rtc-call starting");
    let config = build_config(&args)?;

    match &args.command {
        Command::CreateRoom => create_room(&config).await,
        Command::Join { room } => join(config, room).await,
    }
}

async fn create_room(config: &CallConfig) -> Result<()> {
    let client = RoomApiClient::new(&config.api_base_url, config.auth_token.as_deref())?;
    let room = client.create_room().await.context("creating room")?;

    println!("room: {}", room.room_id);
    println!("link: {}", room.url);
    Ok(())
}

async fn join(config: CallConfig, room: &str) -> Result<()> {
    let session = CallSession::new(config)?;

    let _state = session.state_observable().subscribe(|state| {
        info!(state = %state, "Call state");
    });
    let _status = session.status_observable().subscribe(|status| {
        if !status.is_empty() {
            info!("{}", status);
        }
    });
    let _remote = session.remote_stream_observable().subscribe(|stream| {
        if let Some(stream) = stream {
            let kinds: Vec<String> = stream.tracks().iter().map(|t| t.kind().to_string()).collect();
            info!(stream = stream.id(), tracks = ?kinds, "Remote stream");
        }
    });

    session
        .join_room(room)
        .await
        .with_context(|| format!("joining room '{}'", room))?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("Ctrl-C received, ending call");

    session.end_call().await?;
    session.shutdown().await?;
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
