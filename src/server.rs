//! The server endpoint: accepts connections, serves `status`, and drives the login handshake
//! through to `play` (§4.7).
//!
//! The player cap is enforced right after a login is otherwise accepted, so a full server still
//! completes the handshake far enough to send a proper kick rather than refusing the TCP
//! connection outright. The accept loop races new connections against `ctrl_c` and spawns one
//! timed-out handler task per connection.

use crate::config::Config;
use crate::connection::{Connection, LoginExpecting};
use crate::crypto;
use crate::error::Error;
use crate::session::{HasJoined, MojangSessionService, offline_uuid, session_digest};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use packets::catalog::{Direction, Mode};
use packets::{NextState, VarInt, handshake, login, status};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Tracks who is currently logged in, enforcing [`Config::max_players`].
struct Players {
    online: Mutex<HashSet<Uuid>>,
    max: u32,
}

impl Players {
    fn new(max: u32) -> Self {
        Self {
            online: Mutex::new(HashSet::new()),
            max,
        }
    }

    /// Admits `id` unless the server is already full.
    fn try_join(&self, id: Uuid) -> bool {
        let mut online = self.online.lock().expect("players lock poisoned");
        if online.len() as u32 >= self.max {
            return false;
        }
        online.insert(id);
        true
    }

    fn leave(&self, id: &Uuid) {
        self.online.lock().expect("players lock poisoned").remove(id);
    }

    fn count(&self) -> usize {
        self.online.lock().expect("players lock poisoned").len()
    }
}

/// The favicon, pre-encoded as a `data:` URI once at startup rather than on every status request.
pub(crate) fn load_icon(icon_path: Option<&str>) -> Option<String> {
    let path = icon_path?;
    match std::fs::read(path) {
        Ok(bytes) => Some(format!("data:image/png;base64,{}", BASE64.encode(bytes))),
        Err(e) => {
            warn!(path, cause = %e, "failed to load server icon, omitting favicon");
            None
        }
    }
}

pub(crate) fn status_body(config: &Config, online: usize, protocol_version: VarInt) -> String {
    let mut body = serde_json::json!({
        "description": { "text": config.motd },
        "players": {
            "online": online,
            "max": config.max_players,
        },
        "version": {
            "name": config.version_name,
            "protocol": protocol_version,
        },
    });
    if let Some(icon) = load_icon(config.icon_path.as_deref()) {
        body["favicon"] = serde_json::Value::String(icon);
    }
    body.to_string()
}

/// Accepts connections on `listener` until `ctrl_c`, spawning one handler task per connection.
/// Authenticates logins against the real Mojang session service; see
/// [`serve_with_session_service`] to supply a different one (e.g. in tests).
pub async fn serve(config: Config, listener: TcpListener) -> Result<(), Error> {
    serve_with_session_service(config, listener, Arc::new(MojangSessionService::new())).await
}

/// Accepts connections on `listener` until `ctrl_c` or the shutdown token fires, spawning one
/// handler task per connection. Shutdown races `TcpListener::accept` against a
/// [`CancellationToken`] cancelled by `ctrl_c`, per §5's concurrency model.
pub async fn serve_with_session_service(
    config: Config,
    listener: TcpListener,
    session_service: Arc<dyn HasJoined>,
) -> Result<(), Error> {
    let config = Arc::new(config);
    let players = Arc::new(Players::new(config.max_players));
    let auth_timeout = Duration::from_secs(config.auth_timeout);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_token.cancel();
        }
    });

    loop {
        let (stream, addr) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = shutdown.cancelled() => {
                info!("shutting down server endpoint");
                return Ok(());
            }
        };

        let config = Arc::clone(&config);
        let players = Arc::clone(&players);
        let session_service = Arc::clone(&session_service);

        tokio::spawn(timeout(auth_timeout, async move {
            let mut connection = Connection::new(stream, addr, Direction::Upstream, Direction::Downstream);
            connection.set_idle_timeout_ticks(config.idle_timeout * 20);
            match handle_connection(&mut connection, &config, &players, session_service.as_ref()).await {
                Ok(()) => {}
                Err(e) if e.is_connection_closed() => {
                    debug!(addr = %addr, "client disconnected");
                }
                Err(e) => {
                    warn!(addr = %addr, cause = %e, "failure communicating with a client");
                }
            }
        }));
    }
}

async fn handle_connection(
    connection: &mut Connection<TcpStream>,
    config: &Config,
    players: &Players,
    session_service: &dyn HasJoined,
) -> Result<(), Error> {
    let (name, mut buffer) = connection.read_frame().await?;
    if name != "handshake" {
        return Err(Error::IllegalState {
            actual: "unexpected first packet",
            expected: "handshake",
        });
    }
    let handshake: handshake::serverbound::HandshakePacket = Connection::<TcpStream>::decode(&mut buffer)?;
    connection.protocol_version = handshake.protocol_version;

    match handshake.next_state {
        NextState::Status => serve_status(connection, config, players).await,
        NextState::Login => serve_login(connection, config, players, session_service).await,
    }
}

async fn serve_status(connection: &mut Connection<TcpStream>, config: &Config, players: &Players) -> Result<(), Error> {
    connection.switch_mode(Mode::Status)?;

    loop {
        let (name, mut buffer) = connection.read_frame().await?;
        match name {
            "status_request" => {
                let _: status::serverbound::StatusRequestPacket = Connection::<TcpStream>::decode(&mut buffer)?;
                let body = status_body(config, players.count(), connection.protocol_version);
                connection
                    .send_packet(&status::clientbound::StatusResponsePacket { body })
                    .await?;
            }
            "status_ping" => {
                let packet: status::serverbound::PingPacket = Connection::<TcpStream>::decode(&mut buffer)?;
                connection
                    .send_packet(&status::clientbound::PongPacket { payload: packet.payload })
                    .await?;
                connection.close();
                return Ok(());
            }
            _ => {
                return Err(Error::IllegalState {
                    actual: "unexpected packet during status",
                    expected: "status_request|status_ping",
                });
            }
        }
    }
}

async fn serve_login(
    connection: &mut Connection<TcpStream>,
    config: &Config,
    players: &Players,
    session_service: &dyn HasJoined,
) -> Result<(), Error> {
    connection.switch_mode(Mode::Login)?;

    if !packets::catalog::supported_versions().contains(&connection.protocol_version) {
        connection.kick("Unknown protocol version").await?;
        return Ok(());
    }

    let (name, mut buffer) = connection.read_frame().await?;
    if name != "login_start" {
        return Err(Error::IllegalState {
            actual: "unexpected packet during login",
            expected: "login_start",
        });
    }
    let login_start: login::serverbound::LoginStartPacket = Connection::<TcpStream>::decode(&mut buffer)?;
    let display_name = login_start.user_name;

    let (user_id, user_name) = if config.online_mode {
        let verify_token = crypto::generate_token()?;
        let server_id = crypto::generate_server_id()?;

        connection.login_expecting = LoginExpecting::AwaitingEncryptionResponse;
        connection
            .send_encryption_request(&login::clientbound::EncryptionRequestPacket {
                server_id: server_id.clone(),
                public_key: crypto::ENCODED_PUB.clone(),
                verify_token,
            })
            .await?;

        let (name, mut buffer) = connection.read_frame().await?;
        if name != "login_encryption_response" || connection.login_expecting != LoginExpecting::AwaitingEncryptionResponse {
            return Err(Error::OutOfOrderLogin);
        }
        connection.login_expecting = LoginExpecting::None;
        let response = Connection::<TcpStream>::decode_encryption_response(&mut buffer, connection.protocol_version)?;

        let shared_secret = crypto::decrypt(&crypto::KEY_PAIR.0, &response.shared_secret)?;
        let actual_token = crypto::decrypt(&crypto::KEY_PAIR.0, &response.verify_token)?;
        if !crypto::verify_token(verify_token, &actual_token) {
            return Err(Error::InvalidVerifyToken {
                expected: verify_token,
                actual: actual_token,
            });
        }

        connection.apply_encryption(&shared_secret)?;
        let digest = session_digest(&server_id, &shared_secret, &crypto::ENCODED_PUB);
        let profile = match session_service.has_joined(&display_name, &digest, None).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(cause = %e, "auth failed");
                connection.kick(&format!("Auth failed: {e}")).await?;
                return Ok(());
            }
        };
        (profile.id, profile.name)
    } else {
        (offline_uuid(&display_name), display_name.clone())
    };

    if !players.try_join(user_id) {
        connection.kick("Server is full").await?;
        return Ok(());
    }

    if let Some(threshold) = config.compression_threshold {
        connection
            .send_packet(&login::clientbound::SetCompressionPacket { threshold })
            .await?;
        connection.apply_compression(threshold)?;
    }

    connection
        .send_packet(&login::clientbound::LoginSuccessPacket {
            user_id,
            user_name: user_name.clone(),
        })
        .await?;
    connection.switch_mode(Mode::Play)?;

    if connection.protocol_version <= crate::connection::LEGACY_ARRAY_PREFIX_VERSION_CEILING {
        connection.arm_safe_kick(Duration::from_millis(500));
    }

    info!(user_name, %user_id, "player joined");

    let result = run_play_loop(connection).await;
    players.leave(&user_id);
    info!(user_name, %user_id, "player left");
    result
}

/// Once in `play`, this crate doesn't model gameplay packets (§1's Non-goal); it simply keeps
/// reading frames (restarting the idle timer on each) and drops them, honouring the idle timeout
/// and the deferred 1.7.x safe-kick until the peer disconnects.
async fn run_play_loop(connection: &mut Connection<TcpStream>) -> Result<(), Error> {
    loop {
        match connection.read_frame().await {
            Ok(_) => {}
            Err(e) if e.is_connection_closed() => return Ok(()),
            Err(Error::TimedOut) => {
                connection.kick("Connection timed out").await?;
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    }
}

