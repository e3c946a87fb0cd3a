//! The proxy bridge: pairs a server-role *downstream* connection (the real client) with a
//! client-role *upstream* connection (the real server) and forwards packets between them (§4.8).
//!
//! The downstream authenticates normally (online mode, against the real client), then the bridge
//! dials the upstream with an *offline* profile carrying the same display name:
//! `client(online) -> downstream|bridge|upstream -> server(offline)`. Once both sides are paired,
//! every `play`-mode packet is dispatched through a per-direction handler table, with unmatched
//! packets forwarded unchanged by default.

use crate::client;
use crate::config::Config;
use crate::connection::{Connection, LoginExpecting};
use crate::crypto;
use crate::error::Error;
use crate::server::{load_icon, status_body};
use crate::session::{HasJoined, MojangSessionService, offline_uuid, session_digest};
use packets::catalog::{Direction, Mode};
use packets::{CursorBuffer, NextState, handshake, login, status};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What a registered handler decides to do with one intercepted packet (§4.8).
pub enum Forward {
    /// Forward the original bytes to the opposite side, unchanged. The default.
    Pass,
    /// Drop the packet. If `reply` is set, those already-framed bytes (id + payload, in the
    /// catalog of the side the original packet arrived from) are sent straight back to it.
    Drop { reply: Option<Vec<u8>> },
    /// Forward a different body (id + payload, already resolved for the destination side)
    /// instead of the original one.
    Replace(Vec<u8>),
}

type Handler = Box<dyn Fn(&[u8]) -> Forward + Send + Sync>;

/// The packet interception table and fast-forward policy for one proxied connection.
#[derive(Default)]
pub struct Bridge {
    handlers: HashMap<(Mode, Direction, String), Handler>,
    fast_forward: bool,
}

impl Bridge {
    pub fn new(fast_forward: bool) -> Self {
        Self {
            handlers: HashMap::new(),
            fast_forward,
        }
    }

    /// Registers a handler for `packet_<direction>_<name>`: `direction` is the side the packet
    /// arrived from (not the side it is forwarded to).
    pub fn on(
        &mut self,
        mode: Mode,
        direction: Direction,
        name: impl Into<String>,
        handler: impl Fn(&[u8]) -> Forward + Send + Sync + 'static,
    ) {
        self.handlers.insert((mode, direction, name.into()), Box::new(handler));
    }

    fn dispatch(&self, mode: Mode, direction: Direction, name: &str, body: &[u8]) -> Forward {
        match self.handlers.get(&(mode, direction, name.to_string())) {
            Some(handler) => handler(body),
            None => Forward::Pass,
        }
    }
}

/// Accepts connections on `listener`, authenticates each downstream against the real client, and
/// bridges it to the upstream address in `config.proxy` (or the virtual host claimed in the
/// downstream handshake, if no fixed address is configured). Every bridged connection gets a
/// fresh handler-less [`Bridge`]; see [`serve_with_bridge_factory`] to register handlers.
pub async fn serve(config: Config, listener: TcpListener) -> Result<(), Error> {
    serve_with_bridge_factory(config, listener, Bridge::new).await
}

/// Like [`serve`], but `bridge_factory` builds the [`Bridge`] (handlers and all) for each
/// accepted connection, given that connection's resolved `fast_forward` policy. Shutdown races
/// `TcpListener::accept` against a [`CancellationToken`] cancelled by `ctrl_c`, per §5.
pub async fn serve_with_bridge_factory<F>(config: Config, listener: TcpListener, bridge_factory: F) -> Result<(), Error>
where
    F: Fn(bool) -> Bridge + Send + Sync + 'static,
{
    let config = std::sync::Arc::new(config);
    let session_service = std::sync::Arc::new(MojangSessionService::new());
    let bridge_factory: std::sync::Arc<dyn Fn(bool) -> Bridge + Send + Sync> = std::sync::Arc::new(bridge_factory);

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
                info!("shutting down proxy bridge");
                return Ok(());
            }
        };

        let config = std::sync::Arc::clone(&config);
        let session_service = std::sync::Arc::clone(&session_service);
        let bridge_factory = std::sync::Arc::clone(&bridge_factory);

        tokio::spawn(async move {
            let downstream = Connection::new(stream, addr, Direction::Upstream, Direction::Downstream);
            match accept_and_bridge(downstream, &config, session_service.as_ref(), bridge_factory.as_ref()).await {
                Ok(()) => {}
                Err(e) if e.is_connection_closed() => debug!(addr = %addr, "client disconnected"),
                Err(e) => warn!(addr = %addr, cause = %e, "proxy bridge failed"),
            }
        });
    }
}

/// Takes ownership of the downstream connection, since the fast-forward path (§4.8) needs to
/// consume both sides outright to split them into independent read/write halves.
async fn accept_and_bridge(
    mut downstream: Connection<TcpStream>,
    config: &Config,
    session_service: &MojangSessionService,
    bridge_factory: &(dyn Fn(bool) -> Bridge + Send + Sync),
) -> Result<(), Error> {
    let (name, mut buffer) = downstream.read_frame().await?;
    if name != "handshake" {
        return Err(Error::IllegalState {
            actual: "unexpected first packet",
            expected: "handshake",
        });
    }
    let handshake: handshake::serverbound::HandshakePacket = Connection::<TcpStream>::decode(&mut buffer)?;
    downstream.protocol_version = handshake.protocol_version;

    match handshake.next_state {
        NextState::Status => serve_status(&mut downstream, config).await,
        NextState::Login => {
            let proxy_config = config.proxy.as_ref().ok_or(Error::IllegalState {
                actual: "login on a non-proxy listener",
                expected: "proxy configuration present",
            })?;
            let upstream_address = proxy_config
                .upstream_address
                .clone()
                .unwrap_or_else(|| format!("{}:{}", handshake.server_address, handshake.server_port));

            let Some((user_id, user_name)) = authenticate_downstream(&mut downstream, config, session_service).await? else {
                return Ok(()); // kicked during downstream auth (bad version or auth failure)
            };

            if let Some(threshold) = config.compression_threshold {
                downstream
                    .send_packet(&login::clientbound::SetCompressionPacket { threshold })
                    .await?;
                downstream.apply_compression(threshold)?;
            }
            downstream
                .send_packet(&login::clientbound::LoginSuccessPacket {
                    user_id,
                    user_name: user_name.clone(),
                })
                .await?;
            downstream.switch_mode(Mode::Play)?;
            if downstream.protocol_version <= crate::connection::LEGACY_ARRAY_PREFIX_VERSION_CEILING {
                downstream.arm_safe_kick(Duration::from_millis(500));
            }
            info!(user_name, %user_id, "player joined proxy");

            let upstream_addr: SocketAddr = upstream_address
                .parse()
                .map_err(|_| Error::IllegalState {
                    actual: "unparsable upstream address",
                    expected: "host:port",
                })?;
            let profile = client::offline_profile(user_name);
            let upstream = client::login(upstream_addr, downstream.protocol_version, &profile).await?;

            let fast_forward = proxy_config.fast_forward
                && downstream.compression_threshold() == upstream.compression_threshold();
            if proxy_config.fast_forward && !fast_forward {
                warn!("fast-forward requested but compression thresholds differ, falling back to decoded forwarding");
            }

            info!(addr = %downstream.address, "bridge established, entering forwarding mode");
            run(downstream, upstream, bridge_factory(fast_forward)).await
        }
    }
}

async fn serve_status(connection: &mut Connection<TcpStream>, config: &Config) -> Result<(), Error> {
    connection.switch_mode(Mode::Status)?;
    loop {
        let (name, mut buffer) = connection.read_frame().await?;
        match name {
            "status_request" => {
                let _: status::serverbound::StatusRequestPacket = Connection::<TcpStream>::decode(&mut buffer)?;
                let body = status_body(config, 0, connection.protocol_version);
                connection
                    .send_packet(&status::clientbound::StatusResponsePacket { body })
                    .await?;
                let _ = load_icon(config.icon_path.as_deref()); // cache warm, mirrors the server endpoint
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

/// Drives the downstream side of login (online-mode auth against the real client). Returns the
/// confirmed `(uuid, display_name)` on success, or `None` if the connection was already kicked.
async fn authenticate_downstream(
    connection: &mut Connection<TcpStream>,
    config: &Config,
    session_service: &MojangSessionService,
) -> Result<Option<(Uuid, String)>, Error> {
    connection.switch_mode(Mode::Login)?;

    if !packets::catalog::supported_versions().contains(&connection.protocol_version) {
        connection.kick("Unknown protocol version").await?;
        return Ok(None);
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

    if !config.online_mode {
        let user_id = offline_uuid(&display_name);
        return Ok(Some((user_id, display_name)));
    }

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
    match session_service.has_joined(&display_name, &digest, None).await {
        Ok(profile) => Ok(Some((profile.id, profile.name))),
        Err(e) => {
            warn!(cause = %e, "auth failed");
            connection.kick(&format!("Auth failed: {e}")).await?;
            Ok(None)
        }
    }
}

/// The forwarding loop (§4.8): once both sides are paired, every successfully parsed frame on
/// either side is dispatched through `bridge`, with the default being an unmodified forward to
/// the opposite side via the destination's own catalog. When `bridge` was constructed with
/// `fast_forward` and carries no handlers, both connections are split into independent read/write
/// halves and bytes are copied directly between sockets without ever being decoded — this is a
/// one-way trip for the connections (no handler can be armed mid-stream afterwards).
async fn run(mut downstream: Connection<TcpStream>, mut upstream: Connection<TcpStream>, bridge: Bridge) -> Result<(), Error> {
    if bridge.fast_forward && bridge.handlers.is_empty() {
        let (mut down_read, mut up_write) = downstream.into_cipher_halves();
        let (mut up_read, mut down_write) = upstream.into_cipher_halves();
        tokio::try_join!(
            tokio::io::copy(&mut down_read, &mut up_write),
            tokio::io::copy(&mut up_read, &mut down_write),
        )?;
        return Ok(());
    }

    loop {
        tokio::select! {
            frame = downstream.read_frame() => {
                let (name, mut buffer) = frame?;
                handle_packet(&bridge, Direction::Upstream, name, &mut buffer, &mut upstream, &mut downstream).await?;
            }
            frame = upstream.read_frame() => {
                let (name, mut buffer) = frame?;
                handle_packet(&bridge, Direction::Downstream, name, &mut buffer, &mut downstream, &mut upstream).await?;
            }
        }
    }
}

async fn handle_packet(
    bridge: &Bridge,
    arrived_from: Direction,
    name: &'static str,
    buffer: &mut CursorBuffer,
    dest: &mut Connection<TcpStream>,
    origin: &mut Connection<TcpStream>,
) -> Result<(), Error> {
    let payload = buffer.read_remaining()?;

    if name == "set_compression" {
        if let Ok(threshold) = CursorBuffer::from_vec(payload.clone()).read_varint() {
            let _ = dest.apply_compression(threshold);
            let _ = origin.apply_compression(threshold);
        }
    }

    match bridge.dispatch(Mode::Play, arrived_from, name, &payload) {
        Forward::Pass => forward_raw(dest, name, &payload).await,
        Forward::Replace(bytes) => dest.send_raw(&bytes).await,
        Forward::Drop { reply } => {
            if let Some(reply_bytes) = reply {
                origin.send_raw(&reply_bytes).await?;
            }
            Ok(())
        }
    }
}

async fn forward_raw(dest: &mut Connection<TcpStream>, name: &str, payload: &[u8]) -> Result<(), Error> {
    let id = packets::catalog::id_of(dest.protocol_version, dest.mode, dest.send_direction, name)?;
    let mut body = CursorBuffer::new();
    body.write_varint(id);
    body.write_bytes(payload);
    dest.send_raw(body.as_slice()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_without_handlers_falls_through_to_pass() {
        let bridge = Bridge::new(false);
        assert!(matches!(
            bridge.dispatch(Mode::Play, Direction::Upstream, "chat_message", b""),
            Forward::Pass
        ));
    }

    #[test]
    fn registered_handler_overrides_default() {
        let mut bridge = Bridge::new(false);
        bridge.on(Mode::Play, Direction::Upstream, "chat_message", |_body| Forward::Drop { reply: None });
        assert!(matches!(
            bridge.dispatch(Mode::Play, Direction::Upstream, "chat_message", b""),
            Forward::Drop { reply: None }
        ));
    }
}
