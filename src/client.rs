//! The client endpoint: dials a TCP socket and drives either a status query or the full login
//! handshake to `play` (§4.6).
//!
//! `query_status` opens a short-lived connection purely for the handshake/status exchange;
//! `login` stays open through encryption and an optional compression upgrade and hands back a
//! connection already switched to `play`.

use crate::crypto;
use crate::error::Error;
use crate::session::{Join, MojangSessionService};
use packets::catalog::{Direction, Mode};
use packets::{AsyncReadPacket, AsyncWritePacket, CursorBuffer, NextState, ReadPacket, VarInt, WritePacket, handshake, login, status};
use rsa::RsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::connection::Connection;

/// Who the client is logging in as, and how to authenticate.
#[derive(Debug, Clone)]
pub enum Profile {
    /// No Mojang authentication; the server must also be running in offline mode.
    Offline { display_name: String },
    /// Authenticates against Mojang's session service before connecting.
    Online {
        display_name: String,
        access_token: String,
        uuid: Uuid,
    },
}

impl Profile {
    pub fn display_name(&self) -> &str {
        match self {
            Profile::Offline { display_name } | Profile::Online { display_name, .. } => display_name,
        }
    }

    fn is_online(&self) -> bool {
        matches!(self, Profile::Online { .. })
    }
}

/// The server's advertised status, as parsed from `status_response`'s JSON body (§6). The JSON
/// itself is treated as an opaque payload, matching this crate's decision to leave `play`-mode
/// (and status-body) data structures out of scope (§1); callers that need the fields parse `body`
/// themselves with `serde_json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    pub body: String,
}

fn handshake_packet(
    protocol_version: VarInt,
    address: &SocketAddr,
    next_state: NextState,
) -> handshake::serverbound::HandshakePacket {
    handshake::serverbound::HandshakePacket {
        protocol_version,
        server_address: address.ip().to_string(),
        server_port: address.port(),
        next_state,
    }
}

/// Opens a preliminary, unversioned connection that requests `status` and reads back the
/// advertised protocol version, for callers that don't already know it (§4.6). Writes the
/// handshake/status_request body directly with [`AsyncWritePacket`] rather than going through
/// [`Connection`], since no mode/version state needs to survive past this one exchange.
#[instrument(skip(address))]
pub async fn discover_protocol_version(address: SocketAddr) -> Result<VarInt, Error> {
    let mut stream = TcpStream::connect(address).await?;

    let mut handshake_body = CursorBuffer::new();
    handshake_body.write_varint(0); // handshake is always id 0x00
    handshake_packet(-1, &address, NextState::Status).write_to_buffer(&mut handshake_body);
    stream.write_varint(handshake_body.as_slice().len() as VarInt).await?;
    stream.write_all(handshake_body.as_slice()).await?;

    let mut status_request_body = CursorBuffer::new();
    status_request_body.write_varint(0); // status_request is always id 0x00
    stream.write_varint(status_request_body.as_slice().len() as VarInt).await?;
    stream.write_all(status_request_body.as_slice()).await?;

    let len = stream.read_varint().await? as usize;
    let mut raw = vec![0u8; len];
    stream.read_exact(&mut raw).await?;
    let mut cursor = CursorBuffer::from_vec(raw);
    let _id = cursor.read_varint()?;
    let response = status::clientbound::StatusResponsePacket::read_from_buffer(&mut cursor)?;

    let parsed: serde_json::Value = serde_json::from_str(&response.body).map_err(|_| Error::IllegalState {
        actual: "status body is not valid JSON",
        expected: "JSON with a version.protocol field",
    })?;
    parsed
        .get("version")
        .and_then(|v| v.get("protocol"))
        .and_then(|v| v.as_i64())
        .map(|v| v as VarInt)
        .ok_or(Error::IllegalState {
            actual: "status body missing version.protocol",
            expected: "JSON with a version.protocol field",
        })
}

/// Pings `address` to learn its advertised protocol version, then performs the full [`login`]
/// with that version (§4.6).
#[instrument(skip(profile))]
pub async fn login_autodetect(address: SocketAddr, profile: &Profile) -> Result<Connection<TcpStream>, Error> {
    let protocol_version = discover_protocol_version(address).await?;
    login(address, protocol_version, profile).await
}

/// Opens a connection, requests `status`, and returns the server's advertised status and the
/// round-tripped ping payload. Used both as a standalone status query and, with `ping_payload`
/// held constant, as the preliminary version-detection connection described in §4.6.
#[instrument(skip(address))]
pub async fn query_status(
    address: SocketAddr,
    protocol_version: VarInt,
    ping_payload: u64,
) -> Result<(ServerStatus, u64), Error> {
    let stream = TcpStream::connect(address).await?;
    let mut connection = Connection::new(stream, address, Direction::Downstream, Direction::Upstream);
    connection.protocol_version = protocol_version;

    connection.send_packet(&handshake_packet(protocol_version, &address, NextState::Status)).await?;
    connection.switch_mode(Mode::Status)?;
    connection.send_packet(&status::serverbound::StatusRequestPacket).await?;

    let (name, mut buffer) = connection.read_frame().await?;
    if name != "status_response" {
        return Err(Error::IllegalState {
            actual: "unexpected packet while awaiting status_response",
            expected: "status_response",
        });
    }
    let response: status::clientbound::StatusResponsePacket = Connection::<TcpStream>::decode(&mut buffer)?;

    connection.send_packet(&status::serverbound::PingPacket { payload: ping_payload }).await?;
    let (name, mut buffer) = connection.read_frame().await?;
    if name != "status_pong" {
        return Err(Error::IllegalState {
            actual: "unexpected packet while awaiting status_pong",
            expected: "status_pong",
        });
    }
    let pong: status::clientbound::PongPacket = Connection::<TcpStream>::decode(&mut buffer)?;
    connection.close();

    Ok((ServerStatus { body: response.body }, pong.payload))
}

/// Dials `address`, performs the full `login` handshake (with encryption and an optional
/// compression upgrade if the server requests them) and returns a connection already switched to
/// `play`.
#[instrument(skip(profile))]
pub async fn login(
    address: SocketAddr,
    protocol_version: VarInt,
    profile: &Profile,
) -> Result<Connection<TcpStream>, Error> {
    login_with_session_service(address, protocol_version, profile, &MojangSessionService::new()).await
}

/// Like [`login`], but authenticates the online-mode `Join` call against `session_service`
/// instead of always constructing a [`MojangSessionService`] — lets tests exercise the full
/// encryption handshake without reaching the real Mojang API.
#[instrument(skip(profile, session_service))]
pub async fn login_with_session_service(
    address: SocketAddr,
    protocol_version: VarInt,
    profile: &Profile,
    session_service: &dyn Join,
) -> Result<Connection<TcpStream>, Error> {
    let stream = TcpStream::connect(address).await?;
    let mut connection = Connection::new(stream, address, Direction::Downstream, Direction::Upstream);
    connection.protocol_version = protocol_version;

    connection.send_packet(&handshake_packet(protocol_version, &address, NextState::Login)).await?;
    connection.switch_mode(Mode::Login)?;
    connection
        .send_packet(&login::serverbound::LoginStartPacket {
            user_name: profile.display_name().to_string(),
        })
        .await?;

    loop {
        let (name, mut buffer) = connection.read_frame().await?;
        match name {
            "login_disconnect" => {
                let packet: login::clientbound::DisconnectPacket = Connection::<TcpStream>::decode(&mut buffer)?;
                connection.close();
                return Err(Error::Application(packet.reason));
            }
            "login_encryption_request" => {
                if !profile.is_online() {
                    return Err(Error::IllegalState {
                        actual: "offline profile",
                        expected: "online profile (server requires encryption)",
                    });
                }
                let Profile::Online {
                    access_token, uuid, ..
                } = profile
                else {
                    unreachable!("checked by is_online above");
                };

                let packet = Connection::<TcpStream>::decode_encryption_request(&mut buffer, connection.protocol_version)?;
                let public_key = RsaPublicKey::from_public_key_der(&packet.public_key)
                    .map_err(crate::crypto::Error::EncodingFailed)?;

                let shared_secret = crypto::generate_shared_secret()?;
                let digest = crate::session::session_digest(&packet.server_id, &shared_secret, &packet.public_key);

                session_service.join(access_token, *uuid, &digest).await?;

                let encrypted_secret = crypto::encrypt(&public_key, &shared_secret)?;
                let encrypted_token = crypto::encrypt(&public_key, &packet.verify_token)?;
                connection
                    .send_encryption_response(&login::serverbound::EncryptionResponsePacket {
                        shared_secret: encrypted_secret,
                        verify_token: encrypted_token,
                    })
                    .await?;

                connection.apply_encryption(&shared_secret)?;
                debug!("encryption enabled on client connection");
            }
            "login_set_compression" => {
                let packet: login::clientbound::SetCompressionPacket = Connection::<TcpStream>::decode(&mut buffer)?;
                connection.apply_compression(packet.threshold)?;
            }
            "login_success" => {
                let packet: login::clientbound::LoginSuccessPacket = Connection::<TcpStream>::decode(&mut buffer)?;
                connection.switch_mode(Mode::Play)?;
                info!(user_id = %packet.user_id, user_name = %packet.user_name, "joined the game");
                return Ok(connection);
            }
            other => {
                debug!(packet = other, "unexpected packet during login");
                return Err(Error::IllegalState {
                    actual: "unexpected packet during login",
                    expected: "login_disconnect|login_encryption_request|login_set_compression|login_success",
                });
            }
        }
    }
}

/// Synthesises an offline-mode profile whose UUID the server will independently derive via
/// [`offline_uuid`] when it accepts the connection.
pub fn offline_profile(display_name: impl Into<String>) -> Profile {
    Profile::Offline {
        display_name: display_name.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_profile_carries_display_name() {
        let profile = offline_profile("bob");
        assert_eq!(profile.display_name(), "bob");
        assert!(!profile.is_online());
    }
}
