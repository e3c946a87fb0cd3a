//! The top-level error type for the connection engine, composed of the lower-layer error types
//! from `packets`, `crypto` and `session`.

use packets::VarInt;

/// The internal error type for all errors the connection engine, the endpoints and the proxy
/// bridge can raise.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A wire-format error: malformed frame, unknown packet id, bad varint encoding.
    #[error("protocol error: {0}")]
    Protocol(#[from] packets::Error),

    /// A cryptography error: RSA failure, verify-token mismatch, cipher setup failure.
    #[error("crypto error: {0}")]
    Crypto(#[from] crate::crypto::Error),

    /// A Mojang session-service error: HTTP failure, timeout, or a negative response.
    #[error("auth error: {0}")]
    Auth(#[from] crate::session::Error),

    /// A transport-level I/O error.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The connection received a packet or handshake value that is valid on the wire but illegal
    /// for the connection's current mode.
    #[error("illegal state: in {actual}, expected {expected}")]
    IllegalState {
        actual: &'static str,
        expected: &'static str,
    },

    /// A mode transition was attempted that is not in the legal edge set (§3).
    #[error("illegal mode switch from {from:?} to {to:?}")]
    IllegalModeSwitch {
        from: packets::catalog::Mode,
        to: packets::catalog::Mode,
    },

    /// A packet arrived while the server's finer-grained `login_expecting` guard did not expect
    /// it (§4.3).
    #[error("out-of-order login")]
    OutOfOrderLogin,

    /// A handler left unread bytes in the decode buffer.
    #[error("packet too long")]
    PacketTooLong,

    /// A handler tried to read past the end of the decode buffer.
    #[error("packet too short")]
    PacketTooShort,

    /// The verify token returned by the client did not match the one the server generated.
    #[error("invalid verify token: expected {expected:?}, got {actual:?}")]
    InvalidVerifyToken {
        expected: packets::VerifyToken,
        actual: Vec<u8>,
    },

    /// Mojang `hasJoined` returned no profile.
    #[error("failed to verify username")]
    FailedToVerifyUsername,

    /// The connection's idle timer expired.
    #[error("connection timed out")]
    TimedOut,

    /// The server's player cap was reached.
    #[error("server is full")]
    ServerFull,

    /// The advertised protocol version is not present in the catalog.
    #[error("unsupported protocol version {0}")]
    UnsupportedProtocolVersion(VarInt),

    /// Enabling proxy fast-forward while the two sides' compression thresholds differ.
    #[error("fast-forward requires matching compression thresholds")]
    MismatchedCompressionThresholds,

    /// A connection handler panicked or returned an application-level failure.
    #[error("handler error: {0}")]
    Application(String),
}

impl Error {
    /// Distinguishes an expected peer hangup from a genuine transport failure, mirroring
    /// `packets::Error::is_connection_closed`, so callers can log the former at `debug` and the
    /// latter at `warn`/`error`.
    pub fn is_connection_closed(&self) -> bool {
        match self {
            Error::Protocol(e) => e.is_connection_closed(),
            Error::Transport(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
