//! Wire format for the Minecraft Java-Edition protocol: width-bounded varints, a
//! save/restore/discard cursor buffer, the version-indexed packet catalog, and the typed
//! handshake/status/login packets.
//!
//! World data (NBT, chunks, slots, entity metadata) and chat-style rendering are out of scope —
//! callers treat `play`-mode payloads as opaque bytes, see [`catalog`].

pub mod buffer;
pub mod catalog;
pub mod handshake;
pub mod login;
pub mod reader;
pub mod status;
pub mod varint;
mod writer;

pub use buffer::{ArrayPrefix, CursorBuffer};
pub use reader::AsyncReadPacket;
pub use writer::AsyncWritePacket;

/// A 4-byte random blob exchanged during the login encryption handshake.
///
/// The upstream Minecraft source (`quarry.net.crypto.make_verify_token`) generates exactly 4
/// random bytes (`os.urandom(4)`); some Rust reimplementations of this protocol use a wider,
/// non-standard token, but this crate follows the protocol as documented and observed on the
/// wire.
pub type VerifyToken = [u8; 4];

pub type VarInt = i32;
pub type VarLong = i64;

/// The internal error type for all errors related to packet encoding, decoding and framing.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An error occurred while reading or writing to the underlying byte stream.
    #[error("error reading or writing data: {0}")]
    Io(#[from] std::io::Error),
    /// Not enough bytes were available to complete a read.
    #[error("buffer underrun")]
    Underrun,
    /// The received packet is of an invalid length that we cannot process.
    #[error("illegal packet length")]
    IllegalPacketLength,
    /// An enum field carried a value outside its known range.
    #[error("illegal value {value} for enum {kind}")]
    IllegalEnumValue { kind: &'static str, value: i32 },
    /// A typed packet's static id did not match the id actually present on the wire.
    #[error("illegal packet id: expected {expected:#04x}, got {actual:#04x}")]
    IllegalPacketId { expected: VarInt, actual: VarInt },
    /// A varint/varlong did not terminate within its maximum byte length, or a string was not
    /// valid UTF-8.
    #[error("invalid encoding")]
    InvalidEncoding,
    /// A fixed-size array field (e.g. a UUID or verify token) had the wrong length on the wire.
    #[error("array conversion failed")]
    ArrayConversionFailed,
    /// No catalog entry exists for the requested `(version, mode, direction, id|name)`.
    #[error("no packet known for {0}")]
    UnknownPacket(String),
}

impl Error {
    /// Distinguishes an expected peer hangup from a genuine transport failure, so callers can log
    /// the former at `debug` and the latter at `warn`/`error`.
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, Error::Io(e) if matches!(
            e.kind(),
            std::io::ErrorKind::UnexpectedEof
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::BrokenPipe
        ))
    }
}

/// The mode requested for the next connection phase, carried by the handshake packet.
///
/// The wider `{status, login, play}` mode set (see [`catalog::Mode`]) also includes `play`, which
/// is never a legal handshake target — only `status` and `login` may be requested.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(test, derive(fake::Dummy))]
#[repr(i32)]
pub enum NextState {
    Status = 1,
    Login = 2,
}

impl From<NextState> for VarInt {
    fn from(value: NextState) -> Self {
        value as VarInt
    }
}

impl TryFrom<VarInt> for NextState {
    type Error = Error;

    fn try_from(value: VarInt) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(NextState::Status),
            2 => Ok(NextState::Login),
            other => Err(Error::IllegalEnumValue {
                kind: "NextState",
                value: other,
            }),
        }
    }
}

/// A packet with a fixed wire identifier for a given (version, mode, direction) — resolved
/// dynamically via [`catalog`] rather than a single compile-time constant, since this crate
/// supports multiple protocol versions simultaneously.
pub trait Packet {
    /// The stable name this packet is registered under in the catalog (e.g. `"handshake"`).
    const NAME: &'static str;
}

pub trait WritePacket: Packet {
    fn write_to_buffer(&self, buffer: &mut CursorBuffer);
}

pub trait ReadPacket: Packet + Sized {
    fn read_from_buffer(buffer: &mut CursorBuffer) -> Result<Self, Error>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use fake::{Dummy, Fake, Faker};

    /// Serializes a fake instance of `T`, then deserializes it back and asserts equality.
    pub fn assert_packet<T>()
    where
        T: WritePacket + ReadPacket + PartialEq + std::fmt::Debug + Dummy<Faker>,
    {
        let original: T = Faker.fake();
        let mut buffer = CursorBuffer::new();
        original.write_to_buffer(&mut buffer);
        let decoded = T::read_from_buffer(&mut buffer).expect("round trip decode");
        assert_eq!(original, decoded);
    }
}
