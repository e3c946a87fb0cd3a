use crate::{ArrayPrefix, CursorBuffer, Error, Packet, ReadPacket, VarInt, VerifyToken, WritePacket};
use uuid::Uuid;
#[cfg(test)]
use fake::Dummy;

/// The array length-prefix style used for the public key / shared secret / verify token fields
/// below differs by protocol version (§4.4/§6): [`ArrayPrefix::U16Be`] for protocol ≤ 5,
/// [`ArrayPrefix::VarInt16Bit`] for protocol ≥ 47. [`clientbound::EncryptionRequestPacket`] and
/// [`serverbound::EncryptionResponsePacket`] expose `_with_prefix` methods so a caller that knows
/// the negotiated version can pick the right one; their [`WritePacket`]/[`ReadPacket`] impls fall
/// back to [`ArrayPrefix::VarInt16Bit`] for callers that don't need version-awareness.
pub mod clientbound {
    use super::*;

    /// Rejects the connection with a reason shown to the player. Sent either during login, or
    /// during `play` to kick an already-joined player.
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Disconnect_(login))
    #[derive(Debug, Clone, Eq, PartialEq)]
    #[cfg_attr(test, derive(Dummy))]
    pub struct DisconnectPacket {
        /// A JSON chat component.
        pub reason: String,
    }

    impl Packet for DisconnectPacket {
        const NAME: &'static str = "login_disconnect";
    }

    impl WritePacket for DisconnectPacket {
        fn write_to_buffer(&self, buffer: &mut CursorBuffer) {
            buffer.write_string(&self.reason);
        }
    }

    impl ReadPacket for DisconnectPacket {
        fn read_from_buffer(buffer: &mut CursorBuffer) -> Result<Self, Error> {
            Ok(Self {
                reason: buffer.read_string()?,
            })
        }
    }

    /// Starts the encryption handshake: carries the server's RSA public key (DER-encoded) and a
    /// random verify token the client must echo back encrypted.
    #[derive(Debug, Clone, Eq, PartialEq)]
    #[cfg_attr(test, derive(Dummy))]
    pub struct EncryptionRequestPacket {
        /// Empty in online mode; unused by this protocol beyond being present on the wire.
        pub server_id: String,
        pub public_key: Vec<u8>,
        pub verify_token: VerifyToken,
    }

    impl Packet for EncryptionRequestPacket {
        const NAME: &'static str = "login_encryption_request";
    }

    impl EncryptionRequestPacket {
        pub fn write_to_buffer_with_prefix(&self, buffer: &mut CursorBuffer, prefix: ArrayPrefix) {
            buffer.write_string(&self.server_id);
            buffer.write_array(prefix, &self.public_key);
            buffer.write_array(prefix, &self.verify_token);
        }

        pub fn read_from_buffer_with_prefix(buffer: &mut CursorBuffer, prefix: ArrayPrefix) -> Result<Self, Error> {
            Ok(Self {
                server_id: buffer.read_string()?,
                public_key: buffer.read_array(prefix)?,
                verify_token: buffer
                    .read_array(prefix)?
                    .try_into()
                    .map_err(|_| Error::ArrayConversionFailed)?,
            })
        }
    }

    impl WritePacket for EncryptionRequestPacket {
        fn write_to_buffer(&self, buffer: &mut CursorBuffer) {
            self.write_to_buffer_with_prefix(buffer, ArrayPrefix::VarInt16Bit);
        }
    }

    impl ReadPacket for EncryptionRequestPacket {
        fn read_from_buffer(buffer: &mut CursorBuffer) -> Result<Self, Error> {
            Self::read_from_buffer_with_prefix(buffer, ArrayPrefix::VarInt16Bit)
        }
    }

    /// Completes the login handshake: the client's final (possibly offline-derived) UUID and
    /// display name.
    #[derive(Debug, Clone, Eq, PartialEq)]
    #[cfg_attr(test, derive(Dummy))]
    pub struct LoginSuccessPacket {
        pub user_id: Uuid,
        pub user_name: String,
    }

    impl Packet for LoginSuccessPacket {
        const NAME: &'static str = "login_success";
    }

    impl WritePacket for LoginSuccessPacket {
        fn write_to_buffer(&self, buffer: &mut CursorBuffer) {
            buffer.write_uuid(&self.user_id);
            buffer.write_string(&self.user_name);
        }
    }

    impl ReadPacket for LoginSuccessPacket {
        fn read_from_buffer(buffer: &mut CursorBuffer) -> Result<Self, Error> {
            Ok(Self {
                user_id: buffer.read_uuid()?,
                user_name: buffer.read_string()?,
            })
        }
    }

    /// Announces the compression threshold; packets of at least this size must be compressed
    /// from this point on (§4.1).
    #[derive(Debug, Clone, Copy, Eq, PartialEq)]
    #[cfg_attr(test, derive(Dummy))]
    pub struct SetCompressionPacket {
        pub threshold: VarInt,
    }

    impl Packet for SetCompressionPacket {
        const NAME: &'static str = "login_set_compression";
    }

    impl WritePacket for SetCompressionPacket {
        fn write_to_buffer(&self, buffer: &mut CursorBuffer) {
            buffer.write_varint(self.threshold);
        }
    }

    impl ReadPacket for SetCompressionPacket {
        fn read_from_buffer(buffer: &mut CursorBuffer) -> Result<Self, Error> {
            Ok(Self {
                threshold: buffer.read_varint()?,
            })
        }
    }
}

pub mod serverbound {
    use super::*;

    /// The client's opening bid: just its display name, identity is established afterwards
    /// during the (optional) encryption handshake.
    #[derive(Debug, Clone, Eq, PartialEq)]
    #[cfg_attr(test, derive(Dummy))]
    pub struct LoginStartPacket {
        pub user_name: String,
    }

    impl Packet for LoginStartPacket {
        const NAME: &'static str = "login_start";
    }

    impl WritePacket for LoginStartPacket {
        fn write_to_buffer(&self, buffer: &mut CursorBuffer) {
            buffer.write_string(&self.user_name);
        }
    }

    impl ReadPacket for LoginStartPacket {
        fn read_from_buffer(buffer: &mut CursorBuffer) -> Result<Self, Error> {
            Ok(Self {
                user_name: buffer.read_string()?,
            })
        }
    }

    /// The client's answer to [`super::clientbound::EncryptionRequestPacket`]: the shared secret
    /// and verify token, both RSA-encrypted under the server's public key.
    #[derive(Debug, Clone, Eq, PartialEq)]
    #[cfg_attr(test, derive(Dummy))]
    pub struct EncryptionResponsePacket {
        pub shared_secret: Vec<u8>,
        pub verify_token: Vec<u8>,
    }

    impl Packet for EncryptionResponsePacket {
        const NAME: &'static str = "login_encryption_response";
    }

    impl EncryptionResponsePacket {
        pub fn write_to_buffer_with_prefix(&self, buffer: &mut CursorBuffer, prefix: ArrayPrefix) {
            buffer.write_array(prefix, &self.shared_secret);
            buffer.write_array(prefix, &self.verify_token);
        }

        pub fn read_from_buffer_with_prefix(buffer: &mut CursorBuffer, prefix: ArrayPrefix) -> Result<Self, Error> {
            Ok(Self {
                shared_secret: buffer.read_array(prefix)?,
                verify_token: buffer.read_array(prefix)?,
            })
        }
    }

    impl WritePacket for EncryptionResponsePacket {
        fn write_to_buffer(&self, buffer: &mut CursorBuffer) {
            self.write_to_buffer_with_prefix(buffer, ArrayPrefix::VarInt16Bit);
        }
    }

    impl ReadPacket for EncryptionResponsePacket {
        fn read_from_buffer(buffer: &mut CursorBuffer) -> Result<Self, Error> {
            Self::read_from_buffer_with_prefix(buffer, ArrayPrefix::VarInt16Bit)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::assert_packet;

    #[test]
    fn write_read_disconnect_packet() {
        assert_packet::<clientbound::DisconnectPacket>();
    }

    #[test]
    fn write_read_encryption_request_packet() {
        assert_packet::<clientbound::EncryptionRequestPacket>();
    }

    #[test]
    fn write_read_login_success_packet() {
        assert_packet::<clientbound::LoginSuccessPacket>();
    }

    #[test]
    fn write_read_set_compression_packet() {
        assert_packet::<clientbound::SetCompressionPacket>();
    }

    #[test]
    fn write_read_login_start_packet() {
        assert_packet::<serverbound::LoginStartPacket>();
    }

    #[test]
    fn write_read_encryption_response_packet() {
        assert_packet::<serverbound::EncryptionResponsePacket>();
    }
}
