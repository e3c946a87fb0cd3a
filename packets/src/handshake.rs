use crate::{CursorBuffer, Error, NextState, Packet, ReadPacket, VarInt, WritePacket};
#[cfg(test)]
use fake::Dummy;

pub mod serverbound {
    use super::*;

    /// The [`HandshakePacket`].
    ///
    /// This packet causes the server to switch into the target mode. It is the very first packet
    /// on every connection and must be sent right after opening the TCP connection.
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Handshake)
    #[derive(Debug, Clone, Eq, PartialEq)]
    #[cfg_attr(test, derive(Dummy))]
    pub struct HandshakePacket {
        /// The protocol version the client intends to speak.
        pub protocol_version: VarInt,
        /// The virtual host the client believes it is connecting to.
        pub server_address: String,
        /// The virtual port the client believes it is connecting to.
        pub server_port: u16,
        /// The mode to switch to: `status` or `login`.
        pub next_state: NextState,
    }

    impl Packet for HandshakePacket {
        const NAME: &'static str = "handshake";
    }

    impl WritePacket for HandshakePacket {
        fn write_to_buffer(&self, buffer: &mut CursorBuffer) {
            buffer.write_varint(self.protocol_version);
            buffer.write_string(&self.server_address);
            buffer.write_u16(self.server_port);
            buffer.write_varint(self.next_state.into());
        }
    }

    impl ReadPacket for HandshakePacket {
        fn read_from_buffer(buffer: &mut CursorBuffer) -> Result<Self, Error> {
            Ok(Self {
                protocol_version: buffer.read_varint()?,
                server_address: buffer.read_string()?,
                server_port: buffer.read_u16()?,
                next_state: buffer.read_varint()?.try_into()?,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::serverbound::HandshakePacket;
    use crate::test_support::assert_packet;

    #[test]
    fn write_read_handshake_packet() {
        assert_packet::<HandshakePacket>();
    }
}
