use crate::{CursorBuffer, Error, Packet, ReadPacket, WritePacket};
#[cfg(test)]
use fake::Dummy;

pub mod clientbound {
    use super::*;

    /// The [`StatusResponsePacket`] carries the server's status as a JSON string (motd, player
    /// counts, advertised version, favicon).
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Status_Response)
    #[derive(Debug, Clone, Eq, PartialEq)]
    #[cfg_attr(test, derive(Dummy))]
    pub struct StatusResponsePacket {
        /// The raw JSON body, already serialized by the caller.
        pub body: String,
    }

    impl Packet for StatusResponsePacket {
        const NAME: &'static str = "status_response";
    }

    impl WritePacket for StatusResponsePacket {
        fn write_to_buffer(&self, buffer: &mut CursorBuffer) {
            buffer.write_string(&self.body);
        }
    }

    impl ReadPacket for StatusResponsePacket {
        fn read_from_buffer(buffer: &mut CursorBuffer) -> Result<Self, Error> {
            Ok(Self {
                body: buffer.read_string()?,
            })
        }
    }

    /// Echoes the payload of a [`super::serverbound::PingPacket`], then the connection closes.
    #[derive(Debug, Clone, Copy, Eq, PartialEq)]
    #[cfg_attr(test, derive(Dummy))]
    pub struct PongPacket {
        pub payload: u64,
    }

    impl Packet for PongPacket {
        const NAME: &'static str = "status_pong";
    }

    impl WritePacket for PongPacket {
        fn write_to_buffer(&self, buffer: &mut CursorBuffer) {
            buffer.write_u64(self.payload);
        }
    }

    impl ReadPacket for PongPacket {
        fn read_from_buffer(buffer: &mut CursorBuffer) -> Result<Self, Error> {
            Ok(Self {
                payload: buffer.read_u64()?,
            })
        }
    }
}

pub mod serverbound {
    use super::*;

    /// Requests the server's status. Carries no fields.
    #[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
    #[cfg_attr(test, derive(Dummy))]
    pub struct StatusRequestPacket;

    impl Packet for StatusRequestPacket {
        const NAME: &'static str = "status_request";
    }

    impl WritePacket for StatusRequestPacket {
        fn write_to_buffer(&self, _buffer: &mut CursorBuffer) {}
    }

    impl ReadPacket for StatusRequestPacket {
        fn read_from_buffer(_buffer: &mut CursorBuffer) -> Result<Self, Error> {
            Ok(Self)
        }
    }

    /// An opaque 64-bit payload the server must echo back verbatim.
    #[derive(Debug, Clone, Copy, Eq, PartialEq)]
    #[cfg_attr(test, derive(Dummy))]
    pub struct PingPacket {
        pub payload: u64,
    }

    impl Packet for PingPacket {
        const NAME: &'static str = "status_ping";
    }

    impl WritePacket for PingPacket {
        fn write_to_buffer(&self, buffer: &mut CursorBuffer) {
            buffer.write_u64(self.payload);
        }
    }

    impl ReadPacket for PingPacket {
        fn read_from_buffer(buffer: &mut CursorBuffer) -> Result<Self, Error> {
            Ok(Self {
                payload: buffer.read_u64()?,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::assert_packet;

    #[test]
    fn write_read_status_response_packet() {
        assert_packet::<clientbound::StatusResponsePacket>();
    }

    #[test]
    fn write_read_pong_packet() {
        assert_packet::<clientbound::PongPacket>();
    }

    #[test]
    fn write_read_status_request_packet() {
        assert_packet::<serverbound::StatusRequestPacket>();
    }

    #[test]
    fn write_read_ping_packet() {
        assert_packet::<serverbound::PingPacket>();
    }
}
