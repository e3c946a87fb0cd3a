//! Async field-level reading directly off a socket.
//!
//! Used where a connection wants to read one value (or one small, framing-free exchange — e.g.
//! the preliminary ping-for-version connection in the client endpoint) without going through the
//! full cursor-buffer frame pipeline. The frame pipeline itself (accumulate bytes, save/restore,
//! decode a complete body) lives in the `quarry` crate's connection module and builds its decode
//! buffers with [`crate::CursorBuffer`] instead of these.

use crate::varint::{MAX_VARINT_LEN, MAX_VARLONG_LEN};
use crate::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

pub trait AsyncReadPacket {
    async fn read_varint_bounded(&mut self, max_bits: u32) -> Result<i32, Error>;
    async fn read_varint(&mut self) -> Result<i32, Error>;
    async fn read_varlong(&mut self) -> Result<i64, Error>;
    async fn read_string(&mut self) -> Result<String, Error>;
    async fn read_bool(&mut self) -> Result<bool, Error>;
    async fn read_uuid(&mut self) -> Result<Uuid, Error>;
    async fn read_bytes(&mut self) -> Result<Vec<u8>, Error>;
}

impl<R: AsyncRead + Unpin + Send + Sync> AsyncReadPacket for R {
    async fn read_varint_bounded(&mut self, max_bits: u32) -> Result<i32, Error> {
        let mut number: i64 = 0;
        for i in 0..MAX_VARINT_LEN {
            let byte = self.read_u8().await?;
            number |= ((byte & 0x7F) as i64) << (7 * i);
            if byte & 0x80 == 0 {
                if number & (1 << 31) != 0 {
                    number -= 1 << 32;
                }
                let min = -(1i64 << (max_bits - 1));
                let max = 1i64 << (max_bits - 1);
                if number < min || number >= max {
                    return Err(Error::IllegalPacketLength);
                }
                return Ok(number as i32);
            }
        }
        Err(Error::InvalidEncoding)
    }

    async fn read_varint(&mut self) -> Result<i32, Error> {
        self.read_varint_bounded(32).await
    }

    async fn read_varlong(&mut self) -> Result<i64, Error> {
        let mut number: i128 = 0;
        for i in 0..MAX_VARLONG_LEN {
            let byte = self.read_u8().await?;
            number |= ((byte & 0x7F) as i128) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(number as i64);
            }
        }
        Err(Error::InvalidEncoding)
    }

    async fn read_string(&mut self) -> Result<String, Error> {
        let len = self.read_varint_bounded(16).await? as usize;
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf).await?;
        String::from_utf8(buf).map_err(|_| Error::InvalidEncoding)
    }

    async fn read_bool(&mut self) -> Result<bool, Error> {
        Ok(self.read_u8().await? == 1)
    }

    async fn read_uuid(&mut self) -> Result<Uuid, Error> {
        let mut buf = [0u8; 16];
        self.read_exact(&mut buf).await?;
        Ok(Uuid::from_bytes(buf))
    }

    async fn read_bytes(&mut self) -> Result<Vec<u8>, Error> {
        let len = self.read_varint().await? as usize;
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf).await?;
        Ok(buf)
    }
}
