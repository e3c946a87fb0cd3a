//! Async field-level writing directly to a socket. Mirrors [`crate::reader`].

use crate::varint::{encode_varint, encode_varlong};
use crate::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

pub trait AsyncWritePacket {
    async fn write_varint(&mut self, value: i32) -> Result<(), Error>;
    async fn write_varlong(&mut self, value: i64) -> Result<(), Error>;
    async fn write_string(&mut self, value: &str) -> Result<(), Error>;
    async fn write_bool(&mut self, value: bool) -> Result<(), Error>;
    async fn write_uuid(&mut self, value: &Uuid) -> Result<(), Error>;
    async fn write_bytes(&mut self, value: &[u8]) -> Result<(), Error>;
}

impl<W: AsyncWrite + Unpin + Send + Sync> AsyncWritePacket for W {
    async fn write_varint(&mut self, value: i32) -> Result<(), Error> {
        let mut buf = Vec::with_capacity(5);
        encode_varint(value, &mut buf);
        self.write_all(&buf).await?;
        Ok(())
    }

    async fn write_varlong(&mut self, value: i64) -> Result<(), Error> {
        let mut buf = Vec::with_capacity(10);
        encode_varlong(value, &mut buf);
        self.write_all(&buf).await?;
        Ok(())
    }

    async fn write_string(&mut self, value: &str) -> Result<(), Error> {
        self.write_varint(value.len() as i32).await?;
        self.write_all(value.as_bytes()).await?;
        Ok(())
    }

    async fn write_bool(&mut self, value: bool) -> Result<(), Error> {
        self.write_all(&[if value { 1 } else { 0 }]).await?;
        Ok(())
    }

    async fn write_uuid(&mut self, value: &Uuid) -> Result<(), Error> {
        self.write_all(value.as_bytes()).await?;
        Ok(())
    }

    async fn write_bytes(&mut self, value: &[u8]) -> Result<(), Error> {
        self.write_varint(value.len() as i32).await?;
        self.write_all(value).await?;
        Ok(())
    }
}
