//! An append-only byte buffer with a read cursor and a saved-cursor checkpoint.
//!
//! Used both as the per-connection inbound accumulator (the frame pipeline repeatedly tries to
//! read one frame, restoring the cursor on underrun) and as the per-packet decode buffer handed
//! to a handler.

use crate::varint::{decode_varint_bounded, decode_varlong, encode_varint, encode_varlong};
use crate::Error;
use uuid::Uuid;

/// The length-prefix style for a byte array field. Protocol version ≤ 5 (1.7.x) prefixes
/// public-key/shared-secret/verify-token arrays with a 16-bit big-endian length; version ≥ 47
/// (1.8.x+) uses a varint length instead. Which style applies to a given connection is a
/// version-gated decision made by the caller, not by the packet struct itself.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ArrayPrefix {
    U16Be,
    VarInt16Bit,
}

/// A cursor over an append-only byte buffer, supporting checkpoint/restore/discard.
#[derive(Debug, Default, Clone)]
pub struct CursorBuffer {
    data: Vec<u8>,
    pos: usize,
    checkpoint: usize,
}

impl CursorBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data,
            pos: 0,
            checkpoint: 0,
        }
    }

    /// Appends bytes to the end of the buffer. Never affects the cursor.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Number of unread bytes remaining.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Records the current cursor as the checkpoint to restore to on a failed read attempt.
    pub fn save(&mut self) {
        self.checkpoint = self.pos;
    }

    /// Rewinds the cursor to the last checkpoint, undoing any reads since `save()`.
    pub fn restore(&mut self) {
        self.pos = self.checkpoint;
    }

    /// Drops every byte up to and including the current cursor, compacting the buffer so the
    /// next `save()` checkpoint starts at zero.
    pub fn discard(&mut self) {
        self.data.drain(0..self.pos);
        self.pos = 0;
        self.checkpoint = 0;
    }

    /// Reads `len` bytes, advancing the cursor. Fails with `Underrun` without moving the cursor.
    pub fn read(&mut self, len: usize) -> Result<&[u8], Error> {
        if self.pos + len > self.data.len() {
            return Err(Error::Underrun);
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.data[start..start + len])
    }

    /// Reads and returns every remaining byte.
    pub fn read_remaining(&mut self) -> Result<Vec<u8>, Error> {
        let len = self.remaining();
        Ok(self.read(len)?.to_vec())
    }

    pub fn read_u8(&mut self) -> Result<u8, Error> {
        Ok(self.read(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, Error> {
        Ok(u16::from_be_bytes(self.read(2)?.try_into().unwrap()))
    }

    pub fn read_u64(&mut self) -> Result<u64, Error> {
        Ok(u64::from_be_bytes(self.read(8)?.try_into().unwrap()))
    }

    /// Reads a width-bounded varint without advancing past the terminating byte on failure.
    pub fn read_varint_bounded(&mut self, max_bits: u32) -> Result<i32, Error> {
        let (value, len) = decode_varint_bounded(&self.data[self.pos..], max_bits)?;
        self.pos += len;
        Ok(value)
    }

    pub fn read_varint(&mut self) -> Result<i32, Error> {
        self.read_varint_bounded(32)
    }

    pub fn read_varlong(&mut self) -> Result<i64, Error> {
        let (value, len) = decode_varlong(&self.data[self.pos..])?;
        self.pos += len;
        Ok(value)
    }

    pub fn read_string(&mut self) -> Result<String, Error> {
        let len = self.read_varint_bounded(16)? as usize;
        let bytes = self.read(len)?.to_vec();
        String::from_utf8(bytes).map_err(|_| Error::InvalidEncoding)
    }

    pub fn read_bool(&mut self) -> Result<bool, Error> {
        Ok(self.read_u8()? == 1)
    }

    pub fn read_uuid(&mut self) -> Result<Uuid, Error> {
        let bytes: [u8; 16] = self.read(16)?.try_into().unwrap();
        Ok(Uuid::from_bytes(bytes))
    }

    pub fn write_u8(&mut self, value: u8) {
        self.data.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.data.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.data.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_varint(&mut self, value: i32) {
        encode_varint(value, &mut self.data);
    }

    pub fn write_varlong(&mut self, value: i64) {
        encode_varlong(value, &mut self.data);
    }

    pub fn write_string(&mut self, value: &str) {
        self.write_varint(value.len() as i32);
        self.data.extend_from_slice(value.as_bytes());
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(if value { 1 } else { 0 });
    }

    pub fn write_uuid(&mut self, value: &Uuid) {
        self.data.extend_from_slice(value.as_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Reads a length-prefixed byte array using the given prefix style. The login encryption
    /// request/response packets (§6) use 16-bit big-endian lengths for protocol version ≤ 5
    /// (1.7.x) and a 16-bit-bounded varint length for protocol version ≥ 47 (1.8.x+) — see
    /// [`ArrayPrefix`].
    pub fn read_array(&mut self, prefix: ArrayPrefix) -> Result<Vec<u8>, Error> {
        let len = match prefix {
            ArrayPrefix::U16Be => self.read_u16()? as usize,
            ArrayPrefix::VarInt16Bit => self.read_varint_bounded(16)? as usize,
        };
        Ok(self.read(len)?.to_vec())
    }

    pub fn write_array(&mut self, prefix: ArrayPrefix, bytes: &[u8]) {
        match prefix {
            ArrayPrefix::U16Be => self.write_u16(bytes.len() as u16),
            ArrayPrefix::VarInt16Bit => self.write_varint(bytes.len() as i32),
        }
        self.write_bytes(bytes);
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.pos..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_restore_round_trips_on_underrun() {
        let mut buf = CursorBuffer::from_vec(vec![0x05]);
        buf.save();
        // a full varlong read underruns with only one byte available
        assert!(matches!(buf.read(2), Err(Error::Underrun)));
        buf.restore();
        assert_eq!(buf.remaining(), 1);
        assert_eq!(buf.read_u8().unwrap(), 0x05);
    }

    #[test]
    fn discard_drops_consumed_prefix() {
        let mut buf = CursorBuffer::from_vec(vec![1, 2, 3, 4]);
        buf.read(2).unwrap();
        buf.discard();
        assert_eq!(buf.remaining(), 2);
        assert_eq!(buf.read(2).unwrap(), &[3, 4]);
    }

    #[test]
    fn read_past_end_underruns_without_advancing() {
        let mut buf = CursorBuffer::from_vec(vec![1, 2]);
        assert!(matches!(buf.read(3), Err(Error::Underrun)));
        assert_eq!(buf.remaining(), 2);
    }

    #[test]
    fn string_round_trip() {
        let mut buf = CursorBuffer::new();
        buf.write_string("example.com");
        assert_eq!(buf.read_string().unwrap(), "example.com");
    }
}
