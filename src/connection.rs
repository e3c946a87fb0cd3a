//! The per-connection state machine and frame pipeline (§3, §4.1, §4.3).
//!
//! Incoming bytes are buffered and a decode is attempted on every feed; an underrun just waits for
//! more bytes rather than treating partial frames as errors. Encryption lives one layer below in
//! [`CipherStream`], so the pipeline here only ever sees already-decrypted bytes.

use crate::cipher_stream::{Aes128Cfb8Dec, Aes128Cfb8Enc, CipherStream};
use crate::error::Error;
use crate::ticker::{TaskHandle, Ticker};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use packets::catalog::{Direction, Mode};
use packets::login::clientbound::EncryptionRequestPacket;
use packets::login::serverbound::EncryptionResponsePacket;
use packets::{CursorBuffer, Packet, ReadPacket, VarInt, WritePacket, catalog};
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

/// Maps a wire-level buffer underrun to the connection-level error distinguishing a handler that
/// read past the end of its decode buffer (§4.3's "packet too short") from a genuine framing
/// underrun, which the frame pipeline itself already treats as "need more bytes" rather than an
/// error (see [`FramePipeline::try_read_frame`]).
fn map_underrun(e: packets::Error) -> Error {
    match e {
        packets::Error::Underrun => Error::PacketTooShort,
        other => Error::Protocol(other),
    }
}

/// Default idle timeout (§4.3, §5): 30 seconds without a successfully parsed frame.
pub const DEFAULT_IDLE_TIMEOUT_TICKS: u64 = 30 * 20;

/// The version threshold below which the legacy 16-bit big-endian array length-prefix applies
/// (§4.4/§6). Versions at or above 47 (1.8.x+) use the varint-length form instead.
pub const LEGACY_ARRAY_PREFIX_VERSION_CEILING: VarInt = 5;

/// Which array length-prefix style a connection should use for its negotiated protocol version.
#[must_use]
pub fn array_prefix_for_version(protocol_version: VarInt) -> packets::ArrayPrefix {
    if protocol_version <= LEGACY_ARRAY_PREFIX_VERSION_CEILING {
        packets::ArrayPrefix::U16Be
    } else {
        packets::ArrayPrefix::VarInt16Bit
    }
}

/// The server's finer-grained login-flow guard (§4.3), layered on top of the coarse `Mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginExpecting {
    None,
    AwaitingEncryptionResponse,
}

fn legal_mode_switch(from: Mode, to: Mode) -> bool {
    matches!(
        (from, to),
        (Mode::Init, Mode::Status) | (Mode::Init, Mode::Login) | (Mode::Login, Mode::Play)
    )
}

/// Converts raw (already-decrypted) socket bytes to/from packet bodies, honouring the current
/// compression state (§4.1). Encryption is handled one layer below, by [`CipherStream`].
pub struct FramePipeline {
    inbound: CursorBuffer,
    max_bits_non_play: u32,
    max_bits_play: u32,
    compression_threshold: Option<i32>,
}

impl FramePipeline {
    pub fn new(max_bits_non_play: u32, max_bits_play: u32) -> Self {
        Self {
            inbound: CursorBuffer::new(),
            max_bits_non_play,
            max_bits_play,
            compression_threshold: None,
        }
    }

    fn max_bits(&self, mode: Mode) -> u32 {
        if mode == Mode::Play {
            self.max_bits_play
        } else {
            self.max_bits_non_play
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes);
    }

    /// Attempts to decode one complete frame from the buffered bytes. Returns `Ok(None)` on
    /// underrun (not a fatal error — more bytes are needed), restoring the cursor so the next
    /// `feed` + `try_read_frame` retries from the same point (the save/restore frame loop).
    pub fn try_read_frame(&mut self, mode: Mode) -> Result<Option<Vec<u8>>, Error> {
        self.inbound.save();
        let max_bits = self.max_bits(mode);

        let total = match self.inbound.read_varint_bounded(max_bits) {
            Ok(v) => v,
            Err(packets::Error::Underrun) => {
                self.inbound.restore();
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if total <= 0 {
            return Err(packets::Error::IllegalPacketLength.into());
        }

        let raw = match self.inbound.read(total as usize) {
            Ok(bytes) => bytes.to_vec(),
            Err(packets::Error::Underrun) => {
                self.inbound.restore();
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        self.inbound.discard();

        let body = if self.compression_threshold.is_some() {
            let mut cursor = CursorBuffer::from_vec(raw);
            let uncompressed_len = cursor.read_varint()?;
            let rest = cursor.read_remaining()?;
            if uncompressed_len == 0 {
                rest
            } else {
                let mut decoder = ZlibDecoder::new(rest.as_slice());
                let mut out = Vec::with_capacity(uncompressed_len as usize);
                decoder
                    .read_to_end(&mut out)
                    .map_err(packets::Error::Io)?;
                out
            }
        } else {
            raw
        };

        Ok(Some(body))
    }

    /// Assembles the length/compression-prefixed frame for an already-serialized packet body
    /// (`VarInt(id) | payload`), ready to be written to the (ciphered) socket.
    pub fn encode_frame(&self, mode: Mode, body: &[u8]) -> Vec<u8> {
        let _ = mode;
        let inner = match self.compression_threshold {
            None => body.to_vec(),
            Some(threshold) if (body.len() as i32) < threshold => {
                let mut buf = CursorBuffer::new();
                buf.write_varint(0);
                buf.write_bytes(body);
                buf.into_inner()
            }
            Some(_) => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(body).expect("in-memory zlib write");
                let compressed = encoder.finish().expect("in-memory zlib finish");
                let mut buf = CursorBuffer::new();
                buf.write_varint(body.len() as VarInt);
                buf.write_bytes(&compressed);
                buf.into_inner()
            }
        };

        let mut frame = CursorBuffer::new();
        frame.write_varint(inner.len() as VarInt);
        frame.write_bytes(&inner);
        frame.into_inner()
    }

    pub fn set_compression(&mut self, threshold: Option<i32>) {
        self.compression_threshold = threshold;
    }

    pub fn compression_threshold(&self) -> Option<i32> {
        self.compression_threshold
    }
}

/// One TCP endpoint speaking the protocol engine: a cipher-wrapped socket, the frame pipeline,
/// the mode/login-guard state machine, and the idle-timeout ticker (§3).
pub struct Connection<S> {
    stream: CipherStream<S, Aes128Cfb8Enc, Aes128Cfb8Dec>,
    pipeline: FramePipeline,
    pub address: SocketAddr,
    pub mode: Mode,
    pub login_expecting: LoginExpecting,
    pub protocol_version: VarInt,
    pub recv_direction: Direction,
    pub send_direction: Direction,
    pub in_game: bool,
    closed: bool,
    ticker: Ticker,
    idle_timeout_ticks: u64,
    idle_timed_out: Arc<AtomicBool>,
    idle_timeout_handle: TaskHandle,
    safe_kick_open: bool,
    safe_kick_window_closed: Arc<AtomicBool>,
    pending_kick: Option<String>,
    read_buf: Box<[u8]>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync,
{
    /// `recv_direction`/`send_direction` encode the role: a server reads `Upstream`/writes
    /// `Downstream`; a client is reversed.
    pub fn new(stream: S, address: SocketAddr, recv_direction: Direction, send_direction: Direction) -> Self {
        let mut ticker = Ticker::new();
        let idle_timed_out = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&idle_timed_out);
        let idle_timeout_handle = ticker.add_delay(DEFAULT_IDLE_TIMEOUT_TICKS, move || {
            flag.store(true, Ordering::Relaxed);
        });

        Self {
            stream: CipherStream::from_stream(stream),
            pipeline: FramePipeline::new(21, 32),
            address,
            mode: Mode::Init,
            login_expecting: LoginExpecting::None,
            protocol_version: catalog::default_version(),
            recv_direction,
            send_direction,
            in_game: false,
            closed: false,
            ticker,
            idle_timeout_ticks: DEFAULT_IDLE_TIMEOUT_TICKS,
            idle_timed_out,
            idle_timeout_handle,
            safe_kick_open: false,
            safe_kick_window_closed: Arc::new(AtomicBool::new(false)),
            pending_kick: None,
            read_buf: vec![0u8; 4096].into_boxed_slice(),
        }
    }

    pub fn ticker_mut(&mut self) -> &mut Ticker {
        &mut self.ticker
    }

    /// Overrides the idle timeout (in ticks) from [`DEFAULT_IDLE_TIMEOUT_TICKS`], e.g. to honour
    /// [`crate::config::Config::idle_timeout`]. Restarts the underlying delay task immediately.
    pub fn set_idle_timeout_ticks(&mut self, ticks: u64) {
        self.idle_timeout_ticks = ticks;
        self.ticker.restart(self.idle_timeout_handle, ticks);
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn close(&mut self) {
        self.closed = true;
        self.ticker.remove_all();
    }

    /// Restarts the idle deadline, the way §4.3 requires on every successfully parsed frame.
    fn rearm_idle_timer(&mut self) {
        self.ticker.restart(self.idle_timeout_handle, self.idle_timeout_ticks);
    }

    pub fn switch_mode(&mut self, to: Mode) -> Result<(), Error> {
        if !legal_mode_switch(self.mode, to) {
            return Err(Error::IllegalModeSwitch { from: self.mode, to });
        }
        debug!(from = ?self.mode, to = ?to, "switching mode");
        self.mode = to;
        if to == Mode::Play {
            self.in_game = true;
        }
        Ok(())
    }

    pub fn apply_encryption(&mut self, shared_secret: &[u8]) -> Result<(), Error> {
        let (encryptor, decryptor) = crate::cipher_stream::create_ciphers(shared_secret)?;
        self.stream.set_encryption(Some(encryptor), Some(decryptor));
        info!("encryption enabled");
        Ok(())
    }

    /// Idempotent per §9's Open Question decision: a repeat call with the same threshold is a
    /// no-op, a differing one is a protocol error.
    pub fn apply_compression(&mut self, threshold: i32) -> Result<(), Error> {
        match self.pipeline.compression_threshold() {
            Some(existing) if existing == threshold => Ok(()),
            Some(_) => Err(packets::Error::IllegalPacketLength.into()),
            None => {
                self.pipeline.set_compression(Some(threshold));
                info!(threshold, "compression enabled");
                Ok(())
            }
        }
    }

    /// Reads from the socket until one complete frame is available, resolves its name via the
    /// catalog, and returns the packet's decode buffer. Restarts the idle timer on success.
    ///
    /// Internally races the socket read against the ticker (disjoint fields of `self`, so both
    /// borrows coexist) rather than asking the caller to race `read_frame` against a separate
    /// `tick` method — two `&mut self` methods on the same connection can't be raced from outside
    /// it. A tick past the idle deadline surfaces as [`Error::TimedOut`]; a tick that closes the
    /// 1.7.x safe-kick window flushes any kick that was deferred during it.
    pub async fn read_frame(&mut self) -> Result<(&'static str, CursorBuffer), Error> {
        loop {
            if let Some(body) = self.pipeline.try_read_frame(self.mode)? {
                let mut cursor = CursorBuffer::from_vec(body);
                let id = cursor.read_varint()?;
                let name = catalog::name_of(self.protocol_version, self.mode, self.recv_direction, id)?;
                self.rearm_idle_timer();
                return Ok((name, cursor));
            }

            tokio::select! {
                result = self.stream.read(&mut self.read_buf) => {
                    let n = result?;
                    if n == 0 {
                        return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
                    }
                    self.pipeline.feed(&self.read_buf[..n]);
                }
                _ = self.ticker.tick() => {
                    if self.safe_kick_window_closed.swap(false, Ordering::Relaxed) {
                        self.safe_kick_open = false;
                        if let Some(reason) = self.pending_kick.take() {
                            self.kick(&reason).await?;
                        }
                    }
                    if self.idle_timed_out.load(Ordering::Relaxed) {
                        return Err(Error::TimedOut);
                    }
                }
            }
        }
    }

    /// Serializes and sends a typed packet, resolving its wire id via the catalog for
    /// `(protocol_version, mode, send_direction, P::NAME)`.
    pub async fn send_packet<P: WritePacket>(&mut self, packet: &P) -> Result<(), Error> {
        let id = catalog::id_of(self.protocol_version, self.mode, self.send_direction, P::NAME)?;
        let mut buffer = CursorBuffer::new();
        buffer.write_varint(id);
        packet.write_to_buffer(&mut buffer);
        let frame = self.pipeline.encode_frame(self.mode, buffer.as_slice());
        self.stream.write_all(&frame).await?;
        Ok(())
    }

    /// Sends an already-serialized packet body (id + payload) unchanged, used by the proxy
    /// bridge's forwarding path (§4.8), where the body is never decoded.
    pub async fn send_raw(&mut self, body: &[u8]) -> Result<(), Error> {
        let frame = self.pipeline.encode_frame(self.mode, body);
        self.stream.write_all(&frame).await?;
        Ok(())
    }

    pub fn decode<P: ReadPacket>(buffer: &mut CursorBuffer) -> Result<P, Error> {
        let packet = P::read_from_buffer(buffer).map_err(map_underrun)?;
        if !buffer.is_empty() {
            return Err(Error::PacketTooLong);
        }
        Ok(packet)
    }

    /// Sends the encryption request with the array length-prefix the negotiated protocol version
    /// requires (§4.4/§6).
    pub async fn send_encryption_request(&mut self, packet: &EncryptionRequestPacket) -> Result<(), Error> {
        let prefix = array_prefix_for_version(self.protocol_version);
        let id = catalog::id_of(self.protocol_version, self.mode, self.send_direction, EncryptionRequestPacket::NAME)?;
        let mut buffer = CursorBuffer::new();
        buffer.write_varint(id);
        packet.write_to_buffer_with_prefix(&mut buffer, prefix);
        let frame = self.pipeline.encode_frame(self.mode, buffer.as_slice());
        self.stream.write_all(&frame).await?;
        Ok(())
    }

    /// Sends the encryption response with the array length-prefix the negotiated protocol version
    /// requires (§4.4/§6).
    pub async fn send_encryption_response(&mut self, packet: &EncryptionResponsePacket) -> Result<(), Error> {
        let prefix = array_prefix_for_version(self.protocol_version);
        let id = catalog::id_of(self.protocol_version, self.mode, self.send_direction, EncryptionResponsePacket::NAME)?;
        let mut buffer = CursorBuffer::new();
        buffer.write_varint(id);
        packet.write_to_buffer_with_prefix(&mut buffer, prefix);
        let frame = self.pipeline.encode_frame(self.mode, buffer.as_slice());
        self.stream.write_all(&frame).await?;
        Ok(())
    }

    /// Decodes the encryption request with the array length-prefix `protocol_version` requires.
    pub fn decode_encryption_request(
        buffer: &mut CursorBuffer,
        protocol_version: VarInt,
    ) -> Result<EncryptionRequestPacket, Error> {
        let prefix = array_prefix_for_version(protocol_version);
        let packet = EncryptionRequestPacket::read_from_buffer_with_prefix(buffer, prefix).map_err(map_underrun)?;
        if !buffer.is_empty() {
            return Err(Error::PacketTooLong);
        }
        Ok(packet)
    }

    /// Decodes the encryption response with the array length-prefix `protocol_version` requires.
    pub fn decode_encryption_response(
        buffer: &mut CursorBuffer,
        protocol_version: VarInt,
    ) -> Result<EncryptionResponsePacket, Error> {
        let prefix = array_prefix_for_version(protocol_version);
        let packet = EncryptionResponsePacket::read_from_buffer_with_prefix(buffer, prefix).map_err(map_underrun)?;
        if !buffer.is_empty() {
            return Err(Error::PacketTooLong);
        }
        Ok(packet)
    }

    /// Kicks with `login_disconnect`/`disconnect` depending on mode. On the 1.7.x client, kicking
    /// immediately after entering `play` corrupts the client; the server arms a 0.5s safe-kick
    /// latch on that transition and defers a kick requested inside the window (§4.3).
    pub async fn kick(&mut self, reason: &str) -> Result<(), Error> {
        if self.safe_kick_open {
            self.pending_kick = Some(reason.to_string());
            return Ok(());
        }

        match self.mode {
            Mode::Login => {
                let packet = packets::login::clientbound::DisconnectPacket {
                    reason: reason.to_string(),
                };
                self.send_packet(&packet).await?;
            }
            Mode::Play => {
                let id = catalog::id_of(self.protocol_version, self.mode, self.send_direction, "disconnect")?;
                let mut body = CursorBuffer::new();
                body.write_varint(id);
                body.write_string(reason);
                self.send_raw(body.as_slice()).await?;
            }
            _ => {}
        }
        self.close();
        Ok(())
    }

    /// Arms the 1.7.x safe-kick latch for `delay`, deferring any kick requested within the window.
    pub fn arm_safe_kick(&mut self, delay: Duration) {
        let ticks = ((delay.as_secs_f64() / 0.05).ceil() as u64).max(1);
        self.safe_kick_open = true;
        self.safe_kick_window_closed.store(false, Ordering::Relaxed);
        let flag = Arc::clone(&self.safe_kick_window_closed);
        self.ticker.add_delay(ticks, move || {
            flag.store(true, Ordering::Relaxed);
        });
    }

    pub fn is_safe_kick_armed(&self) -> bool {
        self.safe_kick_open
    }

    pub fn take_pending_kick(&mut self) -> Option<String> {
        self.pending_kick.take()
    }

    /// This connection's negotiated compression threshold, if any.
    pub fn compression_threshold(&self) -> Option<i32> {
        self.pipeline.compression_threshold()
    }

    /// Splits into independent halves for the proxy fast-forward bypass (§4.8): each half still
    /// deciphers/enciphers through this connection's cipher state, but frames are no longer
    /// decoded at all — the caller copies raw bytes straight from one peer's read half to the
    /// other's write half. Consumes the connection: once split there is no way back to framed
    /// reads on this object.
    pub fn into_cipher_halves(
        self,
    ) -> (
        tokio::io::ReadHalf<CipherStream<S, Aes128Cfb8Enc, Aes128Cfb8Dec>>,
        tokio::io::WriteHalf<CipherStream<S, Aes128Cfb8Enc, Aes128Cfb8Dec>>,
    ) {
        tokio::io::split(self.stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions_match_the_fixed_edge_set() {
        assert!(legal_mode_switch(Mode::Init, Mode::Status));
        assert!(legal_mode_switch(Mode::Init, Mode::Login));
        assert!(legal_mode_switch(Mode::Login, Mode::Play));
        assert!(!legal_mode_switch(Mode::Init, Mode::Play));
        assert!(!legal_mode_switch(Mode::Status, Mode::Login));
        assert!(!legal_mode_switch(Mode::Play, Mode::Login));
    }

    #[test]
    fn array_prefix_selects_by_version_threshold() {
        assert_eq!(array_prefix_for_version(5), packets::ArrayPrefix::U16Be);
        assert_eq!(array_prefix_for_version(47), packets::ArrayPrefix::VarInt16Bit);
    }

    #[test]
    fn frame_pipeline_round_trips_without_compression() {
        let mut pipeline = FramePipeline::new(21, 32);
        let body = b"hello world".to_vec();
        let frame = pipeline.encode_frame(Mode::Status, &body);
        pipeline.feed(&frame);
        let decoded = pipeline.try_read_frame(Mode::Status).unwrap().unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn frame_pipeline_round_trips_below_compression_threshold() {
        let mut pipeline = FramePipeline::new(21, 32);
        pipeline.set_compression(Some(64));
        let body = vec![7u8; 40];
        let frame = pipeline.encode_frame(Mode::Play, &body);
        pipeline.feed(&frame);
        let decoded = pipeline.try_read_frame(Mode::Play).unwrap().unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn frame_pipeline_round_trips_above_compression_threshold() {
        let mut pipeline = FramePipeline::new(21, 32);
        pipeline.set_compression(Some(64));
        let body = vec![7u8; 400];
        let frame = pipeline.encode_frame(Mode::Play, &body);
        pipeline.feed(&frame);
        let decoded = pipeline.try_read_frame(Mode::Play).unwrap().unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn underrun_restores_cursor_for_a_later_retry() {
        let mut pipeline = FramePipeline::new(21, 32);
        let body = b"full frame payload".to_vec();
        let frame = pipeline.encode_frame(Mode::Status, &body);

        pipeline.feed(&frame[..frame.len() - 2]);
        assert!(pipeline.try_read_frame(Mode::Status).unwrap().is_none());

        pipeline.feed(&frame[frame.len() - 2..]);
        let decoded = pipeline.try_read_frame(Mode::Status).unwrap().unwrap();
        assert_eq!(decoded, body);
    }
}
