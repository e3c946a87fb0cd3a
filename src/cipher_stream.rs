//! A transparent AES-128-CFB8 encrypting/decrypting wrapper over any `AsyncRead`/`AsyncWrite`.
//!
//! The shared secret is used as both the AES key and the CFB8 IV, a documented Minecraft quirk
//! (§4.4).

use crate::crypto::Error;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut};
use cfb8::cipher::BlockSizeUser;
use cfb8::cipher::KeyIvInit;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

pub type Aes128Cfb8Enc = cfb8::Encryptor<aes::Aes128>;
pub type Aes128Cfb8Dec = cfb8::Decryptor<aes::Aes128>;

/// Creates a cipher pair for a shared secret. Both ciphers use the secret as key and IV.
pub fn create_ciphers(shared_secret: &[u8]) -> Result<(Aes128Cfb8Enc, Aes128Cfb8Dec), Error> {
    let encryptor = Aes128Cfb8Enc::new_from_slices(shared_secret, shared_secret)?;
    let decryptor = Aes128Cfb8Dec::new_from_slices(shared_secret, shared_secret)?;
    Ok((encryptor, decryptor))
}

/// Wraps an `AsyncRead`/`AsyncWrite` such that every byte read or written is transformed through
/// the provided block cipher, or passed through untouched while no cipher is set (§3's "cipher
/// state (disabled, or AES-CFB8 key material for each direction)").
pub struct CipherStream<S, E, D> {
    inner: S,
    encryptor: Option<E>,
    decryptor: Option<D>,
}

impl<S, E, D> CipherStream<S, E, D> {
    pub fn new(inner: S, encryptor: Option<E>, decryptor: Option<D>) -> Self {
        Self {
            inner,
            encryptor,
            decryptor,
        }
    }

    pub fn from_stream(inner: S) -> Self {
        Self::new(inner, None, None)
    }

    pub fn set_encryption(&mut self, encryptor: Option<E>, decryptor: Option<D>) {
        self.encryptor = encryptor;
        self.decryptor = decryptor;
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryptor.is_some()
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S> CipherStream<S, Aes128Cfb8Enc, Aes128Cfb8Dec> {
    pub fn from_secret(inner: S, shared_secret: &[u8]) -> Result<Self, Error> {
        let (encryptor, decryptor) = create_ciphers(shared_secret)?;
        Ok(Self::new(inner, Some(encryptor), Some(decryptor)))
    }
}

impl<S, E, D> AsyncWrite for CipherStream<S, E, D>
where
    S: AsyncWrite + Unpin,
    E: BlockEncryptMut + Unpin,
    D: BlockDecryptMut + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, std::io::Error>> {
        let self_mut = self.get_mut();

        let Some(enc) = &mut self_mut.encryptor else {
            return Pin::new(&mut self_mut.inner).poll_write(cx, buf);
        };

        let mut buf = buf.to_vec();
        for chunk in buf.chunks_mut(Aes128Cfb8Enc::block_size()) {
            let gen_arr = GenericArray::from_mut_slice(chunk);
            enc.encrypt_block_mut(gen_arr);
        }

        Pin::new(&mut self_mut.inner).poll_write(cx, &buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), std::io::Error>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl<S, E, D> AsyncRead for CipherStream<S, E, D>
where
    S: AsyncRead + Unpin,
    E: BlockEncryptMut + Unpin,
    D: BlockDecryptMut + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let self_mut = self.get_mut();

        let Some(dec) = &mut self_mut.decryptor else {
            return Pin::new(&mut self_mut.inner).poll_read(cx, buf);
        };

        let cursor = buf.capacity() - buf.remaining();
        let poll_result = Pin::new(&mut self_mut.inner).poll_read(cx, buf);

        if poll_result.is_ready() {
            for chunk in buf.filled_mut()[cursor..].chunks_mut(Aes128Cfb8Dec::block_size()) {
                let gen_arr = GenericArray::from_mut_slice(chunk);
                dec.decrypt_block_mut(gen_arr);
            }
        }

        poll_result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const SHARED_SECRET: &[u8; 16] = b"verysecuresecret";

    #[tokio::test]
    async fn without_encryption_passes_bytes_through() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut server: CipherStream<_, Aes128Cfb8Enc, Aes128Cfb8Dec> =
            CipherStream::from_stream(server);

        client.write_all(b"hello").await.unwrap();
        drop(client);

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"hello");
    }

    #[tokio::test]
    async fn matching_ciphers_round_trip() {
        let (client, server) = tokio::io::duplex(1024);
        let mut client = CipherStream::from_secret(client, SHARED_SECRET).unwrap();
        let mut server = CipherStream::from_secret(server, SHARED_SECRET).unwrap();

        assert!(client.is_encrypted());
        assert!(server.is_encrypted());

        client.write_all(b"encrypted payload").await.unwrap();
        drop(client);

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"encrypted payload");
    }
}
