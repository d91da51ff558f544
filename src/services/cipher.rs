//! Streaming AES-256-CFB codec for stored object payloads.
//!
//! Every stored object is laid out as `[16-byte IV][ciphertext]`. The IV is
//! random per object and the ciphertext has exactly the plaintext's length,
//! so the on-disk size is always `plaintext + IV_LEN`.
//!
//! Both directions work on whatever chunk the caller hands over; nothing here
//! buffers a whole file.

use aes::Aes256;
use cfb_mode::{BufDecryptor, BufEncryptor, cipher::KeyIvInit};
use rand::Rng;
use std::{
    fmt, io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, ready},
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tracing::warn;

/// AES block size, which is also the IV length written in front of each object.
pub const IV_LEN: usize = 16;

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;

/// Upper bound on the plaintext accepted by a single `poll_write`.
const MAX_WRITE_CHUNK: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("storage key is not valid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("storage key must be 32 bytes, got {0}")]
    Length(usize),
}

/// The process-wide object encryption key.
///
/// `Debug` never prints key material.
#[derive(Clone, PartialEq, Eq)]
pub struct StorageKey([u8; KEY_LEN]);

impl StorageKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a 64-character hex string.
    pub fn from_hex(value: &str) -> Result<Self, KeyError> {
        let raw = hex::decode(value.trim())?;
        let bytes: [u8; KEY_LEN] = raw
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::Length(raw.len()))?;
        Ok(Self(bytes))
    }

    pub fn generate() -> Self {
        Self(rand::rng().random())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StorageKey(<redacted>)")
    }
}

/// Use the configured key, or mint a fresh one and print it once so the
/// operator can persist it.
///
/// Objects written under a generated key are unreadable after a restart unless
/// that key is configured from then on.
pub fn provision_key(configured: Option<StorageKey>) -> StorageKey {
    match configured {
        Some(key) => key,
        None => {
            let key = StorageKey::generate();
            warn!(
                storage_key = %key.to_hex(),
                "no storage key configured; generated a random one. Set FILEBOX_STORAGE_KEY to this value or stored files will be unreadable after restart"
            );
            key
        }
    }
}

/// Builds encrypting sinks and decrypting sources around a shared key.
#[derive(Clone, Debug)]
pub struct CipherCodec {
    key: Arc<StorageKey>,
}

impl CipherCodec {
    pub fn new(key: StorageKey) -> Self {
        Self { key: Arc::new(key) }
    }

    /// Write a fresh IV to `dest` and return a writer that encrypts everything
    /// passed through it. Call [`EncryptingWriter::finish`] once done.
    pub async fn open_encrypting_sink<W>(&self, mut dest: W) -> io::Result<EncryptingWriter<W>>
    where
        W: AsyncWrite + Unpin,
    {
        let iv: [u8; IV_LEN] = rand::rng().random();
        let cipher = BufEncryptor::<Aes256>::new_from_slices(self.key.as_bytes(), &iv)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid cipher key length"))?;
        dest.write_all(&iv).await?;

        Ok(EncryptingWriter {
            inner: dest,
            cipher,
            pending: Vec::new(),
            drained: 0,
        })
    }

    /// Consume the IV prefix of `source` and return a plaintext reader.
    pub async fn open_decrypting_source<R>(&self, mut source: R) -> io::Result<DecryptingReader<R>>
    where
        R: AsyncRead + Unpin,
    {
        let mut iv = [0u8; IV_LEN];
        source.read_exact(&mut iv).await.map_err(|err| {
            if err.kind() == io::ErrorKind::UnexpectedEof {
                io::Error::new(io::ErrorKind::InvalidData, "stored object is missing its IV")
            } else {
                err
            }
        })?;
        let cipher = BufDecryptor::<Aes256>::new_from_slices(self.key.as_bytes(), &iv)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid cipher key length"))?;

        Ok(DecryptingReader {
            inner: source,
            cipher,
        })
    }
}

/// `AsyncWrite` adapter that encrypts into the wrapped writer.
///
/// Accepted plaintext is encrypted immediately into `pending`; the ciphertext
/// is drained into `inner` before any further plaintext is accepted.
pub struct EncryptingWriter<W> {
    inner: W,
    cipher: BufEncryptor<Aes256>,
    pending: Vec<u8>,
    drained: usize,
}

impl<W: AsyncWrite + Unpin> EncryptingWriter<W> {
    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while self.drained < self.pending.len() {
            let n = ready!(Pin::new(&mut self.inner).poll_write(cx, &self.pending[self.drained..]))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            self.drained += n;
        }
        self.pending.clear();
        self.drained = 0;
        Poll::Ready(Ok(()))
    }

    /// Drain any buffered ciphertext, flush, and hand back the destination.
    pub async fn finish(mut self) -> io::Result<W> {
        self.flush().await?;
        Ok(self.inner)
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for EncryptingWriter<W> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let take = buf.len().min(MAX_WRITE_CHUNK);
        this.pending.extend_from_slice(&buf[..take]);
        this.cipher.encrypt(&mut this.pending);

        // The bytes are accepted either way; a pending drain resumes on the next poll.
        if let Poll::Ready(Err(err)) = this.poll_drain(cx) {
            return Poll::Ready(Err(err));
        }
        Poll::Ready(Ok(take))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}

/// `AsyncRead` adapter that decrypts bytes in place as they arrive.
pub struct DecryptingReader<R> {
    inner: R,
    cipher: BufDecryptor<Aes256>,
}

impl<R: AsyncRead + Unpin> AsyncRead for DecryptingReader<R> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        this.cipher.decrypt(&mut buf.filled_mut()[before..]);
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> CipherCodec {
        CipherCodec::new(StorageKey::from_bytes([7u8; KEY_LEN]))
    }

    async fn encrypt(codec: &CipherCodec, plaintext: &[u8]) -> Vec<u8> {
        let mut sink = codec.open_encrypting_sink(Vec::new()).await.unwrap();
        // Uneven pieces exercise the cipher's partial-block state.
        for piece in plaintext.chunks(7) {
            sink.write_all(piece).await.unwrap();
        }
        sink.finish().await.unwrap()
    }

    async fn decrypt(codec: &CipherCodec, ciphertext: &[u8]) -> Vec<u8> {
        let mut source = codec.open_decrypting_source(ciphertext).await.unwrap();
        let mut out = Vec::new();
        source.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn round_trip_preserves_bytes_and_adds_iv_only() {
        let codec = codec();
        for len in [0usize, 1, 15, 16, 17, 1000, MAX_WRITE_CHUNK + 3] {
            let plaintext: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let ciphertext = encrypt(&codec, &plaintext).await;
            assert_eq!(ciphertext.len(), plaintext.len() + IV_LEN, "len {len}");
            assert_eq!(decrypt(&codec, &ciphertext).await, plaintext, "len {len}");
        }
    }

    #[tokio::test]
    async fn each_object_gets_its_own_iv() {
        let codec = codec();
        let a = encrypt(&codec, b"same plaintext").await;
        let b = encrypt(&codec, b"same plaintext").await;
        assert_ne!(a[..IV_LEN], b[..IV_LEN]);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn ciphertext_does_not_contain_plaintext() {
        let codec = codec();
        let plaintext = b"attack at dawn, attack at dawn";
        let ciphertext = encrypt(&codec, plaintext).await;
        assert_ne!(&ciphertext[IV_LEN..], plaintext.as_slice());
    }

    #[tokio::test]
    async fn wrong_key_yields_garbage() {
        let ciphertext = encrypt(&codec(), b"top secret payload").await;
        let other = CipherCodec::new(StorageKey::from_bytes([9u8; KEY_LEN]));
        assert_ne!(decrypt(&other, &ciphertext).await, b"top secret payload");
    }

    #[tokio::test]
    async fn truncated_iv_is_rejected() {
        let result = codec().open_decrypting_source(&[1u8, 2, 3][..]).await;
        let err = result.err().expect("short input must fail");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn key_parsing() {
        let key = StorageKey::generate();
        assert_eq!(StorageKey::from_hex(&key.to_hex()).unwrap(), key);
        assert!(matches!(StorageKey::from_hex("zz"), Err(KeyError::Hex(_))));
        assert!(matches!(StorageKey::from_hex("abcd"), Err(KeyError::Length(2))));
        assert_eq!(format!("{key:?}"), "StorageKey(<redacted>)");
    }

    #[test]
    fn configured_key_wins_over_generation() {
        let key = StorageKey::from_bytes([1u8; KEY_LEN]);
        assert_eq!(provision_key(Some(key.clone())), key);
        assert_ne!(provision_key(None), key);
    }
}
