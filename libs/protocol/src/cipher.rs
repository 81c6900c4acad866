//! AES-128/CFB8 stream cipher layered over an async transport.
//!
//! The cipher is off until [`CipherStream::enable`] is called with the
//! 16-byte shared secret, which doubles as the IV. From then on every byte
//! read is decrypted and every byte written is encrypted, each direction
//! carrying its own continuous CFB8 state.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use aes::cipher::{generic_array::GenericArray, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes128;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::error::CipherError;

type Encryptor = cfb8::Encryptor<Aes128>;
type Decryptor = cfb8::Decryptor<Aes128>;

const KEY_LEN: usize = 16;

struct Cipher {
    encryptor: Box<Encryptor>,
    decryptor: Box<Decryptor>,
}

impl Cipher {
    fn new(key: &[u8]) -> Result<Self, CipherError> {
        let invalid = |_| CipherError::InvalidKeyLength(key.len());
        Ok(Self {
            encryptor: Box::new(Encryptor::new_from_slices(key, key).map_err(invalid)?),
            decryptor: Box::new(Decryptor::new_from_slices(key, key).map_err(invalid)?),
        })
    }

    fn encrypt(&mut self, data: &mut [u8]) {
        for byte in data.chunks_mut(1) {
            self.encryptor
                .encrypt_block_mut(GenericArray::from_mut_slice(byte));
        }
    }

    fn decrypt(&mut self, data: &mut [u8]) {
        for byte in data.chunks_mut(1) {
            self.decryptor
                .decrypt_block_mut(GenericArray::from_mut_slice(byte));
        }
    }
}

/// Transport wrapper that becomes encrypting once enabled.
pub struct CipherStream<S> {
    inner: S,
    cipher: Option<Cipher>,
    /// Ciphertext accepted from the caller but not yet written to `inner`.
    pending: Vec<u8>,
    written: usize,
}

impl<S> CipherStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            cipher: None,
            pending: Vec::new(),
            written: 0,
        }
    }

    /// Install the cipher. Fails if the key is not 16 bytes or a cipher is
    /// already installed.
    pub fn enable(&mut self, shared_secret: &[u8]) -> Result<(), CipherError> {
        if self.cipher.is_some() {
            return Err(CipherError::AlreadyEnabled);
        }
        if shared_secret.len() != KEY_LEN {
            return Err(CipherError::InvalidKeyLength(shared_secret.len()));
        }
        self.cipher = Some(Cipher::new(shared_secret)?);
        Ok(())
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Decrypt bytes that were read from `inner` before the cipher was
    /// enabled but not yet consumed.
    pub fn decrypt_buffered(&mut self, data: &mut [u8]) {
        if let Some(cipher) = self.cipher.as_mut() {
            cipher.decrypt(data);
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }
}

impl<S: AsyncWrite + Unpin> CipherStream<S> {
    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while self.written < self.pending.len() {
            let n = ready!(Pin::new(&mut self.inner).poll_write(cx, &self.pending[self.written..]))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            self.written += n;
        }
        self.pending.clear();
        self.written = 0;
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for CipherStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        if let Some(cipher) = this.cipher.as_mut() {
            cipher.decrypt(&mut buf.filled_mut()[before..]);
        }
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for CipherStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.cipher.is_none() {
            return Pin::new(&mut this.inner).poll_write(cx, buf);
        }
        if this.written < this.pending.len() {
            ready!(this.poll_drain(cx))?;
        }
        // Encryption advances the cipher state, so everything encrypted
        // here must be reported as accepted.
        let start = this.pending.len();
        this.pending.extend_from_slice(buf);
        if let Some(cipher) = this.cipher.as_mut() {
            cipher.encrypt(&mut this.pending[start..]);
        }
        if let Poll::Ready(Err(err)) = this.poll_drain(cx) {
            return Poll::Ready(Err(err));
        }
        Poll::Ready(Ok(buf.len()))
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
