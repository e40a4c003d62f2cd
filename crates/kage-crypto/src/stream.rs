//! Chunked ChaCha20-Poly1305 payload encryption
//!
//! Sealed payload format (binary):
//! ```text
//! [chunk 0: ciphertext + 16-byte tag][chunk 1] ... [final chunk]
//! nonce(i) = i as 11-byte big-endian || last_flag (0x00, or 0x01 on the final chunk)
//! ```
//!
//! Every chunk but the last carries exactly 64 KiB of plaintext. The last
//! flag is bound into the nonce, so dropping trailing chunks leaves a stream
//! whose final chunk fails authentication.

use std::io::{self, Read, Write};

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use zeroize::Zeroizing;

use crate::error::{DecryptError, EncryptError};
use crate::{KEY_SIZE, TAG_SIZE};

/// Plaintext bytes per chunk (64 KiB).
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Sealed bytes per full chunk.
pub const ENCRYPTED_CHUNK_SIZE: usize = CHUNK_SIZE + TAG_SIZE;

/// Size of the random nonce written between header and payload.
pub const PAYLOAD_NONCE_SIZE: usize = 16;

/// The counter is 11 bytes wide.
const COUNTER_LIMIT: u128 = 1 << 88;

const LAST_CHUNK_FLAG: u8 = 0x01;

/// Per-stream cipher state: chunk counter plus whether the final chunk has
/// been processed. Drive it one chunk at a time from any I/O adapter.
pub struct Stream {
    aead: ChaCha20Poly1305,
    counter: u128,
    finished: bool,
}

impl Stream {
    pub fn new(payload_key: &Zeroizing<[u8; KEY_SIZE]>) -> Self {
        Self {
            aead: ChaCha20Poly1305::new((&**payload_key).into()),
            counter: 0,
            finished: false,
        }
    }

    /// Index of the next chunk to be sealed or opened.
    pub fn chunk_index(&self) -> u64 {
        self.counter as u64
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn nonce(&self, last: bool) -> Nonce {
        let mut nonce = Nonce::default();
        nonce[..11].copy_from_slice(&self.counter.to_be_bytes()[5..]);
        if last {
            nonce[11] = LAST_CHUNK_FLAG;
        }
        nonce
    }

    fn advance(&mut self, last: bool) -> bool {
        if last {
            self.finished = true;
            return true;
        }
        self.counter += 1;
        self.counter < COUNTER_LIMIT
    }

    /// Seal one plaintext chunk. Non-final chunks must be exactly `CHUNK_SIZE`.
    pub fn seal_chunk(&mut self, chunk: &[u8], last: bool) -> Result<Vec<u8>, EncryptError> {
        if self.finished {
            return Err(EncryptError::StreamFinished);
        }
        if (!last && chunk.len() != CHUNK_SIZE) || chunk.len() > CHUNK_SIZE {
            return Err(EncryptError::ChunkSize {
                expected: CHUNK_SIZE,
                actual: chunk.len(),
            });
        }

        let sealed = self
            .aead
            .encrypt(&self.nonce(last), chunk)
            .map_err(|e| EncryptError::Wrap(format!("chunk encryption failed: {e}")))?;

        if !self.advance(last) {
            return Err(EncryptError::StreamExhausted);
        }
        Ok(sealed)
    }

    /// Open one sealed chunk, checking it against the expected position.
    pub fn open_chunk(&mut self, sealed: &[u8], last: bool) -> Result<Vec<u8>, DecryptError> {
        if self.finished {
            return Err(DecryptError::TrailingData);
        }
        let index = self.chunk_index();
        if sealed.len() < TAG_SIZE || sealed.len() > ENCRYPTED_CHUNK_SIZE {
            return Err(DecryptError::ChunkAuth(index));
        }
        if !last && sealed.len() != ENCRYPTED_CHUNK_SIZE {
            return Err(DecryptError::Truncated);
        }

        let plaintext = self
            .aead
            .decrypt(&self.nonce(last), sealed)
            .map_err(|_| DecryptError::ChunkAuth(index))?;

        if last && plaintext.is_empty() && index != 0 {
            // Only an empty payload may end on an empty chunk.
            return Err(DecryptError::ChunkAuth(index));
        }
        if !self.advance(last) {
            return Err(DecryptError::ChunkAuth(index));
        }
        Ok(plaintext)
    }

    /// Would this full-size chunk authenticate as a non-final chunk?
    fn opens_as_intermediate(&self, sealed: &[u8]) -> bool {
        sealed.len() == ENCRYPTED_CHUNK_SIZE
            && self.aead.decrypt(&self.nonce(false), sealed).is_ok()
    }
}

/// Streaming payload encryptor. Call [`StreamWriter::finish`] to seal the final chunk.
pub struct StreamWriter<W: Write> {
    inner: W,
    stream: Stream,
    chunk: Zeroizing<Vec<u8>>,
}

impl<W: Write> StreamWriter<W> {
    pub fn new(inner: W, payload_key: &Zeroizing<[u8; KEY_SIZE]>) -> Self {
        Self {
            inner,
            stream: Stream::new(payload_key),
            chunk: Zeroizing::new(Vec::with_capacity(CHUNK_SIZE)),
        }
    }

    fn seal_pending(&mut self, last: bool) -> io::Result<()> {
        let sealed = self
            .stream
            .seal_chunk(&self.chunk, last)
            .map_err(io::Error::other)?;
        self.inner.write_all(&sealed)?;
        self.chunk.clear();
        Ok(())
    }

    /// Seal the buffered tail as the final chunk and return the inner writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.seal_pending(true)?;
        tracing::trace!(chunks = self.stream.chunk_index() + 1, "payload sealed");
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for StreamWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut written = 0;
        while written < buf.len() {
            // A full buffer is only known to be non-final once more data arrives.
            if self.chunk.len() == CHUNK_SIZE {
                self.seal_pending(false)?;
            }
            let take = (CHUNK_SIZE - self.chunk.len()).min(buf.len() - written);
            self.chunk.extend_from_slice(&buf[written..written + take]);
            written += take;
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Streaming payload decryptor.
///
/// Each chunk is released only after it authenticates, but a stream is only
/// trustworthy once `read` has returned `Ok(0)`: that is when the final chunk
/// has been verified. Callers that need all-or-nothing semantics must buffer.
pub struct StreamReader<R: Read> {
    inner: R,
    stream: Stream,
    sealed: Vec<u8>,
    plaintext: Zeroizing<Vec<u8>>,
    pos: usize,
}

impl<R: Read> StreamReader<R> {
    pub fn new(inner: R, payload_key: &Zeroizing<[u8; KEY_SIZE]>) -> Self {
        Self {
            inner,
            stream: Stream::new(payload_key),
            sealed: Vec::with_capacity(ENCRYPTED_CHUNK_SIZE + 1),
            plaintext: Zeroizing::new(Vec::new()),
            pos: 0,
        }
    }

    /// Read until one byte past a full sealed chunk is buffered, or EOF.
    fn fill_sealed(&mut self) -> io::Result<()> {
        while self.sealed.len() <= ENCRYPTED_CHUNK_SIZE {
            let start = self.sealed.len();
            self.sealed.resize(ENCRYPTED_CHUNK_SIZE + 1, 0);
            let read = self.inner.read(&mut self.sealed[start..]);
            match read {
                Ok(0) => {
                    self.sealed.truncate(start);
                    break;
                }
                Ok(n) => self.sealed.truncate(start + n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => self.sealed.truncate(start),
                Err(e) => {
                    self.sealed.truncate(start);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn next_chunk(&mut self) -> Result<(), DecryptError> {
        self.fill_sealed()?;
        self.pos = 0;

        if self.sealed.len() > ENCRYPTED_CHUNK_SIZE {
            let plaintext = self
                .stream
                .open_chunk(&self.sealed[..ENCRYPTED_CHUNK_SIZE], false)?;
            self.sealed.drain(..ENCRYPTED_CHUNK_SIZE);
            self.plaintext = Zeroizing::new(plaintext);
            return Ok(());
        }

        if self.sealed.is_empty() {
            return Err(DecryptError::Truncated);
        }
        match self.stream.open_chunk(&self.sealed, true) {
            Ok(plaintext) => {
                self.sealed.clear();
                self.plaintext = Zeroizing::new(plaintext);
                tracing::trace!(chunks = self.stream.chunk_index() + 1, "payload verified");
                Ok(())
            }
            Err(DecryptError::ChunkAuth(_)) if self.stream.opens_as_intermediate(&self.sealed) => {
                Err(DecryptError::Truncated)
            }
            Err(e) => Err(e),
        }
    }
}

impl<R: Read> Read for StreamReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos == self.plaintext.len() {
            if self.stream.is_finished() {
                return Ok(0);
            }
            self.next_chunk().map_err(DecryptError::into_io)?;
        }
        let n = (self.plaintext.len() - self.pos).min(buf.len());
        buf[..n].copy_from_slice(&self.plaintext[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
