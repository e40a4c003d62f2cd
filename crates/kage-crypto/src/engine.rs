//! Encrypt/decrypt orchestration
//!
//! Encrypt: file key → one stanza per recipient → header MAC → payload nonce → chunked payload.
//! Decrypt: (de-armor) → parse header → probe identities against stanzas → verify MAC → payload.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use rand::RngCore;
use tracing::debug;

use crate::armor::{is_armored, ArmoredReader, ArmoredWriter};
use crate::error::{DecryptError, EncryptError, FormatError};
use crate::format::{encode_header, Header, Stanza};
use crate::keys::{self, generate_file_key, FileKey};
use crate::recipient::{Identity, Recipient};
use crate::scrypt;
use crate::stream::{StreamReader, StreamWriter, PAYLOAD_NONCE_SIZE};

/// Where ciphertext goes: straight through, or via the armor encoder.
enum Output<W: Write> {
    Binary(W),
    Armored(ArmoredWriter<W>),
}

impl<W: Write> Output<W> {
    fn finish(self) -> io::Result<W> {
        match self {
            Output::Binary(mut w) => {
                w.flush()?;
                Ok(w)
            }
            Output::Armored(w) => w.finish(),
        }
    }
}

impl<W: Write> Write for Output<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Output::Binary(w) => w.write(buf),
            Output::Armored(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Output::Binary(w) => w.flush(),
            Output::Armored(w) => w.flush(),
        }
    }
}

/// Plaintext sink returned by [`encrypt_to_writer`].
///
/// Nothing is authenticated until [`EncryptWriter::finish`] seals the final chunk.
pub struct EncryptWriter<W: Write> {
    stream: StreamWriter<Output<W>>,
}

impl<W: Write> EncryptWriter<W> {
    pub fn finish(self) -> io::Result<W> {
        self.stream.finish()?.finish()
    }
}

impl<W: Write> Write for EncryptWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

/// Wrap a fresh file key to every recipient and serialize the header.
fn build_header<R: Recipient>(recipients: &[R]) -> Result<(FileKey, Vec<u8>), EncryptError> {
    if recipients.is_empty() {
        return Err(EncryptError::NoRecipients);
    }
    if recipients.len() > 1 && recipients.iter().any(|r| r.is_exclusive()) {
        return Err(EncryptError::MixedRecipientAndPassphrase);
    }

    let file_key = generate_file_key();
    let stanzas = recipients
        .iter()
        .map(|r| r.wrap_file_key(&file_key))
        .collect::<Result<Vec<Stanza>, _>>()?;
    let mac = keys::header_mac(&file_key, &stanzas);
    debug!(stanzas = stanzas.len(), "header built");

    Ok((file_key, encode_header(&stanzas, &mac)))
}

/// Write the header and payload nonce to `output` and return a writer that
/// encrypts everything written to it.
pub fn encrypt_to_writer<R: Recipient, W: Write>(
    recipients: &[R],
    output: W,
    armored: bool,
) -> Result<EncryptWriter<W>, EncryptError> {
    let (file_key, header) = build_header(recipients)?;

    let mut output = if armored {
        Output::Armored(ArmoredWriter::new(output))
    } else {
        Output::Binary(output)
    };
    output.write_all(&header)?;

    let mut nonce = [0u8; PAYLOAD_NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);
    output.write_all(&nonce)?;

    let payload_key = keys::derive_payload_key(&file_key, &nonce);
    Ok(EncryptWriter {
        stream: StreamWriter::new(output, &payload_key),
    })
}

/// Leading whitespace looked through before giving up on finding armor.
const MAX_LEADING_WHITESPACE: usize = 1024;

/// Skip leading whitespace across short reads and check whether the first
/// significant bytes start the armor marker. The skipped bytes are handed
/// back so binary input can be replayed unchanged.
fn sniff_armor<R: BufRead>(input: &mut R) -> io::Result<(bool, Vec<u8>)> {
    let mut skipped = Vec::new();
    loop {
        let buf = input.fill_buf()?;
        if buf.is_empty() {
            return Ok((false, skipped));
        }
        let whitespace = buf.iter().take_while(|b| b.is_ascii_whitespace()).count();
        if whitespace < buf.len() {
            let armored = is_armored(&buf[whitespace..]);
            skipped.extend_from_slice(&buf[..whitespace]);
            input.consume(whitespace);
            return Ok((armored, skipped));
        }
        skipped.extend_from_slice(buf);
        input.consume(whitespace);
        if skipped.len() > MAX_LEADING_WHITESPACE {
            return Ok((false, skipped));
        }
    }
}

/// Where ciphertext comes from: the raw bytes, or the armor decoder.
enum Input<R: Read> {
    Binary(io::Chain<io::Cursor<Vec<u8>>, BufReader<R>>),
    Armored(BufReader<ArmoredReader<BufReader<R>>>),
}

impl<R: Read> Read for Input<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Input::Binary(r) => r.read(buf),
            Input::Armored(r) => r.read(buf),
        }
    }
}

impl<R: Read> BufRead for Input<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        match self {
            Input::Binary(r) => r.fill_buf(),
            Input::Armored(r) => r.fill_buf(),
        }
    }

    fn consume(&mut self, amt: usize) {
        match self {
            Input::Binary(r) => r.consume(amt),
            Input::Armored(r) => r.consume(amt),
        }
    }
}

/// Armor failures arrive wrapped in the I/O errors of the decoder.
fn classify_header_error(err: FormatError) -> FormatError {
    match err {
        FormatError::Io(e) => FormatError::from_io(e),
        other => other,
    }
}

/// A parsed container whose file key has not been recovered yet.
pub struct Decryptor<R: Read> {
    input: Input<R>,
    header: Header,
}

impl<R: Read> Decryptor<R> {
    /// Detect armor and parse the header. The payload is not touched.
    pub fn new(input: R) -> Result<Self, DecryptError> {
        let mut buffered = BufReader::new(input);
        let (armored, skipped) = sniff_armor(&mut buffered)?;
        let mut input = if armored {
            Input::Armored(BufReader::new(ArmoredReader::new(buffered)))
        } else {
            Input::Binary(io::Cursor::new(skipped).chain(buffered))
        };

        let header = Header::read(&mut input).map_err(classify_header_error)?;
        debug!(armored, stanzas = header.stanzas.len(), "header parsed");
        Ok(Self { input, header })
    }

    pub fn stanzas(&self) -> &[Stanza] {
        &self.header.stanzas
    }

    /// Whether the container is passphrase-encrypted.
    pub fn is_scrypt(&self) -> bool {
        self.header
            .stanzas
            .iter()
            .any(|s| s.tag == scrypt::STANZA_TAG)
    }

    /// Probe every identity against every stanza (stanza order first) and,
    /// once a file key is found and the header MAC checks out, return a
    /// reader over the plaintext.
    pub fn decrypt<I: Identity>(
        mut self,
        identities: &[I],
    ) -> Result<DecryptReader<R>, DecryptError> {
        if identities.is_empty() {
            return Err(DecryptError::NoIdentities);
        }
        if self.is_scrypt() && self.header.stanzas.len() != 1 {
            return Err(DecryptError::InvalidHeader(
                "an scrypt stanza must be the only stanza in the header".into(),
            ));
        }

        let mut file_key = None;
        'probe: for stanza in &self.header.stanzas {
            for identity in identities {
                match identity.unwrap_stanza(stanza) {
                    None => continue,
                    Some(Ok(key)) => {
                        debug!(tag = %stanza.tag, "file key recovered");
                        file_key = Some(key);
                        break 'probe;
                    }
                    Some(Err(e)) => {
                        debug!(
                            tag = %stanza.tag,
                            error = %e,
                            "stanza matched but failed to unwrap"
                        );
                        return Err(e);
                    }
                }
            }
        }
        let file_key = file_key.ok_or(DecryptError::NoMatchingKeys)?;

        keys::verify_header_mac(&file_key, &self.header.stanzas, &self.header.mac)?;

        let mut nonce = [0u8; PAYLOAD_NONCE_SIZE];
        self.input.read_exact(&mut nonce).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => DecryptError::Truncated,
            _ => DecryptError::from_io(e),
        })?;

        let payload_key = keys::derive_payload_key(&file_key, &nonce);
        Ok(DecryptReader {
            inner: StreamReader::new(self.input, &payload_key),
        })
    }
}

/// Plaintext source returned by [`Decryptor::decrypt`].
///
/// The plaintext is only complete and authentic once `read` returns `Ok(0)`.
pub struct DecryptReader<R: Read> {
    inner: StreamReader<Input<R>>,
}

impl<R: Read> Read for DecryptReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

/// Encrypt an in-memory plaintext.
pub fn encrypt<R: Recipient>(
    plaintext: &[u8],
    recipients: &[R],
    armored: bool,
) -> Result<Vec<u8>, EncryptError> {
    let output = Vec::with_capacity(plaintext.len() + 512);
    let mut writer = encrypt_to_writer(recipients, output, armored)?;
    writer.write_all(plaintext)?;
    Ok(writer.finish()?)
}

/// Decrypt an in-memory ciphertext (binary or armored).
///
/// All-or-nothing: no plaintext is returned unless the final chunk authenticates.
pub fn decrypt<I: Identity>(
    ciphertext: &[u8],
    identities: &[I],
) -> Result<Vec<u8>, DecryptError> {
    let mut reader = Decryptor::new(ciphertext)?.decrypt(identities)?;
    let mut plaintext = Vec::with_capacity(ciphertext.len());
    reader
        .read_to_end(&mut plaintext)
        .map_err(DecryptError::from_io)?;
    Ok(plaintext)
}

/// Encrypt everything `input` yields into `output`.
pub fn encrypt_io<R: Recipient>(
    mut input: impl Read,
    output: impl Write,
    recipients: &[R],
    armored: bool,
) -> Result<(), EncryptError> {
    let mut writer = encrypt_to_writer(recipients, output, armored)?;
    io::copy(&mut input, &mut writer)?;
    writer.finish()?;
    Ok(())
}

/// Decrypt `input` into `output`, one authenticated chunk at a time.
///
/// On error, `output` may already hold plaintext from earlier chunks and
/// must be discarded by the caller.
pub fn decrypt_io<I: Identity>(
    input: impl Read,
    mut output: impl Write,
    identities: &[I],
) -> Result<u64, DecryptError> {
    let mut reader = Decryptor::new(input)?.decrypt(identities)?;
    let written = io::copy(&mut reader, &mut output).map_err(DecryptError::from_io)?;
    output.flush()?;
    Ok(written)
}

/// Path-based [`encrypt_io`]. A failed run leaves no output file behind.
pub fn encrypt_file<R: Recipient>(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    recipients: &[R],
    armored: bool,
) -> Result<(), EncryptError> {
    let output = output.as_ref();
    let source = File::open(input.as_ref())?;
    let sink = BufWriter::new(File::create(output)?);
    encrypt_io(source, sink, recipients, armored).inspect_err(|_| {
        let _ = fs::remove_file(output);
    })
}

/// Path-based [`decrypt_io`]. A failed run leaves no output file behind.
pub fn decrypt_file<I: Identity>(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    identities: &[I],
) -> Result<u64, DecryptError> {
    let output = output.as_ref();
    let source = File::open(input.as_ref())?;
    let sink = BufWriter::new(File::create(output)?);
    decrypt_io(source, sink, identities).inspect_err(|_| {
        let _ = fs::remove_file(output);
    })
}
