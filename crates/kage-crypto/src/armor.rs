//! ASCII armor: a PEM-style text envelope around the binary container.
//!
//! ```text
//! -----BEGIN AGE ENCRYPTED FILE-----
//! <padded standard base64, 64 columns per line, last line 1..=64 columns>
//! -----END AGE ENCRYPTED FILE-----
//! ```
//!
//! Whitespace before the begin marker and after the end marker is tolerated.
//! Anything else that deviates from the fixed layout is treated as corruption.

use std::io::{self, BufRead, Read, Write};

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::error::FormatError;

pub const BEGIN_MARKER: &str = "-----BEGIN AGE ENCRYPTED FILE-----";
pub const END_MARKER: &str = "-----END AGE ENCRYPTED FILE-----";

/// Width of a full armor line.
pub const ARMOR_COLUMNS: usize = 64;

/// Raw bytes carried by one full armor line.
const BYTES_PER_LINE: usize = ARMOR_COLUMNS / 4 * 3;

/// Wrap a binary container in the armor envelope.
pub fn encode_armor(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 4 / 3 + 128);
    out.push_str(BEGIN_MARKER);
    out.push('\n');
    for chunk in bytes.chunks(BYTES_PER_LINE) {
        out.push_str(&STANDARD.encode(chunk));
        out.push('\n');
    }
    out.push_str(END_MARKER);
    out.push('\n');
    out
}

/// Unwrap an armored container back to its binary form.
pub fn decode_armor(text: &str) -> Result<Vec<u8>, FormatError> {
    let mut reader = ArmoredReader::new(text.as_bytes());
    let mut out = Vec::with_capacity(text.len() * 3 / 4);
    reader.read_to_end(&mut out).map_err(FormatError::from_io)?;
    Ok(out)
}

/// Does this look like the start of an armored container?
///
/// Only inspects the bytes given; leading whitespace is skipped.
pub fn is_armored(prefix: &[u8]) -> bool {
    let start = prefix
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(prefix.len());
    let rest = &prefix[start..];
    let marker = BEGIN_MARKER.as_bytes();
    let n = rest.len().min(marker.len());
    n > 0 && rest[..n] == marker[..n]
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, FormatError::Armor(msg.into()))
}

/// Streaming armor encoder. Call [`ArmoredWriter::finish`] to emit the end marker.
pub struct ArmoredWriter<W: Write> {
    inner: W,
    pending: Vec<u8>,
    started: bool,
}

impl<W: Write> ArmoredWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            pending: Vec::with_capacity(BYTES_PER_LINE),
            started: false,
        }
    }

    fn write_begin(&mut self) -> io::Result<()> {
        if !self.started {
            self.inner.write_all(BEGIN_MARKER.as_bytes())?;
            self.inner.write_all(b"\n")?;
            self.started = true;
        }
        Ok(())
    }

    fn write_line(&mut self) -> io::Result<()> {
        let line = STANDARD.encode(&self.pending);
        self.inner.write_all(line.as_bytes())?;
        self.inner.write_all(b"\n")?;
        self.pending.clear();
        Ok(())
    }

    /// Flush the final partial line and the end marker, returning the inner writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.write_begin()?;
        if !self.pending.is_empty() {
            self.write_line()?;
        }
        self.inner.write_all(END_MARKER.as_bytes())?;
        self.inner.write_all(b"\n")?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for ArmoredWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_begin()?;
        let mut written = 0;
        while written < buf.len() {
            let take = (BYTES_PER_LINE - self.pending.len()).min(buf.len() - written);
            self.pending.extend_from_slice(&buf[written..written + take]);
            written += take;
            if self.pending.len() == BYTES_PER_LINE {
                self.write_line()?;
            }
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    BeforeBegin,
    Body,
    /// A short line was seen; only the end marker may follow.
    LastLineSeen,
    Done,
}

/// Streaming armor decoder, one line at a time.
pub struct ArmoredReader<R: BufRead> {
    inner: R,
    state: ReadState,
    line: String,
    decoded: Vec<u8>,
    pos: usize,
}

impl<R: BufRead> ArmoredReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            state: ReadState::BeforeBegin,
            line: String::with_capacity(ARMOR_COLUMNS + 2),
            decoded: Vec::with_capacity(BYTES_PER_LINE),
            pos: 0,
        }
    }

    /// Read one line without its terminator. Returns false at EOF.
    fn next_line(&mut self) -> io::Result<bool> {
        self.line.clear();
        let mut raw = Vec::new();
        let n = self
            .inner
            .by_ref()
            .take(ARMOR_COLUMNS as u64 * 2)
            .read_until(b'\n', &mut raw)?;
        if n == 0 {
            return Ok(false);
        }
        if raw.last() == Some(&b'\n') {
            raw.pop();
            if raw.last() == Some(&b'\r') {
                raw.pop();
            }
        }
        let text = std::str::from_utf8(&raw).map_err(|_| invalid("armor is not ASCII"))?;
        self.line.push_str(text);
        Ok(true)
    }

    /// Advance until there is decoded data to hand out, or the end marker.
    fn fill(&mut self) -> io::Result<()> {
        self.decoded.clear();
        self.pos = 0;

        while self.decoded.is_empty() && self.state != ReadState::Done {
            let more = self.next_line()?;
            match self.state {
                ReadState::BeforeBegin => {
                    if !more {
                        return Err(invalid("missing begin marker"));
                    }
                    let trimmed = self.line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    if trimmed != BEGIN_MARKER {
                        return Err(invalid("missing begin marker"));
                    }
                    self.state = ReadState::Body;
                }
                ReadState::Body | ReadState::LastLineSeen => {
                    if !more {
                        return Err(invalid("missing end marker"));
                    }
                    if self.line == END_MARKER {
                        self.expect_only_whitespace()?;
                        self.state = ReadState::Done;
                        break;
                    }
                    if self.state == ReadState::LastLineSeen {
                        return Err(invalid("short line in the middle of the armor"));
                    }
                    if self.line.len() > ARMOR_COLUMNS {
                        return Err(invalid(format!(
                            "armor line is {} columns (maximum {ARMOR_COLUMNS})",
                            self.line.len()
                        )));
                    }
                    if self.line.is_empty() {
                        return Err(invalid("empty line in armor"));
                    }
                    STANDARD
                        .decode_vec(self.line.as_bytes(), &mut self.decoded)
                        .map_err(|e| invalid(format!("invalid base64 in armor: {e}")))?;
                    if self.line.len() < ARMOR_COLUMNS || self.decoded.len() < BYTES_PER_LINE {
                        self.state = ReadState::LastLineSeen;
                    }
                }
                ReadState::Done => unreachable!("loop exits once done"),
            }
        }
        Ok(())
    }

    fn expect_only_whitespace(&mut self) -> io::Result<()> {
        let mut rest = Vec::new();
        self.inner.read_to_end(&mut rest)?;
        if rest.iter().all(|b| b.is_ascii_whitespace()) {
            Ok(())
        } else {
            Err(invalid("trailing data after end marker"))
        }
    }
}

impl<R: BufRead> Read for ArmoredReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos == self.decoded.len() {
            if self.state == ReadState::Done {
                return Ok(0);
            }
            self.fill()?;
        }
        let n = (self.decoded.len() - self.pos).min(buf.len());
        buf[..n].copy_from_slice(&self.decoded[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
