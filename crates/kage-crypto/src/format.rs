//! Header codec
//!
//! Binary header layout (all lines end in `\n`):
//! ```text
//! age-encryption.org/v1
//! -> <type> <arg> <arg>...
//! <base64 body, 64 columns per line; the final line is shorter, possibly empty>
//! -> ...
//! --- <base64 HMAC-SHA256 of everything up to and including "---">
//! ```
//!
//! Base64 is the standard alphabet without padding and must be canonical.
//! The parser is strict so that re-encoding a parsed header reproduces the
//! exact bytes the MAC was computed over.

use std::io::{BufRead, Read};

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};

use crate::error::FormatError;

pub const VERSION_LINE: &str = "age-encryption.org/v1";

/// Width of a full stanza body line.
pub const BODY_COLUMNS: usize = 64;

/// Size of the header MAC (HMAC-SHA256).
pub const MAC_SIZE: usize = 32;

const STANZA_PREFIX: &str = "->";
const MAC_PREFIX: &str = "---";

/// Longest header line accepted before the input is declared malformed.
const MAX_LINE_LEN: u64 = 16 * 1024;

/// One recipient's wrapping of the file key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stanza {
    pub tag: String,
    pub args: Vec<String>,
    pub body: Vec<u8>,
}

impl Stanza {
    pub fn new(tag: impl Into<String>, args: Vec<String>, body: Vec<u8>) -> Self {
        Self {
            tag: tag.into(),
            args,
            body,
        }
    }
}

/// A parsed (or freshly built) container header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub stanzas: Vec<Stanza>,
    pub mac: [u8; MAC_SIZE],
}

impl Header {
    pub fn encode(&self) -> Vec<u8> {
        encode_header(&self.stanzas, &self.mac)
    }

    /// Parse a header from the front of `reader`, leaving it positioned at
    /// the first byte after the MAC line.
    pub fn read<R: BufRead>(reader: &mut R) -> Result<Self, FormatError> {
        let mut line = String::new();

        read_line(reader, &mut line)?;
        if line != VERSION_LINE {
            return Err(FormatError::UnknownVersion(truncate_for_display(&line)));
        }

        let mut stanzas = Vec::new();
        loop {
            read_line(reader, &mut line)?;

            if let Some(rest) = line.strip_prefix(MAC_PREFIX) {
                let mac = parse_mac(rest)?;
                return Ok(Header { stanzas, mac });
            }

            let Some(rest) = line.strip_prefix(STANZA_PREFIX) else {
                return Err(FormatError::InvalidStanza(format!(
                    "expected a stanza or MAC line, got {:?}",
                    truncate_for_display(&line)
                )));
            };
            let (tag, args) = parse_stanza_line(rest)?;
            let body = read_body(reader, &mut line)?;
            stanzas.push(Stanza { tag, args, body });
        }
    }
}

/// Serialize the header, MAC line included.
pub fn encode_header(stanzas: &[Stanza], mac: &[u8; MAC_SIZE]) -> Vec<u8> {
    let mut out = mac_input(stanzas);
    out.push(b' ');
    out.extend_from_slice(STANZA_BODY.encode(mac).as_bytes());
    out.push(b'\n');
    out
}

/// Parse a header from an in-memory buffer.
///
/// Returns the header and the number of bytes it occupied.
pub fn decode_header(bytes: &[u8]) -> Result<(Header, usize), FormatError> {
    let mut cursor = bytes;
    let header = Header::read(&mut cursor)?;
    Ok((header, bytes.len() - cursor.len()))
}

/// The bytes the header MAC covers: everything up to and including `---`.
pub fn mac_input(stanzas: &[Stanza]) -> Vec<u8> {
    let mut out = Vec::with_capacity(64 + stanzas.len() * 128);
    out.extend_from_slice(VERSION_LINE.as_bytes());
    out.push(b'\n');

    for stanza in stanzas {
        out.extend_from_slice(STANZA_PREFIX.as_bytes());
        for arg in std::iter::once(&stanza.tag).chain(&stanza.args) {
            out.push(b' ');
            out.extend_from_slice(arg.as_bytes());
        }
        out.push(b'\n');

        let encoded = STANZA_BODY.encode(&stanza.body);
        let mut lines = encoded.as_bytes().chunks(BODY_COLUMNS).peekable();
        while let Some(chunk) = lines.next() {
            out.extend_from_slice(chunk);
            out.push(b'\n');
            if lines.peek().is_none() && chunk.len() == BODY_COLUMNS {
                // A full final line needs an empty terminator line.
                out.push(b'\n');
            }
        }
        if encoded.is_empty() {
            out.push(b'\n');
        }
    }

    out.extend_from_slice(MAC_PREFIX.as_bytes());
    out
}

/// The base64 engine used throughout the header.
pub(crate) const STANZA_BODY: base64::engine::GeneralPurpose = STANDARD_NO_PAD;

/// Decode a stanza argument that carries raw bytes of a known length.
pub(crate) fn decode_arg<const N: usize>(arg: &str) -> Option<[u8; N]> {
    let bytes = STANZA_BODY.decode(arg).ok()?;
    bytes.try_into().ok()
}

pub(crate) fn encode_arg(bytes: &[u8]) -> String {
    STANZA_BODY.encode(bytes)
}

fn read_line<R: BufRead>(reader: &mut R, line: &mut String) -> Result<(), FormatError> {
    line.clear();
    let mut raw = Vec::new();
    let n = reader.by_ref().take(MAX_LINE_LEN).read_until(b'\n', &mut raw)?;
    if n == 0 || raw.last() != Some(&b'\n') {
        return Err(FormatError::Truncated);
    }
    raw.pop();

    let text = String::from_utf8(raw)
        .map_err(|_| FormatError::InvalidStanza("header line is not valid UTF-8".into()))?;
    line.push_str(&text);
    Ok(())
}

fn parse_stanza_line(rest: &str) -> Result<(String, Vec<String>), FormatError> {
    let Some(rest) = rest.strip_prefix(' ') else {
        return Err(FormatError::InvalidStanza(
            "missing space after stanza prefix".into(),
        ));
    };

    let mut fields = Vec::new();
    for field in rest.split(' ') {
        if field.is_empty() {
            return Err(FormatError::InvalidStanza("empty stanza argument".into()));
        }
        if !field.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(FormatError::InvalidStanza(format!(
                "stanza argument {:?} contains non-printable characters",
                truncate_for_display(field)
            )));
        }
        fields.push(field.to_owned());
    }

    let tag = fields.remove(0);
    Ok((tag, fields))
}

fn read_body<R: BufRead>(reader: &mut R, line: &mut String) -> Result<Vec<u8>, FormatError> {
    let mut body = Vec::new();
    loop {
        read_line(reader, line)?;
        if line.len() > BODY_COLUMNS {
            return Err(FormatError::InvalidBody(format!(
                "body line is {} columns (maximum {BODY_COLUMNS})",
                line.len()
            )));
        }

        STANZA_BODY
            .decode_vec(line.as_bytes(), &mut body)
            .map_err(|e| FormatError::InvalidBody(format!("invalid base64: {e}")))?;

        if line.len() < BODY_COLUMNS {
            return Ok(body);
        }
    }
}

fn parse_mac(rest: &str) -> Result<[u8; MAC_SIZE], FormatError> {
    let encoded = rest.strip_prefix(' ').ok_or(FormatError::InvalidMac)?;
    decode_arg::<MAC_SIZE>(encoded).ok_or(FormatError::InvalidMac)
}

fn truncate_for_display(s: &str) -> String {
    if s.chars().count() <= 64 {
        s.to_owned()
    } else {
        format!("{}...", s.chars().take(64).collect::<String>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_stanzas() -> Vec<Stanza> {
        vec![
            Stanza::new(
                "X25519",
                vec!["CJM36AHmTbdHSuOQL+NESqyVQE75f2e610iRdLPEN20".into()],
                vec![0xAB; 32],
            ),
            Stanza::new(
                "scrypt",
                vec!["c2FsdHNhbHRzYWx0c2FsdA".into(), "18".into()],
                vec![0x01; 32],
            ),
            // 48 bytes encode to exactly one full line, so an empty line follows.
            Stanza::new("kage-unknown", vec!["a".into(), "b".into()], vec![0x55; 48]),
            Stanza::new("empty-body", vec![], vec![]),
        ]
    }

    fn sample_header() -> Header {
        Header {
            stanzas: sample_stanzas(),
            mac: [0x42; MAC_SIZE],
        }
    }

    #[test]
    fn test_encode_is_deterministic() {
        assert_eq!(sample_header().encode(), sample_header().encode());
    }

    #[test]
    fn test_encode_layout() {
        let encoded = String::from_utf8(sample_header().encode()).unwrap();
        let lines: Vec<&str> = encoded.split('\n').collect();

        assert_eq!(lines[0], VERSION_LINE);
        assert!(lines[1].starts_with("-> X25519 "));
        assert_eq!(lines[2].len(), 43);
        assert!(lines[3].starts_with("-> scrypt "));
        assert_eq!(lines[5], "-> kage-unknown a b");
        assert_eq!(lines[6].len(), BODY_COLUMNS);
        assert_eq!(lines[7], "");
        assert_eq!(lines[8], "-> empty-body");
        assert_eq!(lines[9], "");
        assert!(lines[10].starts_with("--- "));
        assert!(encoded.ends_with('\n'));
    }

    #[test]
    fn test_decode_reproduces_header_and_bytes() {
        let encoded = sample_header().encode();
        let mut with_payload = encoded.clone();
        with_payload.extend_from_slice(b"payload bytes");

        let (header, consumed) = decode_header(&with_payload).unwrap();
        assert_eq!(header, sample_header());
        assert_eq!(consumed, encoded.len());
        assert_eq!(header.encode(), encoded);
    }

    #[test]
    fn test_long_body_wraps() {
        let stanza = Stanza::new("ssh-rsa", vec!["tag".into()], vec![9u8; 256]);
        let header = Header {
            stanzas: vec![stanza],
            mac: [0; MAC_SIZE],
        };
        let encoded = String::from_utf8(header.encode()).unwrap();
        for line in encoded.lines().skip(2).take(5) {
            assert_eq!(line.len(), BODY_COLUMNS);
        }
        let (decoded, _) = decode_header(encoded.as_bytes()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_rejects_wrong_version() {
        let input = b"age-encryption.org/v2\n--- AAAA\n";
        match decode_header(input) {
            Err(FormatError::UnknownVersion(v)) => assert_eq!(v, "age-encryption.org/v2"),
            other => panic!("expected UnknownVersion, got: {other:?}"),
        }
    }

    #[test]
    fn test_rejects_malformed_stanza_lines() {
        for bad in [
            "->X25519 abc\n",
            "-> \n",
            "-> X25519  abc\n",
            "-> X25519 abc \n",
            "garbage\n",
        ] {
            let input = format!("{VERSION_LINE}\n{bad}\n--- AAAA\n");
            assert!(
                matches!(decode_header(input.as_bytes()), Err(FormatError::InvalidStanza(_))),
                "{bad:?} must be rejected"
            );
        }
    }

    #[test]
    fn test_rejects_bad_body() {
        let long_line = "A".repeat(BODY_COLUMNS + 4);
        for body in ["!!!!", "AB=", "AAB", long_line.as_str()] {
            let input = format!("{VERSION_LINE}\n-> X25519 abc\n{body}\n--- AAAA\n");
            assert!(
                matches!(decode_header(input.as_bytes()), Err(FormatError::InvalidBody(_))),
                "{body:?} must be rejected"
            );
        }
    }

    #[test]
    fn test_rejects_bad_mac_line() {
        let valid_mac = STANZA_BODY.encode([0u8; MAC_SIZE]);
        for mac_line in [
            "---".to_string(),
            "---AAAA".to_string(),
            format!("--- {}", &valid_mac[..40]),
            format!("--- {valid_mac}="),
        ] {
            let input = format!("{VERSION_LINE}\n{mac_line}\n");
            assert!(
                matches!(decode_header(input.as_bytes()), Err(FormatError::InvalidMac)),
                "{mac_line:?} must be rejected"
            );
        }
    }

    #[test]
    fn test_rejects_truncated_header() {
        let encoded = sample_header().encode();
        for cut in [0, 10, encoded.len() / 2, encoded.len() - 1] {
            assert!(decode_header(&encoded[..cut]).is_err(), "cut at {cut}");
        }
    }

    #[test]
    fn test_unknown_stanza_preserved() {
        let (header, _) = decode_header(&sample_header().encode()).unwrap();
        let unknown = &header.stanzas[2];
        assert_eq!(unknown.tag, "kage-unknown");
        assert_eq!(unknown.args, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(unknown.body, vec![0x55; 48]);
    }

    #[test]
    fn test_arg_helpers() {
        let encoded = encode_arg(&[1, 2, 3, 4]);
        assert_eq!(decode_arg::<4>(&encoded), Some([1, 2, 3, 4]));
        assert_eq!(decode_arg::<5>(&encoded), None);
        assert_eq!(decode_arg::<4>("not base64!"), None);
    }
}
