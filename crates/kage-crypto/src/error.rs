//! Error types for the encryption engine.

use std::io;

use thiserror::Error;

/// A malformed header or armor envelope. The input is rejected outright.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("unknown format version: {0:?}")]
    UnknownVersion(String),

    #[error("invalid stanza line: {0}")]
    InvalidStanza(String),

    #[error("invalid stanza body: {0}")]
    InvalidBody(String),

    #[error("missing or malformed header MAC line")]
    InvalidMac,

    #[error("header ended unexpectedly")]
    Truncated,

    #[error("invalid armor: {0}")]
    Armor(String),

    #[error("I/O error while reading header: {0}")]
    Io(#[from] io::Error),
}

/// A recipient or identity string (or key file) that could not be parsed.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid Bech32 encoding: {0}")]
    InvalidBech32(String),

    #[error("invalid key type: expected prefix {expected:?}, got {actual:?}")]
    WrongPrefix {
        expected: &'static str,
        actual: String,
    },

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid SSH recipient: {0}")]
    InvalidSshRecipient(String),

    #[error("invalid SSH identity: {0}")]
    InvalidSshIdentity(String),

    #[error("ssh key must be decrypted first")]
    EncryptedSshKey,

    #[error("unsupported SSH key type: {0}")]
    UnsupportedSshKey(String),

    #[error("RSA key too small: {0} bits (minimum 2048)")]
    WeakRsaKey(usize),

    #[error("invalid key file, line {line}: {source}")]
    InvalidLine {
        line: usize,
        #[source]
        source: Box<KeyError>,
    },

    #[error("key file contains no keys")]
    Empty,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum EncryptError {
    #[error("expected at least one recipient")]
    NoRecipients,

    #[error("a passphrase recipient must be the only recipient")]
    MixedRecipientAndPassphrase,

    #[error("failed to wrap file key: {0}")]
    Wrap(String),

    #[error("non-final payload chunk must be exactly {expected} bytes, got {actual}")]
    ChunkSize { expected: usize, actual: usize },

    #[error("payload stream is already finished")]
    StreamFinished,

    #[error("payload stream counter exhausted")]
    StreamExhausted,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum DecryptError {
    #[error("expected at least one identity")]
    NoIdentities,

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("No matching keys found")]
    NoMatchingKeys,

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("header MAC is invalid")]
    InvalidMac,

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("excessive work factor: 2^{required} exceeds the limit of 2^{limit}")]
    ExcessiveWork { required: u8, limit: u8 },

    #[error("payload chunk {0} failed authentication")]
    ChunkAuth(u64),

    #[error("payload is truncated: stream ended before the final chunk")]
    Truncated,

    #[error("unexpected data after the final payload chunk")]
    TrailingData,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FormatError {
    /// Recover a `FormatError` that crossed an `io::Read` boundary.
    pub(crate) fn from_io(err: io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<FormatError>()) {
            return FormatError::Io(err);
        }
        match err.into_inner().map(|inner| inner.downcast::<FormatError>()) {
            Some(Ok(inner)) => *inner,
            _ => FormatError::Armor("armor decoding failed".into()),
        }
    }
}

impl DecryptError {
    /// Recover a `DecryptError` that crossed an `io::Read` boundary.
    ///
    /// Armor failures from under the payload stream come back as `Format`.
    pub fn from_io(err: io::Error) -> Self {
        let (is_decrypt, is_format) = match err.get_ref() {
            Some(inner) => (inner.is::<DecryptError>(), inner.is::<FormatError>()),
            None => (false, false),
        };
        if is_format {
            return DecryptError::Format(FormatError::from_io(err));
        }
        if !is_decrypt {
            return DecryptError::Io(err);
        }
        match err.into_inner().map(|inner| inner.downcast::<DecryptError>()) {
            Some(Ok(inner)) => *inner,
            _ => DecryptError::Io(io::Error::other("payload stream failed")),
        }
    }

    pub(crate) fn into_io(self) -> io::Error {
        match self {
            DecryptError::Io(err) => err,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
