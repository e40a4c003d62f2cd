//! The recipient and identity abstractions the engine is written against.
//!
//! A [`Recipient`] wraps a file key into a stanza. An [`Identity`] tries to
//! unwrap one stanza and answers in three ways:
//!
//! - `None`: the stanza is not for this identity (wrong type, wrong key tag,
//!   or an untagged stanza that did not authenticate);
//! - `Some(Ok(key))`: the file key;
//! - `Some(Err(e))`: the stanza was for this identity but is broken. This
//!   ends decryption.

use std::str::FromStr;

use crate::error::{DecryptError, EncryptError, KeyError};
use crate::format::Stanza;
use crate::keys::FileKey;
use crate::{scrypt, ssh, x25519};

pub trait Recipient {
    fn wrap_file_key(&self, file_key: &FileKey) -> Result<Stanza, EncryptError>;

    /// Whether this recipient must be the only one in a header.
    fn is_exclusive(&self) -> bool {
        false
    }
}

pub trait Identity {
    fn unwrap_stanza(&self, stanza: &Stanza) -> Option<Result<FileKey, DecryptError>>;
}

impl<T: Recipient + ?Sized> Recipient for &T {
    fn wrap_file_key(&self, file_key: &FileKey) -> Result<Stanza, EncryptError> {
        (**self).wrap_file_key(file_key)
    }

    fn is_exclusive(&self) -> bool {
        (**self).is_exclusive()
    }
}

impl<T: Recipient + ?Sized> Recipient for Box<T> {
    fn wrap_file_key(&self, file_key: &FileKey) -> Result<Stanza, EncryptError> {
        (**self).wrap_file_key(file_key)
    }

    fn is_exclusive(&self) -> bool {
        (**self).is_exclusive()
    }
}

impl<T: Identity + ?Sized> Identity for &T {
    fn unwrap_stanza(&self, stanza: &Stanza) -> Option<Result<FileKey, DecryptError>> {
        (**self).unwrap_stanza(stanza)
    }
}

impl<T: Identity + ?Sized> Identity for Box<T> {
    fn unwrap_stanza(&self, stanza: &Stanza) -> Option<Result<FileKey, DecryptError>> {
        (**self).unwrap_stanza(stanza)
    }
}

/// Any supported recipient, as parsed from a command line or a recipients file.
#[derive(Debug)]
pub enum AnyRecipient {
    X25519(x25519::Recipient),
    Ssh(ssh::Recipient),
    Scrypt(scrypt::Recipient),
}

impl FromStr for AnyRecipient {
    type Err = KeyError;

    /// `age1...` (either case) is an X25519 recipient; anything else is tried
    /// as an SSH public key.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.get(..4).is_some_and(|prefix| prefix.eq_ignore_ascii_case("age1")) {
            return s.parse().map(Self::X25519);
        }
        s.parse().map(Self::Ssh)
    }
}

impl From<x25519::Recipient> for AnyRecipient {
    fn from(r: x25519::Recipient) -> Self {
        Self::X25519(r)
    }
}

impl From<ssh::Recipient> for AnyRecipient {
    fn from(r: ssh::Recipient) -> Self {
        Self::Ssh(r)
    }
}

impl From<scrypt::Recipient> for AnyRecipient {
    fn from(r: scrypt::Recipient) -> Self {
        Self::Scrypt(r)
    }
}

impl Recipient for AnyRecipient {
    fn wrap_file_key(&self, file_key: &FileKey) -> Result<Stanza, EncryptError> {
        match self {
            Self::X25519(r) => r.wrap_file_key(file_key),
            Self::Ssh(r) => r.wrap_file_key(file_key),
            Self::Scrypt(r) => r.wrap_file_key(file_key),
        }
    }

    fn is_exclusive(&self) -> bool {
        match self {
            Self::X25519(r) => r.is_exclusive(),
            Self::Ssh(r) => r.is_exclusive(),
            Self::Scrypt(r) => r.is_exclusive(),
        }
    }
}

/// Any supported identity.
#[derive(Debug)]
pub enum AnyIdentity {
    X25519(x25519::Identity),
    Ssh(ssh::Identity),
    Scrypt(scrypt::Identity),
}

impl AnyIdentity {
    /// Parse either an `AGE-SECRET-KEY-1...` line or an OpenSSH private key.
    pub fn from_buffer(buf: &str) -> Result<Self, KeyError> {
        if buf.trim_start().starts_with("-----BEGIN") {
            return ssh::Identity::from_buffer(buf).map(Self::Ssh);
        }
        buf.parse()
    }
}

impl FromStr for AnyIdentity {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self::X25519)
    }
}

impl From<x25519::Identity> for AnyIdentity {
    fn from(i: x25519::Identity) -> Self {
        Self::X25519(i)
    }
}

impl From<ssh::Identity> for AnyIdentity {
    fn from(i: ssh::Identity) -> Self {
        Self::Ssh(i)
    }
}

impl From<scrypt::Identity> for AnyIdentity {
    fn from(i: scrypt::Identity) -> Self {
        Self::Scrypt(i)
    }
}

impl Identity for AnyIdentity {
    fn unwrap_stanza(&self, stanza: &Stanza) -> Option<Result<FileKey, DecryptError>> {
        match self {
            Self::X25519(i) => i.unwrap_stanza(stanza),
            Self::Ssh(i) => i.unwrap_stanza(stanza),
            Self::Scrypt(i) => i.unwrap_stanza(stanza),
        }
    }
}

#[cfg(test)]
mod tests {
    use secrecy::{ExposeSecret, SecretString};

    use super::*;
    use crate::keys::generate_file_key;

    #[test]
    fn test_parse_any_recipient() {
        let identity = x25519::Identity::generate();
        let parsed: AnyRecipient = identity.to_public().to_string().parse().unwrap();
        assert!(matches!(parsed, AnyRecipient::X25519(_)));

        let parsed: AnyRecipient = include_str!("../tests/data/ssh_ed25519.pub").parse().unwrap();
        assert!(matches!(parsed, AnyRecipient::Ssh(_)));
    }

    #[test]
    fn test_uppercase_x25519_recipient() {
        let recipient = x25519::Identity::generate().to_public();
        let upper = recipient.to_string().to_ascii_uppercase();
        assert!(upper.starts_with("AGE1"));

        match upper.parse::<AnyRecipient>().unwrap() {
            AnyRecipient::X25519(parsed) => assert_eq!(parsed, recipient),
            other => panic!("parsed as {other:?}"),
        }
    }

    #[test]
    fn test_unknown_recipient_reports_ssh_error() {
        let err = "garbage".parse::<AnyRecipient>().unwrap_err();
        assert!(err.to_string().contains("invalid SSH recipient"), "{err}");

        let err = "age1notbech32".parse::<AnyRecipient>().unwrap_err();
        assert!(err.to_string().contains("invalid Bech32 encoding"), "{err}");
    }

    #[test]
    fn test_parse_any_identity() {
        let identity = x25519::Identity::generate();
        let parsed = AnyIdentity::from_buffer(identity.to_string().expose_secret()).unwrap();
        assert!(matches!(parsed, AnyIdentity::X25519(_)));

        let parsed = AnyIdentity::from_buffer(include_str!("../tests/data/ssh_ed25519")).unwrap();
        assert!(matches!(parsed, AnyIdentity::Ssh(_)));
    }

    #[test]
    fn test_dispatch_through_references_and_boxes() {
        let identity = x25519::Identity::generate();
        let recipient = identity.to_public();
        let file_key = generate_file_key();

        let boxed: Box<dyn Recipient> = Box::new(recipient);
        let stanza = (&boxed).wrap_file_key(&file_key).unwrap();

        let any = AnyIdentity::from(identity);
        let by_ref: &dyn Identity = &any;
        let unwrapped = by_ref.unwrap_stanza(&stanza).unwrap().unwrap();
        assert_eq!(unwrapped.as_bytes(), file_key.as_bytes());
    }

    #[test]
    fn test_only_scrypt_is_exclusive() {
        let x = AnyRecipient::from(x25519::Identity::generate().to_public());
        let s = AnyRecipient::from(scrypt::Recipient::new(SecretString::from("pw")));
        assert!(!x.is_exclusive());
        assert!(s.is_exclusive());
    }
}
