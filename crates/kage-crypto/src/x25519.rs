//! Native X25519 recipients and identities.
//!
//! Stanza: `-> X25519 <base64(ephemeral share)>`, body = file key sealed under
//! `HKDF(ikm = shared secret, salt = ephemeral share || recipient, info = "age-encryption.org/v1/X25519")`.
//!
//! Text forms are Bech32: `age1...` for recipients, `AGE-SECRET-KEY-1...` for identities.

use std::fmt;
use std::str::FromStr;

use bech32::{FromBase32, ToBase32, Variant};
use rand::rngs::OsRng;
use secrecy::SecretString;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::error::{DecryptError, EncryptError, KeyError};
use crate::format::{decode_arg, encode_arg, Stanza};
use crate::keys::{self, FileKey};
use crate::recipient::{Identity as IdentityTrait, Recipient as RecipientTrait};
use crate::KEY_SIZE;

pub const STANZA_TAG: &str = "X25519";
const STANZA_KEY_LABEL: &[u8] = b"age-encryption.org/v1/X25519";

const RECIPIENT_HRP: &str = "age";
const IDENTITY_HRP: &str = "age-secret-key-";

/// Decode a Bech32 string carrying exactly 32 bytes under `hrp`.
fn decode_bech32_key(s: &str, hrp: &'static str) -> Result<[u8; 32], KeyError> {
    let (actual_hrp, data, variant) =
        bech32::decode(s).map_err(|e| KeyError::InvalidBech32(e.to_string()))?;
    if variant != Variant::Bech32 {
        return Err(KeyError::InvalidBech32("expected Bech32, got Bech32m".into()));
    }
    if actual_hrp != hrp {
        return Err(KeyError::WrongPrefix {
            expected: hrp,
            actual: actual_hrp,
        });
    }
    let bytes = Zeroizing::new(
        Vec::<u8>::from_base32(&data).map_err(|e| KeyError::InvalidBech32(e.to_string()))?,
    );
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| KeyError::InvalidLength {
            expected: 32,
            actual: bytes.len(),
        })
}

fn encode_bech32_key(hrp: &str, bytes: &[u8; 32]) -> Result<String, bech32::Error> {
    bech32::encode(hrp, bytes.to_base32(), Variant::Bech32)
}

/// Wrap key shared by the X25519 and ssh-ed25519 stanzas.
pub(crate) fn stanza_wrap_key(
    label: &[u8],
    shared: &[u8; 32],
    ephemeral: &PublicKey,
    recipient: &PublicKey,
) -> Zeroizing<[u8; KEY_SIZE]> {
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(ephemeral.as_bytes());
    salt[32..].copy_from_slice(recipient.as_bytes());
    keys::hkdf(&salt, label, shared)
}

/// An X25519 public key that file keys can be wrapped to.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Recipient(PublicKey);

impl Recipient {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(PublicKey::from(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

impl FromStr for Recipient {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_bech32_key(s, RECIPIENT_HRP).map(Self::from_bytes)
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = encode_bech32_key(RECIPIENT_HRP, self.as_bytes()).map_err(|_| fmt::Error)?;
        f.write_str(&encoded)
    }
}

impl fmt::Debug for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x25519::Recipient({self})")
    }
}

impl RecipientTrait for Recipient {
    fn wrap_file_key(&self, file_key: &FileKey) -> Result<Stanza, EncryptError> {
        let ephemeral = EphemeralSecret::random_from_rng(OsRng);
        let share = PublicKey::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(&self.0);
        if !shared.was_contributory() {
            return Err(EncryptError::Wrap(
                "recipient is a low-order point".into(),
            ));
        }

        let wrap_key = stanza_wrap_key(STANZA_KEY_LABEL, shared.as_bytes(), &share, &self.0);
        let body = keys::wrap_file_key(&wrap_key, file_key)?;
        Ok(Stanza::new(STANZA_TAG, vec![encode_arg(share.as_bytes())], body))
    }
}

/// An X25519 secret key. Zeroized on drop.
#[derive(Clone)]
pub struct Identity(StaticSecret);

impl Identity {
    pub fn generate() -> Self {
        Self(StaticSecret::random_from_rng(OsRng))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    pub fn to_public(&self) -> Recipient {
        Recipient(PublicKey::from(&self.0))
    }

    /// The `AGE-SECRET-KEY-1...` encoding, kept behind `SecretString`.
    pub fn to_string(&self) -> SecretString {
        let bytes = Zeroizing::new(self.0.to_bytes());
        let encoded = Zeroizing::new(
            encode_bech32_key(IDENTITY_HRP, &bytes)
                .expect("a 32-byte payload always fits in a Bech32 string"),
        );
        SecretString::from(encoded.to_uppercase())
    }
}

impl FromStr for Identity {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_bech32_key(s, IDENTITY_HRP).map(Self::from_bytes)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("x25519::Identity")
            .field("public", &self.to_public())
            .finish()
    }
}

impl IdentityTrait for Identity {
    fn unwrap_stanza(&self, stanza: &Stanza) -> Option<Result<FileKey, DecryptError>> {
        if stanza.tag != STANZA_TAG {
            return None;
        }
        let [share] = stanza.args.as_slice() else {
            return Some(Err(DecryptError::InvalidHeader(
                "X25519 stanza must have exactly one argument".into(),
            )));
        };
        let Some(share) = decode_arg::<32>(share) else {
            return Some(Err(DecryptError::InvalidHeader(
                "invalid X25519 ephemeral share".into(),
            )));
        };
        if stanza.body.len() != keys::WRAPPED_KEY_SIZE {
            return Some(Err(DecryptError::InvalidHeader(
                "invalid X25519 stanza body length".into(),
            )));
        }

        let share = PublicKey::from(share);
        let shared = self.0.diffie_hellman(&share);
        if !shared.was_contributory() {
            return Some(Err(DecryptError::InvalidHeader(
                "X25519 ephemeral share is a low-order point".into(),
            )));
        }

        let wrap_key = stanza_wrap_key(
            STANZA_KEY_LABEL,
            shared.as_bytes(),
            &share,
            &PublicKey::from(&self.0),
        );
        // Without a fingerprint there is no telling which identity a stanza
        // was meant for, so an authentication failure is just "not ours".
        keys::unwrap_file_key(&wrap_key, &stanza.body).ok().map(Ok)
    }
}
