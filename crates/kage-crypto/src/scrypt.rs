//! Passphrase recipients.
//!
//! Stanza: `-> scrypt <base64(salt)> <log2 N>`, body = file key sealed under
//! the scrypt-derived key. A passphrase stanza must be the only stanza in a
//! header; the engine enforces that in both directions.

use rand::RngCore;
use secrecy::SecretString;
use tracing::{debug, warn};

use crate::error::{DecryptError, EncryptError};
use crate::format::{decode_arg, encode_arg, Stanza};
use crate::kdf::{self, ScryptParams, SCRYPT_SALT_SIZE};
use crate::keys::{self, FileKey};
use crate::recipient::{Identity as IdentityTrait, Recipient as RecipientTrait};

pub const STANZA_TAG: &str = "scrypt";

/// Work factors below this are accepted but logged as weak.
const MIN_RECOMMENDED_WORK_FACTOR: u8 = 14;

/// Encrypt to a passphrase.
pub struct Recipient {
    passphrase: SecretString,
    work_factor: u8,
}

impl Recipient {
    pub fn new(passphrase: SecretString) -> Self {
        Self {
            passphrase,
            work_factor: kdf::DEFAULT_WORK_FACTOR,
        }
    }

    /// Override the scrypt work factor (log2 N). Mostly useful to keep tests fast.
    pub fn with_work_factor(mut self, work_factor: u8) -> Self {
        self.work_factor = work_factor;
        self
    }

    pub fn work_factor(&self) -> u8 {
        self.work_factor
    }
}

impl std::fmt::Debug for Recipient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("scrypt::Recipient")
            .field("passphrase", &"[REDACTED]")
            .field("work_factor", &self.work_factor)
            .finish()
    }
}

impl RecipientTrait for Recipient {
    fn wrap_file_key(&self, file_key: &FileKey) -> Result<Stanza, EncryptError> {
        if self.work_factor < MIN_RECOMMENDED_WORK_FACTOR {
            warn!(
                work_factor = self.work_factor,
                "scrypt work factor is below the recommended minimum"
            );
        }

        let mut salt = [0u8; SCRYPT_SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);

        let params = ScryptParams::with_work_factor(self.work_factor);
        let wrap_key = kdf::derive_wrap_key(&self.passphrase, &salt, &params).map_err(|_| {
            EncryptError::Wrap(format!("invalid scrypt work factor {}", self.work_factor))
        })?;
        let body = keys::wrap_file_key(&wrap_key, file_key)?;

        Ok(Stanza::new(
            STANZA_TAG,
            vec![encode_arg(&salt), self.work_factor.to_string()],
            body,
        ))
    }

    fn is_exclusive(&self) -> bool {
        true
    }
}

/// Decrypt with a passphrase.
pub struct Identity {
    passphrase: SecretString,
    max_work_factor: u8,
}

impl Identity {
    pub fn new(passphrase: SecretString) -> Self {
        Self {
            passphrase,
            max_work_factor: kdf::DEFAULT_MAX_WORK_FACTOR,
        }
    }

    /// Refuse stanzas that ask for more than 2^`max_work_factor` scrypt iterations.
    pub fn with_max_work_factor(mut self, max_work_factor: u8) -> Self {
        self.max_work_factor = max_work_factor;
        self
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("scrypt::Identity")
            .field("passphrase", &"[REDACTED]")
            .field("max_work_factor", &self.max_work_factor)
            .finish()
    }
}

/// Parse the decimal log2 N argument: digits only, no sign, no leading zero.
fn parse_work_factor(arg: &str) -> Option<u8> {
    if arg.is_empty() || !arg.bytes().all(|b| b.is_ascii_digit()) || arg.starts_with('0') {
        return None;
    }
    arg.parse().ok().filter(|n| (1..=64).contains(n))
}

impl IdentityTrait for Identity {
    fn unwrap_stanza(&self, stanza: &Stanza) -> Option<Result<FileKey, DecryptError>> {
        if stanza.tag != STANZA_TAG {
            return None;
        }
        Some(self.unwrap(stanza))
    }
}

impl Identity {
    fn unwrap(&self, stanza: &Stanza) -> Result<FileKey, DecryptError> {
        let [salt, work_factor] = stanza.args.as_slice() else {
            return Err(DecryptError::InvalidHeader(
                "scrypt stanza must have exactly two arguments".into(),
            ));
        };
        let salt = decode_arg::<SCRYPT_SALT_SIZE>(salt)
            .ok_or_else(|| DecryptError::InvalidHeader("invalid scrypt salt".into()))?;
        let work_factor = parse_work_factor(work_factor).ok_or_else(|| {
            DecryptError::InvalidHeader(format!("invalid scrypt work factor {work_factor:?}"))
        })?;
        if work_factor > self.max_work_factor {
            return Err(DecryptError::ExcessiveWork {
                required: work_factor,
                limit: self.max_work_factor,
            });
        }
        if stanza.body.len() != keys::WRAPPED_KEY_SIZE {
            return Err(DecryptError::InvalidHeader(
                "invalid scrypt stanza body length".into(),
            ));
        }

        debug!(work_factor, "deriving scrypt wrap key");
        let params = ScryptParams::with_work_factor(work_factor);
        let wrap_key = kdf::derive_wrap_key(&self.passphrase, &salt, &params).map_err(|_| {
            DecryptError::InvalidHeader(format!("invalid scrypt work factor {work_factor}"))
        })?;

        // The stanza is unambiguously ours, so a failure here means a wrong passphrase.
        keys::unwrap_file_key(&wrap_key, &stanza.body)
            .map_err(|_| DecryptError::DecryptionFailed("incorrect passphrase".into()))
    }
}
