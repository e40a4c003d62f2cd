//! Key derivation: scrypt passphrase → wrap key

use scrypt::errors::InvalidParams;
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

use crate::KEY_SIZE;

/// Domain label prepended to the random salt before it reaches scrypt.
pub const SCRYPT_SALT_LABEL: &[u8] = b"age-encryption.org/v1/scrypt";

/// Size of the random per-file scrypt salt.
pub const SCRYPT_SALT_SIZE: usize = 16;

/// Work factor used when encrypting, unless overridden (2^18 iterations).
pub const DEFAULT_WORK_FACTOR: u8 = 18;

/// Largest work factor accepted when decrypting, unless overridden.
pub const DEFAULT_MAX_WORK_FACTOR: u8 = 22;

/// scrypt parameters for KDF
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScryptParams {
    /// log2(N), the CPU/memory cost (default: 18)
    pub log_n: u8,
    /// Block size (fixed by the format: 8)
    pub r: u32,
    /// Parallelism (fixed by the format: 1)
    pub p: u32,
}

impl ScryptParams {
    pub fn with_work_factor(log_n: u8) -> Self {
        Self {
            log_n,
            ..Self::default()
        }
    }
}

impl Default for ScryptParams {
    fn default() -> Self {
        Self {
            log_n: DEFAULT_WORK_FACTOR,
            r: 8,
            p: 1,
        }
    }
}

/// Derive a 256-bit wrap key from a passphrase and salt using scrypt.
///
/// The salt is 16 random bytes stored in the stanza; scrypt sees it prefixed
/// with [`SCRYPT_SALT_LABEL`].
pub fn derive_wrap_key(
    passphrase: &SecretString,
    salt: &[u8; SCRYPT_SALT_SIZE],
    params: &ScryptParams,
) -> Result<Zeroizing<[u8; KEY_SIZE]>, InvalidParams> {
    let scrypt_params = scrypt::Params::new(params.log_n, params.r, params.p, KEY_SIZE)?;

    let mut labeled_salt = Vec::with_capacity(SCRYPT_SALT_LABEL.len() + SCRYPT_SALT_SIZE);
    labeled_salt.extend_from_slice(SCRYPT_SALT_LABEL);
    labeled_salt.extend_from_slice(salt);

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    scrypt::scrypt(
        passphrase.expose_secret().as_bytes(),
        &labeled_salt,
        &scrypt_params,
        &mut key[..],
    )
    .map_err(|_| InvalidParams)?;

    Ok(key)
}
