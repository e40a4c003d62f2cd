//! Passphrase convenience helpers over [`engine`](crate::engine).

use secrecy::SecretString;

use crate::engine;
use crate::error::{DecryptError, EncryptError};
use crate::kdf::DEFAULT_WORK_FACTOR;
use crate::scrypt;

/// Encrypt to a passphrase with the default work factor.
pub fn encrypt(
    plaintext: &[u8],
    passphrase: SecretString,
    armored: bool,
) -> Result<Vec<u8>, EncryptError> {
    encrypt_with_work_factor(plaintext, passphrase, DEFAULT_WORK_FACTOR, armored)
}

pub fn encrypt_with_work_factor(
    plaintext: &[u8],
    passphrase: SecretString,
    work_factor: u8,
    armored: bool,
) -> Result<Vec<u8>, EncryptError> {
    let recipient = scrypt::Recipient::new(passphrase).with_work_factor(work_factor);
    engine::encrypt(plaintext, &[recipient], armored)
}

/// Decrypt a passphrase-encrypted container.
///
/// Fails with [`DecryptError::NoMatchingKeys`] if the container was not
/// encrypted to a passphrase.
pub fn decrypt(ciphertext: &[u8], passphrase: SecretString) -> Result<Vec<u8>, DecryptError> {
    decrypt_with_max_work_factor(ciphertext, passphrase, crate::kdf::DEFAULT_MAX_WORK_FACTOR)
}

pub fn decrypt_with_max_work_factor(
    ciphertext: &[u8],
    passphrase: SecretString,
    max_work_factor: u8,
) -> Result<Vec<u8>, DecryptError> {
    let identity = scrypt::Identity::new(passphrase).with_max_work_factor(max_work_factor);
    engine::decrypt(ciphertext, &[identity])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x25519;

    #[test]
    fn test_roundtrip() {
        let ciphertext =
            encrypt_with_work_factor(b"secret", SecretString::from("pw"), 4, false).unwrap();
        let plaintext = decrypt(&ciphertext, SecretString::from("pw")).unwrap();
        assert_eq!(plaintext, b"secret");
    }

    #[test]
    fn test_wrong_passphrase() {
        let ciphertext =
            encrypt_with_work_factor(b"secret", SecretString::from("pw"), 4, true).unwrap();
        assert!(matches!(
            decrypt(&ciphertext, SecretString::from("not pw")),
            Err(DecryptError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_not_passphrase_encrypted() {
        let identity = x25519::Identity::generate();
        let ciphertext = engine::encrypt(b"secret", &[identity.to_public()], false).unwrap();
        let err = decrypt(&ciphertext, SecretString::from("pw")).unwrap_err();
        assert!(err.to_string().contains("No matching keys found"));
    }
}
