//! File key generation, the key schedule hanging off it, and file key wrapping

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

use crate::error::{DecryptError, EncryptError};
use crate::format::{self, Stanza, MAC_SIZE};
use crate::{FILE_KEY_SIZE, KEY_SIZE, TAG_SIZE};

/// Size of a wrapped file key in a stanza body: key + Poly1305 tag.
pub const WRAPPED_KEY_SIZE: usize = FILE_KEY_SIZE + TAG_SIZE;

const HEADER_KEY_INFO: &[u8] = b"header";
const PAYLOAD_KEY_INFO: &[u8] = b"payload";

/// The per-file 128-bit symmetric secret. Zeroized on drop.
#[derive(Clone)]
pub struct FileKey {
    bytes: [u8; FILE_KEY_SIZE],
}

impl FileKey {
    pub fn from_bytes(bytes: [u8; FILE_KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; FILE_KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for FileKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for FileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random file key.
pub fn generate_file_key() -> FileKey {
    let mut bytes = [0u8; FILE_KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    FileKey::from_bytes(bytes)
}

/// HKDF-SHA256 with an explicit salt, producing a 256-bit key.
pub(crate) fn hkdf(salt: &[u8], info: &[u8], ikm: &[u8]) -> Zeroizing<[u8; KEY_SIZE]> {
    let mut okm = Zeroizing::new([0u8; KEY_SIZE]);
    Hkdf::<Sha256>::new(Some(salt), ikm)
        .expand(info, &mut okm[..])
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    okm
}

/// Key for the header MAC: HKDF(ikm = file key, salt = "", info = "header").
pub fn derive_header_key(file_key: &FileKey) -> Zeroizing<[u8; KEY_SIZE]> {
    hkdf(&[], HEADER_KEY_INFO, file_key.as_bytes())
}

/// Key for the payload stream: HKDF(ikm = file key, salt = payload nonce, info = "payload").
pub fn derive_payload_key(file_key: &FileKey, nonce: &[u8]) -> Zeroizing<[u8; KEY_SIZE]> {
    hkdf(nonce, PAYLOAD_KEY_INFO, file_key.as_bytes())
}

fn header_hmac(file_key: &FileKey, stanzas: &[Stanza]) -> Hmac<Sha256> {
    let key = derive_header_key(file_key);
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&key[..])
        .expect("HMAC accepts keys of any length");
    mac.update(&format::mac_input(stanzas));
    mac
}

/// HMAC-SHA256 over the serialized header up to and including `---`.
pub fn header_mac(file_key: &FileKey, stanzas: &[Stanza]) -> [u8; MAC_SIZE] {
    header_hmac(file_key, stanzas).finalize().into_bytes().into()
}

/// Constant-time check of a header MAC read off the wire.
pub fn verify_header_mac(
    file_key: &FileKey,
    stanzas: &[Stanza],
    mac: &[u8; MAC_SIZE],
) -> Result<(), DecryptError> {
    header_hmac(file_key, stanzas)
        .verify_slice(mac)
        .map_err(|_| DecryptError::InvalidMac)
}

/// Wrap (encrypt) a file key under a recipient-specific wrap key.
///
/// ChaCha20-Poly1305 with an all-zero nonce: every wrap key is single-use.
/// Output: `[16-byte ciphertext][16-byte tag]`
pub fn wrap_file_key(
    wrap_key: &[u8; KEY_SIZE],
    file_key: &FileKey,
) -> Result<Vec<u8>, EncryptError> {
    let cipher = ChaCha20Poly1305::new(wrap_key.into());
    cipher
        .encrypt(&Nonce::default(), file_key.as_bytes().as_ref())
        .map_err(|e| EncryptError::Wrap(format!("file key encryption failed: {e}")))
}

/// Unwrap (decrypt) a file key from a stanza body (output of `wrap_file_key`).
pub fn unwrap_file_key(wrap_key: &[u8; KEY_SIZE], body: &[u8]) -> Result<FileKey, DecryptError> {
    if body.len() != WRAPPED_KEY_SIZE {
        return Err(DecryptError::InvalidHeader(format!(
            "wrapped file key is {} bytes (expected {WRAPPED_KEY_SIZE})",
            body.len()
        )));
    }

    let cipher = ChaCha20Poly1305::new(wrap_key.into());
    let mut plaintext = cipher
        .decrypt(&Nonce::default(), body)
        .map_err(|_| DecryptError::DecryptionFailed("file key authentication failed".into()))?;

    let mut key_bytes = [0u8; FILE_KEY_SIZE];
    key_bytes.copy_from_slice(&plaintext);
    plaintext.zeroize();

    Ok(FileKey::from_bytes(key_bytes))
}
