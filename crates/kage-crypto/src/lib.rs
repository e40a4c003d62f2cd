//! kage-crypto: multi-recipient file encryption in the `age-encryption.org/v1` format
//!
//! Architecture: one random file key, wrapped once per recipient, protects a
//! chunked ChaCha20-Poly1305 payload.
//!
//! Pipeline: plaintext → 64 KiB chunks → ChaCha20-Poly1305 (counter nonce, final-chunk flag) → optional armor
//!
//! Key hierarchy:
//! ```text
//! File Key (per-file, 128-bit random)
//!   ├── Stanza wrap keys (one per recipient, file key sealed with ChaCha20-Poly1305, zero nonce)
//!   │   ├── X25519:      HKDF(DH(ephemeral, recipient), salt = ephemeral || recipient)
//!   │   ├── ssh-ed25519: as X25519 on the Montgomery key, shared secret tweaked by the SSH key
//!   │   ├── ssh-rsa:     RSA-OAEP-SHA256 (no wrap key)
//!   │   └── scrypt:      scrypt(passphrase, label || salt, 2^log_n, 8, 1)
//!   ├── Header MAC Key (HKDF from file key, info = "header") → HMAC-SHA256 over the header
//!   └── Payload Key (HKDF from file key, salt = 16-byte nonce, info = "payload")
//! ```

pub mod armor;
pub mod engine;
pub mod error;
pub mod format;
pub mod identity;
pub mod kdf;
pub mod keys;
pub mod passphrase;
pub mod recipient;
pub mod scrypt;
pub mod ssh;
pub mod stream;
pub mod x25519;

pub use armor::{decode_armor, encode_armor};
pub use engine::{
    decrypt, decrypt_file, decrypt_io, encrypt, encrypt_file, encrypt_io, encrypt_to_writer,
    DecryptReader, Decryptor, EncryptWriter,
};
pub use error::{DecryptError, EncryptError, FormatError, KeyError};
pub use format::{decode_header, encode_header, Header, Stanza};
pub use identity::{parse_recipients, read_recipients_file, IdentityFile};
pub use keys::{generate_file_key, FileKey};
pub use recipient::{AnyIdentity, AnyRecipient, Identity, Recipient};

/// Size of a file key in bytes (128-bit)
pub const FILE_KEY_SIZE: usize = 16;

/// Size of a derived symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;
