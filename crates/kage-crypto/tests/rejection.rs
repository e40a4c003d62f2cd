//! Malformed, tampered, and truncated inputs must fail, never decrypt to
//! something else.

use kage_crypto::stream::CHUNK_SIZE;
use kage_crypto::{
    decode_header, decrypt, decrypt_file, encrypt, encrypt_file, ssh, x25519, AnyIdentity,
    AnyRecipient, DecryptError, FormatError, KeyError,
};

fn sample(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn encrypted(len: usize) -> (x25519::Identity, Vec<u8>) {
    let identity = x25519::Identity::generate();
    let ciphertext = encrypt(&sample(len), &[identity.to_public()], false).unwrap();
    (identity, ciphertext)
}

/// Byte offsets of the stanza body line and the MAC line.
fn header_offsets(ciphertext: &[u8]) -> (usize, usize, usize) {
    let header_len = decode_header(ciphertext).unwrap().1;
    let text = std::str::from_utf8(&ciphertext[..header_len]).unwrap();
    let body_line = text.find("\n-> X25519 ").unwrap() + 1;
    let body_start = body_line + text[body_line..].find('\n').unwrap() + 1;
    let mac_start = text.find("\n--- ").unwrap() + 1;
    (body_start, mac_start, header_len)
}

#[test]
fn corrupting_any_stanza_body_byte_fails() {
    let (identity, ciphertext) = encrypted(100);
    let (body_start, mac_start, _) = header_offsets(&ciphertext);

    for offset in body_start..mac_start - 1 {
        let mut tampered = ciphertext.clone();
        // Stay inside the base64 alphabet so the change reaches the crypto.
        tampered[offset] = if tampered[offset] == b'A' { b'B' } else { b'A' };
        assert!(
            decrypt(&tampered, &[&identity]).is_err(),
            "tampering at offset {offset} went unnoticed"
        );
    }
}

#[test]
fn corrupting_any_mac_byte_fails() {
    let (identity, ciphertext) = encrypted(100);
    let (_, mac_start, header_len) = header_offsets(&ciphertext);

    for offset in mac_start..header_len {
        let mut tampered = ciphertext.clone();
        tampered[offset] ^= 0x01;
        assert!(
            decrypt(&tampered, &[&identity]).is_err(),
            "tampering at offset {offset} went unnoticed"
        );
    }
}

#[test]
fn corrupting_stanza_argument_fails() {
    let (identity, ciphertext) = encrypted(10);
    let text_end = decode_header(&ciphertext).unwrap().1;
    let arg = std::str::from_utf8(&ciphertext[..text_end])
        .unwrap()
        .find("-> X25519 ")
        .unwrap()
        + "-> X25519 ".len();

    let mut tampered = ciphertext.clone();
    tampered[arg + 3] = if tampered[arg + 3] == b'A' { b'B' } else { b'A' };
    assert!(decrypt(&tampered, &[identity]).is_err());
}

#[test]
fn header_mutation_with_valid_wrap_fails_mac() {
    // Re-encrypting to a second recipient and splicing its header on would
    // need the file key; instead append a stanza and keep the old MAC.
    let (identity, ciphertext) = encrypted(10);
    let header_len = decode_header(&ciphertext).unwrap().1;
    let text = std::str::from_utf8(&ciphertext[..header_len]).unwrap();
    let mac_start = text.find("\n--- ").unwrap() + 1;

    let mut spliced = ciphertext[..mac_start].to_vec();
    spliced.extend_from_slice(b"-> extra\n\n");
    spliced.extend_from_slice(&ciphertext[mac_start..]);

    assert!(matches!(
        decrypt(&spliced, &[identity]),
        Err(DecryptError::InvalidMac)
    ));
}

#[test]
fn flipping_payload_bytes_fails() {
    let (identity, ciphertext) = encrypted(CHUNK_SIZE + 100);
    let header_len = decode_header(&ciphertext).unwrap().1;

    let offsets = [
        header_len,
        header_len + 20,
        header_len + 16 + CHUNK_SIZE,
        ciphertext.len() - 1,
    ];
    for offset in offsets {
        let mut tampered = ciphertext.clone();
        tampered[offset] ^= 0x80;
        assert!(decrypt(&tampered, &[&identity]).is_err(), "offset {offset}");
    }
}

#[test]
fn dropping_the_final_chunk_is_detected() {
    let (identity, ciphertext) = encrypted(2 * CHUNK_SIZE + 10);
    let header_len = decode_header(&ciphertext).unwrap().1;
    let sealed_chunk = CHUNK_SIZE + 16;

    let without_last = &ciphertext[..header_len + 16 + 2 * sealed_chunk];
    assert!(matches!(
        decrypt(without_last, &[&identity]),
        Err(DecryptError::Truncated)
    ));

    let mid_chunk = &ciphertext[..header_len + 16 + sealed_chunk + 100];
    assert!(decrypt(mid_chunk, &[&identity]).is_err());

    let no_payload = &ciphertext[..header_len + 16];
    assert!(matches!(
        decrypt(no_payload, &[&identity]),
        Err(DecryptError::Truncated)
    ));
}

/// Split a binary container into (header + nonce, sealed chunks).
fn split_chunks(ciphertext: &[u8]) -> (Vec<u8>, Vec<Vec<u8>>) {
    let payload_start = decode_header(ciphertext).unwrap().1 + 16;
    let chunks = ciphertext[payload_start..]
        .chunks(CHUNK_SIZE + 16)
        .map(<[u8]>::to_vec)
        .collect();
    (ciphertext[..payload_start].to_vec(), chunks)
}

#[test]
fn swapped_chunks_are_rejected() {
    let (identity, ciphertext) = encrypted(3 * CHUNK_SIZE + 10);
    let (prefix, mut chunks) = split_chunks(&ciphertext);
    assert_eq!(chunks.len(), 4);

    chunks.swap(0, 1);
    let reordered = [prefix, chunks.concat()].concat();
    assert!(matches!(
        decrypt(&reordered, &[&identity]),
        Err(DecryptError::ChunkAuth(0))
    ));
}

#[test]
fn duplicated_chunk_is_rejected() {
    let (identity, ciphertext) = encrypted(3 * CHUNK_SIZE + 10);
    let (prefix, mut chunks) = split_chunks(&ciphertext);

    let repeat = chunks[1].clone();
    chunks.insert(2, repeat);
    let duplicated = [prefix, chunks.concat()].concat();
    assert!(matches!(
        decrypt(&duplicated, &[&identity]),
        Err(DecryptError::ChunkAuth(2))
    ));
}

#[test]
fn final_chunk_moved_forward_is_rejected() {
    let (identity, ciphertext) = encrypted(2 * CHUNK_SIZE + 10);
    let (prefix, mut chunks) = split_chunks(&ciphertext);

    let last = chunks.pop().unwrap();
    chunks.insert(1, last);
    let reordered = [prefix, chunks.concat()].concat();
    assert!(decrypt(&reordered, &[&identity]).is_err());
}

#[test]
fn trailing_garbage_is_rejected() {
    let (identity, mut ciphertext) = encrypted(10);
    ciphertext.extend_from_slice(b"garbage");
    assert!(decrypt(&ciphertext, &[identity]).is_err());
}

#[test]
fn unknown_version_is_a_format_error() {
    let (identity, ciphertext) = encrypted(10);
    let mut tampered = b"age-encryption.org/v2".to_vec();
    tampered.extend_from_slice(&ciphertext["age-encryption.org/v1".len()..]);
    assert!(matches!(
        decrypt(&tampered, &[identity]),
        Err(DecryptError::Format(FormatError::UnknownVersion(_)))
    ));
}

#[test]
fn armor_with_overlong_line_is_rejected() {
    let identity = x25519::Identity::generate();
    let armored = encrypt(&sample(500), &[identity.to_public()], true).unwrap();
    let text = String::from_utf8(armored).unwrap();
    let mut lines: Vec<&str> = text.lines().collect();
    let joined = format!("{}{}", lines[1], lines[2]);
    lines.splice(1..3, [joined.as_str()]);
    let broken = lines.join("\n") + "\n";

    assert!(matches!(
        decrypt(broken.as_bytes(), &[identity]),
        Err(DecryptError::Format(FormatError::Armor(_)))
    ));
}

#[test]
fn invalid_key_strings() {
    let err = "invalid ssh pubkey".parse::<AnyRecipient>().unwrap_err();
    assert!(err.to_string().contains("invalid SSH recipient"), "{err}");

    let err = "invalid ssh pubkey".parse::<ssh::Recipient>().unwrap_err();
    assert!(err.to_string().contains("invalid SSH recipient"), "{err}");

    let err = "BAD-PREFIX".parse::<AnyIdentity>().unwrap_err();
    assert!(err.to_string().contains("invalid Bech32 encoding"), "{err}");

    let err = "BAD-PREFIX".parse::<x25519::Identity>().unwrap_err();
    assert!(matches!(err, KeyError::InvalidBech32(_)));
}

#[test]
fn unusable_ssh_keys_are_rejected() {
    let encrypted_key = include_str!("data/ssh_ed25519_encrypted");
    let err = ssh::Identity::from_buffer(encrypted_key).unwrap_err();
    assert!(err.to_string().contains("ssh key must be decrypted first"));

    assert!(ssh::Identity::from_buffer(include_str!("data/ssh_ecdsa")).is_err());
    assert!(include_str!("data/ssh_ecdsa.pub").parse::<ssh::Recipient>().is_err());

    // The public half of an encrypted key is still a fine recipient.
    let recipient: ssh::Recipient = include_str!("data/ssh_ed25519_encrypted.pub")
        .parse()
        .unwrap();
    let ciphertext = encrypt(b"x", &[recipient], false).unwrap();
    let other = ssh::Identity::from_buffer(include_str!("data/ssh_ed25519")).unwrap();
    assert!(matches!(
        decrypt(&ciphertext, &[other]),
        Err(DecryptError::NoMatchingKeys)
    ));
}

#[test]
fn failed_file_decrypt_leaves_no_output() {
    let dir = tempfile::tempdir().unwrap();
    let plain = dir.path().join("plain.bin");
    let sealed = dir.path().join("plain.bin.age");
    let out = dir.path().join("out.bin");
    std::fs::write(&plain, sample(3 * CHUNK_SIZE)).unwrap();

    let identity = x25519::Identity::generate();
    encrypt_file(&plain, &sealed, &[identity.to_public()], false).unwrap();
    assert_eq!(
        decrypt_file(&sealed, &out, &[&identity]).unwrap(),
        3 * CHUNK_SIZE as u64
    );
    assert_eq!(std::fs::read(&out).unwrap(), sample(3 * CHUNK_SIZE));

    // Drop the final chunk: the partially written output must be removed.
    let bytes = std::fs::read(&sealed).unwrap();
    std::fs::write(&sealed, &bytes[..bytes.len() - 100]).unwrap();
    std::fs::remove_file(&out).unwrap();
    assert!(decrypt_file(&sealed, &out, &[&identity]).is_err());
    assert!(!out.exists());
}
