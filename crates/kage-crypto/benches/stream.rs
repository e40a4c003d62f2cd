use std::io::{Read, Write};

use kage_crypto::stream::{StreamReader, StreamWriter};
use kage_crypto::{decrypt, encrypt, keys, x25519};

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

fn seal(data: &[u8]) -> Vec<u8> {
    let payload_key = keys::derive_payload_key(&keys::generate_file_key(), &[0u8; 16]);
    let mut writer = StreamWriter::new(Vec::new(), &payload_key);
    writer.write_all(data).unwrap();
    writer.finish().unwrap()
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_seal_stream(bencher: divan::Bencher, size: usize) {
    let payload_key = keys::derive_payload_key(&keys::generate_file_key(), &[0u8; 16]);
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            let mut writer = StreamWriter::new(Vec::with_capacity(size + 64), &payload_key);
            writer.write_all(divan::black_box(&data)).unwrap();
            writer.finish().unwrap()
        });
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_open_stream(bencher: divan::Bencher, size: usize) {
    let file_key = keys::generate_file_key();
    let payload_key = keys::derive_payload_key(&file_key, &[0u8; 16]);
    let mut writer = StreamWriter::new(Vec::new(), &payload_key);
    writer.write_all(&make_data(size)).unwrap();
    let sealed = writer.finish().unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            let mut out = Vec::with_capacity(size);
            StreamReader::new(divan::black_box(&sealed[..]), &payload_key)
                .read_to_end(&mut out)
                .unwrap();
            out
        });
}

#[divan::bench(args = [1024, 1048576])]
fn bench_x25519_roundtrip(bencher: divan::Bencher, size: usize) {
    let identity = x25519::Identity::generate();
    let recipients = [identity.to_public()];
    let identities = [identity];
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            let ciphertext = encrypt(divan::black_box(&data), &recipients, false).unwrap();
            decrypt(&ciphertext, &identities).unwrap()
        });
}

#[divan::bench]
fn bench_seal_empty() -> Vec<u8> {
    seal(divan::black_box(&[]))
}

fn main() {
    divan::main();
}
