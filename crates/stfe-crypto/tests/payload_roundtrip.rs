//! End-to-end tests for the payload codec through the public API.
//!
//! Verifies round trips for arbitrary content, per-save variation from the
//! random token, tamper sensitivity over the digest and ciphertext regions,
//! and format classification of foreign or truncated input.

use proptest::prelude::*;
use stfe_crypto::payload::{MARKER, MIN_ENCRYPTED_LEN};
use stfe_crypto::{
    decrypt_payload, decrypt_text, encrypt_payload, inspect, CryptoError, Enclave, PayloadKind,
    BLOCK_SIZE, DIGEST_SIZE, TOKEN_SIZE,
};

fn enclave() -> Enclave {
    Enclave::with_password(b"integration-test-password")
}

#[test]
fn text_roundtrip() {
    let enclave = enclave();
    let text = "Dear diary,\nthe cipher is Twofish and the hash is SHA-512.\n";

    let payload = encrypt_payload(&enclave, text.as_bytes()).unwrap();
    assert_eq!(inspect(&payload).unwrap(), PayloadKind::Encrypted);
    assert_eq!(decrypt_text(&enclave, &payload).unwrap(), text);
}

#[test]
fn payload_size_matches_format() {
    let enclave = enclave();
    for len in [1usize, 15, 16, 17, 100, 4096] {
        let payload = encrypt_payload(&enclave, &vec![b'x'; len]).unwrap();
        let ciphertext_len = (TOKEN_SIZE + len).div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
        assert_eq!(
            payload.len(),
            MARKER.len() + DIGEST_SIZE + ciphertext_len,
            "plaintext length {len}"
        );
    }
}

#[test]
fn same_plaintext_encrypts_differently() {
    let enclave = enclave();
    let a = encrypt_payload(&enclave, b"same text").unwrap();
    let b = encrypt_payload(&enclave, b"same text").unwrap();

    assert_ne!(a, b, "random token must vary ciphertext and digest");
    assert_eq!(decrypt_payload(&enclave, &a).unwrap(), b"same text");
    assert_eq!(decrypt_payload(&enclave, &b).unwrap(), b"same text");
}

#[test]
fn wrong_password_is_integrity_mismatch() {
    let payload = encrypt_payload(&enclave(), b"for your eyes only").unwrap();
    let other = Enclave::with_password(b"not-the-password");

    assert!(matches!(
        decrypt_payload(&other, &payload),
        Err(CryptoError::IntegrityMismatch)
    ));
}

#[test]
fn sampled_bit_flips_are_detected() {
    let enclave = enclave();
    let payload = encrypt_payload(&enclave, b"a document long enough to span several blocks").unwrap();

    // Every bit of the digest region and a stride through the ciphertext region
    let digest_bits = MARKER.len() * 8..(MARKER.len() + DIGEST_SIZE) * 8;
    let ciphertext_bits = ((MARKER.len() + DIGEST_SIZE) * 8..payload.len() * 8).step_by(7);

    for bit in digest_bits.chain(ciphertext_bits) {
        let mut tampered = payload.clone();
        tampered[bit / 8] ^= 1 << (bit % 8);
        assert!(
            matches!(
                decrypt_payload(&enclave, &tampered),
                Err(CryptoError::IntegrityMismatch)
            ),
            "flipped bit {bit} went undetected"
        );
    }
}

#[test]
fn marker_bit_flip_is_foreign() {
    let enclave = enclave();
    let mut payload = encrypt_payload(&enclave, b"text").unwrap();
    payload[0] ^= 0x01;
    assert!(matches!(
        decrypt_payload(&enclave, &payload),
        Err(CryptoError::ForeignFormat)
    ));
}

#[test]
fn truncation_and_extension_are_rejected() {
    let enclave = enclave();
    let payload = encrypt_payload(&enclave, b"0123456789").unwrap();

    let truncated = &payload[..payload.len() - 1];
    assert!(decrypt_payload(&enclave, truncated).is_err());

    let mut extended = payload.clone();
    extended.extend_from_slice(&[0u8; BLOCK_SIZE]);
    assert!(decrypt_payload(&enclave, &extended).is_err());

    let too_short = &payload[..MIN_ENCRYPTED_LEN - 1];
    assert!(matches!(
        decrypt_payload(&enclave, too_short),
        Err(CryptoError::Corrupted { .. })
    ));
}

#[test]
fn marker_only_is_empty_document() {
    let invalid = Enclave::new();
    assert_eq!(decrypt_payload(&invalid, MARKER).unwrap(), b"");
    assert_eq!(decrypt_text(&invalid, MARKER).unwrap(), "");
}

#[test]
fn foreign_content_is_rejected() {
    let enclave = enclave();
    for payload in [
        &b""[..],
        &b"hello"[..],
        &b"AES\x03\x00 not ours at all, definitely not"[..],
    ] {
        assert!(matches!(
            decrypt_payload(&enclave, payload),
            Err(CryptoError::ForeignFormat)
        ));
    }
}

#[test]
fn invalidated_enclave_cannot_decrypt() {
    let mut enclave = enclave();
    let payload = encrypt_payload(&enclave, b"locked").unwrap();
    enclave.invalidate();
    assert!(matches!(
        decrypt_payload(&enclave, &payload),
        Err(CryptoError::KeyUnavailable)
    ));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn roundtrip_any_bytes(data in proptest::collection::vec(any::<u8>(), 0..=512)) {
        let enclave = enclave();
        let payload = encrypt_payload(&enclave, &data).unwrap();
        prop_assert_eq!(decrypt_payload(&enclave, &payload).unwrap(), data);
    }

    #[test]
    fn roundtrip_any_text(text in "\\PC{0,200}") {
        let enclave = enclave();
        let payload = encrypt_payload(&enclave, text.as_bytes()).unwrap();
        prop_assert_eq!(decrypt_text(&enclave, &payload).unwrap(), text);
    }
}
