//! Encrypted payload codec
//!
//! Payload format (binary):
//! ```text
//! [23 bytes: marker "!SiMpLe!TwOfIsH!EdItOr!"]
//! [64 bytes: SHA-512(token || plaintext)]
//! [N bytes: Twofish-CBC(token || plaintext), N = ceil((16 + len) / 16) * 16]
//! ```
//!
//! A payload consisting of the marker alone is an empty document. The marker
//! doubles as the format version; any format change needs a new marker.
//!
//! The 16-byte random token makes every save produce a different ciphertext
//! even though CBC runs with a fixed zero IV. The digest is an integrity check
//! over secret plaintext, not a MAC. A failed check is reported the same way
//! for a wrong password and for corrupted bytes.

use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};
use zeroize::{Zeroize, Zeroizing};

use crate::cbc::Cbc;
use crate::enclave::{Enclave, Key};
use crate::error::{CryptoError, CryptoResult};
use crate::sha512;
use crate::{BLOCK_SIZE, DIGEST_SIZE, TOKEN_SIZE};

/// Fixed prefix identifying payloads produced by this codec.
pub const MARKER: &[u8] = b"!SiMpLe!TwOfIsH!EdItOr!";

/// Smallest payload that can hold a digest and a non-empty ciphertext.
pub const MIN_ENCRYPTED_LEN: usize = MARKER.len() + TOKEN_SIZE + DIGEST_SIZE + 1;

/// What a well-formed payload contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// Marker only: an explicitly empty document.
    Empty,
    /// Marker, digest and ciphertext.
    Encrypted,
}

/// Classify a payload without touching any key.
pub fn inspect(payload: &[u8]) -> CryptoResult<PayloadKind> {
    if payload.len() < MARKER.len() || &payload[..MARKER.len()] != MARKER {
        warn!(len = payload.len(), "payload marker mismatch");
        return Err(CryptoError::ForeignFormat);
    }
    if payload.len() == MARKER.len() {
        return Ok(PayloadKind::Empty);
    }
    if payload.len() < MIN_ENCRYPTED_LEN {
        warn!(len = payload.len(), min = MIN_ENCRYPTED_LEN, "payload too short");
        return Err(CryptoError::Corrupted {
            len: payload.len(),
            min: MIN_ENCRYPTED_LEN,
        });
    }
    Ok(PayloadKind::Encrypted)
}

/// Encrypt `plaintext` under the enclave key, drawing the token from the OS.
pub fn encrypt_payload(enclave: &Enclave, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    encrypt_payload_with_rng(enclave, plaintext, &mut OsRng)
}

/// Encrypt `plaintext` under the enclave key with a caller-supplied generator.
///
/// An empty plaintext yields the marker alone and needs no key. Otherwise the
/// enclave must be valid, and a failing generator aborts with
/// [`CryptoError::RandomnessUnavailable`] before anything is produced.
pub fn encrypt_payload_with_rng<R: RngCore + CryptoRng>(
    enclave: &Enclave,
    plaintext: &[u8],
    rng: &mut R,
) -> CryptoResult<Vec<u8>> {
    if plaintext.is_empty() {
        debug!("empty document, writing marker only");
        return Ok(MARKER.to_vec());
    }

    let key = enclave.get_key()?;

    let mut token = [0u8; TOKEN_SIZE];
    rng.try_fill_bytes(&mut token)
        .map_err(CryptoError::RandomnessUnavailable)?;

    let payload = seal(&key, &token, plaintext);
    token.zeroize();
    Ok(payload)
}

/// Build a non-empty payload around a given token.
fn seal(key: &Key, token: &[u8; TOKEN_SIZE], plaintext: &[u8]) -> Vec<u8> {
    let mut framed = Zeroizing::new(Vec::with_capacity(TOKEN_SIZE + plaintext.len()));
    framed.extend_from_slice(token);
    framed.extend_from_slice(plaintext);

    let digest = sha512::compute(&framed);
    let ciphertext = Cbc::new_with_key(key).cbc_encrypt(&framed);

    let mut payload = Vec::with_capacity(MARKER.len() + DIGEST_SIZE + ciphertext.len());
    payload.extend_from_slice(MARKER);
    payload.extend_from_slice(&digest);
    payload.extend_from_slice(&ciphertext);

    debug!(
        plaintext_len = plaintext.len(),
        payload_len = payload.len(),
        "payload encrypted"
    );
    payload
}

/// Decrypt a payload and return the recovered plaintext bytes.
///
/// A marker-only payload decrypts to empty content without consulting the
/// enclave.
pub fn decrypt_payload(enclave: &Enclave, payload: &[u8]) -> CryptoResult<Vec<u8>> {
    if inspect(payload)? == PayloadKind::Empty {
        debug!("empty document");
        return Ok(Vec::new());
    }

    let key = enclave.get_key()?;
    let (stored, ciphertext) = payload[MARKER.len()..].split_at(DIGEST_SIZE);
    let framed = Zeroizing::new(Cbc::new_with_key(&key).cbc_decrypt(ciphertext));

    let Some(len) = framed_len(&framed, stored) else {
        warn!("payload digest mismatch");
        return Err(CryptoError::IntegrityMismatch);
    };

    debug!(plaintext_len = len - TOKEN_SIZE, "payload decrypted");
    Ok(framed[TOKEN_SIZE..len].to_vec())
}

/// Decrypt a payload whose content is expected to be UTF-8 text.
pub fn decrypt_text(enclave: &Enclave, payload: &[u8]) -> CryptoResult<String> {
    let bytes = decrypt_payload(enclave, payload)?;
    String::from_utf8(bytes).map_err(|e| {
        e.into_bytes().zeroize();
        CryptoError::NotText
    })
}

/// Length of `token || plaintext` inside the zero-extended decryption output.
///
/// Zero padding records no length, so each length the padding permits
/// (0..=15 trailing zero bytes removed) is checked against the stored digest
/// over its full width.
fn framed_len(framed: &[u8], stored: &[u8]) -> Option<usize> {
    for trim in 0..BLOCK_SIZE {
        let len = framed.len().checked_sub(trim)?;
        if len < TOKEN_SIZE || (trim > 0 && framed[len] != 0) {
            return None;
        }
        let digest = sha512::compute(&framed[..len]);
        if bool::from(digest[..].ct_eq(stored)) {
            return Some(len);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const PASSWORD: &[u8] = b"correct horse battery staple";

    /// marker || digest || ciphertext for token 00..0f and plaintext "hello, twofish"
    const KNOWN_PAYLOAD: &str = "2153694d704c652154774f6649734821456449744f72215b421ff4ad5621b9b7\
        b50dda331e1e1bf74bf48bbe5738e17830bff9ad03b87d0867bbba73cae8c95257bc1693735927eb9c8026d4\
        9d13fd352e7bed26cc883e153f702e6ac9e3457b1eda04b427666d968ff5b12d5341e458996bc68ba6b6ff";

    struct BrokenRng;

    impl RngCore for BrokenRng {
        fn next_u32(&mut self) -> u32 {
            unimplemented!("only try_fill_bytes is used")
        }

        fn next_u64(&mut self) -> u64 {
            unimplemented!("only try_fill_bytes is used")
        }

        fn fill_bytes(&mut self, _dest: &mut [u8]) {
            unimplemented!("only try_fill_bytes is used")
        }

        fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> Result<(), rand::Error> {
            Err(rand::Error::new(std::io::Error::new(
                std::io::ErrorKind::Other,
                "entropy source offline",
            )))
        }
    }

    impl CryptoRng for BrokenRng {}

    fn token() -> [u8; TOKEN_SIZE] {
        let mut token = [0u8; TOKEN_SIZE];
        for (i, b) in token.iter_mut().enumerate() {
            *b = i as u8;
        }
        token
    }

    #[test]
    fn seal_known_answer() {
        let key = crate::derive_key(PASSWORD);
        let payload = seal(&key, &token(), b"hello, twofish");
        assert_eq!(hex::encode(payload), KNOWN_PAYLOAD);
    }

    #[test]
    fn decrypt_known_answer() {
        let enclave = Enclave::with_password(PASSWORD);
        let payload = hex::decode(KNOWN_PAYLOAD).unwrap();
        assert_eq!(decrypt_text(&enclave, &payload).unwrap(), "hello, twofish");
    }

    #[test]
    fn payload_layout() {
        let key = Key::from_bytes([9u8; 32]);
        let plaintext = b"exactly sixteen!";
        let payload = seal(&key, &token(), plaintext);

        assert_eq!(&payload[..MARKER.len()], MARKER);
        let mut framed = token().to_vec();
        framed.extend_from_slice(plaintext);
        assert_eq!(
            &payload[MARKER.len()..MARKER.len() + DIGEST_SIZE],
            &sha512::compute(&framed)[..]
        );
        // 16-byte token + 16 bytes of text = two blocks, no padding block
        assert_eq!(payload.len(), MARKER.len() + DIGEST_SIZE + 32);
    }

    #[test]
    fn empty_plaintext_is_marker_only() {
        let enclave = Enclave::new();
        let payload = encrypt_payload(&enclave, b"").unwrap();
        assert_eq!(payload, MARKER);
        assert_eq!(inspect(&payload).unwrap(), PayloadKind::Empty);
        assert_eq!(decrypt_payload(&enclave, &payload).unwrap(), b"");
    }

    #[test]
    fn invalid_enclave_has_no_key() {
        let valid = Enclave::with_password(PASSWORD);
        let payload = encrypt_payload(&valid, b"text").unwrap();

        let invalid = Enclave::new();
        assert!(matches!(
            encrypt_payload(&invalid, b"text"),
            Err(CryptoError::KeyUnavailable)
        ));
        assert!(matches!(
            decrypt_payload(&invalid, &payload),
            Err(CryptoError::KeyUnavailable)
        ));
    }

    #[test]
    fn randomness_failure_aborts() {
        let enclave = Enclave::with_password(PASSWORD);
        let result = encrypt_payload_with_rng(&enclave, b"secret", &mut BrokenRng);
        assert!(matches!(result, Err(CryptoError::RandomnessUnavailable(_))));
    }

    #[test]
    fn short_payloads_are_foreign() {
        let enclave = Enclave::new();
        for len in 0..MARKER.len() {
            assert!(
                matches!(
                    decrypt_payload(&enclave, &MARKER[..len]),
                    Err(CryptoError::ForeignFormat)
                ),
                "length {len}"
            );
        }
    }

    #[test]
    fn mismatched_marker_is_foreign() {
        let mut payload = MARKER.to_vec();
        payload[5] ^= 0x20;
        payload.extend_from_slice(&[0u8; 200]);
        assert!(matches!(inspect(&payload), Err(CryptoError::ForeignFormat)));
    }

    #[test]
    fn truncated_payloads_are_corrupted() {
        for len in MARKER.len() + 1..MIN_ENCRYPTED_LEN {
            let mut payload = MARKER.to_vec();
            payload.resize(len, 0xEE);
            assert!(
                matches!(inspect(&payload), Err(CryptoError::Corrupted { .. })),
                "length {len}"
            );
        }
    }

    #[test]
    fn trailing_zero_bytes_survive() {
        let key = Key::from_bytes([3u8; 32]);
        let enclave = Enclave::with_password(PASSWORD);
        let key_from_enclave = enclave.get_key().unwrap();

        for plaintext in [
            &b"abc\0\0\0"[..],
            &[0u8; 1][..],
            &[0u8; 16][..],
            &[0u8; 31][..],
            &b"ends with one nul\0"[..],
        ] {
            let payload = seal(&key_from_enclave, &token(), plaintext);
            assert_eq!(decrypt_payload(&enclave, &payload).unwrap(), plaintext);

            // A different key never finds a matching length
            let foreign_key_payload = seal(&key, &token(), plaintext);
            assert!(matches!(
                decrypt_payload(&enclave, &foreign_key_payload),
                Err(CryptoError::IntegrityMismatch)
            ));
        }
    }

    #[test]
    fn non_utf8_content_is_not_text() {
        let enclave = Enclave::with_password(PASSWORD);
        let payload = encrypt_payload(&enclave, &[0xFF, 0xFE, 0x00, 0x80]).unwrap();
        assert_eq!(
            decrypt_payload(&enclave, &payload).unwrap(),
            vec![0xFF, 0xFE, 0x00, 0x80]
        );
        assert!(matches!(
            decrypt_text(&enclave, &payload),
            Err(CryptoError::NotText)
        ));
    }
}
