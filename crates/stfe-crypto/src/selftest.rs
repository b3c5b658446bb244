//! Known-answer self-test for the Twofish and SHA-512 implementations
//!
//! Run once at process start. A miscompiled or mistranscribed table still
//! produces output, just the wrong output, so the host must refuse to touch
//! any document when this fails.

use tracing::{debug, error};

use crate::enclave::Key;
use crate::error::{CryptoError, CryptoResult};
use crate::sha512;
use crate::twofish::{Block, Twofish};
use crate::{BLOCK_SIZE, KEY_SIZE};

/// Iterations of the key-feedback harness.
const FEEDBACK_ROUNDS: usize = 49;

/// Ciphertext after 49 key-feedback iterations from an all-zero key and block.
const FEEDBACK_CT49: Block = [
    0x37, 0xfe, 0x26, 0xff, 0x1c, 0xf6, 0x61, 0x75, 0xf5, 0xdd, 0xf4, 0xc3, 0x3b, 0x97, 0xa2, 0x05,
];

const SHA_INPUT: &[u8] = b"The quick brown fox jumps over the lazy dog";

const SHA_EXPECTED: sha512::Digest = [
    0x07, 0xe5, 0x47, 0xd9, 0x58, 0x6f, 0x6a, 0x73, 0xf7, 0x3f, 0xba, 0xc0, 0x43, 0x5e, 0xd7, 0x69,
    0x51, 0x21, 0x8f, 0xb7, 0xd0, 0xc8, 0xd7, 0x88, 0xa3, 0x09, 0xd7, 0x85, 0x43, 0x6b, 0xbb, 0x64,
    0x2e, 0x93, 0xa2, 0x52, 0xa9, 0x54, 0xf2, 0x39, 0x12, 0x54, 0x7d, 0x1e, 0x8a, 0x3b, 0x5e, 0xd6,
    0xe1, 0xbf, 0xd7, 0x09, 0x78, 0x21, 0x23, 0x3f, 0xa0, 0x53, 0x8f, 0x3d, 0xb8, 0x54, 0xfe, 0xe6,
];

/// Run the Twofish key-feedback chain for `rounds` iterations.
///
/// Each iteration encrypts the current block, checks that decryption restores
/// it, then shifts the key: the old low half moves up and the plaintext
/// becomes the new low half; the ciphertext becomes the next plaintext.
/// Returns the last ciphertext, or `None` if any decryption failed to invert.
pub fn key_feedback(rounds: usize) -> Option<Block> {
    let half = KEY_SIZE / 2;
    let mut key = [0u8; KEY_SIZE];
    let mut plaintext = [0u8; BLOCK_SIZE];
    let mut ciphertext = [0u8; BLOCK_SIZE];

    for _ in 0..rounds {
        let cipher = Twofish::new(&Key::from_bytes(key));

        ciphertext = plaintext;
        cipher.encrypt_block(&mut ciphertext);
        let mut check = ciphertext;
        cipher.decrypt_block(&mut check);
        if check != plaintext {
            return None;
        }

        key.copy_within(0..half, half);
        key[..half].copy_from_slice(&plaintext);
        plaintext = ciphertext;
    }
    Some(ciphertext)
}

fn check_twofish() -> bool {
    key_feedback(FEEDBACK_ROUNDS) == Some(FEEDBACK_CT49)
}

fn check_sha512() -> bool {
    sha512::compute(SHA_INPUT) == SHA_EXPECTED
}

/// Run both known-answer checks, naming the primitive that failed.
pub fn verify() -> CryptoResult<()> {
    if !check_twofish() {
        error!("Twofish known-answer test failed");
        return Err(CryptoError::SelfTestFailure("Twofish"));
    }
    if !check_sha512() {
        error!("SHA-512 known-answer test failed");
        return Err(CryptoError::SelfTestFailure("SHA-512"));
    }
    debug!("self-test passed");
    Ok(())
}

/// `true` if both primitives reproduce their known answers.
pub fn run() -> bool {
    verify().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_test_passes() {
        assert!(run());
        assert!(verify().is_ok());
    }

    #[test]
    fn feedback_chain_known_answer() {
        assert_eq!(key_feedback(FEEDBACK_ROUNDS), Some(FEEDBACK_CT49));
    }

    #[test]
    fn first_feedback_round_is_zero_key_vector() {
        let expected = hex::decode("57ff739d4dc92c1bd7fc01700cc8216f").unwrap();
        assert_eq!(key_feedback(1).unwrap().to_vec(), expected);
    }

    #[test]
    fn zero_rounds_yields_zero_block() {
        assert_eq!(key_feedback(0), Some([0u8; BLOCK_SIZE]));
    }
}
