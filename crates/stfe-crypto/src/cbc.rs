//! Twofish in cipher block chaining mode with a fixed all-zero IV
//!
//! Padding rule: input is zero-extended to the next multiple of 16 bytes, on
//! encryption and decryption alike. Output length is always a multiple of the
//! block size. The layer does not record the original length; callers frame
//! their own content (see [`crate::payload`]).
//!
//! No IV is transmitted. Callers that need distinct ciphertexts for equal
//! plaintexts must put fresh randomness in the first block themselves.

use crate::enclave::Key;
use crate::twofish::{Block, Twofish};
use crate::BLOCK_SIZE;

/// A keyed CBC instance.
#[derive(Debug)]
pub struct Cbc {
    cipher: Twofish,
}

fn xor_into(block: &mut Block, other: &Block) {
    for (b, o) in block.iter_mut().zip(other) {
        *b ^= o;
    }
}

/// Copy `chunk` (at most one block) into a zero-extended block.
fn padded_block(chunk: &[u8]) -> Block {
    let mut block = [0u8; BLOCK_SIZE];
    block[..chunk.len()].copy_from_slice(chunk);
    block
}

impl Cbc {
    pub fn new_with_key(key: &Key) -> Self {
        Self {
            cipher: Twofish::new(key),
        }
    }

    /// Encrypt `data`, zero-extended to a whole number of blocks.
    pub fn cbc_encrypt(&self, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(padded_len(data.len()));
        let mut prev = [0u8; BLOCK_SIZE];

        for chunk in data.chunks(BLOCK_SIZE) {
            let mut block = padded_block(chunk);
            xor_into(&mut block, &prev);
            self.cipher.encrypt_block(&mut block);
            out.extend_from_slice(&block);
            prev = block;
        }
        out
    }

    /// Decrypt `data`. A trailing partial block is zero-extended first, so the
    /// output length is always a multiple of the block size.
    pub fn cbc_decrypt(&self, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(padded_len(data.len()));
        let mut prev = [0u8; BLOCK_SIZE];

        for chunk in data.chunks(BLOCK_SIZE) {
            let ciphertext = padded_block(chunk);
            let mut block = ciphertext;
            self.cipher.decrypt_block(&mut block);
            xor_into(&mut block, &prev);
            out.extend_from_slice(&block);
            prev = ciphertext;
        }
        out
    }
}

/// Length of `len` bytes after zero-extension to the block size.
pub fn padded_len(len: usize) -> usize {
    len.div_ceil(BLOCK_SIZE) * BLOCK_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_cbc() -> Cbc {
        Cbc::new_with_key(&Key::from_bytes([42u8; 32]))
    }

    #[test]
    fn empty_input_gives_empty_output() {
        let cbc = test_cbc();
        assert!(cbc.cbc_encrypt(b"").is_empty());
        assert!(cbc.cbc_decrypt(b"").is_empty());
    }

    #[test]
    fn output_is_block_aligned() {
        let cbc = test_cbc();
        for len in 0..=50 {
            let data = vec![0x11u8; len];
            let encrypted = cbc.cbc_encrypt(&data);
            assert_eq!(encrypted.len(), padded_len(len), "length {len}");
            assert_eq!(encrypted.len() % BLOCK_SIZE, 0);
        }
    }

    #[test]
    fn first_block_uses_zero_iv() {
        let key = Key::from_bytes([7u8; 32]);
        let cbc = Cbc::new_with_key(&key);
        let mut expected = [0x33u8; BLOCK_SIZE];
        Twofish::new(&key).encrypt_block(&mut expected);

        let encrypted = cbc.cbc_encrypt(&[0x33u8; BLOCK_SIZE]);
        assert_eq!(encrypted, expected.to_vec());
    }

    #[test]
    fn identical_blocks_are_chained() {
        let cbc = test_cbc();
        let encrypted = cbc.cbc_encrypt(&[0xABu8; 3 * BLOCK_SIZE]);
        let blocks: Vec<&[u8]> = encrypted.chunks(BLOCK_SIZE).collect();
        assert_ne!(blocks[0], blocks[1]);
        assert_ne!(blocks[1], blocks[2]);
    }

    #[test]
    fn short_input_is_zero_extended() {
        let cbc = test_cbc();
        let decrypted = cbc.cbc_decrypt(&cbc.cbc_encrypt(b"abc"));
        assert_eq!(decrypted.len(), BLOCK_SIZE);
        assert_eq!(&decrypted[..3], b"abc");
        assert!(decrypted[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn ciphertext_bit_flip_garbles_its_block() {
        let cbc = test_cbc();
        let data = b"0123456789abcdef0123456789abcdef";
        let mut encrypted = cbc.cbc_encrypt(data);
        encrypted[BLOCK_SIZE + 2] ^= 0x01;
        let decrypted = cbc.cbc_decrypt(&encrypted);
        assert_eq!(&decrypted[..BLOCK_SIZE], &data[..BLOCK_SIZE]);
        assert_ne!(&decrypted[BLOCK_SIZE..], &data[BLOCK_SIZE..]);
    }

    proptest! {
        #[test]
        fn decrypt_inverts_encrypt(
            key in any::<[u8; 32]>(),
            data in proptest::collection::vec(any::<u8>(), 0..=256),
        ) {
            let cbc = Cbc::new_with_key(&Key::from_bytes(key));
            let decrypted = cbc.cbc_decrypt(&cbc.cbc_encrypt(&data));
            prop_assert_eq!(&decrypted[..data.len()], &data[..]);
            prop_assert!(decrypted[data.len()..].iter().all(|&b| b == 0));
        }
    }
}
