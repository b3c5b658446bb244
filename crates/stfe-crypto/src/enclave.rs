//! Key derivation: password → stretched SHA-512 → 256-bit Twofish key,
//! and the enclave that holds the current key between password entry and use.
//!
//! The enclave keeps the key byte-wise rotated while it sits in memory. That
//! rotation is obfuscation against casual memory inspection (core dumps, swap
//! pages, debuggers glancing at the heap); it is not a cryptographic control.
//! Resistance to password guessing comes from the key stretching alone.

use tracing::debug;
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::sha512;
use crate::KEY_SIZE;

/// Number of re-hashes applied after the initial password hash.
pub const STRETCH_ROUNDS: usize = 1234;

/// A 256-bit Twofish key. Zeroized on drop.
#[derive(Clone)]
pub struct Key {
    bytes: [u8; KEY_SIZE],
}

impl Key {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for Key {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Key").field("bytes", &"[REDACTED]").finish()
    }
}

/// Derive a key from raw password bytes.
///
/// The password is hashed once, the digest re-hashed [`STRETCH_ROUNDS`] times,
/// and the two 32-byte halves of the final digest are added byte-wise
/// (wrapping). Any byte sequence is accepted, including an empty one.
pub fn derive_key(password: &[u8]) -> Key {
    let mut digest = sha512::compute(password);
    for _ in 0..STRETCH_ROUNDS {
        let next = sha512::compute(&digest);
        digest.zeroize();
        digest = next;
    }

    let (low, high) = digest.split_at(KEY_SIZE);
    let mut bytes = [0u8; KEY_SIZE];
    for ((out, l), h) in bytes.iter_mut().zip(low).zip(high) {
        *out = l.wrapping_add(*h);
    }
    digest.zeroize();

    Key::from_bytes(bytes)
}

/// Rotation applied to vault byte `i`, cycling 1..=7.
fn rotation(i: usize) -> u32 {
    (i % 7) as u32 + 1
}

fn conceal(key: &[u8; KEY_SIZE]) -> [u8; KEY_SIZE] {
    let mut vault = [0u8; KEY_SIZE];
    for (i, (out, b)) in vault.iter_mut().zip(key).enumerate() {
        *out = b.rotate_right(rotation(i));
    }
    vault
}

fn reveal(vault: &[u8; KEY_SIZE]) -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    for (i, (out, b)) in key.iter_mut().zip(vault).enumerate() {
        *out = b.rotate_left(rotation(i));
    }
    key
}

/// Holder of the currently active key.
///
/// Either fully invalid (vault all zero, no key) or fully valid. The host owns
/// one enclave per open/save cycle and passes it to the payload codec; a
/// multi-threaded host must wrap it in a single lock so the flag and the key
/// bytes always change together.
pub struct Enclave {
    vault: [u8; KEY_SIZE],
    valid: bool,
}

impl Enclave {
    /// A fresh, invalid enclave.
    pub fn new() -> Self {
        Self {
            vault: [0u8; KEY_SIZE],
            valid: false,
        }
    }

    /// Convenience constructor: a valid enclave holding the key for `password`.
    pub fn with_password(password: &[u8]) -> Self {
        let mut enclave = Self::new();
        enclave.set_password(password);
        enclave
    }

    /// Derive the key for `password`, store it and mark the enclave valid.
    pub fn set_password(&mut self, password: &[u8]) {
        debug!(rounds = STRETCH_ROUNDS, "deriving key from password");
        let key = derive_key(password);
        self.vault = conceal(key.as_bytes());
        self.valid = true;
    }

    /// The stored key in usable form.
    ///
    /// Fails with [`CryptoError::KeyUnavailable`] if no password has been set
    /// since creation or the last [`invalidate`](Self::invalidate).
    pub fn get_key(&self) -> CryptoResult<Key> {
        if !self.valid {
            return Err(CryptoError::KeyUnavailable);
        }
        Ok(Key::from_bytes(reveal(&self.vault)))
    }

    /// Zero the vault and clear the valid flag.
    pub fn invalidate(&mut self) {
        self.vault.zeroize();
        self.valid = false;
        debug!("enclave invalidated");
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

impl Default for Enclave {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Enclave {
    fn drop(&mut self) {
        self.vault.zeroize();
    }
}

impl std::fmt::Debug for Enclave {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enclave")
            .field("vault", &"[REDACTED]")
            .field("valid", &self.valid)
            .finish()
    }
}
