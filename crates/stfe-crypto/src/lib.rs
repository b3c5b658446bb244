//! stfe-crypto: the symmetric crypto core of Simple Twofish Editor
//!
//! Architecture: password → key enclave → Twofish-256 CBC with digest-verified payloads
//!
//! Pipeline (save): plaintext → prepend random token → SHA-512 digest → Twofish CBC → payload
//!
//! Payload layout:
//! ```text
//! [23 bytes: marker "!SiMpLe!TwOfIsH!EdItOr!"]
//! [64 bytes: SHA-512(token || plaintext)]          (absent for an empty document)
//! [N bytes: Twofish-CBC(token || plaintext)]       (N = ceil((16 + len) / 16) * 16)
//! ```
//!
//! Key handling:
//! ```text
//! password ──SHA-512 × 1235──► 64-byte digest ──fold halves──► 256-bit key
//!                                                    │
//!                                     Enclave (rotated in memory, valid flag)
//! ```

pub mod cbc;
pub mod enclave;
pub mod error;
pub mod payload;
pub mod selftest;
pub mod sha512;
pub mod twofish;

pub use cbc::Cbc;
pub use enclave::{derive_key, Enclave, Key};
pub use error::{CryptoError, CryptoResult};
pub use payload::{
    decrypt_payload, decrypt_text, encrypt_payload, encrypt_payload_with_rng, inspect, PayloadKind,
};
pub use sha512::{Digest, Sha512};
pub use twofish::{Block, Twofish};

/// Size of a Twofish key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of a Twofish block in bytes (128-bit)
pub const BLOCK_SIZE: usize = 16;

/// Size of a SHA-512 digest in bytes
pub const DIGEST_SIZE: usize = 64;

/// Size of the random token prepended to every non-empty plaintext
pub const TOKEN_SIZE: usize = 16;
