use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Outcome classifications reported back to the host.
///
/// Every failing encrypt/decrypt call yields exactly one of these; none of them
/// is retried inside the crate.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("randomness source unavailable: {0}")]
    RandomnessUnavailable(#[source] rand::Error),

    #[error("not a Simple Twofish Editor payload")]
    ForeignFormat,

    #[error("payload appears to be corrupted: {len} bytes (minimum {min})")]
    Corrupted { len: usize, min: usize },

    /// Wrong password and bit-level corruption are deliberately indistinguishable.
    #[error("decryption failed: check the password and try again")]
    IntegrityMismatch,

    #[error("no key available: a password must be set first")]
    KeyUnavailable,

    #[error("decrypted content is not valid UTF-8 text")]
    NotText,

    #[error("self-test failed: {0}")]
    SelfTestFailure(&'static str),
}
