//! Error types for keysync core.

use thiserror::Error;

use crate::types::{Fingerprint, KeyId};

/// Errors from operations on the key model itself.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("cannot merge key {other} into key {target}: fingerprints differ")]
    FingerprintMismatch {
        target: Fingerprint,
        other: Fingerprint,
    },

    #[error("key id collision: {0}")]
    KeyIdCollision(String),

    #[error("malformed key: {0}")]
    MalformedKey(String),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Errors reported by a [`CryptoProvider`](crate::crypto::CryptoProvider).
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The passphrase does not decrypt the secret key material.
    #[error("wrong passphrase")]
    WrongPassphrase,

    /// The operation needs decrypted secret material.
    #[error("secret key material of {0} is locked")]
    KeyLocked(KeyId),

    /// The key has no usable public material for encryption.
    #[error("key {0} has no usable encryption key")]
    NoEncryptionKey(KeyId),

    /// The key has no secret material for signing.
    #[error("key {0} cannot sign")]
    NoSigningKey(KeyId),

    /// None of the recipients of a message match the supplied private key.
    #[error("message is not encrypted for key {0}")]
    NotARecipient(KeyId),

    #[error("invalid armor: {0}")]
    InvalidArmor(String),

    #[error("key generation failed: {0}")]
    Generation(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("core error: {0}")]
    Core(#[from] CoreError),
}

/// Result type for crypto provider operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
