//! # Keysync Core
//!
//! Key identities, the key data model, and the crypto provider capability.
//!
//! This crate does no I/O. Everything cryptographic sits behind
//! [`CryptoProvider`]; [`SoftCrypto`] is the bundled implementation.
//!
//! ## Key Types
//!
//! - [`Key`] - A public or private key with user ids and sub-keys
//! - [`Fingerprint`] - Full identifier of a key packet
//! - [`KeyId`] - Short identifier, may collide
//! - [`KeyringId`] - Identifier of a keyring replica set

pub mod crypto;
pub mod error;
pub mod key;
pub mod soft;
pub mod types;

pub use crypto::{
    CryptoProvider, DecryptedMessage, GenerateOptions, KeyStatus, ParsedKeys,
    SignatureVerification, UserIdSpec,
};
pub use error::{CoreError, CryptoError};
pub use key::{
    Algorithm, Certification, Key, KeyMaterial, KeyVariant, SealedSecret, SecretBytes,
    SecretKeys, SecretMaterial, SubKey, UserId,
};
pub use soft::{KdfParams, SoftCrypto};
pub use types::{now_millis, Fingerprint, KeyId, KeyringId};
