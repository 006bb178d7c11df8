//! The crypto provider capability.
//!
//! Keyrings never touch cryptographic primitives directly. Everything that
//! parses, generates, unlocks, encrypts or signs goes through a
//! [`CryptoProvider`], so the keyring logic can be exercised against any
//! conforming implementation.

use async_trait::async_trait;

use crate::error::Result;
use crate::key::Key;
use crate::types::KeyId;

/// A user identity to put on a generated key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdSpec {
    pub name: String,
    pub email: String,
}

impl UserIdSpec {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

/// Options for generating a key pair.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// Requested key size in bits.
    pub bits: u32,
    pub user_ids: Vec<UserIdSpec>,
    /// Passphrase protecting the secret material. `None` leaves it decrypted.
    pub passphrase: Option<String>,
    /// Expiration time (Unix ms).
    pub expires_at: Option<i64>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            bits: 256,
            user_ids: Vec::new(),
            passphrase: None,
            expires_at: None,
        }
    }
}

/// Outcome of verifying a primary key's self-certifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    Valid,
    Expired,
    /// No user identity carries a valid self-certification.
    NoSelfCertification,
    Invalid,
}

impl KeyStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, KeyStatus::Valid)
    }
}

/// Result of checking one signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureVerification {
    /// Key id of the issuer named in the signature.
    pub key_id: KeyId,
    /// `None` when no verifying key for the issuer was supplied.
    pub valid: Option<bool>,
}

/// A decrypted message and the checks on its embedded signatures.
#[derive(Debug, Clone)]
pub struct DecryptedMessage {
    pub plaintext: Vec<u8>,
    pub signatures: Vec<SignatureVerification>,
}

/// Keys parsed from armored text, with per-block errors.
#[derive(Debug, Clone, Default)]
pub struct ParsedKeys {
    pub keys: Vec<Key>,
    pub errors: Vec<String>,
}

/// Cryptographic operations used by keyrings.
#[async_trait]
pub trait CryptoProvider: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Key material
    // ─────────────────────────────────────────────────────────────────────────

    /// Parse armored text into keys. Malformed blocks are reported in
    /// [`ParsedKeys::errors`] and do not abort the rest.
    fn read_armored(&self, armored: &str) -> ParsedKeys;

    /// Render a key as armored text.
    fn armor(&self, key: &Key) -> Result<String>;

    /// Check the primary key's expiration and self-certifications.
    fn verify_primary_key(&self, key: &Key) -> KeyStatus;

    /// Id of the newest unexpired encryption subkey whose binding signature
    /// verifies at `now`.
    fn encryption_key_id(&self, key: &Key, now: i64) -> Option<KeyId>;

    /// Id of the packet that issues signatures for `key`.
    fn signing_key_id(&self, key: &Key) -> KeyId {
        key.key_id()
    }

    /// Generate a new private key.
    async fn generate_key_pair(&self, options: &GenerateOptions) -> Result<Key>;

    /// Return a copy of `key` with its secret material decrypted.
    ///
    /// Fails with [`CryptoError::WrongPassphrase`](crate::error::CryptoError::WrongPassphrase)
    /// when the passphrase does not match.
    async fn decrypt_key(&self, key: &Key, passphrase: &str) -> Result<Key>;

    // ─────────────────────────────────────────────────────────────────────────
    // Messages
    // ─────────────────────────────────────────────────────────────────────────

    /// Encrypt to every recipient, signing with `signer` if given.
    async fn encrypt(&self, data: &[u8], recipients: &[Key], signer: Option<&Key>)
        -> Result<Vec<u8>>;

    /// Key ids the message is encrypted to.
    fn recipient_key_ids(&self, ciphertext: &[u8]) -> Result<Vec<KeyId>>;

    /// Decrypt with a decrypted private key and check embedded signatures
    /// against `verifiers`.
    async fn decrypt(
        &self,
        ciphertext: &[u8],
        private_key: &Key,
        verifiers: &[Key],
    ) -> Result<DecryptedMessage>;

    /// Produce a detached signature.
    async fn sign(&self, data: &[u8], key: &Key) -> Result<Vec<u8>>;

    /// Check a detached signature against `keys`.
    async fn verify(
        &self,
        data: &[u8],
        signature: &[u8],
        keys: &[Key],
    ) -> Result<Vec<SignatureVerification>>;
}
