//! The key data model.
//!
//! A [`Key`] is a primary key packet with its user identities, sub-keys and,
//! for the private variant, secret material. Identity is the primary
//! packet's [`Fingerprint`]; everything else can grow through [`Key::merge`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CoreError;
use crate::types::{Fingerprint, KeyId};

/// Public-key algorithm of a key packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    /// Signing and certification.
    Ed25519,
    /// Key agreement, used for encryption.
    X25519,
}

impl Algorithm {
    /// Bit length of keys of this algorithm.
    pub const fn bit_length(&self) -> u16 {
        match self {
            Algorithm::Ed25519 | Algorithm::X25519 => 256,
        }
    }

    pub const fn can_sign(&self) -> bool {
        matches!(self, Algorithm::Ed25519)
    }

    pub const fn can_encrypt(&self) -> bool {
        matches!(self, Algorithm::X25519)
    }

    /// Human readable algorithm name.
    pub const fn name(&self) -> &'static str {
        match self {
            Algorithm::Ed25519 => "Ed25519 (Sign)",
            Algorithm::X25519 => "X25519 (Encrypt)",
        }
    }

    const fn tag(&self) -> u8 {
        match self {
            Algorithm::Ed25519 => 1,
            Algorithm::X25519 => 2,
        }
    }
}

/// Public material of a primary key or sub-key packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMaterial {
    pub algorithm: Algorithm,
    /// Creation time (Unix ms).
    pub created: i64,
    /// Expiration time (Unix ms), if any.
    pub expires: Option<i64>,
    /// Raw public key bytes.
    pub public: Vec<u8>,
}

impl KeyMaterial {
    /// Fingerprint over algorithm, creation time and public bytes.
    ///
    /// Expiration is not covered so it can change without changing identity.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = blake3::Hasher::new_derive_key("keysync-fingerprint-v1");
        hasher.update(&[self.algorithm.tag()]);
        hasher.update(&self.created.to_be_bytes());
        hasher.update(&self.public);
        let hash = hasher.finalize();
        let mut fpr = [0u8; 20];
        fpr.copy_from_slice(&hash.as_bytes()[..20]);
        Fingerprint(fpr)
    }

    pub fn key_id(&self) -> KeyId {
        self.fingerprint().key_id()
    }

    pub fn bit_length(&self) -> u16 {
        self.algorithm.bit_length()
    }

    /// Whether the packet is expired at `now` (Unix ms).
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires.map(|exp| exp <= now).unwrap_or(false)
    }
}

/// A signature binding a user identity or sub-key to a primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certification {
    /// Key id of the signing primary key.
    pub issuer: KeyId,
    /// Signature creation time (Unix ms).
    pub created: i64,
    pub signature: Vec<u8>,
}

/// A user identity with its certifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserId {
    pub name: String,
    pub email: String,
    /// Certifications issued by the key itself.
    pub self_certifications: Vec<Certification>,
    /// Certifications issued by other keys.
    pub other_certifications: Vec<Certification>,
}

impl UserId {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            self_certifications: Vec::new(),
            other_certifications: Vec::new(),
        }
    }

    /// The conventional `Name <email>` rendering.
    pub fn user_id(&self) -> String {
        if self.name.is_empty() {
            format!("<{}>", self.email)
        } else {
            format!("{} <{}>", self.name, self.email)
        }
    }

    /// Case-insensitive address match.
    pub fn has_address(&self, email: &str) -> bool {
        self.email.eq_ignore_ascii_case(email.trim())
    }

    fn same_identity(&self, other: &UserId) -> bool {
        self.name == other.name && self.email.eq_ignore_ascii_case(&other.email)
    }

    /// Union of certifications. Returns whether anything was added.
    fn absorb(&mut self, other: &UserId) -> bool {
        let mut changed = union_certifications(&mut self.self_certifications, &other.self_certifications);
        changed |= union_certifications(&mut self.other_certifications, &other.other_certifications);
        changed
    }
}

fn union_certifications(into: &mut Vec<Certification>, from: &[Certification]) -> bool {
    let mut changed = false;
    for cert in from {
        if !into.iter().any(|c| c.signature == cert.signature) {
            into.push(cert.clone());
            changed = true;
        }
    }
    changed
}

/// A sub-key packet with its binding signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubKey {
    pub material: KeyMaterial,
    pub binding: Option<Certification>,
}

impl SubKey {
    pub fn fingerprint(&self) -> Fingerprint {
        self.material.fingerprint()
    }

    pub fn key_id(&self) -> KeyId {
        self.material.key_id()
    }
}

/// Secret bytes of one key packet, wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl PartialEq for SecretBytes {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for SecretBytes {}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes(<{} bytes>)", self.0.len())
    }
}

/// Decrypted secret material, one entry per covered key packet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretKeys {
    pub packets: BTreeMap<Fingerprint, SecretBytes>,
}

impl SecretKeys {
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<&SecretBytes> {
        self.packets.get(fingerprint)
    }
}

/// Passphrase-protected secret material.
///
/// `data` is provider specific; the whole secret set is sealed as one unit.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedSecret {
    /// Fingerprints of the packets whose secrets are sealed.
    pub covers: Vec<Fingerprint>,
    pub data: Vec<u8>,
}

impl fmt::Debug for SealedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SealedSecret")
            .field("covers", &self.covers)
            .field("data", &format_args!("<{} bytes>", self.data.len()))
            .finish()
    }
}

/// Secret material of a private key.
///
/// Either every secret packet is decrypted or every one is sealed; there is
/// no partially unlocked state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecretMaterial {
    Encrypted(SealedSecret),
    Decrypted(SecretKeys),
}

impl SecretMaterial {
    /// Fingerprints of the packets that carry secrets.
    pub fn covers(&self) -> Vec<Fingerprint> {
        match self {
            SecretMaterial::Encrypted(sealed) => sealed.covers.clone(),
            SecretMaterial::Decrypted(keys) => keys.packets.keys().copied().collect(),
        }
    }
}

/// Public or private variant of a stored key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyVariant {
    Public,
    Private,
}

impl fmt::Display for KeyVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyVariant::Public => f.write_str("public"),
            KeyVariant::Private => f.write_str("private"),
        }
    }
}

/// A public or private key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    pub primary: KeyMaterial,
    pub users: Vec<UserId>,
    pub subkeys: Vec<SubKey>,
    /// Present only for the private variant.
    pub secret: Option<SecretMaterial>,
}

impl Key {
    pub fn fingerprint(&self) -> Fingerprint {
        self.primary.fingerprint()
    }

    pub fn key_id(&self) -> KeyId {
        self.primary.key_id()
    }

    pub fn variant(&self) -> KeyVariant {
        if self.secret.is_some() {
            KeyVariant::Private
        } else {
            KeyVariant::Public
        }
    }

    pub fn is_private(&self) -> bool {
        self.secret.is_some()
    }

    pub fn is_public(&self) -> bool {
        self.secret.is_none()
    }

    /// Whether the secret material is usable without a passphrase.
    pub fn is_decrypted(&self) -> bool {
        matches!(self.secret, Some(SecretMaterial::Decrypted(_)))
    }

    pub fn created(&self) -> i64 {
        self.primary.created
    }

    pub fn expires(&self) -> Option<i64> {
        self.primary.expires
    }

    /// The public variant of this key.
    pub fn to_public(&self) -> Key {
        Key {
            primary: self.primary.clone(),
            users: self.users.clone(),
            subkeys: self.subkeys.clone(),
            secret: None,
        }
    }

    /// First user identity carrying a self-certification, else the first one.
    pub fn primary_user(&self) -> Option<&UserId> {
        self.users
            .iter()
            .find(|u| !u.self_certifications.is_empty())
            .or_else(|| self.users.first())
    }

    /// Whether any user identity carries `email`.
    pub fn has_address(&self, email: &str) -> bool {
        self.users.iter().any(|u| u.has_address(email))
    }

    pub fn subkey_ids(&self) -> Vec<KeyId> {
        self.subkeys.iter().map(SubKey::key_id).collect()
    }

    /// Whether the primary key or any sub-key has this id.
    pub fn has_key_id(&self, key_id: &KeyId) -> bool {
        self.key_id() == *key_id || self.subkeys.iter().any(|s| s.key_id() == *key_id)
    }

    /// The newest unexpired encryption sub-key carrying a binding at `now`.
    ///
    /// Structural only; the binding signature is not checked. See
    /// [`CryptoProvider::encryption_key_id`](crate::CryptoProvider::encryption_key_id).
    pub fn encryption_subkey(&self, now: i64) -> Option<&SubKey> {
        self.subkeys
            .iter()
            .filter(|s| {
                s.material.algorithm.can_encrypt()
                    && s.binding.is_some()
                    && !s.material.is_expired(now)
            })
            .max_by_key(|s| s.material.created)
    }

    /// Newest creation time among all packets and certifications.
    pub fn last_modified(&self) -> i64 {
        let certs = self.users.iter().flat_map(|u| {
            u.self_certifications
                .iter()
                .chain(u.other_certifications.iter())
                .map(|c| c.created)
        });
        let subs = self
            .subkeys
            .iter()
            .flat_map(|s| std::iter::once(s.material.created).chain(s.binding.iter().map(|b| b.created)));
        certs
            .chain(subs)
            .fold(self.primary.created, i64::max)
    }

    /// Check structural invariants of a parsed key.
    pub fn validate_structure(&self) -> Result<(), CoreError> {
        if self.users.is_empty() {
            return Err(CoreError::MalformedKey(format!(
                "key {} has no user ids",
                self.key_id()
            )));
        }
        if !self.primary.algorithm.can_sign() {
            return Err(CoreError::MalformedKey(format!(
                "primary key {} cannot certify",
                self.key_id()
            )));
        }
        if let Some(secret) = &self.secret {
            let fpr = self.fingerprint();
            let covers = secret.covers();
            if !covers.contains(&fpr) {
                return Err(CoreError::MalformedKey(format!(
                    "secret material of {} does not cover the primary key",
                    self.key_id()
                )));
            }
            let known: Vec<Fingerprint> = self.subkeys.iter().map(SubKey::fingerprint).collect();
            if let Some(stray) = covers.iter().find(|c| **c != fpr && !known.contains(c)) {
                return Err(CoreError::MalformedKey(format!(
                    "secret material for unknown packet {}",
                    stray
                )));
            }
        }
        Ok(())
    }

    /// Merge another copy of the same key into this one.
    ///
    /// The result is the union of user ids, certifications and sub-keys.
    /// Secret material is adopted only when this copy has none. Returns
    /// whether anything changed.
    pub fn merge(&mut self, other: &Key) -> Result<bool, CoreError> {
        let target = self.fingerprint();
        let incoming = other.fingerprint();
        if target != incoming {
            return Err(CoreError::FingerprintMismatch {
                target,
                other: incoming,
            });
        }

        let mut changed = false;

        for user in &other.users {
            match self.users.iter_mut().find(|u| u.same_identity(user)) {
                Some(existing) => changed |= existing.absorb(user),
                None => {
                    self.users.push(user.clone());
                    changed = true;
                }
            }
        }

        for sub in &other.subkeys {
            let fpr = sub.fingerprint();
            match self.subkeys.iter_mut().find(|s| s.fingerprint() == fpr) {
                Some(existing) => {
                    if existing.binding.is_none() && sub.binding.is_some() {
                        existing.binding = sub.binding.clone();
                        changed = true;
                    }
                }
                None => {
                    self.subkeys.push(sub.clone());
                    changed = true;
                }
            }
        }

        if self.secret.is_none() {
            if let Some(secret) = &other.secret {
                self.secret = Some(secret.clone());
                changed = true;
            }
        }

        Ok(changed)
    }

    /// Whether both keys carry the same set of packets, ignoring order.
    pub fn same_packets(&self, other: &Key) -> bool {
        let mut a = self.clone();
        let mut b = other.clone();
        match (a.merge(other), b.merge(self)) {
            (Ok(false), Ok(false)) => a.secret == b.secret,
            _ => false,
        }
    }
}
