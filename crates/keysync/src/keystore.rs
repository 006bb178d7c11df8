//! In-memory key store of one keyring.
//!
//! Holds at most one record per fingerprint: a private record replaces the
//! public one for the same key.

use std::collections::BTreeMap;

use thiserror::Error;

use keysync_core::{Fingerprint, Key, KeyId, KeyVariant};

use crate::config::AddressQuery;

/// How an accepted key changed the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStatus {
    /// The key was not stored before.
    Inserted,
    /// The key was merged into the existing record of the same variant, or
    /// a public key into an existing private record.
    Updated,
    /// A private key replaced a public-only record.
    Promoted,
}

/// Why a key was not imported.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImportRejection {
    #[error("key id collision: {0}")]
    KeyIdCollision(String),

    #[error("expected a {expected} key, found a {found} key")]
    WrongVariant {
        expected: KeyVariant,
        found: KeyVariant,
    },

    #[error("invalid key: {0}")]
    Invalid(String),

    #[error("unreadable key material: {0}")]
    Unreadable(String),
}

/// Public and private keys of one keyring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyStore {
    public: BTreeMap<Fingerprint, Key>,
    private: BTreeMap<Fingerprint, Key>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from persisted lists.
    ///
    /// A fingerprint present in both lists keeps the private record.
    pub fn from_keys(public: Vec<Key>, private: Vec<Key>) -> Self {
        let private: BTreeMap<_, _> = private.into_iter().map(|k| (k.fingerprint(), k)).collect();
        let public = public
            .into_iter()
            .map(|k| (k.fingerprint(), k))
            .filter(|(fpr, _)| !private.contains_key(fpr))
            .collect();
        Self { public, private }
    }

    pub fn public_keys(&self) -> impl Iterator<Item = &Key> {
        self.public.values()
    }

    pub fn private_keys(&self) -> impl Iterator<Item = &Key> {
        self.private.values()
    }

    /// Every key, private records first.
    pub fn iter(&self) -> impl Iterator<Item = &Key> {
        self.private.values().chain(self.public.values())
    }

    pub fn len(&self) -> usize {
        self.public.len() + self.private.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.private.contains_key(fingerprint) || self.public.contains_key(fingerprint)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lookup
    // ─────────────────────────────────────────────────────────────────────────

    pub fn lookup_by_fingerprint(&self, fingerprint: &Fingerprint) -> Option<&Key> {
        self.private
            .get(fingerprint)
            .or_else(|| self.public.get(fingerprint))
    }

    /// Keys whose primary key id is `key_id`. Short ids may be ambiguous.
    pub fn lookup_by_id(&self, key_id: &KeyId) -> Vec<&Key> {
        self.iter().filter(|k| k.key_id() == *key_id).collect()
    }

    /// Keys with `key_id` as primary or subkey id.
    pub fn lookup_by_any_id(&self, key_id: &KeyId) -> Vec<&Key> {
        self.iter().filter(|k| k.has_key_id(key_id)).collect()
    }

    /// Keys carrying `email`, the designated primary key first, then newest
    /// first.
    ///
    /// `is_valid` is only consulted when the query requires valid keys.
    pub fn lookup_by_address<F>(
        &self,
        email: &str,
        query: &AddressQuery,
        primary: Option<&KeyId>,
        mut is_valid: F,
    ) -> Vec<&Key>
    where
        F: FnMut(&Key) -> bool,
    {
        let private = self.private.values().filter(|_| query.include_private);
        let public = self.public.values().filter(|_| query.include_public);
        let mut found: Vec<&Key> = private
            .chain(public)
            .filter(|k| k.has_address(email))
            .filter(|k| !query.require_valid || is_valid(k))
            .collect();

        found.sort_by(|a, b| {
            let a_primary = primary == Some(&a.key_id());
            let b_primary = primary == Some(&b.key_id());
            b_primary
                .cmp(&a_primary)
                .then_with(|| b.created().cmp(&a.created()))
        });
        found
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutation
    // ─────────────────────────────────────────────────────────────────────────

    /// Reject `key` if one of its ids clashes with a different stored key.
    ///
    /// Equal primary ids are allowed; such keys are told apart by
    /// fingerprint.
    pub fn check_key_id(&self, key: &Key) -> Result<(), ImportRejection> {
        let fingerprint = key.fingerprint();
        let ids = (key.key_id(), key.subkey_ids());

        for other in self.iter().filter(|k| k.fingerprint() != fingerprint) {
            if let Some(reason) = id_clash(&ids, &(other.key_id(), other.subkey_ids())) {
                return Err(ImportRejection::KeyIdCollision(format!(
                    "{} of key {}",
                    reason,
                    other.fingerprint()
                )));
            }
        }
        Ok(())
    }

    /// Insert or merge a key.
    ///
    /// Merging is a packet union and never drops material. A private key for
    /// a public-only record replaces that record.
    pub fn import(&mut self, key: Key) -> Result<ImportStatus, ImportRejection> {
        key.validate_structure()
            .map_err(|e| ImportRejection::Invalid(e.to_string()))?;
        self.check_key_id(&key)?;

        let fingerprint = key.fingerprint();
        let merge = |existing: &mut Key, incoming: &Key| {
            existing
                .merge(incoming)
                .map_err(|e| ImportRejection::Invalid(e.to_string()))
        };

        if key.is_private() {
            if let Some(existing) = self.private.get_mut(&fingerprint) {
                merge(existing, &key)?;
                return Ok(ImportStatus::Updated);
            }
            let mut promoted = key;
            let status = match self.public.get(&fingerprint) {
                Some(public) => {
                    merge(&mut promoted, public)?;
                    ImportStatus::Promoted
                }
                None => ImportStatus::Inserted,
            };
            self.public.remove(&fingerprint);
            self.private.insert(fingerprint, promoted);
            Ok(status)
        } else if let Some(existing) = self.private.get_mut(&fingerprint) {
            merge(existing, &key)?;
            Ok(ImportStatus::Updated)
        } else if let Some(existing) = self.public.get_mut(&fingerprint) {
            merge(existing, &key)?;
            Ok(ImportStatus::Updated)
        } else {
            self.public.insert(fingerprint, key);
            Ok(ImportStatus::Inserted)
        }
    }

    /// Remove the record of `variant` for `fingerprint`.
    pub fn remove(&mut self, fingerprint: &Fingerprint, variant: KeyVariant) -> Option<Key> {
        match variant {
            KeyVariant::Public => self.public.remove(fingerprint),
            KeyVariant::Private => self.private.remove(fingerprint),
        }
    }
}

/// Compare the (primary id, subkey ids) of a new key against a stored one.
///
/// A primary id may not equal a subkey id of a key with another primary id,
/// a subkey id may not equal the stored primary id, and a subkey id may only
/// be shared with a key of the same primary id.
fn id_clash(new: &(KeyId, Vec<KeyId>), stored: &(KeyId, Vec<KeyId>)) -> Option<String> {
    let (key_id, subkey_ids) = new;
    let (other_id, other_subkey_ids) = stored;
    let same_primary = key_id == other_id;

    if !same_primary && other_subkey_ids.contains(key_id) {
        return Some(format!("primary key id {} equals a subkey id", key_id));
    }
    if subkey_ids.contains(other_id) {
        return Some(format!("subkey id {} equals the primary key id", other_id));
    }
    if !same_primary {
        if let Some(shared) = subkey_ids.iter().find(|id| other_subkey_ids.contains(id)) {
            return Some(format!("subkey id {} equals a subkey id", shared));
        }
    }
    None
}
