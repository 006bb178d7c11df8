//! Sync packet wire format.
//!
//! The logical payload is JSON:
//!
//! ```json
//! {
//!   "insertedKeys": { "<fingerprint>": { "armored": "...", "time": 1700000000000 } },
//!   "deletedKeys":  { "<fingerprint>": { "time": 1700000000000 } }
//! }
//! ```
//!
//! On the wire it is signed and encrypted to the keyring's own primary key.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use keysync_core::{CryptoError, CryptoProvider, Fingerprint, Key};

use crate::changelog::{ChangeEntry, ChangeOp};
use crate::error::{Result, SyncError};

/// Current key material for an inserted or updated key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertedKey {
    pub armored: String,
    pub time: i64,
}

/// Tombstone for a deleted key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedKey {
    pub time: i64,
}

/// Decrypted contents of a sync packet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPayload {
    #[serde(default)]
    pub inserted_keys: BTreeMap<Fingerprint, InsertedKey>,
    #[serde(default)]
    pub deleted_keys: BTreeMap<Fingerprint, DeletedKey>,
}

/// One payload entry in change-log form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub fingerprint: Fingerprint,
    pub entry: ChangeEntry,
    /// Armored key material; present for upserts.
    pub armored: Option<String>,
}

impl SyncPayload {
    /// Build a payload from change-log entries.
    ///
    /// `armored` supplies the full current material of a key. Upserts for
    /// keys it cannot supply are left out.
    pub fn from_entries<'a, I, F>(entries: I, mut armored: F) -> Self
    where
        I: IntoIterator<Item = (&'a Fingerprint, &'a ChangeEntry)>,
        F: FnMut(&Fingerprint) -> Option<String>,
    {
        let mut payload = SyncPayload::default();
        for (fingerprint, entry) in entries {
            if entry.op.is_upsert() {
                match armored(fingerprint) {
                    Some(armored) => {
                        payload.inserted_keys.insert(
                            *fingerprint,
                            InsertedKey {
                                armored,
                                time: entry.time,
                            },
                        );
                    }
                    None => {
                        tracing::warn!(%fingerprint, "change log names a key that is not stored; skipping");
                    }
                }
            } else {
                payload
                    .deleted_keys
                    .insert(*fingerprint, DeletedKey { time: entry.time });
            }
        }
        payload
    }

    pub fn is_empty(&self) -> bool {
        self.inserted_keys.is_empty() && self.deleted_keys.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inserted_keys.len() + self.deleted_keys.len()
    }

    /// Entries in change-log form.
    ///
    /// A fingerprint listed in both maps keeps only the superseding entry.
    pub fn entries(&self) -> Vec<RemoteEntry> {
        let mut merged: BTreeMap<Fingerprint, RemoteEntry> = BTreeMap::new();
        for (fingerprint, inserted) in &self.inserted_keys {
            merged.insert(
                *fingerprint,
                RemoteEntry {
                    fingerprint: *fingerprint,
                    entry: ChangeEntry::new(ChangeOp::Insert, inserted.time),
                    armored: Some(inserted.armored.clone()),
                },
            );
        }
        for (fingerprint, deleted) in &self.deleted_keys {
            let entry = ChangeEntry::new(ChangeOp::Delete, deleted.time);
            let replace = merged
                .get(fingerprint)
                .map(|existing| entry.supersedes(&existing.entry))
                .unwrap_or(true);
            if replace {
                merged.insert(
                    *fingerprint,
                    RemoteEntry {
                        fingerprint: *fingerprint,
                        entry,
                        armored: None,
                    },
                );
            }
        }
        merged.into_values().collect()
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| SyncError::MalformedPayload(e.to_string()))
    }
}

/// Sign and encrypt a payload to and from `key`.
///
/// `key` must be a decrypted private key.
pub async fn seal_packet(
    crypto: &dyn CryptoProvider,
    payload: &SyncPayload,
    key: &Key,
) -> Result<Vec<u8>> {
    let json = payload.to_json()?;
    let bytes = crypto
        .encrypt(&json, &[key.to_public()], Some(key))
        .await?;
    Ok(bytes)
}

/// Decrypt a packet with `key` and require a valid signature by the same key.
///
/// Any failure to decrypt or verify rejects the whole packet with
/// [`SyncError::Authenticity`].
pub async fn open_packet(crypto: &dyn CryptoProvider, bytes: &[u8], key: &Key) -> Result<SyncPayload> {
    let message = crypto
        .decrypt(bytes, key, &[key.to_public()])
        .await
        .map_err(|e| match e {
            CryptoError::KeyLocked(_) => SyncError::Crypto(e),
            other => SyncError::Authenticity(other.to_string()),
        })?;

    let signer = crypto.signing_key_id(key);
    let signed = message
        .signatures
        .iter()
        .any(|sig| sig.key_id == signer && sig.valid == Some(true));
    if !signed {
        return Err(SyncError::Authenticity(format!(
            "packet is not signed by key {}",
            signer
        )));
    }

    SyncPayload::from_json(&message.plaintext)
}
