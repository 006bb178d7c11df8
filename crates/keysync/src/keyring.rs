//! A keyring: key store, change log and attributes under one owner.
//!
//! All mutations of a keyring are serialized. Each one is computed on a copy
//! of the current state, persisted, and only then swapped in, so a failed
//! write leaves memory and pending change-log entries untouched.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use keysync_core::{
    now_millis, Algorithm, CryptoProvider, Fingerprint, GenerateOptions, Key, KeyId,
    KeyVariant, KeyringId, UserId,
};
use keysync_store::{BlobStore, BlobStoreExt};
use keysync_sync::{
    ChangeEntry, ChangeLog, ChangeOp, ExportMode, Resolution, SyncPayload, SyncReport, SyncToken,
};
use keysync_unlock::PasswordCache;

use crate::config::AddressQuery;
use crate::error::{KeyringError, Result};
use crate::keystore::{ImportRejection, ImportStatus, KeyStore};

const PUBLIC_KEYS: &str = "public_keys";
const PRIVATE_KEYS: &str = "private_keys";
const CHANGELOG: &str = "changelog";
const ATTRIBUTES: &str = "attributes";

/// Persisted keyring attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyringAttributes {
    /// Default key for signing sync packets and messages.
    pub primary_key_id: Option<KeyId>,
    pub metadata: BTreeMap<String, String>,
}

/// One item of a batch import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportItem {
    pub kind: KeyVariant,
    pub armored: String,
}

impl ImportItem {
    pub fn public(armored: impl Into<String>) -> Self {
        Self {
            kind: KeyVariant::Public,
            armored: armored.into(),
        }
    }

    pub fn private(armored: impl Into<String>) -> Self {
        Self {
            kind: KeyVariant::Private,
            armored: armored.into(),
        }
    }
}

/// An accepted key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportResult {
    pub fingerprint: Fingerprint,
    pub key_id: KeyId,
    pub user_id: Option<String>,
    pub status: ImportStatus,
}

/// Per-key outcome of a batch import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyImport {
    Imported(ImportResult),
    Rejected {
        kind: KeyVariant,
        /// Absent when the material could not be parsed at all.
        fingerprint: Option<Fingerprint>,
        reason: ImportRejection,
    },
}

impl KeyImport {
    pub fn is_imported(&self) -> bool {
        matches!(self, KeyImport::Imported(_))
    }
}

/// Armored material of one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmoredExport {
    pub public: String,
    pub private: Option<String>,
}

/// Display data of a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySummary {
    pub fingerprint: Fingerprint,
    pub key_id: KeyId,
    pub variant: KeyVariant,
    pub valid: bool,
    pub user_id: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub created: i64,
    pub expires: Option<i64>,
    pub algorithm: Algorithm,
    pub bit_length: u16,
}

/// Display data of a subkey.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubKeySummary {
    pub fingerprint: Fingerprint,
    pub key_id: KeyId,
    pub algorithm: Algorithm,
    pub bit_length: u16,
    pub created: i64,
    pub expires: Option<i64>,
}

/// Full display data of a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDetails {
    pub summary: KeySummary,
    pub subkeys: Vec<SubKeySummary>,
    /// User ids with their self and third-party certifications.
    pub users: Vec<UserId>,
}

/// A sealed sync packet and the token that commits it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncExport {
    pub bytes: Vec<u8>,
    pub token: SyncToken,
}

#[derive(Debug, Clone, Default)]
struct KeyringState {
    keys: KeyStore,
    changes: ChangeLog,
    attrs: KeyringAttributes,
    /// Set once the keyring is deleted; later writes are refused.
    closed: bool,
}

/// A keyring replica.
pub struct Keyring {
    id: KeyringId,
    namespace: String,
    blobs: Arc<dyn BlobStore>,
    crypto: Arc<dyn CryptoProvider>,
    cache: Arc<PasswordCache>,
    state: Mutex<KeyringState>,
}

impl Keyring {
    /// Load a keyring from the blob store. Missing records load empty.
    pub async fn load(
        id: KeyringId,
        blobs: Arc<dyn BlobStore>,
        crypto: Arc<dyn CryptoProvider>,
        cache: Arc<PasswordCache>,
    ) -> Result<Self> {
        let namespace = Self::namespace_for(&id);
        let public: Vec<Key> = blobs.get_cbor(&namespace, PUBLIC_KEYS).await?.unwrap_or_default();
        let private: Vec<Key> = blobs.get_cbor(&namespace, PRIVATE_KEYS).await?.unwrap_or_default();
        let changes: ChangeLog = blobs.get_cbor(&namespace, CHANGELOG).await?.unwrap_or_default();
        let attrs: KeyringAttributes = blobs.get_cbor(&namespace, ATTRIBUTES).await?.unwrap_or_default();

        let keys = KeyStore::from_keys(public, private);
        tracing::debug!(keyring = %id, keys = keys.len(), pending = changes.pending().len(), "loaded keyring");

        Ok(Self {
            id,
            namespace,
            blobs,
            crypto,
            cache,
            state: Mutex::new(KeyringState {
                keys,
                changes,
                attrs,
                closed: false,
            }),
        })
    }

    /// Blob store namespace holding a keyring's records.
    pub fn namespace_for(id: &KeyringId) -> String {
        format!("keyring/{}", id)
    }

    pub fn id(&self) -> &KeyringId {
        &self.id
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lookup
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn lookup_by_fingerprint(&self, fingerprint: &Fingerprint) -> Option<Key> {
        let state = self.state.lock().await;
        state.keys.lookup_by_fingerprint(fingerprint).cloned()
    }

    /// Keys with this primary key id. More than one means the short id is
    /// ambiguous; disambiguate by fingerprint.
    pub async fn lookup_by_id(&self, key_id: &KeyId) -> Vec<Key> {
        let state = self.state.lock().await;
        state.keys.lookup_by_id(key_id).into_iter().cloned().collect()
    }

    /// Keys with this id as primary or subkey id.
    pub async fn lookup_by_any_id(&self, key_id: &KeyId) -> Vec<Key> {
        let state = self.state.lock().await;
        state.keys.lookup_by_any_id(key_id).into_iter().cloned().collect()
    }

    pub async fn lookup_by_address(&self, email: &str, query: &AddressQuery) -> Vec<Key> {
        let state = self.state.lock().await;
        let now = now_millis();
        state
            .keys
            .lookup_by_address(email, query, state.attrs.primary_key_id.as_ref(), |k| {
                self.is_valid(k, now)
            })
            .into_iter()
            .cloned()
            .collect()
    }

    /// All keys, private records first.
    pub async fn keys(&self) -> Vec<Key> {
        self.state.lock().await.keys.iter().cloned().collect()
    }

    /// A key is valid when its primary key verifies and it has an
    /// encryption subkey with a verified binding.
    pub fn is_valid(&self, key: &Key, now: i64) -> bool {
        self.crypto.verify_primary_key(key).is_valid()
            && self.crypto.encryption_key_id(key, now).is_some()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Import, generate, remove
    // ─────────────────────────────────────────────────────────────────────────

    /// Import one armored public key.
    pub async fn import_public(&self, armored: &str) -> Result<ImportResult> {
        self.import_single(armored, KeyVariant::Public).await
    }

    /// Import one armored private key.
    pub async fn import_private(&self, armored: &str) -> Result<ImportResult> {
        self.import_single(armored, KeyVariant::Private).await
    }

    async fn import_single(&self, armored: &str, kind: KeyVariant) -> Result<ImportResult> {
        let parsed = self.crypto.read_armored(armored);
        let mut keys = parsed.keys.into_iter();
        let key = match (keys.next(), keys.next()) {
            (Some(key), None) => key,
            (None, _) => {
                let reason = parsed
                    .errors
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "no key found".into());
                return Err(KeyringError::InvalidKey(reason));
            }
            (Some(_), Some(_)) => {
                return Err(KeyringError::InvalidKey(
                    "expected exactly one key, use import_keys for several".into(),
                ))
            }
        };

        let fingerprint = key.fingerprint();
        let result = self
            .mutate(|state| Ok(Self::import_into(state, key, kind, now_millis())?))
            .await;

        match &result {
            Ok(imported) => {
                tracing::info!(keyring = %self.id, %fingerprint, status = ?imported.status, "imported {} key", kind);
            }
            Err(e) => tracing::warn!(keyring = %self.id, %fingerprint, error = %e, "rejected {} key", kind),
        }
        result
    }

    /// Import a batch of armored keys with one result per key.
    ///
    /// Public keys are processed first; the batch is persisted once.
    pub async fn import_keys(&self, items: &[ImportItem]) -> Result<Vec<KeyImport>> {
        let mut ordered: Vec<&ImportItem> = items.iter().collect();
        ordered.sort_by_key(|item| item.kind == KeyVariant::Private);

        let mut parsed = Vec::new();
        for item in ordered {
            let keys = self.crypto.read_armored(&item.armored);
            for error in keys.errors {
                parsed.push(Err((item.kind, ImportRejection::Unreadable(error))));
            }
            parsed.extend(keys.keys.into_iter().map(|key| Ok((item.kind, key))));
        }

        let results = self
            .mutate(|state| {
                let now = now_millis();
                let results = parsed
                    .into_iter()
                    .map(|entry| match entry {
                        Ok((kind, key)) => {
                            let fingerprint = key.fingerprint();
                            match Self::import_into(state, key, kind, now) {
                                Ok(imported) => KeyImport::Imported(imported),
                                Err(reason) => KeyImport::Rejected {
                                    kind,
                                    fingerprint: Some(fingerprint),
                                    reason,
                                },
                            }
                        }
                        Err((kind, reason)) => KeyImport::Rejected {
                            kind,
                            fingerprint: None,
                            reason,
                        },
                    })
                    .collect::<Vec<_>>();
                Ok(results)
            })
            .await?;

        let imported = results.iter().filter(|r| r.is_imported()).count();
        let rejected = results.len() - imported;
        if rejected > 0 {
            tracing::warn!(keyring = %self.id, imported, rejected, "batch import rejected keys");
        } else {
            tracing::info!(keyring = %self.id, imported, "batch import");
        }
        Ok(results)
    }

    fn import_into(
        state: &mut KeyringState,
        key: Key,
        expected: KeyVariant,
        now: i64,
    ) -> std::result::Result<ImportResult, ImportRejection> {
        if key.variant() != expected {
            return Err(ImportRejection::WrongVariant {
                expected,
                found: key.variant(),
            });
        }

        let fingerprint = key.fingerprint();
        let key_id = key.key_id();
        let user_id = key.primary_user().map(UserId::user_id);
        let private = key.is_private();

        let status = state.keys.import(key)?;
        let op = match status {
            ImportStatus::Inserted => ChangeOp::Insert,
            ImportStatus::Updated | ImportStatus::Promoted => ChangeOp::Update,
        };
        state.changes.record(fingerprint, op, now);

        if private && state.attrs.primary_key_id.is_none() {
            tracing::info!(%key_id, "designated primary key");
            state.attrs.primary_key_id = Some(key_id);
        }

        Ok(ImportResult {
            fingerprint,
            key_id,
            user_id,
            status,
        })
    }

    /// Generate a private key and store it.
    pub async fn generate(&self, options: &GenerateOptions) -> Result<Key> {
        if options.user_ids.is_empty() {
            return Err(KeyringError::InvalidUserIds);
        }
        let key = self.crypto.generate_key_pair(options).await?;

        let stored = key.clone();
        self.mutate(move |state| Ok(Self::import_into(state, stored, KeyVariant::Private, now_millis())?))
            .await?;

        tracing::info!(keyring = %self.id, fingerprint = %key.fingerprint(), "generated key");
        Ok(key)
    }

    /// Remove one record. Records a delete, clears the primary key
    /// designation and evicts the key from the password cache.
    pub async fn remove(&self, fingerprint: &Fingerprint, variant: KeyVariant) -> Result<Option<Key>> {
        let removed = self
            .mutate(|state| {
                let Some(removed) = state.keys.remove(fingerprint, variant) else {
                    return Ok(None);
                };
                state.changes.record(*fingerprint, ChangeOp::Delete, now_millis());
                if state.attrs.primary_key_id == Some(removed.key_id()) {
                    state.attrs.primary_key_id = None;
                }
                Ok(Some(removed))
            })
            .await?;

        if let Some(key) = &removed {
            self.cache.evict(&self.id, &key.key_id())?;
            tracing::info!(keyring = %self.id, %fingerprint, %variant, "removed key");
        }
        Ok(removed)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Attributes
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn attributes(&self) -> KeyringAttributes {
        self.state.lock().await.attrs.clone()
    }

    /// Merge `update` into the attributes.
    ///
    /// Metadata entries are added or replaced. A primary key id, when given,
    /// must name a private key of this keyring.
    pub async fn set_attributes(&self, update: KeyringAttributes) -> Result<KeyringAttributes> {
        self.mutate(|state| {
            if let Some(key_id) = update.primary_key_id {
                let is_private = state
                    .keys
                    .lookup_by_id(&key_id)
                    .iter()
                    .any(|k| k.is_private());
                if !is_private {
                    return Err(KeyringError::KeyNotFound(format!("private key {}", key_id)));
                }
                state.attrs.primary_key_id = Some(key_id);
            }
            state.attrs.metadata.extend(update.metadata);
            Ok(state.attrs.clone())
        })
        .await
    }

    /// The designated primary key, or else the newest private key.
    pub async fn primary_key(&self) -> Option<Key> {
        let state = self.state.lock().await;
        let designated = state.attrs.primary_key_id.and_then(|key_id| {
            state
                .keys
                .lookup_by_id(&key_id)
                .into_iter()
                .find(|k| k.is_private())
        });
        designated
            .or_else(|| state.keys.private_keys().max_by_key(|k| k.created()))
            .cloned()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Export and display
    // ─────────────────────────────────────────────────────────────────────────

    /// Armored public material and, if asked for and present, the private
    /// material of one key.
    pub async fn export_armored(&self, fingerprint: &Fingerprint, include_private: bool) -> Result<ArmoredExport> {
        let key = self
            .lookup_by_fingerprint(fingerprint)
            .await
            .ok_or_else(|| KeyringError::key_not_found(fingerprint))?;
        let public = self.crypto.armor(&key.to_public())?;
        let private = if include_private && key.is_private() {
            Some(self.crypto.armor(&key)?)
        } else {
            None
        };
        Ok(ArmoredExport { public, private })
    }

    /// Armored public material of every key, followed by the private
    /// material of private keys when `include_private` is set.
    pub async fn armored_keys(&self, include_private: bool) -> Result<String> {
        let keys = self.keys().await;
        let mut out = String::new();
        for key in &keys {
            out.push_str(&self.crypto.armor(&key.to_public())?);
        }
        if include_private {
            for key in keys.iter().filter(|k| k.is_private()) {
                out.push_str(&self.crypto.armor(key)?);
            }
        }
        Ok(out)
    }

    pub async fn summaries(&self) -> Vec<KeySummary> {
        let now = now_millis();
        self.keys()
            .await
            .iter()
            .map(|k| self.summarize(k, now))
            .collect()
    }

    pub async fn key_details(&self, fingerprint: &Fingerprint) -> Result<KeyDetails> {
        let key = self
            .lookup_by_fingerprint(fingerprint)
            .await
            .ok_or_else(|| KeyringError::key_not_found(fingerprint))?;
        let subkeys = key
            .subkeys
            .iter()
            .map(|s| SubKeySummary {
                fingerprint: s.fingerprint(),
                key_id: s.key_id(),
                algorithm: s.material.algorithm,
                bit_length: s.material.bit_length(),
                created: s.material.created,
                expires: s.material.expires,
            })
            .collect();
        Ok(KeyDetails {
            summary: self.summarize(&key, now_millis()),
            subkeys,
            users: key.users.clone(),
        })
    }

    fn summarize(&self, key: &Key, now: i64) -> KeySummary {
        let user = key.primary_user();
        KeySummary {
            fingerprint: key.fingerprint(),
            key_id: key.key_id(),
            variant: key.variant(),
            valid: self.is_valid(key, now),
            user_id: user.map(UserId::user_id),
            name: user.map(|u| u.name.clone()),
            email: user.map(|u| u.email.clone()),
            created: key.created(),
            expires: key.expires(),
            algorithm: key.primary.algorithm,
            bit_length: key.primary.bit_length(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sync
    // ─────────────────────────────────────────────────────────────────────────

    /// Snapshot of the change log.
    pub async fn change_log(&self) -> ChangeLog {
        self.state.lock().await.changes.clone()
    }

    /// Build the payload of an outgoing sync packet and mark the export.
    ///
    /// Upserts carry the full current public material of the key.
    pub async fn begin_export(&self, mode: ExportMode) -> Result<(SyncPayload, SyncToken)> {
        let crypto = Arc::clone(&self.crypto);
        self.mutate(move |state| {
            let (token, pending) = state.changes.begin_export();
            let entries = match mode {
                ExportMode::Pending => pending,
                ExportMode::Full => {
                    let mut all = state.changes.history().clone();
                    for key in state.keys.iter() {
                        all.entry(key.fingerprint())
                            .or_insert_with(|| ChangeEntry::new(ChangeOp::Insert, key.created()));
                    }
                    all
                }
            };

            let keys = &state.keys;
            let payload = SyncPayload::from_entries(&entries, |fingerprint| {
                let key = keys.lookup_by_fingerprint(fingerprint)?;
                match crypto.armor(&key.to_public()) {
                    Ok(armored) => Some(armored),
                    Err(e) => {
                        tracing::warn!(%fingerprint, error = %e, "cannot armor key for sync");
                        None
                    }
                }
            });
            tracing::debug!(entries = payload.len(), ?mode, %token, "built sync payload");
            Ok((payload, token))
        })
        .await
    }

    /// Confirm that the export identified by `token` reached its
    /// destination. Returns the number of change-log entries cleared.
    pub async fn commit_sync(&self, token: SyncToken) -> Result<usize> {
        self.mutate(|state| Ok(state.changes.commit(token)?)).await
    }

    /// Merge a remote payload into this keyring.
    ///
    /// Presence of each key follows the last writer by timestamp, with
    /// upserts winning ties. Key material is merged whenever both sides hold
    /// the key. The payload is applied and persisted as a whole.
    pub async fn apply_sync_payload(&self, payload: &SyncPayload) -> Result<SyncReport> {
        let entries = payload.entries();
        let crypto = Arc::clone(&self.crypto);

        let report = self
            .mutate(move |state| {
                let mut report = SyncReport::default();
                for remote in entries {
                    let fingerprint = remote.fingerprint;
                    let resolution = state.changes.resolve(&fingerprint, &remote.entry);

                    let Some(armored) = remote.armored.as_deref() else {
                        Self::apply_remote_delete(state, fingerprint, remote.entry, resolution, &mut report);
                        continue;
                    };
                    if resolution == Resolution::Skip {
                        report.skipped.push(fingerprint);
                        continue;
                    }

                    let key = match Self::parse_remote(crypto.as_ref(), armored, &fingerprint) {
                        Ok(key) => key,
                        Err(reason) => {
                            tracing::warn!(%fingerprint, %reason, "rejected synced key");
                            report.rejected.push((fingerprint, reason));
                            continue;
                        }
                    };

                    let present = state.keys.contains(&fingerprint);
                    if resolution == Resolution::MergeOnly && !present {
                        report.skipped.push(fingerprint);
                        continue;
                    }

                    let before = state.keys.lookup_by_fingerprint(&fingerprint).cloned();
                    match state.keys.import(key) {
                        Ok(ImportStatus::Inserted) => report.inserted.push(fingerprint),
                        Ok(_) => {
                            let after = state.keys.lookup_by_fingerprint(&fingerprint);
                            if before.as_ref() != after {
                                report.merged.push(fingerprint);
                            } else if resolution == Resolution::MergeOnly {
                                report.skipped.push(fingerprint);
                            }
                        }
                        Err(reason) => {
                            tracing::warn!(%fingerprint, %reason, "rejected synced key");
                            report.rejected.push((fingerprint, reason.to_string()));
                            continue;
                        }
                    }
                    if resolution == Resolution::Apply {
                        state.changes.accept_remote(fingerprint, remote.entry);
                    }
                }
                Ok(report)
            })
            .await?;

        tracing::info!(
            keyring = %self.id,
            inserted = report.inserted.len(),
            merged = report.merged.len(),
            deleted = report.deleted.len(),
            tombstones = report.tombstones.len(),
            skipped = report.skipped.len(),
            rejected = report.rejected.len(),
            "applied sync payload"
        );
        Ok(report)
    }

    /// Remote deletes remove public records only. Private key material is
    /// never destroyed by a sync packet.
    fn apply_remote_delete(
        state: &mut KeyringState,
        fingerprint: Fingerprint,
        entry: ChangeEntry,
        resolution: Resolution,
        report: &mut SyncReport,
    ) {
        if resolution != Resolution::Apply {
            report.skipped.push(fingerprint);
            return;
        }
        match state.keys.lookup_by_fingerprint(&fingerprint).map(Key::variant) {
            Some(KeyVariant::Private) => {
                tracing::warn!(%fingerprint, "ignoring remote delete of a private key");
                report.skipped.push(fingerprint);
                return;
            }
            Some(KeyVariant::Public) => {
                state.keys.remove(&fingerprint, KeyVariant::Public);
                report.deleted.push(fingerprint);
            }
            None => report.tombstones.push(fingerprint),
        }
        state.changes.accept_remote(fingerprint, entry);
    }

    fn parse_remote(
        crypto: &dyn CryptoProvider,
        armored: &str,
        fingerprint: &Fingerprint,
    ) -> std::result::Result<Key, String> {
        let parsed = crypto.read_armored(armored);
        if let Some(error) = parsed.errors.first() {
            return Err(error.clone());
        }
        match parsed.keys.as_slice() {
            [key] if key.fingerprint() != *fingerprint => Err(format!(
                "material is for key {}, not {}",
                key.fingerprint(),
                fingerprint
            )),
            [key] if key.is_private() => Err("sync packets carry public keys only".into()),
            [key] => Ok(key.clone()),
            keys => Err(format!("expected one key, found {}", keys.len())),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Persistence
    // ─────────────────────────────────────────────────────────────────────────

    /// Refuse further writes. Waits for an in-flight mutation to finish.
    pub(crate) async fn close(&self) {
        self.state.lock().await.closed = true;
    }

    async fn mutate<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut KeyringState) -> Result<T>,
    {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(KeyringError::KeyringNotFound(self.id.clone()));
        }
        let mut next = state.clone();
        let out = f(&mut next)?;
        self.persist(&next).await?;
        *state = next;
        Ok(out)
    }

    async fn persist(&self, state: &KeyringState) -> Result<()> {
        let public: Vec<&Key> = state.keys.public_keys().collect();
        let private: Vec<&Key> = state.keys.private_keys().collect();
        self.blobs.set_cbor(&self.namespace, PUBLIC_KEYS, &public).await?;
        self.blobs.set_cbor(&self.namespace, PRIVATE_KEYS, &private).await?;
        self.blobs.set_cbor(&self.namespace, CHANGELOG, &state.changes).await?;
        self.blobs.set_cbor(&self.namespace, ATTRIBUTES, &state.attrs).await?;
        Ok(())
    }
}

impl std::fmt::Debug for Keyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keyring").field("id", &self.id).finish_non_exhaustive()
    }
}
