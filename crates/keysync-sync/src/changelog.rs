//! Per-keyring change log.
//!
//! Tracks two maps keyed by fingerprint:
//!
//! - `pending`: local mutations not yet confirmed as exported.
//! - `history`: the last applied operation per fingerprint, local or remote.
//!   Remote entries are resolved against it, which keeps the outcome
//!   independent of the order packets arrive in.
//!
//! ```text
//!   Clean ──record──> Dirty ──begin_export──> Syncing ──commit──> Clean
//!     ^                 ^                        │
//!     └──apply remote───┘<───────record──────────┘
//! ```

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use keysync_core::Fingerprint;

use crate::error::{Result, SyncError};

/// Kind of change recorded for a fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

impl ChangeOp {
    /// Insert and Update both carry key material.
    pub fn is_upsert(&self) -> bool {
        !matches!(self, ChangeOp::Delete)
    }
}

/// One change-log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub op: ChangeOp,
    /// Unix ms.
    pub time: i64,
}

impl ChangeEntry {
    pub fn new(op: ChangeOp, time: i64) -> Self {
        Self { op, time }
    }

    /// Last-writer-wins: the newer entry wins; on equal times an upsert
    /// beats a delete so key material is not lost.
    pub fn supersedes(&self, other: &ChangeEntry) -> bool {
        match self.time.cmp(&other.time) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => self.op.is_upsert() && !other.op.is_upsert(),
        }
    }
}

/// Sync state of a keyring's change log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyncState {
    /// No pending changes.
    #[default]
    Clean,
    /// Pending changes not yet exported.
    Dirty,
    /// An export was built and awaits commit.
    Syncing,
}

/// Handle identifying one export, passed back to [`ChangeLog::commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncToken(pub u64);

impl SyncToken {
    fn generate() -> Self {
        Self(rand::random())
    }
}

impl fmt::Display for SyncToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ExportSnapshot {
    token: SyncToken,
    entries: BTreeMap<Fingerprint, ChangeEntry>,
}

/// How a remote entry relates to the local applied state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Remote entry wins: apply it and adopt it as the applied state.
    Apply,
    /// Local state wins but both sides hold the key: merge the remote
    /// material without changing presence.
    MergeOnly,
    /// Local state wins and there is nothing to merge.
    Skip,
}

/// The change log of one keyring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLog {
    pending: BTreeMap<Fingerprint, ChangeEntry>,
    history: BTreeMap<Fingerprint, ChangeEntry>,
    state: SyncState,
    export: Option<ExportSnapshot>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Pending local entries.
    pub fn pending(&self) -> &BTreeMap<Fingerprint, ChangeEntry> {
        &self.pending
    }

    pub fn pending_entry(&self, fingerprint: &Fingerprint) -> Option<&ChangeEntry> {
        self.pending.get(fingerprint)
    }

    /// Last applied entry per fingerprint, tombstones included.
    pub fn history(&self) -> &BTreeMap<Fingerprint, ChangeEntry> {
        &self.history
    }

    pub fn is_clean(&self) -> bool {
        self.pending.is_empty()
    }

    /// Record a local mutation.
    ///
    /// Replaces any pending entry for the fingerprint. The recorded time is
    /// bumped past the applied entry so a local mutation always supersedes
    /// what it was based on. An applied entry stamped `i64::MAX` is matched
    /// rather than passed, so ties resolve by operation.
    pub fn record(&mut self, fingerprint: Fingerprint, op: ChangeOp, time: i64) -> ChangeEntry {
        let time = match self.history.get(&fingerprint) {
            Some(applied) if applied.time >= time => applied.time.saturating_add(1),
            _ => time,
        };
        let entry = ChangeEntry::new(op, time);
        self.pending.insert(fingerprint, entry);
        self.history.insert(fingerprint, entry);
        if self.state != SyncState::Dirty {
            tracing::debug!(%fingerprint, ?op, "change log dirty");
        }
        self.state = SyncState::Dirty;
        entry
    }

    /// Decide how a remote entry applies locally.
    pub fn resolve(&self, fingerprint: &Fingerprint, remote: &ChangeEntry) -> Resolution {
        match self.history.get(fingerprint) {
            None => Resolution::Apply,
            Some(local) if remote.supersedes(local) => Resolution::Apply,
            Some(local) if local.op.is_upsert() && remote.op.is_upsert() => Resolution::MergeOnly,
            Some(_) => Resolution::Skip,
        }
    }

    /// Adopt a remote entry that resolved to [`Resolution::Apply`].
    ///
    /// The remote entry replaces the applied state and drops any older
    /// pending local entry. Remote application never creates pending entries.
    pub fn accept_remote(&mut self, fingerprint: Fingerprint, remote: ChangeEntry) {
        self.history.insert(fingerprint, remote);
        if self.pending.remove(&fingerprint).is_some() {
            tracing::debug!(%fingerprint, "remote change superseded pending entry");
        }
        if self.pending.is_empty() && self.state == SyncState::Dirty {
            self.state = SyncState::Clean;
        }
    }

    /// Snapshot the pending entries for export.
    ///
    /// A newer export replaces an uncommitted one.
    pub fn begin_export(&mut self) -> (SyncToken, BTreeMap<Fingerprint, ChangeEntry>) {
        let token = SyncToken::generate();
        let entries = self.pending.clone();
        self.export = Some(ExportSnapshot {
            token,
            entries: entries.clone(),
        });
        if !self.pending.is_empty() {
            self.state = SyncState::Syncing;
        }
        (token, entries)
    }

    /// Confirm that the export identified by `token` was persisted by the
    /// transport. Removes the exported entries unless they changed since.
    ///
    /// Returns the number of entries cleared.
    pub fn commit(&mut self, token: SyncToken) -> Result<usize> {
        let snapshot = match self.export.take() {
            Some(snapshot) if snapshot.token == token => snapshot,
            other => {
                self.export = other;
                return Err(SyncError::StaleToken(token.0));
            }
        };

        let mut cleared = 0;
        for (fingerprint, entry) in &snapshot.entries {
            if self.pending.get(fingerprint) == Some(entry) {
                self.pending.remove(fingerprint);
                cleared += 1;
            }
        }

        self.state = if self.pending.is_empty() {
            SyncState::Clean
        } else {
            SyncState::Dirty
        };
        tracing::debug!(%token, cleared, remaining = self.pending.len(), "committed sync export");
        Ok(cleared)
    }

    /// Token of the export awaiting commit, if any.
    pub fn export_token(&self) -> Option<SyncToken> {
        self.export.as_ref().map(|s| s.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fpr(n: u8) -> Fingerprint {
        Fingerprint::from_bytes([n; 20])
    }

    #[test]
    fn test_supersedes() {
        let insert = ChangeEntry::new(ChangeOp::Insert, 10);
        let delete = ChangeEntry::new(ChangeOp::Delete, 10);
        let later = ChangeEntry::new(ChangeOp::Delete, 11);

        assert!(insert.supersedes(&delete));
        assert!(!delete.supersedes(&insert));
        assert!(later.supersedes(&insert));
        assert!(!insert.supersedes(&insert));
    }

    #[test]
    fn test_record_replaces_entry() {
        let mut log = ChangeLog::new();
        assert_eq!(log.state(), SyncState::Clean);

        log.record(fpr(1), ChangeOp::Insert, 100);
        let second = log.record(fpr(1), ChangeOp::Update, 100);

        assert_eq!(log.state(), SyncState::Dirty);
        assert_eq!(log.pending().len(), 1);
        assert_eq!(second.op, ChangeOp::Update);
        // Bumped past the first entry
        assert_eq!(second.time, 101);
    }

    #[test]
    fn test_record_after_far_future_remote() {
        let mut log = ChangeLog::new();
        log.accept_remote(fpr(1), ChangeEntry::new(ChangeOp::Insert, i64::MAX));

        let entry = log.record(fpr(1), ChangeOp::Update, 1000);
        assert_eq!(entry.time, i64::MAX);
        assert_eq!(log.pending_entry(&fpr(1)), Some(&entry));

        let entry = log.record(fpr(1), ChangeOp::Delete, 1000);
        assert_eq!(entry.time, i64::MAX);
        assert_eq!(log.history()[&fpr(1)].op, ChangeOp::Delete);
    }

    #[test]
    fn test_export_commit_cycle() {
        let mut log = ChangeLog::new();
        log.record(fpr(1), ChangeOp::Insert, 100);
        log.record(fpr(2), ChangeOp::Delete, 100);

        let (token, entries) = log.begin_export();
        assert_eq!(entries.len(), 2);
        assert_eq!(log.state(), SyncState::Syncing);

        assert_eq!(log.commit(token).unwrap(), 2);
        assert_eq!(log.state(), SyncState::Clean);
        assert!(log.is_clean());
        // History survives commit
        assert_eq!(log.history().len(), 2);
    }

    #[test]
    fn test_mutation_during_export_stays_pending() {
        let mut log = ChangeLog::new();
        log.record(fpr(1), ChangeOp::Insert, 100);
        log.record(fpr(2), ChangeOp::Insert, 100);
        let (token, _) = log.begin_export();

        log.record(fpr(1), ChangeOp::Update, 200);
        assert_eq!(log.state(), SyncState::Dirty);

        assert_eq!(log.commit(token).unwrap(), 1);
        assert_eq!(log.state(), SyncState::Dirty);
        assert_eq!(log.pending_entry(&fpr(1)).map(|e| e.op), Some(ChangeOp::Update));
    }

    #[test]
    fn test_uncommitted_export_keeps_entries() {
        let mut log = ChangeLog::new();
        log.record(fpr(1), ChangeOp::Insert, 100);
        let (stale, _) = log.begin_export();
        let (current, _) = log.begin_export();

        assert!(matches!(log.commit(stale), Err(SyncError::StaleToken(_))));
        assert_eq!(log.pending().len(), 1);
        assert_eq!(log.commit(current).unwrap(), 1);
    }

    #[test]
    fn test_resolve_against_history() {
        let mut log = ChangeLog::new();
        log.record(fpr(1), ChangeOp::Insert, 100);

        let older_delete = ChangeEntry::new(ChangeOp::Delete, 50);
        let newer_delete = ChangeEntry::new(ChangeOp::Delete, 150);
        let older_update = ChangeEntry::new(ChangeOp::Update, 50);

        assert_eq!(log.resolve(&fpr(1), &older_delete), Resolution::Skip);
        assert_eq!(log.resolve(&fpr(1), &older_update), Resolution::MergeOnly);
        assert_eq!(log.resolve(&fpr(1), &newer_delete), Resolution::Apply);
        assert_eq!(log.resolve(&fpr(9), &older_delete), Resolution::Apply);
    }

    #[test]
    fn test_accept_remote_drops_pending() {
        let mut log = ChangeLog::new();
        log.record(fpr(1), ChangeOp::Insert, 100);

        log.accept_remote(fpr(1), ChangeEntry::new(ChangeOp::Delete, 200));
        assert!(log.is_clean());
        assert_eq!(log.state(), SyncState::Clean);
        assert_eq!(log.history()[&fpr(1)].op, ChangeOp::Delete);
    }

    #[test]
    fn test_changelog_serde_roundtrip() {
        let mut log = ChangeLog::new();
        log.record(fpr(1), ChangeOp::Insert, 100);
        log.begin_export();

        let json = serde_json::to_string(&log).unwrap();
        let back: ChangeLog = serde_json::from_str(&json).unwrap();
        assert_eq!(back, log);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn entry() -> impl Strategy<Value = ChangeEntry> {
            let op = prop_oneof![Just(ChangeOp::Insert), Just(ChangeOp::Update), Just(ChangeOp::Delete)];
            (op, 0i64..1000).prop_map(|(op, time)| ChangeEntry::new(op, time))
        }

        proptest! {
            #[test]
            fn local_record_supersedes_applied(remote in entry(), local in entry(), now in 0i64..1000) {
                let mut log = ChangeLog::new();
                log.accept_remote(fpr(1), remote);
                let recorded = log.record(fpr(1), local.op, now);
                prop_assert!(recorded.supersedes(&remote));
                prop_assert_eq!(log.state(), SyncState::Dirty);
            }
        }
    }
}
