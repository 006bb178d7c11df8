//! Export options and import reports.

use keysync_core::Fingerprint;

/// What an exported sync packet contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportMode {
    /// Only pending local changes.
    #[default]
    Pending,
    /// Pending changes plus every known fingerprint and stored key, for
    /// bootstrapping a fresh replica.
    Full,
}

/// Outcome of applying one sync packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Keys that were absent and are now stored.
    pub inserted: Vec<Fingerprint>,
    /// Keys whose stored material was merged with the remote copy.
    pub merged: Vec<Fingerprint>,
    /// Keys removed by a remote delete.
    pub deleted: Vec<Fingerprint>,
    /// Remote deletes for keys never stored here.
    pub tombstones: Vec<Fingerprint>,
    /// Remote entries that lost to newer local state.
    pub skipped: Vec<Fingerprint>,
    /// Remote entries whose key material was unusable.
    pub rejected: Vec<(Fingerprint, String)>,
}

impl SyncReport {
    /// Number of entries that changed local state.
    pub fn changed(&self) -> usize {
        self.inserted.len() + self.merged.len() + self.deleted.len()
    }

    pub fn is_noop(&self) -> bool {
        self.changed() == 0 && self.rejected.is_empty()
    }
}
