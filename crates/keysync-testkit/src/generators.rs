//! Proptest generators for property-based testing.

use proptest::prelude::*;

use keysync_core::Fingerprint;
use keysync_sync::{ChangeEntry, ChangeOp};

/// Generate a random Fingerprint.
pub fn fingerprint() -> impl Strategy<Value = Fingerprint> {
    any::<[u8; 20]>().prop_map(Fingerprint::from_bytes)
}

/// One of a few fixed fingerprints, so generated histories collide.
pub fn small_fingerprint(count: u8) -> impl Strategy<Value = Fingerprint> {
    (0..count.max(1)).prop_map(|n| Fingerprint::from_bytes([n; 20]))
}

pub fn change_op() -> impl Strategy<Value = ChangeOp> {
    prop_oneof![
        Just(ChangeOp::Insert),
        Just(ChangeOp::Update),
        Just(ChangeOp::Delete),
    ]
}

/// Change timestamps from a narrow range so equal times occur.
pub fn timestamp() -> impl Strategy<Value = i64> {
    0i64..64
}

pub fn change_entry() -> impl Strategy<Value = ChangeEntry> {
    (change_op(), timestamp()).prop_map(|(op, time)| ChangeEntry::new(op, time))
}

/// A batch of remote entries over at most `keys` distinct fingerprints.
pub fn remote_batch(keys: u8, max_len: usize) -> impl Strategy<Value = Vec<(Fingerprint, ChangeEntry)>> {
    prop::collection::vec((small_fingerprint(keys), change_entry()), 0..=max_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use keysync_sync::{ChangeLog, Resolution};

    /// Apply every winning remote entry; the applied time and presence per key.
    fn replay<'a>(
        entries: impl Iterator<Item = &'a (Fingerprint, ChangeEntry)>,
    ) -> BTreeMap<Fingerprint, (i64, bool)> {
        let mut log = ChangeLog::new();
        for (fingerprint, entry) in entries {
            if log.resolve(fingerprint, entry) == Resolution::Apply {
                log.accept_remote(*fingerprint, *entry);
            }
        }
        log.history()
            .iter()
            .map(|(f, e)| (*f, (e.time, e.op.is_upsert())))
            .collect()
    }

    proptest! {
        #[test]
        fn supersedes_is_antisymmetric(a in change_entry(), b in change_entry()) {
            prop_assert!(!(a.supersedes(&b) && b.supersedes(&a)));
        }

        #[test]
        fn applied_state_is_order_independent(batch in remote_batch(3, 12)) {
            prop_assert_eq!(replay(batch.iter()), replay(batch.iter().rev()));
        }

        #[test]
        fn remote_entries_never_become_pending(batch in remote_batch(3, 12)) {
            let mut log = ChangeLog::new();
            for (fingerprint, entry) in &batch {
                if log.resolve(fingerprint, entry) == Resolution::Apply {
                    log.accept_remote(*fingerprint, *entry);
                }
            }
            prop_assert!(log.is_clean());
        }
    }
}
