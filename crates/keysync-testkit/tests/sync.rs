//! Replication between installations through sync packets.

use keysync::{ExportMode, KeyringError};
use keysync_core::KeyVariant;
use keysync_testkit::{init_tracing, Replica};
use proptest::prelude::*;

/// Two replicas sharing the sync key generated by the first.
async fn pair() -> (Replica, Replica, keysync_core::Key) {
    init_tracing();
    let a = Replica::in_memory().await;
    let b = Replica::in_memory().await;
    let sync_key = a.generate("me@example.org", None).await;
    b.local()
        .await
        .import_private(&a.armored_private(&sync_key).await)
        .await
        .unwrap();
    (a, b, sync_key)
}

/// Armored public key of a third party.
async fn contact(email: &str) -> (keysync_core::Key, String) {
    let other = Replica::in_memory().await;
    let key = other.generate(email, None).await;
    let armored = other.armored_public(&key).await;
    (key, armored)
}

#[tokio::test]
async fn test_round_trip_carries_public_keys() {
    let (a, b, sync_key) = pair().await;
    let (bob, armored) = contact("bob@example.org").await;
    a.local().await.import_public(&armored).await.unwrap();

    let packet = a.sync_out(ExportMode::Pending).await;
    let report = b
        .service
        .import_sync_packet(&b.local_id(), &packet)
        .await
        .unwrap();

    assert_eq!(report.inserted, vec![bob.fingerprint()]);
    assert!(report.rejected.is_empty());
    let stored = b.local().await.lookup_by_fingerprint(&bob.fingerprint()).await.unwrap();
    assert!(stored.is_public());
    // The sync key stays private on the receiving side
    let own = b.local().await.lookup_by_fingerprint(&sync_key.fingerprint()).await.unwrap();
    assert!(own.is_private());
}

#[tokio::test]
async fn test_import_is_idempotent() {
    let (a, b, _) = pair().await;
    let (_, armored) = contact("bob@example.org").await;
    a.local().await.import_public(&armored).await.unwrap();
    let packet = a.sync_out(ExportMode::Pending).await;

    let first = b.service.import_sync_packet(&b.local_id(), &packet).await.unwrap();
    assert_eq!(first.changed(), 1);
    let keys = b.key_set().await;
    let log = b.local().await.change_log().await;

    let second = b.service.import_sync_packet(&b.local_id(), &packet).await.unwrap();
    assert!(second.is_noop());
    assert_eq!(b.key_set().await, keys);
    assert_eq!(b.local().await.change_log().await, log);
}

#[tokio::test]
async fn test_insert_and_delete_converge_in_either_order() {
    let (a, b, sync_key) = pair().await;
    let c = Replica::in_memory().await;
    c.local()
        .await
        .import_private(&a.armored_private(&sync_key).await)
        .await
        .unwrap();

    let (bob, armored) = contact("bob@example.org").await;
    a.local().await.import_public(&armored).await.unwrap();
    let insert = a.sync_out(ExportMode::Pending).await;
    a.local()
        .await
        .remove(&bob.fingerprint(), KeyVariant::Public)
        .await
        .unwrap()
        .unwrap();
    let delete = a.sync_out(ExportMode::Pending).await;

    for packet in [&insert, &delete] {
        b.service.import_sync_packet(&b.local_id(), packet).await.unwrap();
    }
    let report = c.service.import_sync_packet(&c.local_id(), &delete).await.unwrap();
    assert_eq!(report.tombstones, vec![bob.fingerprint()]);
    let report = c.service.import_sync_packet(&c.local_id(), &insert).await.unwrap();
    assert_eq!(report.changed(), 0);

    assert!(b.local().await.lookup_by_fingerprint(&bob.fingerprint()).await.is_none());
    assert!(c.local().await.lookup_by_fingerprint(&bob.fingerprint()).await.is_none());
    assert_eq!(b.key_set().await, c.key_set().await);
}

#[tokio::test]
async fn test_remote_delete_spares_private_key() {
    let (a, b, _) = pair().await;
    let shared = a.generate("shared@example.org", None).await;
    b.local()
        .await
        .import_private(&a.armored_private(&shared).await)
        .await
        .unwrap();
    // Clear b's own pending entries so the remote delete is newer
    b.sync_out(ExportMode::Pending).await;

    a.local()
        .await
        .remove(&shared.fingerprint(), KeyVariant::Private)
        .await
        .unwrap();
    let packet = a.sync_out(ExportMode::Pending).await;

    let report = b.service.import_sync_packet(&b.local_id(), &packet).await.unwrap();
    assert!(report.deleted.is_empty());
    assert!(report.skipped.contains(&shared.fingerprint()));
    assert!(b
        .local()
        .await
        .lookup_by_fingerprint(&shared.fingerprint())
        .await
        .unwrap()
        .is_private());
}

#[tokio::test]
async fn test_fresh_replica_imports_without_pending_entries() {
    let (a, _, sync_key) = pair().await;
    let (bob, armored) = contact("bob@example.org").await;
    a.local().await.import_public(&armored).await.unwrap();
    let packet = a.sync_out(ExportMode::Full).await;

    // A replica holding no keys opens the packet with an explicit sync key
    let fresh = Replica::in_memory().await;
    let report = fresh
        .service
        .import_sync_packet_with_key(&fresh.local_id(), &packet, &sync_key)
        .await
        .unwrap();

    let mut inserted = report.inserted.clone();
    inserted.sort();
    let mut expected = vec![sync_key.fingerprint(), bob.fingerprint()];
    expected.sort();
    assert_eq!(inserted, expected);

    let log = fresh.local().await.change_log().await;
    assert!(log.is_clean());
    assert_eq!(log.history().len(), 2);
    // Nothing to send back
    assert!(fresh.local().await.begin_export(ExportMode::Pending).await.unwrap().0.is_empty());
}

#[tokio::test]
async fn test_committed_replica_stays_clean_after_import() {
    let (a, b, _) = pair().await;
    b.sync_out(ExportMode::Pending).await;
    assert!(b.local().await.change_log().await.is_clean());

    let (_, armored) = contact("bob@example.org").await;
    a.local().await.import_public(&armored).await.unwrap();
    let packet = a.sync_out(ExportMode::Pending).await;
    b.service.import_sync_packet(&b.local_id(), &packet).await.unwrap();

    assert!(b.local().await.change_log().await.is_clean());
}

#[tokio::test]
async fn test_packet_for_another_key_is_rejected_whole() {
    let (a, _, _) = pair().await;
    let (_, armored) = contact("bob@example.org").await;
    a.local().await.import_public(&armored).await.unwrap();
    let packet = a.sync_out(ExportMode::Pending).await;

    let stranger = Replica::in_memory().await;
    stranger.generate("stranger@example.org", None).await;
    let before = stranger.key_set().await;

    let result = stranger
        .service
        .import_sync_packet(&stranger.local_id(), &packet)
        .await;
    assert!(matches!(result, Err(KeyringError::SyncAuthenticity(_))));
    assert_eq!(stranger.key_set().await, before);
}

#[tokio::test]
async fn test_uncommitted_export_is_sent_again() {
    let (a, _, _) = pair().await;
    let (bob, armored) = contact("bob@example.org").await;
    a.local().await.import_public(&armored).await.unwrap();

    let id = a.local_id();
    // Exported but never committed
    a.service.export_sync_packet(&id, ExportMode::Pending).await.unwrap();
    let (payload, _) = a.local().await.begin_export(ExportMode::Pending).await.unwrap();
    assert!(payload.inserted_keys.contains_key(&bob.fingerprint()));
}

// ─────────────────────────────────────────────────────────────────────────────
// Convergence
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Op {
    Import(usize),
    Remove(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![(0usize..3).prop_map(Op::Import), (0usize..3).prop_map(Op::Remove)]
}

fn ops_and_order() -> impl Strategy<Value = (Vec<Op>, Vec<usize>)> {
    prop::collection::vec(op(), 1..8).prop_flat_map(|ops| {
        let order: Vec<usize> = (0..ops.len()).collect();
        (Just(ops), Just(order).prop_shuffle())
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn packets_commute((ops, order) in ops_and_order()) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (expected, in_order, shuffled) = rt.block_on(async {
            let (a, b, sync_key) = pair().await;
            let c = Replica::in_memory().await;
            c.local()
                .await
                .import_private(&a.armored_private(&sync_key).await)
                .await
                .unwrap();

            let mut contacts = Vec::new();
            for n in 0..3 {
                contacts.push(contact(&format!("c{}@example.org", n)).await);
            }

            let mut packets = Vec::new();
            for op in &ops {
                match *op {
                    Op::Import(n) => {
                        a.local().await.import_public(&contacts[n].1).await.unwrap();
                    }
                    Op::Remove(n) => {
                        a.local()
                            .await
                            .remove(&contacts[n].0.fingerprint(), KeyVariant::Public)
                            .await
                            .unwrap();
                    }
                }
                packets.push(a.sync_out(ExportMode::Pending).await);
            }

            for packet in &packets {
                b.service.import_sync_packet(&b.local_id(), packet).await.unwrap();
            }
            for i in &order {
                c.service.import_sync_packet(&c.local_id(), &packets[*i]).await.unwrap();
            }
            (a.key_set().await, b.key_set().await, c.key_set().await)
        });

        prop_assert_eq!(&in_order, &shuffled);
        prop_assert_eq!(&in_order, &expected);
    }
}
