use std::sync::{
    mpsc::{self, Receiver, Sender},
    Arc,
};

use ed25519_dalek::SigningKey;
use log::LevelFilter;
use rand_core::OsRng;
use replicated_ledger::{
    events::Event,
    history::MerkleTxHistory,
    host::HostMessage,
    snapshotter::{read_snapshot_evidence, SnapshotEvidence, Snapshotter},
    store::Store,
    threading::{Context, WorkerPool},
    types::{
        crypto_primitives::hash_bytes,
        data_types::{NodeId, Version},
    },
};

mod common;

use crate::common::{
    host::{drain_snapshots, host_channel, recv_snapshot},
    logging::setup_logger,
    replicator::SwitchableReplicator,
};

const KV: &str = "kv";

// A store with `count` committed transactions, at versions 1 to `count`.
fn store_with_versions(count: u8) -> Store {
    let store = Store::new();
    store.create_map(KV);
    for i in 0..count {
        let mut tx = store.begin();
        tx.put(KV, &[i], &[i, i]);
        tx.commit().unwrap();
    }
    store
}

fn start_snapshotter(
    store: &Store,
    workers: usize,
    interval: u64,
) -> (
    Arc<Snapshotter<Sender<HostMessage>>>,
    Receiver<HostMessage>,
    Receiver<Event>,
    Arc<WorkerPool>,
) {
    let (to_host, from_core) = host_channel();
    let (event_publisher, event_subscriber) = mpsc::channel();
    let pool = Arc::new(WorkerPool::new(workers));
    let snapshotter = Snapshotter::new(
        store.clone(),
        to_host,
        pool.clone(),
        interval,
        Some(event_publisher),
    );
    (snapshotter, from_core, event_subscriber, pool)
}

#[test]
fn snapshot_within_interval_is_noop_test() {
    setup_logger(LevelFilter::Debug);

    let store = store_with_versions(5);
    let (snapshotter, from_core, events, _pool) = start_snapshotter(&store, 0, 5);

    for idx in 0..=5 {
        snapshotter.snapshot(Version::new(idx));
    }

    assert!(drain_snapshots(&from_core).is_empty());
    assert!(events.try_iter().next().is_none());
    assert_eq!(snapshotter.last_snapshot_idx(), Version::none());
    assert_eq!(read_snapshot_evidence(&store).unwrap(), None);
    assert_eq!(store.current_version(), Version::new(5));
}

#[test]
fn evidence_is_committed_before_snapshot_is_emitted_test() {
    setup_logger(LevelFilter::Debug);

    let store = store_with_versions(6);
    let (snapshotter, from_core, events, _pool) = start_snapshotter(&store, 0, 2);

    snapshotter.snapshot(Version::new(3));

    // With no workers, the snapshot is generated inline.
    let (index, snapshot) = recv_snapshot(&from_core);
    assert_eq!(index, Version::new(3));
    assert_eq!(snapshotter.last_snapshot_idx(), Version::new(3));
    assert_eq!(
        read_snapshot_evidence(&store).unwrap(),
        Some(SnapshotEvidence {
            hash: hash_bytes(&snapshot),
            version: Version::new(3)
        })
    );
    // The evidence is a new entry on top of the 6 existing ones.
    assert_eq!(store.current_version(), Version::new(7));

    let events: Vec<Event> = events.try_iter().collect();
    assert!(matches!(
        events.as_slice(),
        [Event::CommitSnapshotEvidence(committed), Event::ScheduleSnapshot(scheduled)]
            if committed.index == Version::new(3)
                && scheduled.index == Version::new(3)
                && scheduled.context == Context::Control
    ));

    // The snapshot holds the store as it was at version 3.
    let target = Store::new();
    target.clone_schema(&store);
    assert_eq!(target.deserialise_snapshot(&snapshot).unwrap(), Version::new(3));
    assert_eq!(target.get(KV, &[2]), Some(vec![2, 2]));
    assert_eq!(target.get(KV, &[3]), None);
}

#[test]
fn consecutive_snapshots_test() {
    setup_logger(LevelFilter::Debug);

    let store = store_with_versions(10);
    let (snapshotter, from_core, _events, _pool) = start_snapshotter(&store, 0, 2);

    snapshotter.snapshot(Version::new(3));
    snapshotter.snapshot(Version::new(3));
    snapshotter.snapshot(Version::new(5));
    snapshotter.snapshot(Version::new(6));
    snapshotter.snapshot(Version::new(9));

    assert_eq!(drain_snapshots(&from_core), vec![Version::new(3), Version::new(6), Version::new(9)]);
    assert_eq!(snapshotter.last_snapshot_idx(), Version::new(9));
}

#[test]
#[should_panic(expected = "Cannot snapshot at idx 2 which is earlier than last snapshot idx 4")]
fn snapshot_below_last_snapshot_is_fatal_test() {
    let store = store_with_versions(4);
    let (snapshotter, from_core, _events, _pool) = start_snapshotter(&store, 0, 1);

    snapshotter.snapshot(Version::new(4));
    assert_eq!(recv_snapshot(&from_core).0, Version::new(4));

    snapshotter.snapshot(Version::new(2));
}

#[test]
fn failed_evidence_commit_abandons_snapshot_test() {
    setup_logger(LevelFilter::Debug);

    let store = store_with_versions(4);
    let replicator = SwitchableReplicator::new();
    store.set_replicator(replicator.clone());
    let (snapshotter, from_core, events, _pool) = start_snapshotter(&store, 0, 1);

    // 1. The replicator refuses the evidence entry, so the snapshot is neither emitted nor recorded.
    replicator.refuse(true);
    snapshotter.snapshot(Version::new(3));

    assert!(drain_snapshots(&from_core).is_empty());
    assert_eq!(snapshotter.last_snapshot_idx(), Version::none());
    assert_eq!(read_snapshot_evidence(&store).unwrap(), None);
    assert_eq!(store.current_version(), Version::new(4));
    assert!(events
        .try_iter()
        .any(|event| matches!(event, Event::SnapshotFailed(failed) if failed.index == Version::new(3))));

    // 2. A later commit schedules a new snapshot, which succeeds once the replicator accepts entries again.
    replicator.refuse(false);
    snapshotter.snapshot(Version::new(4));

    assert_eq!(recv_snapshot(&from_core).0, Version::new(4));
    assert_eq!(snapshotter.last_snapshot_idx(), Version::new(4));
    assert_eq!(read_snapshot_evidence(&store).unwrap().unwrap().version, Version::new(4));
}

#[test]
fn snapshots_are_spread_over_workers_test() {
    setup_logger(LevelFilter::Debug);

    let store = store_with_versions(6);
    let (snapshotter, from_core, events, pool) = start_snapshotter(&store, 2, 0);

    for idx in 1..=3 {
        snapshotter.snapshot(Version::new(idx));
    }
    pool.shutdown();

    let contexts: Vec<Context> = events
        .try_iter()
        .filter_map(|event| match event {
            Event::ScheduleSnapshot(scheduled) => Some(scheduled.context),
            _ => None,
        })
        .collect();
    assert_eq!(contexts, vec![Context::Worker(0), Context::Worker(1), Context::Worker(0)]);

    // Snapshots that were overtaken by a later one are dropped, and the host sees ascending indices.
    let emitted = drain_snapshots(&from_core);
    assert!(emitted.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(emitted.last(), Some(&Version::new(3)));
    assert_eq!(snapshotter.last_snapshot_idx(), Version::new(3));
}

#[test]
fn snapshot_is_abandoned_when_host_is_gone_test() {
    setup_logger(LevelFilter::Debug);

    let store = store_with_versions(4);
    let (snapshotter, from_core, events, _pool) = start_snapshotter(&store, 0, 1);

    // 1. The host hangs up. The evidence is committed, but the snapshot cannot be delivered.
    drop(from_core);
    snapshotter.snapshot(Version::new(3));

    assert_eq!(snapshotter.last_snapshot_idx(), Version::none());
    assert_eq!(read_snapshot_evidence(&store).unwrap().unwrap().version, Version::new(3));
    let events: Vec<Event> = events.try_iter().collect();
    assert!(events
        .iter()
        .any(|event| matches!(event, Event::SnapshotFailed(failed) if failed.index == Version::new(3))));
    assert!(!events
        .iter()
        .any(|event| matches!(event, Event::CommitSnapshotEvidence(_))));

    // 2. Nothing was compacted, so the store can still produce the snapshot.
    assert!(store.snapshot(Version::new(3)).is_ok());
}

#[test]
fn emitted_snapshot_compacts_the_store_test() {
    setup_logger(LevelFilter::Debug);

    let store = Store::new();
    store.create_map(KV);
    store.set_history(MerkleTxHistory::new(
        NodeId::new(0),
        SigningKey::generate(&mut OsRng {}),
    ));
    for i in 0..6u8 {
        let mut tx = store.begin();
        tx.put(KV, &[i], &[i, i]);
        tx.commit().unwrap();
    }
    let (snapshotter, from_core, _events, _pool) = start_snapshotter(&store, 0, 2);

    snapshotter.snapshot(Version::new(4));
    let (_, emitted) = recv_snapshot(&from_core);

    // 1. Versions before the emitted snapshot can no longer be extracted, and their leaves are dropped.
    assert!(store.snapshot(Version::new(3)).is_err());
    assert_eq!(store.with_history(|history| history.leaf(Version::new(3))), Some(None));

    // 2. The emitted version and the later ones are unaffected.
    let again = store.snapshot(Version::new(4)).unwrap();
    assert_eq!(store.serialise_snapshot(again), emitted);
    assert!(store
        .with_history(|history| history.leaf(Version::new(4)))
        .unwrap()
        .is_some());
    let later = store.snapshot(Version::new(6)).unwrap();
    assert_eq!(later.maps[KV].len(), 6);
    assert_eq!(later.maps[KV].get([5u8].as_slice()), Some(&vec![5, 5]));

    // 3. The evidence entry is appended after the compacted entries.
    assert_eq!(store.current_version(), Version::new(7));
    assert!(store
        .with_history(|history| history.leaf(Version::new(7)))
        .unwrap()
        .is_some());
}
