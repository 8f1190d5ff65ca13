use std::{
    sync::mpsc,
    time::Duration,
};

use ed25519_dalek::SigningKey;
use log::LevelFilter;
use rand_core::OsRng;
use replicated_ledger::{
    app::KvRequest,
    config::Configuration,
    consensus::ReplicaRegistryError,
    history::MerkleTxHistory,
    node::NodeSpec,
    snapshotter::read_snapshot_evidence,
    store::{Store, Write},
    threading::Context,
    types::{
        crypto_primitives::hash_bytes,
        data_types::{Certificate, CryptoHash, NodeId, Version},
        requests::Request,
    },
};

mod common;

use crate::common::{
    host::{host_channel, recv_snapshot},
    logging::setup_logger,
    replicator::CapturingReplicator,
};

const KV: &str = "public:kv";

fn put(key: &[u8], value: &[u8]) -> KvRequest {
    KvRequest::Write(vec![Write {
        map: KV.to_string(),
        key: key.to_vec(),
        value: Some(value.to_vec()),
    }])
}

#[test]
fn node_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Initialize test components.

    // 1.1. Create signing keys for the node and for a second member of the cluster.
    let mut csprg = OsRng {};
    let me = SigningKey::generate(&mut csprg);
    let other = SigningKey::generate(&mut csprg);

    // 1.2. Create a store that captures every entry it commits, and the channel to the host.
    let store = Store::new();
    store.create_map(KV);
    let replicator = CapturingReplicator::new();
    store.set_replicator(replicator.clone());
    let (to_host, from_core) = host_channel();

    // 1.3. Register handlers that forward snapshot events to the test thread.
    let (scheduled_sender, scheduled) = mpsc::channel::<(Version, Context)>();
    let (evidence_sender, evidence) = mpsc::channel::<(Version, CryptoHash)>();

    // 1.4. Start the node, with snapshots taken on 1 worker every 3 committed versions.
    let configuration = Configuration::builder()
        .me(me.clone())
        .node_id(NodeId::new(0))
        .snapshot_interval(3)
        .worker_threads(1)
        .log_events(true)
        .build();
    let node = NodeSpec::builder()
        .configuration(configuration)
        .store(store)
        .to_host(to_host)
        .on_schedule_snapshot(move |event| {
            let _ = scheduled_sender.send((event.index, event.context));
        })
        .on_commit_snapshot_evidence(move |event| {
            let _ = evidence_sender.send((event.index, event.hash));
        })
        .build()
        .start();

    // 2. Commit 3 writes during startup. None of them is more than 3 versions past the last snapshot.
    for i in 1..=3u8 {
        let committed = node.receive_request(put(&[i], &[i]).into_request()).unwrap();
        assert_eq!(committed, vec![Version::new(i as u64)]);
    }
    assert_eq!(node.state_machine().get_last_committed_version(), Version::new(3));
    assert_eq!(node.snapshotter().last_snapshot_idx(), Version::none());

    // 3. Sign the history. The signature commits version 4, which triggers a snapshot on the worker.
    assert_eq!(node.emit_signature().unwrap(), vec![Version::new(4)]);

    let (index, snapshot) = recv_snapshot(&from_core);
    assert_eq!(index, Version::new(4));
    let evidence_in_store = read_snapshot_evidence(node.store()).unwrap().unwrap();
    assert_eq!(evidence_in_store.version, Version::new(4));
    assert_eq!(evidence_in_store.hash, hash_bytes(&snapshot));

    assert_eq!(
        scheduled.recv_timeout(Duration::from_secs(5)).unwrap(),
        (Version::new(4), Context::Worker(0))
    );
    assert_eq!(
        evidence.recv_timeout(Duration::from_secs(5)).unwrap(),
        (Version::new(4), hash_bytes(&snapshot))
    );

    // 4. Recover a store owned by node 1 from the snapshot, and catch it up with the evidence entry.
    let recovered = Store::new();
    recovered.clone_schema(node.store());
    let mut history = MerkleTxHistory::new(NodeId::new(1), other.clone());
    history.trust(NodeId::new(0), me.verifying_key());
    recovered.set_history(history);

    assert_eq!(recovered.deserialise_snapshot(&snapshot).unwrap(), Version::new(4));
    assert_eq!(recovered.get(KV, &[2]), Some(vec![2]));
    let evidence_entry = replicator.entry(Version::new(5)).unwrap();
    assert_eq!(recovered.deserialise(&evidence_entry).unwrap(), Version::new(5));
    assert_eq!(recovered.history_root(), node.store().history_root());

    // 5. Add node 1 to the configuration and open the network.
    let certificate = Certificate::new(other.verifying_key().to_bytes().to_vec());
    node.add_node(NodeId::new(1), certificate).unwrap();
    assert_eq!(
        node.add_node(NodeId::new(2), Certificate::new(vec![1, 2, 3])),
        Err(ReplicaRegistryError::InvalidCertificate {
            node: NodeId::new(2)
        })
    );
    let rotated = SigningKey::generate(&mut csprg);
    assert_eq!(
        node.rotate_certificate(
            NodeId::new(3),
            Certificate::new(rotated.verifying_key().to_bytes().to_vec())
        ),
        Err(ReplicaRegistryError::UnknownNode {
            node: NodeId::new(3)
        })
    );
    assert!(node.open_network());
    assert!(node.state_machine().is_primary());

    // 6. With 2 members, a write is only committed once node 1 acknowledges it.
    assert_eq!(node.receive_request(put(b"open", b"yes").into_request()).unwrap(), vec![]);
    assert_eq!(node.state_machine().get_last_committed_version(), Version::new(4));
    assert_eq!(
        node.state_machine().receive_ack(NodeId::new(1), Version::new(6)).unwrap(),
        vec![Version::new(6)]
    );
    assert_eq!(node.view_history().last_committed_version(), Version::new(6));
    assert_eq!(node.store().get(KV, b"open"), Some(b"yes".to_vec()));

    drop(node);
}

#[test]
fn node_without_handlers_runs_snapshots_inline_test() {
    setup_logger(LevelFilter::Trace);

    let mut csprg = OsRng {};
    let store = Store::new();
    store.create_map(KV);
    let (to_host, from_core) = host_channel();

    let node = NodeSpec::builder()
        .configuration(
            Configuration::builder()
                .me(SigningKey::generate(&mut csprg))
                .node_id(NodeId::new(3))
                .snapshot_interval(1)
                .worker_threads(0)
                .log_events(false)
                .build(),
        )
        .store(store)
        .to_host(to_host)
        .build()
        .start();

    node.receive_request(put(&[1], &[1]).into_request()).unwrap();
    assert!(from_core.try_recv().is_err());

    // Version 2 is more than 1 version past the last snapshot, and is emitted before the request returns.
    node.receive_request(put(&[2], &[2]).into_request()).unwrap();
    assert!(from_core.try_recv().is_ok());
    assert_eq!(node.snapshotter().last_snapshot_idx(), Version::new(2));

    // A malformed request is rejected without committing anything.
    let version = node.store().current_version();
    assert!(node
        .receive_request(Request::new(vec![7, 7, 7]))
        .is_err());
    assert_eq!(node.store().current_version(), version);
}
