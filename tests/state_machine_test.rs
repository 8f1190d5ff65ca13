use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, OnceLock, Weak,
    },
    thread,
};

use log::LevelFilter;
use rand::Rng;
use replicated_ledger::{
    consensus::{
        strategy::{ConsensusError, Phase, RequestError, RequestHandler},
        GlobalCommitHandler, ReplicaRegistryError, StateMachine, ViewHistory,
    },
    types::{
        data_types::{NodeId, Version, ViewNumber},
        requests::Request,
    },
};

mod common;

use crate::common::{
    logging::setup_logger,
    request_handler::{certificate, request, state_machine},
};

#[test]
fn single_node_is_primary_in_every_view_test() {
    setup_logger(LevelFilter::Debug);

    let (state_machine, _, _) = state_machine(0);
    for view in 0..50 {
        state_machine.advance_view(ViewNumber::new(view));
        assert_eq!(state_machine.view(), ViewNumber::new(view));
        assert!(state_machine.is_primary());
        assert_eq!(state_machine.primary(), NodeId::new(0));
    }
}

#[test]
fn primary_is_always_a_member_test() {
    setup_logger(LevelFilter::Debug);

    let mut rng = rand::thread_rng();
    for _ in 0..20 {
        let me = rng.gen_range(0, 1_000);
        let (state_machine, _, _) = state_machine(me);
        let mut members: HashSet<u64> = HashSet::from([me]);

        // Add a random number of distinct nodes, checking the primary of a random view after each.
        let additions = rng.gen_range(1, 30);
        while members.len() <= additions {
            let node = rng.gen_range(0, 1_000);
            if !members.insert(node) {
                continue;
            }
            state_machine.add_node(NodeId::new(node), certificate()).unwrap();
            state_machine.advance_view(state_machine.view() + rng.gen_range(0, 5));

            let primary = state_machine.primary();
            assert!(members.contains(&primary.int()));
            assert_eq!(state_machine.replicas().len(), members.len());
        }
    }
}

#[test]
fn startup_phase_commits_every_request_test() {
    setup_logger(LevelFilter::Debug);

    let (state_machine, handler, view_history) = state_machine(0);
    assert_eq!(state_machine.phase(), Phase::Startup);
    assert_eq!(state_machine.get_last_committed_version(), Version::none());

    let mut previous = Version::none();
    for i in 0..10u8 {
        if i == 5 {
            state_machine.advance_view(ViewNumber::new(3));
        }
        let committed = state_machine.receive_request(request(i)).unwrap();
        let last_handled = *handler.versions().last().unwrap();

        assert_eq!(committed, vec![last_handled]);
        assert_eq!(state_machine.get_last_committed_version(), last_handled);
        assert!(state_machine.get_last_committed_version() >= previous);
        previous = state_machine.get_last_committed_version();
    }

    assert_eq!(view_history.last_committed_version(), Version::new(10));
    assert_eq!(state_machine.get_view_for_version(Version::new(5)), ViewNumber::new(0));
    assert_eq!(state_machine.get_view_for_version(Version::new(6)), ViewNumber::new(3));
    assert_eq!(view_history.get_view_for_version(Version::new(10)), ViewNumber::new(3));
}

#[test]
fn rejected_request_commits_nothing_test() {
    let (state_machine, handler, _) = state_machine(0);
    state_machine.receive_request(request(1)).unwrap();

    let rejected = state_machine.receive_request(Request::new(vec![]));
    assert!(matches!(rejected, Err(ConsensusError::Rejected(_))));
    assert_eq!(handler.versions(), vec![Version::new(1)]);
    assert_eq!(state_machine.get_last_committed_version(), Version::new(1));
}

#[test]
fn membership_changes_test() {
    let (state_machine, _, _) = state_machine(0);
    let cert_1 = certificate();

    state_machine.add_node(NodeId::new(1), cert_1.clone()).unwrap();
    assert_eq!(state_machine.add_node(NodeId::new(1), cert_1.clone()), Ok(()));
    assert_eq!(
        state_machine.add_node(NodeId::new(1), certificate()),
        Err(ReplicaRegistryError::DuplicateNode {
            node: NodeId::new(1)
        })
    );
    assert_eq!(
        state_machine.replicas().get(&NodeId::new(1)).unwrap().certificate(),
        &cert_1
    );

    assert_eq!(
        state_machine.remove_node(NodeId::new(0)),
        Err(ReplicaRegistryError::RemoveSelf {
            node: NodeId::new(0)
        })
    );
    assert_eq!(state_machine.remove_node(NodeId::new(1)).unwrap().id(), NodeId::new(1));
    assert_eq!(
        state_machine.remove_node(NodeId::new(1)),
        Err(ReplicaRegistryError::UnknownNode {
            node: NodeId::new(1)
        })
    );
    assert!(state_machine.is_primary());
}

#[test]
fn views_only_move_forward_test() {
    let (state_machine, _, _) = state_machine(0);
    assert!(state_machine.advance_view(ViewNumber::new(4)));
    assert!(!state_machine.advance_view(ViewNumber::new(2)));
    assert!(!state_machine.advance_view(ViewNumber::new(4)));
    assert_eq!(state_machine.view(), ViewNumber::new(4));
}

#[test]
fn steady_state_majority_commit_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Start node 0 in a configuration of 3 nodes, commit one request during startup, and open the network.
    let (state_machine, handler, _) = state_machine(0);
    state_machine.add_node(NodeId::new(1), certificate()).unwrap();
    state_machine.add_node(NodeId::new(2), certificate()).unwrap();
    assert_eq!(
        state_machine.receive_ack(NodeId::new(1), Version::new(1)),
        Err(ConsensusError::NetworkNotOpen)
    );
    state_machine.receive_request(request(0)).unwrap();

    assert!(state_machine.open_network());
    assert!(!state_machine.open_network());
    assert!(state_machine.is_network_open());

    // 2. Requests are executed but wait for a majority (2 of 3) before they are committed.
    assert_eq!(state_machine.receive_request(request(1)).unwrap(), vec![]);
    assert_eq!(state_machine.receive_request(request(2)).unwrap(), vec![]);
    assert_eq!(handler.versions(), vec![Version::new(1), Version::new(2), Version::new(3)]);
    assert_eq!(state_machine.get_last_committed_version(), Version::new(1));

    // 3. Commits are in order: acknowledging version 3 first commits nothing.
    assert_eq!(state_machine.receive_ack(NodeId::new(2), Version::new(3)).unwrap(), vec![]);
    assert_eq!(
        state_machine.receive_ack(NodeId::new(1), Version::new(2)).unwrap(),
        vec![Version::new(2), Version::new(3)]
    );
    assert_eq!(state_machine.get_last_committed_version(), Version::new(3));

    // 4. Late and unexpected acknowledgements.
    assert_eq!(state_machine.receive_ack(NodeId::new(2), Version::new(2)).unwrap(), vec![]);
    assert_eq!(
        state_machine.receive_ack(NodeId::new(1), Version::new(9)),
        Err(ConsensusError::UnknownVersion {
            version: Version::new(9)
        })
    );
    assert_eq!(
        state_machine.receive_ack(NodeId::new(7), Version::new(4)),
        Err(ConsensusError::UnknownNode {
            node: NodeId::new(7)
        })
    );
}

#[test]
fn only_primary_accepts_requests_after_open_test() {
    let (state_machine, handler, _) = state_machine(0);
    state_machine.add_node(NodeId::new(5), certificate()).unwrap();
    state_machine.open_network();

    state_machine.advance_view(ViewNumber::new(1));
    assert_eq!(state_machine.primary(), NodeId::new(5));
    assert_eq!(
        state_machine.receive_request(request(1)),
        Err(ConsensusError::NotPrimary {
            primary: NodeId::new(5)
        })
    );
    assert!(handler.versions().is_empty());

    // Before the network opens, every node accepts requests regardless of the primary.
    let (startup, _, _) = crate::common::request_handler::state_machine(0);
    startup.add_node(NodeId::new(5), certificate()).unwrap();
    startup.advance_view(ViewNumber::new(1));
    assert_eq!(startup.receive_request(request(1)).unwrap(), vec![Version::new(1)]);
}

#[test]
fn acks_from_removed_nodes_do_not_count_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Start node 0 in a configuration of 5 nodes (a majority is 3), and open the network.
    let (state_machine, _, view_history) = state_machine(0);
    for node in 1..5 {
        state_machine.add_node(NodeId::new(node), certificate()).unwrap();
    }
    state_machine.open_network();

    // 2. Version 1 is acknowledged by node 4 only, besides node 0 itself.
    assert_eq!(state_machine.receive_request(request(1)).unwrap(), vec![]);
    assert_eq!(state_machine.receive_ack(NodeId::new(4), Version::new(1)).unwrap(), vec![]);

    // 3. Shrink the configuration to {0, 1, 2}. A majority is now 2, but node 4's acknowledgement no
    //    longer counts, so version 1 stays pending.
    state_machine.remove_node(NodeId::new(4)).unwrap();
    state_machine.remove_node(NodeId::new(3)).unwrap();
    assert_eq!(state_machine.receive_request(request(2)).unwrap(), vec![]);
    assert_eq!(state_machine.get_last_committed_version(), Version::none());
    assert_eq!(
        state_machine.receive_ack(NodeId::new(4), Version::new(1)),
        Err(ConsensusError::UnknownNode {
            node: NodeId::new(4)
        })
    );

    // 4. An acknowledgement from a current member commits version 1.
    assert_eq!(
        state_machine.receive_ack(NodeId::new(1), Version::new(1)).unwrap(),
        vec![Version::new(1)]
    );
    assert_eq!(view_history.last_committed_version(), Version::new(1));
}

#[test]
fn shrinking_configuration_commits_pending_versions_test() {
    setup_logger(LevelFilter::Debug);

    let (state_machine, _, view_history) = state_machine(0);
    for node in 1..5 {
        state_machine.add_node(NodeId::new(node), certificate()).unwrap();
    }
    state_machine.open_network();

    // 1. Version 1 is acknowledged by nodes 0 and 1: 2 of 5 is not a majority.
    state_machine.receive_request(request(1)).unwrap();
    assert_eq!(state_machine.receive_ack(NodeId::new(1), Version::new(1)).unwrap(), vec![]);

    // 2. Removing node 4 leaves 2 of 4, still not a majority.
    state_machine.remove_node(NodeId::new(4)).unwrap();
    assert_eq!(state_machine.get_last_committed_version(), Version::none());

    // 3. Removing node 3 leaves 2 of 3, which commits version 1 without any further acknowledgement.
    state_machine.remove_node(NodeId::new(3)).unwrap();
    assert_eq!(state_machine.get_last_committed_version(), Version::new(1));
    assert_eq!(view_history.last_committed_version(), Version::new(1));

    // 4. Growing the configuration again does not undo the commit.
    state_machine.add_node(NodeId::new(3), certificate()).unwrap();
    assert_eq!(state_machine.get_last_committed_version(), Version::new(1));
}

// Counts requests that were executed while node 0 was not the primary of a 2-node configuration.
struct ViewCheckingHandler {
    state_machine: Arc<OnceLock<Weak<StateMachine>>>,
    executed_as_backup: Arc<AtomicUsize>,
    next: u64,
}

impl RequestHandler for ViewCheckingHandler {
    fn receive_request(&mut self, _: Request) -> Result<Version, RequestError> {
        if let Some(state_machine) = self.state_machine.get().and_then(Weak::upgrade) {
            if state_machine.view().int() % 2 == 1 {
                self.executed_as_backup.fetch_add(1, Ordering::SeqCst);
            }
        }
        self.next += 1;
        Ok(Version::new(self.next))
    }
}

#[test]
fn view_does_not_change_while_request_is_handled_test() {
    setup_logger(LevelFilter::Info);

    // 1. Node 0 is the primary of every even view of the configuration {0, 1}.
    let cell = Arc::new(OnceLock::new());
    let executed_as_backup = Arc::new(AtomicUsize::new(0));
    let state_machine = Arc::new(StateMachine::new(
        NodeId::new(0),
        certificate(),
        ViewCheckingHandler {
            state_machine: cell.clone(),
            executed_as_backup: executed_as_backup.clone(),
            next: 0,
        },
        Arc::new(ViewHistory::new()),
        None,
    ));
    let _ = cell.set(Arc::downgrade(&state_machine));
    state_machine.add_node(NodeId::new(1), certificate()).unwrap();
    state_machine.open_network();

    // 2. Advance the view on another thread while requests arrive.
    let advancing = {
        let state_machine = state_machine.clone();
        thread::spawn(move || {
            for view in 1..=2_000 {
                state_machine.advance_view(ViewNumber::new(view));
            }
        })
    };
    for i in 0..2_000u32 {
        let _ = state_machine.receive_request(request(i as u8));
    }
    advancing.join().unwrap();

    // 3. Every executed request was executed in a view where node 0 is the primary.
    assert_eq!(executed_as_backup.load(Ordering::SeqCst), 0);
}
