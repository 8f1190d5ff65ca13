/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The consensus state machine of a single node.
//!
//! The state machine tracks the configuration of the cluster, the current view and its primary, and
//! the last globally committed version. It routes inbound requests and acknowledgements to the
//! [consensus strategy](super::strategy) of its current [`Phase`], and reports every version that
//! becomes globally committed to its [`GlobalCommitHandler`].
//!
//! ## Primary selection
//!
//! The primary of view `v` is the member at position `v % n` of the configuration, where `n` is the
//! number of members and members are ordered by ascending [`NodeId`]. Every member with the same
//! configuration therefore agrees on the primary of every view.
//!
//! ## Concurrency
//!
//! Every method takes `&self`, and a `StateMachine` is meant to be shared between threads in an
//! [`Arc`](std::sync::Arc). The current view and the last committed version are atomics. The
//! configuration is locked only while it is read or changed, and the strategy only while it handles a
//! message. The view and configuration that a message is handled with are read after the strategy is
//! locked, and the view only changes while the strategy is locked.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::events::*;
use crate::types::{
    data_types::{Certificate, NodeId, Version, ViewNumber},
    requests::Request,
};

use super::commit::GlobalCommitHandler;
use super::replicas::{Replica, ReplicaRegistryError, Replicas};
use super::strategy::{
    ConsensusError, ConsensusStrategy, Phase, RequestHandler, Round, StartupStrategy,
    SteadyStateStrategy,
};

pub struct StateMachine {
    me: NodeId,
    current_view: AtomicU64,
    last_committed_version: AtomicU64,
    configuration: Mutex<Replicas>,
    consensus: Mutex<Consensus>,
    global_commit_handler: Arc<dyn GlobalCommitHandler>,
    event_publisher: Option<Sender<Event>>,
}

struct Consensus {
    strategy: Box<dyn ConsensusStrategy>,
    handler: Box<dyn RequestHandler>,
}

impl StateMachine {
    /// Create the state machine of the node `me`, whose configuration initially contains only itself.
    /// The state machine starts in view 0, in the [startup phase](Phase::Startup).
    pub fn new(
        me: NodeId,
        certificate: Certificate,
        handler: impl RequestHandler + 'static,
        global_commit_handler: Arc<dyn GlobalCommitHandler>,
        event_publisher: Option<Sender<Event>>,
    ) -> StateMachine {
        let mut configuration = Replicas::new();
        configuration
            .add(me, certificate)
            .expect("An empty configuration cannot contain a duplicate.");

        StateMachine {
            me,
            current_view: AtomicU64::new(ViewNumber::init().int()),
            last_committed_version: AtomicU64::new(Version::none().int()),
            configuration: Mutex::new(configuration),
            consensus: Mutex::new(Consensus {
                strategy: Box::new(StartupStrategy),
                handler: Box::new(handler),
            }),
            global_commit_handler,
            event_publisher,
        }
    }

    pub fn me(&self) -> NodeId {
        self.me
    }

    /// Handle an inbound request, returning the versions that became globally committed as a result.
    ///
    /// Before the network is open, the request is executed and globally committed immediately. After
    /// it is open, only the primary of the current view accepts requests.
    pub fn receive_request(&self, request: Request) -> Result<Vec<Version>, ConsensusError> {
        let mut consensus = self.consensus.lock().unwrap();
        let round = self.round();
        let Consensus { strategy, handler } = &mut *consensus;
        let committed = strategy.receive_request(request, handler.as_mut(), &round)?;
        self.global_commit(&committed, round.view);
        Ok(committed)
    }

    /// Handle an acknowledgement from `from` that it replicated `version`, returning the versions that
    /// became globally committed as a result.
    pub fn receive_ack(&self, from: NodeId, version: Version) -> Result<Vec<Version>, ConsensusError> {
        let mut consensus = self.consensus.lock().unwrap();
        let round = self.round();
        if !round.members.contains(&from) {
            return Err(ConsensusError::UnknownNode { node: from });
        }
        let committed = consensus.strategy.receive_ack(from, version, &round)?;
        self.global_commit(&committed, round.view);
        Ok(committed)
    }

    /// Add `node` with `certificate` to the configuration.
    ///
    /// Adding an existing member with the same certificate does nothing. Adding an existing member
    /// with a different certificate returns [`ReplicaRegistryError::DuplicateNode`] and leaves the
    /// configuration unchanged.
    pub fn add_node(&self, node: NodeId, certificate: Certificate) -> Result<(), ReplicaRegistryError> {
        let added = {
            let mut configuration = self.configuration.lock().unwrap();
            let added = !configuration.contains(&node);
            configuration.add(node, certificate)?;
            added
        };

        if added {
            Event::publish(
                &self.event_publisher,
                Event::AddNode(AddNodeEvent {
                    timestamp: SystemTime::now(),
                    node,
                }),
            );
            self.reconfigure();
        }
        Ok(())
    }

    /// Replace the certificate of the existing member `node`.
    pub fn rotate_certificate(
        &self,
        node: NodeId,
        certificate: Certificate,
    ) -> Result<(), ReplicaRegistryError> {
        self.configuration
            .lock()
            .unwrap()
            .rotate_certificate(node, certificate)
    }

    /// Remove `node` from the configuration. A node cannot remove itself.
    ///
    /// Acknowledgements from `node` stop counting towards pending versions. Pending versions that are
    /// acknowledged by a majority of the smaller configuration are globally committed.
    pub fn remove_node(&self, node: NodeId) -> Result<Replica, ReplicaRegistryError> {
        if node == self.me {
            return Err(ReplicaRegistryError::RemoveSelf { node });
        }
        let replica = self.configuration.lock().unwrap().remove(&node)?;

        Event::publish(
            &self.event_publisher,
            Event::RemoveNode(RemoveNodeEvent {
                timestamp: SystemTime::now(),
                node,
            }),
        );
        self.reconfigure();
        Ok(replica)
    }

    /// Get a copy of the current configuration.
    pub fn replicas(&self) -> Replicas {
        self.configuration.lock().unwrap().clone()
    }

    /// Get the primary of the current view.
    pub fn primary(&self) -> NodeId {
        let configuration = self.configuration.lock().unwrap();
        select_primary(self.view(), &configuration)
    }

    pub fn is_primary(&self) -> bool {
        self.primary() == self.me
    }

    pub fn view(&self) -> ViewNumber {
        ViewNumber::new(self.current_view.load(Ordering::SeqCst))
    }

    /// Move to `view` if it is higher than the current view. Returns whether the view changed.
    ///
    /// Waits for the request or acknowledgement being handled, so that a message is handled entirely
    /// in one view.
    pub fn advance_view(&self, view: ViewNumber) -> bool {
        let previous = {
            let _consensus = self.consensus.lock().unwrap();
            self.current_view.fetch_max(view.int(), Ordering::SeqCst)
        };
        if previous >= view.int() {
            return false;
        }

        Event::publish(
            &self.event_publisher,
            Event::AdvanceView(AdvanceViewEvent {
                timestamp: SystemTime::now(),
                view,
                primary: self.primary(),
            }),
        );
        true
    }

    /// Get the view in which `version` was globally committed.
    pub fn get_view_for_version(&self, version: Version) -> ViewNumber {
        self.global_commit_handler.get_view_for_version(version)
    }

    pub fn get_last_committed_version(&self) -> Version {
        Version::new(self.last_committed_version.load(Ordering::SeqCst))
    }

    /// Leave the startup phase. From now on, requests are committed by the steady state strategy.
    /// Returns `false` if the network was already open.
    pub fn open_network(&self) -> bool {
        let mut consensus = self.consensus.lock().unwrap();
        if consensus.strategy.phase() == Phase::Open {
            return false;
        }

        let last_committed_version = self.get_last_committed_version();
        consensus.strategy = Box::new(SteadyStateStrategy::new(last_committed_version));
        log::debug!("Network opened after version {}", last_committed_version);

        Event::publish(
            &self.event_publisher,
            Event::OpenNetwork(OpenNetworkEvent {
                timestamp: SystemTime::now(),
                last_committed_version,
            }),
        );
        true
    }

    pub fn is_network_open(&self) -> bool {
        self.phase() == Phase::Open
    }

    pub fn phase(&self) -> Phase {
        self.consensus.lock().unwrap().strategy.phase()
    }

    // Callers hold the consensus lock, and take the configuration lock only inside it.
    fn round(&self) -> Round {
        let configuration = self.configuration.lock().unwrap();
        let view = self.view();
        Round {
            me: self.me,
            view,
            primary: select_primary(view, &configuration),
            members: configuration.node_ids().copied().collect(),
        }
    }

    fn reconfigure(&self) {
        let mut consensus = self.consensus.lock().unwrap();
        let round = self.round();
        let committed = consensus.strategy.reconfigure(&round);
        self.global_commit(&committed, round.view);
    }

    // Called with the consensus lock held, so that versions reach the handler in commit order.
    fn global_commit(&self, versions: &[Version], view: ViewNumber) {
        for version in versions {
            self.global_commit_handler.perform_global_commit(*version, view);
            self.last_committed_version
                .fetch_max(version.int(), Ordering::SeqCst);

            Event::publish(
                &self.event_publisher,
                Event::CommitVersion(CommitVersionEvent {
                    timestamp: SystemTime::now(),
                    version: *version,
                    view,
                }),
            );
        }
    }
}

/// # Panics
///
/// Panics if `configuration` is empty.
fn select_primary(view: ViewNumber, configuration: &Replicas) -> NodeId {
    assert!(
        !configuration.is_empty(),
        "Cannot select the primary of view {} from an empty configuration",
        view
    );
    let idx = (view.int() % configuration.len() as u64) as usize;
    configuration
        .nth(idx)
        .map(|replica| replica.id())
        .expect("idx is smaller than the size of the configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cert(byte: u8) -> Certificate {
        Certificate::new(vec![byte; 32])
    }

    #[test]
    fn select_primary_test() {
        let mut configuration = Replicas::new();
        for id in [10, 4, 7] {
            configuration.add(NodeId::new(id), cert(id as u8)).unwrap();
        }
        let primaries: Vec<u64> = (0..6)
            .map(|view| select_primary(ViewNumber::new(view), &configuration).int())
            .collect();
        assert_eq!(primaries, vec![4, 7, 10, 4, 7, 10]);
    }

    #[test]
    #[should_panic(expected = "empty configuration")]
    fn select_primary_from_empty_configuration_test() {
        select_primary(ViewNumber::init(), &Replicas::new());
    }
}
