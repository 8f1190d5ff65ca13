/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build and run a node.
//!
//! A node wires together:
//! - A [`Store`] with a [Merkle transaction history](crate::history::MerkleTxHistory) signed by the node,
//! - A [consensus state machine](crate::consensus::StateMachine) that executes requests against the
//!   store through a [`StoreRequestHandler`],
//! - A [`ViewHistory`] that records globally committed versions and notifies the snapshotter of them,
//! - A [`Snapshotter`] that generates snapshots on a [`WorkerPool`] and emits them to the host,
//! - The [event bus](crate::event_bus) that fires user-defined event handlers and the default loggers.
//!
//! ## Starting a node
//!
//! ```ignore
//! let node =
//!     NodeSpec::builder()
//!     .configuration(configuration)
//!     .store(store)
//!     .to_host(to_host)
//!     .on_commit_snapshot_evidence(handler)
//!     .build()
//!     .start();
//! ```
//!
//! ### Required setters
//! - `.configuration(...)`
//! - `.store(...)`
//! - `.to_host(...)`
//!
//! ### Optional setters
//!
//! The optional setters are for registering user-defined event handlers for events from [crate::events]:
//! - `.on_commit_version(...)`
//! - `.on_add_node(...)`
//! - `.on_remove_node(...)`
//! - `.on_advance_view(...)`
//! - `.on_open_network(...)`
//! - `.on_emit_signature(...)`
//! - `.on_schedule_snapshot(...)`
//! - `.on_commit_snapshot_evidence(...)`
//! - `.on_snapshot_failed(...)`

use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use typed_builder::TypedBuilder;

use crate::app::{KvRequest, StoreRequestHandler};
use crate::config::Configuration;
use crate::consensus::replicas::{Replica, ReplicaRegistryError};
use crate::consensus::strategy::ConsensusError;
use crate::consensus::{StateMachine, ViewHistory};
use crate::event_bus::*;
use crate::events::*;
use crate::history::MerkleTxHistory;
use crate::host::HostWriter;
use crate::snapshotter::Snapshotter;
use crate::store::Store;
use crate::threading::WorkerPool;
use crate::types::crypto_primitives::{certificate_verifying_key, Keypair};
use crate::types::data_types::{Certificate, NodeId, Version};
use crate::types::requests::Request;

/// Stores all necessary parameters required to run a [Node].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [NodeSpec]. On the builder call the following methods to construct a valid [NodeSpec].

    Required:
    - `.configuration(...)`
    - `.store(...)`
    - `.to_host(...)`

    Optional:
    - `.on_commit_version(...)`
    - `.on_add_node(...)`
    - `.on_remove_node(...)`
    - `.on_advance_view(...)`
    - `.on_open_network(...)`
    - `.on_emit_signature(...)`
    - `.on_schedule_snapshot(...)`
    - `.on_commit_snapshot_evidence(...)`
    - `.on_snapshot_failed(...)`
"))]
pub struct NodeSpec<W: HostWriter> {
    #[builder(setter(doc = "Set the [configuration](Configuration), which contains the necessary parameters to run a node. Required."))]
    configuration: Configuration,
    #[builder(setter(doc = "Set the store that requests are executed against. If it has no history, one signed by the node is attached. Required."))]
    store: Store,
    #[builder(setter(doc = "Set the channel that snapshots are emitted to. Required."))]
    to_host: W,
    #[builder(default, setter(transform = |handler: impl Fn(&CommitVersionEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CommitVersionEvent>),
    doc = "Register a handler closure to be invoked after a version is globally committed. Optional."))]
    on_commit_version: Option<HandlerPtr<CommitVersionEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&AddNodeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<AddNodeEvent>),
    doc = "Register a handler closure to be invoked after a node is added to the configuration. Optional."))]
    on_add_node: Option<HandlerPtr<AddNodeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RemoveNodeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RemoveNodeEvent>),
    doc = "Register a handler closure to be invoked after a node is removed from the configuration. Optional."))]
    on_remove_node: Option<HandlerPtr<RemoveNodeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&AdvanceViewEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<AdvanceViewEvent>),
    doc = "Register a handler closure to be invoked after the node moves to a new view. Optional."))]
    on_advance_view: Option<HandlerPtr<AdvanceViewEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&OpenNetworkEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<OpenNetworkEvent>),
    doc = "Register a handler closure to be invoked after the network is opened. Optional."))]
    on_open_network: Option<HandlerPtr<OpenNetworkEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&EmitSignatureEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<EmitSignatureEvent>),
    doc = "Register a handler closure to be invoked after a signature record is committed. Optional."))]
    on_emit_signature: Option<HandlerPtr<EmitSignatureEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ScheduleSnapshotEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ScheduleSnapshotEvent>),
    doc = "Register a handler closure to be invoked after a snapshot is scheduled. Optional."))]
    on_schedule_snapshot: Option<HandlerPtr<ScheduleSnapshotEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CommitSnapshotEvidenceEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CommitSnapshotEvidenceEvent>),
    doc = "Register a handler closure to be invoked after a snapshot's evidence is committed and the snapshot is emitted to the host. Optional."))]
    on_commit_snapshot_evidence: Option<HandlerPtr<CommitSnapshotEvidenceEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SnapshotFailedEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SnapshotFailedEvent>),
    doc = "Register a handler closure to be invoked after a scheduled snapshot is abandoned. Optional."))]
    on_snapshot_failed: Option<HandlerPtr<SnapshotFailedEvent>>,
}

impl<W: HostWriter> NodeSpec<W> {
    /// Starts all threads and channels associated with running a node, and returns the handles to them
    /// in a [Node] struct.
    pub fn start(self) -> Node<W> {
        let Configuration {
            me,
            node_id,
            snapshot_interval,
            worker_threads,
            log_events,
        } = self.configuration;
        let certificate = Keypair::new(me.clone()).certificate();

        if self.store.with_history(|_| ()).is_none() {
            self.store.set_history(MerkleTxHistory::new(node_id, me));
        }

        let event_handlers = EventHandlers::new(
            log_events,
            self.on_commit_version,
            self.on_add_node,
            self.on_remove_node,
            self.on_advance_view,
            self.on_open_network,
            self.on_emit_signature,
            self.on_schedule_snapshot,
            self.on_commit_snapshot_evidence,
            self.on_snapshot_failed,
        );

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let pool = Arc::new(WorkerPool::new(worker_threads));
        let snapshotter = Snapshotter::new(
            self.store.clone(),
            self.to_host,
            pool.clone(),
            snapshot_interval,
            event_publisher.clone(),
        );

        let view_history = Arc::new(ViewHistory::new());
        {
            let snapshotter = snapshotter.clone();
            view_history.on_global_commit(move |version| snapshotter.snapshot(version));
        }

        let state_machine = Arc::new(StateMachine::new(
            node_id,
            certificate,
            StoreRequestHandler::new(self.store.clone(), event_publisher.clone()),
            view_history.clone(),
            event_publisher,
        ));

        let (event_bus, event_bus_shutdown) = match event_subscriber {
            Some(event_subscriber) => {
                let (event_bus_shutdown, event_bus_shutdown_receiver) = mpsc::channel();
                let event_bus = start_event_bus(
                    event_handlers,
                    event_subscriber,
                    event_bus_shutdown_receiver,
                );
                (Some(event_bus), Some(event_bus_shutdown))
            }
            None => (None, None),
        };

        Node {
            node_id,
            store: self.store,
            state_machine,
            view_history,
            snapshotter,
            pool,
            event_bus,
            event_bus_shutdown,
        }
    }
}

/// A handle to a running node. When this value is dropped, the worker threads finish their queued
/// snapshots and every background thread is shut down.
pub struct Node<W: HostWriter> {
    node_id: NodeId,
    store: Store,
    state_machine: Arc<StateMachine>,
    view_history: Arc<ViewHistory>,
    snapshotter: Arc<Snapshotter<W>>,
    pool: Arc<WorkerPool>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<W: HostWriter> Node<W> {
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Submit `request` to consensus, returning the versions that became globally committed as a result.
    pub fn receive_request(&self, request: Request) -> Result<Vec<Version>, ConsensusError> {
        self.state_machine.receive_request(request)
    }

    /// Submit a request that signs the current history root in the current view.
    pub fn emit_signature(&self) -> Result<Vec<Version>, ConsensusError> {
        let view = self.state_machine.view();
        self.state_machine
            .receive_request(KvRequest::EmitSignature { view }.into_request())
    }

    /// Add `node` to the configuration, and trust the signature records it signs with `certificate`.
    pub fn add_node(&self, node: NodeId, certificate: Certificate) -> Result<(), ReplicaRegistryError> {
        let key = certificate_verifying_key(&certificate)
            .map_err(|_| ReplicaRegistryError::InvalidCertificate { node })?;
        self.state_machine.add_node(node, certificate)?;
        self.store.with_history(|history| history.trust(node, key));
        Ok(())
    }

    /// Replace the certificate of the member `node`. Its signature records are verified with the new
    /// certificate from now on.
    pub fn rotate_certificate(
        &self,
        node: NodeId,
        certificate: Certificate,
    ) -> Result<(), ReplicaRegistryError> {
        let key = certificate_verifying_key(&certificate)
            .map_err(|_| ReplicaRegistryError::InvalidCertificate { node })?;
        self.state_machine.rotate_certificate(node, certificate)?;
        self.store.with_history(|history| history.trust(node, key));
        Ok(())
    }

    /// Remove `node` from the configuration. Signature records it already signed remain verifiable.
    pub fn remove_node(&self, node: NodeId) -> Result<Replica, ReplicaRegistryError> {
        self.state_machine.remove_node(node)
    }

    pub fn open_network(&self) -> bool {
        self.state_machine.open_network()
    }

    pub fn state_machine(&self) -> &Arc<StateMachine> {
        &self.state_machine
    }

    pub fn view_history(&self) -> &Arc<ViewHistory> {
        &self.view_history
    }

    pub fn snapshotter(&self) -> &Arc<Snapshotter<W>> {
        &self.snapshotter
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}

impl<W: HostWriter> Drop for Node<W> {
    fn drop(&mut self) {
        // Queued snapshot jobs may still publish events, so the workers stop before the event bus.
        self.pool.shutdown();

        if let Some(shutdown) = self.event_bus_shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(event_bus) = self.event_bus.take() {
            if event_bus.join().is_err() {
                log::error!("The event bus thread panicked");
            }
        }
    }
}
