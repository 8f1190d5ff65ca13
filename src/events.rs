/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the events emitted by a node, for event handling and logging.
//!
//! An event for a given action indicates that the action has been completed.

use std::sync::mpsc::Sender;
use std::time::SystemTime;

use crate::threading::Context;
use crate::types::data_types::{CryptoHash, NodeId, Version, ViewNumber};

pub enum Event {
    // Events of the consensus state machine.
    CommitVersion(CommitVersionEvent),
    AddNode(AddNodeEvent),
    RemoveNode(RemoveNodeEvent),
    AdvanceView(AdvanceViewEvent),
    OpenNetwork(OpenNetworkEvent),
    // Events of the ledger.
    EmitSignature(EmitSignatureEvent),
    // Events of the snapshotter.
    ScheduleSnapshot(ScheduleSnapshotEvent),
    CommitSnapshotEvidence(CommitSnapshotEvidenceEvent),
    SnapshotFailed(SnapshotFailedEvent),
}

impl Event {
    pub(crate) fn publish(event_publisher: &Option<Sender<Event>>, event: Event) {
        if let Some(event_publisher) = event_publisher {
            // Events published after the event bus has shut down are dropped.
            let _ = event_publisher.send(event);
        }
    }
}

pub struct CommitVersionEvent {
    pub timestamp: SystemTime,
    pub version: Version,
    pub view: ViewNumber,
}

pub struct AddNodeEvent {
    pub timestamp: SystemTime,
    pub node: NodeId,
}

pub struct RemoveNodeEvent {
    pub timestamp: SystemTime,
    pub node: NodeId,
}

pub struct AdvanceViewEvent {
    pub timestamp: SystemTime,
    pub view: ViewNumber,
    pub primary: NodeId,
}

pub struct OpenNetworkEvent {
    pub timestamp: SystemTime,
    pub last_committed_version: Version,
}

pub struct EmitSignatureEvent {
    pub timestamp: SystemTime,
    pub version: Version,
    pub root: CryptoHash,
}

pub struct ScheduleSnapshotEvent {
    pub timestamp: SystemTime,
    pub index: Version,
    pub context: Context,
}

pub struct CommitSnapshotEvidenceEvent {
    pub timestamp: SystemTime,
    pub index: Version,
    pub hash: CryptoHash,
}

pub struct SnapshotFailedEvent {
    pub timestamp: SystemTime,
    pub index: Version,
    pub reason: String,
}
