/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the node's
//! [configuration](crate::config::Configuration).
//!
//! The ledger core logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [CommitSnapshotEvidence](crate::events::CommitSnapshotEvidenceEvent) is printed:
//!
//! ```text
//! CommitSnapshotEvidence, 1701329264, 12, fNGCJyk
//! ```
//!
//! In the snippet:
//! - The third value is the version the snapshot was taken at.
//! - The fourth value is the first seven characters of the Base64 encoding of the hash of the serialized
//!   snapshot.

use std::time::SystemTime;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};

use crate::events::*;
use crate::threading::Context;

// Names of each event in PascalCase for printing:
pub const COMMIT_VERSION: &str = "CommitVersion";
pub const ADD_NODE: &str = "AddNode";
pub const REMOVE_NODE: &str = "RemoveNode";
pub const ADVANCE_VIEW: &str = "AdvanceView";
pub const OPEN_NETWORK: &str = "OpenNetwork";

pub const EMIT_SIGNATURE: &str = "EmitSignature";

pub const SCHEDULE_SNAPSHOT: &str = "ScheduleSnapshot";
pub const COMMIT_SNAPSHOT_EVIDENCE: &str = "CommitSnapshotEvidence";
pub const SNAPSHOT_FAILED: &str = "SnapshotFailed";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for CommitVersionEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |commit_version_event: &CommitVersionEvent| {
            log::info!(
                "{}, {}, {}, {}",
                COMMIT_VERSION,
                secs_since_unix_epoch(commit_version_event.timestamp),
                commit_version_event.version,
                commit_version_event.view
            )
        };
        Box::new(logger)
    }
}

impl Logger for AddNodeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |add_node_event: &AddNodeEvent| {
            log::info!(
                "{}, {}, {}",
                ADD_NODE,
                secs_since_unix_epoch(add_node_event.timestamp),
                add_node_event.node
            )
        };
        Box::new(logger)
    }
}

impl Logger for RemoveNodeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |remove_node_event: &RemoveNodeEvent| {
            log::info!(
                "{}, {}, {}",
                REMOVE_NODE,
                secs_since_unix_epoch(remove_node_event.timestamp),
                remove_node_event.node
            )
        };
        Box::new(logger)
    }
}

impl Logger for AdvanceViewEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |advance_view_event: &AdvanceViewEvent| {
            log::info!(
                "{}, {}, {}, {}",
                ADVANCE_VIEW,
                secs_since_unix_epoch(advance_view_event.timestamp),
                advance_view_event.view,
                advance_view_event.primary
            )
        };
        Box::new(logger)
    }
}

impl Logger for OpenNetworkEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |open_network_event: &OpenNetworkEvent| {
            log::info!(
                "{}, {}, {}",
                OPEN_NETWORK,
                secs_since_unix_epoch(open_network_event.timestamp),
                open_network_event.last_committed_version
            )
        };
        Box::new(logger)
    }
}

impl Logger for EmitSignatureEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |emit_signature_event: &EmitSignatureEvent| {
            log::info!(
                "{}, {}, {}, {}",
                EMIT_SIGNATURE,
                secs_since_unix_epoch(emit_signature_event.timestamp),
                emit_signature_event.version,
                first_seven_base64_chars(&emit_signature_event.root.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for ScheduleSnapshotEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |schedule_snapshot_event: &ScheduleSnapshotEvent| {
            log::info!(
                "{}, {}, {}, {}",
                SCHEDULE_SNAPSHOT,
                secs_since_unix_epoch(schedule_snapshot_event.timestamp),
                schedule_snapshot_event.index,
                context_info(schedule_snapshot_event.context)
            )
        };
        Box::new(logger)
    }
}

impl Logger for CommitSnapshotEvidenceEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |commit_snapshot_evidence_event: &CommitSnapshotEvidenceEvent| {
            log::info!(
                "{}, {}, {}, {}",
                COMMIT_SNAPSHOT_EVIDENCE,
                secs_since_unix_epoch(commit_snapshot_evidence_event.timestamp),
                commit_snapshot_evidence_event.index,
                first_seven_base64_chars(&commit_snapshot_evidence_event.hash.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for SnapshotFailedEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |snapshot_failed_event: &SnapshotFailedEvent| {
            log::info!(
                "{}, {}, {}, {}",
                SNAPSHOT_FAILED,
                secs_since_unix_epoch(snapshot_failed_event.timestamp),
                snapshot_failed_event.index,
                snapshot_failed_event.reason
            )
        };
        Box::new(logger)
    }
}

fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("Event occured before the Unix Epoch.")
        .as_secs()
}

fn context_info(context: Context) -> String {
    match context {
        Context::Control => String::from("control"),
        Context::Worker(idx) => format!("worker-{}", idx),
    }
}
