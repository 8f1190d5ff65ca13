/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The thread that receives published [events](crate::events) and fires their handlers.

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::events::*;
use crate::logging::Logger;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

#[derive(Default)]
pub(crate) struct EventHandlers {
    pub(crate) commit_version_handlers: Vec<HandlerPtr<CommitVersionEvent>>,
    pub(crate) add_node_handlers: Vec<HandlerPtr<AddNodeEvent>>,
    pub(crate) remove_node_handlers: Vec<HandlerPtr<RemoveNodeEvent>>,
    pub(crate) advance_view_handlers: Vec<HandlerPtr<AdvanceViewEvent>>,
    pub(crate) open_network_handlers: Vec<HandlerPtr<OpenNetworkEvent>>,
    pub(crate) emit_signature_handlers: Vec<HandlerPtr<EmitSignatureEvent>>,
    pub(crate) schedule_snapshot_handlers: Vec<HandlerPtr<ScheduleSnapshotEvent>>,
    pub(crate) commit_snapshot_evidence_handlers: Vec<HandlerPtr<CommitSnapshotEvidenceEvent>>,
    pub(crate) snapshot_failed_handlers: Vec<HandlerPtr<SnapshotFailedEvent>>,
}

impl EventHandlers {
    /// Collect the user-defined handlers, and the default loggers if `log_events` is set.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        log_events: bool,
        commit_version_handler: Option<HandlerPtr<CommitVersionEvent>>,
        add_node_handler: Option<HandlerPtr<AddNodeEvent>>,
        remove_node_handler: Option<HandlerPtr<RemoveNodeEvent>>,
        advance_view_handler: Option<HandlerPtr<AdvanceViewEvent>>,
        open_network_handler: Option<HandlerPtr<OpenNetworkEvent>>,
        emit_signature_handler: Option<HandlerPtr<EmitSignatureEvent>>,
        schedule_snapshot_handler: Option<HandlerPtr<ScheduleSnapshotEvent>>,
        commit_snapshot_evidence_handler: Option<HandlerPtr<CommitSnapshotEvidenceEvent>>,
        snapshot_failed_handler: Option<HandlerPtr<SnapshotFailedEvent>>,
    ) -> EventHandlers {
        fn handlers<T: Logger>(log_events: bool, handler: Option<HandlerPtr<T>>) -> Vec<HandlerPtr<T>> {
            let mut handlers = Vec::new();
            if log_events {
                handlers.push(T::get_logger())
            }
            handlers.extend(handler);
            handlers
        }

        EventHandlers {
            commit_version_handlers: handlers(log_events, commit_version_handler),
            add_node_handlers: handlers(log_events, add_node_handler),
            remove_node_handlers: handlers(log_events, remove_node_handler),
            advance_view_handlers: handlers(log_events, advance_view_handler),
            open_network_handlers: handlers(log_events, open_network_handler),
            emit_signature_handlers: handlers(log_events, emit_signature_handler),
            schedule_snapshot_handlers: handlers(log_events, schedule_snapshot_handler),
            commit_snapshot_evidence_handlers: handlers(log_events, commit_snapshot_evidence_handler),
            snapshot_failed_handlers: handlers(log_events, snapshot_failed_handler),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.commit_version_handlers.is_empty()
            && self.add_node_handlers.is_empty()
            && self.remove_node_handlers.is_empty()
            && self.advance_view_handlers.is_empty()
            && self.open_network_handlers.is_empty()
            && self.emit_signature_handlers.is_empty()
            && self.schedule_snapshot_handlers.is_empty()
            && self.commit_snapshot_evidence_handlers.is_empty()
            && self.snapshot_failed_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::CommitVersion(commit_version_event) => self
                .commit_version_handlers
                .iter()
                .for_each(|handler| handler(&commit_version_event)),

            Event::AddNode(add_node_event) => self
                .add_node_handlers
                .iter()
                .for_each(|handler| handler(&add_node_event)),

            Event::RemoveNode(remove_node_event) => self
                .remove_node_handlers
                .iter()
                .for_each(|handler| handler(&remove_node_event)),

            Event::AdvanceView(advance_view_event) => self
                .advance_view_handlers
                .iter()
                .for_each(|handler| handler(&advance_view_event)),

            Event::OpenNetwork(open_network_event) => self
                .open_network_handlers
                .iter()
                .for_each(|handler| handler(&open_network_event)),

            Event::EmitSignature(emit_signature_event) => self
                .emit_signature_handlers
                .iter()
                .for_each(|handler| handler(&emit_signature_event)),

            Event::ScheduleSnapshot(schedule_snapshot_event) => self
                .schedule_snapshot_handlers
                .iter()
                .for_each(|handler| handler(&schedule_snapshot_event)),

            Event::CommitSnapshotEvidence(commit_snapshot_evidence_event) => self
                .commit_snapshot_evidence_handlers
                .iter()
                .for_each(|handler| handler(&commit_snapshot_evidence_event)),

            Event::SnapshotFailed(snapshot_failed_event) => self
                .snapshot_failed_handlers
                .iter()
                .for_each(|handler| handler(&snapshot_failed_event)),
        }
    }
}

/// Start the event bus thread. The thread fires handlers for every received event until it receives a
/// shutdown signal, and then fires handlers for the events that are still queued.
pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => {
                event_subscriber
                    .try_iter()
                    .for_each(|event| event_handlers.fire_handlers(event));
                return;
            }
            Err(TryRecvError::Empty) => (),
        }

        match event_subscriber.recv_timeout(Duration::from_millis(10)) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}
