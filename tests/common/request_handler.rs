//! Request handlers and fixtures for driving a state machine without a store.

use std::sync::{Arc, Mutex};

use ed25519_dalek::SigningKey;
use rand_core::OsRng;
use replicated_ledger::{
    consensus::{
        strategy::{RequestError, RequestHandler},
        StateMachine, ViewHistory,
    },
    types::{
        data_types::{Certificate, NodeId, Version},
        requests::Request,
    },
};

/// Applies every request at the next version, and records the versions it handed out.
#[derive(Clone, Default)]
pub(crate) struct RecordingHandler(Arc<Mutex<Vec<Version>>>);

impl RecordingHandler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn versions(&self) -> Vec<Version> {
        self.0.lock().unwrap().clone()
    }
}

impl RequestHandler for RecordingHandler {
    fn receive_request(&mut self, request: Request) -> Result<Version, RequestError> {
        if request.payload.is_empty() {
            return Err(RequestError(String::from("empty payload")));
        }
        let mut versions = self.0.lock().unwrap();
        let version = versions.last().map_or(Version::new(1), |last| last.next());
        versions.push(version);
        Ok(version)
    }
}

pub(crate) fn request(byte: u8) -> Request {
    Request::new(vec![byte])
}

pub(crate) fn certificate() -> Certificate {
    let mut csprg = OsRng {};
    let key = SigningKey::generate(&mut csprg);
    Certificate::new(key.verifying_key().to_bytes().to_vec())
}

// Start a state machine for `me` that records commits in a fresh `ViewHistory`.
pub(crate) fn state_machine(me: u64) -> (StateMachine, RecordingHandler, Arc<ViewHistory>) {
    let handler = RecordingHandler::new();
    let view_history = Arc::new(ViewHistory::new());
    let state_machine = StateMachine::new(
        NodeId::new(me),
        certificate(),
        handler.clone(),
        view_history.clone(),
        None,
    );
    (state_machine, handler, view_history)
}
