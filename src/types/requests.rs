/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Requests accepted by the [consensus state machine](crate::consensus::state_machine).

use borsh::{BorshDeserialize, BorshSerialize};

/// An inbound request, as handed over by the network transport.
///
/// The consensus state machine never looks into `payload`. It is interpreted by the
/// [`RequestHandler`](crate::consensus::strategy::RequestHandler) that executes the request against
/// the replicated store.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Request {
    pub payload: Vec<u8>,
}

impl Request {
    /// Create a new `Request` wrapping `payload`.
    pub fn new(payload: Vec<u8>) -> Self {
        Self { payload }
    }
}
