/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Messages sent from the ledger core to its host process.

use std::fmt::{self, Display, Formatter};
use std::sync::mpsc::Sender;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::data_types::Version;

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum HostMessage {
    /// A serialized [snapshot](crate::store::StoreSnapshot) of the store at `index`, whose evidence has
    /// been committed to the ledger. The host is responsible for persisting it.
    LedgerSnapshot { index: Version, snapshot: Vec<u8> },
}

/// The outbound channel to the host.
pub trait HostWriter: Send + 'static {
    /// Deliver `message` to the host, or return [`HostDisconnected`] if the host no longer listens.
    fn write(&mut self, message: HostMessage) -> Result<(), HostDisconnected>;
}

/// The host end of the channel has been closed. The message was not delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostDisconnected;

impl Display for HostDisconnected {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "host channel disconnected")
    }
}

impl HostWriter for Sender<HostMessage> {
    fn write(&mut self, message: HostMessage) -> Result<(), HostDisconnected> {
        self.send(message).map_err(|_| HostDisconnected)
    }
}
