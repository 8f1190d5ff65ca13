//! Helpers for receiving what the ledger core sends to its host.

use std::{
    sync::mpsc::{self, Receiver, Sender},
    time::Duration,
};

use replicated_ledger::{host::HostMessage, types::data_types::Version};

pub(crate) fn host_channel() -> (Sender<HostMessage>, Receiver<HostMessage>) {
    mpsc::channel()
}

// Wait for the next snapshot emitted to the host, panicking if none arrives within a few seconds.
pub(crate) fn recv_snapshot(from_core: &Receiver<HostMessage>) -> (Version, Vec<u8>) {
    match from_core.recv_timeout(Duration::from_secs(5)) {
        Ok(HostMessage::LedgerSnapshot { index, snapshot }) => (index, snapshot),
        Err(err) => panic!("No snapshot was emitted to the host: {}", err),
    }
}

// Collect every snapshot that is already queued for the host.
pub(crate) fn drain_snapshots(from_core: &Receiver<HostMessage>) -> Vec<Version> {
    from_core
        .try_iter()
        .map(|HostMessage::LedgerSnapshot { index, .. }| index)
        .collect()
}
