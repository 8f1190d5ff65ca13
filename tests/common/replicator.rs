//! Replicators that stand in for the network.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use replicated_ledger::{store::Replicator, types::data_types::Version};

/// Keeps a copy of every replicated entry, so that tests can apply them to another store.
#[derive(Clone, Default)]
pub(crate) struct CapturingReplicator(Arc<Mutex<Vec<(Version, Vec<u8>)>>>);

impl CapturingReplicator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn entry(&self, version: Version) -> Option<Vec<u8>> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .find(|(entry_version, _)| *entry_version == version)
            .map(|(_, entry)| entry.clone())
    }

    pub(crate) fn versions(&self) -> Vec<Version> {
        self.0.lock().unwrap().iter().map(|(version, _)| *version).collect()
    }
}

impl Replicator for CapturingReplicator {
    fn replicate(&mut self, version: Version, entry: &[u8]) -> bool {
        self.0.lock().unwrap().push((version, entry.to_vec()));
        true
    }
}

/// Accepts entries until it is told to refuse them.
#[derive(Clone, Default)]
pub(crate) struct SwitchableReplicator(Arc<AtomicBool>);

impl SwitchableReplicator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn refuse(&self, refuse: bool) {
        self.0.store(refuse, Ordering::SeqCst)
    }
}

impl Replicator for SwitchableReplicator {
    fn replicate(&mut self, _: Version, _: &[u8]) -> bool {
        !self.0.load(Ordering::SeqCst)
    }
}
