/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The replicated key-value store.
//!
//! A [`Store`] holds a set of named maps from byte keys to byte values. Maps are changed only through
//! [transactions](tx::Tx), each of which is committed at the next [`Version`] of the store and recorded
//! as a [`LedgerEntry`]. Every committed entry is:
//! 1. Appended to the store's [transaction history](crate::history), if the store has one, and
//! 2. Handed over to the store's [`Replicator`], if the store has one.
//!
//! Besides transactions, the store supports extracting a [snapshot](snapshot::StoreSnapshot) of every
//! map at a past version, (de)serializing snapshots, and applying ledger entries replicated from
//! another store.
//!
//! ## Ledger maps
//!
//! Every store contains two maps that are written by the ledger core itself:
//!
//! |Map|Key|Value|
//! |---|---|---|
//! |[`SIGNATURES`]|[`SINGLE_SLOT_KEY`]|The latest [`SignatureRecord`].|
//! |[`SNAPSHOT_EVIDENCE`]|[`SINGLE_SLOT_KEY`]|The latest [`SnapshotEvidence`](crate::snapshotter::SnapshotEvidence).|
//!
//! Both maps only retain their most recent value. Older values remain verifiable through the ledger.

pub mod snapshot;

pub mod tx;

use std::{
    collections::BTreeMap,
    fmt::{self, Display, Formatter},
    sync::{Arc, Mutex, MutexGuard},
};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    history::{HistoryError, MerkleTxHistory, SignatureRecord},
    types::data_types::{CryptoHash, Version, ViewNumber},
};

pub use snapshot::StoreSnapshot;
pub use tx::{LedgerEntry, Tx, Write};

/// Name of the map that stores the latest signature record.
pub const SIGNATURES: &str = "public:ledger.signatures";

/// Name of the map that stores the latest snapshot evidence.
pub const SNAPSHOT_EVIDENCE: &str = "public:ledger.snapshot_evidence";

/// The only key written in the single-slot ledger maps.
pub const SINGLE_SLOT_KEY: [u8; 8] = 0u64.to_le_bytes();

/// Receives every ledger entry committed locally, in order, so that it can be replicated.
pub trait Replicator: Send + 'static {
    /// Replicate the serialized `entry` committed at `version`. Returning `false` aborts the commit.
    fn replicate(&mut self, version: Version, entry: &[u8]) -> bool;
}

/// Handle to a replicated key-value store. Clones refer to the same store.
#[derive(Clone)]
pub struct Store(Arc<Mutex<StoreState>>);

pub(crate) struct StoreState {
    // Latest value of every key, with the version that last wrote it. Removals leave a `None`.
    pub(crate) maps: BTreeMap<String, BTreeMap<Vec<u8>, VersionedValue>>,
    pub(crate) version: Version,
    // State of every map at `base_version`, and the entries committed since.
    pub(crate) base_version: Version,
    pub(crate) base: BTreeMap<String, BTreeMap<Vec<u8>, Vec<u8>>>,
    pub(crate) log: Vec<LedgerEntry>,
    pub(crate) history: Option<MerkleTxHistory>,
    replicator: Option<Box<dyn Replicator>>,
}

#[derive(Clone)]
pub(crate) struct VersionedValue {
    pub(crate) version: Version,
    pub(crate) value: Option<Vec<u8>>,
}

impl Store {
    /// Create an empty store that contains only the ledger maps.
    pub fn new() -> Store {
        let mut maps = BTreeMap::new();
        maps.insert(SIGNATURES.to_string(), BTreeMap::new());
        maps.insert(SNAPSHOT_EVIDENCE.to_string(), BTreeMap::new());
        Store(Arc::new(Mutex::new(StoreState {
            maps,
            version: Version::none(),
            base_version: Version::none(),
            base: BTreeMap::new(),
            log: Vec::new(),
            history: None,
            replicator: None,
        })))
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.0.lock().unwrap()
    }

    /// Register a map called `name`. Does nothing if the map already exists.
    pub fn create_map(&self, name: &str) {
        self.lock()
            .maps
            .entry(name.to_string())
            .or_insert_with(BTreeMap::new);
    }

    /// Get the names of every map in the store, in ascending order.
    pub fn map_names(&self) -> Vec<String> {
        self.lock().maps.keys().cloned().collect()
    }

    /// Register every map of `other` in this store.
    pub fn clone_schema(&self, other: &Store) {
        for name in other.map_names() {
            self.create_map(&name);
        }
    }

    /// Attach a transaction history to this store. Every subsequently committed entry is appended to it.
    pub fn set_history(&self, history: MerkleTxHistory) {
        self.lock().history = Some(history);
    }

    /// Attach a replicator to this store.
    pub fn set_replicator(&self, replicator: impl Replicator) {
        self.lock().replicator = Some(Box::new(replicator));
    }

    /// Run `f` on the store's history, if it has one.
    pub fn with_history<R>(&self, f: impl FnOnce(&mut MerkleTxHistory) -> R) -> Option<R> {
        self.lock().history.as_mut().map(f)
    }

    /// Get the root of the store's history, if it has one.
    pub fn history_root(&self) -> Option<CryptoHash> {
        self.with_history(|history| history.root())
    }

    /// Get the version of the most recently committed entry.
    pub fn current_version(&self) -> Version {
        self.lock().version
    }

    /// Get the latest committed value of `key` in `map`.
    pub fn get(&self, map: &str, key: &[u8]) -> Option<Vec<u8>> {
        self.lock()
            .maps
            .get(map)
            .and_then(|entries| entries.get(key))
            .and_then(|versioned| versioned.value.clone())
    }

    /// Get the latest committed value of `key` in `map`, deserialized from Borsh.
    pub fn get_value<T: BorshDeserialize>(
        &self,
        map: &str,
        key: &[u8],
    ) -> Result<Option<T>, std::io::Error> {
        self.get(map, key)
            .map(|bytes| T::try_from_slice(&bytes))
            .transpose()
    }

    /// Begin a new transaction.
    pub fn begin(&self) -> Tx {
        Tx::new(self.clone(), self.current_version())
    }

    pub(crate) fn commit(&self, tx: Tx) -> Result<Version, CommitError> {
        let mut state = self.lock();
        state.check_reads(&tx)?;
        let read_version = tx.read_version;
        let writes = tx.into_writes();
        if writes.is_empty() {
            return Ok(read_version);
        }
        state.commit_writes(writes)
    }

    /// Commit a signature record over the current root of the history, signed in `view`. Returns the
    /// committed record, whose `version` is the version it was committed at.
    pub fn emit_signature(&self, view: ViewNumber) -> Result<SignatureRecord, CommitError> {
        let mut state = self.lock();
        let record = state
            .history
            .as_ref()
            .ok_or(CommitError::NoHistory)?
            .signature_record(view);
        assert_eq!(
            record.version,
            state.version.next(),
            "The history and the store it is attached to have diverged."
        );

        let writes = vec![signature_write(record.try_to_vec().unwrap())];
        let version = state.commit_writes(writes)?;
        log::debug!("Emitted signature at version {}: {}", version, record.root);
        Ok(record)
    }

    /// Apply a ledger entry replicated from another store.
    ///
    /// The entry must be at the version directly following this store's current version. If the entry
    /// carries a signature record, the record must sign this store's current root.
    pub fn deserialise(&self, entry_bytes: &[u8]) -> Result<Version, DeserialiseError> {
        let entry = LedgerEntry::try_from_slice(entry_bytes).map_err(DeserialiseError::Malformed)?;

        let mut state = self.lock();
        if entry.version != state.version.next() {
            return Err(DeserialiseError::VersionGap {
                expected: state.version.next(),
                actual: entry.version,
            });
        }
        for write in &entry.writes {
            if !state.maps.contains_key(&write.map) {
                return Err(DeserialiseError::UnknownMap {
                    map: write.map.clone(),
                });
            }
        }

        if let Some(history) = &state.history {
            for write in entry.writes.iter().filter(|write| write.map == SIGNATURES) {
                if let Some(value) = &write.value {
                    let record = SignatureRecord::try_from_slice(value)
                        .map_err(DeserialiseError::Malformed)?;
                    if record.version != entry.version {
                        return Err(DeserialiseError::SignatureVersionMismatch {
                            entry: entry.version,
                            record: record.version,
                        });
                    }
                    history
                        .verify_signature_record(&record)
                        .map_err(DeserialiseError::History)?;
                }
            }
        }

        let version = entry.version;
        state.apply(entry, entry_bytes);
        Ok(version)
    }
}

// The only write of the ledger entry that carries a signature record.
pub(crate) fn signature_write(record_bytes: Vec<u8>) -> Write {
    Write {
        map: SIGNATURES.to_string(),
        key: SINGLE_SLOT_KEY.to_vec(),
        value: Some(record_bytes),
    }
}

impl Default for Store {
    fn default() -> Self {
        Store::new()
    }
}

impl StoreState {
    fn check_reads(&self, tx: &Tx) -> Result<(), CommitError> {
        for (map, key) in &tx.reads {
            let written_since = self
                .maps
                .get(map)
                .and_then(|entries| entries.get(key))
                .is_some_and(|versioned| versioned.version > tx.read_version);
            if written_since {
                return Err(CommitError::Conflict {
                    map: map.clone(),
                    read_version: tx.read_version,
                });
            }
        }
        Ok(())
    }

    fn commit_writes(&mut self, writes: Vec<Write>) -> Result<Version, CommitError> {
        if let Some(write) = writes.iter().find(|write| !self.maps.contains_key(&write.map)) {
            return Err(CommitError::UnknownMap {
                map: write.map.clone(),
            });
        }

        let entry = LedgerEntry {
            version: self.version.next(),
            writes,
        };
        let entry_bytes = entry.try_to_vec().unwrap();
        if let Some(replicator) = self.replicator.as_mut() {
            if !replicator.replicate(entry.version, &entry_bytes) {
                return Err(CommitError::NoReplicate {
                    version: entry.version,
                });
            }
        }

        let version = entry.version;
        self.apply(entry, &entry_bytes);
        Ok(version)
    }

    fn apply(&mut self, entry: LedgerEntry, entry_bytes: &[u8]) {
        for write in &entry.writes {
            if let Some(entries) = self.maps.get_mut(&write.map) {
                entries.insert(
                    write.key.clone(),
                    VersionedValue {
                        version: entry.version,
                        value: write.value.clone(),
                    },
                );
            }
        }
        if let Some(history) = self.history.as_mut() {
            history.append_entry(entry.version, entry_bytes);
        }
        self.version = entry.version;
        self.log.push(entry);
    }
}

/// Reasons why a transaction could not be committed. In every case, the store is left untouched.
#[derive(Debug)]
pub enum CommitError {
    /// A key read by the transaction was written after the transaction began.
    Conflict { map: String, read_version: Version },

    /// The transaction writes to a map that the store does not have.
    UnknownMap { map: String },

    /// The replicator refused the entry.
    NoReplicate { version: Version },

    /// A signature was requested from a store without a history.
    NoHistory,
}

impl Display for CommitError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CommitError::Conflict { map, read_version } => write!(
                f,
                "conflict in map {} since version {}",
                map, read_version
            ),
            CommitError::UnknownMap { map } => write!(f, "unknown map {}", map),
            CommitError::NoReplicate { version } => {
                write!(f, "entry at version {} could not be replicated", version)
            }
            CommitError::NoHistory => write!(f, "store has no history"),
        }
    }
}

/// Reasons why a snapshot or a ledger entry could not be applied to a store. In every case, the store
/// is left untouched.
#[derive(Debug)]
pub enum DeserialiseError {
    /// The bytes could not be deserialized.
    Malformed(std::io::Error),

    /// The snapshot or entry refers to a map that the store does not have.
    UnknownMap { map: String },

    /// The snapshot contains no signature record at its own version, so the store's history cannot be
    /// seeded from it.
    NoSignatureAtVersion { version: Version },

    /// The snapshot does not carry the leaf of the entry at its version.
    MissingLeaf { version: Version },

    /// The leaf carried by the snapshot is not the leaf of the signature entry at its version.
    LeafMismatch {
        version: Version,
        expected: CryptoHash,
        actual: CryptoHash,
    },

    /// The entry does not directly follow the store's current version.
    VersionGap { expected: Version, actual: Version },

    /// A signature record claims a version other than the version of the entry that carries it.
    SignatureVersionMismatch { entry: Version, record: Version },

    /// The history rejected the signature record.
    History(HistoryError),
}

impl Display for DeserialiseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DeserialiseError::Malformed(err) => write!(f, "malformed bytes: {}", err),
            DeserialiseError::UnknownMap { map } => write!(f, "unknown map {}", map),
            DeserialiseError::NoSignatureAtVersion { version } => {
                write!(f, "no signature at version {}", version)
            }
            DeserialiseError::MissingLeaf { version } => {
                write!(f, "no history leaf at version {}", version)
            }
            DeserialiseError::LeafMismatch {
                version,
                expected,
                actual,
            } => write!(
                f,
                "leaf at version {} is {}, expected {}",
                version, actual, expected
            ),
            DeserialiseError::VersionGap { expected, actual } => {
                write!(f, "expected version {}, got {}", expected, actual)
            }
            DeserialiseError::SignatureVersionMismatch { entry, record } => write!(
                f,
                "signature record for version {} carried at version {}",
                record, entry
            ),
            DeserialiseError::History(err) => write!(f, "history: {}", err),
        }
    }
}

impl From<HistoryError> for DeserialiseError {
    fn from(value: HistoryError) -> Self {
        DeserialiseError::History(value)
    }
}
