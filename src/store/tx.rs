/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Optimistic transactions over the maps of a [`Store`].

use std::collections::{BTreeMap, BTreeSet};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::data_types::Version;

use super::{CommitError, Store};

/// A single write in a ledger entry. `value` is `None` for removals.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Write {
    pub map: String,
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
}

/// The unit of replication: every write of one committed transaction, and the version it was
/// committed at.
///
/// The SHA256 hash of the Borsh serialization of a `LedgerEntry` is its leaf in the
/// [transaction history](crate::history).
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct LedgerEntry {
    pub version: Version,
    pub writes: Vec<Write>,
}

/// A transaction against a [`Store`], created using [`Store::begin`].
///
/// Reads observe the latest committed state. Writes are buffered inside the transaction and only become
/// visible when [`commit`](Self::commit) succeeds. A commit fails with [`CommitError::Conflict`] if any
/// key this transaction read was written by another transaction after this one began.
pub struct Tx {
    store: Store,
    pub(super) read_version: Version,
    pub(super) reads: BTreeSet<(String, Vec<u8>)>,
    pub(super) writes: BTreeMap<(String, Vec<u8>), Option<Vec<u8>>>,
}

impl Tx {
    pub(super) fn new(store: Store, read_version: Version) -> Tx {
        Tx {
            store,
            read_version,
            reads: BTreeSet::new(),
            writes: BTreeMap::new(),
        }
    }

    /// Get the value of `key` in `map`, including the writes made earlier in this transaction.
    pub fn get(&mut self, map: &str, key: &[u8]) -> Option<Vec<u8>> {
        let map_key = (map.to_string(), key.to_vec());
        if let Some(value) = self.writes.get(&map_key) {
            return value.clone();
        }
        self.reads.insert(map_key);
        self.store.get(map, key)
    }

    /// Get the value of `key` in `map`, deserialized from Borsh.
    pub fn get_value<T: BorshDeserialize>(
        &mut self,
        map: &str,
        key: &[u8],
    ) -> Result<Option<T>, std::io::Error> {
        self.get(map, key)
            .map(|bytes| T::try_from_slice(&bytes))
            .transpose()
    }

    /// Set `key` in `map` to `value`.
    pub fn put(&mut self, map: &str, key: &[u8], value: &[u8]) {
        self.writes
            .insert((map.to_string(), key.to_vec()), Some(value.to_vec()));
    }

    /// Set `key` in `map` to the Borsh serialization of `value`.
    pub fn put_value<T: BorshSerialize>(&mut self, map: &str, key: &[u8], value: &T) {
        self.put(map, key, &value.try_to_vec().unwrap())
    }

    /// Remove `key` from `map`.
    pub fn remove(&mut self, map: &str, key: &[u8]) {
        self.writes.insert((map.to_string(), key.to_vec()), None);
    }

    /// Get the version of the store when this transaction began.
    pub fn read_version(&self) -> Version {
        self.read_version
    }

    /// Try to commit this transaction into its store, returning the version it was committed at.
    ///
    /// A transaction without writes does not produce a ledger entry and "commits" at the version it
    /// began at.
    pub fn commit(self) -> Result<Version, CommitError> {
        let store = self.store.clone();
        store.commit(self)
    }

    pub(super) fn into_writes(self) -> Vec<Write> {
        self.writes
            .into_iter()
            .map(|((map, key), value)| Write { map, key, value })
            .collect()
    }
}
