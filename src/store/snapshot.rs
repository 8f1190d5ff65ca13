/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Point-in-time snapshots of a [`Store`].

use std::{
    collections::BTreeMap,
    fmt::{self, Display, Formatter},
};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    history::SignatureRecord,
    types::{
        crypto_primitives::hash_bytes,
        data_types::{CryptoHash, Version},
    },
};

use super::{
    signature_write, DeserialiseError, LedgerEntry, Store, VersionedValue, SIGNATURES,
    SINGLE_SLOT_KEY,
};

/// The contents of every map of a store at `version`.
///
/// `leaf` is the history leaf of the entry committed at `version`. Together with the signature record
/// in the [`SIGNATURES`] map, it lets the receiver rebuild the history root at `version`. The leaf is
/// not signed: the receiver recomputes it from the signature record and rejects a snapshot whose leaf
/// differs.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct StoreSnapshot {
    pub version: Version,
    pub leaf: Option<CryptoHash>,
    pub maps: BTreeMap<String, BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl StoreSnapshot {
    /// Get the signature record contained in this snapshot, if any.
    pub fn signature_record(&self) -> Result<Option<SignatureRecord>, std::io::Error> {
        self.signature_record_bytes()
            .map(SignatureRecord::try_from_slice)
            .transpose()
    }

    /// Get the leaf that the entry at this snapshot's version has, if that entry is the one that
    /// committed the snapshot's signature record.
    pub fn signature_leaf(&self) -> Option<CryptoHash> {
        let entry = LedgerEntry {
            version: self.version,
            writes: vec![signature_write(self.signature_record_bytes()?.to_vec())],
        };
        Some(hash_bytes(&entry.try_to_vec().unwrap()))
    }

    fn signature_record_bytes(&self) -> Option<&[u8]> {
        self.maps
            .get(SIGNATURES)
            .and_then(|entries| entries.get(SINGLE_SLOT_KEY.as_slice()))
            .map(Vec::as_slice)
    }
}

/// Error when a snapshot cannot be extracted from a store.
#[derive(Debug)]
pub enum SnapshotError {
    /// The store can only produce snapshots between its base version (the version of the snapshot it
    /// was recovered from, or 0) and its current version.
    VersionOutOfRange {
        version: Version,
        base: Version,
        current: Version,
    },
}

impl Display for SnapshotError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::VersionOutOfRange {
                version,
                base,
                current,
            } => write!(
                f,
                "cannot snapshot at version {} outside of [{}, {}]",
                version, base, current
            ),
        }
    }
}

impl Store {
    /// Extract the state of every map at `version`.
    pub fn snapshot(&self, version: Version) -> Result<StoreSnapshot, SnapshotError> {
        let state = self.lock();
        if version < state.base_version || version > state.version {
            return Err(SnapshotError::VersionOutOfRange {
                version,
                base: state.base_version,
                current: state.version,
            });
        }

        let mut maps: BTreeMap<String, BTreeMap<Vec<u8>, Vec<u8>>> = state
            .maps
            .keys()
            .map(|name| (name.clone(), BTreeMap::new()))
            .collect();
        for (name, entries) in &state.base {
            maps.insert(name.clone(), entries.clone());
        }
        for entry in state.log.iter().take_while(|entry| entry.version <= version) {
            for write in &entry.writes {
                let entries = maps.entry(write.map.clone()).or_default();
                match &write.value {
                    Some(value) => entries.insert(write.key.clone(), value.clone()),
                    None => entries.remove(&write.key),
                };
            }
        }

        let leaf = state
            .history
            .as_ref()
            .and_then(|history| history.leaf(version));

        Ok(StoreSnapshot {
            version,
            leaf,
            maps,
        })
    }

    /// Fold every entry up to `version` into the base state, and drop those entries and their history
    /// leaves. Afterwards, snapshots can only be taken at `version` or later.
    ///
    /// Does nothing if `version` is not between the current base version and the current version.
    pub fn compact(&self, version: Version) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if version <= state.base_version || version > state.version {
            return;
        }

        let folded = state
            .log
            .iter()
            .take_while(|entry| entry.version <= version)
            .count();
        for entry in state.log.drain(..folded) {
            for write in entry.writes {
                let entries = state.base.entry(write.map).or_default();
                match write.value {
                    Some(value) => entries.insert(write.key, value),
                    None => entries.remove(&write.key),
                };
            }
        }
        state.base_version = version;
        if let Some(history) = state.history.as_mut() {
            history.compact(version);
        }
        log::debug!("Compacted store up to version {}", version);
    }

    /// Serialize `snapshot` so that it can be sent to the host.
    pub fn serialise_snapshot(&self, snapshot: StoreSnapshot) -> Vec<u8> {
        snapshot.try_to_vec().unwrap()
    }

    /// Replace the contents of this store with those of a serialized snapshot.
    ///
    /// If this store has a history, the history is seeded from the snapshot's signature record. This
    /// requires the snapshot to have been taken exactly at the version of a signature entry: otherwise
    /// [`DeserialiseError::NoSignatureAtVersion`] is returned. On error, the store is left untouched.
    pub fn deserialise_snapshot(&self, bytes: &[u8]) -> Result<Version, DeserialiseError> {
        let snapshot = StoreSnapshot::try_from_slice(bytes).map_err(DeserialiseError::Malformed)?;

        let mut state = self.lock();
        if let Some(map) = snapshot
            .maps
            .keys()
            .find(|name| !state.maps.contains_key(*name))
        {
            return Err(DeserialiseError::UnknownMap { map: map.clone() });
        }

        if let Some(history) = state.history.as_mut() {
            let record = match snapshot
                .signature_record()
                .map_err(DeserialiseError::Malformed)?
            {
                Some(record) if record.version == snapshot.version => record,
                _ => {
                    return Err(DeserialiseError::NoSignatureAtVersion {
                        version: snapshot.version,
                    })
                }
            };
            let leaf = snapshot.leaf.ok_or(DeserialiseError::MissingLeaf {
                version: snapshot.version,
            })?;
            let expected =
                snapshot
                    .signature_leaf()
                    .ok_or(DeserialiseError::NoSignatureAtVersion {
                        version: snapshot.version,
                    })?;
            if leaf != expected {
                return Err(DeserialiseError::LeafMismatch {
                    version: snapshot.version,
                    expected,
                    actual: leaf,
                });
            }
            history.seed_from_signature(&record, leaf)?;
        }

        let version = snapshot.version;
        for (name, entries) in state.maps.iter_mut() {
            *entries = snapshot
                .maps
                .get(name)
                .map(|snapshot_entries| {
                    snapshot_entries
                        .iter()
                        .map(|(key, value)| {
                            (
                                key.clone(),
                                VersionedValue {
                                    version,
                                    value: Some(value.clone()),
                                },
                            )
                        })
                        .collect()
                })
                .unwrap_or_default();
        }
        state.base = snapshot.maps;
        state.base_version = version;
        state.log.clear();
        state.version = version;

        log::debug!("Installed snapshot at version {}", version);
        Ok(version)
    }
}
