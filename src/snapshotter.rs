/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Periodic, verifiable snapshots of the store.
//!
//! The [`Snapshotter`] is told about every globally committed version. Whenever the distance between a
//! committed version and the last snapshot exceeds the configured interval, it schedules a job on the
//! [worker pool](crate::threading::WorkerPool) that:
//! 1. Extracts and serializes a [snapshot](crate::store::StoreSnapshot) of the store at that version,
//! 2. Commits a [`SnapshotEvidence`] over the serialized snapshot to the [`SNAPSHOT_EVIDENCE`] map, so
//!    that the snapshot can later be verified against the ledger,
//! 3. Only then sends the serialized snapshot to the host, and records the version as the last snapshot.
//!
//! If the evidence cannot be committed, the snapshot is abandoned: it is neither sent to the host nor
//! recorded, and a later commit will schedule a new one. The same holds if the host channel is closed,
//! except that the evidence stays committed; it is overwritten by the evidence of the next snapshot.
//!
//! Once a snapshot is emitted, the store and its history drop the entries before it (see
//! [`Store::compact`]): no snapshot at an earlier version will be taken again.
//!
//! Steps 2 and 3 happen while holding the host channel, so snapshots reach the host in the order their
//! evidence was committed. A job that finds that a snapshot at a later version has already been emitted
//! is abandoned.

use std::fmt::{self, Display, Formatter};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::events::*;
use crate::host::{HostDisconnected, HostMessage, HostWriter};
use crate::store::{
    snapshot::SnapshotError, CommitError, Store, SINGLE_SLOT_KEY, SNAPSHOT_EVIDENCE,
};
use crate::threading::WorkerPool;
use crate::types::crypto_primitives::hash_bytes;
use crate::types::data_types::{CryptoHash, Version};

/// The record that binds a snapshot emitted to the host to the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SnapshotEvidence {
    /// SHA256 hash of the serialized snapshot.
    pub hash: CryptoHash,
    /// The version the snapshot was taken at.
    pub version: Version,
}

/// Read the latest snapshot evidence committed to `store`.
pub fn read_snapshot_evidence(store: &Store) -> Result<Option<SnapshotEvidence>, std::io::Error> {
    store.get_value(SNAPSHOT_EVIDENCE, &SINGLE_SLOT_KEY)
}

pub struct Snapshotter<W: HostWriter> {
    store: Store,
    to_host: Mutex<W>,
    last_snapshot_idx: Mutex<Version>,
    snapshot_interval: u64,
    pool: Arc<WorkerPool>,
    event_publisher: Option<Sender<Event>>,
}

impl<W: HostWriter> Snapshotter<W> {
    pub fn new(
        store: Store,
        to_host: W,
        pool: Arc<WorkerPool>,
        snapshot_interval: u64,
        event_publisher: Option<Sender<Event>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            to_host: Mutex::new(to_host),
            last_snapshot_idx: Mutex::new(Version::none()),
            snapshot_interval,
            pool,
            event_publisher,
        })
    }

    /// Get the version of the last snapshot sent to the host.
    pub fn last_snapshot_idx(&self) -> Version {
        *self.last_snapshot_idx.lock().unwrap()
    }

    /// Notify the snapshotter that `idx` was globally committed. Schedules a snapshot at `idx` if it is
    /// more than the snapshot interval past the last snapshot.
    ///
    /// # Panics
    ///
    /// Panics if `idx` is lower than the last snapshot's version: committed versions never go backwards.
    pub fn snapshot(self: &Arc<Self>, idx: Version) {
        {
            let last_snapshot_idx = self.last_snapshot_idx.lock().unwrap();
            assert!(
                idx >= *last_snapshot_idx,
                "Cannot snapshot at idx {} which is earlier than last snapshot idx {}",
                idx,
                *last_snapshot_idx
            );
            if idx - *last_snapshot_idx <= self.snapshot_interval {
                return;
            }
        }

        let snapshotter = Arc::clone(self);
        let context = self.pool.dispatch(move || snapshotter.snapshot_job(idx));
        log::debug!("Scheduled snapshot at {} on {:?}", idx, context);

        Event::publish(
            &self.event_publisher,
            Event::ScheduleSnapshot(ScheduleSnapshotEvent {
                timestamp: SystemTime::now(),
                index: idx,
                context,
            }),
        );
    }

    fn snapshot_job(&self, idx: Version) {
        match self.emit_snapshot(idx) {
            Ok(hash) => Event::publish(
                &self.event_publisher,
                Event::CommitSnapshotEvidence(CommitSnapshotEvidenceEvent {
                    timestamp: SystemTime::now(),
                    index: idx,
                    hash,
                }),
            ),
            Err(err) => {
                log::error!("Abandoned snapshot at {}: {}", idx, err);
                Event::publish(
                    &self.event_publisher,
                    Event::SnapshotFailed(SnapshotFailedEvent {
                        timestamp: SystemTime::now(),
                        index: idx,
                        reason: err.to_string(),
                    }),
                );
            }
        }
    }

    fn emit_snapshot(&self, idx: Version) -> Result<CryptoHash, SnapshotterError> {
        // A concurrent job may already have emitted a later snapshot and compacted the store past `idx`.
        let snapshot = self.store.snapshot(idx).map_err(|err| {
            let last_snapshot_idx = self.last_snapshot_idx();
            if idx <= last_snapshot_idx {
                SnapshotterError::Superseded { last_snapshot_idx }
            } else {
                err.into()
            }
        })?;
        let serialised = self.store.serialise_snapshot(snapshot);
        let hash = hash_bytes(&serialised);

        let mut to_host = self.to_host.lock().unwrap();
        let last_snapshot_idx = self.last_snapshot_idx();
        if idx <= last_snapshot_idx {
            return Err(SnapshotterError::Superseded {
                last_snapshot_idx,
            });
        }

        let mut tx = self.store.begin();
        tx.get(SNAPSHOT_EVIDENCE, &SINGLE_SLOT_KEY);
        tx.put_value(SNAPSHOT_EVIDENCE, &SINGLE_SLOT_KEY, &SnapshotEvidence { hash, version: idx });
        let evidence_version = tx.commit()?;
        log::debug!(
            "Committed evidence for snapshot at {} at version {}",
            idx,
            evidence_version
        );

        to_host.write(HostMessage::LedgerSnapshot {
            index: idx,
            snapshot: serialised,
        })?;
        *self.last_snapshot_idx.lock().unwrap() = idx;
        self.store.compact(idx);
        Ok(hash)
    }
}

/// Reasons why a scheduled snapshot was abandoned.
#[derive(Debug)]
pub enum SnapshotterError {
    /// The store could not produce a snapshot at the scheduled version.
    Snapshot(SnapshotError),

    /// The snapshot evidence could not be committed.
    Evidence(CommitError),

    /// A snapshot at a later or equal version was emitted while this one was being generated.
    Superseded { last_snapshot_idx: Version },

    /// The evidence was committed, but the snapshot could not be delivered to the host.
    Host(HostDisconnected),
}

impl Display for SnapshotterError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotterError::Snapshot(err) => write!(f, "{}", err),
            SnapshotterError::Evidence(err) => {
                write!(f, "could not commit snapshot evidence: {}", err)
            }
            SnapshotterError::Superseded { last_snapshot_idx } => write!(
                f,
                "superseded by the snapshot at {}",
                last_snapshot_idx
            ),
            SnapshotterError::Host(err) => write!(f, "{}", err),
        }
    }
}

impl From<SnapshotError> for SnapshotterError {
    fn from(value: SnapshotError) -> Self {
        SnapshotterError::Snapshot(value)
    }
}

impl From<HostDisconnected> for SnapshotterError {
    fn from(value: HostDisconnected) -> Self {
        SnapshotterError::Host(value)
    }
}

impl From<CommitError> for SnapshotterError {
    fn from(value: CommitError) -> Self {
        SnapshotterError::Evidence(value)
    }
}
