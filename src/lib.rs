/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The consensus and snapshotting core of a permissioned, replicated ledger node.
//!
//! A [node](node::Node) executes requests against a replicated key-value [store](store::Store) whose
//! committed entries form a Merkle [transaction history](history). Its
//! [consensus state machine](consensus::StateMachine) decides when versions are globally committed, and
//! its [snapshotter](snapshotter::Snapshotter) periodically emits snapshots of the store to the host,
//! after committing evidence of each snapshot to the ledger.

pub mod app;

pub mod config;

pub mod consensus;

pub mod events;

pub(crate) mod event_bus;

pub mod history;

pub mod host;

pub mod logging;

pub mod node;

pub mod snapshotter;

pub mod store;

pub mod threading;

pub mod types;
