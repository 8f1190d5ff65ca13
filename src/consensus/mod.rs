/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Consensus: membership, primary selection, and global commit.
//!
//! A node's [`StateMachine`] starts in the [startup phase](strategy::Phase::Startup), in which the
//! network is bootstrapped by a single node and every request is committed as soon as it is executed.
//! [Opening the network](StateMachine::open_network) hands over to the steady state, in which the
//! primary of each view orders requests and a majority of the configuration must acknowledge a version
//! before it is globally committed.

pub mod commit;

pub mod replicas;

pub mod state_machine;

pub mod strategy;

pub use commit::{GlobalCommitHandler, ViewHistory};
pub use replicas::{Replica, ReplicaRegistryError, Replicas};
pub use state_machine::StateMachine;
pub use strategy::{ConsensusError, Phase, RequestError, RequestHandler};
