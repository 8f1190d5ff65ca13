/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable strategies that decide when requests become globally committed.
//!
//! The [state machine](super::state_machine::StateMachine) holds exactly one [`ConsensusStrategy`] at a
//! time:
//! - [`StartupStrategy`] while the network is being bootstrapped. Every request is executed and globally
//!   committed immediately: nothing executed before the network opens is ever rolled back.
//! - [`SteadyStateStrategy`] once the network is open. Only the primary of the current view accepts
//!   requests. A version is globally committed once a strict majority of the *current* configuration
//!   has acknowledged it, and only after every lower version has been committed. Acknowledgements from
//!   nodes that have since left the configuration do not count.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display, Formatter};

use crate::types::{
    data_types::{NodeId, Version, ViewNumber},
    requests::Request,
};

/// Executes requests against the replicated store.
pub trait RequestHandler: Send {
    /// Apply `request`, returning the version it was applied at.
    fn receive_request(&mut self, request: Request) -> Result<Version, RequestError>;
}

/// The reason why a [`RequestHandler`] could not apply a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestError(pub String);

impl Display for RequestError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The two phases of a state machine. The only transition is from `Startup` to `Open`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Startup,
    Open,
}

/// What a strategy needs to know about the state machine to handle one message.
#[derive(Clone, Debug)]
pub struct Round {
    pub me: NodeId,
    pub view: ViewNumber,
    pub primary: NodeId,
    /// Members of the current configuration.
    pub members: BTreeSet<NodeId>,
}

impl Round {
    /// Get the number of acknowledgements from current members that commit a version.
    pub fn quorum(&self) -> usize {
        self.members.len() / 2 + 1
    }
}

pub trait ConsensusStrategy: Send {
    fn phase(&self) -> Phase;

    /// Handle an inbound request, returning the versions that became globally committed as a result,
    /// in ascending order.
    fn receive_request(
        &mut self,
        request: Request,
        handler: &mut dyn RequestHandler,
        round: &Round,
    ) -> Result<Vec<Version>, ConsensusError>;

    /// Handle an acknowledgement from the member `from` that it replicated `version`, returning the
    /// versions that became globally committed as a result, in ascending order.
    fn receive_ack(
        &mut self,
        from: NodeId,
        version: Version,
        round: &Round,
    ) -> Result<Vec<Version>, ConsensusError>;

    /// Re-evaluate pending versions after the configuration changed to `round.members`, returning the
    /// versions that became globally committed as a result, in ascending order.
    fn reconfigure(&mut self, round: &Round) -> Vec<Version>;
}

pub struct StartupStrategy;

impl ConsensusStrategy for StartupStrategy {
    fn phase(&self) -> Phase {
        Phase::Startup
    }

    fn receive_request(
        &mut self,
        request: Request,
        handler: &mut dyn RequestHandler,
        _: &Round,
    ) -> Result<Vec<Version>, ConsensusError> {
        let version = handler.receive_request(request)?;
        Ok(vec![version])
    }

    fn receive_ack(&mut self, _: NodeId, _: Version, _: &Round) -> Result<Vec<Version>, ConsensusError> {
        Err(ConsensusError::NetworkNotOpen)
    }

    fn reconfigure(&mut self, _: &Round) -> Vec<Version> {
        Vec::new()
    }
}

pub struct SteadyStateStrategy {
    last_committed: Version,
    // Versions executed by this primary that are not yet globally committed, and who acknowledged them.
    pending: BTreeMap<Version, BTreeSet<NodeId>>,
}

impl SteadyStateStrategy {
    /// Create a strategy that continues after `last_committed`, the last version committed during
    /// startup.
    pub fn new(last_committed: Version) -> Self {
        Self {
            last_committed,
            pending: BTreeMap::new(),
        }
    }

    /// Get the versions that are still waiting for acknowledgements.
    pub fn pending_versions(&self) -> impl Iterator<Item = &Version> {
        self.pending.keys()
    }

    fn commit_acknowledged(&mut self, round: &Round) -> Vec<Version> {
        let quorum = round.quorum();
        let mut committed = Vec::new();
        while let Some(entry) = self.pending.first_entry() {
            let acks = entry.get().intersection(&round.members).count();
            if acks < quorum {
                break;
            }
            let (version, _) = entry.remove_entry();
            self.last_committed = version;
            committed.push(version);
        }
        committed
    }
}

impl ConsensusStrategy for SteadyStateStrategy {
    fn phase(&self) -> Phase {
        Phase::Open
    }

    fn receive_request(
        &mut self,
        request: Request,
        handler: &mut dyn RequestHandler,
        round: &Round,
    ) -> Result<Vec<Version>, ConsensusError> {
        if round.me != round.primary {
            return Err(ConsensusError::NotPrimary {
                primary: round.primary,
            });
        }

        let version = handler.receive_request(request)?;
        self.pending.entry(version).or_default().insert(round.me);
        Ok(self.commit_acknowledged(round))
    }

    fn receive_ack(
        &mut self,
        from: NodeId,
        version: Version,
        round: &Round,
    ) -> Result<Vec<Version>, ConsensusError> {
        if version <= self.last_committed {
            return Ok(Vec::new());
        }
        self.pending
            .get_mut(&version)
            .ok_or(ConsensusError::UnknownVersion { version })?
            .insert(from);
        Ok(self.commit_acknowledged(round))
    }

    fn reconfigure(&mut self, round: &Round) -> Vec<Version> {
        self.commit_acknowledged(round)
    }
}

/// Recoverable errors returned by the consensus state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    /// The network is open and this node is not the primary of the current view.
    NotPrimary { primary: NodeId },

    /// Acknowledgements are only exchanged once the network is open.
    NetworkNotOpen,

    /// An acknowledgement refers to a version that this node never executed.
    UnknownVersion { version: Version },

    /// An acknowledgement comes from a node that is not in the configuration.
    UnknownNode { node: NodeId },

    /// The request handler could not apply the request.
    Rejected(RequestError),
}

impl Display for ConsensusError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConsensusError::NotPrimary { primary } => write!(f, "the primary is node {}", primary),
            ConsensusError::NetworkNotOpen => write!(f, "the network is not open"),
            ConsensusError::UnknownVersion { version } => {
                write!(f, "version {} is not pending", version)
            }
            ConsensusError::UnknownNode { node } => write!(f, "node {} is not registered", node),
            ConsensusError::Rejected(err) => write!(f, "request rejected: {}", err),
        }
    }
}

impl From<RequestError> for ConsensusError {
    fn from(value: RequestError) -> Self {
        ConsensusError::Rejected(value)
    }
}
