/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that store information about the members of the cluster.

use std::collections::{btree_map, BTreeMap};
use std::fmt::{self, Display, Formatter};

use crate::types::crypto_primitives::{certificate_verifying_key, VerifyingKey};
use crate::types::data_types::{Certificate, NodeId};

/// A member of the cluster: its identifier and the certificate it joined with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Replica {
    id: NodeId,
    certificate: Certificate,
}

impl Replica {
    /// Create a new `Replica`.
    pub fn new(id: NodeId, certificate: Certificate) -> Self {
        Self { id, certificate }
    }

    /// Get the `NodeId` of this replica.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get the certificate of this replica.
    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }
}

/// The configuration of the cluster: every member, keyed by `NodeId`.
///
/// ## Ordering of replicas
///
/// `Replicas` iterates through its members in ascending order of `NodeId`. [`nth`](Self::nth) uses
/// this order, which makes primary selection deterministic across all members that share the same
/// configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Replicas(BTreeMap<NodeId, Replica>);

impl Replicas {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Add the node `id` with `certificate` to the configuration.
    ///
    /// Adding a node that is already a member with the same certificate does nothing. Adding it with
    /// a different certificate is refused: use [`rotate_certificate`](Self::rotate_certificate) instead.
    pub fn add(&mut self, id: NodeId, certificate: Certificate) -> Result<(), ReplicaRegistryError> {
        match self.0.entry(id) {
            btree_map::Entry::Vacant(entry) => {
                entry.insert(Replica::new(id, certificate));
                Ok(())
            }
            btree_map::Entry::Occupied(entry) if entry.get().certificate == certificate => Ok(()),
            btree_map::Entry::Occupied(_) => Err(ReplicaRegistryError::DuplicateNode { node: id }),
        }
    }

    /// Replace the certificate of the existing member `id`.
    pub fn rotate_certificate(
        &mut self,
        id: NodeId,
        certificate: Certificate,
    ) -> Result<(), ReplicaRegistryError> {
        let replica = self
            .0
            .get_mut(&id)
            .ok_or(ReplicaRegistryError::UnknownNode { node: id })?;
        *replica = Replica::new(id, certificate);
        Ok(())
    }

    /// Remove `id` from the configuration, returning the removed replica.
    pub fn remove(&mut self, id: &NodeId) -> Result<Replica, ReplicaRegistryError> {
        self.0
            .remove(id)
            .ok_or(ReplicaRegistryError::UnknownNode { node: *id })
    }

    pub fn get(&self, id: &NodeId) -> Option<&Replica> {
        self.0.get(id)
    }

    /// Get the key that verifies the signatures of the member `id`.
    pub fn certificate_key(&self, id: &NodeId) -> Result<VerifyingKey, ReplicaRegistryError> {
        let replica = self
            .get(id)
            .ok_or(ReplicaRegistryError::UnknownNode { node: *id })?;
        certificate_verifying_key(replica.certificate())
            .map_err(|_| ReplicaRegistryError::InvalidCertificate { node: *id })
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.0.contains_key(id)
    }

    /// Get the replica at position `idx` in [ascending order](Self#ordering-of-replicas).
    pub fn nth(&self, idx: usize) -> Option<&Replica> {
        self.0.values().nth(idx)
    }

    /// Get an iterator through the members' `NodeId`s in ascending order.
    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get the smallest number of members that forms a strict majority of the configuration.
    pub fn quorum(&self) -> usize {
        self.len() / 2 + 1
    }
}

/// Errors when changing the membership of the configuration.
#[derive(Debug, PartialEq, Eq)]
pub enum ReplicaRegistryError {
    /// The node is already a member, with a different certificate.
    DuplicateNode { node: NodeId },

    /// The node is not a member.
    UnknownNode { node: NodeId },

    /// A node cannot remove itself from its own configuration.
    RemoveSelf { node: NodeId },

    /// The node's certificate is not a valid Ed25519 verifying key.
    InvalidCertificate { node: NodeId },
}

impl Display for ReplicaRegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ReplicaRegistryError::DuplicateNode { node } => {
                write!(f, "node {} is already registered with another certificate", node)
            }
            ReplicaRegistryError::UnknownNode { node } => write!(f, "node {} is not registered", node),
            ReplicaRegistryError::RemoveSelf { node } => {
                write!(f, "node {} cannot remove itself", node)
            }
            ReplicaRegistryError::InvalidCertificate { node } => {
                write!(f, "certificate of node {} is not a valid key", node)
            }
        }
    }
}
