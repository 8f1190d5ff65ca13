/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The verifiable transaction history of the ledger.
//!
//! Every committed ledger entry is hashed into a leaf and appended to a [`MerkleTree`]. The root of the
//! tree is a pure function of every entry committed so far, in order, and is the ledger's integrity
//! anchor.
//!
//! ## Signatures
//!
//! Periodically, a replica commits a [`SignatureRecord`] into the store. The record contains:
//! 1. The root of the tree *before* the signature entry itself was appended,
//! 2. The mini-tree that produced that root, and
//! 3. The replica's Ed25519 signature over the root.
//!
//! A replica that recovers from a snapshot taken at the version of a signature entry can therefore
//! [seed](MerkleTxHistory::seed_from_signature) its history from the record's mini-tree and the leaf of
//! the signature entry (which is carried by the snapshot), and end up with exactly the root of a
//! replica that appended every leaf since genesis.

pub mod merkle;

use std::collections::HashMap;

use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::{Signature, SigningKey, Verifier, VerifyingKey};

use crate::types::{
    crypto_primitives::{hash_bytes, Keypair},
    data_types::{CryptoHash, NodeId, SignatureBytes, Version, ViewNumber},
};

pub use merkle::MerkleTree;

/// A signed statement, by `signer`, that the root of the history just before `version` was `root`.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct SignatureRecord {
    pub signer: NodeId,
    /// Version of the ledger entry that carries this record.
    pub version: Version,
    pub view: ViewNumber,
    pub root: CryptoHash,
    pub signature: SignatureBytes,
    /// Serialized mini-tree whose root is `root`.
    pub tree: Vec<u8>,
}

impl SignatureRecord {
    /// Get the bytes that `signer` signs over.
    pub fn message_bytes(&self) -> Vec<u8> {
        signed_message(self.signer, self.version, self.view, &self.root)
    }
}

fn signed_message(signer: NodeId, version: Version, view: ViewNumber, root: &CryptoHash) -> Vec<u8> {
    (signer, version, view, *root).try_to_vec().unwrap()
}

/// Errors that may be encountered when rebuilding or verifying the history.
#[derive(Debug)]
pub enum HistoryError {
    /// The bytes of a mini-tree could not be deserialized.
    DeserializeTree(std::io::Error),

    /// A mini-tree does not have one peak per set bit of its size.
    MalformedTree { size: u64, peaks: usize },

    /// A signature record's mini-tree does not cover every entry before the record's version.
    TreeSizeMismatch { version: Version, size: u64 },

    /// A root computed locally does not match the root a signature record claims.
    RootMismatch {
        expected: CryptoHash,
        actual: CryptoHash,
    },

    /// The signer of a signature record is not a trusted node.
    UntrustedSigner { signer: NodeId },

    /// The signature of a signature record does not verify against its signer's key.
    InvalidSignature { signer: NodeId },
}

impl std::fmt::Display for HistoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HistoryError::DeserializeTree(err) => write!(f, "cannot deserialize mini-tree: {}", err),
            HistoryError::MalformedTree { size, peaks } => {
                write!(f, "mini-tree of size {} has {} peaks", size, peaks)
            }
            HistoryError::TreeSizeMismatch { version, size } => write!(
                f,
                "mini-tree of size {} cannot precede an entry at version {}",
                size, version
            ),
            HistoryError::RootMismatch { expected, actual } => {
                write!(f, "expected root {}, got {}", expected, actual)
            }
            HistoryError::UntrustedSigner { signer } => write!(f, "node {} is not trusted", signer),
            HistoryError::InvalidSignature { signer } => {
                write!(f, "invalid signature from node {}", signer)
            }
        }
    }
}

/// The Merkle transaction history attached to a [`Store`](crate::store::Store).
pub struct MerkleTxHistory {
    id: NodeId,
    keypair: Keypair,
    tree: MerkleTree,
    // Leaf of the entry at version `first_version + i` is `leaves[i]`.
    first_version: Version,
    leaves: Vec<CryptoHash>,
    trusted: HashMap<NodeId, VerifyingKey>,
}

impl MerkleTxHistory {
    /// Create an empty history for the node `id`, which signs with `signing_key`.
    ///
    /// The node trusts its own signatures.
    pub fn new(id: NodeId, signing_key: SigningKey) -> Self {
        let keypair = Keypair::new(signing_key);
        let mut trusted = HashMap::new();
        trusted.insert(id, keypair.public());
        Self {
            id,
            keypair,
            tree: MerkleTree::new(),
            first_version: Version::new(1),
            leaves: Vec::new(),
            trusted,
        }
    }

    /// Trust signature records signed by `node` with `key`.
    pub fn trust(&mut self, node: NodeId, key: VerifyingKey) {
        self.trusted.insert(node, key);
    }

    /// Get the id of the node that owns this history.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get the current root of the history.
    pub fn root(&self) -> CryptoHash {
        self.tree.root()
    }

    /// Get the version that the next appended entry must have.
    pub fn next_version(&self) -> Version {
        self.first_version + self.leaves.len() as u64
    }

    /// Hash the serialized ledger `entry` committed at `version` and append it to the tree.
    ///
    /// # Panics
    ///
    /// Panics if `version` is not [`next_version`](Self::next_version). Entries are appended in commit
    /// order by the store, so a gap means the store and its history have diverged.
    pub fn append_entry(&mut self, version: Version, entry: &[u8]) -> CryptoHash {
        assert_eq!(
            version,
            self.next_version(),
            "History expected an entry at version {}, got version {}",
            self.next_version(),
            version
        );
        let leaf = hash_bytes(entry);
        self.tree.append(leaf);
        self.leaves.push(leaf);
        leaf
    }

    /// Get the leaf of the entry committed at `version`, if this history has it.
    pub fn leaf(&self, version: Version) -> Option<CryptoHash> {
        if version < self.first_version {
            return None;
        }
        self.leaves.get((version - self.first_version) as usize).copied()
    }

    /// Drop the leaves of the entries before `version`. The tree itself is unaffected.
    pub fn compact(&mut self, version: Version) {
        if version <= self.first_version {
            return;
        }
        let dropped = ((version - self.first_version) as usize).min(self.leaves.len());
        self.leaves.drain(..dropped);
        self.first_version = self.first_version + dropped as u64;
    }

    /// Build a signed record of the current root, to be committed at the next version in `view`.
    pub fn signature_record(&self, view: ViewNumber) -> SignatureRecord {
        let version = self.next_version();
        let root = self.tree.root();
        SignatureRecord {
            signer: self.id,
            version,
            view,
            root,
            signature: self
                .keypair
                .sign(&signed_message(self.id, version, view, &root)),
            tree: self.tree.serialise(),
        }
    }

    /// Check that `record`, about to be appended as the next entry, signs the current root.
    pub fn verify_signature_record(&self, record: &SignatureRecord) -> Result<(), HistoryError> {
        if record.root != self.tree.root() {
            return Err(HistoryError::RootMismatch {
                expected: record.root,
                actual: self.tree.root(),
            });
        }
        self.verify_signature(record)
    }

    /// Replace this history with the one described by `record`, followed by `leaf`, the leaf of the
    /// entry that carries `record`.
    ///
    /// On error, the history is left untouched.
    pub fn seed_from_signature(
        &mut self,
        record: &SignatureRecord,
        leaf: CryptoHash,
    ) -> Result<(), HistoryError> {
        let mut tree = MerkleTree::deserialise(&record.tree)?;
        if tree.size() + 1 != record.version.int() {
            return Err(HistoryError::TreeSizeMismatch {
                version: record.version,
                size: tree.size(),
            });
        }
        if tree.root() != record.root {
            return Err(HistoryError::RootMismatch {
                expected: record.root,
                actual: tree.root(),
            });
        }
        self.verify_signature(record)?;

        tree.append(leaf);
        self.tree = tree;
        self.first_version = record.version;
        self.leaves = vec![leaf];
        Ok(())
    }

    fn verify_signature(&self, record: &SignatureRecord) -> Result<(), HistoryError> {
        let key = self
            .trusted
            .get(&record.signer)
            .ok_or(HistoryError::UntrustedSigner {
                signer: record.signer,
            })?;
        let signature = Signature::from_bytes(&record.signature.bytes());
        key.verify(&record.message_bytes(), &signature)
            .map_err(|_| HistoryError::InvalidSignature {
                signer: record.signer,
            })
    }
}
