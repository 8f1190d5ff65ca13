/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Append-only Merkle tree over the leaves of the ledger.
//!
//! The tree never stores its leaves. It only keeps the roots of the perfect subtrees ("peaks") that
//! together cover every leaf appended so far, from the largest (leftmost) to the smallest (rightmost).
//! A tree with `size` leaves has exactly one peak for every set bit in `size`.
//!
//! The peaks plus the leaf count form the tree's **mini-tree**. A mini-tree is small (at most 64
//! hashes), and is enough to continue appending to the tree and to compute every subsequent root. This
//! is what allows a replica that boots from a snapshot to rebuild the same root as a replica that
//! appended every leaf since genesis:
//!
//! ```ignore
//! let mut resumed = MerkleTree::deserialise(&original.serialise())?;
//! resumed.append(leaf);
//! original.append(leaf);
//! assert_eq!(resumed.root(), original.root());
//! ```

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    crypto_primitives::{CryptoHasher, Digest},
    data_types::CryptoHash,
};

use super::HistoryError;

#[derive(Clone, Debug, Default, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct MerkleTree {
    size: u64,
    peaks: Vec<CryptoHash>,
}

impl MerkleTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `leaf` to the right edge of the tree.
    pub fn append(&mut self, leaf: CryptoHash) {
        let mut node = leaf;
        let mut size = self.size;

        // Every trailing set bit of `size` is a peak with the same height as `node`, merge them.
        while size & 1 == 1 {
            let left = self
                .peaks
                .pop()
                .expect("Every set bit in the tree size has a corresponding peak.");
            node = hash_children(&left, &node);
            size >>= 1;
        }

        self.peaks.push(node);
        self.size += 1;
    }

    /// Get the current root of the tree.
    ///
    /// The root of the empty tree is [`CryptoHash::zero`]. Otherwise, the peaks are "bagged" from right
    /// to left: `H(p1, H(p2, ... H(pn-1, pn)))`.
    pub fn root(&self) -> CryptoHash {
        let mut peaks = self.peaks.iter().rev();
        match peaks.next() {
            None => CryptoHash::zero(),
            Some(last) => peaks.fold(*last, |acc, peak| hash_children(peak, &acc)),
        }
    }

    /// Get how many leaves have been appended to the tree.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Serialize the mini-tree of this tree.
    pub fn serialise(&self) -> Vec<u8> {
        self.try_to_vec().unwrap()
    }

    /// Rebuild a tree from a mini-tree produced by [`serialise`](Self::serialise).
    pub fn deserialise(bytes: &[u8]) -> Result<Self, HistoryError> {
        let tree = MerkleTree::try_from_slice(bytes).map_err(HistoryError::DeserializeTree)?;
        if tree.peaks.len() != tree.size.count_ones() as usize {
            return Err(HistoryError::MalformedTree {
                size: tree.size,
                peaks: tree.peaks.len(),
            });
        }
        Ok(tree)
    }
}

fn hash_children(left: &CryptoHash, right: &CryptoHash) -> CryptoHash {
    let mut hasher = CryptoHasher::new();
    hasher.update(left.bytes());
    hasher.update(right.bytes());
    CryptoHash::new(hasher.finalize().into())
}
