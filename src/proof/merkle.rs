//! Merkle Membership
//!
//! Fixed-depth binary Merkle tree over Keccak-256. Every child-chain block
//! commits to its transactions with a depth-16 tree (up to 65536 leaves), so
//! an inclusion proof is always exactly 16 sibling hashes.

use crate::core::hash::{hash_pair, Hash};

/// Depth of every block tree.
pub const TREE_DEPTH: usize = 16;

/// Length in bytes of a serialized inclusion proof.
pub const PROOF_LEN: usize = TREE_DEPTH * 32;

/// Check that `leaf` sits at `index` in the tree committed to by `root`.
///
/// `proof` is the 16 sibling hashes from the leaf level upwards,
/// concatenated. Any other length fails, as does an index past the last
/// leaf slot (its high bits would never be checked).
pub fn check_membership(leaf: &Hash, index: u64, root: &Hash, proof: &[u8]) -> bool {
    if proof.len() != PROOF_LEN || index >= 1 << TREE_DEPTH {
        return false;
    }

    let mut computed = *leaf;
    let mut index = index;

    for sibling in proof.chunks_exact(32) {
        let sibling = Hash::from_slice(sibling);
        computed = if index % 2 == 0 {
            hash_pair(&computed, &sibling)
        } else {
            hash_pair(&sibling, &computed)
        };
        index /= 2;
    }

    computed == *root
}

/// Depth-16 Merkle tree builder.
///
/// Unused leaf slots hold the zero hash. Only the populated prefix of each
/// level is stored; missing right-hand siblings come from a precomputed
/// table of empty-subtree hashes.
#[derive(Clone, Debug)]
pub struct FixedMerkleTree {
    /// Populated prefix of each level (leaves at index 0, root level last).
    levels: Vec<Vec<Hash>>,
    /// Hash of an empty subtree at each height.
    empty: [Hash; TREE_DEPTH + 1],
}

impl FixedMerkleTree {
    /// Maximum number of leaves.
    pub const CAPACITY: usize = 1 << TREE_DEPTH;

    /// Build a tree from leaf hashes.
    ///
    /// Returns `None` if there are more leaves than the tree can hold.
    pub fn new(leaves: &[Hash]) -> Option<Self> {
        if leaves.len() > Self::CAPACITY {
            return None;
        }

        let mut empty = [Hash::ZERO; TREE_DEPTH + 1];
        for height in 1..=TREE_DEPTH {
            empty[height] = hash_pair(&empty[height - 1], &empty[height - 1]);
        }

        let mut levels = Vec::with_capacity(TREE_DEPTH + 1);
        let mut current = leaves.to_vec();

        for height in 0..TREE_DEPTH {
            let next: Vec<Hash> = current
                .chunks(2)
                .map(|pair| {
                    let right = pair.get(1).unwrap_or(&empty[height]);
                    hash_pair(&pair[0], right)
                })
                .collect();
            levels.push(current);
            current = next;
        }
        levels.push(current);

        Some(Self { levels, empty })
    }

    /// Root hash. An empty tree has the all-empty root.
    pub fn root(&self) -> Hash {
        self.levels[TREE_DEPTH]
            .first()
            .copied()
            .unwrap_or(self.empty[TREE_DEPTH])
    }

    /// Number of populated leaves.
    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    /// Generate the 16-sibling proof for the leaf at `index`.
    ///
    /// Returns None if index is out of bounds.
    pub fn proof(&self, index: usize) -> Option<Vec<u8>> {
        if index >= self.leaf_count() {
            return None;
        }

        let mut proof = Vec::with_capacity(PROOF_LEN);
        let mut current = index;

        for height in 0..TREE_DEPTH {
            let sibling = current ^ 1;
            let hash = self.levels[height]
                .get(sibling)
                .unwrap_or(&self.empty[height]);
            proof.extend_from_slice(hash.as_slice());
            current /= 2;
        }

        Some(proof)
    }
}
