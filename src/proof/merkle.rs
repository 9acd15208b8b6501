//! Group Merkle Tree
//!
//! Binary Merkle tree using SHA-256 over identity commitments.
//! The root is the public group state a membership proof is bound to.

use sha2::{Sha256, Digest};
use crate::core::hash::Hash32;

/// Domain separator for Merkle tree internal nodes.
const MERKLE_NODE_DOMAIN: &[u8] = b"TAZ_GROUP_MERKLE_NODE_V1";

/// Empty hash for padding (hash of empty domain).
fn empty_hash() -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(b"TAZ_GROUP_MERKLE_EMPTY_V1");
    hasher.finalize().into()
}

/// Binary Merkle tree over pre-hashed leaves.
#[derive(Clone, Debug, Default)]
pub struct MerkleTree {
    /// Leaf hashes (level 0)
    leaves: Vec<Hash32>,
    /// All tree levels (leaves at index 0, root at last index)
    levels: Vec<Vec<Hash32>>,
}

impl MerkleTree {
    /// Create an empty Merkle tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tree from leaf hashes.
    pub fn from_leaf_hashes(leaves: &[Hash32]) -> Self {
        let mut tree = Self::new();
        for leaf in leaves {
            tree.add_leaf_hash(*leaf);
        }
        tree.build();
        tree
    }

    /// Add a pre-hashed leaf.
    pub fn add_leaf_hash(&mut self, hash: Hash32) {
        self.leaves.push(hash);
        // Clear computed levels since tree changed
        self.levels.clear();
    }

    /// Position of a leaf, if present.
    pub fn position(&self, leaf: &Hash32) -> Option<usize> {
        self.leaves.iter().position(|l| l == leaf)
    }

    fn build(&mut self) {
        self.levels.clear();
        if self.leaves.is_empty() {
            return;
        }

        let mut current_level = self.leaves.clone();

        // Pad to power of 2 for balanced tree
        let target_size = current_level.len().next_power_of_two();
        current_level.resize(target_size, empty_hash());

        self.levels.push(current_level.clone());

        while current_level.len() > 1 {
            let next_level: Vec<Hash32> = current_level
                .chunks(2)
                .map(|pair| hash_nodes(&pair[0], &pair[1]))
                .collect();

            self.levels.push(next_level.clone());
            current_level = next_level;
        }
    }

    /// Compute and return the root hash.
    ///
    /// Returns empty hash for empty tree.
    pub fn root(&mut self) -> Hash32 {
        if self.leaves.is_empty() {
            return empty_hash();
        }

        if self.levels.is_empty() {
            self.build();
        }

        self.levels.last()
            .and_then(|level| level.first())
            .copied()
            .unwrap_or_else(empty_hash)
    }

    /// Number of leaves in the tree.
    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// Generate an inclusion proof for the leaf at `index`.
    pub fn generate_proof(&mut self, index: usize) -> Option<MerkleProof> {
        if index >= self.leaves.len() {
            return None;
        }

        if self.levels.is_empty() {
            self.build();
        }

        let mut siblings = Vec::new();
        let mut current_index = index;

        for level in &self.levels[..self.levels.len().saturating_sub(1)] {
            let sibling_index = current_index ^ 1;
            if sibling_index < level.len() {
                let is_right = current_index % 2 == 0;
                siblings.push((level[sibling_index], is_right));
            }
            current_index /= 2;
        }

        Some(MerkleProof {
            leaf_index: index,
            siblings,
        })
    }

    /// Verify a proof using a pre-hashed leaf.
    pub fn verify_proof_with_hash(root: &Hash32, proof: &MerkleProof, leaf_hash: &Hash32) -> bool {
        let mut current_hash = *leaf_hash;

        for (sibling, is_right) in &proof.siblings {
            current_hash = if *is_right {
                hash_nodes(&current_hash, sibling)
            } else {
                hash_nodes(sibling, &current_hash)
            };
        }

        current_hash == *root
    }
}

/// Merkle inclusion proof.
#[derive(Clone, Debug)]
pub struct MerkleProof {
    /// Index of the leaf this proof is for.
    pub leaf_index: usize,
    /// Sibling hashes along the path (hash, is_right_sibling).
    pub siblings: Vec<(Hash32, bool)>,
}

/// Hash two child nodes with domain separation.
fn hash_nodes(left: &Hash32, right: &Hash32) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(MERKLE_NODE_DOMAIN);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hash::hash_bytes;

    fn leaves(n: usize) -> Vec<Hash32> {
        (0..n).map(|i| hash_bytes(format!("member_{}", i).as_bytes())).collect()
    }

    #[test]
    fn test_empty_tree() {
        let mut tree = MerkleTree::new();
        assert_eq!(tree.root(), empty_hash());
    }

    #[test]
    fn test_root_changes_with_membership() {
        let mut small = MerkleTree::from_leaf_hashes(&leaves(2));
        let mut large = MerkleTree::from_leaf_hashes(&leaves(3));
        assert_ne!(small.root(), large.root());
    }

    #[test]
    fn test_proof_verification() {
        let leaves = leaves(5);
        let mut tree = MerkleTree::from_leaf_hashes(&leaves);
        let root = tree.root();

        for (i, leaf) in leaves.iter().enumerate() {
            let proof = tree.generate_proof(i).unwrap();
            assert!(MerkleTree::verify_proof_with_hash(&root, &proof, leaf));
        }
    }

    #[test]
    fn test_wrong_leaf_fails() {
        let leaves = leaves(4);
        let mut tree = MerkleTree::from_leaf_hashes(&leaves);
        let root = tree.root();

        let proof = tree.generate_proof(0).unwrap();
        assert!(!MerkleTree::verify_proof_with_hash(&root, &proof, &leaves[1]));
    }

    #[test]
    fn test_proof_out_of_bounds() {
        let mut tree = MerkleTree::from_leaf_hashes(&leaves(2));
        assert!(tree.generate_proof(10).is_none());
    }

    #[test]
    fn test_position() {
        let leaves = leaves(3);
        let tree = MerkleTree::from_leaf_hashes(&leaves);
        assert_eq!(tree.position(&leaves[2]), Some(2));
        assert_eq!(tree.position(&[0u8; 32]), None);
    }
}
