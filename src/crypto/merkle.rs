//! Merkle commitment over a block's serialized transactions.
//!
//! Leaves are SHA-256 of each serialized transaction in block order. When a
//! level has an odd node count the last node is paired with itself, matching
//! the chain's existing on-disk blocks. That duplication scheme admits a
//! known second-preimage ambiguity between a level ending in `[.., x]` and
//! one ending in `[.., x, x]`; it is kept for wire compatibility.

use sha2::{Digest, Sha256};

use crate::crypto::Hash;

#[derive(Debug, Clone)]
pub struct MerkleTree {
    root: Hash,
}

impl MerkleTree {
    /// Builds the tree bottom-up, keeping only each level's hashes. An empty
    /// input commits to the zero hash (a block always carries at least a
    /// coinbase, so this does not occur on the live chain).
    pub fn new(data: &[Vec<u8>]) -> Self {
        if data.is_empty() {
            return MerkleTree { root: Hash::zero() };
        }

        let mut level: Vec<Hash> = data.iter().map(|d| crate::crypto::sha256(d)).collect();

        while level.len() > 1 {
            let mut next_level = Vec::with_capacity(level.len().div_ceil(2));
            for chunk in level.chunks(2) {
                let right = if chunk.len() == 2 { &chunk[1] } else { &chunk[0] };
                next_level.push(hash_pair(&chunk[0], right));
            }
            level = next_level;
        }

        MerkleTree { root: level[0] }
    }

    pub fn root(&self) -> Hash {
        self.root
    }
}

fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Hash(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sha256;

    #[test]
    fn test_single_leaf_root_is_leaf_hash() {
        let tree = MerkleTree::new(&[b"tx1".to_vec()]);
        assert_eq!(tree.root(), sha256(b"tx1"));
    }

    #[test]
    fn test_two_leaves() {
        let tree = MerkleTree::new(&[b"tx1".to_vec(), b"tx2".to_vec()]);
        let expected = hash_pair(&sha256(b"tx1"), &sha256(b"tx2"));
        assert_eq!(tree.root(), expected);
    }

    #[test]
    fn test_odd_leaf_count_duplicates_last() {
        let tree = MerkleTree::new(&[b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);

        let ab = hash_pair(&sha256(b"a"), &sha256(b"b"));
        let cc = hash_pair(&sha256(b"c"), &sha256(b"c"));
        assert_eq!(tree.root(), hash_pair(&ab, &cc));
    }

    #[test]
    fn test_order_matters() {
        let t1 = MerkleTree::new(&[b"a".to_vec(), b"b".to_vec()]);
        let t2 = MerkleTree::new(&[b"b".to_vec(), b"a".to_vec()]);
        assert_ne!(t1.root(), t2.root());
    }

    #[test]
    fn test_empty_input_commits_to_zero() {
        let tree = MerkleTree::new(&[]);
        assert!(tree.root().is_zero());
    }
}
