// src/challenge/merkle_tree.rs
//! Segment commitment tree
//!
//! A level-by-level Keccak reduction over segment summary hashes. Adjacent
//! nodes are hashed in pairs; an unpaired tail node is promoted to the next
//! level untouched. A single leaf is its own root.

use ethereum_types::H256;

use crate::error_handling::CommitmentError;
use crate::utils::hash_pair;

/// Inclusion proof of one leaf
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InclusionProof {
    /// Bit `j` is set when sibling `j` lies to the left
    pub path: u64,

    /// Sibling hashes from the leaf towards the root
    pub siblings: Vec<H256>,
}

impl InclusionProof {
    /// Wire form: `path` as u64 big endian followed by the siblings
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(8 + 32 * self.siblings.len());
        bytes.extend_from_slice(&self.path.to_be_bytes());
        for sibling in &self.siblings {
            bytes.extend_from_slice(sibling.as_bytes());
        }
        bytes
    }

    /// Decode the wire form
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CommitmentError> {
        if bytes.len() < 8 || (bytes.len() - 8) % 32 != 0 {
            return Err(CommitmentError::MalformedProof(format!(
                "{} bytes is not a path followed by whole siblings",
                bytes.len()
            )));
        }

        let mut path = [0u8; 8];
        path.copy_from_slice(&bytes[..8]);
        let siblings: Vec<H256> = bytes[8..].chunks(32).map(H256::from_slice).collect();
        if siblings.len() > 64 {
            return Err(CommitmentError::MalformedProof(format!(
                "{} siblings exceed the maximum depth",
                siblings.len()
            )));
        }

        Ok(Self {
            path: u64::from_be_bytes(path),
            siblings,
        })
    }
}

/// Path word and proof length expected for leaf `index` of `count`
pub fn path_for(index: u64, count: u64) -> Option<(u64, usize)> {
    if index >= count {
        return None;
    }

    let mut path = 0u64;
    let mut depth = 0usize;
    let mut index = index;
    let mut width = count;
    while width > 1 {
        if index % 2 == 1 {
            path |= 1 << depth;
            depth += 1;
        } else if index + 1 < width {
            depth += 1;
        }
        // Otherwise promoted without a sibling
        index /= 2;
        width = width / 2 + width % 2;
    }

    Some((path, depth))
}

/// Commitment tree over segment summary hashes
#[derive(Debug, Clone)]
pub struct MerkleTree {
    /// Every level, leaves first and the root level last
    levels: Vec<Vec<H256>>,
}

impl MerkleTree {
    /// Build the tree; zero leaves is an invalid commitment
    pub fn new(leaves: Vec<H256>) -> Result<Self, CommitmentError> {
        if leaves.is_empty() {
            return Err(CommitmentError::EmptyCommitment);
        }

        let mut levels = vec![leaves];
        while levels[levels.len() - 1].len() > 1 {
            let current = &levels[levels.len() - 1];
            let next: Vec<H256> = current
                .chunks(2)
                .map(|pair| {
                    if pair.len() == 2 {
                        hash_pair(&pair[0], &pair[1])
                    } else {
                        pair[0]
                    }
                })
                .collect();
            levels.push(next);
        }

        Ok(Self { levels })
    }

    /// Root of the tree
    pub fn root(&self) -> H256 {
        self.levels[self.levels.len() - 1][0]
    }

    /// Number of leaves
    pub fn len(&self) -> usize {
        self.levels[0].len()
    }

    /// Always false; empty trees cannot be built
    pub fn is_empty(&self) -> bool {
        self.levels[0].is_empty()
    }

    /// Leaf at `index`
    pub fn leaf(&self, index: usize) -> Option<H256> {
        self.levels[0].get(index).copied()
    }

    /// All leaves
    pub fn leaves(&self) -> &[H256] {
        &self.levels[0]
    }

    /// Generate the inclusion proof of a leaf
    pub fn generate_proof(&self, index: usize) -> Option<InclusionProof> {
        if index >= self.len() {
            return None;
        }

        let mut proof = InclusionProof::default();
        let mut position = index;
        let mut bit = 0;
        for level in &self.levels[..self.levels.len() - 1] {
            if position % 2 == 1 {
                proof.siblings.push(level[position - 1]);
                proof.path |= 1 << bit;
                bit += 1;
            } else if position + 1 < level.len() {
                proof.siblings.push(level[position + 1]);
                bit += 1;
            }
            position /= 2;
        }

        Some(proof)
    }

    /// Fold a leaf up its proof and compare with `root`
    pub fn verify_proof(root: &H256, leaf: &H256, proof: &InclusionProof) -> bool {
        if proof.siblings.len() > 64 {
            return false;
        }

        let mut current = *leaf;
        for (j, sibling) in proof.siblings.iter().enumerate() {
            current = if proof.path >> j & 1 == 1 {
                hash_pair(sibling, &current)
            } else {
                hash_pair(&current, sibling)
            };
        }

        current == *root
    }
}

/// Root over segment summary hashes
pub fn commitment_root(leaves: &[H256]) -> Result<H256, CommitmentError> {
    Ok(MerkleTree::new(leaves.to_vec())?.root())
}

/// Check that `leaf` is segment `index` of the `count` segments under `root`
///
/// The proof's path must be the one leaf `index` would have, so a valid
/// proof for one segment cannot be replayed at another index.
pub fn verify_inclusion(
    root: &H256,
    index: u64,
    count: u64,
    leaf: &H256,
    proof: &InclusionProof,
) -> Result<(), CommitmentError> {
    let invalid = CommitmentError::InvalidInclusion { segment_index: index };
    let (path, depth) = path_for(index, count).ok_or_else(|| invalid.clone())?;

    if proof.path != path || proof.siblings.len() != depth {
        return Err(invalid);
    }
    if !MerkleTree::verify_proof(root, leaf, proof) {
        return Err(invalid);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: u8) -> Vec<H256> {
        (1..=n).map(H256::repeat_byte).collect()
    }

    #[test]
    fn test_every_leaf_proves_inclusion() {
        for n in 1..=9u8 {
            let tree = MerkleTree::new(leaves(n)).unwrap();
            let root = tree.root();

            for (i, leaf) in tree.leaves().iter().enumerate() {
                let proof = tree.generate_proof(i).unwrap();
                assert_eq!(path_for(i as u64, n as u64), Some((proof.path, proof.siblings.len())));
                assert!(verify_inclusion(&root, i as u64, n as u64, leaf, &proof).is_ok(), "leaf {} of {}", i, n);
            }
        }
    }

    #[test]
    fn test_path_for_largest_counts() {
        // 64 levels: the deepest sibling sets bit 63
        assert_eq!(path_for(u64::MAX - 2, u64::MAX), Some((u64::MAX ^ 0b10, 64)));
        assert_eq!(path_for(u64::MAX - 1, u64::MAX), Some((u64::MAX >> 1, 63)));
        assert_eq!(path_for(1 << 63, (1 << 63) + 1), Some((1, 1)));
        assert_eq!(path_for(u64::MAX, u64::MAX), None);
    }

    #[test]
    fn test_different_leaf_fails() {
        let tree = MerkleTree::new(leaves(4)).unwrap();
        let proof = tree.generate_proof(2).unwrap();

        let result = verify_inclusion(&tree.root(), 2, 4, &H256::repeat_byte(0xee), &proof);
        assert_eq!(result, Err(CommitmentError::InvalidInclusion { segment_index: 2 }));
    }

    #[test]
    fn test_proof_bound_to_index() {
        // A valid proof only opens the index whose path it carries
        let tree = MerkleTree::new(leaves(3)).unwrap();
        let proof = tree.generate_proof(1).unwrap();
        let leaf = tree.leaf(1).unwrap();

        assert!(verify_inclusion(&tree.root(), 1, 3, &leaf, &proof).is_ok());
        assert!(verify_inclusion(&tree.root(), 0, 3, &leaf, &proof).is_err());
        assert!(verify_inclusion(&tree.root(), 3, 3, &leaf, &proof).is_err());
    }

    #[test]
    fn test_odd_tail_is_promoted() {
        let l = leaves(3);
        let tree = MerkleTree::new(l.clone()).unwrap();

        let expected = hash_pair(&hash_pair(&l[0], &l[1]), &l[2]);
        assert_eq!(tree.root(), expected);
    }

    #[test]
    fn test_single_leaf_is_root() {
        let leaf = H256::repeat_byte(1);
        let tree = MerkleTree::new(vec![leaf]).unwrap();

        assert_eq!(tree.root(), leaf);
        let proof = tree.generate_proof(0).unwrap();
        assert!(proof.siblings.is_empty());
        assert!(verify_inclusion(&leaf, 0, 1, &leaf, &proof).is_ok());
    }

    #[test]
    fn test_empty_commitment_rejected() {
        assert!(matches!(MerkleTree::new(Vec::new()), Err(CommitmentError::EmptyCommitment)));
        assert_eq!(commitment_root(&[]), Err(CommitmentError::EmptyCommitment));
    }

    #[test]
    fn test_wire_form() {
        let tree = MerkleTree::new(leaves(5)).unwrap();
        let proof = tree.generate_proof(3).unwrap();
        let bytes = proof.to_bytes();

        assert_eq!(bytes.len(), 8 + 32 * proof.siblings.len());
        assert_eq!(InclusionProof::from_bytes(&bytes).unwrap(), proof);
        assert!(matches!(
            InclusionProof::from_bytes(&bytes[..bytes.len() - 1]),
            Err(CommitmentError::MalformedProof(_))
        ));
    }
}
