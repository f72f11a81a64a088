// tests/merkle_tree_test.rs
//! Segment commitment tree

use avm_challenge::challenge::{commitment_root, path_for, verify_inclusion};
use avm_challenge::{CommitmentError, InclusionProof, MerkleTree};
use avm_challenge::utils::hash_pair;
use ethereum_types::H256;

fn leaves(n: u8) -> Vec<H256> {
    (1..=n).map(H256::repeat_byte).collect()
}

#[test]
fn test_merkle_tree_creation() {
    // Create a set of leaves
    let leaves = leaves(8);

    // Create a Merkle tree
    let tree = MerkleTree::new(leaves.clone()).unwrap();

    // The root is not a leaf and not zero
    let root = tree.root();
    assert_ne!(root, H256::zero());
    assert!(!leaves.contains(&root));
    assert_eq!(tree.len(), 8);
}

#[test]
fn test_merkle_proof_generation_and_verification() {
    let leaves = leaves(8);
    let tree = MerkleTree::new(leaves.clone()).unwrap();
    let root = tree.root();

    // Generate and verify proofs for each leaf
    for (i, leaf) in leaves.iter().enumerate() {
        let proof = tree.generate_proof(i).unwrap();
        assert!(MerkleTree::verify_proof(&root, leaf, &proof), "Proof verification failed for leaf {}", i);
        assert_eq!(verify_inclusion(&root, i as u64, 8, leaf, &proof), Ok(()));
    }
}

#[test]
fn test_merkle_proof_verification_with_invalid_leaf() {
    let tree = MerkleTree::new(leaves(8)).unwrap();
    let proof = tree.generate_proof(0).unwrap();

    // Verify with a leaf that is not in the tree
    let invalid_leaf = H256::repeat_byte(9);
    assert!(!MerkleTree::verify_proof(&tree.root(), &invalid_leaf, &proof));
    assert_eq!(
        verify_inclusion(&tree.root(), 0, 8, &invalid_leaf, &proof),
        Err(CommitmentError::InvalidInclusion { segment_index: 0 })
    );
}

#[test]
fn test_merkle_tree_with_odd_number_of_leaves() {
    // The seventh leaf has no sibling on the first level
    let leaves = leaves(7);
    let tree = MerkleTree::new(leaves.clone()).unwrap();

    for (i, leaf) in leaves.iter().enumerate() {
        let proof = tree.generate_proof(i).unwrap();
        assert_eq!(
            verify_inclusion(&tree.root(), i as u64, 7, leaf, &proof),
            Ok(()),
            "Proof verification failed for leaf {} in odd-sized tree",
            i
        );
    }

    // The unpaired last leaf is promoted once, then paired twice
    assert_eq!(tree.generate_proof(6).unwrap().siblings.len(), 2);
}

#[test]
fn test_three_leaf_root() {
    let leaves = leaves(3);
    let expected = hash_pair(&hash_pair(&leaves[0], &leaves[1]), &leaves[2]);
    assert_eq!(commitment_root(&leaves), Ok(expected));
}

#[test]
fn test_single_leaf_is_its_own_root() {
    let leaf = H256::repeat_byte(0x42);
    let tree = MerkleTree::new(vec![leaf]).unwrap();

    assert_eq!(tree.root(), leaf);
    assert_eq!(tree.generate_proof(0), Some(InclusionProof::default()));
    assert_eq!(verify_inclusion(&leaf, 0, 1, &leaf, &InclusionProof::default()), Ok(()));
}

#[test]
fn test_empty_commitment_rejected() {
    assert!(matches!(MerkleTree::new(Vec::new()), Err(CommitmentError::EmptyCommitment)));
    assert_eq!(commitment_root(&[]), Err(CommitmentError::EmptyCommitment));
}

#[test]
fn test_proof_cannot_be_replayed_at_another_index() {
    // Identical leaves give identical folds, only the path tells them apart
    let leaf = H256::repeat_byte(5);
    let tree = MerkleTree::new(vec![leaf; 4]).unwrap();
    let proof = tree.generate_proof(0).unwrap();

    assert_eq!(verify_inclusion(&tree.root(), 0, 4, &leaf, &proof), Ok(()));
    assert_eq!(
        verify_inclusion(&tree.root(), 2, 4, &leaf, &proof),
        Err(CommitmentError::InvalidInclusion { segment_index: 2 })
    );
    assert!(verify_inclusion(&tree.root(), 4, 4, &leaf, &proof).is_err());
}

#[test]
fn test_path_for_matches_generated_proofs() {
    for count in 1..=9u8 {
        let tree = MerkleTree::new(leaves(count)).unwrap();
        for index in 0..count as usize {
            let proof = tree.generate_proof(index).unwrap();
            let (path, depth) = path_for(index as u64, count as u64).unwrap();
            assert_eq!(proof.path, path);
            assert_eq!(proof.siblings.len(), depth);
        }
    }
    assert_eq!(path_for(3, 3), None);
}

#[test]
fn test_proof_wire_format() {
    let tree = MerkleTree::new(leaves(5)).unwrap();
    let proof = tree.generate_proof(3).unwrap();

    let bytes = proof.to_bytes();
    assert_eq!(bytes.len(), 8 + 32 * proof.siblings.len());
    assert_eq!(InclusionProof::from_bytes(&bytes), Ok(proof));

    assert!(matches!(
        InclusionProof::from_bytes(&bytes[..bytes.len() - 1]),
        Err(CommitmentError::MalformedProof(_))
    ));
}
