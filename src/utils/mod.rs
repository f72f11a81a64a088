// src/utils/mod.rs
//! Hashing and encoding helpers shared by the codec, the commitment tree
//! and the challenge logic.
//!
//! Every hash in the protocol is Keccak-256 over a tightly packed byte
//! string (the same packing Solidity's `abi.encodePacked` produces).

use ethereum_types::{H256, U256};
use sha3::{Digest, Keccak256};

/// Keccak-256 of a byte slice
pub fn keccak(data: &[u8]) -> H256 {
    H256::from_slice(&Keccak256::digest(data))
}

/// Keccak-256 of several byte slices, hashed as one packed string
///
/// Avoids building the concatenation in memory.
pub fn keccak_packed(parts: &[&[u8]]) -> H256 {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    H256::from_slice(&hasher.finalize())
}

/// Compute a hash of two 32-byte nodes
pub fn hash_pair(left: &H256, right: &H256) -> H256 {
    keccak_packed(&[left.as_bytes(), right.as_bytes()])
}

/// Advance a message or log accumulator by one item: `H(acc ‖ H(item))`
pub fn accumulate(acc: &H256, item_hash: &H256) -> H256 {
    hash_pair(acc, item_hash)
}

/// Big-endian 32-byte encoding of a 256-bit integer
pub fn u256_to_bytes(value: &U256) -> [u8; 32] {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    buf
}

/// Interpret a hash as a 256-bit integer
pub fn h256_to_u256(hash: &H256) -> U256 {
    U256::from_big_endian(hash.as_bytes())
}

/// Reinterpret a 256-bit integer as a hash
pub fn u256_to_h256(value: &U256) -> H256 {
    H256::from(u256_to_bytes(value))
}

/// Abbreviated hex rendering of a hash for log lines
pub fn short_hex(hash: &H256) -> String {
    let encoded = hex::encode(hash.as_bytes());
    format!("0x{}…{}", &encoded[..8], &encoded[56..])
}
