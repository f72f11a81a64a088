// src/value/mod.rs
//! Value and machine codec
//!
//! Canonical hashing, wire encoding and machine-state hashing, byte for byte
//! compatible with the on-chain rules.

mod codec;
mod machine;
#[allow(clippy::module_inception)]
mod value;

pub use codec::{
    deserialize_value, marshal_shallow, serialize_value, shallow, write_value, ByteReader,
    MAX_DECODE_DEPTH,
};
pub use machine::{
    empty_stack_hash, error_code_point, error_stop_hash, halted_hash, hash_machine,
    push_stack_hash, stack_hash, MachineState, MachineStatus,
};
pub use value::{
    CodePoint, Operation, Tuple, Value, MAX_TUPLE_SIZE, TYPE_CODE_CODE_POINT, TYPE_CODE_HASH_ONLY,
    TYPE_CODE_INT, TYPE_CODE_TUPLE,
};

use ethereum_types::H256;

/// Canonical hash of a value
pub fn hash_value(value: &Value) -> H256 {
    value.hash()
}
