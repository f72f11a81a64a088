// src/value/machine.rs
//! Machine state hashing
//!
//! A one-step proof only ever sees a machine through eight fields: three
//! stack hashes, the register and static values, the error handler hash, the
//! remaining arb gas and the error code point hash. Stacks are cons lists of
//! 2-tuples `[value, rest]` terminated by the empty tuple.

use ethereum_types::{H256, U256};
use serde::Serialize;

use super::codec::{marshal_shallow, ByteReader};
use super::value::{CodePoint, Operation, Tuple, Value, TYPE_CODE_TUPLE};
use crate::error_handling::CodecError;
use crate::one_step_proof::opcodes;
use crate::utils::{keccak_packed, u256_to_bytes};

/// Run status of a machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MachineStatus {
    /// Machine can execute further instructions
    Extensive,

    /// Machine executed `halt`
    Halted,

    /// Machine faulted with no error handler installed
    ErrorStop,
}

/// Hash of every halted machine
pub fn halted_hash() -> H256 {
    H256::zero()
}

/// Hash of every error-stopped machine
pub fn error_stop_hash() -> H256 {
    let mut bytes = [0u8; 32];
    bytes[31] = 1;
    H256::from(bytes)
}

/// Hash of the empty stack
pub fn empty_stack_hash() -> H256 {
    Tuple::empty().hash()
}

/// Stack hash after pushing a value with hash `value_hash` onto `rest`
pub fn push_stack_hash(value_hash: &H256, rest: &H256) -> H256 {
    let header = [TYPE_CODE_TUPLE + 2, 2];
    keccak_packed(&[&header[..], value_hash.as_bytes(), rest.as_bytes()])
}

/// Hash of a stack given its values bottom first
pub fn stack_hash<'a, I>(values: I) -> H256
where
    I: IntoIterator<Item = &'a Value>,
{
    values
        .into_iter()
        .fold(empty_stack_hash(), |rest, value| push_stack_hash(&value.hash(), &rest))
}

/// The code point every program ends in
///
/// Its hash doubles as the "no handler installed" error handler.
pub fn error_code_point() -> CodePoint {
    CodePoint::new(0, Operation::new(opcodes::ERROR), H256::zero())
}

/// The eight hashed fields of a machine plus its run status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineState {
    /// Run status
    pub status: MachineStatus,

    /// Hash of the code point executed next
    pub inst_stack_hash: H256,

    /// Data stack hash
    pub data_stack_hash: H256,

    /// Auxiliary stack hash
    pub aux_stack_hash: H256,

    /// Register value
    pub register: Value,

    /// Static value
    pub static_value: Value,

    /// Hash of the installed error handler code point
    pub err_handler_hash: H256,

    /// Remaining arb gas
    pub arb_gas_remaining: U256,

    /// Hash of the program's error code point
    pub err_code_point_hash: H256,
}

impl MachineState {
    /// Machine hash
    pub fn hash(&self) -> H256 {
        hash_machine(self)
    }

    /// Whether no error handler is installed
    pub fn has_no_handler(&self) -> bool {
        self.err_handler_hash == self.err_code_point_hash
    }

    /// Append the proof encoding of the machine preimage to `buf`
    ///
    /// Register and static values are encoded shallow.
    pub fn marshal_for_proof(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.inst_stack_hash.as_bytes());
        buf.extend_from_slice(self.data_stack_hash.as_bytes());
        buf.extend_from_slice(self.aux_stack_hash.as_bytes());
        marshal_shallow(&self.register, buf);
        marshal_shallow(&self.static_value, buf);
        buf.extend_from_slice(self.err_handler_hash.as_bytes());
        buf.extend_from_slice(&u256_to_bytes(&self.arb_gas_remaining));
        buf.extend_from_slice(self.err_code_point_hash.as_bytes());
    }

    /// Read a machine preimage written by `marshal_for_proof`
    pub fn read_for_proof(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            status: MachineStatus::Extensive,
            inst_stack_hash: reader.read_h256()?,
            data_stack_hash: reader.read_h256()?,
            aux_stack_hash: reader.read_h256()?,
            register: reader.read_value()?,
            static_value: reader.read_value()?,
            err_handler_hash: reader.read_h256()?,
            arb_gas_remaining: reader.read_u256()?,
            err_code_point_hash: reader.read_h256()?,
        })
    }
}

/// Machine hash
///
/// `H(inst ‖ data ‖ aux ‖ H(register) ‖ H(static) ‖ errHandler ‖ gas ‖ errCodePoint)`
/// for a running machine; halted and error-stopped machines hash to fixed
/// sentinels.
pub fn hash_machine(machine: &MachineState) -> H256 {
    match machine.status {
        MachineStatus::Halted => halted_hash(),
        MachineStatus::ErrorStop => error_stop_hash(),
        MachineStatus::Extensive => keccak_packed(&[
            machine.inst_stack_hash.as_bytes(),
            machine.data_stack_hash.as_bytes(),
            machine.aux_stack_hash.as_bytes(),
            machine.register.hash().as_bytes(),
            machine.static_value.hash().as_bytes(),
            machine.err_handler_hash.as_bytes(),
            &u256_to_bytes(&machine.arb_gas_remaining)[..],
            machine.err_code_point_hash.as_bytes(),
        ]),
    }
}
