// src/value/value.rs
//! AVM values
//!
//! A value is an integer, a code point, a tuple of at most eight values, or
//! an opaque hash standing in for a value whose contents are not revealed.
//! Values are immutable; tuples share their children behind an `Arc` and
//! memoise their hash.

use std::fmt;
use std::sync::{Arc, OnceLock};

use ethereum_types::{H256, U256};

use crate::error_handling::CodecError;
use crate::utils::{keccak, keccak_packed, u256_to_bytes};

/// Maximum number of children in a tuple
pub const MAX_TUPLE_SIZE: usize = 8;

/// Type code of an integer
pub const TYPE_CODE_INT: u8 = 0;

/// Type code of a code point
pub const TYPE_CODE_CODE_POINT: u8 = 1;

/// Type code of a hash-only placeholder
pub const TYPE_CODE_HASH_ONLY: u8 = 2;

/// Type code of a tuple; the wire tag of an n-tuple is `TYPE_CODE_TUPLE + n`
pub const TYPE_CODE_TUPLE: u8 = 3;

/// An AVM value
#[derive(Clone)]
pub enum Value {
    /// 256-bit unsigned integer
    Int(U256),

    /// Instruction label
    CodePoint(CodePoint),

    /// Ordered tuple of up to `MAX_TUPLE_SIZE` values
    Tuple(Tuple),

    /// Placeholder carrying only the hash of a value
    HashOnly(H256),
}

impl Value {
    /// Build a tuple value, rejecting more than `MAX_TUPLE_SIZE` children
    pub fn tuple(values: Vec<Value>) -> Result<Self, CodecError> {
        Ok(Value::Tuple(Tuple::new(values)?))
    }

    /// The empty tuple
    pub fn empty_tuple() -> Self {
        Value::Tuple(Tuple::empty())
    }

    /// Canonical value hash
    pub fn hash(&self) -> H256 {
        match self {
            Value::Int(x) => hash_int(x),
            Value::CodePoint(cp) => cp.hash(),
            Value::Tuple(tuple) => tuple.hash(),
            Value::HashOnly(hash) => *hash,
        }
    }

    /// Type code as seen by the `type` instruction
    pub fn type_code(&self) -> u8 {
        match self {
            Value::Int(_) => TYPE_CODE_INT,
            Value::CodePoint(_) => TYPE_CODE_CODE_POINT,
            Value::Tuple(_) => TYPE_CODE_TUPLE,
            Value::HashOnly(_) => TYPE_CODE_HASH_ONLY,
        }
    }

    /// The integer payload, if this is an integer
    pub fn as_int(&self) -> Option<U256> {
        match self {
            Value::Int(x) => Some(*x),
            _ => None,
        }
    }
}

impl From<U256> for Value {
    fn from(value: U256) -> Self {
        Value::Int(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::Int(U256::from(value))
    }
}

impl From<CodePoint> for Value {
    fn from(value: CodePoint) -> Self {
        Value::CodePoint(value)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.hash() == other.hash()
    }
}

impl Eq for Value {}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(x) => write!(f, "Int({})", x),
            Value::CodePoint(cp) => write!(f, "{:?}", cp),
            Value::Tuple(tuple) => write!(f, "{:?}", tuple),
            Value::HashOnly(hash) => write!(f, "HashOnly({:?})", hash),
        }
    }
}

fn hash_int(x: &U256) -> H256 {
    keccak_packed(&[&[TYPE_CODE_INT][..], &u256_to_bytes(x)[..]])
}

/// An instruction: opcode plus an optional immediate operand
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    /// Opcode byte
    pub opcode: u8,

    /// Immediate value pushed before the instruction executes
    pub immediate: Option<Box<Value>>,
}

impl Operation {
    /// An instruction without an immediate
    pub fn new(opcode: u8) -> Self {
        Self { opcode, immediate: None }
    }

    /// An instruction carrying an immediate value
    pub fn with_immediate(opcode: u8, immediate: Value) -> Self {
        Self {
            opcode,
            immediate: Some(Box::new(immediate)),
        }
    }
}

/// A code point: an instruction linked to the hash of its successor
#[derive(Debug, Clone)]
pub struct CodePoint {
    /// Program counter label; not part of the hash
    pub pc: u64,

    /// Instruction at this point
    pub op: Operation,

    /// Hash of the code point executed next
    pub next_hash: H256,
}

impl CodePoint {
    /// Create a code point
    pub fn new(pc: u64, op: Operation, next_hash: H256) -> Self {
        Self { pc, op, next_hash }
    }

    /// Code point hash: `H(1 ‖ opcode ‖ [H(immediate)] ‖ nextHash)`
    pub fn hash(&self) -> H256 {
        let header = [TYPE_CODE_CODE_POINT, self.op.opcode];
        match &self.op.immediate {
            Some(immediate) => keccak_packed(&[
                &header[..],
                immediate.hash().as_bytes(),
                self.next_hash.as_bytes(),
            ]),
            None => keccak_packed(&[&header[..], self.next_hash.as_bytes()]),
        }
    }
}

impl PartialEq for CodePoint {
    fn eq(&self, other: &Self) -> bool {
        self.hash() == other.hash()
    }
}

impl Eq for CodePoint {}

struct TupleNode {
    values: Vec<Value>,
    hash: OnceLock<H256>,
}

/// Shared tuple handle with a memoised hash
#[derive(Clone)]
pub struct Tuple(Arc<TupleNode>);

impl Tuple {
    /// Create a tuple, rejecting more than `MAX_TUPLE_SIZE` children
    pub fn new(values: Vec<Value>) -> Result<Self, CodecError> {
        if values.len() > MAX_TUPLE_SIZE {
            return Err(CodecError::MalformedValue(format!(
                "tuple of {} values exceeds the maximum of {}",
                values.len(),
                MAX_TUPLE_SIZE
            )));
        }

        Ok(Self(Arc::new(TupleNode {
            values,
            hash: OnceLock::new(),
        })))
    }

    /// The empty tuple
    pub fn empty() -> Self {
        Self(Arc::new(TupleNode {
            values: Vec::new(),
            hash: OnceLock::new(),
        }))
    }

    /// Number of children
    pub fn len(&self) -> usize {
        self.0.values.len()
    }

    /// Whether the tuple has no children
    pub fn is_empty(&self) -> bool {
        self.0.values.is_empty()
    }

    /// Child at `index`
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.values.get(index)
    }

    /// All children in order
    pub fn values(&self) -> &[Value] {
        &self.0.values
    }

    /// Copy of this tuple with the child at `index` replaced
    pub fn with_value(&self, index: usize, value: Value) -> Option<Self> {
        if index >= self.len() {
            return None;
        }

        let mut values = self.0.values.clone();
        values[index] = value;
        Some(Self(Arc::new(TupleNode {
            values,
            hash: OnceLock::new(),
        })))
    }

    /// Tuple hash: `H(3 + n ‖ n ‖ H(c0) ‖ … ‖ H(cn-1))`
    pub fn hash(&self) -> H256 {
        *self.0.hash.get_or_init(|| {
            let size = self.len() as u8;
            let mut buf = Vec::with_capacity(2 + 32 * self.len());
            buf.push(TYPE_CODE_TUPLE + size);
            buf.push(size);
            for value in self.values() {
                buf.extend_from_slice(value.hash().as_bytes());
            }
            keccak(&buf)
        })
    }
}

impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        self.hash() == other.hash()
    }
}

impl Eq for Tuple {}

impl fmt::Debug for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Tuple").field(&self.0.values).finish()
    }
}
