// src/value/codec.rs
//! Wire encoding of values
//!
//! Every value starts with a one-byte tag:
//! - `0`: 32-byte big-endian integer
//! - `1`: code point (`pc` u64, immediate count u8, opcode u8, optional
//!   immediate value, 32-byte next hash)
//! - `2`: 32-byte hash of an undisclosed value
//! - `3 + n`: tuple of `n` values, each encoded in turn

use ethereum_types::{H256, U256};

use super::value::{
    CodePoint, Operation, Value, MAX_TUPLE_SIZE, TYPE_CODE_CODE_POINT, TYPE_CODE_HASH_ONLY,
    TYPE_CODE_INT, TYPE_CODE_TUPLE,
};
use crate::error_handling::CodecError;
use crate::utils::u256_to_bytes;

/// Deepest tuple nesting accepted by the decoder
pub const MAX_DECODE_DEPTH: usize = 256;

/// Cursor over an input buffer
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    /// Start reading at the beginning of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Start reading at `offset`
    pub fn at(data: &'a [u8], offset: usize) -> Self {
        Self { data, offset }
    }

    /// Current read position
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.offset)
    }

    /// Read `len` raw bytes
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < len {
            return Err(CodecError::Truncated {
                offset: self.offset,
                needed: len,
                available: self.remaining(),
            });
        }

        let bytes = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(bytes)
    }

    /// Read one byte
    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_bytes(1)?[0])
    }

    /// Read a big-endian u64
    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.read_bytes(8)?);
        Ok(u64::from_be_bytes(buf))
    }

    /// Read a 32-byte hash
    pub fn read_h256(&mut self) -> Result<H256, CodecError> {
        Ok(H256::from_slice(self.read_bytes(32)?))
    }

    /// Read a 32-byte big-endian integer
    pub fn read_u256(&mut self) -> Result<U256, CodecError> {
        Ok(U256::from_big_endian(self.read_bytes(32)?))
    }

    /// Read one encoded value
    pub fn read_value(&mut self) -> Result<Value, CodecError> {
        self.read_value_at_depth(0)
    }

    fn read_value_at_depth(&mut self, depth: usize) -> Result<Value, CodecError> {
        if depth > MAX_DECODE_DEPTH {
            return Err(CodecError::MalformedValue(format!(
                "nesting deeper than {} at offset {}",
                MAX_DECODE_DEPTH, self.offset
            )));
        }

        let tag_offset = self.offset;
        let tag = self.read_u8()?;
        match tag {
            TYPE_CODE_INT => Ok(Value::Int(self.read_u256()?)),
            TYPE_CODE_CODE_POINT => {
                let pc = self.read_u64()?;
                let op = self.read_operation(depth)?;
                let next_hash = self.read_h256()?;
                Ok(Value::CodePoint(CodePoint::new(pc, op, next_hash)))
            }
            TYPE_CODE_HASH_ONLY => Ok(Value::HashOnly(self.read_h256()?)),
            _ if tag >= TYPE_CODE_TUPLE && tag <= TYPE_CODE_TUPLE + MAX_TUPLE_SIZE as u8 => {
                let size = (tag - TYPE_CODE_TUPLE) as usize;
                let mut values = Vec::with_capacity(size);
                for _ in 0..size {
                    values.push(self.read_value_at_depth(depth + 1)?);
                }
                Value::tuple(values)
            }
            _ => Err(CodecError::MalformedValue(format!(
                "unknown type tag {} at offset {}",
                tag, tag_offset
            ))),
        }
    }

    fn read_operation(&mut self, depth: usize) -> Result<Operation, CodecError> {
        let immediate_count = self.read_u8()?;
        let opcode = self.read_u8()?;
        match immediate_count {
            0 => Ok(Operation::new(opcode)),
            1 => {
                let immediate = self.read_value_at_depth(depth + 1)?;
                Ok(Operation::with_immediate(opcode, immediate))
            }
            n => Err(CodecError::MalformedValue(format!(
                "immediate count {} for opcode 0x{:02x}",
                n, opcode
            ))),
        }
    }

    /// Require that the whole input has been consumed
    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }
}

/// Decode the value starting at `offset`, returning it with the offset just
/// past it
pub fn deserialize_value(bytes: &[u8], offset: usize) -> Result<(Value, usize), CodecError> {
    let mut reader = ByteReader::at(bytes, offset);
    let value = reader.read_value()?;
    Ok((value, reader.offset()))
}

/// Full encoding of a value
pub fn serialize_value(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    write_value(value, &mut buf);
    buf
}

/// Append the full encoding of `value` to `buf`
pub fn write_value(value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::Int(x) => {
            buf.push(TYPE_CODE_INT);
            buf.extend_from_slice(&u256_to_bytes(x));
        }
        Value::CodePoint(cp) => {
            buf.push(TYPE_CODE_CODE_POINT);
            buf.extend_from_slice(&cp.pc.to_be_bytes());
            match &cp.op.immediate {
                Some(immediate) => {
                    buf.push(1);
                    buf.push(cp.op.opcode);
                    write_value(immediate, buf);
                }
                None => {
                    buf.push(0);
                    buf.push(cp.op.opcode);
                }
            }
            buf.extend_from_slice(cp.next_hash.as_bytes());
        }
        Value::Tuple(tuple) => {
            buf.push(TYPE_CODE_TUPLE + tuple.len() as u8);
            for child in tuple.values() {
                write_value(child, buf);
            }
        }
        Value::HashOnly(hash) => {
            buf.push(TYPE_CODE_HASH_ONLY);
            buf.extend_from_slice(hash.as_bytes());
        }
    }
}

/// Reduce a value to one level of structure
///
/// Integers are kept; tuple children and code point immediates that are not
/// integers become hash-only placeholders. The result has the same hash.
pub fn shallow(value: &Value) -> Value {
    match value {
        Value::Tuple(tuple) => {
            let children = tuple.values().iter().map(shallow_child).collect();
            // Same arity as an already valid tuple
            Value::tuple(children).unwrap_or_else(|_| Value::HashOnly(tuple.hash()))
        }
        Value::CodePoint(cp) => {
            let op = match &cp.op.immediate {
                Some(immediate) => Operation::with_immediate(cp.op.opcode, shallow_child(immediate)),
                None => Operation::new(cp.op.opcode),
            };
            Value::CodePoint(CodePoint::new(cp.pc, op, cp.next_hash))
        }
        other => other.clone(),
    }
}

fn shallow_child(value: &Value) -> Value {
    match value {
        Value::Int(_) => value.clone(),
        other => Value::HashOnly(other.hash()),
    }
}

/// Append the shallow encoding of `value` to `buf`, as used in proofs
pub fn marshal_shallow(value: &Value, buf: &mut Vec<u8>) {
    write_value(&shallow(value), buf);
}
