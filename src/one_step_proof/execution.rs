// src/one_step_proof/execution.rs
//! Instruction semantics shared by the verifier and the prover
//!
//! `execute` evaluates one instruction on its operands and reports what the
//! caller must do to its stacks, register, error handler and control flow.
//! The verifier runs it on shallow operands decoded from a proof, the
//! off-chain machine on full values; both see hash-identical results.

use ethereum_types::{H256, U256, U512};

use super::opcodes::{self, OpcodeInfo};
use crate::error_handling::CodecError;
use crate::utils::{keccak_packed, u256_to_bytes};
use crate::value::{CodePoint, Value};

/// Where execution continues after an instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlFlow {
    /// Continue at the next code point
    Next,

    /// Continue at the given code point
    Jump(CodePoint),

    /// Machine halts
    Halt,

    /// Machine error: control moves to the error handler
    Fault,
}

/// Observable I/O performed by an instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// No I/O
    None,

    /// Message appended to the outgoing message stream
    Send(Value),

    /// Value appended to the log stream
    Log(Value),

    /// Inbox consumed
    Inbox,
}

/// Outcome of executing one instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    /// Values pushed onto the data stack, first pushed first
    pub data_pushes: Vec<Value>,

    /// Values pushed onto the aux stack, first pushed first
    pub aux_pushes: Vec<Value>,

    /// New register value
    pub register: Option<Value>,

    /// New error handler
    pub err_handler: Option<CodePoint>,

    /// Control flow
    pub flow: ControlFlow,

    /// I/O effect
    pub effect: Effect,
}

impl StepResult {
    fn next() -> Self {
        Self {
            data_pushes: Vec::new(),
            aux_pushes: Vec::new(),
            register: None,
            err_handler: None,
            flow: ControlFlow::Next,
            effect: Effect::None,
        }
    }

    fn push(value: Value) -> Self {
        Self {
            data_pushes: vec![value],
            ..Self::next()
        }
    }

    fn push_int(value: U256) -> Self {
        Self::push(Value::Int(value))
    }

    fn push_bool(value: bool) -> Self {
        Self::push_int(if value { U256::one() } else { U256::zero() })
    }

    fn flow(flow: ControlFlow) -> Self {
        Self { flow, ..Self::next() }
    }

    /// Runtime error: operands consumed, nothing produced
    pub fn fault() -> Self {
        Self::flow(ControlFlow::Fault)
    }
}

/// Machine context an instruction may read
#[derive(Debug, Clone)]
pub struct StepContext<'a> {
    /// The executing code point
    pub code_point: &'a CodePoint,

    /// Register value
    pub register: &'a Value,

    /// Static value
    pub static_value: &'a Value,

    /// Installed error handler
    pub err_handler: &'a Value,

    /// Whether the data stack is empty once operands are taken
    pub data_stack_empty: bool,

    /// Whether the aux stack is empty once operands are taken
    pub aux_stack_empty: bool,

    /// Lower and upper time bounds in blocks
    pub time_bounds: [u128; 2],

    /// Inbox delivered by `inbox`
    pub inbox: &'a Value,
}

/// Integer operands, or `None` when one of them is not an integer
///
/// A hash-only operand cannot be type checked and is rejected.
fn ints<const N: usize>(operands: &[Value]) -> Result<Option<[U256; N]>, CodecError> {
    let mut out = [U256::zero(); N];
    for (slot, operand) in out.iter_mut().zip(operands) {
        match operand {
            Value::Int(x) => *slot = *x,
            Value::HashOnly(_) => return Err(opaque_operand()),
            _ => return Ok(None),
        }
    }
    Ok(Some(out))
}

fn opaque_operand() -> CodecError {
    CodecError::MalformedValue("operand must be inspected but only its hash was supplied".into())
}

macro_rules! int_operands {
    ($operands:expr, $n:literal) => {
        match ints::<$n>($operands)? {
            Some(values) => values,
            None => return Ok(StepResult::fault()),
        }
    };
}

fn is_negative(x: &U256) -> bool {
    x.bit(255)
}

fn negate(x: U256) -> U256 {
    (!x).overflowing_add(U256::one()).0
}

fn abs(x: U256) -> U256 {
    if is_negative(&x) {
        negate(x)
    } else {
        x
    }
}

fn signed_lt(a: &U256, b: &U256) -> bool {
    match (is_negative(a), is_negative(b)) {
        (true, false) => true,
        (false, true) => false,
        _ => a < b,
    }
}

fn low_u256(x: U512) -> U256 {
    let mut buf = [0u8; 64];
    x.to_big_endian(&mut buf);
    U256::from_big_endian(&buf[32..])
}

fn sign_extend(bytes: U256, x: U256) -> U256 {
    if bytes >= U256::from(31u64) {
        return x;
    }
    let bit = bytes.low_u64() as usize * 8 + 7;
    let mask = (U256::one() << (bit + 1)) - U256::one();
    if x.bit(bit) {
        x | !mask
    } else {
        x & mask
    }
}

fn byte_of(index: U256, x: U256) -> U256 {
    if index >= U256::from(32u64) {
        return U256::zero();
    }
    U256::from(x.byte(31 - index.low_u64() as usize))
}

/// Execute one instruction
///
/// `operands` are the data operands top first, the immediate (if any) in
/// front; `aux_operands` likewise for the aux stack. Both hold exactly the
/// counts the opcode table lists.
pub fn execute(
    info: &OpcodeInfo,
    operands: &[Value],
    aux_operands: &[Value],
    ctx: &StepContext<'_>,
) -> Result<StepResult, CodecError> {
    let result = match info.opcode {
        opcodes::ADD => {
            let [a, b] = int_operands!(operands, 2);
            StepResult::push_int(a.overflowing_add(b).0)
        }
        opcodes::MUL => {
            let [a, b] = int_operands!(operands, 2);
            StepResult::push_int(a.overflowing_mul(b).0)
        }
        opcodes::SUB => {
            let [a, b] = int_operands!(operands, 2);
            StepResult::push_int(a.overflowing_sub(b).0)
        }
        opcodes::DIV => {
            let [a, b] = int_operands!(operands, 2);
            if b.is_zero() {
                return Ok(StepResult::fault());
            }
            StepResult::push_int(a / b)
        }
        opcodes::SDIV => {
            let [a, b] = int_operands!(operands, 2);
            if b.is_zero() {
                return Ok(StepResult::fault());
            }
            let quotient = abs(a) / abs(b);
            if is_negative(&a) != is_negative(&b) {
                StepResult::push_int(negate(quotient))
            } else {
                StepResult::push_int(quotient)
            }
        }
        opcodes::MOD => {
            let [a, b] = int_operands!(operands, 2);
            if b.is_zero() {
                return Ok(StepResult::fault());
            }
            StepResult::push_int(a % b)
        }
        opcodes::SMOD => {
            let [a, b] = int_operands!(operands, 2);
            if b.is_zero() {
                return Ok(StepResult::fault());
            }
            let remainder = abs(a) % abs(b);
            if is_negative(&a) {
                StepResult::push_int(negate(remainder))
            } else {
                StepResult::push_int(remainder)
            }
        }
        opcodes::ADDMOD | opcodes::MULMOD => {
            let [a, b, m] = int_operands!(operands, 3);
            if m.is_zero() {
                return Ok(StepResult::fault());
            }
            let (a, b, m) = (U512::from(a), U512::from(b), U512::from(m));
            let wide = if info.opcode == opcodes::ADDMOD { a + b } else { a * b };
            StepResult::push_int(low_u256(wide % m))
        }
        opcodes::EXP => {
            let [a, b] = int_operands!(operands, 2);
            StepResult::push_int(a.overflowing_pow(b).0)
        }
        opcodes::LT => {
            let [a, b] = int_operands!(operands, 2);
            StepResult::push_bool(a < b)
        }
        opcodes::GT => {
            let [a, b] = int_operands!(operands, 2);
            StepResult::push_bool(a > b)
        }
        opcodes::SLT => {
            let [a, b] = int_operands!(operands, 2);
            StepResult::push_bool(signed_lt(&a, &b))
        }
        opcodes::SGT => {
            let [a, b] = int_operands!(operands, 2);
            StepResult::push_bool(signed_lt(&b, &a))
        }
        opcodes::EQ => StepResult::push_bool(operands[0].hash() == operands[1].hash()),
        opcodes::ISZERO => {
            let [a] = int_operands!(operands, 1);
            StepResult::push_bool(a.is_zero())
        }
        opcodes::AND => {
            let [a, b] = int_operands!(operands, 2);
            StepResult::push_int(a & b)
        }
        opcodes::OR => {
            let [a, b] = int_operands!(operands, 2);
            StepResult::push_int(a | b)
        }
        opcodes::XOR => {
            let [a, b] = int_operands!(operands, 2);
            StepResult::push_int(a ^ b)
        }
        opcodes::NOT => {
            let [a] = int_operands!(operands, 1);
            StepResult::push_int(!a)
        }
        opcodes::BYTE => {
            let [index, x] = int_operands!(operands, 2);
            StepResult::push_int(byte_of(index, x))
        }
        opcodes::SIGNEXTEND => {
            let [bytes, x] = int_operands!(operands, 2);
            StepResult::push_int(sign_extend(bytes, x))
        }
        opcodes::HASH => StepResult::push(Value::Int(U256::from_big_endian(
            operands[0].hash().as_bytes(),
        ))),
        opcodes::TYPE => match &operands[0] {
            Value::HashOnly(_) => return Err(opaque_operand()),
            value => StepResult::push_int(U256::from(value.type_code())),
        },
        opcodes::ETHHASH2 => {
            let [a, b] = int_operands!(operands, 2);
            let digest: H256 = keccak_packed(&[&u256_to_bytes(&a)[..], &u256_to_bytes(&b)[..]]);
            StepResult::push_int(U256::from_big_endian(digest.as_bytes()))
        }
        opcodes::POP => StepResult::next(),
        opcodes::SPUSH => StepResult::push(ctx.static_value.clone()),
        opcodes::RPUSH => StepResult::push(ctx.register.clone()),
        opcodes::RSET => StepResult {
            register: Some(operands[0].clone()),
            ..StepResult::next()
        },
        opcodes::JUMP => match &operands[0] {
            Value::CodePoint(target) => StepResult::flow(ControlFlow::Jump(target.clone())),
            Value::HashOnly(_) => return Err(opaque_operand()),
            _ => StepResult::fault(),
        },
        opcodes::CJUMP => {
            let condition = match &operands[1] {
                Value::Int(x) => !x.is_zero(),
                Value::HashOnly(_) => return Err(opaque_operand()),
                _ => return Ok(StepResult::fault()),
            };
            match &operands[0] {
                Value::CodePoint(target) if condition => {
                    StepResult::flow(ControlFlow::Jump(target.clone()))
                }
                Value::CodePoint(_) => StepResult::next(),
                Value::HashOnly(_) => return Err(opaque_operand()),
                _ => StepResult::fault(),
            }
        }
        opcodes::STACKEMPTY => StepResult::push_bool(ctx.data_stack_empty),
        opcodes::PCPUSH => StepResult::push(Value::CodePoint(ctx.code_point.clone())),
        opcodes::AUXPUSH => StepResult {
            aux_pushes: vec![operands[0].clone()],
            ..StepResult::next()
        },
        opcodes::AUXPOP => StepResult::push(aux_operands[0].clone()),
        opcodes::AUXSTACKEMPTY => StepResult::push_bool(ctx.aux_stack_empty),
        opcodes::NOP | opcodes::BREAKPOINT | opcodes::DEBUG => StepResult::next(),
        opcodes::ERRPUSH => StepResult::push(ctx.err_handler.clone()),
        opcodes::ERRSET => match &operands[0] {
            Value::CodePoint(handler) => StepResult {
                err_handler: Some(handler.clone()),
                ..StepResult::next()
            },
            Value::HashOnly(_) => return Err(opaque_operand()),
            _ => StepResult::fault(),
        },
        opcodes::DUP0 => StepResult {
            data_pushes: vec![operands[0].clone(), operands[0].clone()],
            ..StepResult::next()
        },
        opcodes::DUP1 => StepResult {
            data_pushes: vec![operands[1].clone(), operands[0].clone(), operands[1].clone()],
            ..StepResult::next()
        },
        opcodes::DUP2 => StepResult {
            data_pushes: vec![
                operands[2].clone(),
                operands[1].clone(),
                operands[0].clone(),
                operands[2].clone(),
            ],
            ..StepResult::next()
        },
        opcodes::SWAP1 => StepResult {
            data_pushes: vec![operands[0].clone(), operands[1].clone()],
            ..StepResult::next()
        },
        opcodes::SWAP2 => StepResult {
            data_pushes: vec![operands[0].clone(), operands[1].clone(), operands[2].clone()],
            ..StepResult::next()
        },
        opcodes::TGET => {
            let index = match &operands[0] {
                Value::Int(x) => *x,
                Value::HashOnly(_) => return Err(opaque_operand()),
                _ => return Ok(StepResult::fault()),
            };
            match &operands[1] {
                Value::Tuple(tuple) if index < U256::from(tuple.len()) => {
                    match tuple.get(index.low_u64() as usize) {
                        Some(value) => StepResult::push(value.clone()),
                        None => StepResult::fault(),
                    }
                }
                Value::HashOnly(_) => return Err(opaque_operand()),
                _ => StepResult::fault(),
            }
        }
        opcodes::TSET => {
            let index = match &operands[0] {
                Value::Int(x) => *x,
                Value::HashOnly(_) => return Err(opaque_operand()),
                _ => return Ok(StepResult::fault()),
            };
            match &operands[1] {
                Value::Tuple(tuple) if index < U256::from(tuple.len()) => {
                    match tuple.with_value(index.low_u64() as usize, operands[2].clone()) {
                        Some(updated) => StepResult::push(Value::Tuple(updated)),
                        None => StepResult::fault(),
                    }
                }
                Value::HashOnly(_) => return Err(opaque_operand()),
                _ => StepResult::fault(),
            }
        }
        opcodes::TLEN => match &operands[0] {
            Value::Tuple(tuple) => StepResult::push_int(U256::from(tuple.len())),
            Value::HashOnly(_) => return Err(opaque_operand()),
            _ => StepResult::fault(),
        },
        opcodes::LOG => StepResult {
            effect: Effect::Log(operands[0].clone()),
            ..StepResult::next()
        },
        opcodes::SEND => StepResult {
            effect: Effect::Send(operands[0].clone()),
            ..StepResult::next()
        },
        opcodes::GETTIME => {
            let bounds = Value::tuple(vec![
                Value::Int(U256::from(ctx.time_bounds[0])),
                Value::Int(U256::from(ctx.time_bounds[1])),
            ])?;
            StepResult::push(bounds)
        }
        opcodes::INBOX => {
            // Operand is the block height the reader waits for; it is only
            // type checked
            let [_] = int_operands!(operands, 1);
            StepResult {
                data_pushes: vec![ctx.inbox.clone()],
                effect: Effect::Inbox,
                ..StepResult::next()
            }
        }
        opcodes::ERROR => StepResult::fault(),
        opcodes::HALT => StepResult::flow(ControlFlow::Halt),
        other => {
            return Err(CodecError::MalformedValue(format!(
                "no semantics for opcode 0x{:02x}",
                other
            )))
        }
    };

    Ok(result)
}

/// Charge gas and execute one instruction
///
/// Returns the result together with the arb gas left afterwards. A machine
/// without enough gas faults and gets its gas reset to the maximum so that
/// the error handler can run; a stack underflow faults after charging.
pub fn run_instruction(
    info: &OpcodeInfo,
    operands: &[Value],
    aux_operands: &[Value],
    ctx: &StepContext<'_>,
    arb_gas_remaining: U256,
) -> Result<(StepResult, U256), CodecError> {
    let cost = U256::from(info.gas);
    if arb_gas_remaining < cost {
        return Ok((StepResult::fault(), U256::MAX));
    }
    let remaining = arb_gas_remaining - cost;

    if operands.len() < info.data_pops || aux_operands.len() < info.aux_pops {
        return Ok((StepResult::fault(), remaining));
    }

    Ok((execute(info, operands, aux_operands, ctx)?, remaining))
}
