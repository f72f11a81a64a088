// src/one_step_proof/verification.rs
//! One-step proof verification
//!
//! A proof opens the machine hash of a one-step segment just far enough to
//! replay a single instruction. Its layout:
//!
//! 1. machine preimage (see `MachineState::marshal_for_proof`)
//! 2. opcode u8, immediate count u8, optional immediate value, next hash
//! 3. data operand count u8, the operands top first, remaining data stack hash
//! 4. aux operand count u8, the operands top first, remaining aux stack hash
//!
//! Fewer operands than the opcode pops may be supplied only when the stack
//! below them is empty; the instruction then faults on underflow.

use ethereum_types::H256;
use log::debug;
use serde::Serialize;

use super::execution::{run_instruction, ControlFlow, Effect, StepContext};
use super::opcodes::{self, OpcodeInfo};
use crate::error_handling::{CodecError, VerifierError};
use crate::interfaces::ComponentError;
use crate::utils::{accumulate, short_hex};
use crate::value::{
    empty_stack_hash, push_stack_hash, ByteReader, CodePoint, MachineState, MachineStatus,
    Operation, Value,
};

/// Claimed execution of one instruction, as submitted by the asserter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OneStepProof {
    /// Machine hash before the instruction
    pub before_hash: H256,

    /// Hash of the inbox the machine reads
    pub before_inbox: H256,

    /// Lower and upper time bounds in blocks
    pub time_bounds: [u128; 2],

    /// Claimed machine hash after the instruction
    pub after_hash: H256,

    /// Whether the instruction read the inbox
    pub did_inbox_insn: bool,

    /// Message accumulator before the instruction
    pub first_message: H256,

    /// Message accumulator after the instruction
    pub last_message: H256,

    /// Log accumulator before the instruction
    pub first_log: H256,

    /// Log accumulator after the instruction
    pub last_log: H256,

    /// Claimed gas
    pub gas: u64,

    /// Proof bytes
    pub proof: Vec<u8>,
}

/// Instruction and operands decoded from a proof
struct DecodedStep {
    state: MachineState,
    info: &'static OpcodeInfo,
    code_point: CodePoint,
    data_operands: Vec<Value>,
    data_rest: H256,
    aux_operands: Vec<Value>,
    aux_rest: H256,
}

fn rebuild_stack(operands: &[Value], rest: &H256) -> H256 {
    operands
        .iter()
        .rev()
        .fold(*rest, |acc, value| push_stack_hash(&value.hash(), &acc))
}

fn read_operands(
    reader: &mut ByteReader<'_>,
    required: usize,
) -> Result<(Vec<Value>, H256), VerifierError> {
    let count = reader.read_u8()? as usize;
    if count > required {
        return Err(CodecError::MalformedValue(format!(
            "{} operands supplied where {} are popped",
            count, required
        ))
        .into());
    }

    let mut operands = Vec::with_capacity(count);
    for _ in 0..count {
        operands.push(reader.read_value()?);
    }
    let rest = reader.read_h256()?;

    if count < required && rest != empty_stack_hash() {
        return Err(VerifierError::MismatchedBeforeHash(
            "operands withheld from a non-empty stack".into(),
        ));
    }

    Ok((operands, rest))
}

fn decode(claim: &OneStepProof) -> Result<DecodedStep, VerifierError> {
    let mut reader = ByteReader::new(&claim.proof);

    // Step 1: machine preimage
    let state = MachineState::read_for_proof(&mut reader)?;
    if state.hash() != claim.before_hash {
        return Err(VerifierError::MismatchedBeforeHash(format!(
            "preimage hashes to {}, claimed {}",
            short_hex(&state.hash()),
            short_hex(&claim.before_hash)
        )));
    }

    // Step 2: opcode
    let opcode = reader.read_u8()?;
    let info = opcodes::lookup(opcode).ok_or(VerifierError::InvalidOpcode(opcode))?;

    // Step 3: immediate and successor
    let op = match reader.read_u8()? {
        0 => Operation::new(opcode),
        1 => Operation::with_immediate(opcode, reader.read_value()?),
        n => {
            return Err(CodecError::MalformedValue(format!("immediate count {}", n)).into());
        }
    };
    let next_hash = reader.read_h256()?;
    let code_point = CodePoint::new(0, op, next_hash);
    if code_point.hash() != state.inst_stack_hash {
        return Err(VerifierError::MismatchedBeforeHash(
            "instruction does not match the instruction stack".into(),
        ));
    }

    // Step 4: operands and remaining stacks
    let from_stack = match code_point.op.immediate {
        Some(_) => info.data_pops.saturating_sub(1),
        None => info.data_pops,
    };
    let (data_operands, data_rest) = read_operands(&mut reader, from_stack)?;
    if rebuild_stack(&data_operands, &data_rest) != state.data_stack_hash {
        return Err(VerifierError::MismatchedBeforeHash(
            "data operands do not rebuild the data stack".into(),
        ));
    }

    let (aux_operands, aux_rest) = read_operands(&mut reader, info.aux_pops)?;
    if rebuild_stack(&aux_operands, &aux_rest) != state.aux_stack_hash {
        return Err(VerifierError::MismatchedBeforeHash(
            "aux operands do not rebuild the aux stack".into(),
        ));
    }

    if !reader.is_exhausted() {
        return Err(VerifierError::TrailingBytes(reader.remaining()));
    }

    Ok(DecodedStep {
        state,
        info,
        code_point,
        data_operands,
        data_rest,
        aux_operands,
        aux_rest,
    })
}

fn check_effects(claim: &OneStepProof, effect: &Effect) -> Result<(), VerifierError> {
    let (message, log, did_inbox) = match effect {
        Effect::None => (claim.first_message, claim.first_log, false),
        Effect::Send(value) => (
            accumulate(&claim.first_message, &value.hash()),
            claim.first_log,
            false,
        ),
        Effect::Log(value) => (
            claim.first_message,
            accumulate(&claim.first_log, &value.hash()),
            false,
        ),
        Effect::Inbox => (claim.first_message, claim.first_log, true),
    };

    if claim.last_message != message {
        return Err(VerifierError::EffectMismatch("message accumulator".into()));
    }
    if claim.last_log != log {
        return Err(VerifierError::EffectMismatch("log accumulator".into()));
    }
    if claim.did_inbox_insn != did_inbox {
        return Err(VerifierError::EffectMismatch(format!(
            "inbox flag claimed {}, instruction {}",
            claim.did_inbox_insn,
            if did_inbox { "read the inbox" } else { "did not read the inbox" }
        )));
    }
    Ok(())
}

/// Replay the instruction and return the machine hash it produces
fn replay(claim: &OneStepProof) -> Result<H256, VerifierError> {
    let step = decode(claim)?;

    // Step 5: gas
    if claim.gas != step.info.gas {
        return Err(VerifierError::GasMismatch {
            expected: step.info.gas,
            claimed: claim.gas,
        });
    }

    // The immediate is the top operand; with nothing to pop it stays pushed
    let mut operands = Vec::with_capacity(step.info.data_pops);
    let mut data_rest = step.data_rest;
    if let Some(immediate) = &step.code_point.op.immediate {
        if step.info.data_pops == 0 {
            data_rest = push_stack_hash(&immediate.hash(), &step.state.data_stack_hash);
        } else {
            operands.push(immediate.as_ref().clone());
        }
    }
    operands.extend(step.data_operands.iter().cloned());

    // Step 6: dispatch
    let err_handler = Value::HashOnly(step.state.err_handler_hash);
    let inbox = Value::HashOnly(claim.before_inbox);
    let ctx = StepContext {
        code_point: &step.code_point,
        register: &step.state.register,
        static_value: &step.state.static_value,
        err_handler: &err_handler,
        data_stack_empty: data_rest == empty_stack_hash(),
        aux_stack_empty: step.aux_rest == empty_stack_hash(),
        time_bounds: claim.time_bounds,
        inbox: &inbox,
    };
    let (result, arb_gas_remaining) = run_instruction(
        step.info,
        &operands,
        &step.aux_operands,
        &ctx,
        step.state.arb_gas_remaining,
    )?;
    check_effects(claim, &result.effect)?;

    // Step 7: post-state
    let mut after = step.state.clone();
    after.arb_gas_remaining = arb_gas_remaining;
    after.data_stack_hash = rebuild_stack_bottom_first(&result.data_pushes, &data_rest);
    after.aux_stack_hash = rebuild_stack_bottom_first(&result.aux_pushes, &step.aux_rest);
    if let Some(register) = result.register {
        after.register = register;
    }
    if let Some(handler) = &result.err_handler {
        after.err_handler_hash = handler.hash();
    }

    match &result.flow {
        ControlFlow::Next => after.inst_stack_hash = step.code_point.next_hash,
        ControlFlow::Jump(target) => after.inst_stack_hash = target.hash(),
        ControlFlow::Halt => after.status = MachineStatus::Halted,
        ControlFlow::Fault => {
            if step.state.has_no_handler() {
                after.status = MachineStatus::ErrorStop;
            } else {
                after.inst_stack_hash = step.state.err_handler_hash;
            }
        }
    }

    debug!(
        "Replayed {} from {}: flow {:?}, effect {:?}",
        step.info.name,
        short_hex(&claim.before_hash),
        result.flow,
        result.effect
    );

    Ok(after.hash())
}

fn rebuild_stack_bottom_first(pushes: &[Value], rest: &H256) -> H256 {
    pushes
        .iter()
        .fold(*rest, |acc, value| push_stack_hash(&value.hash(), &acc))
}

/// Verify a one-step proof
pub fn validate_proof(claim: &OneStepProof) -> Result<(), VerifierError> {
    let computed = replay(claim)?;
    if computed != claim.after_hash {
        return Err(VerifierError::MismatchedAfterHash {
            claimed: claim.after_hash,
            computed,
        });
    }
    Ok(())
}

/// Verify a one-step proof, returning 0 on acceptance and the error code of
/// the first failed check otherwise
pub fn validate_proof_code(claim: &OneStepProof) -> u32 {
    match validate_proof(claim) {
        Ok(()) => 0,
        Err(e) => {
            debug!("One-step proof rejected: {}", e);
            e.error_code()
        }
    }
}
