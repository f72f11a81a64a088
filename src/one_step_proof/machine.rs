// src/one_step_proof/machine.rs
//! Off-chain AVM machine
//!
//! Holds full stacks and the loaded program, executes one instruction at a
//! time with the verifier's semantics, and emits the proof the verifier
//! needs to replay that instruction.

use std::collections::HashMap;
use std::sync::Arc;

use ethereum_types::{H256, U256};
use log::trace;

use super::execution::{run_instruction, ControlFlow, Effect, StepContext};
use super::opcodes::{self, OpcodeInfo};
use super::verification::OneStepProof;
use crate::error_handling::{MachineError, VerifierError};
use crate::interfaces::InboxOracle;
use crate::utils::accumulate;
use crate::value::{
    marshal_shallow, stack_hash, CodePoint, MachineState, MachineStatus, Operation, Value,
};

/// A loaded program: code points linked back to front
#[derive(Debug, Clone)]
pub struct Program {
    code: Vec<CodePoint>,
    index: HashMap<H256, u64>,
}

impl Program {
    /// Link `ops` into a program ending in the error code point
    pub fn new(ops: Vec<Operation>) -> Self {
        let len = ops.len() as u64;
        let mut code = Vec::with_capacity(ops.len() + 1);
        let terminal = CodePoint::new(len, Operation::new(opcodes::ERROR), H256::zero());
        let mut next_hash = terminal.hash();
        code.push(terminal);

        for (pc, op) in ops.into_iter().enumerate().rev() {
            let code_point = CodePoint::new(pc as u64, op, next_hash);
            next_hash = code_point.hash();
            code.push(code_point);
        }
        code.reverse();

        let mut index = HashMap::new();
        for code_point in &code {
            index.entry(code_point.hash()).or_insert(code_point.pc);
        }

        Self { code, index }
    }

    /// Code point at `pc`
    pub fn code_point(&self, pc: u64) -> Option<&CodePoint> {
        self.code.get(pc as usize)
    }

    /// The terminal error code point
    pub fn error_code_point(&self) -> &CodePoint {
        // `new` always pushes the terminal code point
        &self.code[self.code.len() - 1]
    }

    /// Position of the code point with the given hash
    pub fn pc_of(&self, hash: &H256) -> Option<u64> {
        self.index.get(hash).copied()
    }

    /// Number of code points, the error code point included
    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// Always false; every program holds its error code point
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }
}

/// Result of executing one instruction
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Executed opcode
    pub opcode: u8,

    /// Gas charged
    pub gas: u64,

    /// Machine hash before the step
    pub before_hash: H256,

    /// Machine hash after the step
    pub after_hash: H256,

    /// Hash of the inbox the step could read
    pub before_inbox: H256,

    /// Time bounds the step ran under
    pub time_bounds: [u128; 2],

    /// I/O performed
    pub effect: Effect,

    /// Proof of the step
    pub proof: Vec<u8>,
}

impl StepOutcome {
    /// Whether the step read the inbox
    pub fn did_inbox_insn(&self) -> bool {
        self.effect == Effect::Inbox
    }

    /// Message accumulator after the step
    pub fn next_message_acc(&self, acc: &H256) -> H256 {
        match &self.effect {
            Effect::Send(value) => accumulate(acc, &value.hash()),
            _ => *acc,
        }
    }

    /// Log accumulator after the step
    pub fn next_log_acc(&self, acc: &H256) -> H256 {
        match &self.effect {
            Effect::Log(value) => accumulate(acc, &value.hash()),
            _ => *acc,
        }
    }

    /// The verifier claim for this step given the accumulators before it
    pub fn claim(&self, first_message: H256, first_log: H256) -> OneStepProof {
        OneStepProof {
            before_hash: self.before_hash,
            before_inbox: self.before_inbox,
            time_bounds: self.time_bounds,
            after_hash: self.after_hash,
            did_inbox_insn: self.did_inbox_insn(),
            first_message,
            last_message: self.next_message_acc(&first_message),
            first_log,
            last_log: self.next_log_acc(&first_log),
            gas: self.gas,
            proof: self.proof.clone(),
        }
    }
}

/// An AVM machine with full state
#[derive(Debug, Clone)]
pub struct Machine {
    program: Arc<Program>,
    pc: u64,
    data_stack: Vec<Value>,
    aux_stack: Vec<Value>,
    register: Value,
    static_value: Value,
    err_handler: CodePoint,
    arb_gas_remaining: U256,
    status: MachineStatus,
}

impl Machine {
    /// Machine at the start of `program` with empty stacks and no handler
    pub fn new(program: Program, static_value: Value, arb_gas: U256) -> Self {
        let err_handler = program.error_code_point().clone();
        Self {
            program: Arc::new(program),
            pc: 0,
            data_stack: Vec::new(),
            aux_stack: Vec::new(),
            register: Value::empty_tuple(),
            static_value,
            err_handler,
            arb_gas_remaining: arb_gas,
            status: MachineStatus::Extensive,
        }
    }

    /// Replace the data stack; values are given bottom first
    pub fn with_data_stack(mut self, values: Vec<Value>) -> Self {
        self.data_stack = values;
        self
    }

    /// Data stack, bottom first
    pub fn data_stack(&self) -> &[Value] {
        &self.data_stack
    }

    /// Aux stack, bottom first
    pub fn aux_stack(&self) -> &[Value] {
        &self.aux_stack
    }

    /// Register value
    pub fn register(&self) -> &Value {
        &self.register
    }

    /// Run status
    pub fn status(&self) -> MachineStatus {
        self.status
    }

    /// Program counter
    pub fn pc(&self) -> u64 {
        self.pc
    }

    /// Remaining arb gas
    pub fn arb_gas_remaining(&self) -> U256 {
        self.arb_gas_remaining
    }

    /// Code point executed next
    pub fn current_code_point(&self) -> Result<&CodePoint, MachineError> {
        self.program
            .code_point(self.pc)
            .ok_or(MachineError::NoInstruction(self.pc))
    }

    /// The eight hashed fields of the machine
    pub fn state(&self) -> MachineState {
        let inst_stack_hash = self
            .program
            .code_point(self.pc)
            .map(CodePoint::hash)
            .unwrap_or_default();

        MachineState {
            status: self.status,
            inst_stack_hash,
            data_stack_hash: stack_hash(&self.data_stack),
            aux_stack_hash: stack_hash(&self.aux_stack),
            register: self.register.clone(),
            static_value: self.static_value.clone(),
            err_handler_hash: self.err_handler.hash(),
            arb_gas_remaining: self.arb_gas_remaining,
            err_code_point_hash: self.program.error_code_point().hash(),
        }
    }

    /// Machine hash
    pub fn hash(&self) -> H256 {
        self.state().hash()
    }

    fn operands_from_stack(info: &OpcodeInfo, code_point: &CodePoint) -> usize {
        match code_point.op.immediate {
            Some(_) => info.data_pops.saturating_sub(1),
            None => info.data_pops,
        }
    }

    /// Top `count` values of a stack, top first, with the rest of the stack
    fn split_top(stack: &[Value], count: usize) -> (Vec<Value>, &[Value]) {
        let taken = count.min(stack.len());
        let (rest, top) = stack.split_at(stack.len() - taken);
        (top.iter().rev().cloned().collect(), rest)
    }

    fn build_proof(&self, state: &MachineState, code_point: &CodePoint, info: &OpcodeInfo) -> Vec<u8> {
        let mut proof = Vec::new();
        state.marshal_for_proof(&mut proof);

        proof.push(code_point.op.opcode);
        match &code_point.op.immediate {
            Some(immediate) => {
                proof.push(1);
                marshal_shallow(immediate, &mut proof);
            }
            None => proof.push(0),
        }
        proof.extend_from_slice(code_point.next_hash.as_bytes());

        let (data_operands, data_rest) =
            Self::split_top(&self.data_stack, Self::operands_from_stack(info, code_point));
        proof.push(data_operands.len() as u8);
        for operand in &data_operands {
            marshal_shallow(operand, &mut proof);
        }
        proof.extend_from_slice(stack_hash(data_rest).as_bytes());

        let (aux_operands, aux_rest) = Self::split_top(&self.aux_stack, info.aux_pops);
        proof.push(aux_operands.len() as u8);
        for operand in &aux_operands {
            marshal_shallow(operand, &mut proof);
        }
        proof.extend_from_slice(stack_hash(aux_rest).as_bytes());

        proof
    }

    /// Execute the next instruction and return its proof
    pub fn step(
        &mut self,
        inbox: &dyn InboxOracle,
        time_bounds: [u128; 2],
    ) -> Result<StepOutcome, MachineError> {
        if self.status != MachineStatus::Extensive {
            return Err(MachineError::NotRunnable);
        }

        let code_point = self.current_code_point()?.clone();
        let opcode = code_point.op.opcode;
        let info = opcodes::lookup(opcode).ok_or(VerifierError::InvalidOpcode(opcode))?;

        let before = self.state();
        let before_hash = before.hash();
        let proof = self.build_proof(&before, &code_point, info);

        // Gather operands without touching the stacks
        let from_stack = Self::operands_from_stack(info, &code_point);
        let (stack_operands, data_rest) = Self::split_top(&self.data_stack, from_stack);
        let mut data_rest = data_rest.to_vec();
        let mut operands = Vec::with_capacity(info.data_pops);
        if let Some(immediate) = &code_point.op.immediate {
            if info.data_pops == 0 {
                data_rest.push(immediate.as_ref().clone());
            } else {
                operands.push(immediate.as_ref().clone());
            }
        }
        operands.extend(stack_operands);
        let (aux_operands, aux_rest) = Self::split_top(&self.aux_stack, info.aux_pops);
        let aux_rest = aux_rest.to_vec();

        let inbox_value = inbox.inbox_value();
        let err_handler = Value::CodePoint(self.err_handler.clone());
        let ctx = StepContext {
            code_point: &code_point,
            register: &self.register,
            static_value: &self.static_value,
            err_handler: &err_handler,
            data_stack_empty: data_rest.is_empty(),
            aux_stack_empty: aux_rest.is_empty(),
            time_bounds,
            inbox: &inbox_value,
        };
        let (result, arb_gas_remaining) =
            run_instruction(info, &operands, &aux_operands, &ctx, self.arb_gas_remaining)?;

        // Resolve control flow before committing anything
        let no_handler = self.err_handler.hash() == self.program.error_code_point().hash();
        let (pc, status) = match &result.flow {
            ControlFlow::Next => (self.pc + 1, MachineStatus::Extensive),
            ControlFlow::Jump(target) => {
                let pc = self
                    .program
                    .pc_of(&target.hash())
                    .ok_or(MachineError::ForeignCodePoint(target.hash()))?;
                (pc, MachineStatus::Extensive)
            }
            ControlFlow::Halt => (self.pc, MachineStatus::Halted),
            ControlFlow::Fault if no_handler => (self.pc, MachineStatus::ErrorStop),
            ControlFlow::Fault => {
                let pc = self
                    .program
                    .pc_of(&self.err_handler.hash())
                    .ok_or(MachineError::ForeignCodePoint(self.err_handler.hash()))?;
                (pc, MachineStatus::Extensive)
            }
        };
        let err_handler = match &result.err_handler {
            Some(handler) => {
                if self.program.pc_of(&handler.hash()).is_none() {
                    return Err(MachineError::ForeignCodePoint(handler.hash()));
                }
                Some(handler.clone())
            }
            None => None,
        };

        // Commit
        self.data_stack = data_rest;
        self.data_stack.extend(result.data_pushes.iter().cloned());
        self.aux_stack = aux_rest;
        self.aux_stack.extend(result.aux_pushes.iter().cloned());
        if let Some(register) = result.register {
            self.register = register;
        }
        if let Some(handler) = err_handler {
            self.err_handler = handler;
        }
        self.arb_gas_remaining = arb_gas_remaining;
        self.pc = pc;
        self.status = status;

        let after_hash = self.hash();
        trace!(
            "Executed {} at pc {}: {:?} -> {:?}",
            info.name,
            code_point.pc,
            before_hash,
            after_hash
        );

        Ok(StepOutcome {
            opcode,
            gas: info.gas,
            before_hash,
            after_hash,
            before_inbox: inbox_value.hash(),
            time_bounds,
            effect: result.effect,
            proof,
        })
    }
}
