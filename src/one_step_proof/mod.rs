// src/one_step_proof/mod.rs
//! One-step proof system
//!
//! This module contains:
//! - the opcode table
//! - instruction semantics shared by prover and verifier
//! - the one-step verifier
//! - an off-chain machine that produces one-step proofs

pub mod execution;
pub mod machine;
pub mod opcodes;
pub mod verification;

pub use execution::{ControlFlow, Effect, StepContext, StepResult};
pub use machine::{Machine, Program, StepOutcome};
pub use opcodes::{lookup, OpcodeInfo, MAX_OPCODE_GAS, ONE_STEP_GAS_THRESHOLD, OPCODES};
pub use verification::{validate_proof, validate_proof_code, OneStepProof};
