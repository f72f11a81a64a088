// src/lib.rs
//! AVM execution challenges
//!
//! This crate models the interactive fraud-proof protocol of an AVM
//! optimistic rollup:
//! - Value and machine codec (canonical hashing and wire encoding)
//! - Segment commitment tree
//! - Bisection challenges over execution and inbox ranges
//! - One-step proof verifier and the off-chain machine that feeds it
//! - Off-chain validator helpers

pub mod challenge;
pub mod config;
pub mod error_handling;
pub mod interfaces;
pub mod one_step_proof;
pub mod utils;
pub mod validator;
pub mod value;

pub use challenge::{
    Assertion, AssertionSegment, BisectionChallenge, ChallengeActor, ChallengeEvent,
    ChallengeHandle, ChallengeInstruction, ChallengeKind, ChallengeManager, ChallengeState,
    ExecutionBisection, InclusionProof, MerkleTree, Ticks, Turn,
};
pub use config::ChallengeConfig;
pub use error_handling::{
    ChallengeError, CodecError, CommitmentError, ConfigError, MachineError, StakingError,
    VerifierError,
};
pub use interfaces::{ComponentError, InboxOracle, RecordingStaking, StakingContract, StaticInbox};
pub use one_step_proof::{validate_proof, validate_proof_code, Machine, OneStepProof, Program};
pub use validator::{ExecutionTrace, Validator};
pub use value::{hash_value, CodePoint, MachineState, Operation, Value};

/// Ticks per ledger block
pub const TICKS_PER_BLOCK: u64 = 1000;

/// Initialise `env_logger` with an `info` default filter
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
