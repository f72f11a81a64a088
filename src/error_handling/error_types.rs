// src/error_handling/error_types.rs
//! Error types for the challenge protocol
//!
//! Each component has its own error enum with a disjoint range of numeric
//! codes:
//! - 1000s: value codec
//! - 2000s: segment commitment
//! - 3000s: one-step verifier
//! - 4000s: challenge state machine
//! - 5000s: staking collaborator
//! - 6000s: configuration
//! - 7000s: off-chain machine

use ethereum_types::{Address, H256};
use thiserror::Error;

use crate::challenge::{ChallengeKind, ChallengeState, Ticks, Turn};
use crate::interfaces::ComponentError;

/// Errors raised while decoding or constructing values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended before the value was complete
    #[error("Truncated input: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        /// Offset of the read that failed
        offset: usize,

        /// Bytes the read needed
        needed: usize,

        /// Bytes left in the input
        available: usize,
    },

    /// Structurally invalid value
    #[error("Malformed value: {0}")]
    MalformedValue(String),
}

impl ComponentError for CodecError {
    fn error_code(&self) -> u32 {
        match self {
            CodecError::Truncated { .. } => 1000,
            CodecError::MalformedValue(_) => 1001,
        }
    }
}

/// Errors raised by the segment commitment tree
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommitmentError {
    /// A commitment over zero segments
    #[error("Commitment over zero segments")]
    EmptyCommitment,

    /// Inclusion proof does not lead to the committed root
    #[error("Invalid inclusion proof for segment {segment_index}")]
    InvalidInclusion {
        /// Segment the proof claimed to open
        segment_index: u64,
    },

    /// Proof bytes could not be decoded
    #[error("Malformed inclusion proof: {0}")]
    MalformedProof(String),
}

impl ComponentError for CommitmentError {
    fn error_code(&self) -> u32 {
        match self {
            CommitmentError::EmptyCommitment => 2000,
            CommitmentError::InvalidInclusion { .. } => 2001,
            CommitmentError::MalformedProof(_) => 2002,
        }
    }
}

/// Reasons a one-step proof is rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifierError {
    /// Proof bytes could not be decoded
    #[error("{0}")]
    Codec(#[from] CodecError),

    /// The decoded pre-state does not hash to the claimed before hash
    #[error("Mismatched before hash: {0}")]
    MismatchedBeforeHash(String),

    /// Opcode missing from the opcode table
    #[error("Invalid opcode 0x{0:02x}")]
    InvalidOpcode(u8),

    /// Claimed gas differs from the opcode's gas cost
    #[error("Gas mismatch: opcode costs {expected}, claimed {claimed}")]
    GasMismatch {
        /// Gas cost from the opcode table
        expected: u64,

        /// Gas claimed by the asserter
        claimed: u64,
    },

    /// Observable effects disagree with the claimed accumulators or inbox flag
    #[error("Effect mismatch: {0}")]
    EffectMismatch(String),

    /// The rebuilt post-state does not hash to the claimed after hash
    #[error("Mismatched after hash: claimed {claimed:?}, computed {computed:?}")]
    MismatchedAfterHash {
        /// After hash claimed by the asserter
        claimed: H256,

        /// After hash computed by replaying the instruction
        computed: H256,
    },

    /// Proof bytes left over after decoding
    #[error("Proof has {0} unread trailing bytes")]
    TrailingBytes(usize),
}

impl ComponentError for VerifierError {
    fn error_code(&self) -> u32 {
        match self {
            VerifierError::Codec(e) => e.error_code(),
            VerifierError::MismatchedBeforeHash(_) => 3000,
            VerifierError::InvalidOpcode(_) => 3001,
            VerifierError::GasMismatch { .. } => 3002,
            VerifierError::EffectMismatch(_) => 3003,
            VerifierError::MismatchedAfterHash { .. } => 3004,
            VerifierError::TrailingBytes(_) => 3005,
        }
    }
}

/// Staking collaborator failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StakingError {
    /// Winner and loser are the same participant
    #[error("Winner and loser are both {0:?}")]
    InvalidParties(Address),

    /// The challenge has already been resolved
    #[error("Challenge {0} was already resolved")]
    AlreadyResolved(u64),
}

impl ComponentError for StakingError {
    fn error_code(&self) -> u32 {
        match self {
            StakingError::InvalidParties(_) => 5000,
            StakingError::AlreadyResolved(_) => 5001,
        }
    }
}

/// Errors raised by the challenge state machine
///
/// Any of these rejects the transaction; the challenge record is left
/// untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChallengeError {
    /// Segment commitment failure
    #[error("{0}")]
    Commitment(#[from] CommitmentError),

    /// One-step proof rejected
    #[error("One-step proof rejected: {0}")]
    Verifier(#[from] VerifierError),

    /// Staking collaborator refused the resolution
    #[error("Staking failure: {0}")]
    Staking(#[from] StakingError),

    /// Move sent by a party whose turn it is not
    #[error("Wrong turn: {sender:?} moved while waiting for the {expected}")]
    WrongTurn {
        /// Party the challenge is waiting for
        expected: Turn,

        /// Sender of the rejected move
        sender: Address,
    },

    /// Move sent after the deadline
    #[error("Deadline {deadline} expired at {now}")]
    Expired {
        /// Ledger time of the move
        now: Ticks,

        /// Current deadline
        deadline: Ticks,
    },

    /// Timeout requested before the deadline passed
    #[error("Deadline {deadline} has not passed at {now}")]
    NotExpired {
        /// Ledger time of the request
        now: Ticks,

        /// Current deadline
        deadline: Ticks,
    },

    /// Operation not allowed in the current state
    #[error("Operation {operation} not allowed in state {state:?}")]
    InvalidState {
        /// Rejected operation
        operation: &'static str,

        /// State the challenge was in
        state: ChallengeState,
    },

    /// Operation belongs to another kind of challenge
    #[error("Operation {operation} not supported by {kind:?} challenges")]
    KindMismatch {
        /// Rejected operation
        operation: &'static str,

        /// Kind of the addressed challenge
        kind: ChallengeKind,
    },

    /// Bisection segments do not form a valid chain
    #[error("Malformed segment chain: {0}")]
    MalformedSegmentChain(String),

    /// Supplied data does not reproduce the disputed segment
    #[error("Arguments do not match the disputed segment {0:?}")]
    MismatchedSegment(H256),

    /// Caller not allowed to perform the operation
    #[error("Unauthorized caller {0:?}")]
    Unauthorized(Address),

    /// Tick arithmetic overflowed
    #[error("Tick overflow: {0}")]
    TickOverflow(String),

    /// No challenge with this identifier
    #[error("Unknown challenge {0}")]
    UnknownChallenge(u64),

    /// Instruction bytes could not be decoded
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// A transition for this challenge was already accepted in this block
    #[error("Challenge {challenge_id} already moved in block {block}")]
    BlockAlreadyUsed {
        /// Challenge addressed by the transaction
        challenge_id: u64,

        /// Current ledger block
        block: u64,
    },

    /// The challenge actor is no longer running
    #[error("Challenge actor stopped")]
    ActorStopped,

    /// Initialisation asked for a challenge period other than the configured one
    #[error("Challenge period {requested} differs from the configured {configured}")]
    PeriodMismatch {
        /// Period in the initialisation
        requested: Ticks,

        /// Period from the configuration
        configured: Ticks,
    },
}

impl ComponentError for ChallengeError {
    fn error_code(&self) -> u32 {
        match self {
            ChallengeError::Commitment(e) => e.error_code(),
            ChallengeError::Verifier(e) => e.error_code(),
            ChallengeError::Staking(e) => e.error_code(),
            ChallengeError::WrongTurn { .. } => 4000,
            ChallengeError::Expired { .. } => 4001,
            ChallengeError::NotExpired { .. } => 4002,
            ChallengeError::InvalidState { .. } => 4003,
            ChallengeError::KindMismatch { .. } => 4004,
            ChallengeError::MalformedSegmentChain(_) => 4005,
            ChallengeError::MismatchedSegment(_) => 4006,
            ChallengeError::Unauthorized(_) => 4007,
            ChallengeError::TickOverflow(_) => 4008,
            ChallengeError::UnknownChallenge(_) => 4009,
            ChallengeError::Deserialization(_) => 4010,
            ChallengeError::BlockAlreadyUsed { .. } => 4011,
            ChallengeError::ActorStopped => 4012,
            ChallengeError::PeriodMismatch { .. } => 4013,
        }
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration is not valid JSON for the expected shape
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// Configuration values are out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ComponentError for ConfigError {
    fn error_code(&self) -> u32 {
        match self {
            ConfigError::Io(_) => 6000,
            ConfigError::Parse(_) => 6001,
            ConfigError::Invalid(_) => 6002,
        }
    }
}

/// Errors of the off-chain machine that produces one-step proofs
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MachineError {
    /// Machine is halted or error-stopped
    #[error("Machine is not runnable")]
    NotRunnable,

    /// Program counter points past the end of the program
    #[error("No instruction at pc {0}")]
    NoInstruction(u64),

    /// Jump target does not belong to the loaded program
    #[error("Jump target {0:?} is not a code point of this program")]
    ForeignCodePoint(H256),

    /// Instruction cannot be executed on the current stack
    #[error("Cannot execute instruction: {0}")]
    Execution(#[from] VerifierError),

    /// Value construction failed
    #[error("{0}")]
    Codec(#[from] CodecError),
}

impl ComponentError for MachineError {
    fn error_code(&self) -> u32 {
        match self {
            MachineError::NotRunnable => 7000,
            MachineError::NoInstruction(_) => 7001,
            MachineError::ForeignCodePoint(_) => 7002,
            MachineError::Execution(e) => e.error_code(),
            MachineError::Codec(e) => e.error_code(),
        }
    }
}
