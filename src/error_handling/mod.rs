// src/error_handling/mod.rs
//! Error handling for the challenge protocol
//!
//! Validation errors never advance a challenge: every operation checks all
//! of its preconditions before it mutates the record.

pub mod error_types;

// Re-export common types
pub use error_types::{
    ChallengeError, CodecError, CommitmentError, ConfigError, MachineError, StakingError,
    VerifierError,
};
