// src/interfaces/staking_interface.rs
//! Staking collaborator
//!
//! A concluded challenge is settled by exactly one `resolve_challenge` call
//! on the staking contract. The call names the challenge, the way the
//! on-chain staking contract knows its caller, so one participant may lose
//! any number of separate challenges.

use ethereum_types::Address;
use log::info;
use serde::Serialize;

use crate::challenge::ChallengeKind;
use crate::error_handling::StakingError;

/// Interface of the staking contract that settles challenges
pub trait StakingContract {
    /// Pay the winner of challenge `challenge_id` from the loser's stake
    fn resolve_challenge(
        &mut self,
        challenge_id: u64,
        winner: Address,
        loser: Address,
        challenge_type: ChallengeKind,
    ) -> Result<(), StakingError>;
}

/// A settled challenge as seen by the staking contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    /// Challenge that was settled
    pub challenge_id: u64,

    /// Party that keeps its stake
    pub winner: Address,

    /// Party whose stake is slashed
    pub loser: Address,

    /// Kind of challenge that was settled
    pub challenge_type: ChallengeKind,
}

/// In-memory staking contract that records every resolution
///
/// A challenge can only be resolved once; a second resolution of the same
/// challenge is refused.
#[derive(Debug, Default, Clone)]
pub struct RecordingStaking {
    resolutions: Vec<Resolution>,
}

impl RecordingStaking {
    /// Create an empty staking ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// All resolutions in call order
    pub fn resolutions(&self) -> &[Resolution] {
        &self.resolutions
    }
}

impl StakingContract for RecordingStaking {
    fn resolve_challenge(
        &mut self,
        challenge_id: u64,
        winner: Address,
        loser: Address,
        challenge_type: ChallengeKind,
    ) -> Result<(), StakingError> {
        if winner == loser {
            return Err(StakingError::InvalidParties(winner));
        }
        if self.resolutions.iter().any(|r| r.challenge_id == challenge_id) {
            return Err(StakingError::AlreadyResolved(challenge_id));
        }

        info!(
            "Resolving {:?} challenge {}: winner {:?}, loser {:?}",
            challenge_type, challenge_id, winner, loser
        );
        self.resolutions.push(Resolution {
            challenge_id,
            winner,
            loser,
            challenge_type,
        });
        Ok(())
    }
}
