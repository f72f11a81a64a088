// src/challenge/events.rs
//! Challenge events
//!
//! Every accepted transition appends one event to the challenge log. Events
//! are identified on chain by the Keccak-256 hash of their signature.

use ethereum_types::{H256, U256};
use serde::Serialize;

use super::assertion::{segments_from_arrays, AssertionSegment};
use super::bisection::Ticks;
use crate::error_handling::ChallengeError;
use crate::utils::keccak;

/// Payload of a `BisectedAssertion` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BisectedAssertion {
    /// Machine hashes at the child boundaries
    pub machine_hashes: Vec<H256>,

    /// Per-child inbox flags
    pub did_inbox_insns: Vec<bool>,

    /// Message accumulators at the child boundaries
    pub message_accs: Vec<H256>,

    /// Log accumulators at the child boundaries
    pub log_accs: Vec<H256>,

    /// Per-child gas
    pub gases: Vec<u64>,

    /// Steps in the bisected segment
    pub total_steps: u64,

    /// Deadline for the challenger's reply
    pub deadline: Ticks,
}

impl BisectedAssertion {
    /// Reconstruct the child segments an observer must choose from
    pub fn segments(&self) -> Result<Vec<AssertionSegment>, ChallengeError> {
        segments_from_arrays(
            &self.machine_hashes,
            &self.did_inbox_insns,
            &self.message_accs,
            &self.log_accs,
            &self.gases,
            self.total_steps,
        )
    }
}

/// Event emitted by a challenge transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ChallengeEvent {
    /// Challenge started
    InitiatedChallenge {
        /// Deadline for the challenger's first move
        deadline: Ticks,
    },

    /// Challenger picked a segment
    Continued {
        /// Index of the chosen segment
        segment_index: u64,

        /// Deadline for the asserter's reply
        deadline: Ticks,
    },

    /// Asserter subdivided an execution segment
    BisectedAssertion(BisectedAssertion),

    /// Asserter subdivided an inbox range
    BisectedInboxTop {
        /// Inbox accumulators at the child boundaries
        chain_hashes: Vec<H256>,

        /// Messages in the bisected range
        total_length: U256,

        /// Deadline for the challenger's reply
        deadline: Ticks,
    },

    /// Asserter subdivided a message range
    BisectedMessages {
        /// Inbox accumulators at the child boundaries
        chain_hashes: Vec<H256>,

        /// Message segment accumulators at the child boundaries
        segment_hashes: Vec<H256>,

        /// Messages in the bisected range
        total_length: U256,

        /// Deadline for the challenger's reply
        deadline: Ticks,
    },

    /// Asserter proved the disputed step
    OneStepProofCompleted,

    /// Asserter missed its deadline
    AsserterTimedOut,

    /// Challenger missed its deadline
    ChallengerTimedOut,
}

impl ChallengeEvent {
    /// Event name
    pub fn name(&self) -> &'static str {
        match self {
            ChallengeEvent::InitiatedChallenge { .. } => "InitiatedChallenge",
            ChallengeEvent::Continued { .. } => "Continued",
            ChallengeEvent::BisectedAssertion(_) => "BisectedAssertion",
            ChallengeEvent::BisectedInboxTop { .. } => "BisectedInboxTop",
            ChallengeEvent::BisectedMessages { .. } => "BisectedMessages",
            ChallengeEvent::OneStepProofCompleted => "OneStepProofCompleted",
            ChallengeEvent::AsserterTimedOut => "AsserterTimedOut",
            ChallengeEvent::ChallengerTimedOut => "ChallengerTimedOut",
        }
    }

    /// Canonical signature
    pub fn signature(&self) -> &'static str {
        match self {
            ChallengeEvent::InitiatedChallenge { .. } => "InitiatedChallenge(uint256)",
            ChallengeEvent::Continued { .. } => "Continued(uint256,uint256)",
            ChallengeEvent::BisectedAssertion(_) => {
                "BisectedAssertion(bytes32[],bool[],bytes32[],bytes32[],uint64[],uint64,uint256)"
            }
            ChallengeEvent::BisectedInboxTop { .. } => "BisectedInboxTop(bytes32[],uint256,uint256)",
            ChallengeEvent::BisectedMessages { .. } => {
                "BisectedMessages(bytes32[],bytes32[],uint256,uint256)"
            }
            ChallengeEvent::OneStepProofCompleted => "OneStepProofCompleted()",
            ChallengeEvent::AsserterTimedOut => "AsserterTimedOut()",
            ChallengeEvent::ChallengerTimedOut => "ChallengerTimedOut()",
        }
    }

    /// Topic: Keccak-256 of the signature
    pub fn topic(&self) -> H256 {
        keccak(self.signature().as_bytes())
    }
}
