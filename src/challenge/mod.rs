// src/challenge/mod.rs
//! Challenge protocol
//!
//! This module contains:
//! - the segment commitment tree
//! - assertion segments and their summary hashes
//! - the bisection state machine shared by every challenge kind
//! - execution, inbox-top and message challenge moves
//! - the manager that owns every open challenge and dispatches transactions
//! - an actor driving the manager from block notifications

pub mod actor;
pub mod assertion;
pub mod bisection;
pub mod events;
pub mod execution;
pub mod inbox_top;
pub mod merkle_tree;
pub mod messages;

pub use actor::{ChallengeActor, ChallengeCommand, ChallengeHandle};
pub use assertion::{
    assertion_hash, bisection_step_count, execution_data_hash, precondition_hash, Assertion,
    AssertionSegment, ExecutionBisection,
};
pub use bisection::{BisectionChallenge, ChallengeKind, ChallengeState, Ticks, Turn};
pub use events::{BisectedAssertion, ChallengeEvent};
pub use merkle_tree::{commitment_root, path_for, verify_inclusion, InclusionProof, MerkleTree};

use std::collections::{HashMap, VecDeque};

use borsh::{BorshDeserialize, BorshSerialize};
use ethereum_types::{Address, H256, U256};
use log::{debug, info, warn};

use crate::config::ChallengeConfig;
use crate::error_handling::ChallengeError;
use crate::interfaces::{ComponentError, StakingContract};
use crate::one_step_proof::OneStepProof;

/// Challenge transaction payload
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub enum ChallengeInstruction {
    /// Start the challenge; only the VM contract may send it
    InitializeBisection {
        /// Party defending the assertion
        asserter: [u8; 20],

        /// Party disputing the assertion
        challenger: [u8; 20],

        /// Time each party has to move
        challenge_period_ticks: u128,

        /// Root of the disputed assertion
        root: [u8; 32],

        /// Number of segments under the root
        segment_count: u64,
    },

    /// Pick one segment of the current root
    ChooseSegment {
        /// Index of the chosen segment
        segment_index: u64,

        /// Inclusion proof in wire form
        proof: Vec<u8>,

        /// Root the proof opens
        sub_root: [u8; 32],

        /// Summary hash of the chosen segment
        sub_hash: [u8; 32],
    },

    /// Subdivide the disputed execution segment
    BisectAssertion {
        /// Inbox hash shared by every child
        before_inbox: [u8; 32],

        /// Time bounds shared by every child
        time_bounds: [u128; 2],

        /// Machine hashes at the child boundaries
        machine_hashes: Vec<[u8; 32]>,

        /// Per-child inbox flags
        did_inbox_insns: Vec<bool>,

        /// Message accumulators at the child boundaries
        message_accs: Vec<[u8; 32]>,

        /// Log accumulators at the child boundaries
        log_accs: Vec<[u8; 32]>,

        /// Per-child gas
        gases: Vec<u64>,

        /// Steps in the disputed segment
        total_steps: u64,
    },

    /// Prove the disputed single step
    OneStepProof {
        /// Machine hash before the step
        before_hash: [u8; 32],

        /// Inbox hash
        before_inbox: [u8; 32],

        /// Time bounds
        time_bounds: [u128; 2],

        /// Machine hash after the step
        after_hash: [u8; 32],

        /// Whether the step read the inbox
        did_inbox_insn: bool,

        /// Message accumulator before the step
        first_message: [u8; 32],

        /// Message accumulator after the step
        last_message: [u8; 32],

        /// Log accumulator before the step
        first_log: [u8; 32],

        /// Log accumulator after the step
        last_log: [u8; 32],

        /// Gas of the step
        gas: u64,

        /// Proof bytes
        proof: Vec<u8>,
    },

    /// Subdivide the disputed inbox range
    BisectInboxTop {
        /// Accumulators at the child boundaries
        chain_hashes: Vec<[u8; 32]>,

        /// Messages in the range, big endian
        total_length: [u8; 32],
    },

    /// Prove the disputed single inbox message
    OneStepProofInboxTop {
        /// Accumulator before the message
        lower: [u8; 32],

        /// Hash of the message
        message_hash: [u8; 32],
    },

    /// Subdivide the disputed message range
    BisectMessages {
        /// Inbox accumulators at the child boundaries
        chain_hashes: Vec<[u8; 32]>,

        /// Message segment accumulators at the child boundaries
        segment_hashes: Vec<[u8; 32]>,

        /// Messages in the range, big endian
        total_length: [u8; 32],
    },

    /// Prove the disputed single message on both chains
    OneStepProofMessages {
        /// Inbox accumulator before the message
        lower_inbox: [u8; 32],

        /// Message segment accumulator before the message
        lower_messages: [u8; 32],

        /// Hash of the message
        message_hash: [u8; 32],
    },

    /// Settle an expired challenge
    TimeoutChallenge,
}

fn raw_hashes(hashes: &[H256]) -> Vec<[u8; 32]> {
    hashes.iter().map(|h| h.to_fixed_bytes()).collect()
}

fn hashes(raw: &[[u8; 32]]) -> Vec<H256> {
    raw.iter().map(|h| H256::from(*h)).collect()
}

impl ChallengeInstruction {
    /// Decode a transaction payload
    pub fn unpack(data: &[u8]) -> Result<Self, ChallengeError> {
        Self::try_from_slice(data).map_err(|e| ChallengeError::Deserialization(e.to_string()))
    }

    /// Encode as a transaction payload
    pub fn pack(&self) -> std::io::Result<Vec<u8>> {
        self.try_to_vec()
    }

    /// Choose segment `index` with its inclusion proof
    pub fn choose_segment(index: u64, proof: &InclusionProof, sub_root: H256, sub_hash: H256) -> Self {
        ChallengeInstruction::ChooseSegment {
            segment_index: index,
            proof: proof.to_bytes(),
            sub_root: sub_root.to_fixed_bytes(),
            sub_hash: sub_hash.to_fixed_bytes(),
        }
    }

    /// Bisect with the given children
    pub fn bisect_assertion(bisection: &ExecutionBisection) -> Self {
        ChallengeInstruction::BisectAssertion {
            before_inbox: bisection.before_inbox.to_fixed_bytes(),
            time_bounds: bisection.time_bounds,
            machine_hashes: raw_hashes(&bisection.machine_hashes),
            did_inbox_insns: bisection.did_inbox_insns.clone(),
            message_accs: raw_hashes(&bisection.message_accs),
            log_accs: raw_hashes(&bisection.log_accs),
            gases: bisection.gases.clone(),
            total_steps: bisection.total_steps,
        }
    }

    /// Submit a one-step proof
    pub fn one_step_proof(claim: &OneStepProof) -> Self {
        ChallengeInstruction::OneStepProof {
            before_hash: claim.before_hash.to_fixed_bytes(),
            before_inbox: claim.before_inbox.to_fixed_bytes(),
            time_bounds: claim.time_bounds,
            after_hash: claim.after_hash.to_fixed_bytes(),
            did_inbox_insn: claim.did_inbox_insn,
            first_message: claim.first_message.to_fixed_bytes(),
            last_message: claim.last_message.to_fixed_bytes(),
            first_log: claim.first_log.to_fixed_bytes(),
            last_log: claim.last_log.to_fixed_bytes(),
            gas: claim.gas,
            proof: claim.proof.clone(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ChallengeInstruction::InitializeBisection { .. } => "initialize_bisection",
            ChallengeInstruction::ChooseSegment { .. } => "choose_segment",
            ChallengeInstruction::BisectAssertion { .. } => "bisect_assertion",
            ChallengeInstruction::OneStepProof { .. } => "one_step_proof",
            ChallengeInstruction::BisectInboxTop { .. } => "bisect_inbox_top",
            ChallengeInstruction::OneStepProofInboxTop { .. } => "one_step_proof_inbox_top",
            ChallengeInstruction::BisectMessages { .. } => "bisect_messages",
            ChallengeInstruction::OneStepProofMessages { .. } => "one_step_proof_messages",
            ChallengeInstruction::TimeoutChallenge => "timeout_challenge",
        }
    }
}

/// Owner of every open challenge
///
/// Transactions are applied one at a time against the current ledger time.
/// A challenge accepts at most one transition per block. Once resolved, a
/// challenge leaves play and only a bounded archive of recent records is
/// kept for lookups.
#[derive(Debug)]
pub struct ChallengeManager<S: StakingContract> {
    config: ChallengeConfig,

    /// Contract allowed to initialise challenges
    vm_address: Address,

    staking: S,

    challenges: HashMap<u64, BisectionChallenge>,

    /// Block of the last accepted transition per open challenge
    last_moves: HashMap<u64, u64>,

    /// Resolved challenges, oldest first
    archive: VecDeque<BisectionChallenge>,

    next_id: u64,

    block: u64,

    now: Ticks,
}

impl<S: StakingContract> ChallengeManager<S> {
    /// Create a manager at block zero
    pub fn new(vm_address: Address, config: ChallengeConfig, staking: S) -> Self {
        Self {
            config,
            vm_address,
            staking,
            challenges: HashMap::new(),
            last_moves: HashMap::new(),
            archive: VecDeque::new(),
            next_id: 0,
            block: 0,
            now: Ticks::ZERO,
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &ChallengeConfig {
        &self.config
    }

    /// The staking collaborator
    pub fn staking(&self) -> &S {
        &self.staking
    }

    /// Current ledger block
    pub fn current_block(&self) -> u64 {
        self.block
    }

    /// Current ledger time
    pub fn now(&self) -> Ticks {
        self.now
    }

    /// Advance the ledger to `block`
    ///
    /// Ledger time never moves backwards; a stale block is ignored.
    pub fn new_block(&mut self, block: u64) -> Ticks {
        if block < self.block {
            warn!("Ignoring stale block {} (current {})", block, self.block);
            return self.now;
        }
        self.block = block;
        self.now = self.config.block_ticks(block);
        self.now
    }

    /// Create an uninitialised challenge and return its identifier
    pub fn create_challenge(&mut self, kind: ChallengeKind) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.challenges.insert(id, BisectionChallenge::new(id, kind));
        debug!("Created {:?} challenge {}", kind, id);
        id
    }

    /// Look up an open or recently resolved challenge
    pub fn challenge(&self, challenge_id: u64) -> Option<&BisectionChallenge> {
        self.challenges
            .get(&challenge_id)
            .or_else(|| self.archived(challenge_id))
    }

    /// Every open challenge, in no particular order
    pub fn challenges(&self) -> impl Iterator<Item = &BisectionChallenge> {
        self.challenges.values()
    }

    /// Resolved challenges still in the archive, oldest first
    pub fn resolved(&self) -> impl Iterator<Item = &BisectionChallenge> {
        self.archive.iter()
    }

    fn archived(&self, challenge_id: u64) -> Option<&BisectionChallenge> {
        self.archive.iter().find(|c| c.id == challenge_id)
    }

    /// Take a resolved challenge out of play
    fn retire(&mut self, challenge_id: u64) {
        self.last_moves.remove(&challenge_id);
        let challenge = match self.challenges.remove(&challenge_id) {
            Some(challenge) => challenge,
            None => return,
        };
        debug!("Challenge {} resolved and archived", challenge_id);

        if self.config.archive_capacity == 0 {
            return;
        }
        while self.archive.len() >= self.config.archive_capacity {
            self.archive.pop_front();
        }
        self.archive.push_back(challenge);
    }

    /// Decode and apply a transaction
    pub fn process_instruction(
        &mut self,
        challenge_id: u64,
        sender: Address,
        data: &[u8],
    ) -> Result<(), ChallengeError> {
        let instruction = ChallengeInstruction::unpack(data)?;
        self.execute(challenge_id, sender, &instruction)
    }

    /// Apply a decoded transaction
    pub fn execute(
        &mut self,
        challenge_id: u64,
        sender: Address,
        instruction: &ChallengeInstruction,
    ) -> Result<(), ChallengeError> {
        if self.last_moves.get(&challenge_id) == Some(&self.block) {
            return Err(ChallengeError::BlockAlreadyUsed {
                challenge_id,
                block: self.block,
            });
        }

        let result = self.dispatch(challenge_id, sender, instruction);
        match &result {
            Ok(()) => {
                info!(
                    "Challenge {}: {} from {:?} accepted at block {}",
                    challenge_id,
                    instruction.name(),
                    sender,
                    self.block
                );
                let resolved = self
                    .challenges
                    .get(&challenge_id)
                    .map_or(false, BisectionChallenge::is_concluded);
                if resolved {
                    self.retire(challenge_id);
                } else {
                    self.last_moves.insert(challenge_id, self.block);
                }
            }
            Err(e) => warn!(
                "Challenge {}: {} from {:?} rejected ({}): {}",
                challenge_id,
                instruction.name(),
                sender,
                e.error_code(),
                e
            ),
        }
        result
    }

    fn dispatch(
        &mut self,
        challenge_id: u64,
        sender: Address,
        instruction: &ChallengeInstruction,
    ) -> Result<(), ChallengeError> {
        let now = self.now;
        if let Some(resolved) = self.archived(challenge_id) {
            return Err(ChallengeError::InvalidState {
                operation: instruction.name(),
                state: resolved.state,
            });
        }
        let challenge = self
            .challenges
            .get_mut(&challenge_id)
            .ok_or(ChallengeError::UnknownChallenge(challenge_id))?;

        match instruction {
            ChallengeInstruction::InitializeBisection {
                asserter,
                challenger,
                challenge_period_ticks,
                root,
                segment_count,
            } => {
                if sender != self.vm_address {
                    return Err(ChallengeError::Unauthorized(sender));
                }
                let requested = Ticks(*challenge_period_ticks);
                if requested != self.config.challenge_period() {
                    return Err(ChallengeError::PeriodMismatch {
                        requested,
                        configured: self.config.challenge_period(),
                    });
                }
                challenge.initialize(
                    sender,
                    Address::from(*asserter),
                    Address::from(*challenger),
                    requested,
                    H256::from(*root),
                    *segment_count,
                    now,
                )
            }
            ChallengeInstruction::ChooseSegment {
                segment_index,
                proof,
                sub_root,
                sub_hash,
            } => {
                let proof = InclusionProof::from_bytes(proof)?;
                challenge.choose_segment(
                    sender,
                    *segment_index,
                    &proof,
                    H256::from(*sub_root),
                    H256::from(*sub_hash),
                    now,
                )
            }
            ChallengeInstruction::BisectAssertion {
                before_inbox,
                time_bounds,
                machine_hashes,
                did_inbox_insns,
                message_accs,
                log_accs,
                gases,
                total_steps,
            } => {
                let bisection = ExecutionBisection {
                    before_inbox: H256::from(*before_inbox),
                    time_bounds: *time_bounds,
                    machine_hashes: hashes(machine_hashes),
                    did_inbox_insns: did_inbox_insns.clone(),
                    message_accs: hashes(message_accs),
                    log_accs: hashes(log_accs),
                    gases: gases.clone(),
                    total_steps: *total_steps,
                };
                execution::bisect_assertion(challenge, sender, &bisection, &self.config, now)
            }
            ChallengeInstruction::OneStepProof {
                before_hash,
                before_inbox,
                time_bounds,
                after_hash,
                did_inbox_insn,
                first_message,
                last_message,
                first_log,
                last_log,
                gas,
                proof,
            } => {
                let claim = OneStepProof {
                    before_hash: H256::from(*before_hash),
                    before_inbox: H256::from(*before_inbox),
                    time_bounds: *time_bounds,
                    after_hash: H256::from(*after_hash),
                    did_inbox_insn: *did_inbox_insn,
                    first_message: H256::from(*first_message),
                    last_message: H256::from(*last_message),
                    first_log: H256::from(*first_log),
                    last_log: H256::from(*last_log),
                    gas: *gas,
                    proof: proof.clone(),
                };
                execution::one_step_proof(challenge, sender, &claim, now, &mut self.staking)
            }
            ChallengeInstruction::BisectInboxTop {
                chain_hashes,
                total_length,
            } => inbox_top::bisect_inbox_top(
                challenge,
                sender,
                &hashes(chain_hashes),
                U256::from_big_endian(total_length),
                &self.config,
                now,
            ),
            ChallengeInstruction::OneStepProofInboxTop { lower, message_hash } => {
                inbox_top::one_step_proof_inbox_top(
                    challenge,
                    sender,
                    H256::from(*lower),
                    H256::from(*message_hash),
                    now,
                    &mut self.staking,
                )
            }
            ChallengeInstruction::BisectMessages {
                chain_hashes,
                segment_hashes,
                total_length,
            } => messages::bisect_messages(
                challenge,
                sender,
                &hashes(chain_hashes),
                &hashes(segment_hashes),
                U256::from_big_endian(total_length),
                &self.config,
                now,
            ),
            ChallengeInstruction::OneStepProofMessages {
                lower_inbox,
                lower_messages,
                message_hash,
            } => messages::one_step_proof_messages(
                challenge,
                sender,
                H256::from(*lower_inbox),
                H256::from(*lower_messages),
                H256::from(*message_hash),
                now,
                &mut self.staking,
            ),
            ChallengeInstruction::TimeoutChallenge => challenge.timeout(now, &mut self.staking),
        }
    }

    /// Settle every open challenge whose deadline has passed
    ///
    /// Returns the identifiers of the challenges that timed out. A challenge
    /// whose settlement fails stays open and is retried on the next call.
    pub fn check_timeouts(&mut self) -> Vec<u64> {
        let now = self.now;
        let mut expired: Vec<u64> = self
            .challenges
            .values()
            .filter(|c| {
                !matches!(c.state, ChallengeState::Uninitialised | ChallengeState::Concluded)
                    && now > c.deadline
            })
            .map(|c| c.id)
            .collect();
        expired.sort_unstable();

        let vm_address = self.vm_address;
        let mut settled = Vec::with_capacity(expired.len());
        for id in expired {
            match self.execute(id, vm_address, &ChallengeInstruction::TimeoutChallenge) {
                Ok(()) => settled.push(id),
                Err(e) => warn!(
                    "Challenge {}: expired at {} but could not be settled ({}): {}",
                    id,
                    now,
                    e.error_code(),
                    e
                ),
            }
        }
        settled
    }
}
