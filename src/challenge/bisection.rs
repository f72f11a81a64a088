// src/challenge/bisection.rs
//! Bisection state machine shared by every challenge kind
//!
//! A challenge narrows a dispute over a committed root by alternating moves:
//! the challenger picks one segment of the current root, the asserter
//! subdivides it, and so on until a single step can be proven. Each move
//! must come from the party whose turn it is and before the deadline. A
//! rejected move leaves the record exactly as it was.

use std::fmt;

use ethereum_types::{Address, H256};
use log::{debug, info, warn};
use serde::Serialize;

use super::events::ChallengeEvent;
use super::merkle_tree::{verify_inclusion, InclusionProof, MerkleTree};
use crate::error_handling::{ChallengeError, CommitmentError};
use crate::interfaces::StakingContract;
use crate::utils::short_hex;

/// Ledger time in ticks (1/1000 of a block by default)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct Ticks(pub u128);

impl Ticks {
    /// Time zero
    pub const ZERO: Ticks = Ticks(0);

    /// Ticks at the start of block `block`
    pub fn from_blocks(block: u64, ticks_per_block: u64) -> Self {
        Ticks(block as u128 * ticks_per_block as u128)
    }

    /// Checked addition
    pub fn checked_add(self, other: Ticks) -> Result<Ticks, ChallengeError> {
        self.0
            .checked_add(other.0)
            .map(Ticks)
            .ok_or_else(|| ChallengeError::TickOverflow(format!("{} + {}", self.0, other.0)))
    }
}

impl fmt::Display for Ticks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Party expected to move next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Turn {
    /// The party defending the assertion
    Asserter,

    /// The party disputing the assertion
    Challenger,
}

impl Turn {
    /// The opposing party
    pub fn other(self) -> Turn {
        match self {
            Turn::Asserter => Turn::Challenger,
            Turn::Challenger => Turn::Asserter,
        }
    }
}

impl fmt::Display for Turn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Turn::Asserter => write!(f, "asserter"),
            Turn::Challenger => write!(f, "challenger"),
        }
    }
}

/// Lifecycle state of a challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ChallengeState {
    /// Created but not yet initialised
    Uninitialised,

    /// Waiting for the asserter to subdivide or prove the current segment
    AwaitingBisection,

    /// Waiting for the challenger to pick a segment of the current root
    AwaitingContinuation,

    /// Settled; no further move is accepted
    Concluded,
}

/// What a challenge disputes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ChallengeKind {
    /// Messages appended to the inbox
    InboxTop,

    /// Messages a machine received against the inbox they came from
    Messages,

    /// Machine execution
    Execution,
}

impl ChallengeKind {
    /// Challenge type code reported to the staking contract
    pub fn code(self) -> u8 {
        match self {
            ChallengeKind::InboxTop => 0,
            ChallengeKind::Messages => 1,
            ChallengeKind::Execution => 2,
        }
    }

    /// Kind for a staking type code
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ChallengeKind::InboxTop),
            1 => Some(ChallengeKind::Messages),
            2 => Some(ChallengeKind::Execution),
            _ => None,
        }
    }
}

/// One challenge between an asserter and a challenger
#[derive(Debug, Clone, Serialize)]
pub struct BisectionChallenge {
    /// Challenge identifier
    pub id: u64,

    /// What is disputed
    pub kind: ChallengeKind,

    /// Contract allowed to initialise the challenge
    pub vm_address: Address,

    /// Party defending the assertion
    pub asserter: Address,

    /// Party disputing the assertion
    pub challenger: Address,

    /// Time each party has to move
    pub challenge_period: Ticks,

    /// Last tick at which the expected party may move
    pub deadline: Ticks,

    /// Lifecycle state
    pub state: ChallengeState,

    /// Party expected to move next
    pub turn: Turn,

    /// Commitment currently under dispute
    pub root: H256,

    /// Number of segments committed to by `root`
    pub segment_count: u64,

    events: Vec<ChallengeEvent>,
}

impl BisectionChallenge {
    /// Create an uninitialised challenge
    pub fn new(id: u64, kind: ChallengeKind) -> Self {
        Self {
            id,
            kind,
            vm_address: Address::zero(),
            asserter: Address::zero(),
            challenger: Address::zero(),
            challenge_period: Ticks::ZERO,
            deadline: Ticks::ZERO,
            state: ChallengeState::Uninitialised,
            turn: Turn::Challenger,
            root: H256::zero(),
            segment_count: 0,
            events: Vec::new(),
        }
    }

    /// Events emitted so far, oldest first
    pub fn events(&self) -> &[ChallengeEvent] {
        &self.events
    }

    /// Address of the party expected to move next
    pub fn expected_party(&self) -> Address {
        self.party(self.turn)
    }

    /// Address of a party
    pub fn party(&self, turn: Turn) -> Address {
        match turn {
            Turn::Asserter => self.asserter,
            Turn::Challenger => self.challenger,
        }
    }

    /// Whether the challenge is settled
    pub fn is_concluded(&self) -> bool {
        self.state == ChallengeState::Concluded
    }

    /// Start the challenge over an assertion root of `segment_count` segments
    #[allow(clippy::too_many_arguments)]
    pub fn initialize(
        &mut self,
        vm_address: Address,
        asserter: Address,
        challenger: Address,
        challenge_period: Ticks,
        root: H256,
        segment_count: u64,
        now: Ticks,
    ) -> Result<(), ChallengeError> {
        if self.state != ChallengeState::Uninitialised {
            return Err(ChallengeError::InvalidState {
                operation: "initialize",
                state: self.state,
            });
        }
        if segment_count == 0 {
            return Err(CommitmentError::EmptyCommitment.into());
        }
        if asserter == challenger {
            return Err(ChallengeError::Unauthorized(challenger));
        }
        let deadline = now.checked_add(challenge_period)?;

        self.vm_address = vm_address;
        self.asserter = asserter;
        self.challenger = challenger;
        self.challenge_period = challenge_period;
        self.root = root;
        self.segment_count = segment_count;
        self.deadline = deadline;
        self.turn = Turn::Challenger;
        self.state = ChallengeState::AwaitingContinuation;
        self.events.push(ChallengeEvent::InitiatedChallenge { deadline });

        info!(
            "Challenge {} initiated over {} ({} segments), deadline {}",
            self.id,
            short_hex(&root),
            segment_count,
            deadline
        );
        Ok(())
    }

    /// Check that `sender` may make `operation` from `expected` at `now`
    pub(crate) fn ensure_move(
        &self,
        operation: &'static str,
        expected: ChallengeState,
        sender: Address,
        now: Ticks,
    ) -> Result<(), ChallengeError> {
        if self.state != expected {
            return Err(ChallengeError::InvalidState {
                operation,
                state: self.state,
            });
        }
        if sender != self.expected_party() {
            return Err(ChallengeError::WrongTurn {
                expected: self.turn,
                sender,
            });
        }
        if now > self.deadline {
            return Err(ChallengeError::Expired {
                now,
                deadline: self.deadline,
            });
        }
        Ok(())
    }

    fn hand_over(&mut self, state: ChallengeState, deadline: Ticks) {
        self.turn = self.turn.other();
        self.state = state;
        self.deadline = deadline;
    }

    /// Pick segment `index` of the current root for further dispute
    ///
    /// `sub_root` must be the current root and `proof` must open
    /// `sub_hash` at `index`. The chosen segment becomes the new root.
    pub fn choose_segment(
        &mut self,
        sender: Address,
        index: u64,
        proof: &InclusionProof,
        sub_root: H256,
        sub_hash: H256,
        now: Ticks,
    ) -> Result<(), ChallengeError> {
        self.ensure_move("choose_segment", ChallengeState::AwaitingContinuation, sender, now)?;
        if sub_root != self.root {
            return Err(ChallengeError::MismatchedSegment(sub_root));
        }
        verify_inclusion(&self.root, index, self.segment_count, &sub_hash, proof)?;
        let deadline = now.checked_add(self.challenge_period)?;

        // Step 1: the chosen segment is the whole dispute now
        self.root = sub_hash;
        self.segment_count = 1;

        // Step 2: hand over to the asserter
        self.hand_over(ChallengeState::AwaitingBisection, deadline);
        self.events.push(ChallengeEvent::Continued {
            segment_index: index,
            deadline,
        });

        debug!(
            "Challenge {}: segment {} chosen ({}), asserter to move by {}",
            self.id,
            index,
            short_hex(&sub_hash),
            deadline
        );
        Ok(())
    }

    /// Replace the current segment by a commitment over its children
    ///
    /// The caller has already checked the move with `ensure_move` and that
    /// the children reproduce the current segment.
    pub(crate) fn commit_bisection(
        &mut self,
        child_hashes: Vec<H256>,
        now: Ticks,
        event: impl FnOnce(Ticks) -> ChallengeEvent,
    ) -> Result<(), ChallengeError> {
        let count = child_hashes.len() as u64;
        let root = MerkleTree::new(child_hashes)?.root();
        let deadline = now.checked_add(self.challenge_period)?;

        self.root = root;
        self.segment_count = count;
        self.hand_over(ChallengeState::AwaitingContinuation, deadline);
        self.events.push(event(deadline));

        debug!(
            "Challenge {}: bisected into {} segments under {}, challenger to move by {}",
            self.id,
            count,
            short_hex(&root),
            deadline
        );
        Ok(())
    }

    /// Settle the challenge in favour of `winner`
    pub(crate) fn conclude<S>(&mut self, winner: Turn, staking: &mut S) -> Result<(), ChallengeError>
    where
        S: StakingContract + ?Sized,
    {
        staking.resolve_challenge(
            self.id,
            self.party(winner),
            self.party(winner.other()),
            self.kind,
        )?;
        self.state = ChallengeState::Concluded;
        Ok(())
    }

    /// Settle an expired challenge against the party that failed to move
    pub fn timeout<S>(&mut self, now: Ticks, staking: &mut S) -> Result<(), ChallengeError>
    where
        S: StakingContract + ?Sized,
    {
        if matches!(
            self.state,
            ChallengeState::Uninitialised | ChallengeState::Concluded
        ) {
            return Err(ChallengeError::InvalidState {
                operation: "timeout",
                state: self.state,
            });
        }
        if now <= self.deadline {
            return Err(ChallengeError::NotExpired {
                now,
                deadline: self.deadline,
            });
        }

        let late = self.turn;
        self.conclude(late.other(), staking)?;
        self.events.push(match late {
            Turn::Asserter => ChallengeEvent::AsserterTimedOut,
            Turn::Challenger => ChallengeEvent::ChallengerTimedOut,
        });

        warn!(
            "Challenge {}: {} timed out at {} (deadline {})",
            self.id, late, now, self.deadline
        );
        Ok(())
    }

    /// Record a successful one-step proof
    pub(crate) fn complete_one_step<S>(&mut self, staking: &mut S) -> Result<(), ChallengeError>
    where
        S: StakingContract + ?Sized,
    {
        self.conclude(Turn::Asserter, staking)?;
        self.events.push(ChallengeEvent::OneStepProofCompleted);

        info!("Challenge {}: one-step proof accepted, asserter wins", self.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::RecordingStaking;

    fn asserter() -> Address {
        Address::repeat_byte(0xa1)
    }

    fn challenger() -> Address {
        Address::repeat_byte(0xc1)
    }

    fn leaves() -> Vec<H256> {
        (1..=4).map(H256::repeat_byte).collect()
    }

    fn initialised(now: u128) -> BisectionChallenge {
        let tree = MerkleTree::new(leaves()).unwrap();
        let mut challenge = BisectionChallenge::new(7, ChallengeKind::Execution);
        challenge
            .initialize(Address::repeat_byte(0x99), asserter(), challenger(), Ticks(100), tree.root(), 4, Ticks(now))
            .unwrap();
        challenge
    }

    fn choose(challenge: &mut BisectionChallenge, index: usize, now: u128) -> Result<(), ChallengeError> {
        let tree = MerkleTree::new(leaves()).unwrap();
        let proof = tree.generate_proof(index).unwrap();
        challenge.choose_segment(challenger(), index as u64, &proof, tree.root(), leaves()[index], Ticks(now))
    }

    #[test]
    fn test_initialize_sets_deadline_and_turn() {
        let challenge = initialised(10);

        assert_eq!(challenge.state, ChallengeState::AwaitingContinuation);
        assert_eq!(challenge.turn, Turn::Challenger);
        assert_eq!(challenge.deadline, Ticks(110));
        assert_eq!(challenge.events(), &[ChallengeEvent::InitiatedChallenge { deadline: Ticks(110) }]);
    }

    #[test]
    fn test_initialize_twice_rejected() {
        let mut challenge = initialised(0);
        let result = challenge.initialize(Address::zero(), asserter(), challenger(), Ticks(5), H256::zero(), 1, Ticks(1));

        assert_eq!(
            result,
            Err(ChallengeError::InvalidState {
                operation: "initialize",
                state: ChallengeState::AwaitingContinuation
            })
        );
        assert_eq!(challenge.deadline, Ticks(100));
    }

    #[test]
    fn test_choose_flips_turn_and_resets_deadline() {
        let mut challenge = initialised(0);
        choose(&mut challenge, 2, 50).unwrap();

        assert_eq!(challenge.state, ChallengeState::AwaitingBisection);
        assert_eq!(challenge.turn, Turn::Asserter);
        assert_eq!(challenge.deadline, Ticks(150));
        assert_eq!(challenge.root, leaves()[2]);
        assert_eq!(challenge.segment_count, 1);
    }

    #[test]
    fn test_wrong_sender_rejected() {
        let mut challenge = initialised(0);
        let tree = MerkleTree::new(leaves()).unwrap();
        let proof = tree.generate_proof(0).unwrap();

        let result = challenge.choose_segment(asserter(), 0, &proof, tree.root(), leaves()[0], Ticks(1));
        assert!(matches!(result, Err(ChallengeError::WrongTurn { expected: Turn::Challenger, .. })));
        assert_eq!(challenge.state, ChallengeState::AwaitingContinuation);
    }

    #[test]
    fn test_move_at_deadline_accepted_after_rejected() {
        let mut late = initialised(0);
        assert!(matches!(choose(&mut late, 0, 101), Err(ChallengeError::Expired { .. })));

        let mut on_time = initialised(0);
        assert!(choose(&mut on_time, 0, 100).is_ok());
    }

    #[test]
    fn test_timeout_before_deadline_rejected() {
        let mut challenge = initialised(0);
        let mut staking = RecordingStaking::new();

        let result = challenge.timeout(Ticks(100), &mut staking);
        assert!(matches!(result, Err(ChallengeError::NotExpired { .. })));
        assert!(staking.resolutions().is_empty());
    }

    #[test]
    fn test_challenger_timeout_pays_asserter() {
        let mut challenge = initialised(0);
        let mut staking = RecordingStaking::new();

        challenge.timeout(Ticks(101), &mut staking).unwrap();

        assert!(challenge.is_concluded());
        assert_eq!(staking.resolutions()[0].winner, asserter());
        assert_eq!(challenge.events().last(), Some(&ChallengeEvent::ChallengerTimedOut));
    }

    #[test]
    fn test_concluded_challenge_rejects_everything() {
        let mut challenge = initialised(0);
        let mut staking = RecordingStaking::new();
        challenge.timeout(Ticks(101), &mut staking).unwrap();

        assert!(matches!(
            challenge.timeout(Ticks(500), &mut staking),
            Err(ChallengeError::InvalidState { .. })
        ));
        assert!(matches!(choose(&mut challenge, 0, 102), Err(ChallengeError::InvalidState { .. })));
        assert_eq!(staking.resolutions().len(), 1);
    }

    #[test]
    fn test_kind_codes() {
        assert_eq!(ChallengeKind::InboxTop.code(), 0);
        assert_eq!(ChallengeKind::Messages.code(), 1);
        assert_eq!(ChallengeKind::Execution.code(), 2);
        assert_eq!(ChallengeKind::from_code(1), Some(ChallengeKind::Messages));
        assert_eq!(ChallengeKind::from_code(2), Some(ChallengeKind::Execution));
        assert_eq!(ChallengeKind::from_code(3), None);
    }

    #[test]
    fn test_tick_overflow() {
        assert!(matches!(
            Ticks(u128::MAX).checked_add(Ticks(1)),
            Err(ChallengeError::TickOverflow(_))
        ));
        assert_eq!(Ticks::from_blocks(3, 1000), Ticks(3000));
    }
}
