// src/validator/mod.rs
//! Off-chain challenge participant
//!
//! A validator holds its own execution trace and derives every move from
//! it: the asserter publishes and subdivides segments of the trace and
//! proves single steps; the challenger compares claimed segments with the
//! trace and disputes the first one that differs.

mod trace;

pub use trace::ExecutionTrace;

use ethereum_types::{Address, H256};
use log::{debug, info};

use crate::challenge::{AssertionSegment, ChallengeInstruction, InclusionProof, MerkleTree};
use crate::error_handling::{ChallengeError, CommitmentError};

/// Step range of the segment currently under dispute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisputedRange {
    /// First step of the segment
    pub start: u64,

    /// Number of steps in the segment
    pub steps: u64,
}

/// Index of the first segment in `claimed` that differs from `expected`
///
/// Segments are compared by summary hash. A claim with no counterpart in
/// `expected` is disputed.
pub fn find_disputed_segment(
    claimed: &[AssertionSegment],
    expected: &[Option<AssertionSegment>],
    time_bounds: [u128; 2],
    before_inbox: &H256,
) -> Option<usize> {
    claimed.iter().enumerate().position(|(i, claim)| {
        match expected.get(i).and_then(|s| s.as_ref()) {
            Some(mine) => {
                mine.summary_hash(time_bounds, before_inbox) != claim.summary_hash(time_bounds, before_inbox)
            }
            None => true,
        }
    })
}

/// A challenge participant backed by its own execution trace
#[derive(Debug, Clone)]
pub struct Validator {
    address: Address,
    trace: ExecutionTrace,
}

impl Validator {
    /// Create a validator
    pub fn new(address: Address, trace: ExecutionTrace) -> Self {
        Self { address, trace }
    }

    /// Address the validator sends from
    pub fn address(&self) -> Address {
        self.address
    }

    /// The validator's trace
    pub fn trace(&self) -> &ExecutionTrace {
        &self.trace
    }

    /// Summary hashes of a list of segments under this trace's precondition
    pub fn summary_hashes(&self, segments: &[AssertionSegment]) -> Vec<H256> {
        segments
            .iter()
            .map(|s| s.summary_hash(self.trace.time_bounds(), &self.trace.before_inbox()))
            .collect()
    }

    /// The segments this validator expects for the claimed step ranges
    fn expected_segments(&self, claimed: &[AssertionSegment], start: u64) -> Vec<Option<AssertionSegment>> {
        let mut offset = start;
        claimed
            .iter()
            .map(|claim| {
                let mine = self.trace.segment(offset, claim.num_steps);
                offset = offset.saturating_add(claim.num_steps);
                mine
            })
            .collect()
    }

    /// Choose segment `index` of `claimed`, whose first segment starts at
    /// step `start`
    pub fn select_segment(
        &self,
        claimed: &[AssertionSegment],
        index: usize,
        start: u64,
    ) -> Result<(ChallengeInstruction, DisputedRange), ChallengeError> {
        let tree = MerkleTree::new(self.summary_hashes(claimed))?;
        let proof: InclusionProof = tree
            .generate_proof(index)
            .ok_or(CommitmentError::InvalidInclusion {
                segment_index: index as u64,
            })?;

        let range = DisputedRange {
            start: start + claimed[..index].iter().map(|s| s.num_steps).sum::<u64>(),
            steps: claimed[index].num_steps,
        };
        let leaf = tree.leaves()[index];
        debug!(
            "Validator {:?} selects segment {} (steps {}..{})",
            self.address,
            index,
            range.start,
            range.start + range.steps
        );
        Ok((
            ChallengeInstruction::choose_segment(index as u64, &proof, tree.root(), leaf),
            range,
        ))
    }

    /// Dispute the first claimed segment that disagrees with the trace
    ///
    /// Returns `None` when every segment matches.
    pub fn choose_segment(
        &self,
        claimed: &[AssertionSegment],
        start: u64,
    ) -> Result<Option<(ChallengeInstruction, DisputedRange)>, ChallengeError> {
        let expected = self.expected_segments(claimed, start);
        let disputed = find_disputed_segment(
            claimed,
            &expected,
            self.trace.time_bounds(),
            &self.trace.before_inbox(),
        );
        match disputed {
            Some(index) => {
                info!("Validator {:?} disputes segment {}", self.address, index);
                self.select_segment(claimed, index, start).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Answer a chosen range: a one-step proof for a single step, otherwise
    /// a bisection into at most `degree` children
    pub fn respond(&self, range: DisputedRange, degree: usize) -> Result<ChallengeInstruction, ChallengeError> {
        if range.steps == 1 {
            let claim = self.trace.one_step_claim(range.start).ok_or_else(|| {
                ChallengeError::MalformedSegmentChain(format!("no recorded step {}", range.start))
            })?;
            return Ok(ChallengeInstruction::one_step_proof(&claim));
        }

        let count = degree.min(usize::try_from(range.steps).unwrap_or(usize::MAX)).max(2);
        let bisection = self.trace.bisection(range.start, range.steps, count)?;
        Ok(ChallengeInstruction::bisect_assertion(&bisection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::StaticInbox;
    use crate::one_step_proof::opcodes::{ADD, NOP};
    use crate::one_step_proof::{Machine, Program};
    use crate::value::{Operation, Value};
    use ethereum_types::U256;

    fn validator(byte: u8) -> Validator {
        let program = Program::new(vec![
            Operation::with_immediate(ADD, Value::from(3u64)),
            Operation::new(NOP),
            Operation::new(NOP),
            Operation::new(NOP),
        ]);
        let mut machine = Machine::new(program, Value::empty_tuple(), U256::from(10_000u64))
            .with_data_stack(vec![Value::from(2u64)]);
        let trace = ExecutionTrace::record(&mut machine, &StaticInbox::empty(), [0, 10], 4).unwrap();
        Validator::new(Address::repeat_byte(byte), trace)
    }

    #[test]
    fn test_agreeing_traces_dispute_nothing() {
        let asserter = validator(1);
        let challenger = validator(2);

        let claimed = asserter.trace().assertion(4).unwrap();
        assert_eq!(challenger.choose_segment(claimed.segments(), 0).unwrap(), None);
    }

    #[test]
    fn test_first_divergence_is_disputed() {
        let asserter = validator(1);
        let challenger = validator(2);

        // Asserter lies about the state between steps 1 and 2
        let mut claimed = asserter.trace().assertion(4).unwrap().segments().to_vec();
        claimed[1].after = H256::repeat_byte(0xee);
        claimed[2].before = H256::repeat_byte(0xee);

        let (_, range) = challenger.choose_segment(&claimed, 0).unwrap().unwrap();
        assert_eq!(range, DisputedRange { start: 1, steps: 1 });
    }

    #[test]
    fn test_respond_bisects_or_proves() {
        let asserter = validator(1);

        let bisect = asserter.respond(DisputedRange { start: 0, steps: 4 }, 2).unwrap();
        assert!(matches!(bisect, ChallengeInstruction::BisectAssertion { ref gases, .. } if gases.len() == 2));

        let prove = asserter.respond(DisputedRange { start: 0, steps: 1 }, 2).unwrap();
        assert!(matches!(prove, ChallengeInstruction::OneStepProof { .. }));
    }

    #[test]
    fn test_missing_segment_disputed() {
        let claim = validator(1).trace().segment(0, 1).unwrap();
        let disputed = find_disputed_segment(&[claim], &[None], [0, 0], &H256::zero());
        assert_eq!(disputed, Some(0));
    }
}
