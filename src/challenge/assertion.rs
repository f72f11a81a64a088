// src/challenge/assertion.rs
//! Assertions and their segment summaries
//!
//! An assertion is a chain of segments, each claiming how the machine moves
//! from one hash to the next over some number of steps. The summary hash of
//! a segment binds its precondition (start hash, time bounds, inbox) and its
//! outcome (end hash, inbox flag, gas, message and log accumulators).

use ethereum_types::H256;
use serde::Serialize;

use super::merkle_tree::MerkleTree;
use crate::error_handling::{ChallengeError, CommitmentError};
use crate::utils::{keccak_packed, short_hex};

/// Hash of a segment precondition
pub fn precondition_hash(before: &H256, time_bounds: [u128; 2], before_inbox: &H256) -> H256 {
    keccak_packed(&[
        before.as_bytes(),
        &time_bounds[0].to_be_bytes()[..],
        &time_bounds[1].to_be_bytes()[..],
        before_inbox.as_bytes(),
    ])
}

/// Hash of a segment outcome
#[allow(clippy::too_many_arguments)]
pub fn assertion_hash(
    after: &H256,
    did_inbox_insn: bool,
    gas: u64,
    first_message: &H256,
    last_message: &H256,
    first_log: &H256,
    last_log: &H256,
) -> H256 {
    keccak_packed(&[
        after.as_bytes(),
        &[did_inbox_insn as u8][..],
        &gas.to_be_bytes()[..],
        first_message.as_bytes(),
        last_message.as_bytes(),
        first_log.as_bytes(),
        last_log.as_bytes(),
    ])
}

/// Summary hash of a segment: `H(numSteps ‖ precondition ‖ assertion)`
pub fn execution_data_hash(num_steps: u64, precondition: &H256, assertion: &H256) -> H256 {
    keccak_packed(&[
        &num_steps.to_be_bytes()[..],
        precondition.as_bytes(),
        assertion.as_bytes(),
    ])
}

/// Steps in child `index` when `total` steps are split into `count` children
///
/// The first child absorbs the remainder.
pub fn bisection_step_count(index: usize, count: usize, total: u64) -> u64 {
    let count = count as u64;
    if count == 0 {
        return 0;
    }
    let base = total / count;
    if index == 0 {
        base + total % count
    } else {
        base
    }
}

/// One segment of an assertion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssertionSegment {
    /// Machine hash at the start
    pub before: H256,

    /// Machine hash at the end
    pub after: H256,

    /// Whether any step read the inbox
    pub did_inbox_insn: bool,

    /// Message accumulator at the start
    pub first_message: H256,

    /// Message accumulator at the end
    pub last_message: H256,

    /// Log accumulator at the start
    pub first_log: H256,

    /// Log accumulator at the end
    pub last_log: H256,

    /// Gas used
    pub gas_used: u64,

    /// Number of steps
    pub num_steps: u64,
}

impl AssertionSegment {
    /// Hash of the segment outcome
    pub fn assertion_hash(&self) -> H256 {
        assertion_hash(
            &self.after,
            self.did_inbox_insn,
            self.gas_used,
            &self.first_message,
            &self.last_message,
            &self.first_log,
            &self.last_log,
        )
    }

    /// Summary hash committed to in the segment tree
    pub fn summary_hash(&self, time_bounds: [u128; 2], before_inbox: &H256) -> H256 {
        execution_data_hash(
            self.num_steps,
            &precondition_hash(&self.before, time_bounds, before_inbox),
            &self.assertion_hash(),
        )
    }

    /// Whether the segment is a single instruction
    pub fn is_one_step(&self) -> bool {
        self.num_steps == 1
    }

    /// Whether `next` starts where this segment ends
    pub fn chains_to(&self, next: &AssertionSegment) -> bool {
        self.after == next.before
            && self.last_message == next.first_message
            && self.last_log == next.first_log
    }
}

fn check_chain(segments: &[AssertionSegment]) -> Result<(), ChallengeError> {
    for (i, pair) in segments.windows(2).enumerate() {
        if !pair[0].chains_to(&pair[1]) {
            return Err(ChallengeError::MalformedSegmentChain(format!(
                "segment {} ends at {} but segment {} starts at {}",
                i,
                short_hex(&pair[0].after),
                i + 1,
                short_hex(&pair[1].before)
            )));
        }
    }
    Ok(())
}

/// A chained, non-empty list of segments
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assertion {
    segments: Vec<AssertionSegment>,
    total_gas: u64,
}

impl Assertion {
    /// Validate and wrap a list of segments
    pub fn new(segments: Vec<AssertionSegment>) -> Result<Self, ChallengeError> {
        if segments.is_empty() {
            return Err(CommitmentError::EmptyCommitment.into());
        }
        if let Some(i) = segments.iter().position(|s| s.num_steps == 0) {
            return Err(ChallengeError::MalformedSegmentChain(format!(
                "segment {} has no steps",
                i
            )));
        }
        check_chain(&segments)?;

        let total_gas = segments
            .iter()
            .try_fold(0u64, |sum, s| sum.checked_add(s.gas_used))
            .ok_or_else(|| ChallengeError::MalformedSegmentChain("total gas overflows".into()))?;

        Ok(Self { segments, total_gas })
    }

    /// The segments in order
    pub fn segments(&self) -> &[AssertionSegment] {
        &self.segments
    }

    /// OR of the per-segment inbox flags
    pub fn did_inbox_insn(&self) -> bool {
        self.segments.iter().any(|s| s.did_inbox_insn)
    }

    /// Sum of the per-segment gas
    pub fn total_gas(&self) -> u64 {
        self.total_gas
    }

    /// Sum of the per-segment steps
    pub fn total_steps(&self) -> u64 {
        self.segments.iter().map(|s| s.num_steps).sum()
    }

    /// The whole assertion as one segment
    pub fn as_segment(&self) -> AssertionSegment {
        let first = &self.segments[0];
        let last = &self.segments[self.segments.len() - 1];
        AssertionSegment {
            before: first.before,
            after: last.after,
            did_inbox_insn: self.did_inbox_insn(),
            first_message: first.first_message,
            last_message: last.last_message,
            first_log: first.first_log,
            last_log: last.last_log,
            gas_used: self.total_gas,
            num_steps: self.total_steps(),
        }
    }

    /// Summary hashes of every segment
    pub fn summary_hashes(&self, time_bounds: [u128; 2], before_inbox: &H256) -> Vec<H256> {
        self.segments
            .iter()
            .map(|s| s.summary_hash(time_bounds, before_inbox))
            .collect()
    }

    /// Commitment tree over the segment summaries
    pub fn commitment(
        &self,
        time_bounds: [u128; 2],
        before_inbox: &H256,
    ) -> Result<MerkleTree, CommitmentError> {
        MerkleTree::new(self.summary_hashes(time_bounds, before_inbox))
    }
}

/// The asserter's subdivision of a segment in array form
///
/// `machine_hashes`, `message_accs` and `log_accs` hold one more entry than
/// there are children; child `i` runs from entry `i` to entry `i + 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionBisection {
    /// Inbox hash shared by every child
    pub before_inbox: H256,

    /// Time bounds shared by every child
    pub time_bounds: [u128; 2],

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

    /// Steps in the parent segment
    pub total_steps: u64,
}

/// Rebuild segments from the array form
pub fn segments_from_arrays(
    machine_hashes: &[H256],
    did_inbox_insns: &[bool],
    message_accs: &[H256],
    log_accs: &[H256],
    gases: &[u64],
    total_steps: u64,
) -> Result<Vec<AssertionSegment>, ChallengeError> {
    let count = gases.len();
    if did_inbox_insns.len() != count
        || machine_hashes.len() != count + 1
        || message_accs.len() != count + 1
        || log_accs.len() != count + 1
    {
        return Err(ChallengeError::MalformedSegmentChain(format!(
            "{} gases, {} inbox flags, {} machine hashes, {} message and {} log accumulators",
            count,
            did_inbox_insns.len(),
            machine_hashes.len(),
            message_accs.len(),
            log_accs.len()
        )));
    }

    Ok((0..count)
        .map(|i| AssertionSegment {
            before: machine_hashes[i],
            after: machine_hashes[i + 1],
            did_inbox_insn: did_inbox_insns[i],
            first_message: message_accs[i],
            last_message: message_accs[i + 1],
            first_log: log_accs[i],
            last_log: log_accs[i + 1],
            gas_used: gases[i],
            num_steps: bisection_step_count(i, count, total_steps),
        })
        .collect())
}

impl ExecutionBisection {
    /// Array form of a chained list of child segments
    ///
    /// Step counts must follow the protocol split, the first child taking
    /// the remainder.
    pub fn from_segments(
        segments: &[AssertionSegment],
        time_bounds: [u128; 2],
        before_inbox: H256,
    ) -> Result<Self, ChallengeError> {
        if segments.is_empty() {
            return Err(CommitmentError::EmptyCommitment.into());
        }
        check_chain(segments)?;

        let total_steps = segments
            .iter()
            .try_fold(0u64, |sum, s| sum.checked_add(s.num_steps))
            .ok_or_else(|| ChallengeError::MalformedSegmentChain("total steps overflow".into()))?;
        for (i, segment) in segments.iter().enumerate() {
            let expected = bisection_step_count(i, segments.len(), total_steps);
            if segment.num_steps != expected {
                return Err(ChallengeError::MalformedSegmentChain(format!(
                    "segment {} has {} steps, the split gives {}",
                    i, segment.num_steps, expected
                )));
            }
        }

        let mut machine_hashes = vec![segments[0].before];
        let mut message_accs = vec![segments[0].first_message];
        let mut log_accs = vec![segments[0].first_log];
        for segment in segments {
            machine_hashes.push(segment.after);
            message_accs.push(segment.last_message);
            log_accs.push(segment.last_log);
        }

        Ok(Self {
            before_inbox,
            time_bounds,
            machine_hashes,
            did_inbox_insns: segments.iter().map(|s| s.did_inbox_insn).collect(),
            message_accs,
            log_accs,
            gases: segments.iter().map(|s| s.gas_used).collect(),
            total_steps,
        })
    }

    /// Number of children
    pub fn segment_count(&self) -> usize {
        self.gases.len()
    }

    /// The children as segments
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

    /// The parent segment the children claim to reproduce
    pub fn parent(&self) -> Result<AssertionSegment, ChallengeError> {
        let segments = self.segments()?;
        Ok(Assertion::new(segments)?.as_segment())
    }

    /// Summary hash of each child
    pub fn child_hashes(&self) -> Result<Vec<H256>, ChallengeError> {
        Ok(self
            .segments()?
            .iter()
            .map(|s| s.summary_hash(self.time_bounds, &self.before_inbox))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::keccak;

    fn chain(steps: &[u64]) -> Vec<AssertionSegment> {
        steps
            .iter()
            .enumerate()
            .map(|(i, &num_steps)| AssertionSegment {
                before: H256::repeat_byte(i as u8),
                after: H256::repeat_byte(i as u8 + 1),
                did_inbox_insn: i == 1,
                first_message: H256::zero(),
                last_message: H256::zero(),
                first_log: H256::zero(),
                last_log: H256::zero(),
                gas_used: 10 * num_steps,
                num_steps,
            })
            .collect()
    }

    #[test]
    fn test_step_split_gives_remainder_to_first_child() {
        assert_eq!(bisection_step_count(0, 3, 10), 4);
        assert_eq!(bisection_step_count(1, 3, 10), 3);
        assert_eq!(bisection_step_count(2, 3, 10), 3);
        assert_eq!(bisection_step_count(0, 2, 2), 1);
    }

    #[test]
    fn test_summary_hash_layout() {
        let segment = chain(&[1]).remove(0);
        let inbox = H256::repeat_byte(0x77);

        let mut pre = Vec::new();
        pre.extend_from_slice(segment.before.as_bytes());
        pre.extend_from_slice(&5u128.to_be_bytes());
        pre.extend_from_slice(&6u128.to_be_bytes());
        pre.extend_from_slice(inbox.as_bytes());

        let mut data = Vec::new();
        data.extend_from_slice(&1u64.to_be_bytes());
        data.extend_from_slice(keccak(&pre).as_bytes());
        data.extend_from_slice(segment.assertion_hash().as_bytes());

        assert_eq!(segment.summary_hash([5, 6], &inbox), keccak(&data));
    }

    #[test]
    fn test_assertion_aggregates() {
        let assertion = Assertion::new(chain(&[2, 1, 1])).unwrap();
        let whole = assertion.as_segment();

        assert!(assertion.did_inbox_insn());
        assert_eq!(assertion.total_gas(), 40);
        assert_eq!(whole.num_steps, 4);
        assert_eq!(whole.before, H256::repeat_byte(0));
        assert_eq!(whole.after, H256::repeat_byte(3));
    }

    #[test]
    fn test_broken_chain_rejected() {
        let mut segments = chain(&[1, 1]);
        segments[1].before = H256::repeat_byte(0xee);

        assert!(matches!(
            Assertion::new(segments),
            Err(ChallengeError::MalformedSegmentChain(_))
        ));
    }

    #[test]
    fn test_gas_overflow_rejected() {
        let mut segments = chain(&[1, 1]);
        segments[0].gas_used = u64::MAX;

        assert!(matches!(
            Assertion::new(segments),
            Err(ChallengeError::MalformedSegmentChain(_))
        ));
    }

    #[test]
    fn test_array_form_round_trip() {
        let segments = chain(&[2, 1, 1]);
        let bisection = ExecutionBisection::from_segments(&segments, [0, 0], H256::zero()).unwrap();

        assert_eq!(bisection.machine_hashes.len(), 4);
        assert_eq!(bisection.total_steps, 4);
        assert_eq!(bisection.segments().unwrap(), segments);
    }

    #[test]
    fn test_array_form_rejects_uneven_split() {
        let segments = chain(&[1, 2]);
        assert!(matches!(
            ExecutionBisection::from_segments(&segments, [0, 0], H256::zero()),
            Err(ChallengeError::MalformedSegmentChain(_))
        ));
    }

    #[test]
    fn test_array_lengths_checked() {
        let result = segments_from_arrays(&[H256::zero()], &[false], &[H256::zero(); 2], &[H256::zero(); 2], &[1], 1);
        assert!(matches!(result, Err(ChallengeError::MalformedSegmentChain(_))));
    }
}
