// src/challenge/execution.rs
//! Execution challenges
//!
//! The disputed root of an execution challenge is the summary hash of one
//! machine segment (or, right after initialisation and after every
//! bisection, a commitment over several). The asserter answers a chosen
//! segment by splitting it into chained children or, once it is a single
//! step, by submitting a one-step proof.

use ethereum_types::{Address, H256};
use log::{debug, warn};

use super::assertion::{AssertionSegment, ExecutionBisection};
use super::bisection::{BisectionChallenge, ChallengeKind, ChallengeState, Ticks};
use super::events::{BisectedAssertion, ChallengeEvent};
use crate::config::ChallengeConfig;
use crate::error_handling::ChallengeError;
use crate::interfaces::StakingContract;
use crate::one_step_proof::{validate_proof, OneStepProof};
use crate::utils::short_hex;

fn ensure_execution(challenge: &BisectionChallenge, operation: &'static str) -> Result<(), ChallengeError> {
    if challenge.kind != ChallengeKind::Execution {
        return Err(ChallengeError::KindMismatch {
            operation,
            kind: challenge.kind,
        });
    }
    Ok(())
}

fn malformed(reason: String) -> ChallengeError {
    ChallengeError::MalformedSegmentChain(reason)
}

/// Split the disputed segment into the children described by `bisection`
///
/// The children must reproduce the disputed segment exactly: same start
/// and end hashes, OR'd inbox flag, summed gas, chained accumulators and
/// the protocol step split.
///
/// The boundary arrays give each child its start from the previous child's
/// end, so a broken chain cannot be expressed here and this never fails
/// with a broken-chain `MalformedSegmentChain`. A wrong outer boundary
/// surfaces as `MismatchedSegment`; an inner boundary is left for the
/// challenger to dispute. `bisect_segments` takes explicit segments and
/// reports a broken chain as `MalformedSegmentChain`.
pub fn bisect_assertion(
    challenge: &mut BisectionChallenge,
    sender: Address,
    bisection: &ExecutionBisection,
    config: &ChallengeConfig,
    now: Ticks,
) -> Result<(), ChallengeError> {
    ensure_execution(challenge, "bisect_assertion")?;
    challenge.ensure_move("bisect_assertion", ChallengeState::AwaitingBisection, sender, now)?;

    // Step 1: shape of the arrays
    let segments = bisection.segments()?;
    let count = segments.len();
    if count < 2 || count > config.max_bisection_degree {
        return Err(malformed(format!(
            "{} children, expected between 2 and {}",
            count, config.max_bisection_degree
        )));
    }
    if bisection.total_steps < count as u64 {
        return Err(malformed(format!(
            "{} steps cannot fill {} children",
            bisection.total_steps, count
        )));
    }

    // Step 2: a single-step child must be provable
    if let Some((i, child)) = segments
        .iter()
        .enumerate()
        .find(|(_, s)| s.is_one_step() && s.gas_used >= config.one_step_gas_threshold)
    {
        return Err(malformed(format!(
            "one-step child {} declares {} gas, threshold is {}",
            i, child.gas_used, config.one_step_gas_threshold
        )));
    }

    // Step 3: the children must sum up to the disputed segment
    let parent = bisection.parent()?;
    let parent_hash = parent.summary_hash(bisection.time_bounds, &bisection.before_inbox);
    if parent_hash != challenge.root {
        warn!(
            "Challenge {}: bisection reproduces {} instead of {}",
            challenge.id,
            short_hex(&parent_hash),
            short_hex(&challenge.root)
        );
        return Err(ChallengeError::MismatchedSegment(parent_hash));
    }

    // Step 4: commit to the children
    let child_hashes: Vec<H256> = segments
        .iter()
        .map(|s| s.summary_hash(bisection.time_bounds, &bisection.before_inbox))
        .collect();
    challenge.commit_bisection(child_hashes, now, |deadline| {
        ChallengeEvent::BisectedAssertion(BisectedAssertion {
            machine_hashes: bisection.machine_hashes.clone(),
            did_inbox_insns: bisection.did_inbox_insns.clone(),
            message_accs: bisection.message_accs.clone(),
            log_accs: bisection.log_accs.clone(),
            gases: bisection.gases.clone(),
            total_steps: bisection.total_steps,
            deadline,
        })
    })
}

/// Split the disputed segment into explicitly chained child segments
///
/// Every child must start where the previous one ends before the list is
/// reduced to its array form.
pub fn bisect_segments(
    challenge: &mut BisectionChallenge,
    sender: Address,
    segments: &[AssertionSegment],
    time_bounds: [u128; 2],
    before_inbox: H256,
    config: &ChallengeConfig,
    now: Ticks,
) -> Result<(), ChallengeError> {
    ensure_execution(challenge, "bisect_segments")?;
    challenge.ensure_move("bisect_segments", ChallengeState::AwaitingBisection, sender, now)?;

    let bisection = ExecutionBisection::from_segments(segments, time_bounds, before_inbox)?;
    bisect_assertion(challenge, sender, &bisection, config, now)
}

/// The one-step segment a proof claims
pub fn one_step_segment(claim: &OneStepProof) -> AssertionSegment {
    AssertionSegment {
        before: claim.before_hash,
        after: claim.after_hash,
        did_inbox_insn: claim.did_inbox_insn,
        first_message: claim.first_message,
        last_message: claim.last_message,
        first_log: claim.first_log,
        last_log: claim.last_log,
        gas_used: claim.gas,
        num_steps: 1,
    }
}

/// Settle the challenge with a one-step proof of the disputed segment
///
/// A rejected proof leaves the challenge open; the asserter may retry until
/// the deadline.
pub fn one_step_proof<S>(
    challenge: &mut BisectionChallenge,
    sender: Address,
    claim: &OneStepProof,
    now: Ticks,
    staking: &mut S,
) -> Result<(), ChallengeError>
where
    S: StakingContract + ?Sized,
{
    ensure_execution(challenge, "one_step_proof")?;
    challenge.ensure_move("one_step_proof", ChallengeState::AwaitingBisection, sender, now)?;

    let segment_hash = one_step_segment(claim).summary_hash(claim.time_bounds, &claim.before_inbox);
    if segment_hash != challenge.root {
        return Err(ChallengeError::MismatchedSegment(segment_hash));
    }

    if let Err(e) = validate_proof(claim) {
        warn!("Challenge {}: one-step proof rejected: {}", challenge.id, e);
        return Err(e.into());
    }
    debug!("Challenge {}: one-step proof verified", challenge.id);

    challenge.complete_one_step(staking)
}
