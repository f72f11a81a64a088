// src/challenge/inbox_top.rs
//! Inbox-top challenges
//!
//! Disputes how many messages were appended to the inbox between two
//! accumulator values. A range is summarised as
//! `H(lower ‖ upper ‖ messageCount)`; the asserter bisects the range along
//! the accumulator chain until a single message is left, which is settled
//! by recomputing one accumulator step.

use ethereum_types::{Address, H256, U256};
use log::{debug, warn};

use super::bisection::{BisectionChallenge, ChallengeKind, ChallengeState, Ticks};
use super::events::ChallengeEvent;
use crate::config::ChallengeConfig;
use crate::error_handling::ChallengeError;
use crate::interfaces::StakingContract;
use crate::utils::{accumulate, keccak_packed, short_hex, u256_to_bytes};

/// Summary hash of an inbox range
pub fn inbox_top_hash(lower: &H256, upper: &H256, message_count: U256) -> H256 {
    keccak_packed(&[
        lower.as_bytes(),
        upper.as_bytes(),
        &u256_to_bytes(&message_count)[..],
    ])
}

/// Messages in child `index` of a range of `total` split `count` ways
pub fn inbox_step_count(index: usize, count: usize, total: U256) -> U256 {
    let count = U256::from(count);
    if count.is_zero() {
        return U256::zero();
    }
    let base = total / count;
    if index == 0 {
        base + total % count
    } else {
        base
    }
}

/// Summary hashes of the children of a range bisection
pub fn inbox_child_hashes(chain_hashes: &[H256], total_length: U256) -> Vec<H256> {
    let count = chain_hashes.len().saturating_sub(1);
    (0..count)
        .map(|i| {
            inbox_top_hash(
                &chain_hashes[i],
                &chain_hashes[i + 1],
                inbox_step_count(i, count, total_length),
            )
        })
        .collect()
}

fn ensure_inbox_top(challenge: &BisectionChallenge, operation: &'static str) -> Result<(), ChallengeError> {
    if challenge.kind != ChallengeKind::InboxTop {
        return Err(ChallengeError::KindMismatch {
            operation,
            kind: challenge.kind,
        });
    }
    Ok(())
}

/// Split the disputed range along `chain_hashes`
///
/// `chain_hashes` holds the accumulator at every child boundary, so `k`
/// children take `k + 1` hashes.
pub fn bisect_inbox_top(
    challenge: &mut BisectionChallenge,
    sender: Address,
    chain_hashes: &[H256],
    total_length: U256,
    config: &ChallengeConfig,
    now: Ticks,
) -> Result<(), ChallengeError> {
    ensure_inbox_top(challenge, "bisect_inbox_top")?;
    challenge.ensure_move("bisect_inbox_top", ChallengeState::AwaitingBisection, sender, now)?;

    let count = chain_hashes.len().saturating_sub(1);
    if count < 2 || count > config.max_bisection_degree {
        return Err(ChallengeError::MalformedSegmentChain(format!(
            "{} inbox children, expected between 2 and {}",
            count, config.max_bisection_degree
        )));
    }
    if total_length < U256::from(count) {
        return Err(ChallengeError::MalformedSegmentChain(format!(
            "{} messages cannot fill {} children",
            total_length, count
        )));
    }

    let parent = inbox_top_hash(&chain_hashes[0], &chain_hashes[count], total_length);
    if parent != challenge.root {
        warn!(
            "Challenge {}: inbox bisection reproduces {} instead of {}",
            challenge.id,
            short_hex(&parent),
            short_hex(&challenge.root)
        );
        return Err(ChallengeError::MismatchedSegment(parent));
    }

    let child_hashes = inbox_child_hashes(chain_hashes, total_length);
    challenge.commit_bisection(child_hashes, now, |deadline| ChallengeEvent::BisectedInboxTop {
        chain_hashes: chain_hashes.to_vec(),
        total_length,
        deadline,
    })
}

/// Settle a single-message range by recomputing its accumulator step
pub fn one_step_proof_inbox_top<S>(
    challenge: &mut BisectionChallenge,
    sender: Address,
    lower: H256,
    message_hash: H256,
    now: Ticks,
    staking: &mut S,
) -> Result<(), ChallengeError>
where
    S: StakingContract + ?Sized,
{
    ensure_inbox_top(challenge, "one_step_proof_inbox_top")?;
    challenge.ensure_move("one_step_proof_inbox_top", ChallengeState::AwaitingBisection, sender, now)?;

    let upper = accumulate(&lower, &message_hash);
    let range = inbox_top_hash(&lower, &upper, U256::one());
    if range != challenge.root {
        return Err(ChallengeError::MismatchedSegment(range));
    }
    debug!("Challenge {}: inbox step {} verified", challenge.id, short_hex(&upper));

    challenge.complete_one_step(staking)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::merkle_tree::MerkleTree;
    use crate::interfaces::RecordingStaking;

    fn asserter() -> Address {
        Address::repeat_byte(0xa3)
    }

    fn challenger() -> Address {
        Address::repeat_byte(0xc3)
    }

    /// Accumulator chain over `n` messages
    fn chain(n: u8) -> (Vec<H256>, Vec<H256>) {
        let messages: Vec<H256> = (1..=n).map(H256::repeat_byte).collect();
        let mut accs = vec![H256::zero()];
        for message in &messages {
            let last = accs[accs.len() - 1];
            accs.push(accumulate(&last, message));
        }
        (accs, messages)
    }

    fn disputed(root: H256) -> BisectionChallenge {
        let mut challenge = BisectionChallenge::new(3, ChallengeKind::InboxTop);
        challenge
            .initialize(Address::zero(), asserter(), challenger(), Ticks(100), root, 1, Ticks(0))
            .unwrap();
        challenge
            .choose_segment(challenger(), 0, &Default::default(), root, root, Ticks(1))
            .unwrap();
        challenge
    }

    #[test]
    fn test_bisect_then_prove_single_message() {
        let (accs, messages) = chain(3);
        let config = ChallengeConfig::default();
        let mut staking = RecordingStaking::new();
        let mut challenge = disputed(inbox_top_hash(&accs[0], &accs[3], U256::from(3)));

        // Two children: messages [0, 2) and [2, 3)
        let boundaries = vec![accs[0], accs[2], accs[3]];
        bisect_inbox_top(&mut challenge, asserter(), &boundaries, U256::from(3), &config, Ticks(2)).unwrap();
        assert_eq!(challenge.segment_count, 2);

        let children = inbox_child_hashes(&boundaries, U256::from(3));
        let tree = MerkleTree::new(children.clone()).unwrap();
        let proof = tree.generate_proof(1).unwrap();
        challenge
            .choose_segment(challenger(), 1, &proof, tree.root(), children[1], Ticks(3))
            .unwrap();

        one_step_proof_inbox_top(&mut challenge, asserter(), accs[2], messages[2], Ticks(4), &mut staking).unwrap();
        assert!(challenge.is_concluded());
        assert_eq!(staking.resolutions()[0].challenge_type, ChallengeKind::InboxTop);
    }

    #[test]
    fn test_wrong_message_rejected() {
        let (accs, _) = chain(1);
        let mut staking = RecordingStaking::new();
        let mut challenge = disputed(inbox_top_hash(&accs[0], &accs[1], U256::one()));

        let result = one_step_proof_inbox_top(&mut challenge, asserter(), accs[0], H256::repeat_byte(9), Ticks(2), &mut staking);
        assert!(matches!(result, Err(ChallengeError::MismatchedSegment(_))));
        assert!(!challenge.is_concluded());
    }

    #[test]
    fn test_first_child_takes_remainder() {
        assert_eq!(inbox_step_count(0, 2, U256::from(5)), U256::from(3));
        assert_eq!(inbox_step_count(1, 2, U256::from(5)), U256::from(2));
    }

    #[test]
    fn test_too_few_messages_rejected() {
        let (accs, _) = chain(1);
        let mut challenge = disputed(inbox_top_hash(&accs[0], &accs[1], U256::one()));

        let result = bisect_inbox_top(&mut challenge, asserter(), &[accs[0], accs[0], accs[1]], U256::one(), &ChallengeConfig::default(), Ticks(2));
        assert!(matches!(result, Err(ChallengeError::MalformedSegmentChain(_))));
    }
}
