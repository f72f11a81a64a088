// src/challenge/messages.rs
//! Message challenges
//!
//! Disputes whether the messages a machine consumed are the messages the
//! inbox actually carried. Both sides of a range are tracked by two
//! accumulator chains, the inbox chain and the message segment chain, and a
//! range is summarised as
//! `H(lowerInbox ‖ upperInbox ‖ lowerMessages ‖ upperMessages ‖ messageCount)`.
//! The asserter bisects both chains in lockstep until a single message is
//! left, which must extend both chains by the same message.

use ethereum_types::{Address, H256, U256};
use log::{debug, warn};

use super::bisection::{BisectionChallenge, ChallengeKind, ChallengeState, Ticks};
use super::events::ChallengeEvent;
use super::inbox_top::inbox_step_count;
use crate::config::ChallengeConfig;
use crate::error_handling::ChallengeError;
use crate::interfaces::StakingContract;
use crate::utils::{accumulate, keccak_packed, short_hex, u256_to_bytes};

/// Summary hash of a message range over both chains
pub fn message_challenge_data_hash(
    lower_inbox: &H256,
    upper_inbox: &H256,
    lower_messages: &H256,
    upper_messages: &H256,
    message_count: U256,
) -> H256 {
    keccak_packed(&[
        lower_inbox.as_bytes(),
        upper_inbox.as_bytes(),
        lower_messages.as_bytes(),
        upper_messages.as_bytes(),
        &u256_to_bytes(&message_count)[..],
    ])
}

/// Summary hashes of the children of a message bisection
///
/// Both slices hold one accumulator per child boundary.
pub fn message_child_hashes(
    chain_hashes: &[H256],
    segment_hashes: &[H256],
    total_length: U256,
) -> Vec<H256> {
    let count = chain_hashes.len().min(segment_hashes.len()).saturating_sub(1);
    (0..count)
        .map(|i| {
            message_challenge_data_hash(
                &chain_hashes[i],
                &chain_hashes[i + 1],
                &segment_hashes[i],
                &segment_hashes[i + 1],
                inbox_step_count(i, count, total_length),
            )
        })
        .collect()
}

fn ensure_messages(challenge: &BisectionChallenge, operation: &'static str) -> Result<(), ChallengeError> {
    if challenge.kind != ChallengeKind::Messages {
        return Err(ChallengeError::KindMismatch {
            operation,
            kind: challenge.kind,
        });
    }
    Ok(())
}

/// Split the disputed range along both accumulator chains
pub fn bisect_messages(
    challenge: &mut BisectionChallenge,
    sender: Address,
    chain_hashes: &[H256],
    segment_hashes: &[H256],
    total_length: U256,
    config: &ChallengeConfig,
    now: Ticks,
) -> Result<(), ChallengeError> {
    ensure_messages(challenge, "bisect_messages")?;
    challenge.ensure_move("bisect_messages", ChallengeState::AwaitingBisection, sender, now)?;

    if chain_hashes.len() != segment_hashes.len() {
        return Err(ChallengeError::MalformedSegmentChain(format!(
            "{} inbox boundaries against {} message boundaries",
            chain_hashes.len(),
            segment_hashes.len()
        )));
    }
    let count = chain_hashes.len().saturating_sub(1);
    if count < 2 || count > config.max_bisection_degree {
        return Err(ChallengeError::MalformedSegmentChain(format!(
            "{} message children, expected between 2 and {}",
            count, config.max_bisection_degree
        )));
    }
    if total_length < U256::from(count) {
        return Err(ChallengeError::MalformedSegmentChain(format!(
            "{} messages cannot fill {} children",
            total_length, count
        )));
    }

    let parent = message_challenge_data_hash(
        &chain_hashes[0],
        &chain_hashes[count],
        &segment_hashes[0],
        &segment_hashes[count],
        total_length,
    );
    if parent != challenge.root {
        warn!(
            "Challenge {}: message bisection reproduces {} instead of {}",
            challenge.id,
            short_hex(&parent),
            short_hex(&challenge.root)
        );
        return Err(ChallengeError::MismatchedSegment(parent));
    }

    let child_hashes = message_child_hashes(chain_hashes, segment_hashes, total_length);
    challenge.commit_bisection(child_hashes, now, |deadline| ChallengeEvent::BisectedMessages {
        chain_hashes: chain_hashes.to_vec(),
        segment_hashes: segment_hashes.to_vec(),
        total_length,
        deadline,
    })
}

/// Settle a single-message range: the same message extends both chains
pub fn one_step_proof_messages<S>(
    challenge: &mut BisectionChallenge,
    sender: Address,
    lower_inbox: H256,
    lower_messages: H256,
    message_hash: H256,
    now: Ticks,
    staking: &mut S,
) -> Result<(), ChallengeError>
where
    S: StakingContract + ?Sized,
{
    ensure_messages(challenge, "one_step_proof_messages")?;
    challenge.ensure_move("one_step_proof_messages", ChallengeState::AwaitingBisection, sender, now)?;

    let upper_inbox = accumulate(&lower_inbox, &message_hash);
    let upper_messages = accumulate(&lower_messages, &message_hash);
    let range = message_challenge_data_hash(
        &lower_inbox,
        &upper_inbox,
        &lower_messages,
        &upper_messages,
        U256::one(),
    );
    if range != challenge.root {
        return Err(ChallengeError::MismatchedSegment(range));
    }
    debug!(
        "Challenge {}: message {} verified on both chains",
        challenge.id,
        short_hex(&message_hash)
    );

    challenge.complete_one_step(staking)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::merkle_tree::MerkleTree;
    use crate::interfaces::RecordingStaking;

    fn asserter() -> Address {
        Address::repeat_byte(0xa4)
    }

    fn challenger() -> Address {
        Address::repeat_byte(0xc4)
    }

    /// Accumulator chain over `messages` starting at `start`
    fn chain(start: H256, messages: &[H256]) -> Vec<H256> {
        let mut accs = vec![start];
        for message in messages {
            let last = accs[accs.len() - 1];
            accs.push(accumulate(&last, message));
        }
        accs
    }

    fn messages() -> Vec<H256> {
        (1..=3).map(H256::repeat_byte).collect()
    }

    fn disputed(root: H256) -> BisectionChallenge {
        let mut challenge = BisectionChallenge::new(5, ChallengeKind::Messages);
        challenge
            .initialize(Address::zero(), asserter(), challenger(), Ticks(100), root, 1, Ticks(0))
            .unwrap();
        challenge
            .choose_segment(challenger(), 0, &Default::default(), root, root, Ticks(1))
            .unwrap();
        challenge
    }

    #[test]
    fn test_data_hash_layout() {
        let mut data = Vec::new();
        for byte in 1..=4u8 {
            data.extend_from_slice(H256::repeat_byte(byte).as_bytes());
        }
        data.extend_from_slice(&u256_to_bytes(&U256::from(7)));

        let hash = message_challenge_data_hash(
            &H256::repeat_byte(1),
            &H256::repeat_byte(2),
            &H256::repeat_byte(3),
            &H256::repeat_byte(4),
            U256::from(7),
        );
        assert_eq!(hash, crate::utils::keccak(&data));
    }

    #[test]
    fn test_bisect_then_prove_single_message() {
        let inbox = chain(H256::repeat_byte(0x10), &messages());
        let segment = chain(H256::zero(), &messages());
        let config = ChallengeConfig::default();
        let mut staking = RecordingStaking::new();
        let mut challenge = disputed(message_challenge_data_hash(
            &inbox[0],
            &inbox[3],
            &segment[0],
            &segment[3],
            U256::from(3),
        ));

        // Two children: messages [0, 2) and [2, 3)
        let chain_hashes = vec![inbox[0], inbox[2], inbox[3]];
        let segment_hashes = vec![segment[0], segment[2], segment[3]];
        bisect_messages(&mut challenge, asserter(), &chain_hashes, &segment_hashes, U256::from(3), &config, Ticks(2))
            .unwrap();
        assert_eq!(challenge.segment_count, 2);
        assert!(matches!(challenge.events().last(), Some(ChallengeEvent::BisectedMessages { .. })));

        let children = message_child_hashes(&chain_hashes, &segment_hashes, U256::from(3));
        let tree = MerkleTree::new(children.clone()).unwrap();
        let proof = tree.generate_proof(1).unwrap();
        challenge
            .choose_segment(challenger(), 1, &proof, tree.root(), children[1], Ticks(3))
            .unwrap();

        one_step_proof_messages(&mut challenge, asserter(), inbox[2], segment[2], messages()[2], Ticks(4), &mut staking)
            .unwrap();
        assert!(challenge.is_concluded());
        assert_eq!(staking.resolutions()[0].challenge_type, ChallengeKind::Messages);
    }

    #[test]
    fn test_message_missing_from_one_chain_rejected() {
        let inbox = chain(H256::repeat_byte(0x10), &messages()[..1]);
        // The machine saw a different message than the inbox delivered
        let segment = chain(H256::zero(), &[H256::repeat_byte(9)]);
        let mut staking = RecordingStaking::new();
        let mut challenge = disputed(message_challenge_data_hash(
            &inbox[0],
            &inbox[1],
            &segment[0],
            &segment[1],
            U256::one(),
        ));

        for message in [messages()[0], H256::repeat_byte(9)] {
            let result = one_step_proof_messages(&mut challenge, asserter(), inbox[0], segment[0], message, Ticks(2), &mut staking);
            assert!(matches!(result, Err(ChallengeError::MismatchedSegment(_))));
        }
        assert!(!challenge.is_concluded());
        assert!(staking.resolutions().is_empty());
    }

    #[test]
    fn test_uneven_chains_rejected() {
        let inbox = chain(H256::zero(), &messages());
        let segment = chain(H256::zero(), &messages());
        let mut challenge = disputed(message_challenge_data_hash(
            &inbox[0],
            &inbox[3],
            &segment[0],
            &segment[3],
            U256::from(3),
        ));

        let result = bisect_messages(
            &mut challenge,
            asserter(),
            &[inbox[0], inbox[1], inbox[3]],
            &[segment[0], segment[3]],
            U256::from(3),
            &ChallengeConfig::default(),
            Ticks(2),
        );
        assert!(matches!(result, Err(ChallengeError::MalformedSegmentChain(_))));
        assert_eq!(challenge.state, ChallengeState::AwaitingBisection);
    }

    #[test]
    fn test_execution_challenge_rejects_message_moves() {
        let mut challenge = BisectionChallenge::new(6, ChallengeKind::Execution);
        let mut staking = RecordingStaking::new();

        let result = one_step_proof_messages(&mut challenge, asserter(), H256::zero(), H256::zero(), H256::zero(), Ticks(0), &mut staking);
        assert!(matches!(result, Err(ChallengeError::KindMismatch { .. })));
    }
}
