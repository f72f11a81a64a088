// src/validator/trace.rs
//! Execution traces
//!
//! A trace records every step a machine takes together with the machine
//! hash and accumulators at each step boundary, so any step range can be
//! summarised as an assertion segment and any single step can be proven.

use ethereum_types::H256;
use log::debug;

use crate::challenge::{bisection_step_count, Assertion, AssertionSegment, ExecutionBisection};
use crate::error_handling::{ChallengeError, MachineError};
use crate::interfaces::InboxOracle;
use crate::one_step_proof::{Machine, OneStepProof, StepOutcome};
use crate::value::MachineStatus;

/// Recorded execution of a machine
#[derive(Debug, Clone)]
pub struct ExecutionTrace {
    time_bounds: [u128; 2],
    before_inbox: H256,
    steps: Vec<StepOutcome>,

    /// Machine hash before each step, then the final hash
    machine_hashes: Vec<H256>,

    /// Message accumulator before each step, then the final value
    message_accs: Vec<H256>,

    /// Log accumulator before each step, then the final value
    log_accs: Vec<H256>,
}

impl ExecutionTrace {
    /// Run `machine` for at most `max_steps` steps, stopping early when it
    /// halts or error-stops
    pub fn record(
        machine: &mut Machine,
        inbox: &dyn InboxOracle,
        time_bounds: [u128; 2],
        max_steps: usize,
    ) -> Result<Self, MachineError> {
        let mut trace = Self {
            time_bounds,
            before_inbox: inbox.inbox_hash(),
            steps: Vec::new(),
            machine_hashes: vec![machine.hash()],
            message_accs: vec![H256::zero()],
            log_accs: vec![H256::zero()],
        };

        while trace.steps.len() < max_steps && machine.status() == MachineStatus::Extensive {
            let outcome = machine.step(inbox, time_bounds)?;
            let message_acc = outcome.next_message_acc(&trace.message_accs[trace.steps.len()]);
            let log_acc = outcome.next_log_acc(&trace.log_accs[trace.steps.len()]);

            trace.machine_hashes.push(outcome.after_hash);
            trace.message_accs.push(message_acc);
            trace.log_accs.push(log_acc);
            trace.steps.push(outcome);
        }

        debug!(
            "Recorded {} steps, machine {:?}",
            trace.steps.len(),
            machine.status()
        );
        Ok(trace)
    }

    /// Number of recorded steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether no step was recorded
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Time bounds every step ran under
    pub fn time_bounds(&self) -> [u128; 2] {
        self.time_bounds
    }

    /// Inbox hash every step could read
    pub fn before_inbox(&self) -> H256 {
        self.before_inbox
    }

    /// The recorded steps
    pub fn steps(&self) -> &[StepOutcome] {
        &self.steps
    }

    /// Summary of steps `start .. start + steps`
    pub fn segment(&self, start: u64, steps: u64) -> Option<AssertionSegment> {
        let start = usize::try_from(start).ok()?;
        let end = start.checked_add(usize::try_from(steps).ok()?)?;
        if steps == 0 || end > self.steps.len() {
            return None;
        }

        let range = &self.steps[start..end];
        Some(AssertionSegment {
            before: self.machine_hashes[start],
            after: self.machine_hashes[end],
            did_inbox_insn: range.iter().any(|s| s.did_inbox_insn()),
            first_message: self.message_accs[start],
            last_message: self.message_accs[end],
            first_log: self.log_accs[start],
            last_log: self.log_accs[end],
            gas_used: range.iter().map(|s| s.gas).sum(),
            num_steps: steps,
        })
    }

    fn split(&self, start: u64, steps: u64, count: usize) -> Result<Vec<AssertionSegment>, ChallengeError> {
        let mut offset = start;
        let mut segments = Vec::with_capacity(count);
        for i in 0..count {
            let child_steps = bisection_step_count(i, count, steps);
            let segment = self.segment(offset, child_steps).ok_or_else(|| {
                ChallengeError::MalformedSegmentChain(format!(
                    "trace of {} steps has no segment at {} of {} steps",
                    self.steps.len(),
                    offset,
                    child_steps
                ))
            })?;
            segments.push(segment);
            offset += child_steps;
        }
        Ok(segments)
    }

    /// The whole trace as an assertion of `count` segments
    pub fn assertion(&self, count: usize) -> Result<Assertion, ChallengeError> {
        Assertion::new(self.split(0, self.steps.len() as u64, count)?)
    }

    /// Subdivision of steps `start .. start + steps` into `count` children
    pub fn bisection(&self, start: u64, steps: u64, count: usize) -> Result<ExecutionBisection, ChallengeError> {
        let segments = self.split(start, steps, count)?;
        ExecutionBisection::from_segments(&segments, self.time_bounds, self.before_inbox)
    }

    /// Verifier claim for step `index`
    pub fn one_step_claim(&self, index: u64) -> Option<OneStepProof> {
        let index = usize::try_from(index).ok()?;
        let step = self.steps.get(index)?;
        Some(step.claim(self.message_accs[index], self.log_accs[index]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::StaticInbox;
    use crate::one_step_proof::opcodes::{ADD, HALT, LOG, NOP};
    use crate::one_step_proof::{validate_proof, Program};
    use crate::value::{Operation, Value};
    use ethereum_types::U256;

    fn trace() -> ExecutionTrace {
        let program = Program::new(vec![
            Operation::with_immediate(ADD, Value::from(3u64)),
            Operation::new(LOG),
            Operation::new(NOP),
            Operation::new(HALT),
        ]);
        let mut machine = Machine::new(program, Value::empty_tuple(), U256::from(10_000u64))
            .with_data_stack(vec![Value::from(2u64)]);
        ExecutionTrace::record(&mut machine, &StaticInbox::empty(), [0, 100], 100).unwrap()
    }

    #[test]
    fn test_record_stops_at_halt() {
        let trace = trace();
        assert_eq!(trace.len(), 4);
        assert_eq!(trace.machine_hashes[4], crate::value::halted_hash());
    }

    #[test]
    fn test_segments_chain_and_sum() {
        let trace = trace();
        let assertion = trace.assertion(3).unwrap();

        let steps: Vec<u64> = assertion.segments().iter().map(|s| s.num_steps).collect();
        assert_eq!(steps, vec![2, 1, 1]);
        assert_eq!(assertion.as_segment(), trace.segment(0, 4).unwrap());
        assert_ne!(trace.log_accs[2], H256::zero());
    }

    #[test]
    fn test_every_step_claim_verifies() {
        let trace = trace();
        for index in 0..trace.len() as u64 {
            let claim = trace.one_step_claim(index).unwrap();
            assert_eq!(validate_proof(&claim), Ok(()), "step {}", index);
        }
    }

    #[test]
    fn test_out_of_range_segment() {
        let trace = trace();
        assert!(trace.segment(3, 2).is_none());
        assert!(trace.segment(0, 0).is_none());
        assert!(trace.one_step_claim(4).is_none());
    }
}
