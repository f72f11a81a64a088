// tests/one_step_proof_test.rs
//! One-step verifier against proofs produced by the off-chain machine

use avm_challenge::one_step_proof::opcodes::{
    AUXPOP, AUXPUSH, DIV, DUP0, ERRSET, GETTIME, HALT, INBOX, LOG, NOP, POP, SEND, TLEN,
};
use avm_challenge::value::{error_stop_hash, halted_hash, MachineStatus};
use avm_challenge::{
    validate_proof, validate_proof_code, ComponentError, ExecutionTrace, Machine, OneStepProof, Operation, Program,
    StaticInbox, Value, VerifierError,
};
use ethereum_types::{H256, U256};

const HANDLER: usize = 11;

/// Exercises stacks, tuples, I/O and a handled fault
fn operations(handler: Option<Value>) -> Vec<Operation> {
    let errset = match handler {
        Some(handler) => Operation::with_immediate(ERRSET, handler),
        None => Operation::new(NOP),
    };
    vec![
        errset,
        Operation::new(DUP0),
        Operation::new(AUXPUSH),
        Operation::new(GETTIME),
        Operation::new(TLEN),
        Operation::new(SEND),
        Operation::new(LOG),
        Operation::with_immediate(INBOX, Value::from(0u64)),
        Operation::new(POP),
        Operation::with_immediate(NOP, Value::from(0u64)),
        // 7 / 0 faults and lands in the handler
        Operation::with_immediate(DIV, Value::from(7u64)),
        Operation::new(AUXPOP),
        Operation::new(HALT),
    ]
}

fn program() -> Program {
    // Code points after the first are unaffected by its immediate
    let draft = Program::new(operations(None));
    let handler = draft.code_point(HANDLER as u64).unwrap().clone();
    Program::new(operations(Some(Value::CodePoint(handler))))
}

fn inbox() -> StaticInbox {
    StaticInbox::new(Value::tuple(vec![Value::from(42u64), Value::from(43u64)]).unwrap())
}

fn trace() -> (ExecutionTrace, Machine) {
    let mut machine = Machine::new(program(), Value::from(9u64), U256::from(100_000u64))
        .with_data_stack(vec![Value::from(2u64)]);
    let trace = ExecutionTrace::record(&mut machine, &inbox(), [0, 1_000], 100).unwrap();
    (trace, machine)
}

fn claim(index: u64) -> OneStepProof {
    trace().0.one_step_claim(index).unwrap()
}

fn step_with_opcode(opcode: u8) -> u64 {
    let (trace, _) = trace();
    trace
        .steps()
        .iter()
        .position(|s| s.opcode == opcode)
        .unwrap() as u64
}

#[test]
fn test_every_step_round_trips() {
    let (trace, machine) = trace();
    assert_eq!(trace.len(), 13);
    assert_eq!(machine.status(), MachineStatus::Halted);
    assert_eq!(trace.steps()[trace.len() - 1].after_hash, halted_hash());

    for index in 0..trace.len() as u64 {
        let claim = trace.one_step_claim(index).unwrap();
        assert_eq!(validate_proof(&claim), Ok(()), "step {}", index);
        assert_eq!(validate_proof_code(&claim), 0);
    }
}

#[test]
fn test_fault_jumps_to_handler() {
    let (trace, _) = trace();
    let div = step_with_opcode(DIV) as usize;

    assert_eq!(trace.steps()[div + 1].opcode, AUXPOP);
    assert_eq!(trace.steps()[div].gas, 4);
}

#[test]
fn test_fault_without_handler_error_stops() {
    let program = Program::new(vec![Operation::with_immediate(DIV, Value::from(1u64))]);
    let mut machine = Machine::new(program, Value::empty_tuple(), U256::from(100u64))
        .with_data_stack(vec![Value::from(0u64)]);
    let trace = ExecutionTrace::record(&mut machine, &StaticInbox::empty(), [0, 0], 10).unwrap();

    assert_eq!(trace.len(), 1);
    let claim = trace.one_step_claim(0).unwrap();
    assert_eq!(claim.after_hash, error_stop_hash());
    assert_eq!(validate_proof(&claim), Ok(()));
}

#[test]
fn test_tampered_after_hash_rejected() {
    let mut claim = claim(1);
    claim.after_hash = H256::repeat_byte(0x42);

    assert!(matches!(
        validate_proof(&claim),
        Err(VerifierError::MismatchedAfterHash { .. })
    ));
    assert_eq!(validate_proof_code(&claim), 3004);
}

#[test]
fn test_tampered_before_hash_rejected() {
    let mut claim = claim(2);
    claim.before_hash = H256::repeat_byte(0x42);

    assert!(matches!(
        validate_proof(&claim),
        Err(VerifierError::MismatchedBeforeHash(_))
    ));
}

#[test]
fn test_wrong_gas_rejected() {
    let mut claim = claim(3);
    claim.gas += 1;

    assert!(matches!(validate_proof(&claim), Err(VerifierError::GasMismatch { .. })));
}

#[test]
fn test_hidden_message_rejected() {
    let mut claim = claim(step_with_opcode(SEND));
    claim.last_message = claim.first_message;

    assert!(matches!(validate_proof(&claim), Err(VerifierError::EffectMismatch(_))));
}

#[test]
fn test_hidden_inbox_read_rejected() {
    let mut claim = claim(step_with_opcode(INBOX));
    assert!(claim.did_inbox_insn);
    claim.did_inbox_insn = false;

    assert!(matches!(validate_proof(&claim), Err(VerifierError::EffectMismatch(_))));
}

#[test]
fn test_truncated_proof_rejected() {
    let mut claim = claim(4);
    claim.proof.truncate(claim.proof.len() / 2);

    let code = validate_proof_code(&claim);
    assert_ne!(code, 0);
    assert_eq!(
        validate_proof(&claim).map_err(|e| e.error_code()),
        Err(1000)
    );
}

#[test]
fn test_trailing_bytes_rejected() {
    let mut claim = claim(4);
    claim.proof.push(0);

    assert!(matches!(validate_proof(&claim), Err(VerifierError::TrailingBytes(1))));
}
