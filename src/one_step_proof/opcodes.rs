// src/one_step_proof/opcodes.rs
//! AVM opcode table
//!
//! Stack arities and gas costs for every instruction the verifier accepts.
//! Every instruction may carry an immediate; the immediate is pushed before
//! the instruction runs and counts towards its data pops.

use std::sync::OnceLock;

pub const ADD: u8 = 0x01;
pub const MUL: u8 = 0x02;
pub const SUB: u8 = 0x03;
pub const DIV: u8 = 0x04;
pub const SDIV: u8 = 0x05;
pub const MOD: u8 = 0x06;
pub const SMOD: u8 = 0x07;
pub const ADDMOD: u8 = 0x08;
pub const MULMOD: u8 = 0x09;
pub const EXP: u8 = 0x0a;

pub const LT: u8 = 0x10;
pub const GT: u8 = 0x11;
pub const SLT: u8 = 0x12;
pub const SGT: u8 = 0x13;
pub const EQ: u8 = 0x14;
pub const ISZERO: u8 = 0x15;
pub const AND: u8 = 0x16;
pub const OR: u8 = 0x17;
pub const XOR: u8 = 0x18;
pub const NOT: u8 = 0x19;
pub const BYTE: u8 = 0x1a;
pub const SIGNEXTEND: u8 = 0x1b;

pub const HASH: u8 = 0x20;
pub const TYPE: u8 = 0x21;
pub const ETHHASH2: u8 = 0x22;

pub const POP: u8 = 0x30;
pub const SPUSH: u8 = 0x31;
pub const RPUSH: u8 = 0x32;
pub const RSET: u8 = 0x33;
pub const JUMP: u8 = 0x34;
pub const CJUMP: u8 = 0x35;
pub const STACKEMPTY: u8 = 0x36;
pub const PCPUSH: u8 = 0x37;
pub const AUXPUSH: u8 = 0x38;
pub const AUXPOP: u8 = 0x39;
pub const AUXSTACKEMPTY: u8 = 0x3a;
pub const NOP: u8 = 0x3b;
pub const ERRPUSH: u8 = 0x3c;
pub const ERRSET: u8 = 0x3d;

pub const DUP0: u8 = 0x40;
pub const DUP1: u8 = 0x41;
pub const DUP2: u8 = 0x42;
pub const SWAP1: u8 = 0x43;
pub const SWAP2: u8 = 0x44;

pub const TGET: u8 = 0x50;
pub const TSET: u8 = 0x51;
pub const TLEN: u8 = 0x52;

pub const BREAKPOINT: u8 = 0x60;
pub const LOG: u8 = 0x61;

pub const SEND: u8 = 0x70;
pub const GETTIME: u8 = 0x71;
pub const INBOX: u8 = 0x72;
pub const ERROR: u8 = 0x73;
pub const HALT: u8 = 0x74;
pub const DEBUG: u8 = 0x75;

/// Static description of one opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeInfo {
    /// Opcode byte
    pub opcode: u8,

    /// Mnemonic
    pub name: &'static str,

    /// Values popped from the data stack, immediate included
    pub data_pops: usize,

    /// Values pushed onto the data stack
    pub data_pushes: usize,

    /// Values popped from the aux stack
    pub aux_pops: usize,

    /// Values pushed onto the aux stack
    pub aux_pushes: usize,

    /// Gas charged
    pub gas: u64,
}

const fn op(
    opcode: u8,
    name: &'static str,
    data_pops: usize,
    data_pushes: usize,
    gas: u64,
) -> OpcodeInfo {
    OpcodeInfo {
        opcode,
        name,
        data_pops,
        data_pushes,
        aux_pops: 0,
        aux_pushes: 0,
        gas,
    }
}

/// The opcode table
pub const OPCODES: &[OpcodeInfo] = &[
    op(ADD, "add", 2, 1, 3),
    op(MUL, "mul", 2, 1, 3),
    op(SUB, "sub", 2, 1, 3),
    op(DIV, "div", 2, 1, 4),
    op(SDIV, "sdiv", 2, 1, 7),
    op(MOD, "mod", 2, 1, 4),
    op(SMOD, "smod", 2, 1, 7),
    op(ADDMOD, "addmod", 3, 1, 4),
    op(MULMOD, "mulmod", 3, 1, 4),
    op(EXP, "exp", 2, 1, 25),
    op(LT, "lt", 2, 1, 2),
    op(GT, "gt", 2, 1, 2),
    op(SLT, "slt", 2, 1, 2),
    op(SGT, "sgt", 2, 1, 2),
    op(EQ, "eq", 2, 1, 2),
    op(ISZERO, "iszero", 1, 1, 1),
    op(AND, "and", 2, 1, 2),
    op(OR, "or", 2, 1, 2),
    op(XOR, "xor", 2, 1, 2),
    op(NOT, "not", 1, 1, 1),
    op(BYTE, "byte", 2, 1, 4),
    op(SIGNEXTEND, "signextend", 2, 1, 7),
    op(HASH, "hash", 1, 1, 7),
    op(TYPE, "type", 1, 1, 3),
    op(ETHHASH2, "ethhash2", 2, 1, 8),
    op(POP, "pop", 1, 0, 1),
    op(SPUSH, "spush", 0, 1, 1),
    op(RPUSH, "rpush", 0, 1, 1),
    op(RSET, "rset", 1, 0, 2),
    op(JUMP, "jump", 1, 0, 4),
    op(CJUMP, "cjump", 2, 0, 4),
    op(STACKEMPTY, "stackempty", 0, 1, 2),
    op(PCPUSH, "pcpush", 0, 1, 1),
    OpcodeInfo {
        opcode: AUXPUSH,
        name: "auxpush",
        data_pops: 1,
        data_pushes: 0,
        aux_pops: 0,
        aux_pushes: 1,
        gas: 1,
    },
    OpcodeInfo {
        opcode: AUXPOP,
        name: "auxpop",
        data_pops: 0,
        data_pushes: 1,
        aux_pops: 1,
        aux_pushes: 0,
        gas: 1,
    },
    op(AUXSTACKEMPTY, "auxstackempty", 0, 1, 2),
    op(NOP, "nop", 0, 0, 1),
    op(ERRPUSH, "errpush", 0, 1, 1),
    op(ERRSET, "errset", 1, 0, 1),
    op(DUP0, "dup0", 1, 2, 1),
    op(DUP1, "dup1", 2, 3, 1),
    op(DUP2, "dup2", 3, 4, 1),
    op(SWAP1, "swap1", 2, 2, 1),
    op(SWAP2, "swap2", 3, 3, 1),
    op(TGET, "tget", 2, 1, 2),
    op(TSET, "tset", 3, 1, 40),
    op(TLEN, "tlen", 1, 1, 2),
    op(BREAKPOINT, "breakpoint", 0, 0, 100),
    op(LOG, "log", 1, 0, 100),
    op(SEND, "send", 1, 0, 100),
    op(GETTIME, "gettime", 0, 1, 40),
    op(INBOX, "inbox", 1, 1, 40),
    op(ERROR, "error", 0, 0, 5),
    op(HALT, "halt", 0, 0, 10),
    op(DEBUG, "debug", 0, 0, 1),
];

const fn max_gas(table: &[OpcodeInfo]) -> u64 {
    let mut max = 0;
    let mut i = 0;
    while i < table.len() {
        if table[i].gas > max {
            max = table[i].gas;
        }
        i += 1;
    }
    max
}

/// Highest gas cost of any single instruction
pub const MAX_OPCODE_GAS: u64 = max_gas(OPCODES);

/// A segment of one step must declare less gas than this
pub const ONE_STEP_GAS_THRESHOLD: u64 = MAX_OPCODE_GAS + 1;

static OPCODE_INDEX: OnceLock<[Option<usize>; 256]> = OnceLock::new();

/// Look up an opcode in the table
pub fn lookup(opcode: u8) -> Option<&'static OpcodeInfo> {
    let index = OPCODE_INDEX.get_or_init(|| {
        let mut index = [None; 256];
        for (position, info) in OPCODES.iter().enumerate() {
            index[info.opcode as usize] = Some(position);
        }
        index
    });
    index[opcode as usize].map(|position| &OPCODES[position])
}
