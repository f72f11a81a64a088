// src/interfaces/inbox_interface.rs
//! Inbox oracle collaborator
//!
//! The oracle supplies the canonical message inbox a machine reads with the
//! `inbox` instruction. Only its hash takes part in one-step proofs.

use ethereum_types::H256;

use crate::value::Value;

/// Source of the canonical inbox value
pub trait InboxOracle {
    /// The full inbox value delivered by the `inbox` instruction
    fn inbox_value(&self) -> Value;

    /// Hash of the inbox value, the `beforeInbox` of a precondition
    fn inbox_hash(&self) -> H256 {
        self.inbox_value().hash()
    }
}

/// An inbox that always holds the same value
#[derive(Debug, Clone)]
pub struct StaticInbox {
    value: Value,
}

impl StaticInbox {
    /// Create an oracle serving `value`
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    /// An oracle serving the empty tuple
    pub fn empty() -> Self {
        Self::new(Value::empty_tuple())
    }
}

impl InboxOracle for StaticInbox {
    fn inbox_value(&self) -> Value {
        self.value.clone()
    }
}
