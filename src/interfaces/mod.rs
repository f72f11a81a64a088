// src/interfaces/mod.rs
//! Interfaces module
//!
//! Collaborator traits the challenge protocol depends on (the staking
//! contract and the inbox oracle) and the error interface shared by all
//! components.

mod component_interface;
mod inbox_interface;
mod staking_interface;

pub use component_interface::ComponentError;
pub use inbox_interface::{InboxOracle, StaticInbox};
pub use staking_interface::{RecordingStaking, Resolution, StakingContract};
