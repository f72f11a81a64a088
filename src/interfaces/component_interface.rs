// src/interfaces/component_interface.rs
//! Standard interfaces shared by every challenge component
//!
//! Errors of every component expose a stable numeric code so that a
//! rejected transaction or a failed proof can be reported the same way a
//! contract revert reason would be.

use std::error::Error;
use std::fmt::{Debug, Display};

/// Standard error interface for all challenge components
pub trait ComponentError: Error + Debug + Display {
    /// Get the error code
    ///
    /// Codes are never zero: zero is reserved for "accepted".
    fn error_code(&self) -> u32;

    /// Get the error message
    fn error_message(&self) -> String {
        self.to_string()
    }
}
