// src/config.rs
//! Challenge protocol configuration
//!
//! Loaded from JSON; every field has a default so partial files are
//! accepted.

use std::fs;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::challenge::Ticks;
use crate::error_handling::ConfigError;
use crate::one_step_proof::ONE_STEP_GAS_THRESHOLD;
use crate::TICKS_PER_BLOCK;

/// Challenge protocol configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengeConfig {
    /// Ticks per ledger block
    pub ticks_per_block: u64,

    /// Time each party has to move, in ticks
    ///
    /// Initialisations asking for another period are rejected.
    pub challenge_period_ticks: u128,

    /// Largest number of children one bisection may produce
    pub max_bisection_degree: usize,

    /// A one-step child must declare less gas than this
    pub one_step_gas_threshold: u64,

    /// Resolved challenges kept for lookup after they leave play
    pub archive_capacity: usize,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            ticks_per_block: TICKS_PER_BLOCK,
            challenge_period_ticks: 20 * TICKS_PER_BLOCK as u128,
            max_bisection_degree: 400,
            one_step_gas_threshold: ONE_STEP_GAS_THRESHOLD,
            archive_capacity: 256,
        }
    }
}

impl ChallengeConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: ChallengeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!("Loading challenge configuration from {}", path.display());
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check that the values describe a usable protocol
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ticks_per_block == 0 {
            return Err(ConfigError::Invalid("ticks_per_block must be positive".into()));
        }
        if self.challenge_period_ticks == 0 {
            return Err(ConfigError::Invalid("challenge_period_ticks must be positive".into()));
        }
        if self.max_bisection_degree < 2 {
            return Err(ConfigError::Invalid(format!(
                "max_bisection_degree {} cannot split a segment",
                self.max_bisection_degree
            )));
        }
        if self.one_step_gas_threshold == 0 {
            return Err(ConfigError::Invalid("one_step_gas_threshold must be positive".into()));
        }
        Ok(())
    }

    /// The challenge period as ticks
    pub fn challenge_period(&self) -> Ticks {
        Ticks(self.challenge_period_ticks)
    }

    /// Ledger time at the start of `block`
    pub fn block_ticks(&self, block: u64) -> Ticks {
        Ticks::from_blocks(block, self.ticks_per_block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = ChallengeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ticks_per_block, 1000);
        assert_eq!(config.block_ticks(3), Ticks(3000));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = ChallengeConfig::from_json_str(r#"{ "challenge_period_ticks": 100 }"#).unwrap();
        assert_eq!(config.challenge_period(), Ticks(100));
        assert_eq!(config.max_bisection_degree, 400);
        assert_eq!(config.archive_capacity, 256);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let result = ChallengeConfig::from_json_str(r#"{ "max_bisection_degree": 1 }"#);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let result = ChallengeConfig::from_json_str("not json");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = ChallengeConfig::from_file("/nonexistent/avm-challenge.json");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
