// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Decode limits with environment variable overrides.
//!
//! The runtime is trusted to produce well-formed slot arrays, but a corrupt
//! rank or argument count would otherwise send the decoder walking through
//! arbitrary memory. These limits reject implausible values before any
//! extent is read. They never change the wire format.
//!
//! ## Environment Variables
//!
//! - `LINOP_BRIDGE_MAX_RANK` - Maximum rank of any operand (default 64)
//! - `LINOP_BRIDGE_MAX_ARGS` - Maximum number of input arguments (default 4096)
//! - `LINOP_BRIDGE_CHECK_NULL` - Set to `0` or `false` to skip null data-pointer checks
//!
//! ## Example
//!
//! ```rust
//! use linop_bridge::{DecodeConfig, ValidatableConfig};
//!
//! let config = DecodeConfig::new().with_max_rank(8).with_max_args(16);
//! config.validate()?;
//! # Ok::<(), linop_bridge::BridgeError>(())
//! ```

use crate::error::{BridgeError, Result};
use crate::traits::ValidatableConfig;
use std::sync::OnceLock;

/// Default maximum operand rank.
pub const DEFAULT_MAX_RANK: usize = 64;

/// Default maximum number of input arguments.
pub const DEFAULT_MAX_ARGS: usize = 4096;

/// Defensive limits applied while decoding a slot array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeConfig {
    /// Maximum rank of any argument, the output, or the params buffer.
    pub max_rank: usize,
    /// Maximum number of input arguments.
    pub max_args: usize,
    /// Reject null data pointers and a null output buffer for non-empty views.
    ///
    /// Scalar slots (tags, ranks, extents) are always checked.
    pub check_null: bool,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            max_rank: DEFAULT_MAX_RANK,
            max_args: DEFAULT_MAX_ARGS,
            check_null: true,
        }
    }
}

impl DecodeConfig {
    /// Create a decode configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum operand rank.
    #[must_use]
    pub fn with_max_rank(mut self, max_rank: usize) -> Self {
        self.max_rank = max_rank;
        self
    }

    /// Set the maximum number of input arguments.
    #[must_use]
    pub fn with_max_args(mut self, max_args: usize) -> Self {
        self.max_args = max_args;
        self
    }

    /// Enable or disable null-pointer checks.
    #[must_use]
    pub fn with_check_null(mut self, check: bool) -> Self {
        self.check_null = check;
        self
    }

    /// Build configuration from environment variables.
    ///
    /// Unparseable values are ignored and the default is kept.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(rank) = env_usize("LINOP_BRIDGE_MAX_RANK") {
            config.max_rank = rank;
        }
        if let Some(args) = env_usize("LINOP_BRIDGE_MAX_ARGS") {
            config.max_args = args;
        }
        if let Ok(val) = std::env::var("LINOP_BRIDGE_CHECK_NULL") {
            let val = val.to_lowercase();
            if val == "0" || val == "false" {
                config.check_null = false;
            }
        }

        config
    }

    /// Process-wide configuration used by the ABI entry points.
    ///
    /// Read from the environment on first use. Falls back to the defaults if
    /// the environment yields an invalid configuration.
    #[must_use]
    pub fn global() -> &'static DecodeConfig {
        static GLOBAL: OnceLock<DecodeConfig> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            let config = Self::from_env();
            match config.validate() {
                Ok(()) => config,
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring invalid decode configuration from environment");
                    Self::default()
                }
            }
        })
    }
}

fn env_usize(var: &str) -> Option<usize> {
    std::env::var(var).ok().and_then(|val| val.trim().parse().ok())
}

impl ValidatableConfig for DecodeConfig {
    fn validate(&self) -> Result<()> {
        if self.max_rank == 0 {
            return Err(BridgeError::invalid_config(
                "max_rank must be > 0 (the params buffer is rank 1)",
            ));
        }
        if self.max_args == 0 {
            return Err(BridgeError::invalid_config("max_args must be > 0"));
        }
        Ok(())
    }
}
