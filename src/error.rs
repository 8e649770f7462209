// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Error types for custom-call decoding and dispatch.
//!
//! Every failure in this crate is one-shot: a call either decodes and runs to
//! completion or it is abandoned with one of these errors. Nothing is retried.
//!
//! ## Error Hierarchy
//!
//! ```text
//! BridgeError
//! ├── UnknownDtype      - Dtype tag outside the closed wire set
//! ├── NullSlot          - Null slot or data pointer
//! ├── NullOutput        - Null output buffer for a non-empty output
//! ├── SlotsExhausted    - Grammar ran past a bounded slot array
//! ├── RankTooLarge      - Rank above the configured limit
//! ├── TooManyArgs       - Argument count above the configured limit
//! ├── SizeOverflow      - Element count or byte length overflows usize
//! ├── DtypeMismatch     - Typed access with the wrong element type
//! ├── Misaligned        - Typed access on a misaligned address
//! ├── IndexOutOfBounds  - Indexing helper misuse
//! ├── InvalidConfig     - Configuration validation failures
//! └── Callback          - Failure raised by the dispatched callable
//! ```
//!
//! ## Wrapping
//!
//! Operators implemented in Rust report their own failures through
//! [`BridgeError::callback`], or wrap `BridgeError` in a crate-specific type:
//!
//! ```rust
//! use linop_bridge::BridgeError;
//! use thiserror::Error;
//!
//! #[derive(Error, Debug)]
//! pub enum SolverError {
//!     #[error("did not converge after {0} iterations")]
//!     NoConvergence(usize),
//!
//!     #[error(transparent)]
//!     Bridge(#[from] BridgeError),
//! }
//! ```

use crate::dtype::DType;
use thiserror::Error;

/// Result type alias for linop-bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors raised while decoding a custom call or running its callable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BridgeError {
    /// Dtype tag not in {3, 7, 32, 67, 71}.
    ///
    /// The tag is reported after narrowing to 8 bits, which is the value
    /// actually looked up.
    #[error("unknown dtype tag: {tag}")]
    UnknownDtype {
        /// Narrowed tag value.
        tag: u8,
    },

    /// A slot pointer, or a data pointer read from a slot, is null.
    #[error("null pointer in slot {index}")]
    NullSlot {
        /// Index of the offending slot.
        index: usize,
    },

    /// The runtime passed a null output buffer for a non-empty output.
    #[error("null output buffer for {len} output elements")]
    NullOutput {
        /// Number of output elements declared.
        len: usize,
    },

    /// The grammar needs more slots than the slot array holds.
    ///
    /// Only detectable when the caller supplies a bounded slot array.
    #[error("slot array exhausted: need slot {needed}, have {available}")]
    SlotsExhausted {
        /// Index of the slot that was requested.
        needed: usize,
        /// Number of slots available.
        available: usize,
    },

    /// Declared rank exceeds the configured maximum.
    #[error("rank {rank} exceeds limit {max}")]
    RankTooLarge {
        /// Declared rank.
        rank: u64,
        /// Configured maximum.
        max: usize,
    },

    /// Declared argument count exceeds the configured maximum.
    #[error("argument count {nargs} exceeds limit {max}")]
    TooManyArgs {
        /// Declared argument count.
        nargs: u64,
        /// Configured maximum.
        max: usize,
    },

    /// Element count or byte length does not fit in `usize`.
    #[error("size overflow computing extent of shape {shape:?}")]
    SizeOverflow {
        /// Shape whose size overflowed.
        shape: Vec<u64>,
    },

    /// Typed access requested an element type that differs from the view's dtype.
    #[error("dtype mismatch: expected {expected}, got {actual}")]
    DtypeMismatch {
        /// Dtype requested by the caller.
        expected: DType,
        /// Dtype of the view.
        actual: DType,
    },

    /// Base address is not aligned for the view's element type.
    #[error("address {address:#x} is not aligned for {dtype}")]
    Misaligned {
        /// Dtype of the view.
        dtype: DType,
        /// Offending base address.
        address: usize,
    },

    /// Multi-dimensional index outside the view's shape.
    #[error("index {index:?} out of bounds for shape {shape:?}")]
    IndexOutOfBounds {
        /// Requested index.
        index: Vec<usize>,
        /// Shape of the view.
        shape: Vec<usize>,
    },

    /// A dispatch was started by the thread already holding the exclusive
    /// context, typically from inside a running callable.
    #[error("re-entrant dispatch: the calling thread already holds the exclusive context")]
    ReentrantDispatch,

    /// Invalid configuration parameter.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failure raised by the dispatched callable, propagated unchanged.
    #[error("callback failed: {0}")]
    Callback(String),
}

impl BridgeError {
    /// Create an unknown dtype error.
    pub fn unknown_dtype(tag: u8) -> Self {
        Self::UnknownDtype { tag }
    }

    /// Create a null slot error.
    pub fn null_slot(index: usize) -> Self {
        Self::NullSlot { index }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a callback error.
    pub fn callback(msg: impl Into<String>) -> Self {
        Self::Callback(msg.into())
    }

    /// Whether this error was raised while decoding, before any callable ran.
    #[must_use]
    pub fn is_decode_fault(&self) -> bool {
        matches!(
            self,
            Self::UnknownDtype { .. }
                | Self::NullSlot { .. }
                | Self::NullOutput { .. }
                | Self::SlotsExhausted { .. }
                | Self::RankTooLarge { .. }
                | Self::TooManyArgs { .. }
                | Self::SizeOverflow { .. }
        )
    }
}
