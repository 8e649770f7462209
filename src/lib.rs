// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! # linop-bridge
//!
//! Custom-call trampoline between an accelerator runtime and linear-operator
//! callables. The runtime invokes a target as `(void* out, void** in)`; this
//! crate decodes the `in` slot array into typed, zero-copy views over the
//! runtime's buffers and hands them to a callable, one call at a time.
//!
//! ## Slot Grammar
//!
//! ```text
//! slot 0          handle (reaches the callable)
//! slot 1          nargs
//! per argument    dtype tag, rank, rank extents, data address
//! output          dtype tag, rank, rank extents   (data is `out`)
//! params          dtype tag, element count, data address
//! ```
//!
//! Scalar slots point at a 64-bit integer; data slots are the buffer address.
//! Tags 3, 7, 32, 67 and 71 are f32, f64, u8, c64 and c128.
//!
//! ## Modules
//!
//! - [`decode`] - slot-array walker producing a [`DecodedCall`]
//! - [`encode`] - [`CallFrame`] builder producing slot arrays from Rust
//! - [`view`] - [`ArrayView`] / [`ArrayViewMut`] zero-copy typed views
//! - [`dtype`] - wire dtype tags and the [`Element`] trait
//! - [`dispatch`] - exclusive context, native operators and the native entry point
//! - [`config`] - defensive decode limits with environment overrides
//! - [`error`] - [`BridgeError`] taxonomy
//! - [`logging`] - `tracing` subscriber setup and dispatch events
//! - [`traits`] - [`LinearOperator`] and [`ValidatableConfig`]
//! - `python` - the `cpu_pycall` target and its capsule registration (feature `python`)
//!
//! ## Quick Start
//!
//! ```rust
//! use linop_bridge::{dispatch, CallFrame, DType, DecodeConfig, OperatorHandle, Result};
//!
//! fn main() -> Result<()> {
//!     let negate = OperatorHandle::from_fn(|args, out, _params| {
//!         let x = args[0].as_slice::<f64>()?;
//!         for (o, v) in out.as_slice_mut::<f64>()?.iter_mut().zip(x) {
//!             *o = -v;
//!         }
//!         Ok(())
//!     });
//!
//!     let x = [1.0_f64, -2.0];
//!     let params = [0_u8; 0];
//!     let mut out = [0.0_f64; 2];
//!     let encoded = CallFrame::new(negate.as_handle())
//!         .arg_slice(&x, &[2])?
//!         .output(DType::F64, &[2])
//!         .params_slice(&params)
//!         .encode()?;
//!
//!     unsafe { dispatch(out.as_mut_ptr().cast(), encoded.slots(), &DecodeConfig::default())? };
//!     assert_eq!(out, [-1.0, 2.0]);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! - `python` - `cpu_pycall`, `registrations()` and the `linop_bridge_bindings` module via `PyO3`
//! - `extension-module` - `python`, built as an importable extension module (no libpython link)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod decode;
pub mod dispatch;
pub mod dtype;
pub mod encode;
pub mod error;
pub mod logging;
pub mod traits;
pub mod view;

#[cfg(feature = "python")]
pub mod python;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-exports for convenience
pub use config::DecodeConfig;
pub use decode::{decode, decode_raw, DecodedCall};
pub use dispatch::{
    dispatch, dispatch_raw, exclusive_context, take_last_error, ContextGuard, CustomCallTarget,
    ExclusiveContext, OperatorHandle,
};
pub use dtype::{DType, Element};
pub use encode::{CallFrame, EncodedCall};
pub use error::{BridgeError, Result};
pub use logging::{init_logging, LogConfig, LogLevel};
pub use traits::{expect_args, operator_fn, LinearOperator, ValidatableConfig};
pub use view::{ArrayView, ArrayViewMut};
