// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Traits at the seams of the bridge.
//!
//! ## Core Traits
//!
//! - [`ValidatableConfig`] - Configuration validation interface
//! - [`LinearOperator`] - Callable invoked with decoded custom-call views
//!
//! ## Implementation Guidelines
//!
//! 1. **Validation**: Call `ValidatableConfig::validate()` before using a config
//! 2. **Operators write in place**: the output view aliases runtime memory,
//!    so operators must fill it rather than return a fresh array
//! 3. **Error handling**: report operator failures as `BridgeError::Callback`

use crate::error::{BridgeError, Result};
use crate::view::{ArrayView, ArrayViewMut};

/// Configuration validation trait.
///
/// # Example
///
/// ```rust
/// use linop_bridge::{ValidatableConfig, BridgeError, Result};
///
/// #[derive(Clone)]
/// struct FftConfig {
///     workers: usize,
/// }
///
/// impl ValidatableConfig for FftConfig {
///     fn validate(&self) -> Result<()> {
///         if self.workers == 0 {
///             return Err(BridgeError::invalid_config("workers must be > 0"));
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait ValidatableConfig: Clone + Send + Sync {
    /// Validate the configuration parameters.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::InvalidConfig` if validation fails.
    fn validate(&self) -> Result<()>;
}

/// A linear operator invoked through the custom-call protocol.
///
/// Receives the decoded input views in call-site order, the writable output
/// view aliasing the runtime's output buffer, and the flat parameter view.
/// The return value carries only success or failure.
///
/// Closures with a matching signature implement this trait.
///
/// # Example
///
/// ```rust
/// use linop_bridge::{ArrayView, ArrayViewMut, LinearOperator, Result};
///
/// struct Scale;
///
/// impl LinearOperator for Scale {
///     fn apply(&self, args: &[ArrayView<'_>], out: &mut ArrayViewMut<'_>, params: &ArrayView<'_>) -> Result<()> {
///         let factor = params.as_slice::<f64>()?[0];
///         let x = args[0].as_slice::<f64>()?;
///         for (o, v) in out.as_slice_mut::<f64>()?.iter_mut().zip(x) {
///             *o = factor * v;
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait LinearOperator: Send + Sync {
    /// Apply the operator.
    ///
    /// # Errors
    ///
    /// Implementations return `BridgeError::Callback` (or any view access
    /// error) on failure; the dispatcher propagates it unchanged.
    fn apply(
        &self,
        args: &[ArrayView<'_>],
        out: &mut ArrayViewMut<'_>,
        params: &ArrayView<'_>,
    ) -> Result<()>;

    /// Name used in dispatch logs.
    fn name(&self) -> &str {
        "anonymous"
    }
}

impl<F> LinearOperator for F
where
    F: Fn(&[ArrayView<'_>], &mut ArrayViewMut<'_>, &ArrayView<'_>) -> Result<()> + Send + Sync,
{
    fn apply(
        &self,
        args: &[ArrayView<'_>],
        out: &mut ArrayViewMut<'_>,
        params: &ArrayView<'_>,
    ) -> Result<()> {
        self(args, out, params)
    }
}

/// Pin a closure to the operator signature.
///
/// Annotating the parameters of a closure is not enough to make it generic
/// over the view lifetimes; passing it through this function is.
pub fn operator_fn<F>(f: F) -> F
where
    F: Fn(&[ArrayView<'_>], &mut ArrayViewMut<'_>, &ArrayView<'_>) -> Result<()> + Send + Sync,
{
    f
}

/// Check that an operator received the argument count it expects.
///
/// # Errors
///
/// Returns `BridgeError::Callback` describing the mismatch.
pub fn expect_args(args: &[ArrayView<'_>], expected: usize) -> Result<()> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(BridgeError::callback(format!(
            "expected {expected} arguments, got {}",
            args.len()
        )))
    }
}
