// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Dispatch of decoded custom calls under the exclusive execution context.
//!
//! ## Why This Module Exists
//!
//! The runtime may call a custom-call target from several threads at once,
//! but the callables behind it are not assumed to be re-entrant. Every
//! dispatch therefore runs inside a process-wide exclusive context: acquired
//! before decoding, released after the callable returns, on every exit path.
//!
//! ## Design Decisions
//!
//! - **Token, not lock guard**: [`ExclusiveContext::acquire`] hands out a
//!   [`ContextGuard`] that is `Send`. A caller holding an interpreter lock can
//!   release it while blocking on the context and still carry the guard out.
//!
//! - **Not re-entrant, fails fast**: the context records its owning thread.
//!   A callable that triggers another dispatch on the same thread gets
//!   [`BridgeError::ReentrantDispatch`] instead of blocking forever.
//!
//! - **Void ABI**: the runtime's entry signature returns nothing. Failures at
//!   that boundary are logged, stored for [`take_last_error`], and the call
//!   returns. Panics never cross the boundary.

use crate::config::DecodeConfig;
use crate::decode::{decode, decode_raw, DecodedCall};
use crate::error::{BridgeError, Result};
use crate::logging::log_dispatch;
use crate::traits::LinearOperator;
use crate::view::{ArrayView, ArrayViewMut};
use std::ffi::c_void;
use std::panic::AssertUnwindSafe;
use std::sync::{Condvar, Mutex, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Instant;

/// Signature of a custom-call target: `(out, in[])`.
pub type CustomCallTarget = unsafe extern "C" fn(*mut c_void, *const *const c_void);

/// A process-wide token serializing callable execution.
#[derive(Debug, Default)]
pub struct ExclusiveContext {
    owner: Mutex<Option<ThreadId>>,
    released: Condvar,
}

impl ExclusiveContext {
    /// Create an unheld context.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            owner: Mutex::new(None),
            released: Condvar::new(),
        }
    }

    /// Block until the context is free, then take it.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ReentrantDispatch`] if the calling thread
    /// already holds the context.
    pub fn acquire(&self) -> Result<ContextGuard<'_>> {
        let me = thread::current().id();
        let mut owner = self.owner.lock().unwrap_or_else(PoisonError::into_inner);
        while let Some(holder) = *owner {
            if holder == me {
                return Err(BridgeError::ReentrantDispatch);
            }
            owner = self
                .released
                .wait(owner)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *owner = Some(me);
        Ok(ContextGuard { context: self })
    }

    /// Take the context if it is free.
    pub fn try_acquire(&self) -> Option<ContextGuard<'_>> {
        let mut owner = self.owner.lock().unwrap_or_else(PoisonError::into_inner);
        if owner.is_some() {
            return None;
        }
        *owner = Some(thread::current().id());
        Some(ContextGuard { context: self })
    }

    /// Whether some thread currently holds the context.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.owner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Whether the calling thread holds the context.
    #[must_use]
    pub fn is_held_by_current_thread(&self) -> bool {
        *self.owner.lock().unwrap_or_else(PoisonError::into_inner) == Some(thread::current().id())
    }

    fn release(&self) {
        *self.owner.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.released.notify_one();
    }
}

/// Proof of holding an [`ExclusiveContext`]; releases it on drop.
#[derive(Debug)]
#[must_use = "the context is released as soon as the guard is dropped"]
pub struct ContextGuard<'a> {
    context: &'a ExclusiveContext,
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        self.context.release();
    }
}

static EXCLUSIVE: ExclusiveContext = ExclusiveContext::new();

/// The exclusive context shared by every dispatch in the process.
#[must_use]
pub fn exclusive_context() -> &'static ExclusiveContext {
    &EXCLUSIVE
}

/// A Rust operator addressable from slot 0 of a native custom call.
///
/// Slot 0 of a native call holds the address of an `OperatorHandle`
/// ([`OperatorHandle::as_handle`]). The handle is borrowed for the call only.
pub struct OperatorHandle {
    operator: Box<dyn LinearOperator>,
}

impl OperatorHandle {
    /// Wrap an operator.
    pub fn new(operator: impl LinearOperator + 'static) -> Self {
        Self {
            operator: Box::new(operator),
        }
    }

    /// Wrap a closure with the operator signature.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&[ArrayView<'_>], &mut ArrayViewMut<'_>, &ArrayView<'_>) -> Result<()>
            + Send
            + Sync
            + 'static,
    {
        Self::new(f)
    }

    /// The value to place in slot 0.
    #[must_use]
    pub fn as_handle(&self) -> *const c_void {
        (self as *const Self).cast()
    }

    /// The wrapped operator.
    #[must_use]
    pub fn operator(&self) -> &dyn LinearOperator {
        self.operator.as_ref()
    }
}

impl std::fmt::Debug for OperatorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorHandle")
            .field("operator", &self.operator.name())
            .finish()
    }
}

fn run_native(mut call: DecodedCall<'_>) -> Result<()> {
    // SAFETY: slot 0 of a native call is the address of an OperatorHandle
    // that outlives the call (caller contract of `dispatch`).
    let handle = unsafe { &*call.handle().cast::<OperatorHandle>() };
    let operator = handle.operator();
    let start = Instant::now();
    let result = operator.apply(&call.args, &mut call.output, &call.params);
    log_dispatch(operator.name(), call.nargs(), start.elapsed(), result.is_ok());
    result
}

/// Decode a bounded slot array and run the operator named by slot 0.
///
/// The exclusive context is held from before decoding until the operator
/// returns.
///
/// # Errors
///
/// Decode faults (nothing is dispatched), [`BridgeError::ReentrantDispatch`]
/// when called from inside an operator, or the operator's own error,
/// unchanged.
///
/// # Safety
///
/// Slot 0 must be the address of a live [`OperatorHandle`], and the slots
/// and `out` must satisfy [`crate::decode::decode_with`].
pub unsafe fn dispatch(out: *mut c_void, slots: &[*const c_void], config: &DecodeConfig) -> Result<()> {
    let _guard = exclusive_context().acquire()?;
    let call = decode(out, slots, config)?;
    run_native(call)
}

/// [`dispatch`] over the runtime's raw, unbounded `in[]` pointer.
///
/// # Errors
///
/// As [`dispatch`], without slot-count checks.
///
/// # Safety
///
/// As [`dispatch`]; `ins` must hold every slot the grammar reaches.
pub unsafe fn dispatch_raw(
    out: *mut c_void,
    ins: *const *const c_void,
    config: &DecodeConfig,
) -> Result<()> {
    let _guard = exclusive_context().acquire()?;
    let call = decode_raw(out, ins, config)?;
    run_native(call)
}

/// Native custom-call target: slot 0 is an [`OperatorHandle`].
///
/// # Safety
///
/// As [`dispatch_raw`].
#[no_mangle]
pub unsafe extern "C" fn linop_bridge_cpu_native_call(out: *mut c_void, ins: *const *const c_void) {
    ffi_boundary("cpu_native_call", || {
        dispatch_raw(out, ins, DecodeConfig::global())
    });
}

const _: CustomCallTarget = linop_bridge_cpu_native_call;

/// Run `f` at a void ABI boundary: errors are logged and recorded, panics are
/// caught and recorded.
pub(crate) fn ffi_boundary(target: &str, f: impl FnOnce() -> Result<()>) {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::error!(target: "linop_bridge::dispatch", call_target = target, error = %err, "custom call failed");
            record_error(err.to_string());
        }
        Err(_) => {
            tracing::error!(target: "linop_bridge::dispatch", call_target = target, "panic in custom call");
            record_error(format!("{target}: panic across FFI boundary"));
        }
    }
}

static LAST_ERROR: Mutex<Option<String>> = Mutex::new(None);

/// Store the most recent boundary failure.
///
/// Process-wide rather than thread-local: runtime worker threads fail, the
/// host thread asks.
pub(crate) fn record_error(message: impl Into<String>) {
    *LAST_ERROR.lock().unwrap_or_else(PoisonError::into_inner) = Some(message.into());
}

/// Serializes tests that read the process-wide last-error slot.
#[cfg(test)]
pub(crate) static LAST_ERROR_LOCK: Mutex<()> = Mutex::new(());

/// Take the most recent failure recorded at an ABI boundary, clearing it.
#[must_use]
pub fn take_last_error() -> Option<String> {
    LAST_ERROR
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::DType;
    use crate::encode::CallFrame;
    use crate::traits::operator_fn;

    #[test]
    fn test_context_guard_releases() {
        let ctx = ExclusiveContext::new();
        {
            let _guard = ctx.acquire().unwrap();
            assert!(ctx.is_held());
            assert!(ctx.is_held_by_current_thread());
            assert!(ctx.try_acquire().is_none());
        }
        assert!(!ctx.is_held());
        assert!(ctx.try_acquire().is_some());
    }

    #[test]
    fn test_reacquire_on_same_thread_fails_fast() {
        let ctx = ExclusiveContext::new();
        let guard = ctx.acquire().unwrap();
        assert_eq!(ctx.acquire().unwrap_err(), BridgeError::ReentrantDispatch);

        std::thread::scope(|s| {
            s.spawn(|| {
                assert!(!ctx.is_held_by_current_thread());
                assert!(ctx.try_acquire().is_none());
            });
        });
        drop(guard);
        assert!(ctx.acquire().is_ok());
    }

    #[test]
    fn test_nested_dispatch_is_rejected() {
        let handle = OperatorHandle::from_fn(|_, out, _| {
            let nested = exclusive_context().acquire().map(drop);
            assert_eq!(nested, Err(BridgeError::ReentrantDispatch));
            out.fill(1_u8)
        });
        let p = [0_u8; 0];
        let mut out = [0_u8; 2];
        let encoded = CallFrame::new(handle.as_handle())
            .output(DType::U8, &[2])
            .params_slice(&p)
            .encode()
            .unwrap();
        unsafe { dispatch(out.as_mut_ptr().cast(), encoded.slots(), &DecodeConfig::default()) }
            .unwrap();
        assert_eq!(out, [1, 1]);
        assert!(!exclusive_context().is_held_by_current_thread());
    }

    #[test]
    fn test_guard_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<ContextGuard<'static>>();
    }

    #[test]
    fn test_dispatch_writes_output() {
        let handle = OperatorHandle::from_fn(|args, out, params| {
            let scale = params.as_slice::<f64>()?[0];
            let x = args[0].as_slice::<f64>()?;
            for (o, v) in out.as_slice_mut::<f64>()?.iter_mut().zip(x) {
                *o = scale * v;
            }
            Ok(())
        });
        let x = [1.0_f64, 2.0, 3.0];
        let scale = [2.0_f64];
        let mut out = [0.0_f64; 3];
        let encoded = CallFrame::new(handle.as_handle())
            .arg_slice(&x, &[3])
            .unwrap()
            .output(DType::F64, &[3])
            .params_slice(&scale)
            .encode()
            .unwrap();

        unsafe { dispatch(out.as_mut_ptr().cast(), encoded.slots(), &DecodeConfig::default()) }
            .unwrap();
        assert_eq!(out, [2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_operator_error_propagates() {
        let handle = OperatorHandle::new(operator_fn(|_, _, _| {
            Err(BridgeError::callback("singular matrix"))
        }));
        let p = [0_u8; 0];
        let mut out = [0_u8; 1];
        let encoded = CallFrame::new(handle.as_handle())
            .output(DType::U8, &[1])
            .params_slice(&p)
            .encode()
            .unwrap();
        let err = unsafe {
            dispatch(out.as_mut_ptr().cast(), encoded.slots(), &DecodeConfig::default())
        }
        .unwrap_err();
        assert_eq!(err, BridgeError::callback("singular matrix"));
    }

    #[test]
    fn test_native_entry_records_failures() {
        let _serial = LAST_ERROR_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let handle = OperatorHandle::from_fn(|_, _, _| panic!("operator bug"));
        let p = [0_u8; 0];
        let mut out = [0_u8; 1];
        let encoded = CallFrame::new(handle.as_handle())
            .output_raw_tag(99, &[1])
            .params_slice(&p)
            .encode()
            .unwrap();
        unsafe { linop_bridge_cpu_native_call(out.as_mut_ptr().cast(), encoded.as_ptr()) };
        let message = take_last_error().unwrap();
        assert!(message.contains("unknown dtype tag: 99"), "{message}");

        let encoded = CallFrame::new(handle.as_handle())
            .output(DType::U8, &[1])
            .params_slice(&p)
            .encode()
            .unwrap();
        unsafe { linop_bridge_cpu_native_call(out.as_mut_ptr().cast(), encoded.as_ptr()) };
        let message = take_last_error().unwrap();
        assert!(message.contains("panic"), "{message}");
    }
}
