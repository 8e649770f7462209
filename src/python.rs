// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Python bindings: the `cpu_pycall` custom-call target and its registration.
//!
//! The accelerator runtime discovers custom-call targets through capsules
//! tagged `xla._CUSTOM_CALL_TARGET`. [`registrations`] hands it one such
//! capsule, `cpu_pycall`, whose slot 0 is a Python callable. Each call
//! decodes the slot array, wraps every operand in a NumPy array that aliases
//! the runtime's memory, and calls
//!
//! ```python
//! func(args, out, params)
//! ```
//!
//! where `args` is a list of read-only arrays, `out` is a writable array over
//! the output buffer and `params` is a read-only flat array. The callable must
//! fill `out` in place and must not keep references to any of them.
//!
//! # Python Usage
//!
//! ```python
//! import jax
//! from linop_bridge_bindings import registrations, last_error, init_logging
//!
//! init_logging(level="debug")
//! for name, capsule in registrations().items():
//!     jax.ffi.register_ffi_target(name, capsule, platform="cpu", api_version=0)
//! ```

#![allow(clippy::missing_errors_doc)] // Python bindings - errors are documented in docstrings
#![allow(clippy::needless_pass_by_value)] // PyO3 requires owned types for Python arguments

use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::ffi;
use pyo3::prelude::*;
use pyo3::sync::GILOnceCell;
use pyo3::types::{PyDict, PyList, PyTuple};
use std::ffi::{c_void, CStr};
use std::ptr::NonNull;
use std::time::Instant;

use crate::config::DecodeConfig;
use crate::decode::{decode_raw, DecodedCall};
use crate::dispatch::{exclusive_context, record_error, take_last_error, CustomCallTarget};
use crate::dtype::DType;
use crate::error::BridgeError;
use crate::logging::{init_logging as rust_init_logging, log_dispatch, LogConfig, LogLevel};

/// Capsule name the runtime requires on custom-call targets.
pub const CUSTOM_CALL_TARGET: &CStr = c"xla._CUSTOM_CALL_TARGET";

/// Registered name of the Python-callable target.
pub const PYCALL_TARGET_NAME: &str = "cpu_pycall";

impl From<BridgeError> for PyErr {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::UnknownDtype { .. } | BridgeError::InvalidConfig(_) => {
                PyValueError::new_err(err.to_string())
            }
            _ => PyRuntimeError::new_err(err.to_string()),
        }
    }
}

// =============================================================================
// CUSTOM-CALL TARGET
// =============================================================================

/// Custom-call target whose slot 0 points at a `PyObject*` callable.
///
/// Acquires the interpreter lock, then the exclusive context with the
/// interpreter lock released while waiting, so a thread blocked on the
/// context never holds the interpreter lock. A callable that re-enters this
/// target on its own thread fails with a re-entrant dispatch error rather
/// than blocking. Failures are printed, logged and stored for
/// [`last_error`]; the runtime sees a normal return.
///
/// # Safety
///
/// `ins` must be a slot array produced by the runtime for this target and
/// `out` the output buffer it allocated.
pub unsafe extern "C" fn cpu_pycall(out: *mut c_void, ins: *const *const c_void) {
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        Python::with_gil(|py| {
            let result = py
                .allow_threads(|| exclusive_context().acquire())
                .map_err(PyErr::from)
                .and_then(|_guard| pycall(py, out, ins));
            if let Err(err) = result {
                let message = err.to_string();
                tracing::error!(target: "linop_bridge::dispatch", call_target = PYCALL_TARGET_NAME, error = %message, "custom call failed");
                record_error(message);
                err.print(py);
            }
        });
    }));
    if outcome.is_err() {
        tracing::error!(target: "linop_bridge::dispatch", call_target = PYCALL_TARGET_NAME, "panic in custom call");
        record_error(format!("{PYCALL_TARGET_NAME}: panic across FFI boundary"));
    }
}

const _: CustomCallTarget = cpu_pycall;

/// Decode, build the NumPy views and call the callable. Context already held.
unsafe fn pycall(py: Python<'_>, out: *mut c_void, ins: *const *const c_void) -> PyResult<()> {
    let mut call: DecodedCall<'_> = decode_raw(out, ins, DecodeConfig::global())?;

    let callable_ptr = *call.handle().cast::<*mut ffi::PyObject>();
    if callable_ptr.is_null() {
        return Err(BridgeError::null_slot(0).into());
    }
    let func = Bound::from_borrowed_ptr(py, callable_ptr);

    let args = PyList::empty_bound(py);
    for view in &call.args {
        args.append(numpy_view(
            py,
            view.dtype(),
            view.shape(),
            view.as_ptr().cast_mut(),
            view.byte_len(),
            false,
        )?)?;
    }
    let out_ptr = call.output.as_mut_ptr();
    let output = numpy_view(
        py,
        call.output.dtype(),
        call.output.shape(),
        out_ptr,
        call.output.byte_len(),
        true,
    )?;
    let params = numpy_view(
        py,
        call.params.dtype(),
        call.params.shape(),
        call.params.as_ptr().cast_mut(),
        call.params.byte_len(),
        false,
    )?;

    let start = Instant::now();
    let result = func.call1((args, output, params));
    let name = func
        .getattr("__name__")
        .and_then(|n| n.extract::<String>())
        .unwrap_or_else(|_| "<callable>".to_string());
    log_dispatch(&name, call.nargs(), start.elapsed(), result.is_ok());
    result.map(drop)
}

fn numpy(py: Python<'_>) -> PyResult<&Bound<'_, PyModule>> {
    static NUMPY: GILOnceCell<Py<PyModule>> = GILOnceCell::new();
    NUMPY
        .get_or_try_init(py, || py.import_bound("numpy").map(Bound::unbind))
        .map(|m| m.bind(py))
}

/// NumPy array aliasing `len` bytes at `ptr` through a memoryview.
///
/// Read-only memoryviews yield arrays with `flags.writeable == False`.
fn numpy_view<'py>(
    py: Python<'py>,
    dtype: DType,
    shape: &[usize],
    ptr: *mut u8,
    len: usize,
    writable: bool,
) -> PyResult<Bound<'py, PyAny>> {
    // Empty views may carry a null address; memoryview wants a real one.
    let ptr = if ptr.is_null() {
        NonNull::<u8>::dangling().as_ptr()
    } else {
        ptr
    };
    let size = ffi::Py_ssize_t::try_from(len)
        .map_err(|_| PyValueError::new_err(format!("buffer of {len} bytes is too large")))?;
    let flags = if writable {
        ffi::PyBUF_WRITE
    } else {
        ffi::PyBUF_READ
    };
    // SAFETY: the decoder guarantees `len` bytes at `ptr` for the duration of
    // the call; the callable is required not to retain the view.
    let memory = unsafe {
        Bound::from_owned_ptr_or_err(py, ffi::PyMemoryView_FromMemory(ptr.cast(), size, flags))?
    };
    let flat = numpy(py)?.call_method1("frombuffer", (memory, dtype.numpy_name()))?;
    flat.call_method1("reshape", (PyTuple::new_bound(py, shape),))
}

// =============================================================================
// REGISTRATION
// =============================================================================

/// Wrap a custom-call target in a capsule whose pointer is the function itself.
fn encapsulate(py: Python<'_>, target: CustomCallTarget) -> PyResult<Bound<'_, PyAny>> {
    // SAFETY: CUSTOM_CALL_TARGET is 'static, as the capsule name must be.
    unsafe {
        Bound::from_owned_ptr_or_err(
            py,
            ffi::PyCapsule_New(target as *mut c_void, CUSTOM_CALL_TARGET.as_ptr(), None),
        )
    }
}

/// Custom-call targets provided by this module.
///
/// # Returns
/// Dictionary `{"cpu_pycall": capsule}`.
///
/// # Example
/// ```python
/// for name, capsule in registrations().items():
///     jax.ffi.register_ffi_target(name, capsule, platform="cpu", api_version=0)
/// ```
#[pyfunction]
fn registrations(py: Python<'_>) -> PyResult<Bound<'_, PyDict>> {
    let dict = PyDict::new_bound(py);
    dict.set_item(PYCALL_TARGET_NAME, encapsulate(py, cpu_pycall)?)?;
    Ok(dict)
}

// =============================================================================
// DTYPE FUNCTIONS
// =============================================================================

/// Get all dtypes understood by the decoder.
///
/// # Returns
/// List of NumPy dtype names.
#[pyfunction]
fn supported_dtypes() -> Vec<&'static str> {
    DType::ALL.iter().map(|d| d.numpy_name()).collect()
}

/// Get the wire tag of a dtype.
///
/// # Arguments
/// * `name` - NumPy name ("float32") or short name ("f32")
///
/// # Example
/// ```python
/// assert dtype_tag("complex128") == 71
/// ```
#[pyfunction]
fn dtype_tag(name: &str) -> PyResult<u8> {
    Ok(DType::from_name(name)?.tag())
}

/// Get the NumPy dtype name of a wire tag.
///
/// The tag is narrowed to 8 bits first, exactly as the decoder does.
///
/// # Raises
/// `ValueError` for unknown tags.
#[pyfunction]
fn dtype_from_tag(tag: i64) -> PyResult<&'static str> {
    Ok(DType::from_wire(tag)?.numpy_name())
}

// =============================================================================
// DIAGNOSTICS
// =============================================================================

/// Get and clear the most recent custom-call failure.
///
/// # Returns
/// Error message, or `None` if no call failed since the last query.
#[pyfunction]
fn last_error() -> Option<String> {
    take_last_error()
}

/// Initialize logging with configuration.
///
/// # Arguments
/// * `level` - Log level: "trace", "debug", "info", "warn", "error" (default: "info")
/// * `timestamps` - Include timestamps (default: `True`)
/// * `ansi` - Use ANSI colors (default: `True`)
///
/// # Example
/// ```python
/// init_logging(level="debug", timestamps=True, ansi=False)
/// ```
#[pyfunction]
#[pyo3(signature = (level="info", timestamps=true, ansi=true))]
fn init_logging(level: &str, timestamps: bool, ansi: bool) -> PyResult<()> {
    let log_level: LogLevel = LogLevel::parse(level).ok_or_else(|| {
        PyValueError::new_err(format!(
            "Invalid log level: {level}. Use: trace, debug, info, warn, error"
        ))
    })?;

    let config = LogConfig::new()
        .with_level(log_level)
        .with_timestamps(timestamps)
        .with_ansi(ansi)
        .with_thread_names(true);

    rust_init_logging(&config);
    Ok(())
}

/// Get linop-bridge version.
#[pyfunction]
fn version() -> &'static str {
    crate::VERSION
}

// =============================================================================
// PYTHON MODULE DEFINITION
// =============================================================================

/// Python module for linop-bridge bindings.
#[pymodule]
pub fn linop_bridge_bindings(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Registration
    m.add_function(wrap_pyfunction!(registrations, m)?)?;

    // DType functions
    m.add_function(wrap_pyfunction!(supported_dtypes, m)?)?;
    m.add_function(wrap_pyfunction!(dtype_tag, m)?)?;
    m.add_function(wrap_pyfunction!(dtype_from_tag, m)?)?;

    // Diagnostics
    m.add_function(wrap_pyfunction!(last_error, m)?)?;
    m.add_function(wrap_pyfunction!(init_logging, m)?)?;
    m.add_function(wrap_pyfunction!(version, m)?)?;

    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::LAST_ERROR_LOCK;
    use crate::encode::CallFrame;
    use std::sync::PoisonError;

    const RECORDER: &str = r#"
seen = {}

def scale(args, out, params):
    seen["arg_writeable"] = [bool(a.flags.writeable) for a in args]
    seen["params_writeable"] = bool(params.flags.writeable)
    seen["out_writeable"] = bool(out.flags.writeable)
    seen["arg_shapes"] = [tuple(a.shape) for a in args]
    seen["out_shape"] = tuple(out.shape)
    seen["params_shape"] = tuple(params.shape)
    seen["arg_address"] = args[0].ctypes.data
    seen["out_address"] = out.ctypes.data
    out[...] = args[0] * params[0]

def fill_scalar(args, out, params):
    seen["empty_shape"] = tuple(args[0].shape)
    seen["params_size"] = int(params.size)
    seen["out_ndim"] = out.ndim
    out[...] = 4.5

def must_not_run(args, out, params):
    seen["called"] = True

def failing(args, out, params):
    raise ValueError("operator diverged")
"#;

    /// Load a fresh recorder module and one of its functions.
    fn load(module_name: &str, func: &str) -> (Py<PyModule>, Py<PyAny>) {
        pyo3::prepare_freethreaded_python();
        Python::with_gil(|py| {
            let module =
                PyModule::from_code_bound(py, RECORDER, &format!("{module_name}.py"), module_name)
                    .unwrap();
            let func = module.getattr(func).unwrap().unbind();
            (module.unbind(), func)
        })
    }

    fn has_numpy() -> bool {
        pyo3::prepare_freethreaded_python();
        let found = Python::with_gil(|py| py.import_bound("numpy").is_ok());
        if !found {
            eprintln!("numpy is not importable; skipping view checks");
        }
        found
    }

    fn seen<T>(module: &Py<PyModule>, key: &str) -> Option<T>
    where
        T: for<'py> FromPyObject<'py>,
    {
        Python::with_gil(|py| {
            let seen = module.bind(py).getattr("seen").unwrap();
            seen.get_item(key).ok().map(|v| v.extract().unwrap())
        })
    }

    #[test]
    fn test_capsule_name() {
        assert_eq!(
            CUSTOM_CALL_TARGET.to_str().unwrap(),
            "xla._CUSTOM_CALL_TARGET"
        );
        assert_eq!(PYCALL_TARGET_NAME, "cpu_pycall");
    }

    #[test]
    fn test_supported_dtypes() {
        assert_eq!(
            supported_dtypes(),
            vec!["float32", "float64", "uint8", "complex64", "complex128"]
        );
    }

    #[test]
    fn test_dtype_helpers() {
        assert_eq!(dtype_tag("complex128").unwrap(), 71);
        assert_eq!(dtype_tag("f32").unwrap(), 3);
        assert_eq!(dtype_from_tag(0x120).unwrap(), "uint8");
        assert!(LogLevel::parse("verbose").is_none());
    }

    #[test]
    fn test_unknown_tag_maps_to_value_error() {
        pyo3::prepare_freethreaded_python();
        Python::with_gil(|py| {
            let err = dtype_from_tag(99).unwrap_err();
            assert!(err.is_instance_of::<PyValueError>(py));
            let err = PyErr::from(BridgeError::null_slot(0));
            assert!(err.is_instance_of::<PyRuntimeError>(py));
        });
    }

    #[test]
    fn test_registrations_capsule_points_at_target() {
        pyo3::prepare_freethreaded_python();
        Python::with_gil(|py| {
            let table = registrations(py).unwrap();
            assert_eq!(table.len(), 1);
            let capsule = table.get_item(PYCALL_TARGET_NAME).unwrap().unwrap();
            // SAFETY: `capsule` is a live capsule object.
            unsafe {
                let name = ffi::PyCapsule_GetName(capsule.as_ptr());
                assert_eq!(CStr::from_ptr(name), CUSTOM_CALL_TARGET);
                let target = ffi::PyCapsule_GetPointer(capsule.as_ptr(), name);
                assert_eq!(target, cpu_pycall as CustomCallTarget as *mut c_void);
            }
        });
    }

    #[test]
    fn test_pycall_views_alias_buffers() {
        if !has_numpy() {
            return;
        }
        let (module, func) = load("pycall_views", "scale");
        let callable_ptr = func.as_ptr();
        let x = [1.0_f64, 2.0, 3.0, 4.0];
        let alpha = [2.5_f64];
        let mut out = [0.0_f64; 4];
        let encoded = CallFrame::new(std::ptr::addr_of!(callable_ptr).cast())
            .arg_slice(&x, &[2, 2])
            .unwrap()
            .output(DType::F64, &[2, 2])
            .params_slice(&alpha)
            .encode()
            .unwrap();

        unsafe { cpu_pycall(out.as_mut_ptr().cast(), encoded.as_ptr()) };

        assert_eq!(out, [2.5, 5.0, 7.5, 10.0]);
        assert_eq!(seen::<Vec<bool>>(&module, "arg_writeable"), Some(vec![false]));
        assert_eq!(seen::<bool>(&module, "params_writeable"), Some(false));
        assert_eq!(seen::<bool>(&module, "out_writeable"), Some(true));
        assert_eq!(
            seen::<Vec<(usize, usize)>>(&module, "arg_shapes"),
            Some(vec![(2, 2)])
        );
        assert_eq!(seen::<(usize, usize)>(&module, "out_shape"), Some((2, 2)));
        assert_eq!(seen::<(usize,)>(&module, "params_shape"), Some((1,)));
        assert_eq!(seen::<usize>(&module, "arg_address"), Some(x.as_ptr() as usize));
        assert_eq!(seen::<usize>(&module, "out_address"), Some(out.as_ptr() as usize));
    }

    #[test]
    fn test_pycall_rank_zero_and_empty_views() {
        if !has_numpy() {
            return;
        }
        let (module, func) = load("pycall_shapes", "fill_scalar");
        let callable_ptr = func.as_ptr();
        let empty: [f32; 0] = [];
        let p = [0_u8; 0];
        let mut out = [0.0_f64; 1];
        let encoded = CallFrame::new(std::ptr::addr_of!(callable_ptr).cast())
            .arg_slice(&empty, &[0, 3])
            .unwrap()
            .output(DType::F64, &[])
            .params_slice(&p)
            .encode()
            .unwrap();

        unsafe { cpu_pycall(out.as_mut_ptr().cast(), encoded.as_ptr()) };

        assert_eq!(out, [4.5]);
        assert_eq!(seen::<(usize, usize)>(&module, "empty_shape"), Some((0, 3)));
        assert_eq!(seen::<usize>(&module, "params_size"), Some(0));
        assert_eq!(seen::<usize>(&module, "out_ndim"), Some(0));
    }

    #[test]
    fn test_pycall_unknown_tag_skips_callable() {
        let _serial = LAST_ERROR_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let (module, func) = load("pycall_unknown_tag", "must_not_run");
        let callable_ptr = func.as_ptr();
        let x = [1_u8, 2];
        let p = [0_u8; 0];
        let mut out = [7_u8; 2];
        let encoded = CallFrame::new(std::ptr::addr_of!(callable_ptr).cast())
            .arg_slice(&x, &[2])
            .unwrap()
            .output_raw_tag(99, &[2])
            .params_slice(&p)
            .encode()
            .unwrap();

        take_last_error();
        unsafe { cpu_pycall(out.as_mut_ptr().cast(), encoded.as_ptr()) };

        let message = take_last_error().unwrap();
        assert!(message.contains("unknown dtype tag: 99"), "{message}");
        assert_eq!(seen::<bool>(&module, "called"), None);
        assert_eq!(out, [7, 7]);
        assert!(!exclusive_context().is_held_by_current_thread());
    }

    #[test]
    fn test_pycall_exception_is_recorded() {
        if !has_numpy() {
            return;
        }
        let _serial = LAST_ERROR_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let (_module, func) = load("pycall_failing", "failing");
        let callable_ptr = func.as_ptr();
        let p = [0_u8; 0];
        let mut out = [0_u8; 1];
        let encoded = CallFrame::new(std::ptr::addr_of!(callable_ptr).cast())
            .output(DType::U8, &[1])
            .params_slice(&p)
            .encode()
            .unwrap();

        take_last_error();
        unsafe { cpu_pycall(out.as_mut_ptr().cast(), encoded.as_ptr()) };

        let message = take_last_error().unwrap();
        assert!(message.contains("operator diverged"), "{message}");
        assert!(!exclusive_context().is_held_by_current_thread());
    }
}
