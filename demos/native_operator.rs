//! Example: Native Operator
//!
//! Registers a Rust linear operator behind the native custom-call entry point
//! and drives it with a slot array built the way the runtime lays one out.
//!
//! Run with:
//! ```bash
//! RUST_LOG=linop_bridge=trace cargo run --example native_operator
//! ```

use linop_bridge::dispatch::linop_bridge_cpu_native_call;
use linop_bridge::{
    expect_args, init_logging, ArrayView, ArrayViewMut, BridgeError, CallFrame, DType,
    LinearOperator, LogConfig, OperatorHandle, Result,
};
use num_complex::Complex;

/// Dense matrix-vector product `y = A x` over complex doubles.
///
/// `A` is the first argument with shape `[m, n]`, `x` the second with shape
/// `[n]`. Params are unused.
struct MatVec;

impl LinearOperator for MatVec {
    fn apply(
        &self,
        args: &[ArrayView<'_>],
        out: &mut ArrayViewMut<'_>,
        _params: &ArrayView<'_>,
    ) -> Result<()> {
        expect_args(args, 2)?;
        let (a, x) = (&args[0], &args[1]);
        let &[m, n] = a.shape() else {
            return Err(BridgeError::callback(format!(
                "matrix must be rank 2, got shape {:?}",
                a.shape()
            )));
        };
        if x.shape() != [n] || out.shape() != [m] {
            return Err(BridgeError::callback("matrix-vector shapes disagree"));
        }

        let a = a.as_slice::<Complex<f64>>()?;
        let x = x.as_slice::<Complex<f64>>()?;
        for (i, y) in out.as_slice_mut::<Complex<f64>>()?.iter_mut().enumerate() {
            *y = a[i * n..(i + 1) * n]
                .iter()
                .zip(x)
                .map(|(aij, xj)| aij * xj)
                .sum();
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "matvec"
    }
}

fn main() -> Result<()> {
    init_logging(&LogConfig::development());
    println!("=== Native Operator Example ===\n");

    let handle = OperatorHandle::new(MatVec);
    let i = Complex::new(0.0, 1.0);
    let one = Complex::new(1.0, 0.0);
    let a = [one, i, -i, one];
    let x = [one, one];
    let params = [0_u8; 0];
    let mut y = [Complex::<f64>::default(); 2];

    let encoded = CallFrame::new(handle.as_handle())
        .arg_slice(&a, &[2, 2])?
        .arg_slice(&x, &[2])?
        .output(DType::C128, &[2])
        .params_slice(&params)
        .encode()?;
    println!("1. Encoded {} slots for {handle:?}", encoded.slots().len());

    unsafe { linop_bridge_cpu_native_call(y.as_mut_ptr().cast(), encoded.as_ptr()) };
    match linop_bridge::take_last_error() {
        Some(err) => println!("2. Call failed: {err}"),
        None => println!("2. y = A x = {y:?}"),
    }

    // Same operator, wrong arity: the failure is recorded, not raised.
    let encoded = CallFrame::new(handle.as_handle())
        .arg_slice(&a, &[2, 2])?
        .output(DType::C128, &[2])
        .params_slice(&params)
        .encode()?;
    unsafe { linop_bridge_cpu_native_call(y.as_mut_ptr().cast(), encoded.as_ptr()) };
    println!(
        "3. Missing argument: {}",
        linop_bridge::take_last_error().unwrap_or_default()
    );

    println!("\n=== Example Complete ===");
    Ok(())
}
