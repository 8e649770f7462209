//! Example: Error Handling
//!
//! This example demonstrates the error paths of a custom call: decode faults
//! that stop a call before any operator runs, operator failures passed
//! through unchanged, and operator-specific errors layered on `BridgeError`.
//!
//! Run with:
//! ```bash
//! cargo run --example error_handling
//! ```

#![allow(clippy::items_after_statements)]

use linop_bridge::{
    dispatch, ArrayView, BridgeError, CallFrame, DType, DecodeConfig, OperatorHandle, Result,
    ValidatableConfig,
};

/// Example configuration for an iterative solver operator.
#[derive(Clone)]
struct SolverConfig {
    max_iters: usize,
    tolerance: f64,
}

impl ValidatableConfig for SolverConfig {
    fn validate(&self) -> Result<()> {
        if self.max_iters == 0 {
            return Err(BridgeError::invalid_config(
                "max_iters must be greater than 0",
            ));
        }
        if !(self.tolerance > 0.0) {
            return Err(BridgeError::invalid_config("tolerance must be positive"));
        }
        Ok(())
    }
}

/// Example of a domain-specific error that wraps `BridgeError`.
#[derive(Debug, thiserror::Error)]
enum SolverError {
    #[error("did not converge after {0} iterations")]
    NotConverged(usize),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// Read solver settings from a two-element f64 params buffer.
fn solver_config(params: &ArrayView<'_>) -> std::result::Result<SolverConfig, SolverError> {
    let raw = params.as_slice::<f64>()?; // BridgeError auto-converts to SolverError
    let [iters, tolerance] = raw else {
        return Err(BridgeError::callback("params must hold [max_iters, tolerance]").into());
    };
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let config = SolverConfig {
        max_iters: *iters as usize,
        tolerance: *tolerance,
    };
    config.validate()?;
    Ok(config)
}

fn run(handle: &OperatorHandle, tag: i64, params: &[f64]) -> Result<()> {
    let x = [1.0_f64, 2.0];
    let mut out = [0.0_f64; 2];
    let encoded = CallFrame::new(handle.as_handle())
        .arg_raw_tag(tag, &[2], x.as_ptr().cast())
        .output(DType::F64, &[2])
        .params_slice(params)
        .encode()?;
    unsafe { dispatch(out.as_mut_ptr().cast(), encoded.slots(), &DecodeConfig::default()) }
}

fn main() {
    println!("=== Error Handling Example ===\n");

    let solver = OperatorHandle::from_fn(|_args, _out, params| {
        let config = solver_config(params).map_err(|e| BridgeError::callback(e.to_string()))?;
        Err(BridgeError::callback(
            SolverError::NotConverged(config.max_iters).to_string(),
        ))
    });
    let f64_tag = i64::from(DType::F64.tag());

    // Example 1: Unknown dtype tag, rejected while decoding
    println!("1. Unknown dtype tag (99):");
    match run(&solver, 99, &[10.0, 1e-6]) {
        Ok(()) => println!("   Success!\n"),
        Err(e) => println!("   Error: {e} (decode fault: {})\n", e.is_decode_fault()),
    }

    // Example 2: Invalid operator configuration
    println!("2. Invalid solver config (tolerance 0):");
    match run(&solver, f64_tag, &[10.0, 0.0]) {
        Ok(()) => println!("   Success!\n"),
        Err(e) => println!("   Error: {e}\n"),
    }

    // Example 3: Domain-specific error
    println!("3. Domain-specific error (no convergence):");
    match run(&solver, f64_tag, &[10.0, 1e-6]) {
        Ok(()) => println!("   Success!\n"),
        Err(e) => println!("   Error: {e} (decode fault: {})\n", e.is_decode_fault()),
    }

    // Example 4: Error pattern matching
    println!("4. Error pattern matching:");
    let err = BridgeError::RankTooLarge { rank: 300, max: 64 };
    match &err {
        BridgeError::RankTooLarge { rank, max } => {
            println!("   Rank {rank} exceeds configured limit {max}");
        }
        _ => println!("   Other error: {err}"),
    }

    println!("\n=== Example Complete ===");
}
