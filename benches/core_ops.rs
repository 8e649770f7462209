//! Benchmarks for linop-bridge hot paths.
//!
//! Every custom call pays for one decode and one dispatch before the callable
//! runs; these should stay negligible next to the callable itself.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use linop_bridge::{decode, dispatch, CallFrame, DType, DecodeConfig, OperatorHandle};
use std::ffi::c_void;
use std::hint::black_box;

static OPAQUE: u64 = 0;

/// Slot 0 for frames that are only decoded.
fn opaque_handle() -> *const c_void {
    std::ptr::addr_of!(OPAQUE).cast()
}

/// Benchmark encoding slot arrays of increasing argument count.
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    let x = vec![0.0_f32; 64];
    let p = [0_u8; 8];

    for nargs in [1, 8, 64] {
        group.bench_with_input(BenchmarkId::new("nargs", nargs), &nargs, |b, &nargs| {
            b.iter(|| {
                let mut frame = CallFrame::new(opaque_handle());
                for _ in 0..nargs {
                    frame = frame.arg_slice(&x, &[8, 8]).unwrap();
                }
                let encoded = frame
                    .output(DType::F32, &[8, 8])
                    .params_slice(&p)
                    .encode()
                    .unwrap();
                black_box(encoded)
            });
        });
    }

    group.finish();
}

/// Benchmark decoding with varying argument count and rank.
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    let config = DecodeConfig::default();
    let x = vec![0.0_f64; 256];
    let p = [0.0_f64; 4];

    for nargs in [1, 8, 64] {
        let mut frame = CallFrame::new(opaque_handle());
        for _ in 0..nargs {
            frame = frame.arg_slice(&x, &[16, 16]).unwrap();
        }
        let encoded = frame
            .output(DType::F64, &[16, 16])
            .params_slice(&p)
            .encode()
            .unwrap();
        let mut out = vec![0.0_f64; 256];

        group.bench_function(BenchmarkId::new("nargs", nargs), |b| {
            b.iter(|| {
                let call = unsafe {
                    decode(out.as_mut_ptr().cast(), black_box(encoded.slots()), &config)
                }
                .unwrap();
                black_box(call.nargs())
            });
        });
    }

    for rank in [1_usize, 4, 8] {
        let shape = vec![2_usize; rank];
        let len = 1 << rank;
        let data = vec![0_u8; len];
        let encoded = CallFrame::new(opaque_handle())
            .arg_slice(&data, &shape)
            .unwrap()
            .output(DType::U8, &shape)
            .params_slice(&p)
            .encode()
            .unwrap();
        let mut out = vec![0_u8; len];

        group.bench_function(BenchmarkId::new("rank", rank), |b| {
            b.iter(|| {
                let call = unsafe {
                    decode(out.as_mut_ptr().cast(), black_box(encoded.slots()), &config)
                }
                .unwrap();
                black_box(call.output.len())
            });
        });
    }

    group.finish();
}

/// Benchmark a full dispatch: context, decode, no-op operator.
fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    let config = DecodeConfig::default();
    let handle = OperatorHandle::from_fn(|_, _, _| Ok(()));
    let x = [0.0_f32; 16];
    let p = [0_u8; 0];
    let encoded = CallFrame::new(handle.as_handle())
        .arg_slice(&x, &[4, 4])
        .unwrap()
        .output(DType::F32, &[4, 4])
        .params_slice(&p)
        .encode()
        .unwrap();
    let mut out = [0.0_f32; 16];

    group.bench_function("noop_operator", |b| {
        b.iter(|| {
            unsafe { dispatch(out.as_mut_ptr().cast(), black_box(encoded.slots()), &config) }
                .unwrap();
        });
    });

    group.bench_function("context_acquire_release", |b| {
        let context = linop_bridge::exclusive_context();
        b.iter(|| black_box(context.acquire().unwrap()));
    });

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode, bench_dispatch);
criterion_main!(benches);
