// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Building slot arrays in the custom-call wire format.
//!
//! The inverse of [`crate::decode`]. The runtime normally produces the slot
//! array; [`CallFrame`] produces the same layout from Rust so a target can be
//! driven without the runtime, from tests, benchmarks or embedding code.
//!
//! ## Example
//!
//! ```rust
//! use linop_bridge::{CallFrame, DType};
//!
//! let x = [1.0_f32, 2.0, 3.0, 4.0];
//! let params = [0_u8; 0];
//! let handle = std::ptr::null();
//!
//! let encoded = CallFrame::new(handle)
//!     .arg_slice(&x, &[2, 2])?
//!     .output(DType::F32, &[2, 2])
//!     .params_slice(&params)
//!     .encode()?;
//!
//! // handle, nargs, tag, rank, 2 extents, data, tag, rank, 2 extents, tag, len, data
//! assert_eq!(encoded.slots().len(), 14);
//! # Ok::<(), linop_bridge::BridgeError>(())
//! ```

use crate::dtype::{DType, Element};
use crate::error::{BridgeError, Result};
use crate::view::element_count;
use std::ffi::c_void;
use std::marker::PhantomData;

#[derive(Debug, Clone)]
struct Operand {
    tag: i64,
    shape: Vec<u64>,
    data: *const c_void,
}

/// Builder for one encoded custom call.
///
/// The lifetime ties the frame to the buffers passed through the typed
/// `*_slice` methods.
#[derive(Debug, Clone)]
pub struct CallFrame<'a> {
    handle: *const c_void,
    args: Vec<Operand>,
    output: Option<(i64, Vec<u64>)>,
    params: Option<(i64, u64, *const c_void)>,
    _marker: PhantomData<&'a [u8]>,
}

impl<'a> CallFrame<'a> {
    /// Start a frame whose slot 0 is `handle`.
    #[must_use]
    pub fn new(handle: *const c_void) -> Self {
        Self {
            handle,
            args: Vec::new(),
            output: None,
            params: None,
            _marker: PhantomData,
        }
    }

    /// Append an input argument backed by `data`.
    #[must_use]
    pub fn arg(self, dtype: DType, shape: &[usize], data: *const c_void) -> Self {
        self.arg_raw_tag(i64::from(dtype.tag()), shape, data)
    }

    /// Append an input argument with an arbitrary 64-bit tag.
    #[must_use]
    pub fn arg_raw_tag(mut self, tag: i64, shape: &[usize], data: *const c_void) -> Self {
        self.args.push(Operand {
            tag,
            shape: shape.iter().map(|&d| d as u64).collect(),
            data,
        });
        self
    }

    /// Append an input argument viewing `data` with `shape`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::SizeOverflow`] if `shape` does not describe
    /// exactly `data.len()` elements.
    pub fn arg_slice<T: Element>(self, data: &'a [T], shape: &[usize]) -> Result<Self> {
        if element_count(shape) != Some(data.len()) {
            return Err(BridgeError::SizeOverflow {
                shape: shape.iter().map(|&d| d as u64).collect(),
            });
        }
        Ok(self.arg(T::DTYPE, shape, data.as_ptr().cast()))
    }

    /// Describe the output. Its data is the `out` buffer, not a slot.
    #[must_use]
    pub fn output(self, dtype: DType, shape: &[usize]) -> Self {
        self.output_raw_tag(i64::from(dtype.tag()), shape)
    }

    /// Describe the output with an arbitrary 64-bit tag.
    #[must_use]
    pub fn output_raw_tag(mut self, tag: i64, shape: &[usize]) -> Self {
        self.output = Some((tag, shape.iter().map(|&d| d as u64).collect()));
        self
    }

    /// Set the flat parameter buffer.
    #[must_use]
    pub fn params(mut self, dtype: DType, len: usize, data: *const c_void) -> Self {
        self.params = Some((i64::from(dtype.tag()), len as u64, data));
        self
    }

    /// Set the flat parameter buffer from a slice.
    #[must_use]
    pub fn params_slice<T: Element>(self, data: &'a [T]) -> Self {
        self.params(T::DTYPE, data.len(), data.as_ptr().cast())
    }

    /// Number of input arguments so far.
    #[must_use]
    pub fn nargs(&self) -> usize {
        self.args.len()
    }

    /// Lay the frame out as a slot array.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidConfig`] if the output or the parameter
    /// buffer has not been set.
    #[allow(clippy::cast_sign_loss)]
    pub fn encode(&self) -> Result<EncodedCall<'a>> {
        let (out_tag, out_shape) = self
            .output
            .as_ref()
            .ok_or_else(|| BridgeError::invalid_config("call frame has no output"))?;
        let (params_tag, params_len, params_data) = self
            .params
            .ok_or_else(|| BridgeError::invalid_config("call frame has no params buffer"))?;

        let mut words = Vec::new();
        let mut layout = Vec::new();
        let mut word = |value: u64, layout: &mut Vec<Slot>| {
            layout.push(Slot::Word(words.len()));
            words.push(value);
        };

        layout.push(Slot::Ptr(self.handle));
        word(self.args.len() as u64, &mut layout);
        for operand in &self.args {
            word(operand.tag as u64, &mut layout);
            word(operand.shape.len() as u64, &mut layout);
            for &extent in &operand.shape {
                word(extent, &mut layout);
            }
            layout.push(Slot::Ptr(operand.data));
        }
        word(*out_tag as u64, &mut layout);
        word(out_shape.len() as u64, &mut layout);
        for &extent in out_shape {
            word(extent, &mut layout);
        }
        word(params_tag as u64, &mut layout);
        word(params_len, &mut layout);
        layout.push(Slot::Ptr(params_data));

        let base = words.as_ptr();
        let slots = layout
            .iter()
            .map(|slot| match *slot {
                Slot::Word(i) => base.wrapping_add(i).cast::<c_void>(),
                Slot::Ptr(p) => p,
            })
            .collect();

        Ok(EncodedCall {
            words,
            slots,
            _marker: PhantomData,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Word(usize),
    Ptr(*const c_void),
}

/// An encoded slot array together with the scalar storage it points into.
///
/// The scalar storage is heap allocated, so moving this value keeps every
/// slot valid.
#[derive(Debug)]
pub struct EncodedCall<'a> {
    words: Vec<u64>,
    slots: Vec<*const c_void>,
    _marker: PhantomData<&'a [u8]>,
}

impl EncodedCall<'_> {
    /// The slot array.
    #[must_use]
    pub fn slots(&self) -> &[*const c_void] {
        &self.slots
    }

    /// Pointer to the first slot, shaped like the runtime's `in[]` argument.
    #[must_use]
    pub fn as_ptr(&self) -> *const *const c_void {
        self.slots.as_ptr()
    }

    /// Number of scalar words backing the slots.
    #[must_use]
    pub fn word_count(&self) -> usize {
        self.words.len()
    }
}
