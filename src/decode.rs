// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Decoding of the custom-call slot array.
//!
//! The runtime calls a custom-call target with an output address and an
//! array of operand addresses (`in[]`). Every scalar operand is passed by
//! address, so each slot below points at the value it names, except the data
//! pointers which are the buffers themselves:
//!
//! ```text
//! slot[0]                  callable handle
//! slot[1]                  nargs            u64
//! nargs times:
//!   slot[i]                dtype tag        i64, narrowed to u8
//!   slot[i+1]              rank             u64
//!   slot[i+2 .. i+2+rank]  extents          u64 each
//!   slot[next]             data             (buffer address)
//! slot[next]               output dtype tag
//! slot[next+1]             output rank
//! slot[next+2 ..]          output extents   (data is the `out` address)
//! slot[next]               params dtype tag
//! slot[next+1]             params length    u64
//! slot[next+2]             params data      (buffer address)
//! ```
//!
//! Slots are consumed strictly left to right. Nothing here acquires the
//! exclusive context; see [`crate::dispatch`].

use crate::config::DecodeConfig;
use crate::dtype::DType;
use crate::error::{BridgeError, Result};
use crate::view::{element_count, ArrayView, ArrayViewMut};
use std::ffi::c_void;
use std::marker::PhantomData;

/// Cursor over a slot array.
///
/// Bounded when built from a slice, unbounded when built from the raw
/// pointer the runtime passes (the runtime does not tell us the length).
#[derive(Debug)]
pub struct SlotReader<'s> {
    base: *const *const c_void,
    len: Option<usize>,
    idx: usize,
    check_null: bool,
    _marker: PhantomData<&'s [*const c_void]>,
}

impl<'s> SlotReader<'s> {
    /// Reader over a slot slice; running past its end is an error.
    #[must_use]
    pub fn new(slots: &'s [*const c_void], check_null: bool) -> Self {
        Self {
            base: slots.as_ptr(),
            len: Some(slots.len()),
            idx: 0,
            check_null,
            _marker: PhantomData,
        }
    }

    /// Reader over the runtime's raw `in[]` pointer.
    ///
    /// # Safety
    ///
    /// `base` must point to a slot array that is well formed according to
    /// the grammar and valid for `'s`.
    #[must_use]
    pub unsafe fn from_raw(base: *const *const c_void, check_null: bool) -> Self {
        Self {
            base,
            len: None,
            idx: 0,
            check_null,
            _marker: PhantomData,
        }
    }

    /// Index of the next slot to be consumed.
    #[must_use]
    pub fn position(&self) -> usize {
        self.idx
    }

    /// Consume the next slot and return it with its index.
    fn next_slot(&mut self) -> Result<(usize, *const c_void)> {
        let index = self.idx;
        if let Some(available) = self.len {
            if index >= available {
                return Err(BridgeError::SlotsExhausted {
                    needed: index,
                    available,
                });
            }
        }
        // SAFETY: in bounds for slice readers; the raw reader's contract
        // guarantees the grammar's slots exist.
        let slot = unsafe { *self.base.add(index) };
        self.idx += 1;
        Ok((index, slot))
    }

    /// Consume a slot that points at a scalar and return the scalar's bits.
    ///
    /// # Safety
    ///
    /// The slot must point at 8 readable bytes.
    unsafe fn read_word(&mut self) -> Result<u64> {
        let (index, slot) = self.next_slot()?;
        if slot.is_null() {
            return Err(BridgeError::null_slot(index));
        }
        Ok(slot.cast::<u64>().read_unaligned())
    }

    /// Consume the handle slot. The pointer is returned as is.
    pub(crate) fn read_handle(&mut self) -> Result<*const c_void> {
        let (index, slot) = self.next_slot()?;
        if slot.is_null() {
            return Err(BridgeError::null_slot(index));
        }
        Ok(slot)
    }

    /// Consume an unsigned 64-bit count or extent.
    ///
    /// # Safety
    ///
    /// See [`SlotReader::read_word`].
    pub unsafe fn read_u64(&mut self) -> Result<u64> {
        self.read_word()
    }

    /// Consume a dtype tag: stored as `i64`, looked up after narrowing to `u8`.
    ///
    /// # Safety
    ///
    /// See [`SlotReader::read_word`].
    #[allow(clippy::cast_possible_wrap)]
    pub unsafe fn read_dtype(&mut self) -> Result<DType> {
        DType::from_wire(self.read_word()? as i64)
    }

    /// Consume a rank followed by that many extents.
    ///
    /// # Safety
    ///
    /// See [`SlotReader::read_word`].
    pub unsafe fn read_shape(&mut self, max_rank: usize) -> Result<Vec<usize>> {
        let rank = self.read_u64()?;
        if usize::try_from(rank).map_or(true, |r| r > max_rank) {
            return Err(BridgeError::RankTooLarge {
                rank,
                max: max_rank,
            });
        }
        let mut raw = Vec::with_capacity(rank as usize);
        for _ in 0..rank {
            raw.push(self.read_u64()?);
        }
        to_usize_shape(raw)
    }

    /// Consume a data slot. The slot holds the buffer address itself.
    ///
    /// A null address is rejected only for non-empty views.
    fn read_data(&mut self, shape: &[usize]) -> Result<*const u8> {
        let (index, slot) = self.next_slot()?;
        if self.check_null && slot.is_null() && element_count(shape) != Some(0) {
            return Err(BridgeError::null_slot(index));
        }
        Ok(slot.cast())
    }
}

fn to_usize_shape(raw: Vec<u64>) -> Result<Vec<usize>> {
    raw.iter()
        .map(|&d| usize::try_from(d))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| BridgeError::SizeOverflow { shape: raw.clone() })
}

/// One decoded custom call.
#[derive(Debug)]
pub struct DecodedCall<'a> {
    handle: *const c_void,
    /// Input views in call-site order.
    pub args: Vec<ArrayView<'a>>,
    /// Output view aliasing the runtime's `out` buffer.
    pub output: ArrayViewMut<'a>,
    /// Flat parameter view.
    pub params: ArrayView<'a>,
}

impl DecodedCall<'_> {
    /// Contents of slot 0: the address through which the callable is reached.
    #[must_use]
    pub fn handle(&self) -> *const c_void {
        self.handle
    }

    /// Number of input arguments.
    #[must_use]
    pub fn nargs(&self) -> usize {
        self.args.len()
    }
}

/// Decode a full call from `reader`.
///
/// # Errors
///
/// Returns the first decode fault encountered. No view escapes on error.
///
/// # Safety
///
/// Every slot the grammar reaches must point at readable memory of the kind
/// the grammar says, every data buffer must be valid for its declared size
/// for `'a`, and `out` must be valid for writes of the output size for `'a`
/// with no other live reference to it.
pub unsafe fn decode_with<'a>(
    out: *mut c_void,
    reader: &mut SlotReader<'_>,
    config: &DecodeConfig,
) -> Result<DecodedCall<'a>> {
    let handle = reader.read_handle()?;

    let nargs = reader.read_u64()?;
    if usize::try_from(nargs).map_or(true, |n| n > config.max_args) {
        return Err(BridgeError::TooManyArgs {
            nargs,
            max: config.max_args,
        });
    }

    let mut args = Vec::with_capacity(nargs as usize);
    for position in 0..nargs {
        let dtype = reader.read_dtype()?;
        let shape = reader.read_shape(config.max_rank)?;
        let data = reader.read_data(&shape)?;
        tracing::trace!(
            target: "linop_bridge::decode",
            position,
            dtype = dtype.name(),
            shape = ?shape,
            "decoded argument"
        );
        args.push(ArrayView::from_raw_parts(dtype, shape, data)?);
    }

    let out_dtype = reader.read_dtype()?;
    let out_shape = reader.read_shape(config.max_rank)?;
    let out_len = element_count(&out_shape).unwrap_or(usize::MAX);
    if config.check_null && out.is_null() && out_len != 0 {
        return Err(BridgeError::NullOutput { len: out_len });
    }
    let output = ArrayViewMut::from_raw_parts(out_dtype, out_shape, out.cast())?;

    let params_dtype = reader.read_dtype()?;
    let params_len = reader.read_u64()?;
    let params_shape = to_usize_shape(vec![params_len])?;
    let params_data = reader.read_data(&params_shape)?;
    let params = ArrayView::from_raw_parts(params_dtype, params_shape, params_data)?;

    tracing::debug!(
        target: "linop_bridge::decode",
        nargs,
        output_dtype = out_dtype.name(),
        output_shape = ?output.shape(),
        params_len,
        slots = reader.position(),
        "decoded custom call"
    );

    Ok(DecodedCall {
        handle,
        args,
        output,
        params,
    })
}

/// Decode a call from a bounded slot slice.
///
/// # Errors
///
/// As [`decode_with`], plus [`BridgeError::SlotsExhausted`] if the grammar
/// runs past the end of `slots`.
///
/// # Safety
///
/// As [`decode_with`].
pub unsafe fn decode<'a>(
    out: *mut c_void,
    slots: &[*const c_void],
    config: &DecodeConfig,
) -> Result<DecodedCall<'a>> {
    let mut reader = SlotReader::new(slots, config.check_null);
    decode_with(out, &mut reader, config)
}

/// Decode a call from the runtime's raw `in[]` pointer.
///
/// # Errors
///
/// As [`decode_with`].
///
/// # Safety
///
/// As [`decode_with`]; additionally `ins` must hold every slot the grammar
/// reaches, since its length is unknown.
pub unsafe fn decode_raw<'a>(
    out: *mut c_void,
    ins: *const *const c_void,
    config: &DecodeConfig,
) -> Result<DecodedCall<'a>> {
    if ins.is_null() {
        return Err(BridgeError::null_slot(0));
    }
    let mut reader = SlotReader::from_raw(ins, config.check_null);
    decode_with(out, &mut reader, config)
}
