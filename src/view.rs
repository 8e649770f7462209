// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Zero-copy typed array views over foreign memory.
//!
//! ## Why This Module Exists
//!
//! The runtime hands us bare addresses. A view attaches a dtype and a shape to
//! such an address without copying or taking ownership, so that a callable can
//! read its inputs and write its output in place.
//!
//! ## Design Decisions
//!
//! - **Mutability is a type**: inputs and parameters become [`ArrayView`],
//!   the output becomes [`ArrayViewMut`]. There is no runtime writeable flag.
//!
//! - **Lifetime-bound, never owning**: the `'a` lifetime ties a view to the
//!   dispatch call that produced it. Views never free memory.
//!
//! - **No array library**: shape, dtype, base pointer, a typed slice accessor
//!   and a row-major indexing helper. Anything richer belongs to the callable.

use crate::dtype::{DType, Element};
use crate::error::{BridgeError, Result};
use std::marker::PhantomData;

/// Number of elements described by `shape`, or `None` on overflow.
///
/// Rank 0 describes a scalar and has one element.
#[must_use]
pub fn element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1_usize, |acc, &d| acc.checked_mul(d))
}

/// Byte length of `shape` elements of `dtype`, checked against `isize::MAX`.
fn checked_byte_len(dtype: DType, shape: &[usize]) -> Result<usize> {
    element_count(shape)
        .and_then(|n| n.checked_mul(dtype.size_in_bytes()))
        .filter(|&bytes| isize::try_from(bytes).is_ok())
        .ok_or_else(|| BridgeError::SizeOverflow {
            shape: shape.iter().map(|&d| d as u64).collect(),
        })
}

/// Row-major linear offset of `index` into `shape`.
fn linear_offset(shape: &[usize], index: &[usize]) -> Result<usize> {
    if index.len() != shape.len() || index.iter().zip(shape).any(|(&i, &d)| i >= d) {
        return Err(BridgeError::IndexOutOfBounds {
            index: index.to_vec(),
            shape: shape.to_vec(),
        });
    }
    Ok(index
        .iter()
        .zip(shape)
        .fold(0, |offset, (&i, &d)| offset * d + i))
}

fn check_access<T: Element>(dtype: DType, ptr: *const u8, len: usize) -> Result<()> {
    if T::DTYPE != dtype {
        return Err(BridgeError::DtypeMismatch {
            expected: T::DTYPE,
            actual: dtype,
        });
    }
    if len > 0 && (ptr as usize) % std::mem::align_of::<T>() != 0 {
        return Err(BridgeError::Misaligned {
            dtype,
            address: ptr as usize,
        });
    }
    Ok(())
}

/// Read-only view over an externally owned array.
#[derive(Debug, Clone)]
pub struct ArrayView<'a> {
    dtype: DType,
    shape: Vec<usize>,
    ptr: *const u8,
    len: usize,
    _marker: PhantomData<&'a [u8]>,
}

impl<'a> ArrayView<'a> {
    /// Wrap `ptr` as a read-only array of `dtype` with `shape`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::SizeOverflow`] if the byte length of `shape`
    /// does not fit in `isize`.
    ///
    /// # Safety
    ///
    /// Unless the shape has zero elements, `ptr` must be valid for reads of
    /// the full byte length for `'a`, and nothing may write through it while
    /// the view is alive.
    pub unsafe fn from_raw_parts(dtype: DType, shape: Vec<usize>, ptr: *const u8) -> Result<Self> {
        checked_byte_len(dtype, &shape)?;
        let len = element_count(&shape).unwrap_or(0);
        Ok(Self {
            dtype,
            shape,
            ptr,
            len,
            _marker: PhantomData,
        })
    }

    /// View a typed slice with the given shape.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::SizeOverflow`] if `shape` does not describe
    /// exactly `data.len()` elements.
    pub fn from_slice<T: Element>(data: &'a [T], shape: Vec<usize>) -> Result<Self> {
        if element_count(&shape) != Some(data.len()) {
            return Err(BridgeError::SizeOverflow {
                shape: shape.iter().map(|&d| d as u64).collect(),
            });
        }
        // SAFETY: the slice is valid for reads of its full length for 'a.
        unsafe { Self::from_raw_parts(T::DTYPE, shape, data.as_ptr().cast()) }
    }

    /// Element type.
    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Extents, outermost first.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of dimensions.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the view has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Length of the viewed region in bytes.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.len * self.dtype.size_in_bytes()
    }

    /// Base address of the viewed region.
    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    /// The viewed region as raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &'a [u8] {
        if self.len == 0 {
            return &[];
        }
        // SAFETY: guaranteed by the constructor contract.
        unsafe { std::slice::from_raw_parts(self.ptr, self.byte_len()) }
    }

    /// The elements as a typed slice in row-major order.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::DtypeMismatch`] if `T` is not the view's element
    /// type, or [`BridgeError::Misaligned`] if the base address is not
    /// aligned for `T`.
    pub fn as_slice<T: Element>(&self) -> Result<&'a [T]> {
        check_access::<T>(self.dtype, self.ptr, self.len)?;
        if self.len == 0 {
            return Ok(&[]);
        }
        // SAFETY: dtype and alignment checked above; validity per constructor.
        Ok(unsafe { std::slice::from_raw_parts(self.ptr.cast::<T>(), self.len) })
    }

    /// Read the element at a multi-dimensional index.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::IndexOutOfBounds`] for an index of the wrong
    /// rank or outside the shape, plus the errors of [`ArrayView::as_slice`].
    pub fn get<T: Element>(&self, index: &[usize]) -> Result<T> {
        let offset = linear_offset(&self.shape, index)?;
        Ok(self.as_slice::<T>()?[offset])
    }
}

/// Writable view over an externally owned array.
#[derive(Debug)]
pub struct ArrayViewMut<'a> {
    dtype: DType,
    shape: Vec<usize>,
    ptr: *mut u8,
    len: usize,
    _marker: PhantomData<&'a mut [u8]>,
}

impl<'a> ArrayViewMut<'a> {
    /// Wrap `ptr` as a writable array of `dtype` with `shape`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::SizeOverflow`] if the byte length of `shape`
    /// does not fit in `isize`.
    ///
    /// # Safety
    ///
    /// Unless the shape has zero elements, `ptr` must be valid for reads and
    /// writes of the full byte length for `'a`, and must not be accessed
    /// through any other path while the view is alive.
    pub unsafe fn from_raw_parts(dtype: DType, shape: Vec<usize>, ptr: *mut u8) -> Result<Self> {
        checked_byte_len(dtype, &shape)?;
        let len = element_count(&shape).unwrap_or(0);
        Ok(Self {
            dtype,
            shape,
            ptr,
            len,
            _marker: PhantomData,
        })
    }

    /// View a mutable typed slice with the given shape.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::SizeOverflow`] if `shape` does not describe
    /// exactly `data.len()` elements.
    pub fn from_slice<T: Element>(data: &'a mut [T], shape: Vec<usize>) -> Result<Self> {
        if element_count(&shape) != Some(data.len()) {
            return Err(BridgeError::SizeOverflow {
                shape: shape.iter().map(|&d| d as u64).collect(),
            });
        }
        // SAFETY: the slice is exclusively borrowed for 'a.
        unsafe { Self::from_raw_parts(T::DTYPE, shape, data.as_mut_ptr().cast()) }
    }

    /// Element type.
    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Extents, outermost first.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of dimensions.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the view has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Length of the viewed region in bytes.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.len * self.dtype.size_in_bytes()
    }

    /// Base address of the viewed region.
    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    /// Mutable base address of the viewed region.
    #[must_use]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr
    }

    /// Reborrow as a read-only view.
    #[must_use]
    pub fn as_view(&self) -> ArrayView<'_> {
        ArrayView {
            dtype: self.dtype,
            shape: self.shape.clone(),
            ptr: self.ptr,
            len: self.len,
            _marker: PhantomData,
        }
    }

    /// The elements as a mutable typed slice in row-major order.
    ///
    /// # Errors
    ///
    /// Same as [`ArrayView::as_slice`].
    pub fn as_slice_mut<T: Element>(&mut self) -> Result<&mut [T]> {
        check_access::<T>(self.dtype, self.ptr, self.len)?;
        if self.len == 0 {
            return Ok(&mut []);
        }
        // SAFETY: dtype and alignment checked above; exclusivity per constructor.
        Ok(unsafe { std::slice::from_raw_parts_mut(self.ptr.cast::<T>(), self.len) })
    }

    /// The viewed region as mutable raw bytes.
    #[must_use]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        if self.len == 0 {
            return &mut [];
        }
        // SAFETY: exclusivity and validity per constructor.
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.byte_len()) }
    }

    /// Write the element at a multi-dimensional index.
    ///
    /// # Errors
    ///
    /// Same as [`ArrayView::get`].
    pub fn set<T: Element>(&mut self, index: &[usize], value: T) -> Result<()> {
        let offset = linear_offset(&self.shape, index)?;
        self.as_slice_mut::<T>()?[offset] = value;
        Ok(())
    }

    /// Overwrite every element with `value`.
    ///
    /// # Errors
    ///
    /// Same as [`ArrayView::as_slice`].
    pub fn fill<T: Element>(&mut self, value: T) -> Result<()> {
        self.as_slice_mut::<T>()?.fill(value);
        Ok(())
    }
}
