// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Dtype tags of the custom-call wire format.
//!
//! ## Why This Module Exists
//!
//! The accelerator runtime describes every operand with a small integer tag.
//! The set of tags is closed and fixed by the runtime's primitive-type
//! numbering, so it is modelled as a plain enum rather than an open registry:
//!
//! | tag | dtype        | bytes |
//! |-----|--------------|-------|
//! | 3   | `float32`    | 4     |
//! | 7   | `float64`    | 8     |
//! | 32  | `uint8`      | 1     |
//! | 67  | `complex64`  | 8     |
//! | 71  | `complex128` | 16    |
//!
//! ## Design Decisions
//!
//! - **Wide storage, narrow lookup**: tags travel in 64-bit signed slots but are
//!   narrowed to 8 bits before lookup. [`DType::from_wire`] reproduces that
//!   truncation exactly; it is part of the wire contract.
//!
//! - **Sealed element trait**: [`Element`] ties Rust element types to their
//!   dtype so typed access on views can be checked at runtime without
//!   transmuting blindly.

use crate::error::{BridgeError, Result};
use num_complex::Complex;
use std::fmt;

/// Element type of a custom-call operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// 32-bit IEEE float (tag 3).
    F32,
    /// 64-bit IEEE float (tag 7).
    F64,
    /// Unsigned byte (tag 32).
    U8,
    /// Complex of two `f32` (tag 67).
    C64,
    /// Complex of two `f64` (tag 71).
    C128,
}

impl DType {
    /// Every supported dtype, in tag order.
    pub const ALL: [DType; 5] = [DType::F32, DType::F64, DType::U8, DType::C64, DType::C128];

    /// Look up a dtype by its 8-bit tag.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::UnknownDtype`] for tags outside the closed set.
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            3 => Ok(Self::F32),
            7 => Ok(Self::F64),
            32 => Ok(Self::U8),
            67 => Ok(Self::C64),
            71 => Ok(Self::C128),
            other => Err(BridgeError::unknown_dtype(other)),
        }
    }

    /// Decode a tag as stored in a slot: signed 64-bit, narrowed to 8 bits.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::UnknownDtype`] if the narrowed tag is unknown.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_wire(raw: i64) -> Result<Self> {
        Self::from_tag(raw as u8)
    }

    /// The wire tag of this dtype.
    #[must_use]
    pub fn tag(self) -> u8 {
        match self {
            Self::F32 => 3,
            Self::F64 => 7,
            Self::U8 => 32,
            Self::C64 => 67,
            Self::C128 => 71,
        }
    }

    /// Size of one element in bytes.
    #[must_use]
    pub fn size_in_bytes(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::F32 => 4,
            Self::F64 | Self::C64 => 8,
            Self::C128 => 16,
        }
    }

    /// Short name used in logs and error messages.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::U8 => "u8",
            Self::C64 => "c64",
            Self::C128 => "c128",
        }
    }

    /// NumPy dtype name, as accepted by `numpy.dtype(...)`.
    #[must_use]
    pub fn numpy_name(self) -> &'static str {
        match self {
            Self::F32 => "float32",
            Self::F64 => "float64",
            Self::U8 => "uint8",
            Self::C64 => "complex64",
            Self::C128 => "complex128",
        }
    }

    /// Parse either the short name or the NumPy name.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidConfig`] for unrecognised names.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "f32" | "float32" => Ok(Self::F32),
            "f64" | "float64" => Ok(Self::F64),
            "u8" | "uint8" => Ok(Self::U8),
            "c64" | "complex64" => Ok(Self::C64),
            "c128" | "complex128" => Ok(Self::C128),
            _ => Err(BridgeError::invalid_config(format!(
                "unknown dtype name: {name}. Supported: float32, float64, uint8, complex64, complex128"
            ))),
        }
    }

    /// Whether elements are complex numbers.
    #[must_use]
    pub fn is_complex(self) -> bool {
        matches!(self, Self::C64 | Self::C128)
    }

    /// Whether elements are real floating point.
    #[must_use]
    pub fn is_floating_point(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Rust element type that can back a view.
///
/// Implemented for `f32`, `f64`, `u8`, `Complex<f32>` and `Complex<f64>`.
pub trait Element: sealed::Sealed + Copy + 'static {
    /// Dtype carried on the wire for this element type.
    const DTYPE: DType;
}

macro_rules! impl_element {
    ($($ty:ty => $dtype:expr),+ $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}
            impl Element for $ty {
                const DTYPE: DType = $dtype;
            }
        )+
    };
}

impl_element! {
    f32 => DType::F32,
    f64 => DType::F64,
    u8 => DType::U8,
    Complex<f32> => DType::C64,
    Complex<f64> => DType::C128,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_table() {
        assert_eq!(DType::from_tag(3).unwrap(), DType::F32);
        assert_eq!(DType::from_tag(7).unwrap(), DType::F64);
        assert_eq!(DType::from_tag(32).unwrap(), DType::U8);
        assert_eq!(DType::from_tag(67).unwrap(), DType::C64);
        assert_eq!(DType::from_tag(71).unwrap(), DType::C128);
        for dtype in DType::ALL {
            assert_eq!(DType::from_tag(dtype.tag()).unwrap(), dtype);
        }
    }

    #[test]
    fn test_unknown_tag() {
        assert_eq!(
            DType::from_tag(99).unwrap_err(),
            BridgeError::unknown_dtype(99)
        );
        assert!(DType::from_tag(0).is_err());
    }

    #[test]
    fn test_wire_narrowing() {
        // Only the low byte participates in the lookup.
        assert_eq!(DType::from_wire(3).unwrap(), DType::F32);
        assert_eq!(DType::from_wire(0x103).unwrap(), DType::F32);
        assert_eq!(DType::from_wire(-256 + 71).unwrap(), DType::C128);
        assert_eq!(
            DType::from_wire(0x163).unwrap_err(),
            BridgeError::unknown_dtype(0x63)
        );
    }

    #[test]
    fn test_sizes_match_element_types() {
        assert_eq!(DType::F32.size_in_bytes(), std::mem::size_of::<f32>());
        assert_eq!(DType::F64.size_in_bytes(), std::mem::size_of::<f64>());
        assert_eq!(DType::U8.size_in_bytes(), std::mem::size_of::<u8>());
        assert_eq!(
            DType::C64.size_in_bytes(),
            std::mem::size_of::<Complex<f32>>()
        );
        assert_eq!(
            DType::C128.size_in_bytes(),
            std::mem::size_of::<Complex<f64>>()
        );
    }

    #[test]
    fn test_names() {
        assert_eq!(DType::C64.name(), "c64");
        assert_eq!(DType::C64.numpy_name(), "complex64");
        assert_eq!(DType::from_name("float64").unwrap(), DType::F64);
        assert_eq!(DType::from_name("U8").unwrap(), DType::U8);
        assert!(DType::from_name("int32").is_err());
        assert!(DType::C128.is_complex());
        assert!(DType::F32.is_floating_point());
        assert!(!DType::U8.is_floating_point());
    }

    #[test]
    fn test_element_dtypes() {
        assert_eq!(<f32 as Element>::DTYPE, DType::F32);
        assert_eq!(<Complex<f64> as Element>::DTYPE, DType::C128);
    }
}
