//! Element Types - Veris Type System
//!
//! Defines the element types storable in a matrix and the 16-bit fingerprint
//! that encodes element type plus degenerate-axis flags. The fingerprint is
//! the unit of kernel specialization: two matrices with equal fingerprints are
//! kernel-compatible for any kernel specialized on that fingerprint.
//!
//! # Key Features
//! - Runtime element type information via the `ElementType` enum
//! - Fingerprint bit masks shared between the host and generated code
//! - Type-safe host access via the `Scalar` trait
//!
//! @version 0.1.0
//! @author Veris Development Team

use bytemuck::Pod;
use half::f16;

use crate::error::{Error, Result};

// =============================================================================
// Fingerprint Layout
// =============================================================================

/// Bit layout of the 16-bit matrix fingerprint.
///
/// The low byte stores the element width in bits; the next two bits store the
/// floating/signed flags; the four bits above mark axes whose extent is
/// statically 1. The top two bits are reserved. Generated code and the host
/// decode the same masks, so this layout is part of the kernel ABI.
pub mod fingerprint {
    /// Element width in bits (1, 8, 16, 32, or 64).
    pub const BITS: u16 = 0x00FF;
    /// Element type is floating-point (implies `SIGNED`).
    pub const FLOATING: u16 = 0x0100;
    /// Element type is signed.
    pub const SIGNED: u16 = 0x0200;
    /// The channel axis has extent 1.
    pub const SINGLE_CHANNEL: u16 = 0x0400;
    /// The column axis has extent 1.
    pub const SINGLE_COLUMN: u16 = 0x0800;
    /// The row axis has extent 1.
    pub const SINGLE_ROW: u16 = 0x1000;
    /// The frame axis has extent 1.
    pub const SINGLE_FRAME: u16 = 0x2000;
    /// The element type portion of the fingerprint.
    pub const TYPE: u16 = BITS | FLOATING | SIGNED;

    /// Renders a fingerprint as the compact string used in log lines and
    /// mangled specialization names, e.g. `"8si1100"`.
    #[must_use]
    pub fn to_string(hash: u16) -> String {
        format!(
            "{}{}{}{}{}{}{}",
            hash & BITS,
            if hash & SIGNED != 0 { 's' } else { 'u' },
            if hash & FLOATING != 0 { 'f' } else { 'i' },
            u16::from(hash & SINGLE_CHANNEL != 0),
            u16::from(hash & SINGLE_COLUMN != 0),
            u16::from(hash & SINGLE_ROW != 0),
            u16::from(hash & SINGLE_FRAME != 0),
        )
    }
}

// =============================================================================
// ElementType Enum
// =============================================================================

/// Runtime representation of matrix element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    /// 1-bit unsigned integer (stored one byte per element).
    U1,
    /// 8-bit unsigned integer.
    U8,
    /// 16-bit unsigned integer.
    U16,
    /// 32-bit unsigned integer.
    U32,
    /// 64-bit unsigned integer.
    U64,
    /// 8-bit signed integer.
    S8,
    /// 16-bit signed integer.
    S16,
    /// 32-bit signed integer.
    S32,
    /// 64-bit signed integer.
    S64,
    /// 16-bit floating point (half precision).
    F16,
    /// 32-bit floating point (single precision).
    F32,
    /// 64-bit floating point (double precision).
    F64,
}

impl ElementType {
    /// Returns the element width in bits.
    #[must_use]
    pub const fn bits(self) -> u16 {
        match self {
            Self::U1 => 1,
            Self::U8 | Self::S8 => 8,
            Self::U16 | Self::S16 | Self::F16 => 16,
            Self::U32 | Self::S32 | Self::F32 => 32,
            Self::U64 | Self::S64 | Self::F64 => 64,
        }
    }

    /// Returns true if this is a floating point type.
    #[must_use]
    pub const fn is_floating(self) -> bool {
        matches!(self, Self::F16 | Self::F32 | Self::F64)
    }

    /// Returns true if this is a signed type. Floating types are signed.
    #[must_use]
    pub const fn is_signed(self) -> bool {
        matches!(
            self,
            Self::S8 | Self::S16 | Self::S32 | Self::S64 | Self::F16 | Self::F32 | Self::F64
        )
    }

    /// Returns the packed element size in bytes, `ceil(bits / 8)`.
    #[must_use]
    pub const fn size_of(self) -> usize {
        ((self.bits() as usize) + 7) / 8
    }

    /// Returns the element type portion of a fingerprint.
    #[must_use]
    pub const fn code(self) -> u16 {
        let mut code = self.bits();
        if self.is_floating() {
            code |= fingerprint::FLOATING;
        }
        if self.is_signed() {
            code |= fingerprint::SIGNED;
        }
        code
    }

    /// Decodes the element type portion of a fingerprint.
    pub fn from_code(hash: u16) -> Result<Self> {
        let bits = hash & fingerprint::BITS;
        let floating = hash & fingerprint::FLOATING != 0;
        let signed = hash & fingerprint::SIGNED != 0;
        match (bits, floating, signed) {
            (1, false, false) => Ok(Self::U1),
            (8, false, false) => Ok(Self::U8),
            (16, false, false) => Ok(Self::U16),
            (32, false, false) => Ok(Self::U32),
            (64, false, false) => Ok(Self::U64),
            (8, false, true) => Ok(Self::S8),
            (16, false, true) => Ok(Self::S16),
            (32, false, true) => Ok(Self::S32),
            (64, false, true) => Ok(Self::S64),
            (16, true, true) => Ok(Self::F16),
            (32, true, true) => Ok(Self::F32),
            (64, true, true) => Ok(Self::F64),
            _ if !matches!(bits, 1 | 8 | 16 | 32 | 64) => Err(Error::InvalidBitWidth { bits }),
            _ => Err(Error::UnknownType(fingerprint::to_string(hash))),
        }
    }

    /// Returns the name of this element type as a string.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::U1 => "u1",
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::S8 => "s8",
            Self::S16 => "s16",
            Self::S32 => "s32",
            Self::S64 => "s64",
            Self::F16 => "f16",
            Self::F32 => "f32",
            Self::F64 => "f64",
        }
    }

    /// Parses an element type name, e.g. a cast target in a pipeline
    /// descriptor.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "u1" => Ok(Self::U1),
            "u8" => Ok(Self::U8),
            "u16" => Ok(Self::U16),
            "u32" => Ok(Self::U32),
            "u64" => Ok(Self::U64),
            "s8" => Ok(Self::S8),
            "s16" => Ok(Self::S16),
            "s32" => Ok(Self::S32),
            "s64" => Ok(Self::S64),
            "f16" => Ok(Self::F16),
            "f32" => Ok(Self::F32),
            "f64" => Ok(Self::F64),
            _ => Err(Error::UnknownType(name.to_string())),
        }
    }
}

impl core::fmt::Display for ElementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Scalar Trait
// =============================================================================

/// Trait for Rust scalar types that can be viewed in and out of a matrix.
///
/// The `Pod` bound is what makes reinterpreting a matrix's byte buffer as a
/// typed slice sound.
pub trait Scalar: Copy + Clone + core::fmt::Debug + Default + Send + Sync + Pod + 'static {
    /// The runtime element type for this scalar.
    const ELEMENT: ElementType;
}

macro_rules! impl_scalar {
    ($ty:ty, $elem:expr) => {
        impl Scalar for $ty {
            const ELEMENT: ElementType = $elem;
        }
    };
}

impl_scalar!(u8, ElementType::U8);
impl_scalar!(u16, ElementType::U16);
impl_scalar!(u32, ElementType::U32);
impl_scalar!(u64, ElementType::U64);
impl_scalar!(i8, ElementType::S8);
impl_scalar!(i16, ElementType::S16);
impl_scalar!(i32, ElementType::S32);
impl_scalar!(i64, ElementType::S64);
impl_scalar!(f16, ElementType::F16);
impl_scalar!(f32, ElementType::F32);
impl_scalar!(f64, ElementType::F64);

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_and_flags() {
        assert_eq!(ElementType::U1.bits(), 1);
        assert_eq!(ElementType::S16.bits(), 16);
        assert_eq!(ElementType::F64.bits(), 64);
        assert!(ElementType::F32.is_floating());
        assert!(ElementType::F32.is_signed());
        assert!(ElementType::S8.is_signed());
        assert!(!ElementType::U32.is_signed());
    }

    #[test]
    fn test_size_of_packs_sub_byte_widths() {
        assert_eq!(ElementType::U1.size_of(), 1);
        assert_eq!(ElementType::U8.size_of(), 1);
        assert_eq!(ElementType::F64.size_of(), 8);
    }

    #[test]
    fn test_code_round_trip() {
        for ty in [
            ElementType::U1,
            ElementType::U8,
            ElementType::U16,
            ElementType::U32,
            ElementType::U64,
            ElementType::S8,
            ElementType::S16,
            ElementType::S32,
            ElementType::S64,
            ElementType::F16,
            ElementType::F32,
            ElementType::F64,
        ] {
            assert_eq!(ElementType::from_code(ty.code()).unwrap(), ty);
        }
    }

    #[test]
    fn test_from_code_rejects_bad_widths() {
        assert!(matches!(
            ElementType::from_code(24),
            Err(Error::InvalidBitWidth { bits: 24 })
        ));
        // unsigned floating is not a type
        assert!(ElementType::from_code(32 | fingerprint::FLOATING).is_err());
    }

    #[test]
    fn test_name_round_trip() {
        assert_eq!(ElementType::from_name("s8").unwrap(), ElementType::S8);
        assert_eq!(ElementType::from_name("f32").unwrap(), ElementType::F32);
        assert!(ElementType::from_name("q7").is_err());
    }

    #[test]
    fn test_fingerprint_string() {
        let hash = ElementType::S8.code() | fingerprint::SINGLE_CHANNEL | fingerprint::SINGLE_FRAME;
        assert_eq!(fingerprint::to_string(hash), "8si1001");
        assert_eq!(fingerprint::to_string(ElementType::F32.code()), "32sf0000");
    }
}
