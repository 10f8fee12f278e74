//! Matrix Header - The ABI Shared With Compiled Kernels
//!
//! `MatrixHeader` is the bit-exact structure compiled kernels receive by
//! pointer: an opaque data pointer, four 32-bit signed axis extents, and the
//! 16-bit fingerprint. Generated code addresses the fields through the
//! `*_OFFSET` constants below, so host struct and codegen cannot drift apart.
//!
//! @version 0.1.0
//! @author Veris Development Team

use std::mem::offset_of;

use veris_core::element::{fingerprint, ElementType};
use veris_core::error::{Error, Result};

// =============================================================================
// Layout
// =============================================================================

/// Header of a dense four-axis matrix.
///
/// Storage order is channels innermost, then columns, rows, frames outermost.
/// The `hash` fingerprint is a pure function of the element type and of which
/// axis extents equal 1; the setters below keep it consistent.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MatrixHeader {
    /// Pointer to contiguous element storage.
    pub data: *mut u8,
    /// Channel axis extent.
    pub channels: i32,
    /// Column axis extent.
    pub columns: i32,
    /// Row axis extent.
    pub rows: i32,
    /// Frame axis extent.
    pub frames: i32,
    /// Type/shape fingerprint; see [`veris_core::element::fingerprint`].
    pub hash: u16,
}

/// Byte offset of the `data` field.
pub const DATA_OFFSET: i32 = offset_of!(MatrixHeader, data) as i32;
/// Byte offset of the `channels` field.
pub const CHANNELS_OFFSET: i32 = offset_of!(MatrixHeader, channels) as i32;
/// Byte offset of the `columns` field.
pub const COLUMNS_OFFSET: i32 = offset_of!(MatrixHeader, columns) as i32;
/// Byte offset of the `rows` field.
pub const ROWS_OFFSET: i32 = offset_of!(MatrixHeader, rows) as i32;
/// Byte offset of the `frames` field.
pub const FRAMES_OFFSET: i32 = offset_of!(MatrixHeader, frames) as i32;
/// Byte offset of the `hash` field.
pub const HASH_OFFSET: i32 = offset_of!(MatrixHeader, hash) as i32;

impl MatrixHeader {
    /// Builds a header with a null data pointer for the given element type
    /// and extents. Extents must all be at least 1: a zero-extent matrix has
    /// no element index space for a counted kernel loop.
    pub fn with_shape(element: ElementType, shape: [i32; 4]) -> Result<Self> {
        let [channels, columns, rows, frames] = shape;
        if channels < 1 || columns < 1 || rows < 1 || frames < 1 {
            return Err(Error::InvalidShape {
                channels,
                columns,
                rows,
                frames,
            });
        }
        let mut header = Self {
            data: core::ptr::null_mut(),
            channels,
            columns,
            rows,
            frames,
            hash: element.code(),
        };
        header.refresh_degenerate_flags();
        Ok(header)
    }

    // -------------------------------------------------------------------------
    // Fingerprint accessors
    // -------------------------------------------------------------------------

    /// Element width in bits.
    #[must_use]
    pub fn bits(&self) -> u16 {
        self.hash & fingerprint::BITS
    }

    /// Whether the element type is floating-point.
    #[must_use]
    pub fn is_floating(&self) -> bool {
        self.hash & fingerprint::FLOATING != 0
    }

    /// Whether the element type is signed.
    #[must_use]
    pub fn is_signed(&self) -> bool {
        self.hash & fingerprint::SIGNED != 0
    }

    /// Whether the channel axis is statically degenerate.
    #[must_use]
    pub fn single_channel(&self) -> bool {
        self.hash & fingerprint::SINGLE_CHANNEL != 0
    }

    /// Whether the column axis is statically degenerate.
    #[must_use]
    pub fn single_column(&self) -> bool {
        self.hash & fingerprint::SINGLE_COLUMN != 0
    }

    /// Whether the row axis is statically degenerate.
    #[must_use]
    pub fn single_row(&self) -> bool {
        self.hash & fingerprint::SINGLE_ROW != 0
    }

    /// Whether the frame axis is statically degenerate.
    #[must_use]
    pub fn single_frame(&self) -> bool {
        self.hash & fingerprint::SINGLE_FRAME != 0
    }

    /// Decodes the element type from the fingerprint.
    pub fn element_type(&self) -> Result<ElementType> {
        ElementType::from_code(self.hash)
    }

    // -------------------------------------------------------------------------
    // Fingerprint setters
    // -------------------------------------------------------------------------

    fn set_flag(&mut self, mask: u16, on: bool) {
        if on {
            self.hash |= mask;
        } else {
            self.hash &= !mask;
        }
    }

    /// Sets the element width in bits (the value, not a mask).
    pub fn set_bits(&mut self, bits: u16) {
        self.hash = (self.hash & !fingerprint::BITS) | (bits & fingerprint::BITS);
    }

    /// Sets the floating flag. Floating implies signed.
    pub fn set_floating(&mut self, floating: bool) {
        if floating {
            self.set_signed(true);
        }
        self.set_flag(fingerprint::FLOATING, floating);
    }

    /// Sets the signed flag.
    pub fn set_signed(&mut self, signed: bool) {
        self.set_flag(fingerprint::SIGNED, signed);
    }

    /// Replaces the element type portion of the fingerprint.
    pub fn set_element_type(&mut self, element: ElementType) {
        self.hash = (self.hash & !fingerprint::TYPE) | element.code();
    }

    /// Recomputes the four degenerate-axis flags from the current extents.
    pub fn refresh_degenerate_flags(&mut self) {
        self.set_flag(fingerprint::SINGLE_CHANNEL, self.channels == 1);
        self.set_flag(fingerprint::SINGLE_COLUMN, self.columns == 1);
        self.set_flag(fingerprint::SINGLE_ROW, self.rows == 1);
        self.set_flag(fingerprint::SINGLE_FRAME, self.frames == 1);
    }

    /// Replaces the axis extents and recomputes the degenerate-axis flags.
    pub fn set_extents(&mut self, shape: [i32; 4]) {
        let [channels, columns, rows, frames] = shape;
        self.channels = channels;
        self.columns = columns;
        self.rows = rows;
        self.frames = frames;
        self.refresh_degenerate_flags();
    }

    // -------------------------------------------------------------------------
    // Shape derivations
    // -------------------------------------------------------------------------

    /// The axis extents as `[channels, columns, rows, frames]`.
    #[must_use]
    pub fn shape(&self) -> [i32; 4] {
        [self.channels, self.columns, self.rows, self.frames]
    }

    /// Size of the logical element index space.
    #[must_use]
    pub fn elements(&self) -> usize {
        self.channels as usize * self.columns as usize * self.rows as usize * self.frames as usize
    }

    /// Packed storage size in bytes: `ceil(bits / 8) × elements`.
    #[must_use]
    pub fn bytes(&self) -> usize {
        (self.bits() as usize).div_ceil(8) * self.elements()
    }

    /// The fingerprint rendered as the compact string used in log lines and
    /// mangled specialization names.
    #[must_use]
    pub fn fingerprint_string(&self) -> String {
        fingerprint::to_string(self.hash)
    }
}

impl core::fmt::Display for MatrixHeader {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}x{}x{}x{} {}",
            self.channels,
            self.columns,
            self.rows,
            self.frames,
            self.fingerprint_string()
        )
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_abi_layout() {
        assert_eq!(DATA_OFFSET, 0);
        assert_eq!(CHANNELS_OFFSET, 8);
        assert_eq!(COLUMNS_OFFSET, 12);
        assert_eq!(ROWS_OFFSET, 16);
        assert_eq!(FRAMES_OFFSET, 20);
        assert_eq!(HASH_OFFSET, 24);
        assert_eq!(core::mem::size_of::<MatrixHeader>(), 32);
    }

    #[test]
    fn test_degenerate_flags_track_extents() {
        let h = MatrixHeader::with_shape(ElementType::F32, [1, 4, 2, 1]).unwrap();
        assert!(h.single_channel());
        assert!(!h.single_column());
        assert!(!h.single_row());
        assert!(h.single_frame());
        assert_eq!(h.elements(), 8);
        assert_eq!(h.bytes(), 32);
    }

    #[test]
    fn test_rejects_empty_shape() {
        assert!(MatrixHeader::with_shape(ElementType::U8, [0, 2, 2, 1]).is_err());
    }

    #[test]
    fn test_floating_implies_signed() {
        let mut h = MatrixHeader::with_shape(ElementType::U8, [1, 1, 1, 1]).unwrap();
        h.set_floating(true);
        h.set_bits(32);
        assert!(h.is_signed());
        assert_eq!(h.element_type().unwrap(), ElementType::F32);
    }

    #[test]
    fn test_u1_packing() {
        let h = MatrixHeader::with_shape(ElementType::U1, [3, 5, 1, 1]).unwrap();
        assert_eq!(h.bytes(), 15);
    }

    #[test]
    fn test_display() {
        let h = MatrixHeader::with_shape(ElementType::S8, [2, 2, 1, 1]).unwrap();
        assert_eq!(h.to_string(), "2x2x1x1 8si0011");
    }
}
