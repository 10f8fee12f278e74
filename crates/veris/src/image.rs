//! Image Boundary - Wrapping Externally-Owned Buffers
//!
//! The enclosing framework presents images as dimensions + element type +
//! pointer with a contiguity guarantee; the core rejects non-contiguous
//! inputs. An `ImageView` validates that contract and converts to a matrix,
//! either borrowing the buffer (zero copy, kernel input only) or copying into
//! an owning matrix.
//!
//! @version 0.1.0
//! @author Veris Development Team

use veris_core::element::ElementType;
use veris_core::error::{Error, Result};
use veris_matrix::Matrix;

/// A single-frame image buffer owned by the caller.
pub struct ImageView<'a> {
    data: &'a mut [u8],
    channels: i32,
    columns: i32,
    rows: i32,
    element: ElementType,
    row_stride: usize,
}

impl<'a> ImageView<'a> {
    /// Describes an image buffer. `row_stride` is in bytes; pass
    /// `columns × channels × element size` for tightly packed rows.
    pub fn new(
        data: &'a mut [u8],
        element: ElementType,
        channels: i32,
        columns: i32,
        rows: i32,
        row_stride: usize,
    ) -> Self {
        Self {
            data,
            channels,
            columns,
            rows,
            element,
            row_stride,
        }
    }

    fn packed_row_bytes(&self) -> usize {
        self.columns as usize * self.channels as usize * self.element.size_of()
    }

    fn check_contiguous(&self) -> Result<()> {
        if self.row_stride != self.packed_row_bytes() {
            return Err(Error::NotContiguous);
        }
        if self.data.len() < self.packed_row_bytes() * self.rows as usize {
            return Err(Error::NotContiguous);
        }
        Ok(())
    }

    /// Wraps the buffer as a borrowed single-frame matrix without copying.
    ///
    /// # Safety
    /// The returned matrix aliases this view's buffer but does not carry its
    /// lifetime; the caller must drop the matrix before the buffer, and must
    /// not construct a kernel output over the same buffer.
    pub unsafe fn wrap(&mut self) -> Result<Matrix> {
        self.check_contiguous()?;
        Matrix::from_borrowed(
            self.data.as_mut_ptr(),
            self.element,
            [self.channels, self.columns, self.rows, 1],
        )
    }

    /// Copies the buffer into an owning single-frame matrix.
    pub fn to_matrix(&self) -> Result<Matrix> {
        self.check_contiguous()?;
        let matrix = Matrix::new(self.element, [self.channels, self.columns, self.rows, 1])?;
        unsafe {
            core::ptr::copy_nonoverlapping(self.data.as_ptr(), matrix.header().data, matrix.bytes());
        }
        Ok(matrix)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_rejects_padded_rows() {
        let mut data = vec![0u8; 2 * 8]; // 4 pixels per row + 4 bytes padding
        let mut view = ImageView::new(&mut data, ElementType::U8, 1, 4, 2, 8);
        assert!(matches!(unsafe { view.wrap() }, Err(Error::NotContiguous)));
    }

    #[test]
    fn test_wrap_borrows_packed_rows() {
        let mut data = vec![1u8, 2, 3, 4, 5, 6];
        let mut view = ImageView::new(&mut data, ElementType::U8, 1, 3, 2, 3);
        let matrix = unsafe { view.wrap() }.unwrap();
        assert_eq!(matrix.shape(), [1, 3, 2, 1]);
        assert_eq!(matrix.to_vec::<u8>().unwrap(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_to_matrix_copies() {
        let mut data = vec![7u8, 8, 9, 10];
        let view = ImageView::new(&mut data, ElementType::U8, 2, 2, 1, 4);
        let matrix = view.to_matrix().unwrap();
        drop(data);
        assert_eq!(matrix.to_vec::<u8>().unwrap(), vec![7, 8, 9, 10]);
    }
}
