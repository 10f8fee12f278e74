//! Matrix Value - Owning and Borrowing Dense Tensors
//!
//! A `Matrix` pairs a [`MatrixHeader`] with buffer ownership. Owning matrices
//! hold storage obtained from `malloc` (either host-side or inside a compiled
//! kernel) and release it with `free` on drop; borrowed matrices wrap an
//! externally-owned image buffer and never free.
//!
//! @version 0.1.0
//! @author Veris Development Team

use veris_core::element::{ElementType, Scalar};
use veris_core::error::{Error, Result};

use crate::header::MatrixHeader;

// =============================================================================
// Matrix
// =============================================================================

/// A dense four-axis matrix value.
pub struct Matrix {
    header: MatrixHeader,
    owned: bool,
}

// An owning matrix has exclusive access to its buffer; a borrowed matrix is
// created through an unsafe constructor whose caller vouches for the buffer.
unsafe impl Send for Matrix {}
unsafe impl Sync for Matrix {}

impl Matrix {
    /// Allocates a zero-initialized matrix of the given element type and
    /// shape `[channels, columns, rows, frames]`.
    pub fn new(element: ElementType, shape: [i32; 4]) -> Result<Self> {
        let mut header = MatrixHeader::with_shape(element, shape)?;
        let bytes = header.bytes();
        let data = unsafe { libc::calloc(bytes, 1) };
        if data.is_null() {
            return Err(Error::Allocation { bytes });
        }
        header.data = data.cast::<u8>();
        Ok(Self {
            header,
            owned: true,
        })
    }

    /// Allocates a matrix and fills it from a slice in storage order
    /// (channels innermost, frames outermost).
    pub fn from_slice<T: Scalar>(values: &[T], shape: [i32; 4]) -> Result<Self> {
        let matrix = Self::new(T::ELEMENT, shape)?;
        if values.len() != matrix.elements() {
            return Err(Error::InvalidShape {
                channels: shape[0],
                columns: shape[1],
                rows: shape[2],
                frames: shape[3],
            });
        }
        unsafe {
            core::ptr::copy_nonoverlapping(
                values.as_ptr().cast::<u8>(),
                matrix.header.data,
                matrix.bytes(),
            );
        }
        Ok(matrix)
    }

    /// Wraps an externally-owned contiguous buffer without taking ownership.
    ///
    /// # Safety
    /// `data` must point to at least `ceil(bits/8) × channels × columns ×
    /// rows × frames` bytes of initialized, element-aligned storage that
    /// outlives the returned matrix and is not mutated through other aliases
    /// while the matrix is alive.
    pub unsafe fn from_borrowed(
        data: *mut u8,
        element: ElementType,
        shape: [i32; 4],
    ) -> Result<Self> {
        let mut header = MatrixHeader::with_shape(element, shape)?;
        header.data = data;
        Ok(Self {
            header,
            owned: false,
        })
    }

    /// Adopts a header whose buffer was allocated with `malloc`, typically by
    /// a compiled kernel. The matrix takes ownership and frees on drop.
    ///
    /// # Safety
    /// `header.data` must be a live `malloc` allocation of at least
    /// `header.bytes()` bytes not owned by anything else.
    #[must_use]
    pub unsafe fn from_owned_header(header: MatrixHeader) -> Self {
        Self {
            header,
            owned: true,
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// The matrix header.
    #[must_use]
    pub fn header(&self) -> &MatrixHeader {
        &self.header
    }

    /// The type/shape fingerprint.
    #[must_use]
    pub fn hash(&self) -> u16 {
        self.header.hash
    }

    /// The element type.
    pub fn element_type(&self) -> Result<ElementType> {
        self.header.element_type()
    }

    /// The axis extents as `[channels, columns, rows, frames]`.
    #[must_use]
    pub fn shape(&self) -> [i32; 4] {
        self.header.shape()
    }

    /// Size of the element index space.
    #[must_use]
    pub fn elements(&self) -> usize {
        self.header.elements()
    }

    /// Packed storage size in bytes.
    #[must_use]
    pub fn bytes(&self) -> usize {
        self.header.bytes()
    }

    fn check_access<T: Scalar>(&self) -> Result<()> {
        let element = self.element_type()?;
        if element != T::ELEMENT {
            return Err(Error::UnknownType(format!(
                "requested {} access to a {} matrix",
                T::ELEMENT.name(),
                element.name()
            )));
        }
        if self.header.data.is_null()
            || self.header.data.align_offset(core::mem::align_of::<T>()) != 0
        {
            return Err(Error::NotContiguous);
        }
        Ok(())
    }

    /// Views the elements as a typed slice in storage order.
    pub fn as_slice<T: Scalar>(&self) -> Result<&[T]> {
        self.check_access::<T>()?;
        Ok(unsafe {
            core::slice::from_raw_parts(self.header.data.cast::<T>(), self.elements())
        })
    }

    /// Views the elements as a mutable typed slice in storage order.
    pub fn as_mut_slice<T: Scalar>(&mut self) -> Result<&mut [T]> {
        self.check_access::<T>()?;
        Ok(unsafe {
            core::slice::from_raw_parts_mut(self.header.data.cast::<T>(), self.elements())
        })
    }

    /// Copies the elements out as a typed vector in storage order.
    pub fn to_vec<T: Scalar>(&self) -> Result<Vec<T>> {
        Ok(self.as_slice::<T>()?.to_vec())
    }
}

impl Clone for Matrix {
    /// Deep copy; the clone always owns its storage.
    fn clone(&self) -> Self {
        let mut copy = Self::new(
            self.element_type().expect("cloning a matrix with a valid fingerprint"),
            self.shape(),
        )
        .expect("cloning a live matrix");
        unsafe {
            core::ptr::copy_nonoverlapping(self.header.data, copy.header.data, self.bytes());
        }
        copy.header.hash = self.header.hash;
        copy
    }
}

impl Drop for Matrix {
    fn drop(&mut self) {
        if self.owned && !self.header.data.is_null() {
            unsafe { libc::free(self.header.data.cast()) };
        }
    }
}

impl core::fmt::Debug for Matrix {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Matrix({}, owned={})", self.header, self.owned)
    }
}

impl core::fmt::Display for Matrix {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.header.fingerprint_string())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_slice_round_trip() {
        let m = Matrix::from_slice::<i8>(&[-1, -2, 3, 4], [1, 2, 2, 1]).unwrap();
        assert_eq!(m.element_type().unwrap(), ElementType::S8);
        assert_eq!(m.to_vec::<i8>().unwrap(), vec![-1, -2, 3, 4]);
        assert_eq!(m.elements(), 4);
    }

    #[test]
    fn test_typed_access_is_checked() {
        let m = Matrix::from_slice::<f32>(&[1.0, 2.0], [1, 2, 1, 1]).unwrap();
        assert!(m.as_slice::<f32>().is_ok());
        assert!(m.as_slice::<i32>().is_err());
    }

    #[test]
    fn test_from_slice_rejects_wrong_count() {
        assert!(Matrix::from_slice::<u8>(&[1, 2, 3], [1, 2, 2, 1]).is_err());
    }

    #[test]
    fn test_new_is_zeroed() {
        let m = Matrix::new(ElementType::U16, [2, 3, 1, 1]).unwrap();
        assert!(m.to_vec::<u16>().unwrap().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_clone_is_deep() {
        let m = Matrix::from_slice::<u8>(&[7, 8], [2, 1, 1, 1]).unwrap();
        let mut c = m.clone();
        c.as_mut_slice::<u8>().unwrap()[0] = 99;
        assert_eq!(m.to_vec::<u8>().unwrap(), vec![7, 8]);
        assert_eq!(c.to_vec::<u8>().unwrap(), vec![99, 8]);
    }

    #[test]
    fn test_borrowed_does_not_free() {
        let mut backing = vec![1.0f32, 2.0, 3.0, 4.0];
        {
            let m = unsafe {
                Matrix::from_borrowed(backing.as_mut_ptr().cast(), ElementType::F32, [1, 4, 1, 1])
            }
            .unwrap();
            assert_eq!(m.to_vec::<f32>().unwrap(), backing);
        }
        // still usable after the borrow is dropped
        assert_eq!(backing[0], 1.0);
    }

    #[test]
    fn test_display_is_fingerprint() {
        let m = Matrix::new(ElementType::F32, [1, 4, 2, 1]).unwrap();
        assert_eq!(m.to_string(), "32sf1001");
    }
}
