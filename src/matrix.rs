//! Caller-owned dense matrix handle.
//!
//! The factorization operates in place on a column-major (Fortran order)
//! buffer supplied by the caller, addressed through an explicit leading
//! dimension so that a sub-panel of a larger backing buffer can be used
//! directly. The scheduler never allocates or frees this storage.

use crate::error::{CholForgeError, CholResult};
use crate::scalar::Scalar;

/// Mutable view over a caller-owned `n x n` column-major matrix with
/// leading dimension `lda >= n`.
///
/// Only one triangle is semantically meaningful at any point; the other
/// triangle's contents are unspecified unless explicitly symmetrized with
/// [`crate::ops::triangular::copy_triang`] or zeroed with
/// [`crate::ops::triangular::mul_triang`].
#[derive(Debug)]
pub struct MatrixMut<'a, T> {
    data: &'a mut [T],
    n: usize,
    lda: usize,
}

impl<'a, T: Scalar> MatrixMut<'a, T> {
    /// Wrap a column-major buffer.
    ///
    /// Fails with `InvalidArgument` when `n == 0`, `lda < n`, or the
    /// buffer is too short to address column `n - 1`.
    pub fn new(data: &'a mut [T], n: usize, lda: usize) -> CholResult<Self> {
        if n == 0 {
            return Err(CholForgeError::InvalidArgument(
                "matrix dimension must be positive".into(),
            ));
        }
        if lda < n {
            return Err(CholForgeError::InvalidArgument(format!(
                "leading dimension {lda} is smaller than matrix dimension {n}"
            )));
        }
        // The last column only needs n live rows, not a full stride.
        let needed = (n - 1) * lda + n;
        if data.len() < needed {
            return Err(CholForgeError::InvalidArgument(format!(
                "buffer of {} elements cannot hold an {n}x{n} matrix with lda {lda} ({needed} needed)",
                data.len()
            )));
        }
        Ok(MatrixMut { data, n, lda })
    }

    /// Square wrapper with a contiguous layout (`lda == n`).
    pub fn new_contiguous(data: &'a mut [T], n: usize) -> CholResult<Self> {
        Self::new(data, n, n)
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn lda(&self) -> usize {
        self.lda
    }

    /// Element at (row, col). Intended for tests and small inspections,
    /// not for kernel inner loops.
    pub fn get(&self, row: usize, col: usize) -> T {
        debug_assert!(row < self.n && col < self.n);
        self.data[col * self.lda + row]
    }

    pub fn as_slice(&self) -> &[T] {
        self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        self.data
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut T {
        self.data.as_mut_ptr()
    }
}
