//! Triangular matrix primitives.
//!
//! Stateless operations on one resident block: symmetrize-by-copy, scale
//! one triangle, out-of-place transpose, row/column-broadcast multiply of
//! a triangle by a vector, and the out-of-place triangular self-product
//! (LAUUM). These are the elementary kernels the blocked algorithms are
//! assembled from.

use crate::error::CholResult;
use crate::ops::check_panel;
use crate::scalar::Scalar;

/// Which axis of the triangle a vector broadcast runs along.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Element `(i, j)` is scaled by `v[i]`.
    Row,
    /// Element `(i, j)` is scaled by `v[j]`.
    Col,
}

/// Overwrite the triangle opposite to `upper` with the mirror of the
/// `upper`-selected triangle, producing a fully symmetric matrix from a
/// one-triangle-valid input. The source triangle and diagonal are left
/// untouched.
pub fn copy_triang<T: Scalar>(n: usize, a: &mut [T], lda: usize, upper: bool) -> CholResult<()> {
    check_panel("copy_triang", n, n, lda, a.len())?;
    for j in 0..n {
        for i in (j + 1)..n {
            // (i, j) is strictly lower, (j, i) strictly upper.
            if upper {
                a[j * lda + i] = a[i * lda + j];
            } else {
                a[i * lda + j] = a[j * lda + i];
            }
        }
    }
    Ok(())
}

/// Scale every element of the `upper`-selected triangle (diagonal
/// included) by `multiplier`. With `preserve_diag` the diagonal is left
/// untouched regardless of the multiplier. Elements outside the selected
/// triangle are never modified.
pub fn mul_triang<T: Scalar>(
    n: usize,
    a: &mut [T],
    lda: usize,
    upper: bool,
    preserve_diag: bool,
    multiplier: T,
) -> CholResult<()> {
    check_panel("mul_triang", n, n, lda, a.len())?;
    for j in 0..n {
        let (lo, hi) = if upper { (0, j + 1) } else { (j, n) };
        for i in lo..hi {
            if preserve_diag && i == j {
                continue;
            }
            a[j * lda + i] *= multiplier;
        }
    }
    Ok(())
}

/// Full out-of-place transpose: `output[j, i] = input[i, j]` for an
/// `rows x cols` input. The output panel is `cols x rows` with leading
/// dimension `ldb`. Buffers must not alias.
pub fn copy_transpose<T: Scalar>(
    rows: usize,
    cols: usize,
    input: &[T],
    lda: usize,
    output: &mut [T],
    ldb: usize,
) -> CholResult<()> {
    check_panel("copy_transpose (input)", rows, cols, lda, input.len())?;
    check_panel("copy_transpose (output)", cols, rows, ldb, output.len())?;
    for j in 0..cols {
        for i in 0..rows {
            output[i * ldb + j] = input[j * lda + i];
        }
    }
    Ok(())
}

/// Multiply the `upper`-selected triangle of `A` (diagonal included) by a
/// vector broadcast along rows or columns: element `(i, j)` is scaled by
/// `v[i]` (`Side::Row`) or `v[j]` (`Side::Col`). Used to apply diagonal
/// scaling during blocked updates.
pub fn vec_mul_triang<T: Scalar>(
    n: usize,
    a: &mut [T],
    lda: usize,
    v: &[T],
    upper: bool,
    side: Side,
) -> CholResult<()> {
    check_panel("vec_mul_triang", n, n, lda, a.len())?;
    check_panel("vec_mul_triang (v)", n, 1, n, v.len())?;
    for j in 0..n {
        let (lo, hi) = if upper { (0, j + 1) } else { (j, n) };
        for i in lo..hi {
            let factor = match side {
                Side::Row => v[i],
                Side::Col => v[j],
            };
            a[j * lda + i] *= factor;
        }
    }
    Ok(())
}

/// Out-of-place triangular self-product on an `n x n` leading sub-block:
/// `B = L * L^T` when `lower`, `B = U^T * U` otherwise, where `L`/`U` is
/// the corresponding triangle of `A`. The full symmetric product is
/// written to `B`; elements of `A` outside the selected triangle are
/// never read. Used to assemble derived matrices from a Cholesky factor
/// without materializing the full factor first.
pub fn lauum<T: Scalar>(
    n: usize,
    a: &[T],
    lda: usize,
    b: &mut [T],
    ldb: usize,
    lower: bool,
) -> CholResult<()> {
    check_panel("lauum (A)", n, n, lda, a.len())?;
    check_panel("lauum (B)", n, n, ldb, b.len())?;
    for j in 0..n {
        for i in j..n {
            let mut acc = T::ZERO;
            if lower {
                // (L L^T)[i, j] = sum_m L[i, m] L[j, m], m <= min(i, j) = j
                for m in 0..=j {
                    acc += a[m * lda + i] * a[m * lda + j];
                }
            } else {
                // (U^T U)[i, j] = sum_m U[m, i] U[m, j], m <= min(i, j) = j
                for m in 0..=j {
                    acc += a[i * lda + m] * a[j * lda + m];
                }
            }
            b[j * ldb + i] = acc;
            b[i * ldb + j] = acc;
        }
    }
    Ok(())
}
