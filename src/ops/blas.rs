//! Dense per-block solver kernels: unblocked Cholesky, triangular panel
//! solve, and the trailing-update products.
//!
//! These are the native implementations the stream workers execute on
//! every backend. Update kernels parallelize over target columns with
//! rayon once the tile is large enough to pay for it.

use rayon::prelude::*;

use crate::error::{CholForgeError, CholResult};
use crate::ops::check_panel;
use crate::scalar::Scalar;

/// Column count below which update kernels stay single-threaded.
const PAR_MIN_COLS: usize = 16;
/// Minimum per-tile flop volume before rayon is worth the fan-out.
const PAR_MIN_WORK: usize = 64 * 1024;

/// Unblocked in-place Cholesky of the lower triangle: `A = L * L^T`.
///
/// On a non-positive leading minor, fails with `NotPositiveDefinite`
/// carrying the offending column index (relative to this block); callers
/// running inside a larger factorization rebase the index onto their own
/// block numbering.
pub fn potrf_lower<T: Scalar>(n: usize, a: &mut [T], lda: usize) -> CholResult<()> {
    check_panel("potrf_lower", n, n, lda, a.len())?;
    for j in 0..n {
        let mut diag = a[j * lda + j];
        for m in 0..j {
            let v = a[m * lda + j];
            diag -= v * v;
        }
        if diag <= T::ZERO {
            return Err(CholForgeError::NotPositiveDefinite { block: j });
        }
        let diag = diag.sqrt();
        a[j * lda + j] = diag;
        for i in (j + 1)..n {
            let mut acc = a[j * lda + i];
            for m in 0..j {
                acc -= a[m * lda + i] * a[m * lda + j];
            }
            a[j * lda + i] = acc / diag;
        }
    }
    Ok(())
}

/// Triangular panel solve from the right with a transposed lower factor:
/// `B <- alpha * B * L^-T`, where `L` is `n x n` lower triangular and `B`
/// is `m x n`. This is the panel-solve step of the right-looking
/// algorithm: `A_ik <- A_ik * L_kk^-T`.
pub fn trsm_right_lower_trans<T: Scalar>(
    m: usize,
    n: usize,
    alpha: T,
    l: &[T],
    ldl: usize,
    b: &mut [T],
    ldb: usize,
) -> CholResult<()> {
    check_panel("trsm_right_lower_trans (L)", n, n, ldl, l.len())?;
    check_panel("trsm_right_lower_trans (B)", m, n, ldb, b.len())?;
    if alpha != T::ONE {
        for j in 0..n {
            for r in 0..m {
                b[j * ldb + r] *= alpha;
            }
        }
    }
    // X * L^T = B  =>  X[:, j] = (B[:, j] - sum_{t<j} X[:, t] * L[j, t]) / L[j, j]
    for j in 0..n {
        let diag = l[j * ldl + j];
        if diag == T::ZERO {
            return Err(CholForgeError::DeviceError(format!(
                "singular triangular factor: zero diagonal at column {j}"
            )));
        }
        for t in 0..j {
            let factor = l[t * ldl + j];
            for r in 0..m {
                let xt = b[t * ldb + r];
                b[j * ldb + r] -= xt * factor;
            }
        }
        for r in 0..m {
            b[j * ldb + r] /= diag;
        }
    }
    Ok(())
}

/// General product with a transposed right operand:
/// `C <- alpha * A * B^T + beta * C` with `A` of shape `m x k`, `B` of
/// shape `n x k`, `C` of shape `m x n`. This is the off-diagonal trailing
/// update `A_ij <- A_ij - A_ik * A_jk^T`.
pub fn gemm_nt<T: Scalar>(
    m: usize,
    n: usize,
    k: usize,
    alpha: T,
    a: &[T],
    lda: usize,
    b: &[T],
    ldb: usize,
    beta: T,
    c: &mut [T],
    ldc: usize,
) -> CholResult<()> {
    check_panel("gemm_nt (A)", m, k, lda, a.len())?;
    check_panel("gemm_nt (B)", n, k, ldb, b.len())?;
    check_panel("gemm_nt (C)", m, n, ldc, c.len())?;

    let col = |cj: &mut [T], j: usize| {
        for r in 0..m {
            cj[r] *= beta;
        }
        for t in 0..k {
            let factor = alpha * b[t * ldb + j];
            let acol = &a[t * lda..t * lda + m];
            for r in 0..m {
                cj[r] += acol[r] * factor;
            }
        }
    };

    if n >= PAR_MIN_COLS && m * n * k >= PAR_MIN_WORK {
        c.par_chunks_mut(ldc)
            .take(n)
            .enumerate()
            .for_each(|(j, cj)| col(&mut cj[..m], j));
    } else {
        for j in 0..n {
            col(&mut c[j * ldc..j * ldc + m], j);
        }
    }
    Ok(())
}

/// Symmetric rank-k update of the lower triangle:
/// `C <- alpha * A * A^T + beta * C`, touching only `C`'s lower triangle.
/// This is the diagonal trailing update `A_jj <- A_jj - A_jk * A_jk^T`.
pub fn syrk_lower<T: Scalar>(
    n: usize,
    k: usize,
    alpha: T,
    a: &[T],
    lda: usize,
    beta: T,
    c: &mut [T],
    ldc: usize,
) -> CholResult<()> {
    check_panel("syrk_lower (A)", n, k, lda, a.len())?;
    check_panel("syrk_lower (C)", n, n, ldc, c.len())?;

    let col = |cj: &mut [T], j: usize| {
        // cj is the sub-diagonal part of column j: rows j..n.
        for v in cj.iter_mut() {
            *v *= beta;
        }
        for t in 0..k {
            let factor = alpha * a[t * lda + j];
            let acol = &a[t * lda + j..t * lda + n];
            for (r, v) in cj.iter_mut().enumerate() {
                *v += acol[r] * factor;
            }
        }
    };

    if n >= PAR_MIN_COLS && n * n * k >= PAR_MIN_WORK {
        c.par_chunks_mut(ldc)
            .take(n)
            .enumerate()
            .for_each(|(j, cj)| col(&mut cj[j..n], j));
    } else {
        for j in 0..n {
            col(&mut c[j * ldc + j..j * ldc + n], j);
        }
    }
    Ok(())
}
