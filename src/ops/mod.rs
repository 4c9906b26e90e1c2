//! Per-block computational kernels.
//!
//! All kernels operate on column-major buffers addressed through explicit
//! leading dimensions, so a kernel can work on a sub-panel of a larger
//! resident buffer without copying. The implementations here are what the
//! stream workers execute on every backend.

pub mod blas;
pub mod triangular;

use crate::error::{CholForgeError, CholResult};

/// Validate a column-major `rows x cols` panel with leading dimension
/// `ld` against a backing slice of `len` elements.
pub(crate) fn check_panel(
    name: &str,
    rows: usize,
    cols: usize,
    ld: usize,
    len: usize,
) -> CholResult<()> {
    if rows == 0 || cols == 0 {
        return Err(CholForgeError::InvalidArgument(format!(
            "{name}: dimensions must be positive (got {rows}x{cols})"
        )));
    }
    if ld < rows {
        return Err(CholForgeError::InvalidArgument(format!(
            "{name}: leading dimension {ld} is smaller than row count {rows}"
        )));
    }
    let needed = (cols - 1)
        .checked_mul(ld)
        .and_then(|v| v.checked_add(rows))
        .ok_or_else(|| {
            CholForgeError::InvalidArgument(format!("{name}: panel extent overflows"))
        })?;
    if len < needed {
        return Err(CholForgeError::InvalidArgument(format!(
            "{name}: buffer of {len} elements cannot hold a {rows}x{cols} panel \
             with leading dimension {ld} ({needed} needed)"
        )));
    }
    Ok(())
}
