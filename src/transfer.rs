//! Strided 2D copies between host matrices and device buffers.
//!
//! Everything here moves column-major panels: `rows x cols` elements
//! read with leading dimension `lda` and written with leading dimension
//! `ldb`. The byte-level [`copy_2d`] is the primitive; the typed
//! device variants stage tiles into and out of [`DeviceBuffer`]s, either
//! synchronously on the calling thread or asynchronously on a stream.

use std::sync::Arc;

use crate::engine::{CompletionEvent, DeviceBuffer, DeviceStream};
use crate::error::{CholForgeError, CholResult};
use crate::scalar::Scalar;

fn check_copy(
    rows: usize,
    cols: usize,
    elem_size: usize,
    lda: usize,
    src_len: usize,
    ldb: usize,
    dst_len: usize,
) -> CholResult<()> {
    if rows == 0 || cols == 0 || elem_size == 0 {
        return Err(CholForgeError::InvalidArgument(format!(
            "copy_2d: degenerate shape {rows}x{cols} elem_size={elem_size}"
        )));
    }
    if lda < rows || ldb < rows {
        return Err(CholForgeError::InvalidArgument(format!(
            "copy_2d: leading dimensions (lda={lda}, ldb={ldb}) below row count {rows}"
        )));
    }
    let src_need = (cols - 1)
        .checked_mul(lda)
        .and_then(|v| v.checked_add(rows))
        .and_then(|v| v.checked_mul(elem_size));
    let dst_need = (cols - 1)
        .checked_mul(ldb)
        .and_then(|v| v.checked_add(rows))
        .and_then(|v| v.checked_mul(elem_size));
    match (src_need, dst_need) {
        (Some(s), Some(d)) if s <= src_len && d <= dst_len => Ok(()),
        (Some(s), Some(d)) => Err(CholForgeError::InvalidArgument(format!(
            "copy_2d: panel {rows}x{cols} needs {s}/{d} bytes, buffers hold {src_len}/{dst_len}"
        ))),
        _ => Err(CholForgeError::InvalidArgument(
            "copy_2d: panel extent overflows usize".to_string(),
        )),
    }
}

/// Copy a column-major panel between byte buffers. Leading dimensions
/// are in elements of `elem_size` bytes, matching the BLAS convention.
pub fn copy_2d(
    rows: usize,
    cols: usize,
    elem_size: usize,
    src: &[u8],
    lda: usize,
    dst: &mut [u8],
    ldb: usize,
) -> CholResult<()> {
    check_copy(rows, cols, elem_size, lda, src.len(), ldb, dst.len())?;
    let row_bytes = rows * elem_size;
    for j in 0..cols {
        let s = j * lda * elem_size;
        let d = j * ldb * elem_size;
        dst[d..d + row_bytes].copy_from_slice(&src[s..s + row_bytes]);
    }
    Ok(())
}

/// Typed counterpart of [`copy_2d`] for scalar slices.
pub fn copy_2d_typed<T: Scalar>(
    rows: usize,
    cols: usize,
    src: &[T],
    lda: usize,
    dst: &mut [T],
    ldb: usize,
) -> CholResult<()> {
    check_copy(
        rows,
        cols,
        T::elem_size(),
        lda,
        src.len() * T::elem_size(),
        ldb,
        dst.len() * T::elem_size(),
    )?;
    for j in 0..cols {
        let s = j * lda;
        let d = j * ldb;
        dst[d..d + rows].copy_from_slice(&src[s..s + rows]);
    }
    Ok(())
}

/// Stage a host panel into a device buffer on the calling thread.
pub fn copy_2d_to_device<T: Scalar>(
    rows: usize,
    cols: usize,
    src: &[T],
    lda: usize,
    dst: &DeviceBuffer<T>,
    ldb: usize,
) -> CholResult<()> {
    dst.with_mut(|data| copy_2d_typed(rows, cols, src, lda, data, ldb))?
}

/// Copy a device buffer panel back into host memory on the calling
/// thread.
pub fn copy_2d_to_host<T: Scalar>(
    rows: usize,
    cols: usize,
    src: &DeviceBuffer<T>,
    lda: usize,
    dst: &mut [T],
    ldb: usize,
) -> CholResult<()> {
    src.with(|data| copy_2d_typed(rows, cols, data, lda, dst, ldb))?
}

/// Raw host pointer that crosses into stream closures.
///
/// Wrapping a pointer is safe; every dereference site carries its own
/// contract.
#[derive(Clone, Copy)]
pub(crate) struct SendPtr<T>(pub *mut T);

unsafe impl<T> Send for SendPtr<T> {}
unsafe impl<T> Sync for SendPtr<T> {}

impl<T> SendPtr<T> {
    /// Read the pointer through the wrapper, so closures capture the
    /// `Send` wrapper rather than the raw field.
    fn get(self) -> *mut T {
        self.0
    }
}

/// Enqueue a host-to-device panel copy on `stream` and return the event
/// marking its completion.
///
/// # Safety
///
/// `src` must point to at least `(cols - 1) * lda + rows` elements that
/// stay valid and are not written by anyone else until the returned
/// event completes.
pub unsafe fn copy_2d_to_device_async<T: Scalar>(
    rows: usize,
    cols: usize,
    src: *const T,
    lda: usize,
    dst: Arc<DeviceBuffer<T>>,
    ldb: usize,
    stream: &DeviceStream,
) -> CholResult<CompletionEvent> {
    check_copy(
        rows,
        cols,
        T::elem_size(),
        lda,
        ((cols - 1) * lda + rows) * T::elem_size(),
        ldb,
        dst.size_bytes(),
    )?;
    let src = SendPtr(src as *mut T);
    stream.submit("h2d", move || {
        let src_slice = unsafe { std::slice::from_raw_parts(src.get(), (cols - 1) * lda + rows) };
        copy_2d_to_device(rows, cols, src_slice, lda, &dst, ldb)
    });
    Ok(stream.record())
}

/// Enqueue a device-to-host panel copy on `stream` and return the event
/// marking its completion.
///
/// # Safety
///
/// `dst` must point to at least `(cols - 1) * ldb + rows` elements that
/// stay valid, with no other reader or writer touching the panel until
/// the returned event completes.
pub unsafe fn copy_2d_to_host_async<T: Scalar>(
    rows: usize,
    cols: usize,
    src: Arc<DeviceBuffer<T>>,
    lda: usize,
    dst: *mut T,
    ldb: usize,
    stream: &DeviceStream,
) -> CholResult<CompletionEvent> {
    check_copy(
        rows,
        cols,
        T::elem_size(),
        lda,
        src.size_bytes(),
        ldb,
        ((cols - 1) * ldb + rows) * T::elem_size(),
    )?;
    let dst = SendPtr(dst);
    stream.submit("d2h", move || {
        let dst_slice =
            unsafe { std::slice::from_raw_parts_mut(dst.get(), (cols - 1) * ldb + rows) };
        copy_2d_to_host(rows, cols, &src, lda, dst_slice, ldb)
    });
    Ok(stream.record())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DeviceId;

    #[test]
    fn copies_submatrix_between_strides() {
        // 4x3 source with lda 4, copy the top 2x3 panel into a 2x3
        // destination with ldb 2.
        let src: Vec<f64> = (0..12).map(|v| v as f64).collect();
        let mut dst = vec![0.0f64; 6];
        copy_2d_typed(2, 3, &src, 4, &mut dst, 2).unwrap();
        assert_eq!(dst, vec![0.0, 1.0, 4.0, 5.0, 8.0, 9.0]);
    }

    #[test]
    fn byte_level_copy_matches_typed() {
        let src: Vec<f32> = (0..8).map(|v| v as f32).collect();
        let mut via_bytes = vec![0.0f32; 6];
        let mut via_typed = vec![0.0f32; 6];
        let src_bytes: Vec<u8> = src.iter().flat_map(|v| v.to_ne_bytes()).collect();
        {
            let dst_bytes: &mut [u8] = unsafe {
                std::slice::from_raw_parts_mut(via_bytes.as_mut_ptr() as *mut u8, 6 * 4)
            };
            copy_2d(3, 2, 4, &src_bytes, 4, dst_bytes, 3).unwrap();
        }
        copy_2d_typed(3, 2, &src, 4, &mut via_typed, 3).unwrap();
        assert_eq!(via_bytes, via_typed);
    }

    #[test]
    fn rejects_degenerate_and_undersized_panels() {
        let src = vec![0u8; 16];
        let mut dst = vec![0u8; 16];
        assert!(copy_2d(0, 2, 4, &src, 2, &mut dst, 2).is_err());
        assert!(copy_2d(2, 0, 4, &src, 2, &mut dst, 2).is_err());
        assert!(copy_2d(4, 1, 4, &src, 2, &mut dst, 4).is_err());
        assert!(copy_2d(2, 4, 4, &src, 2, &mut dst, 2).is_err());
    }

    #[test]
    fn device_round_trip_preserves_panel() {
        let host: Vec<f64> = (0..20).map(|v| v as f64 * 1.5).collect();
        let buf = DeviceBuffer::host(15);
        copy_2d_to_device(5, 3, &host, 5, &buf, 5).unwrap();
        let mut back = vec![0.0f64; 20];
        copy_2d_to_host(5, 3, &buf, 5, &mut back[..15], 5).unwrap();
        assert_eq!(&back[..15], &host[..15]);
    }

    #[test]
    fn async_round_trip_through_stream() {
        let stream = DeviceStream::new(DeviceId(0));
        let mut host: Vec<f64> = (0..9).map(|v| v as f64).collect();
        let buf = Arc::new(DeviceBuffer::host(9));

        let up = unsafe {
            copy_2d_to_device_async(3, 3, host.as_ptr(), 3, Arc::clone(&buf), 3, &stream)
        }
        .unwrap();
        up.wait();

        host.iter_mut().for_each(|v| *v = -1.0);
        let down =
            unsafe { copy_2d_to_host_async(3, 3, buf, 3, host.as_mut_ptr(), 3, &stream) }.unwrap();
        down.wait();
        stream.drain().unwrap();
        assert_eq!(host, (0..9).map(|v| v as f64).collect::<Vec<_>>());
    }
}
