//! Device-resident tile storage.
//!
//! Buffers live in host memory and are executed against by the stream
//! worker threads; every buffer belongs to exactly one device and all
//! access to it is queued on that device's stream.

use std::sync::Mutex;

use crate::error::CholResult;
use crate::scalar::Scalar;

/// A fixed-size buffer owned by one device.
#[derive(Debug)]
pub struct DeviceBuffer<T: Scalar> {
    data: Mutex<Vec<T>>,
    len: usize,
}

impl<T: Scalar> DeviceBuffer<T> {
    /// Allocate a zero-initialized buffer of `len` elements.
    pub fn host(len: usize) -> Self {
        DeviceBuffer {
            data: Mutex::new(vec![T::ZERO; len]),
            len,
        }
    }

    /// Number of elements the buffer holds.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size of the buffer in bytes.
    pub fn size_bytes(&self) -> usize {
        self.len * T::elem_size()
    }

    /// Run `f` over the buffer contents.
    pub fn with<R>(&self, f: impl FnOnce(&[T]) -> R) -> CholResult<R> {
        let guard = self.data.lock()?;
        Ok(f(&guard))
    }

    /// Run `f` over the buffer contents mutably.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut [T]) -> R) -> CholResult<R> {
        let mut guard = self.data.lock()?;
        Ok(f(&mut guard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_buffer_round_trip() {
        let buf: DeviceBuffer<f64> = DeviceBuffer::host(8);
        assert_eq!(buf.len(), 8);
        assert_eq!(buf.size_bytes(), 64);
        buf.with_mut(|data| {
            for (i, v) in data.iter_mut().enumerate() {
                *v = i as f64;
            }
        })
        .unwrap();
        let sum = buf.with(|data| data.iter().sum::<f64>()).unwrap();
        assert_eq!(sum, 28.0);
    }

    #[test]
    fn zero_initialized() {
        let buf: DeviceBuffer<f32> = DeviceBuffer::host(4);
        buf.with(|data| assert!(data.iter().all(|v| *v == 0.0)))
            .unwrap();
    }
}
