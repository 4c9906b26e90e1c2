//! ROCm device discovery and binding, compiled in with the `rocm`
//! feature.
//!
//! The engine executes tiles in host memory on its own worker threads;
//! this module contributes the runtime queries the rest of the crate
//! needs when those workers run next to real accelerators: enumerating
//! devices, pinning a worker thread to its device, and reading free
//! memory for the scheduler's budgets.

pub mod ffi;

use crate::error::{CholForgeError, CholResult};

fn hip_err(op: &str, code: i32) -> CholForgeError {
    let msg = unsafe {
        let s = ffi::hipGetErrorString(code);
        if s.is_null() {
            format!("{op} failed with code {code}")
        } else {
            format!("{op}: {}", std::ffi::CStr::from_ptr(s).to_string_lossy())
        }
    };
    CholForgeError::DeviceError(msg)
}

/// Whether the HIP runtime reports at least one usable device.
pub fn is_available() -> bool {
    let mut count = 0i32;
    let result = unsafe { ffi::hipGetDeviceCount(&mut count) };
    result == ffi::HIP_SUCCESS && count > 0
}

/// Number of visible HIP devices.
pub fn device_count() -> CholResult<usize> {
    let mut count = 0i32;
    let result = unsafe { ffi::hipGetDeviceCount(&mut count) };
    if result != ffi::HIP_SUCCESS {
        return Err(hip_err("hipGetDeviceCount", result));
    }
    Ok(count as usize)
}

/// Bind the calling thread to `device_id`.
pub fn set_device(device_id: i32) -> CholResult<()> {
    let result = unsafe { ffi::hipSetDevice(device_id) };
    if result != ffi::HIP_SUCCESS {
        return Err(hip_err("hipSetDevice", result));
    }
    Ok(())
}

/// Free memory in bytes on the current device.
pub fn free_memory() -> CholResult<usize> {
    let mut free = 0usize;
    let mut total = 0usize;
    let result = unsafe { ffi::hipMemGetInfo(&mut free, &mut total) };
    if result != ffi::HIP_SUCCESS {
        return Err(hip_err("hipMemGetInfo", result));
    }
    Ok(free)
}
