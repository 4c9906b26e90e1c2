//! HIP runtime FFI bindings.
//!
//! Declarations are bound to the ROCm HIP API and reached through the
//! safe wrappers in the parent module. The dead_code allowance is
//! needed because FFI symbols appear unused to the compiler (they are
//! only called through unsafe blocks).

pub const HIP_SUCCESS: i32 = 0;

#[link(name = "amdhip64")]
#[allow(dead_code)]
extern "C" {
    pub fn hipGetDeviceCount(count: *mut i32) -> i32;
    pub fn hipSetDevice(deviceId: i32) -> i32;
    pub fn hipGetErrorString(error: i32) -> *const i8;
    pub fn hipMemGetInfo(free: *mut usize, total: *mut usize) -> i32;
}
