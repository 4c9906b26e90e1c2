//! Out-of-core blocked Cholesky factorization across multiple devices.
//!
//! The matrix stays in host memory; devices hold only the tiles they are
//! currently working on, bounded by a per-device byte budget. The
//! factorization runs the right-looking blocked algorithm over a
//! validated [`BlockPlan`] that assigns each block row to a device, with
//! per-device command streams and completion events ordering every
//! cross-device data movement.
//!
//! [`scheduler::factor_in_place`] is the front door: it picks the
//! in-core path when the matrix fits a single device's budget and the
//! out-of-core path otherwise. [`scheduler::par_potrf`] runs an explicit
//! plan. The triangular helpers in [`ops::triangular`] and the strided
//! transfer utility in [`transfer`] are exposed for callers that post-
//! process the factor.
//!
//! Tile compute runs on host worker threads on every backend. The
//! `rocm` feature adds HIP device discovery and per-worker device
//! binding; without it, registering a raw accelerator solver handle
//! fails with [`CholForgeError::UnsupportedDevice`].

pub mod engine;
pub mod error;
pub mod logging;
pub mod matrix;
pub mod ops;
pub mod options;
pub mod plan;
pub mod registry;
pub mod scalar;
pub mod scheduler;
pub mod transfer;

#[cfg(feature = "rocm")]
pub mod hip;

pub use error::{CholForgeError, CholResult, ErrorCategory};
pub use matrix::MatrixMut;
pub use options::CholeskyOptions;
pub use plan::{BlockAlloc, BlockPlan};
pub use registry::{DeviceId, DeviceInfo, DeviceRegistry, SolverHandle};
pub use scalar::Scalar;
pub use scheduler::{factor_in_place, par_potrf};
