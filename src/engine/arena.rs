//! Per-device memory budget accounting.
//!
//! Tiles are allocated against a fixed byte budget derived from the
//! device's reported free memory. The arena tracks reservations only;
//! the bytes themselves live in [`DeviceBuffer`]s. Releases may be
//! deferred onto the owning stream so the budget never runs ahead of
//! commands still using the freed tile.
//!
//! [`DeviceBuffer`]: crate::engine::buffer::DeviceBuffer

use std::sync::Mutex;

use crate::error::{CholForgeError, CholResult};
use crate::registry::DeviceId;

/// Allocation granularity in bytes.
const ARENA_ALIGN: usize = 256;

#[derive(Debug)]
struct ArenaState {
    used: usize,
    peak: usize,
}

/// Byte-budget ledger for one device.
#[derive(Debug)]
pub struct DeviceArena {
    device_id: DeviceId,
    capacity: usize,
    state: Mutex<ArenaState>,
}

impl DeviceArena {
    pub fn new(device_id: DeviceId, capacity: usize) -> Self {
        tracing::debug!(device = %device_id, capacity, "creating device arena");
        DeviceArena {
            device_id,
            capacity,
            state: Mutex::new(ArenaState { used: 0, peak: 0 }),
        }
    }

    fn aligned(bytes: usize) -> usize {
        bytes.div_ceil(ARENA_ALIGN) * ARENA_ALIGN
    }

    /// Reserve `bytes` from the budget, failing with `OutOfMemory` when
    /// the aligned request does not fit.
    pub fn reserve(&self, bytes: usize) -> CholResult<()> {
        let request = Self::aligned(bytes);
        let mut state = self.state.lock()?;
        let available = self.capacity - state.used;
        if request > available {
            return Err(CholForgeError::OutOfMemory {
                device_id: self.device_id.0,
                requested: request,
                available,
            });
        }
        state.used += request;
        if state.used > state.peak {
            state.peak = state.used;
        }
        Ok(())
    }

    /// Return `bytes` to the budget. Over-release is a logic error and
    /// saturates to zero rather than corrupting the ledger.
    pub fn release(&self, bytes: usize) {
        let request = Self::aligned(bytes);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if request > state.used {
            tracing::warn!(
                device = %self.device_id,
                release = request,
                used = state.used,
                "arena release exceeds reservations"
            );
            state.used = 0;
        } else {
            state.used -= request;
        }
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn used(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).used
    }

    pub fn available(&self) -> usize {
        self.capacity - self.used()
    }

    /// High-water mark of concurrent reservations.
    pub fn peak(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).peak
    }

    /// Whether a request of `bytes` would currently fit.
    pub fn would_fit(&self, bytes: usize) -> bool {
        Self::aligned(bytes) <= self.available()
    }
}
