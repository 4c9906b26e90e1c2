//! Device registry: per-device capacity and solver execution context.
//!
//! The registry is caller-owned input. Solver handles cross the boundary
//! as opaque capability tokens: the core never dereferences them, it only
//! validates them on entry and hands them to the backend that understands
//! them. A raw (native library) handle requires the accelerator backend
//! to be compiled in; the bundled native execution context is always
//! available and is what the emulation engine runs on.

use std::collections::HashSet;
use std::ffi::c_void;

use crate::error::{CholForgeError, CholResult};
use crate::plan::BlockPlan;

/// Identifier of one participating accelerator device.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct DeviceId(pub i32);

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "dev{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleRepr {
    /// Bundled native execution context (host emulation engine).
    Native,
    /// Foreign solver library handle (e.g. hipsolver), held as an opaque
    /// pointer-sized token.
    Raw(usize),
}

/// Opaque capability token for a device's solver execution context.
///
/// Validated at the boundary, never dereferenced by core logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolverHandle(HandleRepr);

impl SolverHandle {
    /// The bundled native execution context.
    pub fn native() -> Self {
        SolverHandle(HandleRepr::Native)
    }

    /// Wrap a foreign solver-library handle.
    ///
    /// Fails with `InvalidArgument` when the pointer is null; the pointer
    /// is otherwise taken on faith, exactly like the native library would.
    pub fn from_raw(ptr: *mut c_void) -> CholResult<Self> {
        if ptr.is_null() {
            return Err(CholForgeError::InvalidArgument(
                "solver handle is null".into(),
            ));
        }
        Ok(SolverHandle(HandleRepr::Raw(ptr as usize)))
    }

    /// Whether this token refers to a foreign solver library.
    pub fn is_raw(&self) -> bool {
        matches!(self.0, HandleRepr::Raw(_))
    }
}

/// One entry per participating accelerator.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub device_id: DeviceId,
    /// Reported free memory in bytes; the scheduler budgets against this.
    pub free_memory: usize,
    /// Solver execution context bound to this device.
    pub solver: SolverHandle,
}

impl DeviceInfo {
    pub fn new(device_id: DeviceId, free_memory: usize, solver: SolverHandle) -> Self {
        DeviceInfo {
            device_id,
            free_memory,
            solver,
        }
    }

    /// Native-context device, used by the emulation engine and in tests.
    pub fn native(device_id: i32, free_memory: usize) -> Self {
        DeviceInfo::new(DeviceId(device_id), free_memory, SolverHandle::native())
    }
}

/// Validated collection of participating devices.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    devices: Vec<DeviceInfo>,
}

impl DeviceRegistry {
    /// Build a registry, rejecting duplicate device ids and, before any
    /// other check, raw solver handles when the accelerator backend is
    /// not compiled in.
    pub fn new(devices: Vec<DeviceInfo>) -> CholResult<Self> {
        if !cfg!(feature = "rocm") && devices.iter().any(|d| d.solver.is_raw()) {
            return Err(CholForgeError::UnsupportedDevice);
        }
        if devices.is_empty() {
            return Err(CholForgeError::InvalidArgument(
                "device registry is empty".into(),
            ));
        }
        let mut seen = HashSet::new();
        for dev in &devices {
            if !seen.insert(dev.device_id) {
                return Err(CholForgeError::InvalidArgument(format!(
                    "duplicate device id {}",
                    dev.device_id
                )));
            }
        }
        Ok(DeviceRegistry { devices })
    }

    pub fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, id: DeviceId) -> Option<&DeviceInfo> {
        self.devices.iter().find(|d| d.device_id == id)
    }

    /// Resolve a device referenced by a block plan.
    pub fn resolve(&self, id: DeviceId) -> CholResult<&DeviceInfo> {
        self.get(id).ok_or_else(|| {
            CholForgeError::InvalidArgument(format!("device id {id} not present in registry"))
        })
    }

    /// Check that every device id referenced by `plan` has a registry
    /// entry. The two id spaces must form consistent keys.
    pub fn validate_plan(&self, plan: &BlockPlan) -> CholResult<()> {
        for block in plan.blocks() {
            self.resolve(block.device_id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::BlockPlan;

    #[test]
    fn null_raw_handle_is_invalid() {
        assert!(matches!(
            SolverHandle::from_raw(std::ptr::null_mut()),
            Err(CholForgeError::InvalidArgument(_))
        ));
    }

    #[cfg(not(feature = "rocm"))]
    #[test]
    fn raw_handle_requires_backend() {
        let handle = SolverHandle::from_raw(0x1000 as *mut std::ffi::c_void).unwrap();
        let err = DeviceRegistry::new(vec![DeviceInfo::new(DeviceId(0), 1 << 30, handle)])
            .unwrap_err();
        assert!(matches!(err, CholForgeError::UnsupportedDevice));
    }

    #[test]
    fn duplicate_ids_rejected() {
        let devs = vec![
            DeviceInfo::native(0, 1 << 30),
            DeviceInfo::native(0, 1 << 30),
        ];
        assert!(matches!(
            DeviceRegistry::new(devs),
            Err(CholForgeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn empty_registry_rejected() {
        assert!(DeviceRegistry::new(vec![]).is_err());
    }

    #[test]
    fn plan_referencing_unknown_device_rejected() {
        let registry = DeviceRegistry::new(vec![DeviceInfo::native(0, 1 << 30)]).unwrap();
        let plan = BlockPlan::round_robin(8, 2, 1, 8).unwrap();
        // Plan spreads blocks over device ids 0 and 1; id 1 is missing.
        assert!(registry.validate_plan(&plan).is_err());
    }

    #[test]
    fn resolve_finds_devices() {
        let registry = DeviceRegistry::new(vec![
            DeviceInfo::native(0, 1 << 30),
            DeviceInfo::native(1, 2 << 30),
        ])
        .unwrap();
        assert_eq!(registry.resolve(DeviceId(1)).unwrap().free_memory, 2 << 30);
        assert!(registry.resolve(DeviceId(7)).is_err());
    }
}
