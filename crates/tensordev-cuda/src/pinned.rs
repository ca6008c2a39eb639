//! Host-memory registration and the pinned-pointer query.

use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, Ordering};

use tensordev_core::Result;
use tracing::{debug, warn};

use crate::driver::*;

/// Driver codes meaning there is no usable accelerator environment in this
/// process, as opposed to a bad pointer.
const ENVIRONMENT_ABSENT: [CUresult; 8] = [
    CUDA_ERROR_NOT_INITIALIZED,
    CUDA_ERROR_DEINITIALIZED,
    CUDA_ERROR_NO_DEVICE,
    CUDA_ERROR_INVALID_DEVICE,
    CUDA_ERROR_INVALID_CONTEXT,
    CUDA_ERROR_STUB_LIBRARY,
    CUDA_ERROR_SYSTEM_DRIVER_MISMATCH,
    CUDA_ERROR_COMPAT_NOT_SUPPORTED_ON_DEVICE,
];

pub fn is_environment_absent(code: CUresult) -> bool {
    ENVIRONMENT_ABSENT.contains(&code)
}

/// Tracks whether pinned-memory queries can reach the driver at all.
///
/// Once a query reports that the environment is missing the tracker stops
/// asking; the flag never goes back up.
#[derive(Debug)]
pub struct PinnedTracker {
    available: AtomicBool,
}

impl PinnedTracker {
    pub fn new(available: bool) -> Self {
        Self {
            available: AtomicBool::new(available),
        }
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// # Safety
    /// `ptr` must be `nbytes` of live host memory.
    pub unsafe fn pin(&self, driver: &dyn Driver, ptr: *mut c_void, nbytes: usize) -> Result<()> {
        let res = unsafe { driver.mem_host_register(ptr, nbytes, CU_MEMHOSTREGISTER_DEFAULT) };
        res.op(driver, "cuMemHostRegister")?;
        debug!("pinned {} bytes at {:p}", nbytes, ptr);
        Ok(())
    }

    /// # Safety
    /// `ptr` must have been registered through [`PinnedTracker::pin`].
    pub unsafe fn unpin(&self, driver: &dyn Driver, ptr: *mut c_void) -> Result<()> {
        let res = unsafe { driver.mem_host_unregister(ptr) };
        res.op(driver, "cuMemHostUnregister")?;
        debug!("unpinned {:p}", ptr);
        Ok(())
    }

    pub fn is_pinned(&self, driver: &dyn Driver, ptr: *const c_void) -> Result<bool> {
        if !self.is_available() {
            return Ok(false);
        }
        match driver.pointer_memory_type(ptr as CUdeviceptr) {
            Ok(memory_type) => Ok(memory_type == CU_MEMORYTYPE_HOST),
            Err(CUDA_ERROR_INVALID_VALUE) => {
                driver.clear_last_error();
                Ok(false)
            }
            Err(code) if is_environment_absent(code) => {
                if self.available.swap(false, Ordering::AcqRel) {
                    warn!(
                        "pinned memory queries disabled, no usable accelerator context: {}",
                        driver.error_string(code)
                    );
                }
                driver.clear_last_error();
                Ok(false)
            }
            Err(code) => Err(driver_error(driver, "cuPointerGetAttribute", code)),
        }
    }
}
