//! The accelerator calls the CUDA device API is built on.
//!
//! `CudaDriver` forwards these to the real driver library; `SimDriver`
//! emulates them in host memory.

use std::ffi::{c_int, c_void};

/// CUDA result type (CUresult).
pub type CUresult = c_int;

/// CUDA device ordinal (CUdevice).
pub type CUdevice = c_int;

/// Opaque CUDA types (represented as pointers).
pub type CUcontext = *mut c_void;
pub type CUdeviceptr = u64;
pub type CUstream = *mut c_void;
pub type CUevent = *mut c_void;

pub type DriverResult<T> = Result<T, CUresult>;

pub const CUDA_SUCCESS: CUresult = 0;
pub const CUDA_ERROR_INVALID_VALUE: CUresult = 1;
pub const CUDA_ERROR_OUT_OF_MEMORY: CUresult = 2;
pub const CUDA_ERROR_NOT_INITIALIZED: CUresult = 3;
pub const CUDA_ERROR_DEINITIALIZED: CUresult = 4;
pub const CUDA_ERROR_STUB_LIBRARY: CUresult = 34;
pub const CUDA_ERROR_NO_DEVICE: CUresult = 100;
pub const CUDA_ERROR_INVALID_DEVICE: CUresult = 101;
pub const CUDA_ERROR_INVALID_CONTEXT: CUresult = 201;
pub const CUDA_ERROR_INVALID_HANDLE: CUresult = 400;
pub const CUDA_ERROR_HOST_MEMORY_ALREADY_REGISTERED: CUresult = 712;
pub const CUDA_ERROR_HOST_MEMORY_NOT_REGISTERED: CUresult = 713;
pub const CUDA_ERROR_NOT_SUPPORTED: CUresult = 801;
pub const CUDA_ERROR_SYSTEM_DRIVER_MISMATCH: CUresult = 803;
pub const CUDA_ERROR_COMPAT_NOT_SUPPORTED_ON_DEVICE: CUresult = 804;

// CUdevice_attribute
pub const CU_DEVICE_ATTRIBUTE_MAX_THREADS_PER_BLOCK: i32 = 1;
pub const CU_DEVICE_ATTRIBUTE_MAX_BLOCK_DIM_X: i32 = 2;
pub const CU_DEVICE_ATTRIBUTE_MAX_BLOCK_DIM_Y: i32 = 3;
pub const CU_DEVICE_ATTRIBUTE_MAX_BLOCK_DIM_Z: i32 = 4;
pub const CU_DEVICE_ATTRIBUTE_MAX_SHARED_MEMORY_PER_BLOCK: i32 = 8;
pub const CU_DEVICE_ATTRIBUTE_WARP_SIZE: i32 = 10;
pub const CU_DEVICE_ATTRIBUTE_CLOCK_RATE: i32 = 13;
pub const CU_DEVICE_ATTRIBUTE_MULTIPROCESSOR_COUNT: i32 = 16;
pub const CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR: i32 = 75;
pub const CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR: i32 = 76;

// CUpointer_attribute / CUmemorytype
pub const CU_POINTER_ATTRIBUTE_MEMORY_TYPE: i32 = 2;
pub const CU_MEMORYTYPE_HOST: u32 = 1;
pub const CU_MEMORYTYPE_DEVICE: u32 = 2;

pub const CU_STREAM_NON_BLOCKING: u32 = 0x1;
pub const CU_EVENT_DISABLE_TIMING: u32 = 0x2;
pub const CU_MEMHOSTREGISTER_DEFAULT: u32 = 0x0;

/// Driver entry points used by the device API.
///
/// Device selection is per calling thread, like the driver's current
/// context. Stream-ordered copies only enqueue work.
pub trait Driver: Send + Sync {
    fn device_get_count(&self) -> DriverResult<i32>;

    fn device_get_attribute(&self, attrib: i32, device: CUdevice) -> DriverResult<i32>;

    fn device_get_name(&self, device: CUdevice) -> DriverResult<String>;

    /// Make `device` current on the calling thread.
    fn set_current_device(&self, device: CUdevice) -> DriverResult<()>;

    fn mem_alloc(&self, byte_size: usize) -> DriverResult<CUdeviceptr>;

    fn mem_free(&self, dptr: CUdeviceptr) -> DriverResult<()>;

    /// # Safety
    /// `src` must be valid for `byte_count` reads until the copy completes.
    unsafe fn memcpy_htod_async(
        &self,
        dst: CUdeviceptr,
        src: *const c_void,
        byte_count: usize,
        stream: CUstream,
    ) -> DriverResult<()>;

    /// # Safety
    /// `dst` must be valid for `byte_count` writes until the copy completes.
    unsafe fn memcpy_dtoh_async(
        &self,
        dst: *mut c_void,
        src: CUdeviceptr,
        byte_count: usize,
        stream: CUstream,
    ) -> DriverResult<()>;

    /// # Safety
    /// Both ranges must be live device memory of at least `byte_count` bytes.
    unsafe fn memcpy_dtod_async(
        &self,
        dst: CUdeviceptr,
        src: CUdeviceptr,
        byte_count: usize,
        stream: CUstream,
    ) -> DriverResult<()>;

    /// # Safety
    /// `dst` must live on `dst_device` and `src` on `src_device`, both valid
    /// for `byte_count` bytes.
    unsafe fn memcpy_peer_async(
        &self,
        dst: CUdeviceptr,
        dst_device: CUdevice,
        src: CUdeviceptr,
        src_device: CUdevice,
        byte_count: usize,
        stream: CUstream,
    ) -> DriverResult<()>;

    fn stream_create(&self, flags: u32) -> DriverResult<CUstream>;

    fn stream_destroy(&self, stream: CUstream) -> DriverResult<()>;

    fn stream_synchronize(&self, stream: CUstream) -> DriverResult<()>;

    fn stream_wait_event(&self, stream: CUstream, event: CUevent, flags: u32) -> DriverResult<()>;

    fn event_create(&self, flags: u32) -> DriverResult<CUevent>;

    fn event_record(&self, event: CUevent, stream: CUstream) -> DriverResult<()>;

    fn event_destroy(&self, event: CUevent) -> DriverResult<()>;

    /// # Safety
    /// `ptr` must be `byte_size` bytes of live host memory.
    unsafe fn mem_host_register(&self, ptr: *mut c_void, byte_size: usize, flags: u32)
        -> DriverResult<()>;

    /// # Safety
    /// `ptr` must have been registered with `mem_host_register`.
    unsafe fn mem_host_unregister(&self, ptr: *mut c_void) -> DriverResult<()>;

    /// `CU_POINTER_ATTRIBUTE_MEMORY_TYPE` of `ptr`.
    fn pointer_memory_type(&self, ptr: CUdeviceptr) -> DriverResult<u32>;

    /// Reset any sticky per-thread error state left by a failed query.
    fn clear_last_error(&self) {}

    fn error_string(&self, result: CUresult) -> String {
        cuda_error_name(result).to_string()
    }
}

/// Convert a CUresult error code to a human-readable string.
pub fn cuda_error_name(result: CUresult) -> &'static str {
    match result {
        0 => "CUDA_SUCCESS",
        1 => "CUDA_ERROR_INVALID_VALUE",
        2 => "CUDA_ERROR_OUT_OF_MEMORY",
        3 => "CUDA_ERROR_NOT_INITIALIZED",
        4 => "CUDA_ERROR_DEINITIALIZED",
        34 => "CUDA_ERROR_STUB_LIBRARY",
        100 => "CUDA_ERROR_NO_DEVICE",
        101 => "CUDA_ERROR_INVALID_DEVICE",
        200 => "CUDA_ERROR_INVALID_IMAGE",
        201 => "CUDA_ERROR_INVALID_CONTEXT",
        300 => "CUDA_ERROR_INVALID_SOURCE",
        400 => "CUDA_ERROR_INVALID_HANDLE",
        500 => "CUDA_ERROR_NOT_FOUND",
        600 => "CUDA_ERROR_NOT_READY",
        700 => "CUDA_ERROR_ILLEGAL_ADDRESS",
        704 => "CUDA_ERROR_PEER_ACCESS_ALREADY_ENABLED",
        705 => "CUDA_ERROR_PEER_ACCESS_NOT_ENABLED",
        712 => "CUDA_ERROR_HOST_MEMORY_ALREADY_REGISTERED",
        713 => "CUDA_ERROR_HOST_MEMORY_NOT_REGISTERED",
        719 => "CUDA_ERROR_LAUNCH_FAILED",
        801 => "CUDA_ERROR_NOT_SUPPORTED",
        803 => "CUDA_ERROR_SYSTEM_DRIVER_MISMATCH",
        804 => "CUDA_ERROR_COMPAT_NOT_SUPPORTED_ON_DEVICE",
        _ => "CUDA_ERROR_UNKNOWN",
    }
}

/// Build the device-API error for a failed driver call.
pub(crate) fn driver_error(
    driver: &dyn Driver,
    op: &'static str,
    code: CUresult,
) -> tensordev_core::DeviceError {
    tensordev_core::DeviceError::Driver {
        op,
        code,
        message: driver.error_string(code),
    }
}

/// Attach operation context to a raw driver result.
pub(crate) trait DriverResultExt<T> {
    fn op(self, driver: &dyn Driver, op: &'static str) -> tensordev_core::Result<T>;
}

impl<T> DriverResultExt<T> for DriverResult<T> {
    fn op(self, driver: &dyn Driver, op: &'static str) -> tensordev_core::Result<T> {
        self.map_err(|code| driver_error(driver, op, code))
    }
}
