//! Dynamic loading of the real CUDA driver library.
//!
//! Uses `libloading` to load `nvcuda.dll` (Windows) or `libcuda.so.1` (Linux)
//! and implements [`Driver`] on top of the raw CUDA driver API functions.

use std::ffi::{c_char, c_int, c_uint, c_void, CStr};
use std::sync::Arc;

use dashmap::DashMap;
use libloading::{Library, Symbol};
use tracing::{debug, info, warn};

use crate::driver::*;

/// Function pointer type definitions for the CUDA driver API.
type FnCuInit = unsafe extern "C" fn(flags: c_uint) -> CUresult;
type FnCuDriverGetVersion = unsafe extern "C" fn(version: *mut c_int) -> CUresult;
type FnCuGetErrorString = unsafe extern "C" fn(error: CUresult, pstr: *mut *const c_char) -> CUresult;
type FnCuDeviceGetCount = unsafe extern "C" fn(count: *mut c_int) -> CUresult;
type FnCuDeviceGet = unsafe extern "C" fn(device: *mut CUdevice, ordinal: c_int) -> CUresult;
type FnCuDeviceGetName =
    unsafe extern "C" fn(name: *mut c_char, len: c_int, dev: CUdevice) -> CUresult;
type FnCuDeviceGetAttribute =
    unsafe extern "C" fn(pi: *mut c_int, attrib: c_int, dev: CUdevice) -> CUresult;

// Primary context
type FnCuDevicePrimaryCtxRetain = unsafe extern "C" fn(pctx: *mut CUcontext, dev: CUdevice) -> CUresult;
type FnCuDevicePrimaryCtxRelease = unsafe extern "C" fn(dev: CUdevice) -> CUresult;

// Context management
type FnCuCtxSetCurrent = unsafe extern "C" fn(ctx: CUcontext) -> CUresult;
type FnCuCtxGetCurrent = unsafe extern "C" fn(pctx: *mut CUcontext) -> CUresult;

// Memory management
type FnCuMemAlloc = unsafe extern "C" fn(dptr: *mut CUdeviceptr, bytesize: usize) -> CUresult;
type FnCuMemFree = unsafe extern "C" fn(dptr: CUdeviceptr) -> CUresult;
type FnCuMemcpyHtoDAsync = unsafe extern "C" fn(dst: CUdeviceptr, src: *const c_void, byte_count: usize, hstream: CUstream) -> CUresult;
type FnCuMemcpyDtoHAsync = unsafe extern "C" fn(dst: *mut c_void, src: CUdeviceptr, byte_count: usize, hstream: CUstream) -> CUresult;
type FnCuMemcpyDtoDAsync = unsafe extern "C" fn(dst: CUdeviceptr, src: CUdeviceptr, byte_count: usize, hstream: CUstream) -> CUresult;
type FnCuMemcpyPeerAsync = unsafe extern "C" fn(
    dst: CUdeviceptr,
    dst_ctx: CUcontext,
    src: CUdeviceptr,
    src_ctx: CUcontext,
    byte_count: usize,
    hstream: CUstream,
) -> CUresult;
type FnCuMemHostRegister = unsafe extern "C" fn(p: *mut c_void, bytesize: usize, flags: c_uint) -> CUresult;
type FnCuMemHostUnregister = unsafe extern "C" fn(p: *mut c_void) -> CUresult;

// Stream management
type FnCuStreamCreate = unsafe extern "C" fn(phstream: *mut CUstream, flags: c_uint) -> CUresult;
type FnCuStreamDestroy = unsafe extern "C" fn(hstream: CUstream) -> CUresult;
type FnCuStreamSynchronize = unsafe extern "C" fn(hstream: CUstream) -> CUresult;
type FnCuStreamWaitEvent = unsafe extern "C" fn(hstream: CUstream, hevent: CUevent, flags: c_uint) -> CUresult;

// Event management
type FnCuEventCreate = unsafe extern "C" fn(phevent: *mut CUevent, flags: c_uint) -> CUresult;
type FnCuEventDestroy = unsafe extern "C" fn(hevent: CUevent) -> CUresult;
type FnCuEventRecord = unsafe extern "C" fn(hevent: CUevent, hstream: CUstream) -> CUresult;

// Pointer queries
type FnCuPointerGetAttribute = unsafe extern "C" fn(data: *mut c_void, attribute: c_int, ptr: CUdeviceptr) -> CUresult;

/// Dynamically loaded CUDA driver library with function pointers.
pub struct CudaDriver {
    _lib: Library,
    // Initialization
    cu_init: FnCuInit,
    cu_driver_get_version: FnCuDriverGetVersion,
    cu_get_error_string: Option<FnCuGetErrorString>,
    // Device management
    cu_device_get_count: FnCuDeviceGetCount,
    cu_device_get: FnCuDeviceGet,
    cu_device_get_name: FnCuDeviceGetName,
    cu_device_get_attribute: FnCuDeviceGetAttribute,
    // Primary context
    cu_device_primary_ctx_retain: FnCuDevicePrimaryCtxRetain,
    cu_device_primary_ctx_release: FnCuDevicePrimaryCtxRelease,
    // Context management
    cu_ctx_set_current: FnCuCtxSetCurrent,
    cu_ctx_get_current: FnCuCtxGetCurrent,
    // Memory management
    cu_mem_alloc: FnCuMemAlloc,
    cu_mem_free: FnCuMemFree,
    cu_memcpy_htod_async: FnCuMemcpyHtoDAsync,
    cu_memcpy_dtoh_async: FnCuMemcpyDtoHAsync,
    cu_memcpy_dtod_async: FnCuMemcpyDtoDAsync,
    cu_memcpy_peer_async: FnCuMemcpyPeerAsync,
    cu_mem_host_register: FnCuMemHostRegister,
    cu_mem_host_unregister: FnCuMemHostUnregister,
    // Stream management
    cu_stream_create: FnCuStreamCreate,
    cu_stream_destroy: FnCuStreamDestroy,
    cu_stream_synchronize: FnCuStreamSynchronize,
    cu_stream_wait_event: FnCuStreamWaitEvent,
    // Event management
    cu_event_create: FnCuEventCreate,
    cu_event_destroy: FnCuEventDestroy,
    cu_event_record: FnCuEventRecord,
    // Pointer queries
    cu_pointer_get_attribute: FnCuPointerGetAttribute,
    /// Retained primary context per device ordinal (stored as address)
    primary_contexts: DashMap<CUdevice, usize>,
}

// SAFETY: The CUDA driver library handles are valid from any thread.
// The CUDA driver API itself handles thread safety via context management.
unsafe impl Send for CudaDriver {}
unsafe impl Sync for CudaDriver {}

impl CudaDriver {
    /// Load the CUDA driver library from the platform search list.
    pub fn load() -> Result<Arc<Self>, String> {
        let lib = Self::load_library()?;
        Self::resolve(lib)
    }

    /// Load the CUDA driver library from an explicit path.
    pub fn load_from(path: &str) -> Result<Arc<Self>, String> {
        let lib = unsafe { Library::new(path) }
            .map_err(|e| format!("failed to load CUDA driver library {}: {}", path, e))?;
        info!("loaded CUDA driver from: {}", path);
        Self::resolve(lib)
    }

    fn resolve(lib: Library) -> Result<Arc<Self>, String> {
        unsafe {
            let driver = Self {
                cu_init: Self::load_fn(&lib, "cuInit")?,
                cu_driver_get_version: Self::load_fn(&lib, "cuDriverGetVersion")?,
                cu_get_error_string: Self::load_fn_opt(&lib, "cuGetErrorString"),
                cu_device_get_count: Self::load_fn(&lib, "cuDeviceGetCount")?,
                cu_device_get: Self::load_fn(&lib, "cuDeviceGet")?,
                cu_device_get_name: Self::load_fn(&lib, "cuDeviceGetName")?,
                cu_device_get_attribute: Self::load_fn(&lib, "cuDeviceGetAttribute")?,
                cu_device_primary_ctx_retain: Self::load_fn(&lib, "cuDevicePrimaryCtxRetain")?,
                cu_device_primary_ctx_release: Self::load_fn(&lib, "cuDevicePrimaryCtxRelease_v2")
                    .or_else(|_| Self::load_fn(&lib, "cuDevicePrimaryCtxRelease"))?,
                cu_ctx_set_current: Self::load_fn(&lib, "cuCtxSetCurrent")?,
                cu_ctx_get_current: Self::load_fn(&lib, "cuCtxGetCurrent")?,
                cu_mem_alloc: Self::load_fn(&lib, "cuMemAlloc_v2")
                    .or_else(|_| Self::load_fn(&lib, "cuMemAlloc"))?,
                cu_mem_free: Self::load_fn(&lib, "cuMemFree_v2")
                    .or_else(|_| Self::load_fn(&lib, "cuMemFree"))?,
                cu_memcpy_htod_async: Self::load_fn(&lib, "cuMemcpyHtoDAsync_v2")
                    .or_else(|_| Self::load_fn(&lib, "cuMemcpyHtoDAsync"))?,
                cu_memcpy_dtoh_async: Self::load_fn(&lib, "cuMemcpyDtoHAsync_v2")
                    .or_else(|_| Self::load_fn(&lib, "cuMemcpyDtoHAsync"))?,
                cu_memcpy_dtod_async: Self::load_fn(&lib, "cuMemcpyDtoDAsync_v2")
                    .or_else(|_| Self::load_fn(&lib, "cuMemcpyDtoDAsync"))?,
                cu_memcpy_peer_async: Self::load_fn(&lib, "cuMemcpyPeerAsync")?,
                cu_mem_host_register: Self::load_fn(&lib, "cuMemHostRegister_v2")
                    .or_else(|_| Self::load_fn(&lib, "cuMemHostRegister"))?,
                cu_mem_host_unregister: Self::load_fn(&lib, "cuMemHostUnregister")?,
                cu_stream_create: Self::load_fn(&lib, "cuStreamCreate")?,
                cu_stream_destroy: Self::load_fn(&lib, "cuStreamDestroy_v2")
                    .or_else(|_| Self::load_fn(&lib, "cuStreamDestroy"))?,
                cu_stream_synchronize: Self::load_fn(&lib, "cuStreamSynchronize")?,
                cu_stream_wait_event: Self::load_fn(&lib, "cuStreamWaitEvent")?,
                cu_event_create: Self::load_fn(&lib, "cuEventCreate")?,
                cu_event_destroy: Self::load_fn(&lib, "cuEventDestroy_v2")
                    .or_else(|_| Self::load_fn(&lib, "cuEventDestroy"))?,
                cu_event_record: Self::load_fn(&lib, "cuEventRecord")?,
                cu_pointer_get_attribute: Self::load_fn(&lib, "cuPointerGetAttribute")?,
                primary_contexts: DashMap::new(),
                _lib: lib,
            };

            info!("CUDA driver loaded successfully");
            Ok(Arc::new(driver))
        }
    }

    fn load_library() -> Result<Library, String> {
        let lib_names = tensordev_common::platform::cuda_driver_library_names();
        if lib_names.is_empty() {
            return Err(format!(
                "no CUDA driver library known for platform {}",
                tensordev_common::platform::platform_name()
            ));
        }

        let mut last_err = String::new();
        for name in lib_names {
            match unsafe { Library::new(name) } {
                Ok(lib) => {
                    info!("loaded CUDA driver from: {}", name);
                    return Ok(lib);
                }
                Err(e) => {
                    last_err = format!("{}: {}", name, e);
                    debug!("failed to load {}: {}", name, e);
                }
            }
        }

        Err(format!("failed to load CUDA driver library: {}", last_err))
    }

    unsafe fn load_fn<F: Copy>(lib: &Library, name: &str) -> Result<F, String> {
        let sym: Symbol<F> = unsafe { lib.get(name.as_bytes()) }
            .map_err(|e| format!("failed to load {}: {}", name, e))?;
        Ok(*sym)
    }

    unsafe fn load_fn_opt<F: Copy>(lib: &Library, name: &str) -> Option<F> {
        let sym: Option<Symbol<F>> = unsafe { lib.get(name.as_bytes()) }.ok();
        sym.map(|s| *s)
    }

    // ── Initialization ────────────────────────────────────────────

    pub fn init(&self, flags: u32) -> CUresult {
        unsafe { (self.cu_init)(flags as c_uint) }
    }

    pub fn driver_get_version(&self) -> DriverResult<i32> {
        let mut version: c_int = 0;
        let res = unsafe { (self.cu_driver_get_version)(&mut version) };
        check(res).map(|_| version)
    }

    // ── Contexts ──────────────────────────────────────────────────

    /// The retained primary context of `device`, retaining it on first use.
    fn primary_context(&self, device: CUdevice) -> DriverResult<CUcontext> {
        if let Some(ctx) = self.primary_contexts.get(&device) {
            return Ok(*ctx as CUcontext);
        }
        let entry = self.primary_contexts.entry(device).or_try_insert_with(|| {
            let mut dev: CUdevice = 0;
            check(unsafe { (self.cu_device_get)(&mut dev, device) })?;
            let mut ctx: CUcontext = std::ptr::null_mut();
            check(unsafe { (self.cu_device_primary_ctx_retain)(&mut ctx, dev) })?;
            debug!("retained primary context {:p} for device {}", ctx, device);
            Ok::<usize, CUresult>(ctx as usize)
        })?;
        Ok(*entry as CUcontext)
    }

    fn current_context(&self) -> DriverResult<CUcontext> {
        let mut ctx: CUcontext = std::ptr::null_mut();
        check(unsafe { (self.cu_ctx_get_current)(&mut ctx) })?;
        Ok(ctx)
    }
}

impl Drop for CudaDriver {
    fn drop(&mut self) {
        for entry in self.primary_contexts.iter() {
            let res = unsafe { (self.cu_device_primary_ctx_release)(*entry.key()) };
            if res != CUDA_SUCCESS {
                warn!(
                    "releasing primary context of device {} failed: {}",
                    entry.key(),
                    cuda_error_name(res)
                );
            }
        }
    }
}

fn check(res: CUresult) -> DriverResult<()> {
    if res == CUDA_SUCCESS { Ok(()) } else { Err(res) }
}

impl Driver for CudaDriver {
    fn device_get_count(&self) -> DriverResult<i32> {
        let mut count: c_int = 0;
        check(unsafe { (self.cu_device_get_count)(&mut count) })?;
        Ok(count)
    }

    fn device_get_attribute(&self, attrib: i32, device: CUdevice) -> DriverResult<i32> {
        let mut dev: CUdevice = 0;
        check(unsafe { (self.cu_device_get)(&mut dev, device) })?;
        let mut value: c_int = 0;
        check(unsafe { (self.cu_device_get_attribute)(&mut value, attrib, dev) })?;
        Ok(value)
    }

    fn device_get_name(&self, device: CUdevice) -> DriverResult<String> {
        let mut dev: CUdevice = 0;
        check(unsafe { (self.cu_device_get)(&mut dev, device) })?;
        let mut buf = [0u8; 256];
        check(unsafe {
            (self.cu_device_get_name)(buf.as_mut_ptr() as *mut c_char, buf.len() as c_int, dev)
        })?;
        let name = unsafe { CStr::from_ptr(buf.as_ptr() as *const c_char) };
        Ok(name.to_string_lossy().into_owned())
    }

    fn set_current_device(&self, device: CUdevice) -> DriverResult<()> {
        let ctx = self.primary_context(device)?;
        check(unsafe { (self.cu_ctx_set_current)(ctx) })
    }

    fn mem_alloc(&self, byte_size: usize) -> DriverResult<CUdeviceptr> {
        let mut dptr: CUdeviceptr = 0;
        check(unsafe { (self.cu_mem_alloc)(&mut dptr, byte_size) })?;
        Ok(dptr)
    }

    fn mem_free(&self, dptr: CUdeviceptr) -> DriverResult<()> {
        check(unsafe { (self.cu_mem_free)(dptr) })
    }

    unsafe fn memcpy_htod_async(
        &self,
        dst: CUdeviceptr,
        src: *const c_void,
        byte_count: usize,
        stream: CUstream,
    ) -> DriverResult<()> {
        check(unsafe { (self.cu_memcpy_htod_async)(dst, src, byte_count, stream) })
    }

    unsafe fn memcpy_dtoh_async(
        &self,
        dst: *mut c_void,
        src: CUdeviceptr,
        byte_count: usize,
        stream: CUstream,
    ) -> DriverResult<()> {
        check(unsafe { (self.cu_memcpy_dtoh_async)(dst, src, byte_count, stream) })
    }

    unsafe fn memcpy_dtod_async(
        &self,
        dst: CUdeviceptr,
        src: CUdeviceptr,
        byte_count: usize,
        stream: CUstream,
    ) -> DriverResult<()> {
        check(unsafe { (self.cu_memcpy_dtod_async)(dst, src, byte_count, stream) })
    }

    unsafe fn memcpy_peer_async(
        &self,
        dst: CUdeviceptr,
        dst_device: CUdevice,
        src: CUdeviceptr,
        src_device: CUdevice,
        byte_count: usize,
        stream: CUstream,
    ) -> DriverResult<()> {
        let dst_ctx = self.primary_context(dst_device)?;
        let src_ctx = self.primary_context(src_device)?;
        check(unsafe {
            (self.cu_memcpy_peer_async)(dst, dst_ctx, src, src_ctx, byte_count, stream)
        })
    }

    fn stream_create(&self, flags: u32) -> DriverResult<CUstream> {
        let mut stream: CUstream = std::ptr::null_mut();
        check(unsafe { (self.cu_stream_create)(&mut stream, flags as c_uint) })?;
        Ok(stream)
    }

    fn stream_destroy(&self, stream: CUstream) -> DriverResult<()> {
        check(unsafe { (self.cu_stream_destroy)(stream) })
    }

    fn stream_synchronize(&self, stream: CUstream) -> DriverResult<()> {
        check(unsafe { (self.cu_stream_synchronize)(stream) })
    }

    fn stream_wait_event(&self, stream: CUstream, event: CUevent, flags: u32) -> DriverResult<()> {
        check(unsafe { (self.cu_stream_wait_event)(stream, event, flags as c_uint) })
    }

    fn event_create(&self, flags: u32) -> DriverResult<CUevent> {
        let mut event: CUevent = std::ptr::null_mut();
        check(unsafe { (self.cu_event_create)(&mut event, flags as c_uint) })?;
        Ok(event)
    }

    fn event_record(&self, event: CUevent, stream: CUstream) -> DriverResult<()> {
        check(unsafe { (self.cu_event_record)(event, stream) })
    }

    fn event_destroy(&self, event: CUevent) -> DriverResult<()> {
        check(unsafe { (self.cu_event_destroy)(event) })
    }

    unsafe fn mem_host_register(
        &self,
        ptr: *mut c_void,
        byte_size: usize,
        flags: u32,
    ) -> DriverResult<()> {
        // Registration is visible to every context, but one must be current.
        if self.current_context()?.is_null() {
            self.set_current_device(0)?;
        }
        check(unsafe { (self.cu_mem_host_register)(ptr, byte_size, flags as c_uint) })
    }

    unsafe fn mem_host_unregister(&self, ptr: *mut c_void) -> DriverResult<()> {
        if self.current_context()?.is_null() {
            self.set_current_device(0)?;
        }
        check(unsafe { (self.cu_mem_host_unregister)(ptr) })
    }

    fn pointer_memory_type(&self, ptr: CUdeviceptr) -> DriverResult<u32> {
        if self.current_context()?.is_null() {
            self.set_current_device(0)?;
        }
        let mut memory_type: c_uint = 0;
        check(unsafe {
            (self.cu_pointer_get_attribute)(
                &mut memory_type as *mut c_uint as *mut c_void,
                CU_POINTER_ATTRIBUTE_MEMORY_TYPE,
                ptr,
            )
        })?;
        Ok(memory_type)
    }

    fn error_string(&self, result: CUresult) -> String {
        let name = cuda_error_name(result);
        let Some(func) = self.cu_get_error_string else {
            return name.to_string();
        };
        let mut text: *const c_char = std::ptr::null();
        let res = unsafe { func(result, &mut text) };
        if res != CUDA_SUCCESS || text.is_null() {
            return name.to_string();
        }
        let text = unsafe { CStr::from_ptr(text) };
        format!("{}: {}", name, text.to_string_lossy())
    }
}
