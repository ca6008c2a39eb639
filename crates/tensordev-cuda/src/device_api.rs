//! The CUDA device handle.

use std::ffi::c_void;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use tensordev_core::config::{default_config_path, BackendKind, TensordevConfig, WorkspaceConfig};
use tensordev_core::{
    AttrKind, AttrValue, DataSpace, DeviceApi, DeviceContext, DeviceError, DeviceType, Result,
    StreamHandle, WorkspacePool, WorkspaceStats,
};
use tracing::{debug, error, info, warn};

use crate::copy::CopyRoute;
use crate::cuda_driver::CudaDriver;
use crate::driver::*;
use crate::pinned::PinnedTracker;
use crate::sim::SimDriver;
use crate::thread_entry::{self, CudaThreadEntry};
use crate::{capability, copy, stream};

/// Alignment every driver allocation is guaranteed to satisfy.
const DRIVER_ALIGNMENT: usize = 256;

/// Registry name of the CUDA backend.
pub const CUDA_API_NAME: &str = "device_api.gpu";

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Raw device memory through the driver. Shared with the per-thread
/// workspace pools.
struct CudaDataSpace {
    driver: Option<Arc<dyn Driver>>,
}

impl CudaDataSpace {
    fn driver(&self) -> Result<&dyn Driver> {
        self.driver
            .as_deref()
            .ok_or_else(|| DeviceError::Unavailable("CUDA driver not loaded".to_string()))
    }
}

impl DataSpace for CudaDataSpace {
    fn alloc_data_space(
        &self,
        ctx: DeviceContext,
        nbytes: usize,
        alignment: usize,
    ) -> Result<*mut c_void> {
        if alignment == 0 || DRIVER_ALIGNMENT % alignment != 0 {
            return Err(DeviceError::usage(format!(
                "CUDA allocations are {}-byte aligned, cannot honour alignment {}",
                DRIVER_ALIGNMENT, alignment
            )));
        }
        let device = stream::device_of(ctx)?;
        let driver = self.driver()?;
        driver
            .set_current_device(device)
            .op(driver, "cuCtxSetCurrent")?;
        // A zero-byte request still gets a unique pointer.
        let size = if nbytes == 0 { DRIVER_ALIGNMENT } else { nbytes };
        let dptr = driver.mem_alloc(size).op(driver, "cuMemAlloc")?;
        debug!("allocated {} bytes on {} at {:#x}", size, ctx, dptr);
        Ok(dptr as usize as *mut c_void)
    }

    unsafe fn free_data_space(&self, ctx: DeviceContext, ptr: *mut c_void) -> Result<()> {
        let device = stream::device_of(ctx)?;
        let driver = self.driver()?;
        driver
            .set_current_device(device)
            .op(driver, "cuCtxSetCurrent")?;
        driver
            .mem_free(ptr as usize as CUdeviceptr)
            .op(driver, "cuMemFree")?;
        debug!("freed {:p} on {}", ptr, ctx);
        Ok(())
    }
}

/// CUDA implementation of [`DeviceApi`].
///
/// One process-wide instance is reachable through [`CudaDeviceApi::global`];
/// further handles can be built over an explicit driver. Current stream and
/// workspace pool are kept per thread and per handle.
pub struct CudaDeviceApi {
    id: u64,
    alive: Arc<()>,
    data_space: Arc<CudaDataSpace>,
    pinned: PinnedTracker,
    workspace: WorkspaceConfig,
}

impl CudaDeviceApi {
    /// Handle over `driver` with default workspace settings.
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self::build(Some(driver), WorkspaceConfig::default())
    }

    pub fn with_workspace_config(driver: Arc<dyn Driver>, workspace: WorkspaceConfig) -> Result<Self> {
        workspace.validate()?;
        Ok(Self::build(Some(driver), workspace))
    }

    /// Handle for a process without an accelerator. Queries answer "absent",
    /// anything needing the device fails with [`DeviceError::Unavailable`].
    pub fn without_driver() -> Self {
        Self::build(None, WorkspaceConfig::default())
    }

    fn build(driver: Option<Arc<dyn Driver>>, workspace: WorkspaceConfig) -> Self {
        let pinned = PinnedTracker::new(driver.is_some());
        Self {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            alive: Arc::new(()),
            data_space: Arc::new(CudaDataSpace { driver }),
            pinned,
            workspace,
        }
    }

    /// Build a handle as `config` selects.
    pub fn from_config(config: &TensordevConfig) -> Result<Self> {
        config.workspace.validate()?;
        let workspace = config.workspace.clone();
        match config.cuda.backend {
            BackendKind::Sim => {
                info!("using simulated accelerator ({} device(s))", config.cuda.sim_devices);
                let driver: Arc<dyn Driver> = Arc::new(SimDriver::new(config.cuda.sim_devices));
                Ok(Self::build(Some(driver), workspace))
            }
            BackendKind::Driver => {
                let driver = load_driver(config.cuda.library_path.as_deref())
                    .map_err(DeviceError::Unavailable)?;
                Ok(Self::build(Some(driver), workspace))
            }
            BackendKind::Auto => match load_driver(config.cuda.library_path.as_deref()) {
                Ok(driver) => Ok(Self::build(Some(driver), workspace)),
                Err(e) => {
                    info!("running without CUDA: {}", e);
                    Ok(Self::build(None, workspace))
                }
            },
        }
    }

    /// The process-wide handle, configured from the default config path on
    /// first use.
    pub fn global() -> Arc<CudaDeviceApi> {
        static GLOBAL: OnceLock<Arc<CudaDeviceApi>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| {
            let config = TensordevConfig::load_or_default(&default_config_path());
            let api = CudaDeviceApi::from_config(&config).unwrap_or_else(|e| {
                error!("CUDA device API unavailable: {}", e);
                CudaDeviceApi::without_driver()
            });
            Arc::new(api)
        }))
    }

    pub fn has_driver(&self) -> bool {
        self.data_space.driver.is_some()
    }

    /// Number of visible accelerators; 0 when there is no driver.
    pub fn device_count(&self) -> i32 {
        let Some(driver) = self.data_space.driver.as_deref() else {
            return 0;
        };
        match driver.device_get_count() {
            Ok(count) => count,
            Err(code) => {
                debug!("cuDeviceGetCount failed: {}", driver.error_string(code));
                driver.clear_last_error();
                0
            }
        }
    }

    /// Whether pinned-memory queries still reach the driver.
    pub fn is_pinned_available(&self) -> bool {
        self.pinned.is_available()
    }

    /// Workspace page accounting of the calling thread for `device_id`.
    pub fn workspace_stats(&self, device_id: i32) -> WorkspaceStats {
        thread_entry::with_entry(self.id, || self.new_entry(), |e| e.pool.stats(device_id))
            .unwrap_or_default()
    }

    fn driver(&self) -> Result<&dyn Driver> {
        self.data_space.driver()
    }

    fn new_entry(&self) -> CudaThreadEntry {
        let space: Arc<dyn DataSpace> = self.data_space.clone();
        CudaThreadEntry {
            owner: Arc::downgrade(&self.alive),
            stream: None,
            pool: WorkspacePool::new(DeviceType::Cuda, space, self.workspace.clone()),
        }
    }
}

impl Drop for CudaDeviceApi {
    fn drop(&mut self) {
        thread_entry::remove(self.id);
    }
}

/// Load and initialise the real driver library.
fn load_driver(library_path: Option<&str>) -> std::result::Result<Arc<dyn Driver>, String> {
    let driver = match library_path {
        Some(path) => CudaDriver::load_from(path)?,
        None => CudaDriver::load()?,
    };
    let res = driver.init(0);
    if res != CUDA_SUCCESS {
        return Err(format!("cuInit failed: {} ({})", cuda_error_name(res), res));
    }
    match driver.driver_get_version() {
        Ok(v) => info!("CUDA driver initialized (version {}.{})", v / 1000, (v % 1000) / 10),
        Err(e) => warn!("cuDriverGetVersion failed: {}", cuda_error_name(e)),
    }
    let driver: Arc<dyn Driver> = driver;
    Ok(driver)
}

impl DataSpace for CudaDeviceApi {
    fn alloc_data_space(
        &self,
        ctx: DeviceContext,
        nbytes: usize,
        alignment: usize,
    ) -> Result<*mut c_void> {
        self.data_space.alloc_data_space(ctx, nbytes, alignment)
    }

    unsafe fn free_data_space(&self, ctx: DeviceContext, ptr: *mut c_void) -> Result<()> {
        unsafe { self.data_space.free_data_space(ctx, ptr) }
    }
}

impl DeviceApi for CudaDeviceApi {
    fn name(&self) -> &'static str {
        CUDA_API_NAME
    }

    fn set_device(&self, ctx: DeviceContext) -> Result<()> {
        let device = stream::device_of(ctx)?;
        let driver = self.driver()?;
        driver
            .set_current_device(device)
            .op(driver, "cuCtxSetCurrent")
    }

    fn get_attr(&self, ctx: DeviceContext, kind: AttrKind) -> Result<AttrValue> {
        match self.data_space.driver.as_deref() {
            Some(driver) => capability::query(driver, ctx.device_id, kind),
            None if kind == AttrKind::Exist => Ok(AttrValue::Int(0)),
            None => Err(DeviceError::Unavailable(format!(
                "cannot query {:?} of {} without a CUDA driver",
                kind, ctx
            ))),
        }
    }

    unsafe fn copy_data_from_to(
        &self,
        from: *const c_void,
        from_offset: usize,
        to: *mut c_void,
        to_offset: usize,
        size: usize,
        ctx_from: DeviceContext,
        ctx_to: DeviceContext,
        stream: Option<StreamHandle>,
    ) -> Result<()> {
        CopyRoute::resolve(ctx_from, ctx_to)?;
        let driver = self.driver()?;
        unsafe {
            copy::copy_bytes(
                driver,
                from,
                from_offset,
                to,
                to_offset,
                size,
                ctx_from,
                ctx_to,
                stream::raw_stream(stream),
            )
        }
    }

    fn create_stream(&self, ctx: DeviceContext) -> Result<StreamHandle> {
        stream::create(self.driver()?, ctx)
    }

    fn free_stream(&self, ctx: DeviceContext, stream: StreamHandle) -> Result<()> {
        stream::free(self.driver()?, ctx, stream)
    }

    fn sync_stream_from_to(
        &self,
        ctx: DeviceContext,
        src: Option<StreamHandle>,
        dst: Option<StreamHandle>,
    ) -> Result<()> {
        stream::sync_from_to(self.driver()?, ctx, src, dst)
    }

    fn stream_sync(&self, ctx: DeviceContext, stream: Option<StreamHandle>) -> Result<()> {
        stream::synchronize(self.driver()?, ctx, stream)
    }

    fn set_stream(&self, _ctx: DeviceContext, stream: Option<StreamHandle>) {
        if let Err(e) = thread_entry::with_entry(self.id, || self.new_entry(), |e| e.stream = stream) {
            warn!("cannot set current stream: {}", e);
        }
    }

    fn get_stream(&self) -> Option<StreamHandle> {
        thread_entry::current_stream(self.id)
    }

    unsafe fn pin_data(&self, ptr: *mut c_void, nbytes: usize) -> Result<()> {
        unsafe { self.pinned.pin(self.driver()?, ptr, nbytes) }
    }

    unsafe fn unpin_data(&self, ptr: *mut c_void) -> Result<()> {
        unsafe { self.pinned.unpin(self.driver()?, ptr) }
    }

    fn is_pinned(&self, ptr: *const c_void) -> Result<bool> {
        match self.data_space.driver.as_deref() {
            Some(driver) => self.pinned.is_pinned(driver, ptr),
            None => Ok(false),
        }
    }

    fn alloc_workspace(&self, ctx: DeviceContext, size: usize) -> Result<*mut c_void> {
        thread_entry::with_entry(self.id, || self.new_entry(), |e| {
            e.pool.alloc_workspace(ctx, size)
        })?
    }

    fn free_workspace(&self, ctx: DeviceContext, ptr: *mut c_void) -> Result<()> {
        thread_entry::with_entry(self.id, || self.new_entry(), |e| {
            e.pool.free_workspace(ctx, ptr)
        })?
    }
}
