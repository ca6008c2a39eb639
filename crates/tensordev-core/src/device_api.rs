//! The capability set every device backend exposes to the runtime.

use std::ffi::c_void;
use std::num::NonZeroU64;

use crate::attr::{AttrKind, AttrValue};
use crate::context::DeviceContext;
use crate::error::Result;

/// Opaque, non-null handle to a backend stream.
///
/// The default stream is spelled `None` wherever an `Option<StreamHandle>`
/// is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(NonZeroU64);

impl StreamHandle {
    /// Wrap a raw backend handle. Returns `None` for the null handle.
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(StreamHandle)
    }

    pub fn as_raw(self) -> u64 {
        self.0.get()
    }
}

/// Raw data-space allocation. Split out so the workspace pool only depends
/// on this part of a backend.
pub trait DataSpace: Send + Sync {
    /// Allocate `nbytes` on `ctx` aligned to `alignment`.
    fn alloc_data_space(
        &self,
        ctx: DeviceContext,
        nbytes: usize,
        alignment: usize,
    ) -> Result<*mut c_void>;

    /// Release memory obtained from [`DataSpace::alloc_data_space`].
    ///
    /// # Safety
    /// `ptr` must come from `alloc_data_space` on the same backend and
    /// context, must not have been freed, and no queued work may still use it.
    unsafe fn free_data_space(&self, ctx: DeviceContext, ptr: *mut c_void) -> Result<()>;
}

/// Device backend interface.
pub trait DeviceApi: DataSpace {
    /// Registry name of this backend, e.g. `device_api.gpu`.
    fn name(&self) -> &'static str;

    /// Make `ctx` the active device of the calling thread.
    fn set_device(&self, ctx: DeviceContext) -> Result<()>;

    fn get_attr(&self, ctx: DeviceContext, kind: AttrKind) -> Result<AttrValue>;

    /// Copy `size` bytes from `from + from_offset` in `ctx_from` to
    /// `to + to_offset` in `ctx_to`, ordered on `stream` (`None` = default).
    ///
    /// # Safety
    /// Both ranges must be valid for `size` bytes in their respective memory
    /// spaces and stay valid until the copy has completed on the stream.
    #[allow(clippy::too_many_arguments)]
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
    ) -> Result<()>;

    fn create_stream(&self, ctx: DeviceContext) -> Result<StreamHandle>;

    fn free_stream(&self, ctx: DeviceContext, stream: StreamHandle) -> Result<()>;

    /// Make `dst` wait for everything enqueued on `src` so far.
    fn sync_stream_from_to(
        &self,
        ctx: DeviceContext,
        src: Option<StreamHandle>,
        dst: Option<StreamHandle>,
    ) -> Result<()>;

    /// Block until all work on `stream` has completed.
    fn stream_sync(&self, ctx: DeviceContext, stream: Option<StreamHandle>) -> Result<()>;

    /// Set the calling thread's current stream.
    fn set_stream(&self, ctx: DeviceContext, stream: Option<StreamHandle>);

    /// The calling thread's current stream.
    fn get_stream(&self) -> Option<StreamHandle>;

    /// Register host memory for direct device access.
    ///
    /// # Safety
    /// `ptr` must point to `nbytes` of live host memory that stays allocated
    /// until [`DeviceApi::unpin_data`] is called.
    unsafe fn pin_data(&self, ptr: *mut c_void, nbytes: usize) -> Result<()>;

    /// # Safety
    /// `ptr` must have been registered with [`DeviceApi::pin_data`].
    unsafe fn unpin_data(&self, ptr: *mut c_void) -> Result<()>;

    /// Whether `ptr` is registered pinned host memory. The pointer is never
    /// dereferenced.
    fn is_pinned(&self, ptr: *const c_void) -> Result<bool>;

    /// Scratch space from the calling thread's workspace pool.
    fn alloc_workspace(&self, ctx: DeviceContext, size: usize) -> Result<*mut c_void>;

    /// Return scratch space to the calling thread's pool.
    fn free_workspace(&self, ctx: DeviceContext, ptr: *mut c_void) -> Result<()>;
}
