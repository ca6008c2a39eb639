//! Reusable scratch buffers for the duration of a single operation.
//!
//! A `WorkspacePool` holds raw device pointers, is `!Send` and belongs to
//! exactly one thread, so nothing in here locks.

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::WorkspaceConfig;
use crate::context::{DeviceContext, DeviceType};
use crate::device_api::DataSpace;
use crate::error::{DeviceError, Result};

#[derive(Debug)]
struct Page {
    data: *mut c_void,
    size: usize,
}

/// Page counts and byte totals for one device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkspaceStats {
    pub free_pages: usize,
    pub allocated_pages: usize,
    pub free_bytes: usize,
    pub allocated_bytes: usize,
}

#[derive(Default)]
struct DevicePool {
    /// Sorted by ascending size.
    free_list: Vec<Page>,
    /// In allocation order; frees are usually LIFO.
    allocated: Vec<Page>,
}

impl DevicePool {
    fn alloc(
        &mut self,
        ctx: DeviceContext,
        nbytes: usize,
        space: &dyn DataSpace,
        config: &WorkspaceConfig,
    ) -> Result<*mut c_void> {
        let nbytes = nbytes
            .max(1)
            .checked_next_multiple_of(config.page_size.max(1))
            .ok_or_else(|| {
                DeviceError::usage(format!(
                    "{}: workspace request of {} bytes exceeds the address space",
                    ctx, nbytes
                ))
            })?;

        let fit = self.free_list.partition_point(|p| p.size < nbytes);
        let page = if fit < self.free_list.len() {
            self.free_list.remove(fit)
        } else {
            // Nothing fits: give back the largest free page before growing.
            if let Some(largest) = self.free_list.pop() {
                debug!(
                    "{}: replacing {} byte workspace page with {} bytes",
                    ctx, largest.size, nbytes
                );
                if let Err(e) = unsafe { space.free_data_space(ctx, largest.data) } {
                    self.free_list.push(largest);
                    return Err(e);
                }
            }
            let data = space.alloc_data_space(ctx, nbytes, config.alignment)?;
            debug!("{}: new {} byte workspace page at {:p}", ctx, nbytes, data);
            Page { data, size: nbytes }
        };

        let data = page.data;
        self.allocated.push(page);
        Ok(data)
    }

    fn free(&mut self, ptr: *mut c_void) -> Result<()> {
        let pos = self
            .allocated
            .iter()
            .rposition(|p| p.data == ptr)
            .ok_or_else(|| {
                DeviceError::usage(format!(
                    "freeing workspace pointer {:p} that was not allocated from this pool",
                    ptr
                ))
            })?;
        let page = self.allocated.remove(pos);
        let at = self.free_list.partition_point(|p| p.size < page.size);
        self.free_list.insert(at, page);
        Ok(())
    }

    fn release(&mut self, ctx: DeviceContext, space: &dyn DataSpace) {
        for page in self.free_list.drain(..).chain(self.allocated.drain(..)) {
            if let Err(e) = unsafe { space.free_data_space(ctx, page.data) } {
                warn!("{}: failed to release workspace page {:p}: {}", ctx, page.data, e);
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.free_list.is_empty() && self.allocated.is_empty()
    }

    fn stats(&self) -> WorkspaceStats {
        WorkspaceStats {
            free_pages: self.free_list.len(),
            allocated_pages: self.allocated.len(),
            free_bytes: self.free_list.iter().map(|p| p.size).sum(),
            allocated_bytes: self.allocated.iter().map(|p| p.size).sum(),
        }
    }
}

/// Per-thread workspace pool bound to one backend.
pub struct WorkspacePool {
    device_type: DeviceType,
    space: Arc<dyn DataSpace>,
    config: WorkspaceConfig,
    pools: HashMap<i32, DevicePool>,
}

impl WorkspacePool {
    pub fn new(device_type: DeviceType, space: Arc<dyn DataSpace>, config: WorkspaceConfig) -> Self {
        Self {
            device_type,
            space,
            config,
            pools: HashMap::new(),
        }
    }

    /// A buffer of at least `size` bytes on `ctx`.
    pub fn alloc_workspace(&mut self, ctx: DeviceContext, size: usize) -> Result<*mut c_void> {
        self.check(ctx)?;
        let pool = self.pools.entry(ctx.device_id).or_default();
        let result = pool.alloc(ctx, size, self.space.as_ref(), &self.config);
        if result.is_err() && pool.is_empty() {
            self.pools.remove(&ctx.device_id);
        }
        result
    }

    /// Hand `ptr` back to the pool. The memory stays allocated for reuse.
    pub fn free_workspace(&mut self, ctx: DeviceContext, ptr: *mut c_void) -> Result<()> {
        self.check(ctx)?;
        match self.pools.get_mut(&ctx.device_id) {
            Some(pool) => pool.free(ptr),
            None => Err(DeviceError::usage(format!(
                "no workspace has been allocated on {}",
                ctx
            ))),
        }
    }

    pub fn stats(&self, device_id: i32) -> WorkspaceStats {
        self.pools
            .get(&device_id)
            .map(DevicePool::stats)
            .unwrap_or_default()
    }

    fn check(&self, ctx: DeviceContext) -> Result<()> {
        if ctx.device_type != self.device_type {
            return Err(DeviceError::usage(format!(
                "{} workspace pool cannot serve {}",
                self.device_type, ctx
            )));
        }
        if ctx.device_id < 0 {
            return Err(DeviceError::usage(format!("invalid device index in {}", ctx)));
        }
        Ok(())
    }
}

impl Drop for WorkspacePool {
    fn drop(&mut self) {
        for (&id, pool) in self.pools.iter_mut() {
            let ctx = DeviceContext::new(self.device_type, id);
            pool.release(ctx, self.space.as_ref());
        }
    }
}
