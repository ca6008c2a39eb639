//! Byte-range copies between host memory and accelerator devices.

use std::ffi::c_void;

use tensordev_core::{DeviceContext, DeviceError, DeviceType, Result};
use tracing::trace;

use crate::driver::*;

/// How a copy between two memory spaces is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyRoute {
    /// Both ends on the same device.
    DeviceToDevice { device: i32 },
    /// Across two devices, issued from the source device.
    Peer { src_device: i32, dst_device: i32 },
    DeviceToHost { device: i32 },
    HostToDevice { device: i32 },
}

impl CopyRoute {
    /// Pick the route for a copy from `from` to `to`.
    pub fn resolve(from: DeviceContext, to: DeviceContext) -> Result<Self> {
        use DeviceType::{Cpu, Cuda};

        match (from.device_type, to.device_type) {
            (Cuda, Cuda) if from.device_id == to.device_id => Ok(CopyRoute::DeviceToDevice {
                device: from.device_id,
            }),
            (Cuda, Cuda) => Ok(CopyRoute::Peer {
                src_device: from.device_id,
                dst_device: to.device_id,
            }),
            (Cuda, Cpu) => Ok(CopyRoute::DeviceToHost {
                device: from.device_id,
            }),
            (Cpu, Cuda) => Ok(CopyRoute::HostToDevice {
                device: to.device_id,
            }),
            _ => Err(DeviceError::usage(format!(
                "expected a copy to/from an accelerator device, or between two accelerator devices (got {} -> {})",
                from, to
            ))),
        }
    }

    /// Device that must be current while the copy is issued.
    pub fn issuing_device(self) -> i32 {
        match self {
            CopyRoute::DeviceToDevice { device }
            | CopyRoute::DeviceToHost { device }
            | CopyRoute::HostToDevice { device } => device,
            CopyRoute::Peer { src_device, .. } => src_device,
        }
    }

    /// Whether a copy on the default stream must complete before returning.
    pub fn blocks_on_default_stream(self) -> bool {
        matches!(self, CopyRoute::DeviceToHost { .. })
    }
}

/// Enqueue `size` bytes from `from + from_offset` to `to + to_offset`.
///
/// With the default stream, a device-to-host copy is complete on return.
///
/// # Safety
/// Both ranges must be valid for `size` bytes in their memory spaces until
/// the copy has completed on `stream`.
#[allow(clippy::too_many_arguments)]
pub(crate) unsafe fn copy_bytes(
    driver: &dyn Driver,
    from: *const c_void,
    from_offset: usize,
    to: *mut c_void,
    to_offset: usize,
    size: usize,
    ctx_from: DeviceContext,
    ctx_to: DeviceContext,
    stream: CUstream,
) -> Result<()> {
    let route = CopyRoute::resolve(ctx_from, ctx_to)?;
    let src = (from as *const u8).wrapping_add(from_offset);
    let dst = (to as *mut u8).wrapping_add(to_offset);
    trace!(
        "copy {} bytes {} -> {} via {:?} on stream {:p}",
        size,
        ctx_from,
        ctx_to,
        route,
        stream
    );

    driver
        .set_current_device(route.issuing_device())
        .op(driver, "cuCtxSetCurrent")?;

    let (res, op) = match route {
        CopyRoute::DeviceToDevice { .. } => (
            unsafe { driver.memcpy_dtod_async(dst as CUdeviceptr, src as CUdeviceptr, size, stream) },
            "cuMemcpyDtoDAsync",
        ),
        CopyRoute::Peer {
            src_device,
            dst_device,
        } => (
            unsafe {
                driver.memcpy_peer_async(
                    dst as CUdeviceptr,
                    dst_device,
                    src as CUdeviceptr,
                    src_device,
                    size,
                    stream,
                )
            },
            "cuMemcpyPeerAsync",
        ),
        CopyRoute::DeviceToHost { .. } => (
            unsafe { driver.memcpy_dtoh_async(dst as *mut c_void, src as CUdeviceptr, size, stream) },
            "cuMemcpyDtoHAsync",
        ),
        CopyRoute::HostToDevice { .. } => (
            unsafe { driver.memcpy_htod_async(dst as CUdeviceptr, src as *const c_void, size, stream) },
            "cuMemcpyHtoDAsync",
        ),
    };
    res.op(driver, op)?;

    if stream.is_null() && route.blocks_on_default_stream() {
        driver
            .stream_synchronize(stream)
            .op(driver, "cuStreamSynchronize")?;
    }
    Ok(())
}
