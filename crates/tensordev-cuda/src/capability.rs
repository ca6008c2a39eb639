//! Device attribute queries.

use tensordev_core::{AttrKind, AttrValue, Result};
use tracing::trace;

use crate::driver::*;

/// Answer `kind` for device ordinal `device`.
///
/// `Exist` never fails: a device that cannot be probed does not exist.
pub fn query(driver: &dyn Driver, device: CUdevice, kind: AttrKind) -> Result<AttrValue> {
    let int = |attrib: i32, op: &'static str| -> Result<i64> {
        driver
            .device_get_attribute(attrib, device)
            .map(i64::from)
            .op(driver, op)
    };

    let value = match kind {
        AttrKind::Exist => {
            let exists = driver
                .device_get_attribute(CU_DEVICE_ATTRIBUTE_MAX_THREADS_PER_BLOCK, device)
                .is_ok();
            if !exists {
                driver.clear_last_error();
            }
            AttrValue::Int(i64::from(exists))
        }
        AttrKind::MaxThreadsPerBlock => AttrValue::Int(int(
            CU_DEVICE_ATTRIBUTE_MAX_THREADS_PER_BLOCK,
            "cuDeviceGetAttribute(MAX_THREADS_PER_BLOCK)",
        )?),
        AttrKind::WarpSize => AttrValue::Int(int(
            CU_DEVICE_ATTRIBUTE_WARP_SIZE,
            "cuDeviceGetAttribute(WARP_SIZE)",
        )?),
        AttrKind::MaxSharedMemoryPerBlock => AttrValue::Int(int(
            CU_DEVICE_ATTRIBUTE_MAX_SHARED_MEMORY_PER_BLOCK,
            "cuDeviceGetAttribute(MAX_SHARED_MEMORY_PER_BLOCK)",
        )?),
        AttrKind::ComputeVersion => {
            let major = int(
                CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR,
                "cuDeviceGetAttribute(COMPUTE_CAPABILITY_MAJOR)",
            )?;
            let minor = int(
                CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR,
                "cuDeviceGetAttribute(COMPUTE_CAPABILITY_MINOR)",
            )?;
            AttrValue::Str(format!("{}.{}", major, minor))
        }
        AttrKind::DeviceName => {
            AttrValue::Str(driver.device_get_name(device).op(driver, "cuDeviceGetName")?)
        }
        AttrKind::MaxClockRate => AttrValue::Int(int(
            CU_DEVICE_ATTRIBUTE_CLOCK_RATE,
            "cuDeviceGetAttribute(CLOCK_RATE)",
        )?),
        AttrKind::MultiProcessorCount => AttrValue::Int(int(
            CU_DEVICE_ATTRIBUTE_MULTIPROCESSOR_COUNT,
            "cuDeviceGetAttribute(MULTIPROCESSOR_COUNT)",
        )?),
        AttrKind::MaxThreadDimensions => AttrValue::Dims([
            int(CU_DEVICE_ATTRIBUTE_MAX_BLOCK_DIM_X, "cuDeviceGetAttribute(MAX_BLOCK_DIM_X)")?,
            int(CU_DEVICE_ATTRIBUTE_MAX_BLOCK_DIM_Y, "cuDeviceGetAttribute(MAX_BLOCK_DIM_Y)")?,
            int(CU_DEVICE_ATTRIBUTE_MAX_BLOCK_DIM_Z, "cuDeviceGetAttribute(MAX_BLOCK_DIM_Z)")?,
        ]),
    };

    trace!("device {} {:?} = {}", device, kind, value);
    Ok(value)
}
