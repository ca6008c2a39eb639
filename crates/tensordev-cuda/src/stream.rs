//! Stream lifecycle and cross-stream ordering.

use tensordev_core::{DeviceContext, DeviceError, DeviceType, Result, StreamHandle};
use tracing::{debug, warn};

use crate::driver::*;

/// Driver handle for `stream`; `None` is the default stream.
pub(crate) fn raw_stream(stream: Option<StreamHandle>) -> CUstream {
    stream.map_or(std::ptr::null_mut(), |s| s.as_raw() as usize as CUstream)
}

/// Ordinal of an accelerator context.
pub(crate) fn device_of(ctx: DeviceContext) -> Result<CUdevice> {
    if ctx.device_type != DeviceType::Cuda {
        return Err(DeviceError::usage(format!(
            "expected an accelerator device context, got {}",
            ctx
        )));
    }
    Ok(ctx.device_id)
}

/// Create a stream that does not serialize against the default stream.
pub(crate) fn create(driver: &dyn Driver, ctx: DeviceContext) -> Result<StreamHandle> {
    driver
        .set_current_device(device_of(ctx)?)
        .op(driver, "cuCtxSetCurrent")?;
    let raw = driver
        .stream_create(CU_STREAM_NON_BLOCKING)
        .op(driver, "cuStreamCreate")?;
    debug!("created stream {:p} on {}", raw, ctx);
    StreamHandle::from_raw(raw as usize as u64).ok_or_else(|| DeviceError::Driver {
        op: "cuStreamCreate",
        code: CUDA_ERROR_INVALID_HANDLE,
        message: "driver returned a null stream".to_string(),
    })
}

pub(crate) fn free(driver: &dyn Driver, ctx: DeviceContext, stream: StreamHandle) -> Result<()> {
    driver
        .set_current_device(device_of(ctx)?)
        .op(driver, "cuCtxSetCurrent")?;
    driver
        .stream_destroy(raw_stream(Some(stream)))
        .op(driver, "cuStreamDestroy")?;
    debug!("destroyed stream {:#x} on {}", stream.as_raw(), ctx);
    Ok(())
}

/// Make `dst` wait for the work enqueued on `src` so far, through a
/// transient event. The event is destroyed on every path.
pub(crate) fn sync_from_to(
    driver: &dyn Driver,
    ctx: DeviceContext,
    src: Option<StreamHandle>,
    dst: Option<StreamHandle>,
) -> Result<()> {
    driver
        .set_current_device(device_of(ctx)?)
        .op(driver, "cuCtxSetCurrent")?;
    let event = driver
        .event_create(CU_EVENT_DISABLE_TIMING)
        .op(driver, "cuEventCreate")?;

    let ordered = driver
        .event_record(event, raw_stream(src))
        .op(driver, "cuEventRecord")
        .and_then(|()| {
            driver
                .stream_wait_event(raw_stream(dst), event, 0)
                .op(driver, "cuStreamWaitEvent")
        });

    let destroyed = driver.event_destroy(event).op(driver, "cuEventDestroy");
    match (ordered, destroyed) {
        (Err(e), Err(destroy_err)) => {
            warn!("event cleanup after failed stream sync also failed: {}", destroy_err);
            Err(e)
        }
        (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
        (Ok(()), Ok(())) => Ok(()),
    }
}

/// Block until `stream` has drained.
pub(crate) fn synchronize(
    driver: &dyn Driver,
    ctx: DeviceContext,
    stream: Option<StreamHandle>,
) -> Result<()> {
    driver
        .set_current_device(device_of(ctx)?)
        .op(driver, "cuCtxSetCurrent")?;
    driver
        .stream_synchronize(raw_stream(stream))
        .op(driver, "cuStreamSynchronize")
}
