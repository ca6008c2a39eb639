//! Integration test: real CUDA driver
//!
//! Runs against the installed driver library and skips when no driver or
//! no device is available.
//!
//! Run with: cargo test --test cuda_driver_test -- --nocapture

use std::ffi::c_void;
use std::sync::Arc;

use tensordev_core::{AttrKind, DataSpace, DeviceApi, DeviceContext};
use tensordev_cuda::driver::{cuda_error_name, Driver, CUDA_SUCCESS};
use tensordev_cuda::{CudaDeviceApi, CudaDriver};

const CPU: DeviceContext = DeviceContext::cpu();
const GPU0: DeviceContext = DeviceContext::cuda(0);

fn real_api() -> Option<CudaDeviceApi> {
    tensordev_common::logging::init_test_logging();
    let driver = match CudaDriver::load() {
        Ok(d) => d,
        Err(e) => {
            println!("skipping: {}", e);
            return None;
        }
    };
    let res = driver.init(0);
    if res != CUDA_SUCCESS {
        println!("skipping: cuInit failed: {}", cuda_error_name(res));
        return None;
    }
    match driver.device_get_count() {
        Ok(n) if n > 0 => println!("{} CUDA device(s)", n),
        _ => {
            println!("skipping: no CUDA devices");
            return None;
        }
    }
    let driver: Arc<dyn Driver> = driver;
    Some(CudaDeviceApi::new(driver))
}

#[test]
fn test_real_attributes() -> anyhow::Result<()> {
    let Some(api) = real_api() else { return Ok(()) };

    for kind in AttrKind::ALL {
        println!("{:?} = {}", kind, api.get_attr(GPU0, kind)?);
    }
    assert_eq!(api.get_attr(GPU0, AttrKind::Exist)?.as_bool(), Some(true));
    let beyond = DeviceContext::cuda(api.device_count());
    assert_eq!(api.get_attr(beyond, AttrKind::Exist)?.as_bool(), Some(false));
    Ok(())
}

#[test]
fn test_real_round_trip() -> anyhow::Result<()> {
    let Some(api) = real_api() else { return Ok(()) };

    let values: Vec<u32> = (0..4096).collect();
    let bytes: &[u8] = bytemuck::cast_slice(&values);
    let mut out = vec![0u32; values.len()];

    let dev = api.alloc_data_space(GPU0, bytes.len(), 256)?;
    let stream = api.create_stream(GPU0)?;
    unsafe {
        api.copy_data_from_to(
            bytes.as_ptr() as *const c_void,
            0,
            dev,
            0,
            bytes.len(),
            CPU,
            GPU0,
            Some(stream),
        )?;
        api.copy_data_from_to(
            dev,
            0,
            out.as_mut_ptr() as *mut c_void,
            0,
            bytes.len(),
            GPU0,
            CPU,
            Some(stream),
        )?;
    }
    api.stream_sync(GPU0, Some(stream))?;
    assert_eq!(out, values);

    api.free_stream(GPU0, stream)?;
    unsafe { api.free_data_space(GPU0, dev)? };
    Ok(())
}

#[test]
fn test_real_pinned_memory() -> anyhow::Result<()> {
    let Some(api) = real_api() else { return Ok(()) };

    let mut buf = vec![0u8; 1 << 20];
    let ptr = buf.as_mut_ptr() as *mut c_void;
    assert!(!api.is_pinned(ptr)?);

    unsafe { api.pin_data(ptr, buf.len())? };
    assert!(api.is_pinned(ptr)?);
    unsafe { api.unpin_data(ptr)? };
    assert!(!api.is_pinned(ptr)?);
    assert!(api.is_pinned_available());
    Ok(())
}
