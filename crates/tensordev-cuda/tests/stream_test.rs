//! Integration test: streams and cross-stream ordering
//!
//! Run with: cargo test --test stream_test -- --nocapture

use std::ffi::c_void;
use std::sync::Arc;

use tensordev_core::{DataSpace, DeviceApi, DeviceContext, DeviceError};
use tensordev_cuda::driver::CUDA_ERROR_INVALID_HANDLE;
use tensordev_cuda::{CudaDeviceApi, SimDriver};

const CPU: DeviceContext = DeviceContext::cpu();
const GPU0: DeviceContext = DeviceContext::cuda(0);

fn sim_api(devices: u32) -> (Arc<SimDriver>, CudaDeviceApi) {
    tensordev_common::logging::init_test_logging();
    let sim = Arc::new(SimDriver::new(devices));
    let api = CudaDeviceApi::new(sim.clone());
    (sim, api)
}

#[test]
fn test_stream_lifecycle() -> anyhow::Result<()> {
    let (sim, api) = sim_api(2);

    let a = api.create_stream(GPU0)?;
    let b = api.create_stream(DeviceContext::cuda(1))?;
    println!("streams: {:?} {:?}", a, b);
    assert_ne!(a, b);
    assert_eq!(sim.live_streams(), 2);

    api.stream_sync(GPU0, Some(a))?;
    api.stream_sync(GPU0, None)?;

    api.free_stream(GPU0, a)?;
    api.free_stream(DeviceContext::cuda(1), b)?;
    assert_eq!(sim.live_streams(), 0);

    let err = api.free_stream(GPU0, a).unwrap_err();
    assert!(matches!(
        err,
        DeviceError::Driver {
            code: CUDA_ERROR_INVALID_HANDLE,
            ..
        }
    ));
    Ok(())
}

#[test]
fn test_stream_on_missing_device() {
    let (sim, api) = sim_api(1);
    let err = api.create_stream(DeviceContext::cuda(3)).unwrap_err();
    println!("create on gpu(3): {}", err);
    assert!(matches!(err, DeviceError::Driver { code: 101, .. }));
    assert_eq!(sim.live_streams(), 0);

    let err = api.create_stream(CPU).unwrap_err();
    assert!(matches!(err, DeviceError::Usage(_)));
}

#[test]
fn test_sync_orders_exactly_prior_writes() -> anyhow::Result<()> {
    let (sim, api) = sim_api(1);
    let first = vec![1u8; 256];
    let second = vec![2u8; 256];
    let mut out = vec![0u8; 256];

    let producer = api.create_stream(GPU0)?;
    let consumer = api.create_stream(GPU0)?;
    let dev = api.alloc_data_space(GPU0, 256, 64)?;

    unsafe {
        api.copy_data_from_to(
            first.as_ptr() as *const c_void,
            0,
            dev,
            0,
            256,
            CPU,
            GPU0,
            Some(producer),
        )?;
    }
    api.sync_stream_from_to(GPU0, Some(producer), Some(consumer))?;
    unsafe {
        // Enqueued after the sync point: not covered by it.
        api.copy_data_from_to(
            second.as_ptr() as *const c_void,
            0,
            dev,
            0,
            256,
            CPU,
            GPU0,
            Some(producer),
        )?;
        api.copy_data_from_to(
            dev as *const c_void,
            0,
            out.as_mut_ptr() as *mut c_void,
            0,
            256,
            GPU0,
            CPU,
            Some(consumer),
        )?;
    }

    api.stream_sync(GPU0, Some(consumer))?;
    assert_eq!(out, first);

    api.stream_sync(GPU0, Some(producer))?;
    api.free_stream(GPU0, producer)?;
    api.free_stream(GPU0, consumer)?;
    unsafe { api.free_data_space(GPU0, dev)? };

    assert_eq!(sim.events_created(), 1);
    assert_eq!(sim.live_events(), 0);
    Ok(())
}

#[test]
fn test_sync_with_default_streams() -> anyhow::Result<()> {
    let (sim, api) = sim_api(1);
    let s = api.create_stream(GPU0)?;

    api.sync_stream_from_to(GPU0, None, Some(s))?;
    api.sync_stream_from_to(GPU0, Some(s), None)?;
    api.sync_stream_from_to(GPU0, None, None)?;
    assert_eq!(sim.events_created(), 3);
    assert_eq!(sim.live_events(), 0);

    api.free_stream(GPU0, s)?;
    Ok(())
}

#[test]
fn test_failed_sync_still_destroys_event() -> anyhow::Result<()> {
    let (sim, api) = sim_api(1);
    let src = api.create_stream(GPU0)?;
    let dst = api.create_stream(GPU0)?;
    api.free_stream(GPU0, dst)?;

    let err = api
        .sync_stream_from_to(GPU0, Some(src), Some(dst))
        .unwrap_err();
    println!("sync into destroyed stream: {}", err);
    assert!(matches!(
        err,
        DeviceError::Driver {
            op: "cuStreamWaitEvent",
            ..
        }
    ));
    assert_eq!(sim.events_created(), 1);
    assert_eq!(sim.live_events(), 0);

    let err = api
        .sync_stream_from_to(GPU0, Some(dst), Some(src))
        .unwrap_err();
    assert!(matches!(err, DeviceError::Driver { op: "cuEventRecord", .. }));
    assert_eq!(sim.live_events(), 0);

    api.free_stream(GPU0, src)?;
    Ok(())
}

#[test]
fn test_current_stream_is_per_thread() -> anyhow::Result<()> {
    let (_sim, api) = sim_api(1);
    let api = Arc::new(api);
    assert_eq!(api.get_stream(), None);

    let s = api.create_stream(GPU0)?;
    api.set_stream(GPU0, Some(s));
    assert_eq!(api.get_stream(), Some(s));

    let other = Arc::clone(&api);
    let seen = std::thread::spawn(move || {
        let before = other.get_stream();
        let t = other.create_stream(GPU0).ok();
        other.set_stream(GPU0, t);
        (before, other.get_stream(), t)
    })
    .join()
    .unwrap();
    println!("other thread saw {:?}", seen);
    assert_eq!(seen.0, None);
    assert_eq!(seen.1, seen.2);
    assert!(seen.2.is_some());

    // Unchanged on this thread.
    assert_eq!(api.get_stream(), Some(s));
    api.set_stream(GPU0, None);
    assert_eq!(api.get_stream(), None);

    api.free_stream(GPU0, s)?;
    if let Some(t) = seen.2 {
        api.free_stream(GPU0, t)?;
    }
    Ok(())
}

#[test]
fn test_current_stream_is_per_handle() -> anyhow::Result<()> {
    let sim = Arc::new(SimDriver::new(1));
    let first = CudaDeviceApi::new(sim.clone());
    let second = CudaDeviceApi::new(sim.clone());

    let s = first.create_stream(GPU0)?;
    first.set_stream(GPU0, Some(s));
    assert_eq!(first.get_stream(), Some(s));
    assert_eq!(second.get_stream(), None);

    first.free_stream(GPU0, s)?;
    Ok(())
}

#[test]
fn test_streams_without_driver() {
    let api = CudaDeviceApi::without_driver();
    assert!(matches!(
        api.create_stream(GPU0),
        Err(DeviceError::Unavailable(_))
    ));
    assert!(matches!(
        api.stream_sync(GPU0, None),
        Err(DeviceError::Unavailable(_))
    ));
    // The current-stream slot does not need a driver.
    assert_eq!(api.get_stream(), None);
}
