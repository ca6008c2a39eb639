//! Integration test: device attribute queries
//!
//! Run with: cargo test --test capability_test -- --nocapture

use std::sync::Arc;

use tensordev_core::{AttrKind, AttrValue, DeviceApi, DeviceContext, DeviceError};
use tensordev_cuda::{CudaDeviceApi, SimDriver};

fn sim_api(devices: u32) -> (Arc<SimDriver>, CudaDeviceApi) {
    tensordev_common::logging::init_test_logging();
    let sim = Arc::new(SimDriver::new(devices));
    let api = CudaDeviceApi::new(sim.clone());
    (sim, api)
}

#[test]
fn test_attribute_shapes() -> anyhow::Result<()> {
    let (_sim, api) = sim_api(1);
    let gpu = DeviceContext::cuda(0);

    for kind in AttrKind::ALL {
        let value = api.get_attr(gpu, kind)?;
        println!("{:?} = {}", kind, value);
        match kind {
            AttrKind::ComputeVersion | AttrKind::DeviceName => {
                assert!(value.as_str().is_some(), "{:?} should be a string", kind)
            }
            AttrKind::MaxThreadDimensions => assert!(value.as_dims().is_some()),
            _ => assert!(value.as_int().is_some(), "{:?} should be an integer", kind),
        }
    }

    assert_eq!(api.get_attr(gpu, AttrKind::Exist)?, AttrValue::Int(1));
    assert_eq!(api.get_attr(gpu, AttrKind::MaxThreadsPerBlock)?, AttrValue::Int(1024));
    assert_eq!(api.get_attr(gpu, AttrKind::WarpSize)?, AttrValue::Int(32));
    assert_eq!(
        api.get_attr(gpu, AttrKind::MaxSharedMemoryPerBlock)?,
        AttrValue::Int(49152)
    );
    assert_eq!(
        api.get_attr(gpu, AttrKind::ComputeVersion)?,
        AttrValue::Str("8.0".to_string())
    );
    assert_eq!(
        api.get_attr(gpu, AttrKind::DeviceName)?.as_str(),
        Some("Simulated Accelerator 0")
    );
    assert_eq!(api.get_attr(gpu, AttrKind::MaxClockRate)?, AttrValue::Int(1_410_000));
    assert_eq!(api.get_attr(gpu, AttrKind::MultiProcessorCount)?, AttrValue::Int(108));

    let dims = api.get_attr(gpu, AttrKind::MaxThreadDimensions)?;
    assert_eq!(dims, AttrValue::Dims([1024, 1024, 64]));
    assert_eq!(dims.to_string(), "[1024, 1024, 64]");
    Ok(())
}

#[test]
fn test_exist_beyond_device_count() -> anyhow::Result<()> {
    let (sim, api) = sim_api(2);
    assert_eq!(api.device_count(), 2);

    assert_eq!(api.get_attr(DeviceContext::cuda(1), AttrKind::Exist)?, AttrValue::Int(1));
    assert_eq!(api.get_attr(DeviceContext::cuda(2), AttrKind::Exist)?, AttrValue::Int(0));
    assert_eq!(api.get_attr(DeviceContext::cuda(-1), AttrKind::Exist)?, AttrValue::Int(0));
    assert_eq!(sim.last_error(), None);
    Ok(())
}

#[test]
fn test_other_attributes_fail_beyond_device_count() {
    let (_sim, api) = sim_api(1);
    let err = api
        .get_attr(DeviceContext::cuda(4), AttrKind::WarpSize)
        .unwrap_err();
    println!("warp size of gpu(4): {}", err);
    assert!(matches!(err, DeviceError::Driver { code: 101, .. }));
    assert!(err.is_fatal());
}

#[test]
fn test_no_devices() -> anyhow::Result<()> {
    let (_sim, api) = sim_api(0);
    assert_eq!(api.device_count(), 0);
    assert_eq!(api.get_attr(DeviceContext::cuda(0), AttrKind::Exist)?, AttrValue::Int(0));
    assert!(api.get_attr(DeviceContext::cuda(0), AttrKind::DeviceName).is_err());
    Ok(())
}

#[test]
fn test_no_driver() -> anyhow::Result<()> {
    let api = CudaDeviceApi::without_driver();
    assert!(!api.has_driver());
    assert_eq!(api.device_count(), 0);
    assert_eq!(api.get_attr(DeviceContext::cuda(0), AttrKind::Exist)?, AttrValue::Int(0));

    let err = api
        .get_attr(DeviceContext::cuda(0), AttrKind::ComputeVersion)
        .unwrap_err();
    assert!(matches!(err, DeviceError::Unavailable(_)));
    assert!(matches!(
        api.set_device(DeviceContext::cuda(0)),
        Err(DeviceError::Unavailable(_))
    ));
    Ok(())
}

#[test]
fn test_set_device() -> anyhow::Result<()> {
    let (sim, api) = sim_api(2);
    api.set_device(DeviceContext::cuda(1))?;
    assert_eq!(sim.current_device(), Some(1));
    api.set_device(DeviceContext::cuda(0))?;
    assert_eq!(sim.current_device(), Some(0));

    assert!(matches!(
        api.set_device(DeviceContext::cuda(2)),
        Err(DeviceError::Driver { code: 101, .. })
    ));
    assert!(matches!(
        api.set_device(DeviceContext::cpu()),
        Err(DeviceError::Usage(_))
    ));
    Ok(())
}
