//! Integration test: device contexts and attribute values
//!
//! Run with: cargo test --test types_test -- --nocapture

use tensordev_core::{AttrKind, AttrValue, DeviceContext, DeviceError, DeviceType};

#[test]
fn test_device_type_codes() -> anyhow::Result<()> {
    let all = [
        DeviceType::Cpu,
        DeviceType::Cuda,
        DeviceType::OpenCl,
        DeviceType::Vulkan,
        DeviceType::Metal,
        DeviceType::Rocm,
    ];
    for ty in all {
        assert_eq!(DeviceType::from_code(ty.code())?, ty);
    }
    assert_eq!(DeviceType::Cuda.code(), 2);
    assert_eq!(DeviceType::Cuda.name(), "gpu");
    assert!(DeviceType::Cpu.is_host());
    assert!(!DeviceType::Cuda.is_host());
    assert!(matches!(DeviceType::from_code(3), Err(DeviceError::Usage(_))));
    Ok(())
}

#[test]
fn test_context_display() {
    assert_eq!(DeviceContext::cuda(0).to_string(), "gpu(0)");
    assert_eq!(DeviceContext::cuda(3).to_string(), "gpu(3)");
    assert_eq!(DeviceContext::cpu().to_string(), "cpu(0)");
    assert_eq!(
        DeviceContext::new(DeviceType::Cuda, 1),
        DeviceContext::cuda(1)
    );
}

#[test]
fn test_attr_kind_codes() -> anyhow::Result<()> {
    for (i, kind) in AttrKind::ALL.iter().enumerate() {
        assert_eq!(kind.code(), i as i32);
        assert_eq!(AttrKind::from_code(i as i32)?, *kind);
    }
    for bad in [-1, 9, 100] {
        let err = AttrKind::from_code(bad).unwrap_err();
        println!("{} -> {}", bad, err);
        assert!(err.is_fatal());
    }
    Ok(())
}

#[test]
fn test_attr_value_accessors() {
    let int = AttrValue::Int(1024);
    assert_eq!(int.as_int(), Some(1024));
    assert_eq!(int.as_bool(), Some(true));
    assert_eq!(int.as_str(), None);
    assert_eq!(AttrValue::Int(0).as_bool(), Some(false));

    let s = AttrValue::Str("8.6".to_string());
    assert_eq!(s.as_str(), Some("8.6"));
    assert_eq!(s.as_int(), None);

    let dims = AttrValue::Dims([1024, 1024, 64]);
    assert_eq!(dims.as_dims(), Some([1024, 1024, 64]));
    assert_eq!(dims.as_bool(), None);
}

#[test]
fn test_attr_value_display() {
    assert_eq!(AttrValue::Int(32).to_string(), "32");
    assert_eq!(AttrValue::Str("7.5".into()).to_string(), "7.5");
    assert_eq!(AttrValue::Dims([1024, 1024, 64]).to_string(), "[1024, 1024, 64]");
}
