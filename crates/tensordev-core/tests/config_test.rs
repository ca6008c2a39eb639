//! Integration test: configuration loading
//!
//! Run with: cargo test --test config_test -- --nocapture

use tensordev_core::config::{BackendKind, TensordevConfig, WorkspaceConfig};
use tensordev_core::DeviceError;

#[test]
fn test_empty_config_uses_defaults() {
    let config = TensordevConfig::from_toml("").unwrap();
    assert_eq!(config, TensordevConfig::default());
    assert_eq!(config.cuda.backend, BackendKind::Auto);
    assert_eq!(config.cuda.library_path, None);
    assert_eq!(config.cuda.sim_devices, 1);
    assert_eq!(config.workspace.page_size, 4096);
    assert_eq!(config.workspace.alignment, 64);
}

#[test]
fn test_full_config() {
    let config = TensordevConfig::from_toml(
        r#"
[cuda]
backend = "sim"
library_path = "/opt/cuda/lib64/libcuda.so.1"
sim_devices = 4

[workspace]
page_size = 65536
alignment = 256
"#,
    )
    .unwrap();
    println!("{:#?}", config);

    assert_eq!(config.cuda.backend, BackendKind::Sim);
    assert_eq!(
        config.cuda.library_path.as_deref(),
        Some("/opt/cuda/lib64/libcuda.so.1")
    );
    assert_eq!(config.cuda.sim_devices, 4);
    assert_eq!(
        config.workspace,
        WorkspaceConfig {
            page_size: 65536,
            alignment: 256
        }
    );
}

#[test]
fn test_backend_names() {
    for (text, kind) in [
        ("auto", BackendKind::Auto),
        ("driver", BackendKind::Driver),
        ("sim", BackendKind::Sim),
    ] {
        let config =
            TensordevConfig::from_toml(&format!("[cuda]\nbackend = \"{}\"\n", text)).unwrap();
        assert_eq!(config.cuda.backend, kind);
    }

    let err = TensordevConfig::from_toml("[cuda]\nbackend = \"opencl\"\n").unwrap_err();
    println!("unknown backend: {}", err);
    assert!(matches!(err, DeviceError::Toml(_)));
}

#[test]
fn test_invalid_workspace_rejected() {
    for text in [
        "[workspace]\npage_size = 0\n",
        "[workspace]\npage_size = 3000\n",
        "[workspace]\nalignment = 0\n",
        "[workspace]\nalignment = 48\n",
        "[workspace]\nalignment = 512\n",
    ] {
        let err = TensordevConfig::from_toml(text).unwrap_err();
        println!("{:?} -> {}", text, err);
        assert!(matches!(err, DeviceError::Config(_)));
    }
}

#[test]
fn test_load_from_file() {
    let path = std::env::temp_dir().join(format!("tensordev-config-{}.toml", std::process::id()));
    std::fs::write(&path, "[workspace]\npage_size = 8192\n").unwrap();

    let path_str = path.to_str().unwrap();
    let config = TensordevConfig::load(path_str).unwrap();
    assert_eq!(config.workspace.page_size, 8192);
    assert_eq!(config.workspace.alignment, 64);

    std::fs::remove_file(&path).unwrap();
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let missing = "/nonexistent/tensordev/tensordev.toml";
    assert!(matches!(
        TensordevConfig::load(missing).unwrap_err(),
        DeviceError::Io(_)
    ));
    assert_eq!(
        TensordevConfig::load_or_default(missing),
        TensordevConfig::default()
    );
}

#[test]
fn test_config_round_trips_through_toml() {
    let mut config = TensordevConfig::default();
    config.cuda.backend = BackendKind::Driver;
    config.workspace.page_size = 1 << 20;

    let text = toml::to_string(&config).unwrap();
    println!("{}", text);
    assert_eq!(TensordevConfig::from_toml(&text).unwrap(), config);
}
