//! Integration test: logging setup and platform helpers
//!
//! Run with: cargo test --test common_test -- --nocapture

use tensordev_common::{logging, platform};

#[test]
fn test_logging_init_is_repeatable() {
    logging::init_test_logging();
    logging::init_test_logging();
    tracing::info!(target: "tensordev_common", "test subscriber installed");
    assert_eq!(logging::LOG_ENV, "TENSORDEV_LOG");
}

#[test]
fn test_driver_library_names() {
    let names = platform::cuda_driver_library_names();
    println!("{}: {:?}", platform::platform_name(), names);
    #[cfg(target_os = "linux")]
    assert_eq!(names.first(), Some(&"libcuda.so.1"));
    #[cfg(target_os = "windows")]
    assert_eq!(names, &["nvcuda.dll"]);
}

#[test]
fn test_system_config_dir() {
    let dir = platform::system_config_dir();
    assert!(dir.ends_with("tensordev"));
    #[cfg(not(windows))]
    assert_eq!(dir, "/etc/tensordev");
}
