//! CUDA backend of the tensordev device abstraction.

pub mod capability;
pub mod copy;
pub mod cuda_driver;
pub mod device_api;
pub mod driver;
pub mod pinned;
pub mod sim;
mod stream;
mod thread_entry;

use std::sync::Arc;

use tensordev_core::DeviceApi;

pub use copy::CopyRoute;
pub use cuda_driver::CudaDriver;
pub use device_api::{CudaDeviceApi, CUDA_API_NAME};
pub use driver::Driver;
pub use pinned::PinnedTracker;
pub use sim::SimDriver;

/// Publish the process-wide CUDA handle under `device_api.gpu`.
///
/// Returns the handle previously registered under that name, if any.
pub fn register() -> Option<Arc<dyn DeviceApi>> {
    let api: Arc<dyn DeviceApi> = CudaDeviceApi::global();
    tensordev_core::registry().register(CUDA_API_NAME, api)
}
