//! Backend-independent device abstraction for the tensordev runtime.

pub mod attr;
pub mod config;
pub mod context;
pub mod device_api;
pub mod error;
pub mod registry;
pub mod workspace;

pub use attr::{AttrKind, AttrValue};
pub use context::{DeviceContext, DeviceType};
pub use device_api::{DataSpace, DeviceApi, StreamHandle};
pub use error::{DeviceError, Result};
pub use registry::{registry, DeviceApiRegistry};
pub use workspace::{WorkspacePool, WorkspaceStats};
