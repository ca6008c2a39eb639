use std::fmt;

use crate::error::{DeviceError, Result};

/// Kind of memory space, numbered with the DLPack device codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum DeviceType {
    Cpu = 1,
    Cuda = 2,
    OpenCl = 4,
    Vulkan = 7,
    Metal = 8,
    Rocm = 10,
}

impl DeviceType {
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            1 => Ok(DeviceType::Cpu),
            2 => Ok(DeviceType::Cuda),
            4 => Ok(DeviceType::OpenCl),
            7 => Ok(DeviceType::Vulkan),
            8 => Ok(DeviceType::Metal),
            10 => Ok(DeviceType::Rocm),
            other => Err(DeviceError::usage(format!("unknown device type code {}", other))),
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }

    /// Name used for registry lookups (`device_api.<name>`).
    pub fn name(self) -> &'static str {
        match self {
            DeviceType::Cpu => "cpu",
            DeviceType::Cuda => "gpu",
            DeviceType::OpenCl => "opencl",
            DeviceType::Vulkan => "vulkan",
            DeviceType::Metal => "metal",
            DeviceType::Rocm => "rocm",
        }
    }

    pub fn is_host(self) -> bool {
        self == DeviceType::Cpu
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A memory space: device type plus device ordinal.
///
/// Purely descriptive; nothing is owned through a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceContext {
    pub device_type: DeviceType,
    pub device_id: i32,
}

impl DeviceContext {
    pub const fn new(device_type: DeviceType, device_id: i32) -> Self {
        Self { device_type, device_id }
    }

    pub const fn cpu() -> Self {
        Self::new(DeviceType::Cpu, 0)
    }

    pub const fn cuda(device_id: i32) -> Self {
        Self::new(DeviceType::Cuda, device_id)
    }
}

impl fmt::Display for DeviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.device_type, self.device_id)
    }
}
