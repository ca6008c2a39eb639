use std::fmt;

use crate::error::{DeviceError, Result};

/// Attribute kinds a backend can be asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum AttrKind {
    Exist = 0,
    MaxThreadsPerBlock = 1,
    WarpSize = 2,
    MaxSharedMemoryPerBlock = 3,
    ComputeVersion = 4,
    DeviceName = 5,
    MaxClockRate = 6,
    MultiProcessorCount = 7,
    MaxThreadDimensions = 8,
}

impl AttrKind {
    pub const ALL: [AttrKind; 9] = [
        AttrKind::Exist,
        AttrKind::MaxThreadsPerBlock,
        AttrKind::WarpSize,
        AttrKind::MaxSharedMemoryPerBlock,
        AttrKind::ComputeVersion,
        AttrKind::DeviceName,
        AttrKind::MaxClockRate,
        AttrKind::MultiProcessorCount,
        AttrKind::MaxThreadDimensions,
    ];

    pub fn from_code(code: i32) -> Result<Self> {
        usize::try_from(code)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
            .ok_or_else(|| DeviceError::usage(format!("unknown device attribute kind {}", code)))
    }

    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Value returned by an attribute query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Int(i64),
    Str(String),
    /// Three integers, e.g. max block dimensions. Renders as `[x, y, z]`.
    Dims([i64; 3]),
}

impl AttrValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_dims(&self) -> Option<[i64; 3]> {
        match self {
            AttrValue::Dims(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_int().map(|v| v != 0)
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Int(v) => write!(f, "{}", v),
            AttrValue::Str(s) => f.write_str(s),
            AttrValue::Dims([x, y, z]) => write!(f, "[{}, {}, {}]", x, y, z),
        }
    }
}
