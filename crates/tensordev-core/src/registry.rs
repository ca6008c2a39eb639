//! Name-based discovery of device backends.
//!
//! Backends register a handle under `device_api.<type name>` so the runtime
//! can find them without depending on the backend crate.

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use tracing::debug;

use crate::context::DeviceType;
use crate::device_api::DeviceApi;
use crate::error::{DeviceError, Result};

/// Registry key for a device type.
pub fn api_name(device_type: DeviceType) -> String {
    format!("device_api.{}", device_type.name())
}

pub struct DeviceApiRegistry {
    apis: DashMap<String, Arc<dyn DeviceApi>>,
}

impl DeviceApiRegistry {
    pub fn new() -> Self {
        Self { apis: DashMap::new() }
    }

    /// Register `api` under `name`, returning the handle it replaced.
    pub fn register(&self, name: &str, api: Arc<dyn DeviceApi>) -> Option<Arc<dyn DeviceApi>> {
        debug!("registering {}", name);
        self.apis.insert(name.to_string(), api)
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn DeviceApi>> {
        self.apis
            .get(name)
            .map(|api| Arc::clone(api.value()))
            .ok_or_else(|| DeviceError::NotRegistered(name.to_string()))
    }

    /// Look up the backend for `device_type`. With `allow_missing` a missing
    /// backend yields `Ok(None)` instead of an error.
    pub fn get_for(
        &self,
        device_type: DeviceType,
        allow_missing: bool,
    ) -> Result<Option<Arc<dyn DeviceApi>>> {
        match self.get(&api_name(device_type)) {
            Ok(api) => Ok(Some(api)),
            Err(_) if allow_missing => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.apis.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.apis.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl Default for DeviceApiRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide registry.
pub fn registry() -> &'static DeviceApiRegistry {
    static REGISTRY: OnceLock<DeviceApiRegistry> = OnceLock::new();
    REGISTRY.get_or_init(DeviceApiRegistry::new)
}
