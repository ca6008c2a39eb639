use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DeviceError, Result};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "TENSORDEV_CONFIG";

/// Largest alignment the CUDA allocator guarantees.
pub const MAX_WORKSPACE_ALIGNMENT: usize = 256;

/// Top-level configuration, loaded from tensordev.toml.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensordevConfig {
    #[serde(default)]
    pub cuda: CudaConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CudaConfig {
    /// Which driver backs the CUDA device API
    #[serde(default)]
    pub backend: BackendKind,
    /// Explicit driver library path (None = platform search list)
    pub library_path: Option<String>,
    /// Number of devices exposed by the simulated driver
    #[serde(default = "default_sim_devices")]
    pub sim_devices: u32,
}

/// Driver selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    /// Real driver if it loads, otherwise run without an accelerator
    #[default]
    #[serde(rename = "auto")]
    Auto,
    /// Real driver, failing if it cannot be loaded
    #[serde(rename = "driver")]
    Driver,
    /// Host-memory simulation
    #[serde(rename = "sim")]
    Sim,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Allocation granularity of workspace pages
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Alignment requested for each page
    #[serde(default = "default_alignment")]
    pub alignment: usize,
}

impl Default for CudaConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            library_path: None,
            sim_devices: default_sim_devices(),
        }
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            alignment: default_alignment(),
        }
    }
}

impl WorkspaceConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.page_size.is_power_of_two() {
            return Err(DeviceError::Config(format!(
                "workspace.page_size must be a power of two, got {}",
                self.page_size
            )));
        }
        if !self.alignment.is_power_of_two() || self.alignment > MAX_WORKSPACE_ALIGNMENT {
            return Err(DeviceError::Config(format!(
                "workspace.alignment must be a power of two <= {}, got {}",
                MAX_WORKSPACE_ALIGNMENT, self.alignment
            )));
        }
        Ok(())
    }
}

impl TensordevConfig {
    /// Parse and validate configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: TensordevConfig = toml::from_str(content)?;
        config.workspace.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load configuration from file if it exists, otherwise return defaults.
    pub fn load_or_default(path: &str) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                debug!("using default configuration ({}): {}", path, e);
                Self::default()
            }
        }
    }
}

/// Returns the config file path.
/// Search order:
/// 1. `$TENSORDEV_CONFIG`
/// 2. System-wide config: `<system config dir>/tensordev.toml`
/// 3. Local fallback: `./tensordev.toml`
pub fn default_config_path() -> String {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return path;
    }
    let system_path = format!(
        "{}/tensordev.toml",
        tensordev_common::platform::system_config_dir()
    );
    if std::path::Path::new(&system_path).exists() {
        return system_path;
    }
    "tensordev.toml".to_string()
}

fn default_sim_devices() -> u32 {
    1
}

fn default_page_size() -> usize {
    4 << 10
}

fn default_alignment() -> usize {
    64
}
