/// Errors surfaced by device backends.
///
/// `Usage` and `Driver` are the non-retryable classes: the first means the
/// caller asked for something the backend cannot do, the second means the
/// accelerator runtime failed underneath us.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("usage error: {0}")]
    Usage(String),

    #[error("{op} failed: {message} (code={code})")]
    Driver {
        op: &'static str,
        code: i32,
        message: String,
    },

    #[error("accelerator driver unavailable: {0}")]
    Unavailable(String),

    #[error("device API not registered: {0}")]
    NotRegistered(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl DeviceError {
    pub fn usage(message: impl Into<String>) -> Self {
        DeviceError::Usage(message.into())
    }

    /// True for the classes that indicate a defect or an unrecoverable
    /// driver state rather than a missing environment.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DeviceError::Usage(_) | DeviceError::Driver { .. })
    }
}

pub type Result<T> = std::result::Result<T, DeviceError>;
