//! Unified error types for fabricnet

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Identity of the device an operation was acting on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRef {
    pub global_id: String,
    pub local_name: Option<String>,
}

impl DeviceRef {
    pub fn new(global_id: &str, local_name: Option<&str>) -> Self {
        Self {
            global_id: global_id.to_string(),
            local_name: local_name.map(str::to_string),
        }
    }
}

impl fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.local_name {
            Some(name) => write!(f, "'{}' ({})", self.global_id, name),
            None => write!(f, "'{}'", self.global_id),
        }
    }
}

/// Coarse classification callers use to decide retry/compensation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    UnsupportedMode,
    NotBound,
    BackendFailure,
    TransactionIncomplete,
    Config,
}

impl ErrorKind {
    /// Process exit status for a command that failed with this kind
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::InvalidArgument | ErrorKind::UnsupportedMode => 64,
            ErrorKind::NotFound => 2,
            ErrorKind::Config => 78,
            _ => 1,
        }
    }
}

/// Main error type for fabricnet operations
#[derive(Error, Debug)]
pub enum Error {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Config errors
    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config validation failed: {0}")]
    ConfigValidation(String),

    // Device errors
    #[error("{op} {device}: {source}")]
    Device {
        device: DeviceRef,
        op: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("unsupported network mode '{0}'")]
    UnsupportedMode(String),

    #[error("device is not bound")]
    NotBound,

    #[error("backend failure: {0}")]
    Backend(String),

    // Switch errors
    #[error(
        "transaction failed at operation {index} on table '{table}': {message} (no partial state should be assumed committed)"
    )]
    TransactionIncomplete {
        table: String,
        index: usize,
        message: String,
    },

    #[error("Command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Switch protocol error: {0}")]
    Protocol(String),

    #[error("Switch session disconnected")]
    Disconnected,
}

impl Error {
    /// Wrap an error with the device and operation it occurred in
    pub fn on_device(self, device: DeviceRef, op: &'static str) -> Self {
        Error::Device {
            device,
            op,
            source: Box::new(self),
        }
    }

    /// Classify the error, looking through device context
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Device { source, .. } => source.kind(),
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Error::UnsupportedMode(_) => ErrorKind::UnsupportedMode,
            Error::NotBound => ErrorKind::NotBound,
            Error::TransactionIncomplete { .. } => ErrorKind::TransactionIncomplete,
            Error::ConfigRead { .. } | Error::ConfigParse(_) | Error::ConfigValidation(_) => {
                ErrorKind::Config
            }
            Error::Backend(_)
            | Error::CommandFailed { .. }
            | Error::Io(_)
            | Error::Json(_)
            | Error::Protocol(_)
            | Error::Disconnected => ErrorKind::BackendFailure,
        }
    }
}

/// Result type alias for fabricnet operations
pub type Result<T> = std::result::Result<T, Error>;
