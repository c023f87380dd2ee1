use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::PoisonError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum CoreErrorKind {
    #[error("Capture error")]
    CaptureError,
    #[error("Capture file error")]
    CaptureFileError,
    #[error("Network interface error")]
    NetworkInterfaceError,
    #[error("I/O error")]
    IoError,
    #[error("Serialization error")]
    SerializationError,
    #[error("Configuration error")]
    ConfigError,
    #[error("Port pool timeout")]
    PortPoolTimeout,
    #[error("Unallocated port")]
    UnallocatedPort,
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Lock poisoned")]
    LockError,
    #[error("Process not found")]
    ProcessNotFound,
    #[error("Access denied")]
    AccessDenied,
    #[error("Unsupported platform")]
    UnsupportedPlatform,
    #[error("Socket enumeration error")]
    SocketError,
    #[error("Thread error")]
    ThreadError,
}

#[derive(Debug, Clone)]
pub struct CoreError {
    pub error_kind: CoreErrorKind,
    pub message: String,
}

impl Display for CoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Core Error: {}: {}", self.error_kind, self.message)
    }
}

impl Error for CoreError {}

impl CoreError {
    pub fn new(error_kind: CoreErrorKind, message: &str) -> Self {
        Self {
            error_kind,
            message: message.to_owned(),
        }
    }
}

impl From<pcap::Error> for CoreError {
    fn from(value: pcap::Error) -> Self {
        CoreError::new(CoreErrorKind::CaptureError, &value.to_string())
    }
}

impl From<pcap_file::PcapError> for CoreError {
    fn from(value: pcap_file::PcapError) -> Self {
        CoreError::new(CoreErrorKind::CaptureFileError, &value.to_string())
    }
}

impl From<std::io::Error> for CoreError {
    fn from(value: std::io::Error) -> Self {
        Self::new(CoreErrorKind::IoError, value.to_string().as_str())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::new(CoreErrorKind::SerializationError, value.to_string().as_str())
    }
}

impl<T> From<PoisonError<T>> for CoreError {
    fn from(value: PoisonError<T>) -> Self {
        Self::new(CoreErrorKind::LockError, value.to_string().as_str())
    }
}

#[cfg(target_os = "linux")]
impl From<procfs::ProcError> for CoreError {
    fn from(value: procfs::ProcError) -> Self {
        match value {
            procfs::ProcError::NotFound(path) => Self::new(
                CoreErrorKind::ProcessNotFound,
                format!("{:?}", path).as_str(),
            ),
            procfs::ProcError::PermissionDenied(path) => Self::new(
                CoreErrorKind::AccessDenied,
                format!("{:?}", path).as_str(),
            ),
            e => Self::new(CoreErrorKind::SocketError, e.to_string().as_str()),
        }
    }
}
