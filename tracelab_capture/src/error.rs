use std::fmt::{Debug, Display, Formatter};
use thiserror::Error;
use tracelab_core::error::CoreError;

#[derive(Error, Debug, Clone)]
pub enum CaptureErrorKind {
    CoreError(CoreError),
    ConfigError,
    ProcessError,
    SnifferError,
    ExtensionError,
    FetcherError,
    IoError,
    SerializationError,
}

impl Display for CaptureErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureErrorKind::CoreError(err) => Display::fmt(&err, f),
            CaptureErrorKind::ConfigError => write!(f, "Invalid configuration"),
            CaptureErrorKind::ProcessError => write!(f, "External process error"),
            CaptureErrorKind::SnifferError => write!(f, "Sniffer error"),
            CaptureErrorKind::ExtensionError => write!(f, "Extension error"),
            CaptureErrorKind::FetcherError => write!(f, "Fetcher error"),
            CaptureErrorKind::IoError => write!(f, "I/O error"),
            CaptureErrorKind::SerializationError => write!(f, "Serialization error"),
        }
    }
}

#[derive(Error, Clone)]
pub struct CaptureError {
    pub error_kind: CaptureErrorKind,
    pub message: String,
}

impl Debug for CaptureError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl Display for CaptureError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.error_kind {
            CaptureErrorKind::CoreError(e) => write!(f, "CaptureError -> {}", e),
            _ => write!(f, "CaptureError: {}: {}", self.error_kind, self.message),
        }
    }
}

impl CaptureError {
    pub fn new(error_kind: CaptureErrorKind, message: &str) -> Self {
        Self {
            error_kind,
            message: message.to_owned(),
        }
    }

    pub fn config(message: &str) -> Self {
        Self::new(CaptureErrorKind::ConfigError, message)
    }

    pub fn is_config_error(&self) -> bool {
        matches!(self.error_kind, CaptureErrorKind::ConfigError)
            || matches!(
                &self.error_kind,
                CaptureErrorKind::CoreError(e)
                    if matches!(e.error_kind, tracelab_core::error::CoreErrorKind::ConfigError)
            )
    }
}

impl From<CoreError> for CaptureError {
    fn from(value: CoreError) -> Self {
        Self::new(CaptureErrorKind::CoreError(value), "")
    }
}

impl From<std::io::Error> for CaptureError {
    fn from(value: std::io::Error) -> Self {
        Self::new(CaptureErrorKind::IoError, value.to_string().as_str())
    }
}

impl From<serde_yaml::Error> for CaptureError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::new(
            CaptureErrorKind::SerializationError,
            value.to_string().as_str(),
        )
    }
}

impl From<serde_json::Error> for CaptureError {
    fn from(value: serde_json::Error) -> Self {
        Self::new(
            CaptureErrorKind::SerializationError,
            value.to_string().as_str(),
        )
    }
}

impl From<which::Error> for CaptureError {
    fn from(value: which::Error) -> Self {
        Self::new(CaptureErrorKind::ConfigError, value.to_string().as_str())
    }
}

#[cfg(unix)]
impl From<nix::errno::Errno> for CaptureError {
    fn from(value: nix::errno::Errno) -> Self {
        Self::new(CaptureErrorKind::ProcessError, value.to_string().as_str())
    }
}
