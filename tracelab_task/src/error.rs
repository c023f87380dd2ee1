use std::fmt::{Debug, Display, Formatter};
use thiserror::Error;
use tracelab_capture::error::CaptureError;
use tracelab_core::error::CoreError;

#[derive(Error, Debug, Clone)]
pub enum TaskErrorKind {
    #[error("{0}")]
    CoreError(CoreError),
    #[error("{0}")]
    CaptureError(CaptureError),
    #[error("Invalid descriptor")]
    ConfigError,
    #[error("I/O error")]
    IoError,
    #[error("Descriptor (de)serialization error")]
    SerializationError,
    #[error("Task execution unit failed")]
    JoinError,
}

#[derive(Error, Debug, Clone)]
pub struct TaskError {
    pub error_kind: TaskErrorKind,
    pub message: String,
}

impl Display for TaskError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.error_kind {
            TaskErrorKind::CoreError(e) => write!(f, "TaskError -> {}", e),
            TaskErrorKind::CaptureError(e) => write!(f, "TaskError -> {}", e),
            _ => write!(f, "TaskError: {}: {}", self.error_kind, self.message),
        }
    }
}

impl TaskError {
    pub fn new(error_kind: TaskErrorKind, message: &str) -> Self {
        Self {
            error_kind,
            message: message.to_owned(),
        }
    }

    pub fn config(message: &str) -> Self {
        Self::new(TaskErrorKind::ConfigError, message)
    }
}

impl From<CoreError> for TaskError {
    fn from(value: CoreError) -> Self {
        Self::new(TaskErrorKind::CoreError(value), "")
    }
}

impl From<CaptureError> for TaskError {
    fn from(value: CaptureError) -> Self {
        Self::new(TaskErrorKind::CaptureError(value), "")
    }
}

impl From<std::io::Error> for TaskError {
    fn from(value: std::io::Error) -> Self {
        Self::new(TaskErrorKind::IoError, value.to_string().as_str())
    }
}

impl From<serde_yaml::Error> for TaskError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::new(
            TaskErrorKind::SerializationError,
            value.to_string().as_str(),
        )
    }
}

impl From<tokio::task::JoinError> for TaskError {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::new(TaskErrorKind::JoinError, value.to_string().as_str())
    }
}
