use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration rejected: {0}")]
    ConfigurationRejected(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("Transport failure: {0}")]
    TransportFailure(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Encoding error: {0}")]
    Encoding(String),
    #[error("Config error: {0}")]
    Config(String),
}

/// Coarse error category, stable enough to hand to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConfigurationRejected,
    InvalidState,
    DeviceUnavailable,
    TransportFailure,
    Io,
    Encoding,
    Config,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::ConfigurationRejected(_) => ErrorKind::ConfigurationRejected,
            PipelineError::InvalidState(_) => ErrorKind::InvalidState,
            PipelineError::DeviceUnavailable(_) => ErrorKind::DeviceUnavailable,
            PipelineError::TransportFailure(_) => ErrorKind::TransportFailure,
            PipelineError::Io(_) => ErrorKind::Io,
            PipelineError::Encoding(_) => ErrorKind::Encoding,
            PipelineError::Config(_) => ErrorKind::Config,
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        PipelineError::InvalidState(message.into())
    }

    pub fn device_unavailable(message: impl Into<String>) -> Self {
        PipelineError::DeviceUnavailable(message.into())
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(error: std::io::Error) -> Self {
        PipelineError::Io(error.to_string())
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_prefixes() {
        let error = PipelineError::invalid_state("not streaming");
        assert_eq!(error.to_string(), "Invalid state: not streaming");

        let error = PipelineError::device_unavailable("camera busy");
        assert_eq!(error.to_string(), "Device unavailable: camera busy");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let error: PipelineError = io.into();
        assert_eq!(error.kind(), ErrorKind::Io);
        assert!(error.to_string().contains("read-only"));
    }
}
