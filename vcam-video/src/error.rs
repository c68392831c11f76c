//! Error type shared by the whole frame pipeline

use thiserror::Error;

/// Coarse classification used to pick a recovery strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SourceNotFound,
    UnsupportedFormat,
    DecodeFailure,
    InvalidParameter,
    SinkRejected,
    Other,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("source not found: {0}")]
    SourceNotFound(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("decode failure: {0}")]
    DecodeFailure(String),

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("sink rejected frame: {0}")]
    SinkRejected(String),

    #[error("pixel buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSize { expected: usize, actual: usize },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::SourceNotFound(_) => ErrorKind::SourceNotFound,
            Error::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            Error::DecodeFailure(_) => ErrorKind::DecodeFailure,
            Error::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            Error::SinkRejected(_) => ErrorKind::SinkRejected,
            Error::BufferSize { .. } | Error::Config(_) | Error::Io(_) => ErrorKind::Other,
        }
    }

    pub fn invalid_parameter(name: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    /// Missing source files should trigger a fallback, not a generic I/O failure
    pub fn from_open(err: std::io::Error, path: &std::path::Path) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound
            || err.kind() == std::io::ErrorKind::PermissionDenied
        {
            Error::SourceNotFound(format!("{}: {}", path.display(), err))
        } else {
            Error::Io(err)
        }
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::Unsupported(e) => Error::UnsupportedFormat(e.to_string()),
            image::ImageError::IoError(e) => Error::Io(e),
            other => Error::DecodeFailure(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
