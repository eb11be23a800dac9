use std::path::PathBuf;
use thiserror::Error;

/// Result type for carving operations
pub type CarveResult<T> = Result<T, CarveError>;

/// Errors that can occur while scheduling, reading or carving files
#[derive(Error, Debug)]
pub enum CarveError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Insufficient data: requested {requested} bytes, read {read} at position {position}")]
    InsufficientData {
        requested: usize,
        read: usize,
        position: u64,
    },
    #[error("Processor not ready: {0}")]
    NotReady(&'static str),
    #[error("Invalid capacity: {0} (must be at least 1)")]
    InvalidCapacity(usize),
    #[error("Pipeline error: {0}")]
    Pipeline(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl CarveError {
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound(path.into())
    }

    pub fn permission_denied(path: impl Into<PathBuf>) -> Self {
        Self::PermissionDenied(path.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn pipeline(msg: impl Into<String>) -> Self {
        Self::Pipeline(msg.into())
    }

    pub fn insufficient_data(requested: usize, read: usize, position: u64) -> Self {
        Self::InsufficientData {
            requested,
            read,
            position,
        }
    }
}

/// Maps an `io::Error` from opening `path` onto the path-carrying variants.
pub(crate) fn open_error(path: &std::path::Path, e: std::io::Error) -> CarveError {
    match e.kind() {
        std::io::ErrorKind::NotFound => CarveError::file_not_found(path),
        std::io::ErrorKind::PermissionDenied => CarveError::permission_denied(path),
        _ => CarveError::IoError(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_error_creation() {
        let path = Path::new("input.bin");
        let err = CarveError::file_not_found(path);
        assert!(matches!(err, CarveError::FileNotFound(_)));

        let err = CarveError::permission_denied(path);
        assert!(matches!(err, CarveError::PermissionDenied(_)));

        let err = CarveError::config("no inputs");
        assert!(matches!(err, CarveError::Config(_)));

        let err = CarveError::insufficient_data(8, 3, 100);
        assert!(matches!(err, CarveError::InsufficientData { read: 3, .. }));
    }

    #[test]
    fn test_error_messages() {
        let err = CarveError::insufficient_data(8, 3, 100);
        assert_eq!(
            err.to_string(),
            "Insufficient data: requested 8 bytes, read 3 at position 100"
        );

        let err = CarveError::InvalidCapacity(0);
        assert_eq!(err.to_string(), "Invalid capacity: 0 (must be at least 1)");

        let err = CarveError::config("at least one pipeline is required");
        assert_eq!(
            err.to_string(),
            "Configuration error: at least one pipeline is required"
        );

        let err = CarveError::file_not_found("input.bin");
        assert_eq!(err.to_string(), "File not found: input.bin");
    }
}
