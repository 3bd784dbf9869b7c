//! Error Handling Module
//!
//! Defines the error type shared by every stage of a fine-tuning run.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for fine-tuning runs
#[derive(Error, Debug)]
pub enum Error {
    /// An image could not be decoded or probed
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// Dataset resolution or scanning failed
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Model construction or weight loading failed
    #[error("Model error: {0}")]
    Model(String),

    /// The optimisation loop failed
    #[error("Training error: {0}")]
    Training(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Experiment tracker failure
    #[error("Tracking error: {0}")]
    Tracking(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Burn record (weights) error
    #[error("Recorder error: {0}")]
    Recorder(String),

    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),
}

/// Convenience Result type
pub type Result<T> = std::result::Result<T, Error>;

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::ImageLoad(PathBuf::new(), err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<burn::record::RecorderError> for Error {
    fn from(err: burn::record::RecorderError) -> Self {
        Error::Recorder(err.to_string())
    }
}

/// Extension trait for attaching a message to foreign errors
pub trait ResultExt<T> {
    /// Wrap the error as a tracking error with context
    fn tracking_context(self, msg: &str) -> Result<T>;

    /// Wrap the error as a dataset error with lazily built context
    fn dataset_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn tracking_context(self, msg: &str) -> Result<T> {
        self.map_err(|e| Error::Tracking(format!("{}: {}", msg, e)))
    }

    fn dataset_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| Error::Dataset(format!("{}: {}", f(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Dataset("no Training partition".to_string());
        assert_eq!(format!("{}", err), "Dataset error: no Training partition");
    }

    #[test]
    fn test_image_load_error() {
        let path = PathBuf::from("/data/Training/glioma_tumor/scan_01.jpg");
        let err = Error::ImageLoad(path, "truncated".to_string());
        assert!(format!("{}", err).contains("scan_01.jpg"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_tracking_context() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only",
        ));
        let err = result.tracking_context("writing metric").unwrap_err();
        assert!(matches!(err, Error::Tracking(ref m) if m.starts_with("writing metric")));
    }

    #[test]
    fn test_toml_error_is_config() {
        let parsed: std::result::Result<toml::Value, _> = toml::from_str("epochs = ");
        let err: Error = parsed.unwrap_err().into();
        assert!(matches!(err, Error::Config(_)));
    }
}
