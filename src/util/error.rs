//! Error types for the Scenio library.
//!
//! The variants cover five broad failure classes: not-found,
//! permission-denied, malformed-container, invalid-argument and unsupported.
//! Every variant carries enough context (path, entry name, channel) for a
//! caller to report precisely which location failed.

use std::path::PathBuf;
use thiserror::Error;

use super::DataKind;

/// Main error type for Scenio operations.
#[derive(Error, Debug)]
pub enum Error {
    /// File does not exist or cannot be accessed
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// Entry or path missing from the hierarchy
    #[error("Entry not found: '{name}' at '{path}'")]
    NotFound { path: String, name: String },

    /// Entry already present where a new one was to be created
    #[error("Entry already exists: '{name}' at '{path}'")]
    AlreadyExists { path: String, name: String },

    /// Mutation attempted through a read-only handle
    #[error("No write access: cannot {op} at '{path}'")]
    PermissionDenied { path: String, op: &'static str },

    /// Write rejected because the location is (or sits under) a link boundary
    #[error("Link boundary at '{path}': cannot {op}")]
    LinkBoundary { path: String, op: &'static str },

    /// Trailing magic number matched neither recognized value
    #[error("Not a scenio container: bad magic number {0:#x}")]
    BadMagic(i64),

    /// Structural corruption while loading the index
    #[error("Corrupt container index: {0}")]
    CorruptIndex(String),

    /// File is truncated
    #[error("Unexpected end of file at position {0}")]
    UnexpectedEof(u64),

    /// Stored data kind differs from the requested one
    #[error("Type mismatch for '{name}': expected {expected}, stored {actual}")]
    TypeMismatch {
        name: String,
        expected: DataKind,
        actual: DataKind,
    },

    /// Stored array length differs from the requested one
    #[error("Array length mismatch for '{name}': expected {expected}, stored {actual}")]
    ArrayLengthMismatch {
        name: String,
        expected: u64,
        actual: u64,
    },

    /// Sample times must be strictly increasing per channel
    #[error("Non-monotonic sample time for {channel} at '{path}': {time} after {last}")]
    NonMonotonicTime {
        path: String,
        channel: String,
        last: f64,
        time: f64,
    },

    /// Channel was never written at this location
    #[error("No {channel} samples at '{path}'")]
    NoSamples { path: String, channel: String },

    /// Sample index out of bounds
    #[error("Sample index {index} out of bounds (count: {count})")]
    SampleOutOfBounds { index: usize, count: usize },

    /// Target scene child name clashes with an existing child of the link host
    #[error("Link name collision at '{path}': child '{name}' exists on both sides")]
    LinkCollision { path: String, name: String },

    /// Object samples must either all carry bounds or none of them
    #[error("Inconsistent object bounds at '{path}': either all object samples carry bounds, or none do")]
    InconsistentBounds { path: String },

    /// Operation has no meaning for the given payload or handle
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// UTF-8 conversion error
    #[error("Invalid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl Error {
    /// Create a structural corruption error.
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::CorruptIndex(msg.into())
    }

    /// Create an unsupported-operation error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }
}

/// Result type alias for Scenio operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::BadMagic(0x1234);
        assert!(e.to_string().contains("magic"));

        let e = Error::SampleOutOfBounds { index: 5, count: 3 };
        assert!(e.to_string().contains("5"));
        assert!(e.to_string().contains("3"));

        let e = Error::NoSamples {
            path: "/a/b".into(),
            channel: "object".into(),
        };
        assert!(e.to_string().contains("/a/b"));
        assert!(e.to_string().contains("object"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
