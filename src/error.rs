//! Error types for TagIO

use thiserror::Error;

/// Result type alias for TagIO operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for TagIO
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Magic bytes do not match any known container format
    #[error("File not recognized by any codec")]
    NotRecognized,

    /// Structural violation inside a container or tag region
    #[error("Malformed {location}: {reason}")]
    Malformed { location: String, reason: String },

    /// Feature present in the file that the codec cannot process
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Caller error: bad tag type for the format, oversized picture, etc.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Create a malformed-structure error
    pub fn malformed<L: Into<String>, R: Into<String>>(location: L, reason: R) -> Self {
        Error::Malformed {
            location: location.into(),
            reason: reason.into(),
        }
    }

    /// Create an unsupported-feature error
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        Error::Unsupported(msg.into())
    }

    /// Create an invalid-argument error
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Error::InvalidArgument(msg.into())
    }
}
