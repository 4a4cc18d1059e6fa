//! I/O error types.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for I/O operations.
pub type IoResult<T> = std::result::Result<T, IoError>;

/// Errors that can occur while reading, writing, or streaming volumes.
#[derive(Debug, Error)]
pub enum IoError {
    /// Underlying filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TIFF decoding failed.
    #[error("failed to decode {path}: {reason}")]
    Decode {
        /// File being read.
        path: PathBuf,
        /// Decoder message.
        reason: String,
    },

    /// TIFF encoding failed.
    #[error("failed to encode {path}: {reason}")]
    Encode {
        /// File being written.
        path: PathBuf,
        /// Encoder message.
        reason: String,
    },

    /// The file decodes but is not a grayscale stack this pipeline accepts.
    #[error("unsupported TIFF layout in {path}: {detail}")]
    UnsupportedFormat {
        /// File being read.
        path: PathBuf,
        /// What was found instead.
        detail: String,
    },

    /// Pages of a stack disagree in size.
    #[error("inconsistent stack {path}: page {page} is {got}, expected {expected}")]
    InconsistentStack {
        /// File being read.
        path: PathBuf,
        /// Zero-based page index.
        page: usize,
        /// Page dimensions found, `WxH`.
        got: String,
        /// Page dimensions expected, `WxH`.
        expected: String,
    },

    /// A directory matched no files under the given pattern.
    #[error("no files matching pattern \"{pattern}\" found in directory: {dir}")]
    NoMatchingFiles {
        /// Filename pattern applied.
        pattern: String,
        /// Directory searched.
        dir: PathBuf,
    },

    /// An input path names neither a file nor a directory.
    #[error("no such file or directory: {path}")]
    NoSuchPath {
        /// The dangling path.
        path: PathBuf,
    },

    /// The filename pattern itself does not parse.
    #[error("invalid filename pattern: {0}")]
    InvalidPattern(#[from] glob::PatternError),

    /// Volume construction from decoded data failed.
    #[error(transparent)]
    Core(#[from] decon_core::CoreError),
}

impl IoError {
    /// Creates an [`IoError::Decode`] error.
    #[inline]
    pub fn decode(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Decode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates an [`IoError::Encode`] error.
    #[inline]
    pub fn encode(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Encode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates an [`IoError::UnsupportedFormat`] error.
    #[inline]
    pub fn unsupported(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            path: path.into(),
            detail: detail.into(),
        }
    }
}
