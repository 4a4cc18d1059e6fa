//! Native boundary error types.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for native boundary operations.
pub type FfiResult<T> = std::result::Result<T, FfiError>;

/// Errors that can occur at the native library boundary.
///
/// Library and symbol resolution failures surface at load time - the first
/// use of the backend - never silently. A non-zero status from a native
/// entry point becomes [`FfiError::CallFailed`].
#[derive(Debug, Error)]
pub enum FfiError {
    /// The shared library could not be loaded.
    #[error("unable to load native library '{name}': {reason}")]
    LibraryLoad {
        /// Library name or path as requested.
        name: String,
        /// Loader message.
        reason: String,
    },

    /// A required entry point is missing from the loaded library.
    #[error("native library '{library}' is missing symbol '{symbol}'")]
    MissingSymbol {
        /// Symbol that failed to resolve.
        symbol: String,
        /// Library it was expected in.
        library: String,
    },

    /// A native entry point returned a non-zero status.
    #[error("native call {function} failed with status {status}")]
    CallFailed {
        /// Entry point name.
        function: &'static str,
        /// Status code as returned.
        status: i32,
    },

    /// A path cannot be handed to the native layer (interior NUL byte).
    #[error("path cannot cross the native boundary: {path}")]
    InvalidPath {
        /// The offending path.
        path: PathBuf,
    },

    /// A version string does not parse as `major.minor[.patch]`.
    #[error("invalid native library version string: {value:?}")]
    InvalidVersion {
        /// The string that failed to parse.
        value: String,
    },
}

impl FfiError {
    /// Checks a native status code, mapping non-zero to
    /// [`FfiError::CallFailed`].
    #[inline]
    pub fn check(function: &'static str, status: i32) -> FfiResult<()> {
        if status == 0 {
            Ok(())
        } else {
            Err(FfiError::CallFailed { function, status })
        }
    }
}
